use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{IoContext, Result};
use crate::jni;
use crate::selector::SelectionResult;

/// Header every generated unit starts with.
pub const SOURCE_PRELUDE: &str = "#include \"Dex2C.h\"\n";

/// List of compiled full names, next to the generated units.
pub const COMPILED_METHODS_FILE: &str = "compiled_methods.txt";

#[derive(Debug, Default)]
pub struct Emission {
    pub units: Vec<PathBuf>,
    /// Units that replaced an existing file or an earlier unit of the same run
    pub overwritten: Vec<PathBuf>,
}

/// Writes one `<long JNI name>.cpp` per compiled method into `sources_dir`, plus the
/// compiled-methods list.
pub fn write_sources(sources_dir: &Path, selection: &SelectionResult) -> Result<Emission> {
    fs::create_dir_all(sources_dir).at(sources_dir)?;

    let mut emission = Emission::default();
    let mut written = HashSet::new();
    for (identity, code) in &selection.compiled {
        let path = sources_dir.join(format!("{}.cpp", jni::long_name(identity)));
        if !written.insert(path.clone()) || path.exists() {
            warn!("overwriting {} with {}", path.display(), identity);
            emission.overwritten.push(path.clone());
        }
        fs::write(&path, format!("{}{}", SOURCE_PRELUDE, code)).at(&path)?;
        emission.units.push(path);
    }

    let list = selection
        .identities()
        .map(|m| m.full_name())
        .collect::<Vec<_>>()
        .join("\n");
    let list_path = sources_dir.join(COMPILED_METHODS_FILE);
    fs::write(&list_path, list).at(&list_path)?;

    info!("wrote {} source units to {}", emission.units.len(), sources_dir.display());
    Ok(emission)
}

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::error::{IoContext, Result};
use crate::template::copy_tree;

/// ABIs the native project can be built for.
pub const SUPPORTED_ABIS: [&str; 4] = ["armeabi-v7a", "arm64-v8a", "x86_64", "x86"];

/// Deprecated ABI names and their replacement.
pub const DEPRECATED_ABIS: [(&str, &str); 1] = [("armeabi", "armeabi-v7a")];

fn replacement(abi: &str) -> Option<&'static str> {
    DEPRECATED_ABIS
        .iter()
        .find(|(old, _)| *old == abi)
        .map(|(_, new)| *new)
}

/// ABI directory names (`lib/<abi>/...`) of a package's entries.
pub fn packaged_abis<'a>(entry_names: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    entry_names
        .into_iter()
        .filter_map(|name| {
            let mut parts = name.strip_prefix("lib/")?.split('/');
            let abi = parts.next()?.trim();
            // only directories, not files stored directly under lib/
            parts.next()?;
            (!abi.is_empty()).then(|| abi.to_string())
        })
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AbiReconciliation {
    pub abis: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// Maps packaged ABI names onto the supported set. Deprecated names are remapped with a warning;
/// anything else aborts. Runs that keep the packaged libraries skip this step entirely.
pub fn reconcile<'a>(packaged: impl IntoIterator<Item = &'a str>) -> Result<AbiReconciliation> {
    let mut result = AbiReconciliation::default();
    for abi in packaged {
        if SUPPORTED_ABIS.contains(&abi) {
            result.abis.insert(abi.to_string());
        } else if let Some(new) = replacement(abi) {
            let msg = format!("ABI '{}' is deprecated, using '{}' instead", abi, new);
            warn!("{}", msg);
            result.warnings.push(msg);
            result.abis.insert(new.to_string());
        } else {
            fail!(
                Structural,
                "ABI '{}' is unsupported, remove it from the package or keep the libraries as they are",
                abi
            );
        }
    }
    Ok(result)
}

/// Rewrites every `APP_ABI` line of an `Application.mk` to target exactly `abis`.
pub fn rewrite_application_mk(text: &str, abis: &BTreeSet<String>) -> String {
    let directive = format!(
        "APP_ABI := {}",
        abis.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    );
    text.split_inclusive('\n')
        .map(|line| {
            if line.trim_start().starts_with("APP_ABI") {
                let ending = if line.ends_with("\r\n") {
                    "\r\n"
                } else if line.ends_with('\n') {
                    "\n"
                } else {
                    ""
                };
                format!("{}{}", directive, ending)
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// Applies a reconciliation to the project's `Application.mk`. Nothing changes when no ABI was
/// packaged.
pub fn adjust_application_mk(application_mk: &Path, abis: &BTreeSet<String>) -> Result<()> {
    if abis.is_empty() {
        info!("no ABIs packaged, keeping the ones defined in {}", application_mk.display());
        return Ok(());
    }
    let text = fs::read_to_string(application_mk).at(application_mk)?;
    fs::write(application_mk, rewrite_application_mk(&text, abis)).at(application_mk)?;
    info!("targeting ABIs {:?}", abis);
    Ok(())
}

/// Copies `lib<module>.so` from the built project's `libs/<abi>/` into every ABI directory of
/// the decompiled package. Returns the warnings raised.
pub fn merge_compiled_libs(
    project_libs: &Path,
    package_libs: &Path,
    module: &str,
    force_keep_libs: bool,
) -> Result<Vec<String>> {
    let mut warnings = vec![];
    if !project_libs.is_dir() {
        return Ok(warnings);
    }
    if !package_libs.is_dir() {
        copy_tree(project_libs, package_libs)?;
        return Ok(warnings);
    }

    let mut abis = vec![];
    for entry in fs::read_dir(package_libs).at(package_libs)? {
        let entry = entry.at(package_libs)?;
        if entry.file_type().at(&entry.path())?.is_dir() {
            abis.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    abis.sort();

    let library = format!("lib{}.so", module);
    for abi in abis {
        let mut src = project_libs.join(&abi);
        if !src.exists() {
            if let Some(new) = replacement(&abi) {
                let msg = format!("using {} libraries for {}", new, abi);
                warn!("{}", msg);
                warnings.push(msg);
                src = project_libs.join(new);
            }
        }
        if !src.exists() {
            if force_keep_libs {
                let msg = format!("no compiled library for ABI {}, keeping the packaged ones", abi);
                warn!("{}", msg);
                warnings.push(msg);
                continue;
            }
            fail!(Structural, "ABI {} is not supported by the compiled project", abi);
        }
        let from = src.join(&library);
        if !from.is_file() {
            fail!(Structural, "compiled library {} is missing", from.display());
        }
        let to = package_libs.join(&abi).join(&library);
        fs::copy(&from, &to).at(&to)?;
    }
    Ok(warnings)
}

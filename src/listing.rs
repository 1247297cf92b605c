use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use walkdir::WalkDir;

use crate::error::{IoContext, Result};
use crate::types::ObjectIdentifier;

/// The smali roots of a decompiled package: `smali`, `smali_classes2`, `smali_classes3`...
///
/// Large applications are split over several dex files and the decompiler writes one listing
/// root per dex. Roots are kept in dex order.
#[derive(Debug, Clone)]
pub struct ListingTree {
    roots: Vec<PathBuf>,
}

impl ListingTree {
    /// Finds every `smali*` directory directly below `decompiled_dir`.
    pub fn discover(decompiled_dir: &Path) -> Result<ListingTree> {
        let mut roots = vec![];
        for entry in fs::read_dir(decompiled_dir).at(decompiled_dir)? {
            let entry = entry.at(decompiled_dir)?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("smali") && entry.file_type().at(&entry.path())?.is_dir() {
                roots.push(entry.path());
            }
        }
        roots.sort_by_key(|p| root_order(p));
        debug!("listing roots: {:?}", roots);
        Ok(ListingTree { roots })
    }

    pub fn from_roots(roots: Vec<PathBuf>) -> ListingTree {
        ListingTree { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The root new classes are placed under.
    pub fn last_root(&self) -> Option<&Path> {
        self.roots.last().map(PathBuf::as_path)
    }

    /// Every existing listing file for `class`, one per root that declares it.
    pub fn locate(&self, class: &ObjectIdentifier) -> Vec<PathBuf> {
        let relative = class.listing_path();
        self.roots
            .iter()
            .map(|root| root.join(&relative))
            .filter(|p| p.is_file())
            .collect()
    }

    /// All `.smali` files, root by root, in a stable order.
    pub fn listing_files(&self) -> Result<Vec<(usize, PathBuf)>> {
        let mut files = vec![];
        for (idx, root) in self.roots.iter().enumerate() {
            for entry in WalkDir::new(root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    let path = e.path().unwrap_or(root).to_path_buf();
                    crate::error::Error::Io {
                        path,
                        source: e.into(),
                    }
                })?;
                if entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "smali")
                {
                    files.push((idx, entry.into_path()));
                }
            }
        }
        Ok(files)
    }
}

fn root_order(path: &Path) -> (u32, String) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let rank = if name == "smali" {
        1
    } else {
        name.strip_prefix("smali_classes")
            .and_then(|n| n.parse::<u32>().ok())
            .unwrap_or(u32::MAX)
    };
    (rank, name)
}

/// One type's listing as an ordered list of raw lines, line terminators included, so that
/// writing it back without modification reproduces the file byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassListing {
    pub path: PathBuf,
    pub lines: Vec<String>,
}

impl ClassListing {
    pub fn from_text(path: impl Into<PathBuf>, text: &str) -> ClassListing {
        ClassListing {
            path: path.into(),
            lines: text.split_inclusive('\n').map(str::to_string).collect(),
        }
    }

    pub fn read(path: &Path) -> Result<ClassListing> {
        let text = fs::read_to_string(path).at(path)?;
        Ok(ClassListing::from_text(path, &text))
    }

    pub fn to_text(&self) -> String {
        self.lines.concat()
    }

    /// Writes the listing back to the file it was read from.
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.to_text()).at(&self.path)
    }
}

/// The line terminator used by `line`, `"\n"` when it has none.
pub(crate) fn line_ending(line: &str) -> &str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

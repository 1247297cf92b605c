use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

/// Every temporary directory and file of a run lives below one root, removed when the registry
/// is dropped.
pub struct TempRegistry {
    root: TempDir,
    counter: usize,
}

impl TempRegistry {
    pub fn new() -> Result<TempRegistry> {
        let root = tempfile::Builder::new()
            .prefix("dcc-")
            .tempdir()
            .map_err(|source| Error::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        debug!("temporary files under {}", root.path().display());
        Ok(TempRegistry { root, counter: 0 })
    }

    /// A fresh, not yet existing path below the registry root.
    pub fn path(&mut self, name: &str) -> PathBuf {
        self.counter += 1;
        self.root.path().join(format!("{}-{}", self.counter, name))
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }
}

/// The native project a run writes to: a private copy of the template.
///
/// The template itself is never written. Without a requested source directory the copy lives in
/// the temp registry and disappears with it.
pub struct WorkingProject {
    dir: PathBuf,
    persistent: bool,
}

impl WorkingProject {
    pub fn acquire(template: &Path, source_dir: Option<&Path>, temps: &mut TempRegistry) -> Result<WorkingProject> {
        if !template.join("jni").is_dir() {
            fail!(Config, "project template {} has no jni directory", template.display());
        }
        match source_dir {
            Some(dir) => {
                if dir.exists() {
                    info!("using existing project sources in {}", dir.display());
                } else {
                    copy_tree(template, dir)?;
                    info!("copied project template to {}", dir.display());
                }
                Ok(WorkingProject {
                    dir: dir.to_path_buf(),
                    persistent: true,
                })
            }
            None => {
                let dir = temps.path("project");
                copy_tree(template, &dir)?;
                debug!("working project in {}", dir.display());
                Ok(WorkingProject {
                    dir,
                    persistent: false,
                })
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// True when the project outlives the run (`--source-dir`).
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn jni_dir(&self) -> PathBuf {
        self.dir.join("jni")
    }

    pub fn sources_dir(&self) -> PathBuf {
        self.dir.join("jni").join("nc")
    }

    pub fn libs_dir(&self) -> PathBuf {
        self.dir.join("libs")
    }
}

/// Recursively copies `from` into `to`, creating `to`.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| Error::Io {
            path: e.path().unwrap_or(from).to_path_buf(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|_| Error::Input(format!("{} escapes {}", entry.path().display(), from.display())))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).at(&target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(dir: &Path) -> PathBuf {
        let template = dir.join("project");
        fs::create_dir_all(template.join("jni/nc")).unwrap();
        fs::write(template.join("jni/Android.mk"), "LOCAL_MODULE := stub\n").unwrap();
        template
    }

    #[test]
    fn working_copy_is_private_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let template = template(dir.path());
        let root;
        {
            let mut temps = TempRegistry::new().unwrap();
            root = temps.root().to_path_buf();
            let project = WorkingProject::acquire(&template, None, &mut temps).unwrap();
            assert!(!project.is_persistent());
            fs::write(project.sources_dir().join("a.cpp"), "x").unwrap();
            assert!(!template.join("jni/nc/a.cpp").exists());
        }
        assert!(!root.exists());
    }

    #[test]
    fn source_dir_is_copied_once() {
        let dir = tempfile::tempdir().unwrap();
        let template = template(dir.path());
        let sources = dir.path().join("out/src");
        let mut temps = TempRegistry::new().unwrap();

        let project = WorkingProject::acquire(&template, Some(&sources), &mut temps).unwrap();
        assert!(project.is_persistent());
        fs::write(project.jni_dir().join("Android.mk"), "LOCAL_MODULE := edited\n").unwrap();

        WorkingProject::acquire(&template, Some(&sources), &mut temps).unwrap();
        assert_eq!(
            fs::read_to_string(sources.join("jni/Android.mk")).unwrap(),
            "LOCAL_MODULE := edited\n"
        );
    }

    #[test]
    fn template_without_jni_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut temps = TempRegistry::new().unwrap();
        assert!(matches!(
            WorkingProject::acquire(dir.path(), None, &mut temps),
            Err(Error::Config(_))
        ));
    }
}

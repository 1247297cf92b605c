use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{Error, Result};

const DEFAULT_APKTOOL: &str = "tools/apktool.jar";

/// Tool locations and signing settings, read from a JSON file (`dcc.cfg`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub apktool: PathBuf,
    #[serde(alias = "apksigner")]
    pub signer: PathBuf,
    pub manifest_editor: PathBuf,
    /// NDK installation holding `ndk-build`; `ndk-build` is looked up on `PATH` when unset or missing
    pub ndk_dir: Option<PathBuf>,
    pub translator: PathBuf,
    pub java: PathBuf,
    pub project_template: PathBuf,
    pub loader_template: PathBuf,
    pub signature: Option<SignatureConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            apktool: PathBuf::from(DEFAULT_APKTOOL),
            signer: PathBuf::from("tools/apksigner.jar"),
            manifest_editor: PathBuf::from("tools/manifest-editor.jar"),
            ndk_dir: None,
            translator: PathBuf::from("dex2c"),
            java: PathBuf::from("java"),
            project_template: PathBuf::from("project"),
            loader_template: PathBuf::from("loader/DccApplication.smali"),
            signature: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub keystore_path: PathBuf,
    pub alias: String,
    pub keystore_pass: String,
    #[serde(alias = "store_pass")]
    pub key_pass: String,
    pub v1_enabled: bool,
    pub v2_enabled: bool,
    pub v3_enabled: bool,
}

impl SignatureConfig {
    pub fn any_scheme_enabled(&self) -> bool {
        self.v1_enabled || self.v2_enabled || self.v3_enabled
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Config::from_json(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> std::result::Result<Config, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// The apktool jar. A configured jar that does not exist falls back to the bundled one.
    pub fn apktool_jar(&self) -> PathBuf {
        if self.apktool.exists() || self.apktool == Path::new(DEFAULT_APKTOOL) {
            return self.apktool.clone();
        }
        warn!("{} not found, using {}", self.apktool.display(), DEFAULT_APKTOOL);
        PathBuf::from(DEFAULT_APKTOOL)
    }

    /// The `ndk-build` launcher to run.
    pub fn ndk_build_program(&self) -> PathBuf {
        let name = if cfg!(windows) { "ndk-build.cmd" } else { "ndk-build" };
        match &self.ndk_dir {
            Some(dir) if dir.exists() => dir.join(name),
            Some(dir) => {
                warn!("NDK directory {} not found, looking up {} on PATH", dir.display(), name);
                PathBuf::from(name)
            }
            None => PathBuf::from(name),
        }
    }
}

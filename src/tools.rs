//! External collaborators. Each one is a small trait so a run can be driven with fakes; the
//! implementations here shell out to the real tools.

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info, warn};

use crate::config::{Config, SignatureConfig};
use crate::error::{Error, IoContext, Result};
use crate::types::MethodIdentity;

/// Turns one method into native source. Failures are per method and never fatal.
pub trait Translator {
    fn translate(&self, input: &Path, method: &MethodIdentity) -> std::result::Result<String, String>;
}

pub trait PackageDecompiler {
    /// Decompiles `package` into `out_dir`, which must end up holding the listing roots.
    fn decompile(&self, package: &Path, out_dir: &Path) -> Result<()>;
}

pub trait PackageRecompiler {
    fn recompile(&self, decompiled_dir: &Path, package: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed,
    /// The package was copied without a signature; the reason is logged and reported
    CopiedUnsigned(String),
}

pub trait Signer {
    fn sign(&self, unsigned: &Path, signed: &Path) -> Result<SignOutcome>;
}

pub trait ManifestEditor {
    /// Declares `loader` as the application class of the manifest at `manifest`.
    fn set_application(&self, manifest: &Path, loader: &str) -> Result<()>;
}

pub trait NativeBuilder {
    fn build(&self, project_dir: &Path, jobs: usize) -> Result<()>;
}

/// The collaborators one run talks to.
pub struct Toolchain {
    pub translator: Box<dyn Translator>,
    pub decompiler: Box<dyn PackageDecompiler>,
    pub recompiler: Box<dyn PackageRecompiler>,
    pub signer: Box<dyn Signer>,
    pub manifest_editor: Box<dyn ManifestEditor>,
    pub builder: Box<dyn NativeBuilder>,
}

impl Toolchain {
    pub fn from_config(config: &Config) -> Toolchain {
        let apktool = ApkTool {
            java: config.java.clone(),
            jar: config.apktool_jar(),
        };
        Toolchain {
            translator: Box::new(ExternalTranslator {
                program: config.translator.clone(),
            }),
            decompiler: Box::new(apktool.clone()),
            recompiler: Box::new(apktool),
            signer: Box::new(ApkSigner {
                java: config.java.clone(),
                jar: config.signer.clone(),
                signature: config.signature.clone(),
            }),
            manifest_editor: Box::new(ManifestEditorJar {
                java: config.java.clone(),
                jar: config.manifest_editor.clone(),
            }),
            builder: Box::new(NdkBuild {
                program: config.ndk_build_program(),
            }),
        }
    }
}

/// Runs a tool to completion and returns its standard output.
///
/// A tool that cannot be started is a configuration problem; one that exits unsuccessfully is a
/// tool failure carrying its standard error.
pub(crate) fn run_tool<I, S>(tool: &str, program: &Path, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args);
    debug!("executing {:?}", command);
    match command.output() {
        Ok(output) => {
            if output.status.success() {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            } else {
                Err(Error::Tool {
                    tool: tool.to_string(),
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            fail!(Config, "{} not found ({})", tool, program.display())
        }
        Err(e) => fail!(Config, "cannot execute {} ({}): {}", tool, program.display(), e),
    }
}

/// Invokes `<program> <input> <owner> <name> <signature>` and takes standard output as the
/// generated source.
pub struct ExternalTranslator {
    pub program: PathBuf,
}

impl Translator for ExternalTranslator {
    fn translate(&self, input: &Path, method: &MethodIdentity) -> std::result::Result<String, String> {
        let args = [
            input.as_os_str(),
            OsStr::new(&method.owner),
            OsStr::new(&method.name),
            OsStr::new(&method.signature),
        ];
        run_tool("translator", &self.program, args).map_err(|e| match e {
            Error::Tool { stderr, status, .. } if !stderr.is_empty() => format!("{} ({})", stderr, status),
            other => other.to_string(),
        })
    }
}

#[derive(Clone)]
pub struct ApkTool {
    pub java: PathBuf,
    pub jar: PathBuf,
}

impl PackageDecompiler for ApkTool {
    fn decompile(&self, package: &Path, out_dir: &Path) -> Result<()> {
        info!("decompiling {}", package.display());
        run_tool(
            "apktool",
            &self.java,
            [
                OsStr::new("-jar"),
                self.jar.as_os_str(),
                OsStr::new("d"),
                OsStr::new("--advanced"),
                OsStr::new("-r"),
                OsStr::new("-f"),
                OsStr::new("-o"),
                out_dir.as_os_str(),
                package.as_os_str(),
            ],
        )?;
        Ok(())
    }
}

impl PackageRecompiler for ApkTool {
    fn recompile(&self, decompiled_dir: &Path, package: &Path) -> Result<()> {
        info!("building {}", package.display());
        run_tool(
            "apktool",
            &self.java,
            [
                OsStr::new("-jar"),
                self.jar.as_os_str(),
                OsStr::new("b"),
                OsStr::new("--advanced"),
                OsStr::new("-o"),
                package.as_os_str(),
                decompiled_dir.as_os_str(),
            ],
        )?;
        Ok(())
    }
}

pub struct ApkSigner {
    pub java: PathBuf,
    pub jar: PathBuf,
    pub signature: Option<SignatureConfig>,
}

impl ApkSigner {
    fn sign_args(&self, signature: &SignatureConfig, unsigned: &Path, signed: &Path) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-jar".into(),
            self.jar.to_string_lossy().into(),
            "sign".into(),
            "--in".into(),
            unsigned.to_string_lossy().into(),
            "--out".into(),
            signed.to_string_lossy().into(),
            "--ks".into(),
            signature.keystore_path.to_string_lossy().into(),
            "--ks-key-alias".into(),
            signature.alias.clone(),
            "--ks-pass".into(),
            format!("pass:{}", signature.keystore_pass),
            "--key-pass".into(),
            format!("pass:{}", signature.key_pass),
        ];
        if signature.v1_enabled {
            args.extend(["--v1-signer-name", "ANDROID", "--v1-signing-enabled"].map(String::from));
        }
        if signature.v2_enabled {
            args.push("--v2-signing-enabled".into());
        }
        if signature.v3_enabled {
            args.push("--v3-signing-enabled".into());
        }
        args
    }

    fn unsigned_reason(&self) -> Option<String> {
        let Some(signature) = &self.signature else {
            return Some("no signature configured".to_string());
        };
        if !signature.any_scheme_enabled() {
            return Some("at least one signing scheme should be enabled".to_string());
        }
        if !signature.keystore_path.exists() {
            return Some(format!("keystore {} not found", signature.keystore_path.display()));
        }
        if !self.jar.exists() {
            return Some(format!("signer {} not found", self.jar.display()));
        }
        None
    }
}

impl Signer for ApkSigner {
    fn sign(&self, unsigned: &Path, signed: &Path) -> Result<SignOutcome> {
        if let Some(reason) = self.unsigned_reason() {
            warn!("{}, copying the unsigned package to {}", reason, signed.display());
            fs::copy(unsigned, signed).at(signed)?;
            return Ok(SignOutcome::CopiedUnsigned(reason));
        }
        let Some(signature) = &self.signature else {
            fail!(Config, "no signature configured");
        };
        info!("signing {} -> {}", unsigned.display(), signed.display());
        run_tool("apksigner", &self.java, self.sign_args(signature, unsigned, signed))?;
        Ok(SignOutcome::Signed)
    }
}

pub struct ManifestEditorJar {
    pub java: PathBuf,
    pub jar: PathBuf,
}

impl ManifestEditor for ManifestEditorJar {
    fn set_application(&self, manifest: &Path, loader: &str) -> Result<()> {
        run_tool(
            "manifest editor",
            &self.java,
            [
                OsStr::new("-jar"),
                self.jar.as_os_str(),
                manifest.as_os_str(),
                OsStr::new(loader),
            ],
        )?;
        Ok(())
    }
}

pub struct NdkBuild {
    pub program: PathBuf,
}

impl NativeBuilder for NdkBuild {
    fn build(&self, project_dir: &Path, jobs: usize) -> Result<()> {
        info!("building native project {} with {} jobs", project_dir.display(), jobs);
        let jobs = format!("-j{}", jobs);
        run_tool(
            "ndk-build",
            &self.program,
            [OsStr::new(&jobs), OsStr::new("-C"), project_dir.as_os_str()],
        )?;
        Ok(())
    }
}

/// Worker count for the native build: the available parallelism, 2 when unknown.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

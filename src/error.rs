use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::MethodIdentity;

/// Early return with one of the fatal error kinds.
///
/// ```ignore
/// fail!(Structural, "ABI {} is not supported", abi);
/// ```
macro_rules! fail {
    ($kind:ident, $msg:literal) => {
        return Err($crate::error::Error::$kind($msg.to_string()))
    };
    ($kind:ident, $fmtstr:literal, $($args:tt)*) => {
        return Err($crate::error::Error::$kind(format!($fmtstr, $($args)*)))
    };
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fatal errors. Any of these unwinds to the top of a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file, tool path or rule file problem.
    #[error("configuration error: {0}")]
    Config(String),
    /// Bad command line input.
    #[error("invalid input: {0}")]
    Input(String),
    /// The package or project is shaped in a way the rewrite cannot handle safely.
    #[error("structural error: {0}")]
    Structural(String),
    /// An external collaborator ran but reported failure.
    #[error("{tool} failed ({status}): {stderr}")]
    Tool {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("malformed manifest: {0}")]
    Manifest(String),
    /// A fatal error raised after the selection pass, with the per-method failures it collected.
    #[error("{source} ({} methods had failed to compile)", .failures.len())]
    Run {
        #[source]
        source: Box<Error>,
        failures: Vec<CompileFailure>,
    },
}

impl Error {
    /// Carries per-method failures along with a fatal error. Nothing is added when there are none.
    pub fn with_failures(self, failures: &[CompileFailure]) -> Error {
        if failures.is_empty() {
            return self;
        }
        Error::Run {
            source: Box::new(self),
            failures: failures.to_vec(),
        }
    }

    /// Per-method failures collected before the run aborted.
    pub fn failures(&self) -> &[CompileFailure] {
        match self {
            Error::Run { failures, .. } => failures,
            _ => &[],
        }
    }
}

/// Attaches the offending path to an `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A per-method translation failure. These never abort a run; they are collected and
/// reported once the selection pass is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub identity: MethodIdentity,
    pub reason: String,
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identity, self.reason)
    }
}

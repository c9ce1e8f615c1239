use std::{
    io,
    path::{Path, PathBuf},
};

pub type Result<T, E = PmpError> = std::result::Result<T, E>;

/// Various error types
#[derive(Debug, thiserror::Error)]
pub enum PmpError {
    /// An artifact coordinate could not be turned into a local path.
    #[error("failed to resolve artifact \"{coordinate}\": {source}")]
    Resolution {
        coordinate: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A URI could not be fetched.
    #[error("failed to fetch \"{uri}\": {reason}")]
    Fetch { uri: String, reason: String },
    #[error("unsupported URI scheme \"{0}\"")]
    UnsupportedScheme(String),
    /// The file is not an archive that can be opened as a virtual file system.
    #[error("\"{}\" is not a readable archive", .0.display())]
    NotAnArchive(PathBuf),
    #[error("unsupported digest algorithm \"{0}\"")]
    UnsupportedDigestAlgorithm(String),
    #[error("digest mismatch for \"{}\": expected {expected}, but computed {actual}", .path.display())]
    DigestMismatch { path: PathBuf, expected: String, actual: String },
    #[error("malformed digest \"{0}\"")]
    MalformedDigest(String),
    /// One or more parallel tasks failed. The first failure is the primary
    /// cause; the rest are retained as messages.
    #[error("{primary}{}", render_suppressed(.suppressed))]
    Aggregate {
        #[source]
        primary: Box<PmpError>,
        suppressed: Vec<String>,
    },
    #[error("no binary classifier known for {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    /// A blocking operation observed cancellation.
    #[error("interrupted while {0}")]
    Interrupted(String),
    /// Launching the child process failed before an exit code existed.
    #[error("failed to launch \"{}\": {source}", .binary.display())]
    Execution {
        binary: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] PmpIoError),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
}

impl PmpError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        PmpIoError::new(err, path).into()
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        PmpError::Message(msg.to_string())
    }

    /// Folds task failures into a single error, attaching everything after
    /// the first as suppressed causes.
    pub fn aggregate(mut errors: Vec<PmpError>) -> Self {
        debug_assert!(!errors.is_empty());
        let primary = errors.remove(0);
        if errors.is_empty() {
            primary
        } else {
            PmpError::Aggregate {
                primary: Box::new(primary),
                suppressed: errors.iter().map(|e| e.to_string()).collect(),
            }
        }
    }

    /// Whether this error (or its primary cause) is an interruption.
    pub fn is_interrupted(&self) -> bool {
        match self {
            PmpError::Interrupted(_) => true,
            PmpError::Aggregate { primary, .. } => primary.is_interrupted(),
            _ => false,
        }
    }
}

fn render_suppressed(suppressed: &[String]) -> String {
    suppressed.iter().map(|s| format!("\n  suppressed: {s}")).collect()
}

/// A wrapper for IO errors that also carries the path that the operation
/// failed on.
#[derive(Debug, thiserror::Error)]
#[error("\"{}\": {io}", .path.display())]
pub struct PmpIoError {
    io: io::Error,
    path: PathBuf,
}

impl PmpIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which this error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<PmpIoError> for io::Error {
    fn from(err: PmpIoError) -> Self {
        err.io
    }
}

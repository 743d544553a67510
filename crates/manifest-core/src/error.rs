//! Error types for manifest-core

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

/// Result type for manifest-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a recorded problem, as reported to change listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemKind {
    /// Malformed source content
    Syntax,
    /// Transport failure, including "not found"
    Network,
    /// Local resource resolution failure
    FileSystem,
    /// Duplicate import, import cycle, version conflict, unresolved dependency
    Package,
    /// Unexpected internal failure
    Core,
}

impl ProblemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemKind::Syntax => "syntax",
            ProblemKind::Network => "network",
            ProblemKind::FileSystem => "file-system",
            ProblemKind::Package => "package",
            ProblemKind::Core => "core",
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while loading and resolving manifests
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Source content could not be parsed
    #[error("Syntax error in {uri}: {message}")]
    Syntax { uri: String, message: String },

    /// The source reported that the resource does not exist
    #[error("Resource not found: {uri}")]
    NotFound { uri: String },

    /// Transport-level failure
    #[error("Failed to fetch {uri}: {reason}")]
    Network { uri: String, reason: String },

    /// Local resource could not be resolved
    #[error("File system error for {uri}: {reason}")]
    FileSystem { uri: String, reason: String },

    /// Two import slots resolved to the same URI
    #[error("Manifest {uri} is already imported by {first_owner}; duplicate import from {second_owner}")]
    DuplicateImport {
        uri: String,
        first_owner: String,
        second_owner: String,
    },

    /// An import refers back to one of its own ancestors
    #[error("Import cycle detected: {}", chain.join(" -> "))]
    ImportCycle { uri: String, chain: Vec<String> },

    /// A package is declared with a version that clashes with a requirement
    /// or with an earlier declaration of the same package
    #[error("Version conflict for package [{package}] in {uri}: {found} does not satisfy {expected}")]
    VersionConflict {
        package: String,
        uri: String,
        found: String,
        expected: String,
    },

    /// A required package was never declared
    #[error("Unresolved dependency [{package}@{requirement}] required by {uri}")]
    UnresolvedDependency {
        package: String,
        requirement: String,
        uri: String,
    },

    /// A `$package` block carries an unparsable version
    #[error("Invalid version '{version}' for package [{package}] in {uri}: {reason}")]
    InvalidVersion {
        package: String,
        version: String,
        uri: String,
        reason: String,
    },

    /// A dependency range could not be parsed
    #[error("Invalid version requirement '{requirement}' for [{package}] in {uri}: {reason}")]
    InvalidRequirement {
        package: String,
        requirement: String,
        uri: String,
        reason: String,
    },

    /// No root layer produced any content
    #[error("No root manifest could be loaded: {}", uris.join(", "))]
    RootUnavailable { uris: Vec<String> },

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Core { message: String },

    /// Engine configuration could not be read
    #[error("Invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// Standard I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a syntax error for the given resource
    pub fn syntax(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn core(message: impl Into<String>) -> Self {
        Self::Core {
            message: message.into(),
        }
    }

    /// Problem category this error is reported under
    pub fn kind(&self) -> ProblemKind {
        match self {
            Error::Syntax { .. } => ProblemKind::Syntax,
            Error::NotFound { .. } | Error::Network { .. } => ProblemKind::Network,
            Error::FileSystem { .. } | Error::Io(_) => ProblemKind::FileSystem,
            Error::DuplicateImport { .. }
            | Error::ImportCycle { .. }
            | Error::VersionConflict { .. }
            | Error::UnresolvedDependency { .. }
            | Error::InvalidVersion { .. }
            | Error::InvalidRequirement { .. } => ProblemKind::Package,
            Error::RootUnavailable { .. } | Error::Core { .. } | Error::Config { .. } => {
                ProblemKind::Core
            }
        }
    }

    /// URI of the resource the error is attributed to, if any
    pub fn uri(&self) -> Option<&str> {
        match self {
            Error::Syntax { uri, .. }
            | Error::NotFound { uri }
            | Error::Network { uri, .. }
            | Error::FileSystem { uri, .. }
            | Error::DuplicateImport { uri, .. }
            | Error::ImportCycle { uri, .. }
            | Error::VersionConflict { uri, .. }
            | Error::UnresolvedDependency { uri, .. }
            | Error::InvalidVersion { uri, .. }
            | Error::InvalidRequirement { uri, .. } => Some(uri),
            _ => None,
        }
    }
}

/// A problem recorded while building one generation.
///
/// Problems never abort the whole import tree: the failing layer (and its
/// subtree) simply contributes nothing to the merged document.
#[derive(Debug, Clone)]
pub struct Problem {
    pub kind: ProblemKind,
    pub uri: Option<String>,
    pub error: Arc<Error>,
}

impl Problem {
    pub fn new(error: Error) -> Self {
        Self {
            kind: error.kind(),
            uri: error.uri().map(str::to_string),
            error: Arc::new(error),
        }
    }

    /// Attribute the problem to a resource when the error itself carries none
    pub fn at(mut self, uri: impl Into<String>) -> Self {
        if self.uri.is_none() {
            self.uri = Some(uri.into());
        }
        self
    }

    pub fn message(&self) -> String {
        self.error.to_string()
    }
}

impl Serialize for Problem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("Problem", 3)?;
        state.serialize_field("kind", &self.kind)?;
        state.serialize_field("uri", &self.uri)?;
        state.serialize_field("message", &self.message())?;
        state.end()
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.error)
    }
}

//! Error types for the host engine.

use std::path::PathBuf;

use pluginhost_sdk::ExtensionError;

/// How a module load failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFailureClass {
    /// The file is not a loadable module at all. Skipped silently.
    Format,
    /// The module loaded but could not be fully resolved or validated.
    PartialLoad,
    /// Anything else.
    Unexpected,
}

/// Failure to turn one candidate file into extension candidates.
#[derive(Debug, thiserror::Error)]
pub enum ModuleLoadError {
    #[error("{}: not a loadable module: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("{}: unresolved symbols or dependencies: {reason}", path.display())]
    Unresolved { path: PathBuf, reason: String },

    #[error("{}: ABI version mismatch (expected {expected}, found {found})", path.display())]
    AbiMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("{}: invalid extension entry #{index}: {reason}", path.display())]
    InvalidEntry {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("{}: {reason}", path.display())]
    Unexpected { path: PathBuf, reason: String },
}

impl ModuleLoadError {
    pub fn class(&self) -> LoadFailureClass {
        match self {
            ModuleLoadError::Format { .. } => LoadFailureClass::Format,
            ModuleLoadError::Unresolved { .. }
            | ModuleLoadError::AbiMismatch { .. }
            | ModuleLoadError::InvalidEntry { .. } => LoadFailureClass::PartialLoad,
            ModuleLoadError::Unexpected { .. } => LoadFailureClass::Unexpected,
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            ModuleLoadError::Format { path, .. }
            | ModuleLoadError::Unresolved { path, .. }
            | ModuleLoadError::AbiMismatch { path, .. }
            | ModuleLoadError::InvalidEntry { path, .. }
            | ModuleLoadError::Unexpected { path, .. } => path,
        }
    }
}

/// Failure to instantiate a surviving candidate.
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    #[error("failed to instantiate {name} ({identity})")]
    Instantiation {
        identity: String,
        name: String,
        #[source]
        source: ExtensionError,
    },
}

/// Failure to load host configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Operator selection that does not name a listed extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("not a number: {0:?}")]
    NotANumber(String),

    #[error("selection {selected} is outside 1..={count}")]
    OutOfRange { selected: usize, count: usize },
}

/// Umbrella error for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    ModuleLoad(#[from] ModuleLoadError),

    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Extension(#[from] ExtensionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

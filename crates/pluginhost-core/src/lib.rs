//! Discovery, composition and dispatch engine for pluginhost.
//!
//! The pipeline runs once at startup:
//!
//! 1. [`scanner`] lists candidate module files under the search roots.
//! 2. [`loader`] turns files (and statically linked types) into candidates.
//! 3. [`registry`] deduplicates candidates by identity and instantiates them.
//! 4. [`dispatch`] lets an operator pick an extension and run it.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod registry;
pub mod scanner;

pub use config::HostConfig;
pub use discovery::{discover, Discovery};
pub use dispatch::{ConsoleInput, DispatchLoop, InputSource, ScriptedInput};
pub use error::{Error, Result};
pub use loader::{BuiltinLoader, Candidate, CandidateOrigin, NativeLoader};
pub use registry::{dedup_by_identity, CompositionReport, Registry};
pub use scanner::{CandidateScanner, ScanOptions};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, HostConfig};
    pub use crate::discovery::{discover, Discovery};
    pub use crate::dispatch::{ConsoleInput, DispatchLoop, InputSource};
    pub use crate::error::{Error, Result};
    pub use crate::loader::{BuiltinLoader, NativeLoader};
    pub use crate::registry::Registry;
    pub use crate::scanner::{CandidateScanner, ScanOptions};
}

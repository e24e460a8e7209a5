//! Extension loaders.
//!
//! Both loaders produce [`Candidate`]s: a descriptor plus a deferred factory.
//! Nothing is instantiated here; the registry decides which candidates live.

pub mod builtin;
pub mod native;

use std::fmt;
use std::path::PathBuf;

use pluginhost_sdk::{Extension, ExtensionDescriptor, ExtensionResult};

pub use builtin::BuiltinLoader;
pub use native::{LoadReport, NativeExtension, NativeLoader};

/// Deferred constructor for one extension instance.
pub type Factory = Box<dyn FnOnce() -> ExtensionResult<Box<dyn Extension>> + Send>;

/// Where a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOrigin {
    /// Statically linked into the host.
    Builtin,
    /// Exported by a native module at this path.
    Module(PathBuf),
}

impl fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateOrigin::Builtin => write!(f, "builtin"),
            CandidateOrigin::Module(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A discovered extension type that has not been instantiated yet.
pub struct Candidate {
    pub descriptor: ExtensionDescriptor,
    pub origin: CandidateOrigin,
    factory: Factory,
}

impl Candidate {
    pub fn new(descriptor: ExtensionDescriptor, origin: CandidateOrigin, factory: Factory) -> Self {
        Self {
            descriptor,
            origin,
            factory,
        }
    }

    /// Run the factory. Consumes the candidate so it runs at most once.
    pub fn instantiate(self) -> ExtensionResult<Box<dyn Extension>> {
        (self.factory)()
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("descriptor", &self.descriptor)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

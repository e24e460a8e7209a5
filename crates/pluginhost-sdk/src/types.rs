//! The capability contract.
//!
//! Two traits split the contract along the line the host cares about:
//! - [`Extension`] is the object-safe runtime surface the dispatch loop calls.
//! - [`ExtensionType`] carries the static facts (name, version, streaming flag)
//!   the loader needs to describe a type *without* instantiating it.

use crate::error::Result;

/// Version reported by extensions that do not declare one.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Runtime capability contract every extension instance satisfies.
pub trait Extension: Send + Sync {
    /// Display name. Must be non-empty.
    fn name(&self) -> &str;

    /// Free-form version string. Must be non-empty.
    fn version(&self) -> &str {
        DEFAULT_VERSION
    }

    /// Whether `execute` runs its own interactive lifecycle instead of
    /// transforming the input and returning.
    ///
    /// The dispatch loop skips the free-text prompt for streaming
    /// extensions and passes a fixed trigger value instead.
    fn is_streaming(&self) -> bool {
        false
    }

    /// Run the extension on `input`.
    fn execute(&self, input: &str) -> Result<String>;
}

/// Static description of an extension type.
///
/// Implemented alongside [`Extension`] by every concrete extension so that
/// descriptors can be produced at discovery time and instances created only
/// when the registry decides to keep the type.
pub trait ExtensionType: Extension + Sized + 'static {
    /// Display name, identical to what [`Extension::name`] returns.
    const NAME: &'static str;

    /// Version string, identical to what [`Extension::version`] returns.
    const VERSION: &'static str = DEFAULT_VERSION;

    /// Capability flag mirrored by [`Extension::is_streaming`].
    const STREAMING: bool = false;

    /// Construct a fresh instance.
    fn create() -> Self;
}

//! pluginhost Extension SDK
//!
//! This SDK defines the capability contract shared by the host and every
//! extension, plus the C ABI used to ship extensions as native modules.
//!
//! # Quick Start
//!
//! ```rust
//! use pluginhost_sdk::prelude::*;
//!
//! pub struct Shout;
//!
//! impl Extension for Shout {
//!     fn name(&self) -> &str {
//!         Self::NAME
//!     }
//!
//!     fn version(&self) -> &str {
//!         Self::VERSION
//!     }
//!
//!     fn execute(&self, input: &str) -> ExtensionResult<String> {
//!         Ok(format!("{}!", input))
//!     }
//! }
//!
//! impl ExtensionType for Shout {
//!     const NAME: &'static str = "Shout";
//!
//!     fn create() -> Self {
//!         Shout
//!     }
//! }
//!
//! // In a `cdylib` crate, `pluginhost_sdk::export_extensions!(Shout);`
//! // exports the module entry point.
//! ```

pub mod descriptor;
pub mod error;
pub mod ffi;
#[macro_use]
pub mod macros;
pub mod types;

pub use descriptor::{ExtensionDescriptor, StaticExtension};
pub use error::{ExtensionError, Result as ExtensionResult};
pub use ffi::{ABI_VERSION, MODULE_ENTRY_SYMBOL};
pub use types::{DEFAULT_VERSION, Extension, ExtensionType};

/// Prelude module with common imports
pub mod prelude {
    pub use crate::descriptor::{ExtensionDescriptor, StaticExtension};
    pub use crate::error::{ExtensionError, Result as ExtensionResult};
    pub use crate::types::{DEFAULT_VERSION, Extension, ExtensionType};
}

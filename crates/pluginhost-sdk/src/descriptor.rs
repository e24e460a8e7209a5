//! Extension descriptor definition.
//!
//! A descriptor identifies an extension type independently of the module it
//! was loaded from. Two descriptors with the same `identity` describe the same
//! extension, even when discovered in different files.

use std::fmt;

use serde::Serialize;

use crate::error::{ExtensionError, Result};
use crate::types::{Extension, ExtensionType};

/// Static facts about one extension type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    /// Fully-qualified type name, used as the deduplication key.
    pub identity: String,

    /// Display name.
    pub name: String,

    /// Free-form version string.
    pub version: String,

    /// Whether the extension manages its own interactive lifecycle.
    pub streaming: bool,
}

impl ExtensionDescriptor {
    /// Create a new descriptor with required fields
    pub fn new(
        identity: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            version: version.into(),
            streaming: false,
        }
    }

    /// Describe an extension type without instantiating it.
    pub fn of<E: ExtensionType>() -> Self {
        Self::new(std::any::type_name::<E>(), E::NAME, E::VERSION).with_streaming(E::STREAMING)
    }

    /// Set the streaming capability flag
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Check the fields the capability contract requires to be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            return Err(ExtensionError::InvalidDescriptor(
                "identity is empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ExtensionError::InvalidDescriptor(format!(
                "{}: name is empty",
                self.identity
            )));
        }
        if self.version.trim().is_empty() {
            return Err(ExtensionError::InvalidDescriptor(format!(
                "{}: version is empty",
                self.identity
            )));
        }
        Ok(())
    }

    /// Parse the version as semver, if it is one.
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(self.version.trim()).ok()
    }
}

impl fmt::Display for ExtensionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (v{})", self.name, self.version)
    }
}

/// Factory for a statically linked extension.
pub type StaticFactory = fn() -> Box<dyn Extension>;

/// A statically linked extension: descriptor plus constructor.
#[derive(Clone)]
pub struct StaticExtension {
    pub descriptor: ExtensionDescriptor,
    pub factory: StaticFactory,
}

impl StaticExtension {
    /// Register an extension type for static linking.
    pub fn of<E: ExtensionType>() -> Self {
        Self {
            descriptor: ExtensionDescriptor::of::<E>(),
            factory: || -> Box<dyn Extension> { Box::new(E::create()) },
        }
    }
}

impl fmt::Debug for StaticExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticExtension")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = ExtensionDescriptor::new("demo::Echo", "Echo", "2.0.0").with_streaming(true);

        assert_eq!(desc.identity, "demo::Echo");
        assert_eq!(desc.name, "Echo");
        assert_eq!(desc.version, "2.0.0");
        assert!(desc.streaming);
        assert_eq!(desc.to_string(), "Echo (v2.0.0)");
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(ExtensionDescriptor::new("", "Echo", "1.0").validate().is_err());
        assert!(ExtensionDescriptor::new("a::B", " ", "1.0").validate().is_err());
        assert!(ExtensionDescriptor::new("a::B", "B", "").validate().is_err());
        assert!(ExtensionDescriptor::new("a::B", "B", "1.0").validate().is_ok());
    }

    #[test]
    fn test_semver_is_optional() {
        let desc = ExtensionDescriptor::new("a::B", "B", "1.2.3");
        assert_eq!(desc.semver(), Some(semver::Version::new(1, 2, 3)));

        let desc = ExtensionDescriptor::new("a::B", "B", "nightly");
        assert!(desc.semver().is_none());
    }
}

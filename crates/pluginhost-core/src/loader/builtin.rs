//! Loader for statically linked extensions.

use std::panic::{catch_unwind, AssertUnwindSafe};

use pluginhost_sdk::{ExtensionError, ExtensionType, StaticExtension};

use super::{Candidate, CandidateOrigin};

/// Contributes extension types compiled into the host.
#[derive(Debug, Default, Clone)]
pub struct BuiltinLoader {
    extensions: Vec<StaticExtension>,
}

impl BuiltinLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a list of static extensions, e.g. from an extension crate's
    /// `extensions()` function.
    pub fn with_extensions(mut self, extensions: impl IntoIterator<Item = StaticExtension>) -> Self {
        self.extensions.extend(extensions);
        self
    }

    /// Register one extension type.
    pub fn register<E: ExtensionType>(&mut self) -> &mut Self {
        self.extensions.push(StaticExtension::of::<E>());
        self
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Produce candidates for every registered type with a valid descriptor.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(self.extensions.len());

        for ext in &self.extensions {
            if let Err(e) = ext.descriptor.validate() {
                tracing::warn!("Skipping builtin extension: {}", e);
                continue;
            }

            let factory = ext.factory;
            candidates.push(Candidate::new(
                ext.descriptor.clone(),
                CandidateOrigin::Builtin,
                Box::new(move || {
                    catch_unwind(AssertUnwindSafe(factory))
                        .map_err(|payload| ExtensionError::from_panic(payload.as_ref()))
                }),
            ));
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluginhost_sdk::{Extension, ExtensionDescriptor, ExtensionResult};

    struct Hello;

    impl Extension for Hello {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn execute(&self, input: &str) -> ExtensionResult<String> {
            Ok(format!("hello {}", input))
        }
    }

    impl ExtensionType for Hello {
        const NAME: &'static str = "Hello";

        fn create() -> Self {
            Hello
        }
    }

    #[test]
    fn test_builtin_candidates_are_deferred() {
        let mut loader = BuiltinLoader::new();
        loader.register::<Hello>();
        assert_eq!(loader.len(), 1);

        let mut candidates = loader.candidates();
        assert_eq!(candidates.len(), 1);
        let candidate = candidates.remove(0);
        assert_eq!(candidate.origin, CandidateOrigin::Builtin);
        assert_eq!(candidate.descriptor.name, "Hello");

        let instance = candidate.instantiate().unwrap();
        assert_eq!(instance.execute("x").unwrap(), "hello x");
    }

    #[test]
    fn test_invalid_descriptor_skipped() {
        let bad = StaticExtension {
            descriptor: ExtensionDescriptor::new("m::Nameless", "", "1.0.0"),
            factory: || Box::new(Hello),
        };
        let loader = BuiltinLoader::new().with_extensions([bad]);
        assert!(loader.candidates().is_empty());
    }

    #[test]
    fn test_factory_panic_becomes_error() {
        let boom = StaticExtension {
            descriptor: ExtensionDescriptor::new("m::Boom", "Boom", "1.0.0"),
            factory: || panic!("constructor failed"),
        };
        let mut candidates = BuiltinLoader::new().with_extensions([boom]).candidates();
        let err = candidates.remove(0).instantiate().err().unwrap();
        assert!(matches!(err, ExtensionError::Panicked(ref m) if m == "constructor failed"));
    }
}

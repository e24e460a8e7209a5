//! Composition registry.
//!
//! Composition is a two-stage pipeline: [`dedup_by_identity`] reduces the raw
//! candidate list to one candidate per identity, then [`Registry::compose`]
//! runs each surviving factory exactly once.

use std::collections::{HashMap, HashSet};

use pluginhost_sdk::{Extension, ExtensionDescriptor};

use crate::error::CompositionError;
use crate::loader::{Candidate, CandidateOrigin};

/// Keep the first candidate for each identity.
///
/// Returns the survivors in their original order and the number removed.
/// Factories of removed candidates are dropped without running.
pub fn dedup_by_identity(candidates: Vec<Candidate>) -> (Vec<Candidate>, usize) {
    let mut seen = HashSet::new();
    let mut survivors = Vec::with_capacity(candidates.len());
    let mut removed = 0;

    for candidate in candidates {
        if seen.insert(candidate.descriptor.identity.clone()) {
            survivors.push(candidate);
        } else {
            tracing::debug!(
                "Duplicate extension {} from {}, keeping first",
                candidate.descriptor.identity,
                candidate.origin
            );
            removed += 1;
        }
    }

    (survivors, removed)
}

/// Summary of one composition run.
#[derive(Debug, Default)]
pub struct CompositionReport {
    /// Candidates seen before deduplication.
    pub candidates: usize,
    /// Extensions instantiated and registered.
    pub composed: usize,
    pub duplicates_removed: usize,
    pub failed: Vec<CompositionError>,
}

/// One live extension.
pub struct RegisteredExtension {
    pub descriptor: ExtensionDescriptor,
    pub origin: CandidateOrigin,
    pub instance: Box<dyn Extension>,
}

impl std::fmt::Debug for RegisteredExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredExtension")
            .field("descriptor", &self.descriptor)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// Identity-keyed catalog of live extensions, in insertion order.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<RegisteredExtension>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicate and instantiate candidates.
    pub fn compose(candidates: Vec<Candidate>) -> (Self, CompositionReport) {
        let mut report = CompositionReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        let (survivors, removed) = dedup_by_identity(candidates);
        report.duplicates_removed = removed;

        let mut registry = Self::new();
        for candidate in survivors {
            let descriptor = candidate.descriptor.clone();
            let origin = candidate.origin.clone();

            match candidate.instantiate() {
                Ok(instance) => {
                    if instance.name() != descriptor.name {
                        tracing::warn!(
                            "{} reports name {:?} but was described as {:?}",
                            descriptor.identity,
                            instance.name(),
                            descriptor.name
                        );
                    }
                    registry.insert(RegisteredExtension {
                        descriptor,
                        origin,
                        instance,
                    });
                }
                Err(source) => {
                    let err = CompositionError::Instantiation {
                        identity: descriptor.identity,
                        name: descriptor.name,
                        source,
                    };
                    tracing::warn!("{}: {}", err, error_chain(&err));
                    report.failed.push(err);
                }
            }
        }

        report.composed = registry.len();
        tracing::info!(
            "Discovered {} extension(s), removed {} duplicate(s)",
            report.composed,
            report.duplicates_removed
        );
        (registry, report)
    }

    /// Insert an extension. Returns false if its identity is already present.
    pub fn insert(&mut self, entry: RegisteredExtension) -> bool {
        if self.index.contains_key(&entry.descriptor.identity) {
            return false;
        }
        self.index
            .insert(entry.descriptor.identity.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at a zero-based listing position.
    pub fn get(&self, position: usize) -> Option<&RegisteredExtension> {
        self.entries.get(position)
    }

    pub fn get_by_identity(&self, identity: &str) -> Option<&RegisteredExtension> {
        self.index.get(identity).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.index.contains_key(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredExtension> {
        self.entries.iter()
    }

    pub fn descriptors(&self) -> Vec<ExtensionDescriptor> {
        self.entries.iter().map(|e| e.descriptor.clone()).collect()
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut parts = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pluginhost_sdk::{ExtensionError, ExtensionResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Named(&'static str);

    impl Extension for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn execute(&self, input: &str) -> ExtensionResult<String> {
            Ok(input.to_string())
        }
    }

    fn candidate(identity: &str, name: &'static str, calls: &Arc<AtomicUsize>) -> Candidate {
        let calls = Arc::clone(calls);
        Candidate::new(
            ExtensionDescriptor::new(identity, name, "1.0.0"),
            CandidateOrigin::Builtin,
            Box::new(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(Named(name)) as Box<dyn Extension>)
            }),
        )
    }

    #[test]
    fn test_dedup_keeps_first_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (kept, removed) = dedup_by_identity(vec![
            candidate("a::A", "A", &calls),
            candidate("b::B", "B", &calls),
            candidate("a::A", "A2", &calls),
        ]);

        assert_eq!(removed, 1);
        let names: Vec<_> = kept.iter().map(|c| c.descriptor.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_compose_runs_each_survivor_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (registry, report) = Registry::compose(vec![
            candidate("a::A", "A", &calls),
            candidate("a::A", "A", &calls),
            candidate("b::B", "B", &calls),
        ]);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(report.candidates, 3);
        assert_eq!(report.composed, 2);
        assert_eq!(report.duplicates_removed, 1);
        assert!(report.failed.is_empty());
        assert_eq!(registry.get(0).unwrap().descriptor.name, "A");
        assert!(registry.contains("b::B"));
    }

    #[test]
    fn test_factory_failure_leaves_partial_registry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = Candidate::new(
            ExtensionDescriptor::new("x::Broken", "Broken", "1.0.0"),
            CandidateOrigin::Builtin,
            Box::new(|| Err(ExtensionError::InstantiationFailed("missing resource".into()))),
        );

        let (registry, report) =
            Registry::compose(vec![failing, candidate("b::B", "B", &calls)]);

        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("x::Broken"));
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn test_empty_registry_is_valid() {
        let (registry, report) = Registry::compose(Vec::new());
        assert!(registry.is_empty());
        assert_eq!(report.composed, 0);
    }

    #[test]
    fn test_insert_rejects_existing_identity() {
        let mut registry = Registry::new();
        let entry = |name: &'static str| RegisteredExtension {
            descriptor: ExtensionDescriptor::new("same::Id", name, "1"),
            origin: CandidateOrigin::Builtin,
            instance: Box::new(Named(name)),
        };
        assert!(registry.insert(entry("first")));
        assert!(!registry.insert(entry("second")));
        assert_eq!(registry.get_by_identity("same::Id").unwrap().descriptor.name, "first");
    }
}

//! Startup discovery: scan, load, compose.

use crate::loader::{BuiltinLoader, LoadReport, NativeLoader};
use crate::registry::{CompositionReport, Registry};
use crate::scanner::{CandidateScanner, ScanReport};

/// Everything produced by one discovery run.
#[derive(Debug)]
pub struct Discovery {
    pub registry: Registry,
    pub scan: ScanReport,
    pub load: LoadReport,
    pub composition: CompositionReport,
}

/// Run the full pipeline. Builtins are offered before module candidates, so
/// a builtin wins over a module exporting the same identity.
///
/// The native loader keeps every loaded library alive and must outlive the
/// returned registry.
pub fn discover(
    scanner: &CandidateScanner,
    builtins: &BuiltinLoader,
    native: &mut NativeLoader,
) -> Discovery {
    let scan = scanner.scan();

    let mut candidates = builtins.candidates();
    let mut load = native.load_all(&scan.modules);
    candidates.append(&mut load.candidates);

    tracing::debug!(
        "{} candidate module(s), {} loaded, {} skipped, {} failed",
        scan.modules.len(),
        load.modules_loaded,
        load.skipped,
        load.failures.len()
    );

    let (registry, composition) = Registry::compose(candidates);

    Discovery {
        registry,
        scan,
        load,
        composition,
    }
}

//! Native extension loader for .so/.dylib/.dll files.
//!
//! A module exports `pluginhost_module_entry`, which returns a table of
//! extension entries (see `pluginhost_sdk::ffi`). The loader validates the
//! table, copies the descriptors out and hands back one [`Candidate`] per
//! entry. Instances are created only when the registry runs the factory.

use std::ffi::{c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use pluginhost_sdk::ffi::{
    CExtensionEntry, CModuleDescriptor, COutput, CreateFn, DestroyFn, ExecuteFn, FreeOutputFn,
    ModuleEntryFn, STATUS_ERROR, STATUS_OK, STATUS_PANIC,
};
use pluginhost_sdk::{
    Extension, ExtensionDescriptor, ExtensionError, ExtensionResult, ABI_VERSION,
    MODULE_ENTRY_SYMBOL,
};

use super::{Candidate, CandidateOrigin};
use crate::error::{LoadFailureClass, ModuleLoadError};

/// Loader error messages that mean "this file is not a module for this platform".
const FORMAT_MARKERS: &[&str] = &[
    "invalid elf header",
    "file too short",
    "wrong elf class",
    "only et_dyn and et_exec can be loaded",
    "not a valid win32 application",
    "not a mach-o file",
    "mach-o, but wrong architecture",
    "bad magic number",
];

/// Loader error messages that mean the module itself is fine but something it
/// needs is missing.
const UNRESOLVED_MARKERS: &[&str] = &[
    "undefined symbol",
    "cannot open shared object file",
    "symbol not found",
    "library not loaded",
    "the specified module could not be found",
    "the specified procedure could not be found",
];

/// Outcome of loading a batch of modules.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub candidates: Vec<Candidate>,
    /// Modules that loaded and exported the entry symbol.
    pub modules_loaded: usize,
    /// Failures other than format failures.
    pub failures: Vec<ModuleLoadError>,
    /// Files that were not loadable modules.
    pub skipped: usize,
}

/// Loader for native extension modules.
pub struct NativeLoader {
    /// Loaded library handles (kept alive to prevent unloading)
    libraries: Vec<Arc<Library>>,
}

impl NativeLoader {
    pub fn new() -> Self {
        Self {
            libraries: Vec::new(),
        }
    }

    /// Number of libraries currently held.
    pub fn library_count(&self) -> usize {
        self.libraries.len()
    }

    /// Load every path, isolating failures per module.
    pub fn load_all(&mut self, paths: &[PathBuf]) -> LoadReport {
        let mut report = LoadReport::default();

        for path in paths {
            match self.load(path) {
                Ok(Some(mut candidates)) => {
                    tracing::debug!(
                        "Loaded module {} ({} extension(s))",
                        path.display(),
                        candidates.len()
                    );
                    report.modules_loaded += 1;
                    report.candidates.append(&mut candidates);
                }
                Ok(None) => {
                    tracing::debug!("{} exports no entry symbol, skipping", path.display());
                    report.skipped += 1;
                }
                Err(e) => match e.class() {
                    LoadFailureClass::Format => {
                        tracing::debug!("Skipping {}", e);
                        report.skipped += 1;
                    }
                    LoadFailureClass::PartialLoad => {
                        tracing::warn!("Skipping module: {}", e);
                        report.failures.push(e);
                    }
                    LoadFailureClass::Unexpected => {
                        tracing::warn!("Unexpected error loading module: {}", e);
                        report.failures.push(e);
                    }
                },
            }
        }

        report
    }

    /// Load one module.
    ///
    /// Returns `Ok(None)` when the file is a loadable library that does not
    /// export the entry symbol.
    pub fn load(&mut self, path: &Path) -> Result<Option<Vec<Candidate>>, ModuleLoadError> {
        if !path.is_file() {
            return Err(ModuleLoadError::Unexpected {
                path: path.to_path_buf(),
                reason: "not a file".to_string(),
            });
        }

        // SAFETY: loading a library runs its initialisers. Candidate files are
        // trusted by the operator who placed them in the search roots.
        let library = unsafe { Library::new(path) }
            .map_err(|e| classify_open_error(path, &e.to_string()))?;

        let descriptor = {
            // SAFETY: the symbol type matches the signature generated by
            // `export_extensions!`.
            let entry: Symbol<ModuleEntryFn> = match unsafe { library.get(MODULE_ENTRY_SYMBOL) } {
                Ok(entry) => entry,
                Err(_) => return Ok(None),
            };
            // SAFETY: the entry takes no arguments and returns a pointer into
            // the module's static table.
            unsafe { entry() }
        };

        if descriptor.is_null() {
            return Err(ModuleLoadError::Unexpected {
                path: path.to_path_buf(),
                reason: "module entry returned null".to_string(),
            });
        }

        // SAFETY: non-null, points to a table that lives as long as the library
        let descriptor: &CModuleDescriptor = unsafe { &*descriptor };
        let entries = read_entries(path, descriptor)?;

        let library = Arc::new(library);
        self.libraries.push(Arc::clone(&library));

        let candidates = entries
            .into_iter()
            .map(|(descriptor, fns)| {
                let library = Arc::clone(&library);
                let desc = descriptor.clone();
                Candidate::new(
                    descriptor,
                    CandidateOrigin::Module(path.to_path_buf()),
                    Box::new(move || {
                        NativeExtension::create(desc, fns, library)
                            .map(|ext| Box::new(ext) as Box<dyn Extension>)
                    }),
                )
            })
            .collect();

        Ok(Some(candidates))
    }
}

impl Default for NativeLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate a module table and copy its entries out.
fn read_entries(
    path: &Path,
    descriptor: &CModuleDescriptor,
) -> Result<Vec<(ExtensionDescriptor, EntryFns)>, ModuleLoadError> {
    if descriptor.abi_version != ABI_VERSION {
        return Err(ModuleLoadError::AbiMismatch {
            path: path.to_path_buf(),
            expected: ABI_VERSION,
            found: descriptor.abi_version,
        });
    }

    if descriptor.extension_count == 0 {
        return Ok(Vec::new());
    }
    if descriptor.extensions.is_null() {
        return Err(ModuleLoadError::InvalidEntry {
            path: path.to_path_buf(),
            index: 0,
            reason: "entry table is null".to_string(),
        });
    }

    // SAFETY: the module reports `extension_count` entries at `extensions`
    let raw = unsafe { std::slice::from_raw_parts(descriptor.extensions, descriptor.extension_count) };

    raw.iter()
        .enumerate()
        .map(|(index, entry)| {
            read_entry(entry).map_err(|reason| ModuleLoadError::InvalidEntry {
                path: path.to_path_buf(),
                index,
                reason,
            })
        })
        .collect()
}

fn read_entry(entry: &CExtensionEntry) -> Result<(ExtensionDescriptor, EntryFns), String> {
    let identity = read_c_str(entry.identity, "identity")?;
    let name = read_c_str(entry.name, "name")?;
    let version = read_c_str(entry.version, "version")?;

    let descriptor =
        ExtensionDescriptor::new(identity, name, version).with_streaming(entry.streaming);
    descriptor.validate().map_err(|e| e.to_string())?;

    let fns = match (entry.create, entry.destroy, entry.execute, entry.free_output) {
        (Some(create), Some(destroy), Some(execute), Some(free_output)) => EntryFns {
            create,
            destroy,
            execute,
            free_output,
        },
        _ => return Err(format!("{}: incomplete function table", descriptor.identity)),
    };

    Ok((descriptor, fns))
}

fn read_c_str(ptr: *const std::ffi::c_char, field: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{} is null", field));
    }
    // SAFETY: non-null pointer to a NUL-terminated string in the module's table
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(str::to_string)
        .map_err(|e| format!("{} is not UTF-8: {}", field, e))
}

/// Map a dynamic loader error message to a failure class.
pub(crate) fn classify_open_error(path: &Path, message: &str) -> ModuleLoadError {
    let lower = message.to_lowercase();
    let path = path.to_path_buf();
    let reason = message.to_string();

    if FORMAT_MARKERS.iter().any(|m| lower.contains(m)) {
        ModuleLoadError::Format { path, reason }
    } else if UNRESOLVED_MARKERS.iter().any(|m| lower.contains(m)) {
        ModuleLoadError::Unresolved { path, reason }
    } else {
        ModuleLoadError::Unexpected { path, reason }
    }
}

/// Function table of one exported extension.
#[derive(Clone, Copy, Debug)]
struct EntryFns {
    create: CreateFn,
    destroy: DestroyFn,
    execute: ExecuteFn,
    free_output: FreeOutputFn,
}

/// An extension instance living inside a native module.
pub struct NativeExtension {
    instance: *mut c_void,
    fns: EntryFns,
    descriptor: ExtensionDescriptor,
    // Keeps the module mapped while the instance exists.
    _library: Arc<Library>,
}

// SAFETY: extension types are `Send + Sync` on the module side, and the
// instance pointer is only used through the module's own entry points.
unsafe impl Send for NativeExtension {}
unsafe impl Sync for NativeExtension {}

impl NativeExtension {
    fn create(
        descriptor: ExtensionDescriptor,
        fns: EntryFns,
        library: Arc<Library>,
    ) -> ExtensionResult<Self> {
        // SAFETY: create comes from a validated entry of a loaded library
        let instance = unsafe { (fns.create)() };
        if instance.is_null() {
            return Err(ExtensionError::InstantiationFailed(format!(
                "{} create function returned null",
                descriptor.name
            )));
        }

        Ok(Self {
            instance,
            fns,
            descriptor,
            _library: library,
        })
    }

    pub fn descriptor(&self) -> &ExtensionDescriptor {
        &self.descriptor
    }
}

impl Extension for NativeExtension {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn version(&self) -> &str {
        &self.descriptor.version
    }

    fn is_streaming(&self) -> bool {
        self.descriptor.streaming
    }

    fn execute(&self, input: &str) -> ExtensionResult<String> {
        let mut output = COutput::empty();

        // SAFETY: instance came from this entry's create; input is a valid
        // byte slice; output is a local the module writes into.
        let status =
            unsafe { (self.fns.execute)(self.instance, input.as_ptr(), input.len(), &mut output) };
        // SAFETY: output was written by the module (or is still empty)
        let text = unsafe { output.to_string_lossy() };
        // SAFETY: returned to the allocator that produced it
        unsafe { (self.fns.free_output)(&mut output) };

        match status {
            STATUS_OK => Ok(text),
            // The module already formatted the error or panic message.
            STATUS_ERROR | STATUS_PANIC => Err(ExtensionError::Custom(text)),
            other => Err(ExtensionError::ExecutionFailed(format!(
                "module returned status {}",
                other
            ))),
        }
    }
}

impl Drop for NativeExtension {
    fn drop(&mut self) {
        // SAFETY: instance was created by this entry and is destroyed once
        unsafe { (self.fns.destroy)(self.instance) };
    }
}

//! C ABI for native extension modules.
//!
//! A module is a `cdylib` exporting one symbol, [`MODULE_ENTRY_SYMBOL`], that
//! returns a pointer to a [`CModuleDescriptor`]. The descriptor lists one
//! [`CExtensionEntry`] per extension type, each carrying its static facts and
//! a table of `extern "C"` functions. Only `repr(C)` data crosses the
//! boundary; Rust trait objects never do.
//!
//! Modules do not write any of this by hand: [`export_extensions!`] builds
//! the table from [`ExtensionType`] implementations.

use std::ffi::{c_char, c_void, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use crate::error::ExtensionError;
use crate::types::ExtensionType;

/// ABI version. Incremented when breaking changes are made to the layout below.
pub const ABI_VERSION: u32 = 1;

/// Name of the symbol every module exports.
pub const MODULE_ENTRY_SYMBOL: &[u8] = b"pluginhost_module_entry";

/// `execute` succeeded; the output holds the result text.
pub const STATUS_OK: i32 = 0;
/// `execute` returned an error; the output holds the message.
pub const STATUS_ERROR: i32 = 1;
/// `execute` panicked; the output holds the panic message.
pub const STATUS_PANIC: i32 = 2;
/// The host passed a null instance or output pointer.
pub const STATUS_INVALID_ARGUMENT: i32 = 3;

/// Signature of the module entry point.
pub type ModuleEntryFn = unsafe extern "C" fn() -> *const CModuleDescriptor;
pub type CreateFn = unsafe extern "C" fn() -> *mut c_void;
pub type DestroyFn = unsafe extern "C" fn(*mut c_void);
pub type ExecuteFn = unsafe extern "C" fn(*const c_void, *const u8, usize, *mut COutput) -> i32;
pub type FreeOutputFn = unsafe extern "C" fn(*mut COutput);

/// Root of a module's export table.
#[repr(C)]
pub struct CModuleDescriptor {
    pub abi_version: u32,
    pub extension_count: usize,
    pub extensions: *const CExtensionEntry,
}

/// One exported extension type.
#[repr(C)]
pub struct CExtensionEntry {
    /// Fully-qualified type name (null-terminated)
    pub identity: *const c_char,
    /// Display name (null-terminated)
    pub name: *const c_char,
    /// Version string (null-terminated)
    pub version: *const c_char,
    pub streaming: bool,
    pub create: Option<CreateFn>,
    pub destroy: Option<DestroyFn>,
    pub execute: Option<ExecuteFn>,
    pub free_output: Option<FreeOutputFn>,
}

/// Owned UTF-8 buffer handed from module to host.
///
/// The host must return it through the entry's `free_output` so that it is
/// released by the allocator that created it.
#[repr(C)]
pub struct COutput {
    pub ptr: *mut u8,
    pub len: usize,
    pub capacity: usize,
}

impl COutput {
    pub const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
            capacity: 0,
        }
    }

    fn from_string(text: String) -> Self {
        let mut bytes = std::mem::ManuallyDrop::new(text.into_bytes());
        Self {
            ptr: bytes.as_mut_ptr(),
            len: bytes.len(),
            capacity: bytes.capacity(),
        }
    }

    /// Copy the buffer contents out as a `String`.
    ///
    /// # Safety
    /// `ptr`/`len` must describe a live buffer written by a module.
    pub unsafe fn to_string_lossy(&self) -> String {
        if self.ptr.is_null() || self.len == 0 {
            return String::new();
        }
        // SAFETY: caller guarantees the buffer is live for `len` bytes
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Create an instance of `E` on the module's heap.
///
/// # Safety
/// Called by the host through the entry table only.
pub unsafe extern "C" fn create_instance<E: ExtensionType>() -> *mut c_void {
    match catch_unwind(E::create) {
        Ok(instance) => Box::into_raw(Box::new(instance)).cast(),
        Err(_) => ptr::null_mut(),
    }
}

/// Drop an instance created by [`create_instance`].
///
/// # Safety
/// `instance` must come from `create_instance::<E>` and not be used afterwards.
pub unsafe extern "C" fn destroy_instance<E: ExtensionType>(instance: *mut c_void) {
    if instance.is_null() {
        return;
    }
    // SAFETY: instance was created by create_instance::<E>
    let boxed = unsafe { Box::from_raw(instance.cast::<E>()) };
    let _ = catch_unwind(AssertUnwindSafe(move || drop(boxed)));
}

/// Run `execute` on an instance, writing the result text into `output`.
///
/// # Safety
/// `instance` must come from `create_instance::<E>`; `input` must point to
/// `input_len` readable bytes (or be null with length 0); `output` must be
/// writable.
pub unsafe extern "C" fn execute_instance<E: ExtensionType>(
    instance: *const c_void,
    input: *const u8,
    input_len: usize,
    output: *mut COutput,
) -> i32 {
    if instance.is_null() || output.is_null() {
        return STATUS_INVALID_ARGUMENT;
    }

    let input = if input.is_null() || input_len == 0 {
        Ok("")
    } else {
        // SAFETY: caller guarantees input points to input_len bytes
        std::str::from_utf8(unsafe { std::slice::from_raw_parts(input, input_len) })
    };

    // SAFETY: instance was created by create_instance::<E>
    let extension = unsafe { &*instance.cast::<E>() };

    let (status, text) = match input {
        Err(e) => (
            STATUS_ERROR,
            ExtensionError::InvalidInput(e.to_string()).to_string(),
        ),
        Ok(input) => match catch_unwind(AssertUnwindSafe(|| extension.execute(input))) {
            Ok(Ok(text)) => (STATUS_OK, text),
            Ok(Err(e)) => (STATUS_ERROR, e.to_string()),
            Err(payload) => (
                STATUS_PANIC,
                ExtensionError::from_panic(payload.as_ref()).to_string(),
            ),
        },
    };

    // SAFETY: output checked non-null above
    unsafe { output.write(COutput::from_string(text)) };
    status
}

/// Release a buffer written by [`execute_instance`].
///
/// # Safety
/// `output` must hold a buffer produced by this module, or be empty.
pub unsafe extern "C" fn free_output(output: *mut COutput) {
    if output.is_null() {
        return;
    }
    // SAFETY: caller guarantees output is a valid COutput
    let out = unsafe { &mut *output };
    if !out.ptr.is_null() {
        // SAFETY: ptr/len/capacity came from a Vec<u8> leaked in from_string
        drop(unsafe { Vec::from_raw_parts(out.ptr, out.len, out.capacity) });
    }
    *out = COutput::empty();
}

/// An extension type prepared for export.
pub struct ExportedExtension {
    identity: CString,
    name: CString,
    version: CString,
    streaming: bool,
    create: CreateFn,
    destroy: DestroyFn,
    execute: ExecuteFn,
}

impl ExportedExtension {
    pub fn of<E: ExtensionType>() -> Self {
        Self {
            identity: c_string(std::any::type_name::<E>()),
            name: c_string(E::NAME),
            version: c_string(E::VERSION),
            streaming: E::STREAMING,
            create: create_instance::<E>,
            destroy: destroy_instance::<E>,
            execute: execute_instance::<E>,
        }
    }
}

/// Interior NULs cannot be represented; such fields export as empty and fail
/// host-side validation.
fn c_string(value: &str) -> CString {
    CString::new(value).unwrap_or_default()
}

/// The export table of one module, built once and kept for the module's lifetime.
pub struct ModuleTable {
    _exports: Vec<ExportedExtension>,
    _entries: Vec<CExtensionEntry>,
    descriptor: CModuleDescriptor,
}

// SAFETY: the table is immutable after construction and its raw pointers
// refer to heap data owned by the table itself.
unsafe impl Send for ModuleTable {}
unsafe impl Sync for ModuleTable {}

impl ModuleTable {
    pub fn new(exports: Vec<ExportedExtension>) -> Self {
        let entries: Vec<CExtensionEntry> = exports
            .iter()
            .map(|export| CExtensionEntry {
                identity: export.identity.as_ptr(),
                name: export.name.as_ptr(),
                version: export.version.as_ptr(),
                streaming: export.streaming,
                create: Some(export.create),
                destroy: Some(export.destroy),
                execute: Some(export.execute),
                free_output: Some(free_output),
            })
            .collect();

        let descriptor = CModuleDescriptor {
            abi_version: ABI_VERSION,
            extension_count: entries.len(),
            extensions: entries.as_ptr(),
        };

        Self {
            _exports: exports,
            _entries: entries,
            descriptor,
        }
    }

    pub fn descriptor(&self) -> *const CModuleDescriptor {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::types::Extension;
    use std::ffi::CStr;

    struct Upper;

    impl Extension for Upper {
        fn name(&self) -> &str {
            Self::NAME
        }

        fn version(&self) -> &str {
            Self::VERSION
        }

        fn execute(&self, input: &str) -> Result<String> {
            if input == "panic" {
                panic!("asked to panic");
            }
            if input == "fail" {
                return Err(ExtensionError::ExecutionFailed("asked to fail".into()));
            }
            Ok(input.to_uppercase())
        }
    }

    impl ExtensionType for Upper {
        const NAME: &'static str = "Upper";
        const VERSION: &'static str = "0.2.0";

        fn create() -> Self {
            Upper
        }
    }

    fn run(entry: &CExtensionEntry, instance: *mut c_void, input: &str) -> (i32, String) {
        let mut out = COutput::empty();
        unsafe {
            let status = (entry.execute.unwrap())(instance, input.as_ptr(), input.len(), &mut out);
            let text = out.to_string_lossy();
            (entry.free_output.unwrap())(&mut out);
            (status, text)
        }
    }

    #[test]
    fn test_module_table_layout() {
        let table = ModuleTable::new(vec![ExportedExtension::of::<Upper>()]);
        let descriptor = unsafe { &*table.descriptor() };

        assert_eq!(descriptor.abi_version, ABI_VERSION);
        assert_eq!(descriptor.extension_count, 1);

        let entry = unsafe { &*descriptor.extensions };
        let identity = unsafe { CStr::from_ptr(entry.identity) }.to_str().unwrap();
        let name = unsafe { CStr::from_ptr(entry.name) }.to_str().unwrap();
        let version = unsafe { CStr::from_ptr(entry.version) }.to_str().unwrap();
        assert!(identity.ends_with("::Upper"));
        assert_eq!(name, "Upper");
        assert_eq!(version, "0.2.0");
        assert!(!entry.streaming);
    }

    #[test]
    fn test_execute_round_trip_through_abi() {
        let table = ModuleTable::new(vec![ExportedExtension::of::<Upper>()]);
        let entry = unsafe { &*(*table.descriptor()).extensions };

        let instance = unsafe { (entry.create.unwrap())() };
        assert!(!instance.is_null());

        assert_eq!(run(entry, instance, "abc"), (STATUS_OK, "ABC".to_string()));
        assert_eq!(run(entry, instance, ""), (STATUS_OK, String::new()));

        let (status, text) = run(entry, instance, "fail");
        assert_eq!(status, STATUS_ERROR);
        assert_eq!(text, "Execution failed: asked to fail");

        let (status, text) = run(entry, instance, "panic");
        assert_eq!(status, STATUS_PANIC);
        assert!(text.contains("asked to panic"));

        unsafe { (entry.destroy.unwrap())(instance) };
    }

    #[test]
    fn test_null_arguments_rejected() {
        let mut out = COutput::empty();
        let status = unsafe { execute_instance::<Upper>(ptr::null(), ptr::null(), 0, &mut out) };
        assert_eq!(status, STATUS_INVALID_ARGUMENT);
        assert!(out.ptr.is_null());
    }
}

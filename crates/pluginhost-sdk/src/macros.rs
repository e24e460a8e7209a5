//! Export macros for extension modules.

/// Export one or more extension types from a `cdylib`.
///
/// Generates the module entry point named by [`MODULE_ENTRY_SYMBOL`]. Each
/// listed type must implement [`ExtensionType`]. A module may invoke this
/// macro once.
///
/// ```rust,ignore
/// pluginhost_sdk::export_extensions!(UpperCase, Reverser);
/// ```
///
/// [`MODULE_ENTRY_SYMBOL`]: crate::ffi::MODULE_ENTRY_SYMBOL
/// [`ExtensionType`]: crate::types::ExtensionType
#[macro_export]
macro_rules! export_extensions {
    ($($ty:ty),+ $(,)?) => {
        #[no_mangle]
        pub extern "C" fn pluginhost_module_entry() -> *const $crate::ffi::CModuleDescriptor {
            static TABLE: ::std::sync::OnceLock<$crate::ffi::ModuleTable> =
                ::std::sync::OnceLock::new();
            TABLE
                .get_or_init(|| {
                    $crate::ffi::ModuleTable::new(vec![
                        $($crate::ffi::ExportedExtension::of::<$ty>()),+
                    ])
                })
                .descriptor()
        }
    };
}

//! Text transform extensions.
//!
//! Built as a `cdylib`, this crate is a native module exporting all three
//! extensions. Built as an `rlib`, [`extensions`] hands them to a host that
//! links them statically.

mod counter;
mod reverse;
mod upper;

use pluginhost_sdk::StaticExtension;

pub use counter::CharacterCounter;
pub use reverse::StringReverser;
pub use upper::UpperCaseConverter;

pluginhost_sdk::export_extensions!(UpperCaseConverter, StringReverser, CharacterCounter);

/// Static registrations, in listing order.
pub fn extensions() -> Vec<StaticExtension> {
    vec![
        StaticExtension::of::<UpperCaseConverter>(),
        StaticExtension::of::<StringReverser>(),
        StaticExtension::of::<CharacterCounter>(),
    ]
}

use pluginhost_sdk::prelude::*;

/// Reverses the input by Unicode scalar value.
pub struct StringReverser;

impl Extension for StringReverser {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn execute(&self, input: &str) -> ExtensionResult<String> {
        Ok(input.chars().rev().collect())
    }
}

impl ExtensionType for StringReverser {
    const NAME: &'static str = "String Reverser";
    const VERSION: &'static str = "1.1.0";

    fn create() -> Self {
        StringReverser
    }
}

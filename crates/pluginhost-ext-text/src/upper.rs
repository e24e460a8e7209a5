use pluginhost_sdk::prelude::*;

/// Converts the input to upper case.
pub struct UpperCaseConverter;

impl Extension for UpperCaseConverter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn execute(&self, input: &str) -> ExtensionResult<String> {
        Ok(input.to_uppercase())
    }
}

impl ExtensionType for UpperCaseConverter {
    const NAME: &'static str = "Upper Case Converter";

    fn create() -> Self {
        UpperCaseConverter
    }
}

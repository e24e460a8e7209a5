use std::fmt;

use pluginhost_sdk::prelude::*;

/// Reports character class counts for the input.
pub struct CharacterCounter;

/// Per-class counts. Every character lands in exactly one class.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CharacterCounts {
    pub total: usize,
    pub letters: usize,
    pub digits: usize,
    pub spaces: usize,
    pub other: usize,
}

impl CharacterCounts {
    pub fn of(input: &str) -> Self {
        let mut counts = Self::default();
        for c in input.chars() {
            counts.total += 1;
            if c.is_alphabetic() {
                counts.letters += 1;
            } else if c.is_numeric() {
                counts.digits += 1;
            } else if c.is_whitespace() {
                counts.spaces += 1;
            } else {
                counts.other += 1;
            }
        }
        counts
    }
}

impl fmt::Display for CharacterCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Character Analysis:")?;
        writeln!(f, "Total characters: {}", self.total)?;
        writeln!(f, "Letters: {}", self.letters)?;
        writeln!(f, "Digits: {}", self.digits)?;
        writeln!(f, "Spaces: {}", self.spaces)?;
        write!(f, "Other characters: {}", self.other)
    }
}

impl Extension for CharacterCounter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn version(&self) -> &str {
        Self::VERSION
    }

    fn execute(&self, input: &str) -> ExtensionResult<String> {
        if input.is_empty() {
            return Ok("Input is empty".to_string());
        }
        Ok(CharacterCounts::of(input).to_string())
    }
}

impl ExtensionType for CharacterCounter {
    const NAME: &'static str = "Character Counter";
    const VERSION: &'static str = "1.0.2";

    fn create() -> Self {
        CharacterCounter
    }
}

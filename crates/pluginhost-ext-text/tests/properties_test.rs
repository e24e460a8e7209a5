//! Behavioural properties of the text extensions.

use pluginhost_ext_text::{extensions, CharacterCounter, StringReverser, UpperCaseConverter};
use pluginhost_sdk::prelude::*;

const SAMPLES: &[&str] = &[
    "",
    "a",
    "Hello, World!",
    "  leading and trailing  ",
    "mixed 123 numbers 456",
    "naïve café",
    "Ελληνικά κείμενο",
    "tabs\tand\nnewlines",
    "emoji 🚀 rocket",
];

#[test]
fn test_reverse_is_an_involution() {
    let ext = StringReverser;
    for s in SAMPLES {
        let once = ext.execute(s).unwrap();
        assert_eq!(ext.execute(&once).unwrap(), *s);
    }
}

#[test]
fn test_uppercase_is_idempotent() {
    let ext = UpperCaseConverter;
    for s in SAMPLES {
        let once = ext.execute(s).unwrap();
        assert_eq!(ext.execute(&once).unwrap(), once, "{:?}", s);
    }
}

#[test]
fn test_counts_partition_the_input() {
    for s in SAMPLES.iter().filter(|s| !s.is_empty()) {
        let report = CharacterCounter.execute(s).unwrap();
        let values: Vec<usize> = report
            .lines()
            .skip(1)
            .map(|line| line.rsplit(": ").next().unwrap().parse().unwrap())
            .collect();
        let (total, parts) = values.split_first().unwrap();
        assert_eq!(*total, s.chars().count());
        assert_eq!(parts.iter().sum::<usize>(), *total, "{:?}", s);
    }
}

#[test]
fn test_empty_input_behaviour() {
    assert_eq!(CharacterCounter.execute("").unwrap(), "Input is empty");
    assert_eq!(StringReverser.execute("").unwrap(), "");
    assert_eq!(UpperCaseConverter.execute("").unwrap(), "");
}

#[test]
fn test_static_registrations() {
    let exts = extensions();
    let listed: Vec<String> = exts.iter().map(|e| e.descriptor.to_string()).collect();
    assert_eq!(
        listed,
        vec![
            "Upper Case Converter (v1.0.0)",
            "String Reverser (v1.1.0)",
            "Character Counter (v1.0.2)",
        ]
    );

    for ext in &exts {
        let instance = (ext.factory)();
        assert_eq!(instance.name(), ext.descriptor.name);
        assert_eq!(instance.version(), ext.descriptor.version);
        assert!(!instance.is_streaming());
    }
}

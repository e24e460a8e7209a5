//! Candidate scanner.
//!
//! Walks the search roots and lists files that might be extension modules.
//! Whether a file really is one is left to the loader.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::{defaults, HostConfig};

/// File name prefixes of runtime and system libraries that are never extensions.
pub const SYSTEM_PREFIXES: &[&str] = &[
    "libstd-",
    "libc.",
    "libgcc",
    "libm.",
    "libpthread",
    "libdl",
    "libtest-",
    "vcruntime",
    "msvcp",
    "api-ms-win",
    "ucrtbase",
    "libsystem",
];

/// Native library extensions accepted as candidates.
pub const NATIVE_EXTENSIONS: &[&str] = &["so", "dylib", "dll"];

/// Why a file was not listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotNativeLibrary,
    HostBinary,
    ContractLibrary,
    Excluded,
    SystemLibrary,
    NamingConvention,
}

/// Non-fatal problem met while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanWarning {
    /// The legacy artifact exists but could not be removed.
    LegacyCleanup { path: PathBuf, error: String },
    /// An entry under a root could not be read.
    Unreadable { path: PathBuf, error: String },
}

impl std::fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanWarning::LegacyCleanup { path, error } => {
                write!(f, "could not remove legacy artifact {}: {}", path.display(), error)
            }
            ScanWarning::Unreadable { path, error } => {
                write!(f, "could not read {}: {}", path.display(), error)
            }
        }
    }
}

/// Result of one scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Candidate module paths in scan order, without duplicates.
    pub modules: Vec<PathBuf>,
    pub warnings: Vec<ScanWarning>,
}

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub roots: Vec<PathBuf>,
    pub module_prefix: Option<String>,
    pub legacy_artifact: Option<PathBuf>,
    /// Library names (without `lib` prefix or extension) never listed.
    pub excluded_names: Vec<String>,
}

impl ScanOptions {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            module_prefix: None,
            legacy_artifact: None,
            excluded_names: Vec::new(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            roots: config.search_roots(),
            module_prefix: config.discovery.module_prefix.clone(),
            legacy_artifact: Some(config.legacy_artifact()),
            excluded_names: Vec::new(),
        }
    }

    pub fn with_module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = Some(prefix.into());
        self
    }

    pub fn with_legacy_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.legacy_artifact = Some(path.into());
        self
    }

    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.excluded_names.push(name.into());
        self
    }
}

/// Lists plausible extension modules under a set of roots.
pub struct CandidateScanner {
    options: ScanOptions,
}

impl CandidateScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Remove the legacy artifact, then walk every root.
    pub fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();

        if let Some(legacy) = &self.options.legacy_artifact {
            if let Some(warning) = remove_legacy_artifact(legacy) {
                tracing::warn!("{}", warning);
                report.warnings.push(warning);
            }
        }

        let mut seen = HashSet::new();
        for root in &self.options.roots {
            if !root.is_dir() {
                tracing::debug!("Search root {} does not exist, skipping", root.display());
                continue;
            }

            // The root itself plus one level of per-module subdirectories.
            let walker = WalkDir::new(root)
                .min_depth(1)
                .max_depth(2)
                .sort_by_file_name();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e.path().unwrap_or(root).to_path_buf();
                        tracing::debug!("Skipping unreadable entry {}: {}", path.display(), e);
                        report.warnings.push(ScanWarning::Unreadable {
                            path,
                            error: e.to_string(),
                        });
                        continue;
                    }
                };

                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path();
                if let Err(reason) = self.check(path) {
                    tracing::trace!("Not a candidate ({:?}): {}", reason, path.display());
                    continue;
                }

                let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
                let key = path.to_string_lossy().to_lowercase();
                if !seen.insert(key) {
                    tracing::debug!("Duplicate candidate path {}, skipping", path.display());
                    continue;
                }
                report.modules.push(path);
            }
        }

        tracing::debug!("Scan found {} candidate module(s)", report.modules.len());
        report
    }

    /// Apply the name filters to one file.
    pub fn check(&self, path: &Path) -> Result<(), Rejection> {
        if !is_native_library(path) {
            return Err(Rejection::NotNativeLibrary);
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        let stem = library_stem(&file_name);

        if is_same_name(&stem, defaults::HOST_BINARY_NAME) {
            return Err(Rejection::HostBinary);
        }
        if is_same_name(&stem, defaults::CONTRACT_LIBRARY_NAME) {
            return Err(Rejection::ContractLibrary);
        }
        if self
            .options
            .excluded_names
            .iter()
            .any(|name| is_same_name(&stem, name))
        {
            return Err(Rejection::Excluded);
        }
        if SYSTEM_PREFIXES.iter().any(|p| file_name.starts_with(p)) {
            return Err(Rejection::SystemLibrary);
        }
        if let Some(prefix) = &self.options.module_prefix {
            let prefix = prefix.to_lowercase();
            if !stem.starts_with(&prefix) && !file_name.starts_with(&prefix) {
                return Err(Rejection::NamingConvention);
            }
        }
        Ok(())
    }
}

/// Whether the path has a native library extension.
pub fn is_native_library(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| NATIVE_EXTENSIONS.iter().any(|n| ext.eq_ignore_ascii_case(n)))
        .unwrap_or(false)
}

/// `libfoo_bar.so` -> `foo_bar`. Input is expected lowercased.
fn library_stem(file_name: &str) -> String {
    let without_ext = file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name);
    without_ext
        .strip_prefix("lib")
        .unwrap_or(without_ext)
        .to_string()
}

/// Cargo writes `-` in package names as `_` in library names.
fn is_same_name(stem: &str, name: &str) -> bool {
    stem.replace('-', "_") == name.to_lowercase().replace('-', "_")
}

fn remove_legacy_artifact(path: &Path) -> Option<ScanWarning> {
    if !path.exists() {
        return None;
    }
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!("Removed legacy artifact {}", path.display());
            None
        }
        Err(e) => Some(ScanWarning::LegacyCleanup {
            path: path.to_path_buf(),
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> CandidateScanner {
        CandidateScanner::new(ScanOptions::new(Vec::new()))
    }

    #[test]
    fn test_library_stem() {
        assert_eq!(library_stem("libfoo_bar.so"), "foo_bar");
        assert_eq!(library_stem("foo.dll"), "foo");
        assert_eq!(library_stem("liberty.dylib"), "erty");
    }

    #[test]
    fn test_native_extension_filter() {
        assert!(is_native_library(Path::new("a/libx.so")));
        assert!(is_native_library(Path::new("a/X.DLL")));
        assert!(is_native_library(Path::new("a/libx.dylib")));
        assert!(!is_native_library(Path::new("a/libx.rlib")));
        assert!(!is_native_library(Path::new("a/readme")));
    }

    #[test]
    fn test_host_and_contract_excluded() {
        let s = scanner();
        assert_eq!(s.check(Path::new("libpluginhost.so")), Err(Rejection::HostBinary));
        assert_eq!(s.check(Path::new("PluginHost.dll")), Err(Rejection::HostBinary));
        assert_eq!(
            s.check(Path::new("libpluginhost_sdk.so")),
            Err(Rejection::ContractLibrary)
        );
        assert_eq!(
            s.check(Path::new("pluginhost-sdk.dll")),
            Err(Rejection::ContractLibrary)
        );
    }

    #[test]
    fn test_system_prefixes_excluded() {
        let s = scanner();
        assert_eq!(
            s.check(Path::new("libstd-1a2b3c.so")),
            Err(Rejection::SystemLibrary)
        );
        assert_eq!(
            s.check(Path::new("VCRUNTIME140.dll")),
            Err(Rejection::SystemLibrary)
        );
        assert!(s.check(Path::new("libpluginhost_ext_text.so")).is_ok());
    }

    #[test]
    fn test_naming_convention() {
        let s = CandidateScanner::new(ScanOptions::new(Vec::new()).with_module_prefix("ph_"));
        assert!(s.check(Path::new("libph_upper.so")).is_ok());
        assert!(s.check(Path::new("ph_upper.dll")).is_ok());
        assert_eq!(
            s.check(Path::new("libother.so")),
            Err(Rejection::NamingConvention)
        );
    }
}

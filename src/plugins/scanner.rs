//! Finds binaries that may hold plugins and lists their plugin types.

use super::module::{ModuleLoader, PluginModule, PluginType, TypeEnumerationError};
use super::type_filter;
use crate::error::LoadError;
use crate::signature::SignatureValidator;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub app_dir: PathBuf,
    /// Matched case-insensitively, without the leading dot.
    pub extensions: Vec<String>,
    pub embedded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOrigin {
    Embedded(String),
    File(PathBuf),
}

impl CandidateOrigin {
    pub fn is_embedded(&self) -> bool {
        matches!(self, CandidateOrigin::Embedded(_))
    }
}

impl std::fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateOrigin::Embedded(name) => write!(f, "embedded:{}", name),
            CandidateOrigin::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Fields drop in order: `types` holds constructors whose code lives in
/// `module`, so it must go first.
pub struct Candidate {
    pub origin: CandidateOrigin,
    pub types: Vec<PluginType>,
    pub module: Box<dyn PluginModule>,
}

#[derive(Default)]
pub struct ScanReport {
    pub candidates: Vec<Candidate>,
    /// Binaries that were opened and referenced the contract.
    pub assemblies: usize,
    pub errors: Vec<LoadError>,
    pub bad_signature: bool,
}

impl ScanReport {
    pub fn compatible_types(&self) -> usize {
        self.candidates.iter().map(|c| c.types.len()).sum()
    }

    fn record(&mut self, error: LoadError) {
        log::warn!("{}", error);
        self.bad_signature |= error.is_bad_signature();
        self.errors.push(error);
    }
}

pub struct CandidateScanner<'a> {
    loader: &'a dyn ModuleLoader,
    /// `None` disables signature checks.
    validator: Option<&'a SignatureValidator>,
}

impl<'a> CandidateScanner<'a> {
    pub fn new(loader: &'a dyn ModuleLoader, validator: Option<&'a SignatureValidator>) -> Self {
        Self { loader, validator }
    }

    pub fn scan(&self, options: &ScanOptions) -> ScanReport {
        let mut report = ScanReport::default();

        if let Some(name) = &options.embedded {
            match self.loader.load_by_name(name) {
                Ok(module) => self.accept(CandidateOrigin::Embedded(name.clone()), module, &mut report),
                Err(e) => report.record(LoadError::LoadByName {
                    name: name.clone(),
                    reason: format!("{:#}", e),
                }),
            }
        }

        for path in binaries_in(&options.app_dir, &options.extensions) {
            self.scan_file(&path, &mut report);
        }

        log::info!(
            "Scanned {}: {} binaries, {} compatible types, {} errors",
            options.app_dir.display(),
            report.assemblies,
            report.compatible_types(),
            report.errors.len()
        );
        report
    }

    fn scan_file(&self, path: &Path, report: &mut ScanReport) {
        match self.loader.probe(path) {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("Skipping {}: does not reference the plugin contract", path.display());
                return;
            }
            Err(e) => {
                report.record(LoadError::LoadByPath {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
                return;
            }
        }

        if let Some(validator) = self.validator {
            if let Err(source) = validator.validate(path) {
                report.record(LoadError::Signature {
                    path: path.to_path_buf(),
                    source,
                });
                return;
            }
        }

        match self.loader.load_by_path(path) {
            Ok(module) => self.accept(CandidateOrigin::File(path.to_path_buf()), module, report),
            Err(e) => report.record(LoadError::LoadByPath {
                path: path.to_path_buf(),
                reason: format!("{:#}", e),
            }),
        }
    }

    fn accept(&self, origin: CandidateOrigin, module: Box<dyn PluginModule>, report: &mut ScanReport) {
        if !module.references_contract() {
            log::debug!("Skipping {}: contract marker missing or incompatible", origin);
            return;
        }
        report.assemblies += 1;

        let types = match module.types() {
            Ok(types) => types,
            Err(TypeEnumerationError::Partial { loaded, errors }) => {
                for error in &errors {
                    log::warn!("{}: type could not be loaded: {}", origin, error);
                }
                loaded
            }
            Err(TypeEnumerationError::Failed(reason)) => {
                report.record(LoadError::TypeEnumeration {
                    module: origin.to_string(),
                    reason,
                });
                return;
            }
        };

        let types = type_filter::plugin_types(types);
        if types.is_empty() {
            log::debug!("{} declares no plugin types", origin);
            return;
        }
        report.candidates.push(Candidate { origin, module, types });
    }
}

fn binaries_in(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    if !dir.exists() {
        log::warn!("Plugin directory does not exist: {}", dir.display());
        return Vec::new();
    }

    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| has_extension(p, extensions))
        .collect()
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(ext)))
}

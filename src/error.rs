use crate::signature::SignatureError;
use std::path::PathBuf;
use thiserror::Error;

/// Stable codes surfaced when plugin initialisation fails. They double as the
/// host's process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoPluginsFound,
    LoadByPath,
    LoadByName,
    TypeEnumeration,
    Unsigned,
    EndCertificateInvalid,
    ChainInvalid,
    SignatureCheckFailed,
}

impl ErrorCode {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorCode::NoPluginsFound => -1,
            ErrorCode::LoadByPath => -2,
            ErrorCode::LoadByName => -3,
            ErrorCode::TypeEnumeration => -4,
            ErrorCode::Unsigned => -5,
            ErrorCode::EndCertificateInvalid => -6,
            ErrorCode::ChainInvalid => -7,
            ErrorCode::SignatureCheckFailed => -8,
        }
    }

    pub fn is_signature(self) -> bool {
        matches!(
            self,
            ErrorCode::Unsigned
                | ErrorCode::EndCertificateInvalid
                | ErrorCode::ChainInvalid
                | ErrorCode::SignatureCheckFailed
        )
    }
}

/// A candidate binary that could not be used. Never fatal on its own.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load plugin binary {}: {reason}", .path.display())]
    LoadByPath { path: PathBuf, reason: String },
    #[error("failed to resolve embedded module '{name}': {reason}")]
    LoadByName { name: String, reason: String },
    #[error("failed to enumerate types of {module}: {reason}")]
    TypeEnumeration { module: String, reason: String },
    #[error("rejected {}: {source}", .path.display())]
    Signature {
        path: PathBuf,
        #[source]
        source: SignatureError,
    },
}

impl LoadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LoadError::LoadByPath { .. } => ErrorCode::LoadByPath,
            LoadError::LoadByName { .. } => ErrorCode::LoadByName,
            LoadError::TypeEnumeration { .. } => ErrorCode::TypeEnumeration,
            LoadError::Signature { source, .. } => source.code(),
        }
    }

    pub fn is_bad_signature(&self) -> bool {
        matches!(self, LoadError::Signature { .. })
    }
}

/// Initialisation produced no usable plugin.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no plugins loaded ({assemblies} binaries examined, {compatible} compatible types, code {})", .code.exit_code())]
    NothingLoaded {
        code: ErrorCode,
        assemblies: usize,
        compatible: usize,
    },
}

impl InitError {
    pub fn exit_code(&self) -> i32 {
        match self {
            InitError::NothingLoaded { code, .. } => code.exit_code(),
        }
    }
}

use thiserror::Error;

use std::path::PathBuf;

use crate::policy::RestrictionCategory;

#[derive(Debug, Error)]
pub enum NetwardenError {
    #[error("application directory unavailable: {reason}")]
    DirectoryUnavailable { reason: String },

    #[error("privileged execution unavailable: {reason}")]
    PrivilegeUnavailable { reason: String },

    #[error("privileged shell exited before completing `{command}` (status {status:?})")]
    CommandFailed {
        command: String,
        status: Option<i32>,
    },

    #[error("{tool} was not found on the device")]
    ToolMissing { tool: String },

    #[error("failed to probe {category} rule for {package}: {source}")]
    ProbeFailed {
        package: String,
        category: RestrictionCategory,
        #[source]
        source: Box<NetwardenError>,
    },

    #[error("failed to apply {category} rule for {package}: {source}")]
    MutationFailed {
        package: String,
        category: RestrictionCategory,
        #[source]
        source: Box<NetwardenError>,
    },

    #[error("partially applied rules for {package}: failed {failed:?}, applied {succeeded:?}")]
    PartialMutation {
        package: String,
        succeeded: Vec<RestrictionCategory>,
        failed: Vec<RestrictionCategory>,
    },

    #[error("unknown application {package}")]
    UnknownApplication { package: String },

    #[error("unknown restriction category '{name}'")]
    UnknownCategory { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl NetwardenError {
    /// True when the failure comes from missing root rather than a single command
    pub fn is_privilege_unavailable(&self) -> bool {
        match self {
            NetwardenError::PrivilegeUnavailable { .. } => true,
            NetwardenError::ProbeFailed { source, .. }
            | NetwardenError::MutationFailed { source, .. } => source.is_privilege_unavailable(),
            _ => false,
        }
    }
}

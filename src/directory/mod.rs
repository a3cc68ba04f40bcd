mod parser;
mod pm;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::{error::NetwardenError, policy::ApplicationIdentity};

pub use parser::{PackageRow, parse_package_list};
pub use pm::PackageManagerDirectory;

/// Source of installed applications
///
/// Enumeration may report the same package more than once; callers dedupe.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppDirectory: Send + Sync + 'static {
    async fn enumerate(&self) -> Result<Vec<ApplicationIdentity>, NetwardenError>;
}

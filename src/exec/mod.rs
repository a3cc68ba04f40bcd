mod capability;
#[cfg(test)]
pub(crate) mod fake;
mod su;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::NetwardenError;

pub use capability::Capabilities;
pub use su::SuExecutor;

/// Runs shell commands with root privilege
///
/// `Err(PrivilegeUnavailable)` means nothing was dispatched. `Ok` with an empty
/// vector means the commands ran and printed nothing. Exit status of individual
/// commands inside a batch is not observable.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PrivilegedExecutor: Send + Sync + 'static {
    async fn run(&self, command: &str) -> Result<Vec<String>, NetwardenError>;

    async fn run_batch(&self, commands: &[String]) -> Result<Vec<String>, NetwardenError>;
}

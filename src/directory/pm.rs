use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::NetwardenError,
    exec::PrivilegedExecutor,
    policy::ApplicationIdentity,
};

use super::{
    AppDirectory,
    parser::{parse_package_list, parse_package_names},
};

const LIST_ALL: &str = "pm list packages -f -U";
const LIST_SYSTEM: &str = "pm list packages -s";

/// Enumerates applications through the `pm` shell tool
pub struct PackageManagerDirectory<E: PrivilegedExecutor> {
    executor: Arc<E>,
}

impl<E: PrivilegedExecutor> PackageManagerDirectory<E> {
    pub fn new(executor: Arc<E>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl<E: PrivilegedExecutor> AppDirectory for PackageManagerDirectory<E> {
    async fn enumerate(&self) -> Result<Vec<ApplicationIdentity>, NetwardenError> {
        let all = self.executor.run(LIST_ALL).await.map_err(|err| {
            NetwardenError::DirectoryUnavailable {
                reason: err.to_string(),
            }
        })?;
        let system = self.executor.run(LIST_SYSTEM).await.map_err(|err| {
            NetwardenError::DirectoryUnavailable {
                reason: err.to_string(),
            }
        })?;

        let system = parse_package_names(&system);
        let rows = parse_package_list(&all);
        log::debug!(
            "pm reported {} packages ({} system)",
            rows.len(),
            system.len()
        );

        Ok(rows
            .into_iter()
            .map(|row| ApplicationIdentity {
                display_name: row.package.clone(),
                system: system.contains(&row.package),
                icon: row.apk,
                package: row.package,
                uid: row.uid,
            })
            .collect())
    }
}

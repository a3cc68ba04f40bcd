use std::sync::Arc;

use crate::{
    error::NetwardenError,
    exec::PrivilegedExecutor,
    policy::{ApplicationIdentity, CommandTable, RestrictionCategory},
};

/// Installs or removes the block rules of one category
pub struct RuleMutator<E: PrivilegedExecutor> {
    executor: Arc<E>,
    table: CommandTable,
}

impl<E: PrivilegedExecutor> RuleMutator<E> {
    pub fn new(executor: Arc<E>, table: CommandTable) -> Self {
        Self { executor, table }
    }

    /// Submit the category's block (or unblock) commands as one ordered batch
    ///
    /// Individual command failures inside a dispatched batch are not visible here;
    /// they surface on the next probe. Only a batch that could not be dispatched is
    /// reported as `MutationFailed`.
    pub async fn apply(
        &self,
        app: &ApplicationIdentity,
        category: RestrictionCategory,
        block: bool,
    ) -> Result<(), NetwardenError> {
        let commands = if block {
            self.table.block(app, category)
        } else {
            self.table.unblock(app, category)
        };

        self.executor
            .run_batch(&commands)
            .await
            .map_err(|source| NetwardenError::MutationFailed {
                package: app.package.clone(),
                category,
                source: Box::new(source),
            })?;

        log::info!(
            "{} {category} for {} (uid {})",
            if block { "Blocked" } else { "Allowed" },
            app.package,
            app.uid
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockPrivilegedExecutor;

    fn foo() -> ApplicationIdentity {
        ApplicationIdentity::new("com.example.foo", 10050)
    }

    #[tokio::test]
    async fn submits_block_commands_in_order() {
        let mut executor = MockPrivilegedExecutor::new();
        executor
            .expect_run_batch()
            .withf(|commands| {
                commands.len() == 2
                    && commands[0].contains("-I OUTPUT")
                    && commands[1].contains("-I INPUT")
            })
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let mutator = RuleMutator::new(Arc::new(executor), CommandTable::default());
        mutator
            .apply(&foo(), RestrictionCategory::Wifi, true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn submits_exact_inverse_on_unblock() {
        let mut executor = MockPrivilegedExecutor::new();
        executor
            .expect_run_batch()
            .withf(|commands| {
                commands.len() == 1
                    && commands[0] == "ip rule del uidrange 10050-10050 lookup main"
            })
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let mutator = RuleMutator::new(Arc::new(executor), CommandTable::default());
        mutator
            .apply(&foo(), RestrictionCategory::Vpn, false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn undispatched_batch_is_mutation_failure() {
        let mut executor = MockPrivilegedExecutor::new();
        executor.expect_run_batch().returning(|_| {
            Err(NetwardenError::PrivilegeUnavailable {
                reason: "su denied".to_string(),
            })
        });

        let mutator = RuleMutator::new(Arc::new(executor), CommandTable::default());
        let err = mutator
            .apply(&foo(), RestrictionCategory::Background, true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetwardenError::MutationFailed {
                category: RestrictionCategory::Background,
                ..
            }
        ));
        assert!(err.is_privilege_unavailable());
    }
}

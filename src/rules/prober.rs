use std::sync::Arc;

use crate::{
    error::NetwardenError,
    exec::PrivilegedExecutor,
    policy::{ApplicationIdentity, CommandTable, RestrictionCategory},
};

/// Read-only check for an installed block rule
pub struct RuleProber<E: PrivilegedExecutor> {
    executor: Arc<E>,
    table: CommandTable,
    missing_tools: Vec<String>,
}

impl<E: PrivilegedExecutor> RuleProber<E> {
    pub fn new(executor: Arc<E>, table: CommandTable) -> Self {
        Self {
            executor,
            table,
            missing_tools: Vec::new(),
        }
    }

    /// Tools detected as absent; their categories fail without dispatching
    pub fn with_missing_tools(mut self, missing_tools: Vec<String>) -> Self {
        self.missing_tools = missing_tools;
        self
    }

    /// Returns whether the block rule for `category` currently exists
    ///
    /// Issues exactly one listing command. Empty filtered output means the rule is
    /// absent. A missing privileged shell is returned as `PrivilegeUnavailable`;
    /// a missing tool, a nonzero exit or any other execution failure becomes
    /// `ProbeFailed`. None of them is ever reported as "absent".
    pub async fn probe(
        &self,
        app: &ApplicationIdentity,
        category: RestrictionCategory,
    ) -> Result<bool, NetwardenError> {
        let tool = self.table.tool(category);
        if self.missing_tools.iter().any(|missing| missing == tool) {
            return Err(NetwardenError::ProbeFailed {
                package: app.package.clone(),
                category,
                source: Box::new(NetwardenError::ToolMissing {
                    tool: tool.to_string(),
                }),
            });
        }

        let template = self.table.probe(app, category);
        let output = match self.executor.run(&template.command).await {
            Ok(output) => output,
            Err(err) if err.is_privilege_unavailable() => return Err(err),
            Err(err) => {
                return Err(NetwardenError::ProbeFailed {
                    package: app.package.clone(),
                    category,
                    source: Box::new(err),
                });
            }
        };

        let present = template.filter(&output).next().is_some();
        log::debug!(
            "Probed {category} for {} (uid {}): {}",
            app.package,
            app.uid,
            if present { "present" } else { "absent" }
        );
        Ok(present)
    }
}

use crate::policy::ToolPaths;

use super::PrivilegedExecutor;

const TOOL_PREFIX: &str = "tool:";

/// What the device lets us do, detected once at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The privileged shell runs as uid 0
    pub root: bool,
    /// Tools from [`ToolPaths`] that could not be found on the device
    pub missing_tools: Vec<String>,
}

impl Capabilities {
    /// Capabilities of a session where nothing could be dispatched
    pub fn unprivileged() -> Self {
        Self::default()
    }

    /// Probe the device through the executor with a single batch
    pub async fn detect<E: PrivilegedExecutor + ?Sized>(executor: &E, tools: &ToolPaths) -> Self {
        let wanted = [&tools.iptables, &tools.ip6tables, &tools.ip, &tools.cmd];

        let mut batch = vec!["id -u".to_string()];
        batch.extend(wanted.iter().map(|tool| {
            format!("command -v {tool} >/dev/null 2>&1 && echo {TOOL_PREFIX}{tool}")
        }));

        let output = match executor.run_batch(&batch).await {
            Ok(output) => output,
            Err(err) => {
                log::warn!("Privilege detection failed: {err}");
                return Self::unprivileged();
            }
        };

        let root = output.first().is_some_and(|line| line.trim() == "0");
        let found: Vec<&str> = output
            .iter()
            .filter_map(|line| line.trim().strip_prefix(TOOL_PREFIX))
            .collect();
        let missing_tools = wanted
            .iter()
            .filter(|tool| !found.contains(&tool.as_str()))
            .map(|tool| tool.to_string())
            .collect::<Vec<_>>();

        for tool in &missing_tools {
            log::warn!("{tool} not found on device, rules using it will not apply");
        }

        Self {
            root,
            missing_tools,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::NetwardenError, exec::MockPrivilegedExecutor};

    #[tokio::test]
    async fn detects_root_and_tools() {
        let mut executor = MockPrivilegedExecutor::new();
        executor.expect_run_batch().times(1).returning(|_| {
            Ok(vec![
                "0".to_string(),
                "tool:iptables".to_string(),
                "tool:ip6tables".to_string(),
                "tool:ip".to_string(),
            ])
        });

        let caps = Capabilities::detect(&executor, &ToolPaths::default()).await;
        assert!(caps.root);
        assert_eq!(caps.missing_tools, vec!["cmd"]);
    }

    #[tokio::test]
    async fn non_zero_uid_is_not_root() {
        let mut executor = MockPrivilegedExecutor::new();
        executor
            .expect_run_batch()
            .returning(|_| Ok(vec!["2000".to_string()]));

        let caps = Capabilities::detect(&executor, &ToolPaths::default()).await;
        assert!(!caps.root);
    }

    #[tokio::test]
    async fn executor_failure_means_unprivileged() {
        let mut executor = MockPrivilegedExecutor::new();
        executor.expect_run_batch().returning(|_| {
            Err(NetwardenError::PrivilegeUnavailable {
                reason: "su denied".to_string(),
            })
        });

        let caps = Capabilities::detect(&executor, &ToolPaths::default()).await;
        assert_eq!(caps, Capabilities::unprivileged());
    }
}

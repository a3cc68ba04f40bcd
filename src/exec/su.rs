use std::process::Stdio;

use async_trait::async_trait;
use nix::unistd::Uid;
use tokio::{io::AsyncWriteExt, process::Command};

use crate::error::NetwardenError;

use super::PrivilegedExecutor;

/// Printed after the last command so a complete batch can be told apart from a
/// shell that died or was never granted root
const END_MARKER: &str = "__NETWARDEN_END__";
/// Prefixes the exit status of a single command run through `run`
const STATUS_PREFIX: &str = "__NETWARDEN_RC__:";

/// Executor that pipes commands into a root shell
pub struct SuExecutor {
    shell: String,
}

impl SuExecutor {
    /// Use `su` to obtain root, or plain `sh` when the process already runs as root
    pub fn new(su: impl Into<String>) -> Self {
        let shell = if Uid::effective().is_root() {
            log::debug!("Running as root, using sh instead of su");
            "sh".to_string()
        } else {
            su.into()
        };
        Self { shell }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    fn script(commands: &[String], report_status: bool) -> String {
        let mut script = String::new();
        for command in commands {
            script.push_str(command);
            script.push('\n');
        }
        if report_status {
            script.push_str("echo ");
            script.push_str(STATUS_PREFIX);
            script.push_str("$?\n");
        }
        script.push_str("echo ");
        script.push_str(END_MARKER);
        script.push_str("\nexit\n");
        script
    }

    async fn execute(
        &self,
        commands: &[String],
        report_status: bool,
    ) -> Result<Vec<String>, NetwardenError> {
        let mut child = Command::new(&self.shell)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| NetwardenError::PrivilegeUnavailable {
                reason: format!("failed to start {}: {err}", self.shell),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| NetwardenError::PrivilegeUnavailable {
                reason: format!("{} has no stdin", self.shell),
            })?;

        // A denied su closes its stdin straight away
        let script = Self::script(commands, report_status);
        if let Err(err) = stdin.write_all(script.as_bytes()).await {
            log::debug!("Writing to {} failed: {err}", self.shell);
        }
        drop(stdin);

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let mut lines = Vec::new();
        let mut completed = false;
        for line in stdout.lines() {
            if line.trim() == END_MARKER {
                completed = true;
                break;
            }
            lines.push(line.to_string());
        }

        if !completed {
            if lines.is_empty() && !output.status.success() {
                return Err(NetwardenError::PrivilegeUnavailable {
                    reason: format!("{} exited with {}", self.shell, output.status),
                });
            }
            return Err(NetwardenError::CommandFailed {
                command: commands.join("; "),
                status: output.status.code(),
            });
        }

        if report_status {
            match take_status(&mut lines) {
                Some(0) => {}
                status => {
                    return Err(NetwardenError::CommandFailed {
                        command: commands.join("; "),
                        status,
                    });
                }
            }
        }
        Ok(lines)
    }
}

/// Remove the status line from the end of `lines` and parse it
///
/// Output without a trailing newline shares its last line with the status echo.
fn take_status(lines: &mut Vec<String>) -> Option<i32> {
    let last = lines.pop()?;
    let at = last.rfind(STATUS_PREFIX)?;
    let status = last[at + STATUS_PREFIX.len()..].trim().parse().ok();
    if at > 0 {
        lines.push(last[..at].to_string());
    }
    status
}

#[async_trait]
impl PrivilegedExecutor for SuExecutor {
    async fn run(&self, command: &str) -> Result<Vec<String>, NetwardenError> {
        self.execute(&[command.to_string()], true).await
    }

    async fn run_batch(&self, commands: &[String]) -> Result<Vec<String>, NetwardenError> {
        self.execute(commands, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sh() -> SuExecutor {
        SuExecutor {
            shell: "sh".to_string(),
        }
    }

    #[test]
    fn script_ends_with_marker() {
        let script = SuExecutor::script(&["id -u".to_string()], false);
        assert_eq!(script, format!("id -u\necho {END_MARKER}\nexit\n"));
    }

    #[test]
    fn single_command_script_reports_status() {
        let script = SuExecutor::script(&["ip rule show".to_string()], true);
        assert_eq!(
            script,
            format!("ip rule show\necho {STATUS_PREFIX}$?\necho {END_MARKER}\nexit\n")
        );
    }

    #[tokio::test]
    async fn collects_output_of_every_command() {
        let output = sh()
            .run_batch(&["echo one".to_string(), "echo two".to_string()])
            .await
            .unwrap();
        assert_eq!(output, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn empty_output_is_not_an_error() {
        let output = sh().run("true").await.unwrap();
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn failing_command_inside_batch_is_ignored() {
        let output = sh()
            .run_batch(&["false".to_string(), "echo after".to_string()])
            .await
            .unwrap();
        assert_eq!(output, vec!["after"]);
    }

    #[tokio::test]
    async fn missing_shell_is_privilege_unavailable() {
        let executor = SuExecutor {
            shell: "/nonexistent/su".to_string(),
        };
        let err = executor.run("id -u").await.unwrap_err();
        assert!(err.is_privilege_unavailable());
    }

    #[tokio::test]
    async fn shell_exiting_early_is_command_failure() {
        let err = sh()
            .run_batch(&["echo partial".to_string(), "exit 3".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetwardenError::CommandFailed {
                status: Some(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn failing_single_command_is_command_failure() {
        let err = sh().run("false").await.unwrap_err();
        assert!(matches!(
            err,
            NetwardenError::CommandFailed {
                status: Some(1),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_tool_is_not_empty_output() {
        let err = sh().run("/nonexistent/iptables -w -S").await.unwrap_err();
        assert!(matches!(
            err,
            NetwardenError::CommandFailed {
                status: Some(127),
                ..
            }
        ));
        assert!(!err.is_privilege_unavailable());
    }

    #[tokio::test]
    async fn output_without_trailing_newline_is_kept() {
        let output = sh().run("printf partial").await.unwrap();
        assert_eq!(output, vec!["partial"]);
    }

    #[rstest]
    #[case(&["__NETWARDEN_RC__:0"], Some(0), &[])]
    #[case(&["line", "__NETWARDEN_RC__:2"], Some(2), &["line"])]
    #[case(&["tail__NETWARDEN_RC__:0"], Some(0), &["tail"])]
    #[case(&["no status"], None, &[])]
    fn status_line_is_split_off(
        #[case] raw: &[&str],
        #[case] expected: Option<i32>,
        #[case] rest: &[&str],
    ) {
        let mut lines: Vec<String> = raw.iter().map(|line| line.to_string()).collect();
        assert_eq!(take_status(&mut lines), expected);
        assert_eq!(lines, rest);
    }
}

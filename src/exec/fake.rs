// In-memory device that understands the default command table
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::NetwardenError;

use super::PrivilegedExecutor;

#[derive(Default)]
struct Tables {
    ipv4: Vec<String>,
    ipv6: Vec<String>,
    ip_rules: Vec<String>,
    appops: HashMap<(String, String), String>,
}

/// Pauses commands matching `pattern` after their output has been computed
struct Hold {
    pattern: String,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

#[derive(Default)]
pub(crate) struct FakeDevice {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
    failing: Mutex<Vec<String>>,
    exiting: Mutex<Vec<String>>,
    hold: Mutex<Option<Hold>>,
    pub(crate) dispatched: AtomicUsize,
    in_flight: AtomicUsize,
    pub(crate) max_in_flight: AtomicUsize,
}

impl FakeDevice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call fails as if su were denied
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Batches containing `pattern` fail to dispatch
    pub(crate) fn fail_batches_containing(&self, pattern: &str) {
        self.failing.lock().unwrap().push(pattern.to_string());
    }

    /// Single commands containing `pattern` run but exit nonzero
    pub(crate) fn exit_nonzero_containing(&self, pattern: &str) {
        self.exiting.lock().unwrap().push(pattern.to_string());
    }

    /// Returns (reached, release): `reached` fires once a matching command has read
    /// the tables, and the command returns only after `release` is notified
    pub(crate) fn hold(&self, pattern: &str) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(Hold {
            pattern: pattern.to_string(),
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (reached, release)
    }

    /// Install a rule line directly, as if another tool had added it
    pub(crate) fn seed_ipv4(&self, rule: &str) {
        self.tables.lock().unwrap().ipv4.push(rule.to_string());
    }

    pub(crate) fn ipv4_rules(&self) -> Vec<String> {
        self.tables.lock().unwrap().ipv4.clone()
    }

    pub(crate) fn ip_rules(&self) -> Vec<String> {
        self.tables.lock().unwrap().ip_rules.clone()
    }

    fn execute(&self, command: &str) -> Vec<String> {
        let mut tables = self.tables.lock().unwrap();
        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.as_slice() {
            ["id", "-u"] => vec!["0".to_string()],
            [binary, "-w", "-S"] => filter_table(&tables, binary).clone(),
            [binary, "-w", action, chain, rest @ ..] => {
                let rule = format!("-A {chain} {}", rest.join(" "));
                let table = filter_table_mut(&mut tables, binary);
                match *action {
                    "-I" => table.insert(0, rule),
                    "-D" => {
                        if let Some(pos) = table.iter().position(|r| *r == rule) {
                            table.remove(pos);
                        }
                    }
                    _ => {}
                }
                Vec::new()
            }
            ["ip", "rule", "show"] => tables
                .ip_rules
                .iter()
                .map(|rule| format!("12000:\tfrom all {rule}"))
                .collect(),
            ["ip", "rule", verb, rest @ ..] => {
                let rule = rest.join(" ");
                match *verb {
                    "add" => tables.ip_rules.push(rule),
                    "del" => {
                        if let Some(pos) = tables.ip_rules.iter().position(|r| *r == rule) {
                            tables.ip_rules.remove(pos);
                        }
                    }
                    _ => {}
                }
                Vec::new()
            }
            ["cmd", "appops", "get", pkg, op] => {
                match tables.appops.get(&(pkg.to_string(), op.to_string())) {
                    Some(mode) => vec![format!("{op}: {mode}; time=+1m ago")],
                    None => vec!["No operations.".to_string()],
                }
            }
            ["cmd", "appops", "set", pkg, op, mode] => {
                tables
                    .appops
                    .insert((pkg.to_string(), op.to_string()), mode.to_string());
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

fn filter_table<'a>(tables: &'a Tables, binary: &str) -> &'a Vec<String> {
    if binary.ends_with("ip6tables") {
        &tables.ipv6
    } else {
        &tables.ipv4
    }
}

fn filter_table_mut<'a>(tables: &'a mut Tables, binary: &str) -> &'a mut Vec<String> {
    if binary.ends_with("ip6tables") {
        &mut tables.ipv6
    } else {
        &mut tables.ipv4
    }
}

#[async_trait]
impl PrivilegedExecutor for FakeDevice {
    async fn run(&self, command: &str) -> Result<Vec<String>, NetwardenError> {
        let exits = self
            .exiting
            .lock()
            .unwrap()
            .iter()
            .any(|pattern| command.contains(pattern));
        if exits && !self.unavailable.load(Ordering::SeqCst) {
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            return Err(NetwardenError::CommandFailed {
                command: command.to_string(),
                status: Some(1),
            });
        }
        self.run_batch(&[command.to_string()]).await
    }

    async fn run_batch(&self, commands: &[String]) -> Result<Vec<String>, NetwardenError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NetwardenError::PrivilegeUnavailable {
                reason: "su denied".to_string(),
            });
        }
        {
            let failing = self.failing.lock().unwrap();
            if commands
                .iter()
                .any(|command| failing.iter().any(|pattern| command.contains(pattern)))
            {
                return Err(NetwardenError::PrivilegeUnavailable {
                    reason: "batch not dispatched".to_string(),
                });
            }
        }

        self.dispatched.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        tokio::task::yield_now().await;
        let output: Vec<String> = commands.iter().flat_map(|c| self.execute(c)).collect();

        let held = {
            let hold = self.hold.lock().unwrap();
            hold.as_ref()
                .filter(|hold| commands.iter().any(|c| c.contains(&hold.pattern)))
                .map(|hold| (Arc::clone(&hold.reached), Arc::clone(&hold.release)))
        };
        if let Some((reached, release)) = held {
            reached.notify_one();
            release.notified().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(output)
    }
}

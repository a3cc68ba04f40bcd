//! Canonical command table for every restriction category.
//!
//! Each category owns one read-only probe command plus an ordered list of block
//! commands. The unblock list is the per-rule inverse of the block list in the same
//! order, never a chain flush, so rules installed by other tools survive.

use super::{category::RestrictionCategory, model::ApplicationIdentity};

const BACKGROUND_OP: &str = "RUN_IN_BACKGROUND";
const BACKGROUND_START_OP: &str = "RUN_ANY_IN_BACKGROUND";
/// Built-in chains our owner rules are inserted into; netd chains such as
/// `fw_standby` carry their own uid DROP rules that we must not claim
const OWNER_CHAINS: [&str; 2] = ["OUTPUT", "INPUT"];

/// Binaries used to build privileged commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub iptables: String,
    pub ip6tables: String,
    pub ip: String,
    pub cmd: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            iptables: "iptables".to_string(),
            ip6tables: "ip6tables".to_string(),
            ip: "ip".to_string(),
            cmd: "cmd".to_string(),
        }
    }
}

/// How a line of probe output is recognised as one of our block rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeMatcher {
    /// `iptables -S` line in OUTPUT or INPUT dropping traffic owned by `uid`
    UidOwnerDrop { uid: u32 },
    /// `ip rule` line routing the single-uid range through the main table
    UidRangeMain { uid: u32 },
    /// `appops get` line showing the background op denied
    AppOpDenied { op: &'static str },
}

impl ProbeMatcher {
    pub fn matches(&self, line: &str) -> bool {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match self {
            ProbeMatcher::UidOwnerDrop { uid } => {
                let uid = uid.to_string();
                matches!(tokens.as_slice(), ["-A", chain, ..] if OWNER_CHAINS.contains(chain))
                    && has_pair(&tokens, "--uid-owner", &uid)
                    && has_pair(&tokens, "-j", "DROP")
            }
            ProbeMatcher::UidRangeMain { uid } => {
                let range = format!("{uid}-{uid}");
                has_pair(&tokens, "uidrange", &range) && has_pair(&tokens, "lookup", "main")
            }
            ProbeMatcher::AppOpDenied { op } => {
                let label = format!("{op}:");
                tokens
                    .windows(2)
                    .filter(|pair| pair[0] == label)
                    .map(|pair| pair[1].trim_end_matches(';'))
                    .any(|mode| mode == "deny" || mode == "ignore")
            }
        }
    }
}

fn has_pair(tokens: &[&str], key: &str, value: &str) -> bool {
    tokens.windows(2).any(|pair| pair[0] == key && pair[1] == value)
}

/// A read-only listing command and the filter applied to its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTemplate {
    pub command: String,
    pub matcher: ProbeMatcher,
}

impl ProbeTemplate {
    /// Lines of `output` that belong to the probed rule
    pub fn filter<'a>(&'a self, output: &'a [String]) -> impl Iterator<Item = &'a String> + 'a {
        output.iter().filter(|line| self.matcher.matches(line))
    }
}

/// Builds probe and mutation commands for a given set of tool paths
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    tools: ToolPaths,
}

impl CommandTable {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Binary every command of `category` runs
    pub fn tool(&self, category: RestrictionCategory) -> &str {
        match category {
            RestrictionCategory::Wifi => &self.tools.iptables,
            RestrictionCategory::MobileData => &self.tools.ip6tables,
            RestrictionCategory::Vpn => &self.tools.ip,
            RestrictionCategory::Background => &self.tools.cmd,
        }
    }

    pub fn probe(&self, app: &ApplicationIdentity, category: RestrictionCategory) -> ProbeTemplate {
        match category {
            RestrictionCategory::Wifi => ProbeTemplate {
                command: format!("{} -w -S", self.tools.iptables),
                matcher: ProbeMatcher::UidOwnerDrop { uid: app.uid },
            },
            RestrictionCategory::MobileData => ProbeTemplate {
                command: format!("{} -w -S", self.tools.ip6tables),
                matcher: ProbeMatcher::UidOwnerDrop { uid: app.uid },
            },
            RestrictionCategory::Vpn => ProbeTemplate {
                command: format!("{} rule show", self.tools.ip),
                matcher: ProbeMatcher::UidRangeMain { uid: app.uid },
            },
            RestrictionCategory::Background => ProbeTemplate {
                command: format!("{} appops get {} {}", self.tools.cmd, app.package, BACKGROUND_OP),
                matcher: ProbeMatcher::AppOpDenied { op: BACKGROUND_OP },
            },
        }
    }

    /// Commands installing the block rules, in insertion order
    pub fn block(&self, app: &ApplicationIdentity, category: RestrictionCategory) -> Vec<String> {
        self.mutation(app, category, true)
    }

    /// Exact inverse of [`CommandTable::block`], rule by rule
    pub fn unblock(&self, app: &ApplicationIdentity, category: RestrictionCategory) -> Vec<String> {
        self.mutation(app, category, false)
    }

    fn mutation(
        &self,
        app: &ApplicationIdentity,
        category: RestrictionCategory,
        block: bool,
    ) -> Vec<String> {
        match category {
            RestrictionCategory::Wifi => owner_drop_rules(&self.tools.iptables, app.uid, block),
            RestrictionCategory::MobileData => {
                owner_drop_rules(&self.tools.ip6tables, app.uid, block)
            }
            RestrictionCategory::Vpn => {
                let verb = if block { "add" } else { "del" };
                vec![format!(
                    "{} rule {verb} uidrange {uid}-{uid} lookup main",
                    self.tools.ip,
                    uid = app.uid
                )]
            }
            RestrictionCategory::Background => {
                let mode = if block { "deny" } else { "allow" };
                [BACKGROUND_OP, BACKGROUND_START_OP]
                    .iter()
                    .map(|op| format!("{} appops set {} {op} {mode}", self.tools.cmd, app.package))
                    .collect()
            }
        }
    }
}

fn owner_drop_rules(binary: &str, uid: u32, block: bool) -> Vec<String> {
    let action = if block { "-I" } else { "-D" };
    OWNER_CHAINS
        .iter()
        .map(|chain| format!("{binary} -w {action} {chain} -m owner --uid-owner {uid} -j DROP"))
        .collect()
}

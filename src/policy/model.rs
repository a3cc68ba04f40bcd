// Data model shared by the directory, rules and reconciler modules
use std::{collections::BTreeMap, fmt, path::PathBuf};

use super::category::RestrictionCategory;

/// One installed application as reported by the package manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationIdentity {
    /// Package name, the unique key
    pub package: String,
    /// Kernel uid, the match key for packet filter and routing rules
    pub uid: u32,
    pub display_name: String,
    /// APK the launcher icon is loaded from
    pub icon: Option<PathBuf>,
    pub system: bool,
}

impl ApplicationIdentity {
    /// Create an identity whose display name is the package name
    pub fn new(package: impl Into<String>, uid: u32) -> Self {
        let package = package.into();
        Self {
            display_name: package.clone(),
            package,
            uid,
            icon: None,
            system: false,
        }
    }
}

/// Observed state of one (application, category) rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyState {
    Allowed,
    Blocked,
    #[default]
    Unknown,
}

impl PolicyState {
    /// State matching a requested or probed block flag
    pub fn from_blocked(blocked: bool) -> Self {
        if blocked {
            PolicyState::Blocked
        } else {
            PolicyState::Allowed
        }
    }
}

impl fmt::Display for PolicyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            PolicyState::Allowed => "Allowed",
            PolicyState::Blocked => "Blocked",
            PolicyState::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// Per-application summary derived from its category states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregateStatus {
    pub blocked: usize,
    pub unknown: usize,
}

impl AggregateStatus {
    pub fn from_states(states: &BTreeMap<RestrictionCategory, PolicyState>) -> Self {
        RestrictionCategory::ALL
            .iter()
            .map(|category| states.get(category).copied().unwrap_or_default())
            .fold(Self::default(), |mut acc, state| {
                match state {
                    PolicyState::Blocked => acc.blocked += 1,
                    PolicyState::Unknown => acc.unknown += 1,
                    PolicyState::Allowed => {}
                }
                acc
            })
    }

    /// Any category blocked means the application counts as blocked overall
    pub fn is_blocked(&self) -> bool {
        self.blocked > 0
    }

    pub fn is_fully_blocked(&self) -> bool {
        self.blocked == RestrictionCategory::ALL.len()
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_fully_blocked() {
            f.write_str("ALL BLOCKED")
        } else if self.blocked > 0 {
            write!(f, "{} BLOCKED", self.blocked)
        } else if self.unknown > 0 {
            f.write_str("UNKNOWN")
        } else {
            f.write_str("ALL ALLOWED")
        }
    }
}

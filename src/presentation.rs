//! Snapshot types handed to whatever renders the application list.
//!
//! The reconciler publishes [`PolicyEvent`]s on a single queue while it holds its
//! table lock, so a consumer always sees rows in the order the state changed and
//! never a half-updated map.

use std::collections::BTreeMap;

use crate::policy::{AggregateStatus, ApplicationIdentity, PolicyState, RestrictionCategory};

/// One application with a copy of its category states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRow {
    pub identity: ApplicationIdentity,
    pub states: BTreeMap<RestrictionCategory, PolicyState>,
}

impl AppRow {
    pub fn aggregate(&self) -> AggregateStatus {
        AggregateStatus::from_states(&self.states)
    }

    pub fn state(&self, category: RestrictionCategory) -> PolicyState {
        self.states.get(&category).copied().unwrap_or_default()
    }

    /// Case-insensitive substring match on display name or package
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.identity.display_name.to_lowercase().contains(&query)
            || self.identity.package.to_lowercase().contains(&query)
    }

    /// Single line for list views
    pub fn summary_line(&self) -> String {
        let flags: Vec<String> = RestrictionCategory::ALL
            .iter()
            .map(|&category| format!("{}={}", category, state_mark(self.state(category))))
            .collect();
        format!(
            "{:<40} {:>6}  {:<12} {}",
            self.identity.package,
            self.identity.uid,
            self.aggregate().to_string(),
            flags.join(" ")
        )
    }

    /// Multi-line description for a detail view
    pub fn detail(&self) -> String {
        let mut text = format!(
            "{}\nPackage: {}\nUID: {}\nType: {}\n",
            self.identity.display_name,
            self.identity.package,
            self.identity.uid,
            if self.identity.system { "system" } else { "user" }
        );
        if let Some(icon) = &self.identity.icon {
            text.push_str(&format!("APK: {}\n", icon.display()));
        }
        text.push('\n');
        for category in RestrictionCategory::ALL {
            text.push_str(&format!("{}: {}\n", category.label(), self.state(category)));
        }
        text.push_str(&format!("\nStatus: {}", self.aggregate()));
        text
    }
}

fn state_mark(state: PolicyState) -> &'static str {
    match state {
        PolicyState::Allowed => "on",
        PolicyState::Blocked => "off",
        PolicyState::Unknown => "?",
    }
}

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    /// A new identity set was loaded; every state is `Unknown`
    Loaded { generation: u64, rows: Vec<AppRow> },
    /// Enumeration failed; the previous rows stay as they were
    LoadFailed { reason: String },
    /// One probe batch finished and was merged
    Probed {
        generation: u64,
        rows: Vec<AppRow>,
        failures: usize,
    },
    /// A mutation succeeded for one application
    Changed { row: AppRow },
    /// Root is not available; sent at most once per session
    PrivilegeUnavailable { reason: String },
}

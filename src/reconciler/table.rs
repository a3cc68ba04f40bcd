use std::{
    collections::{BTreeMap, HashMap},
    time::{Duration, Instant},
};

use crate::{
    policy::{ApplicationIdentity, PolicyState, RestrictionCategory},
    presentation::AppRow,
};

/// Identifies when a probe was issued
///
/// `generation` changes on every application reload, `sequence` grows with every
/// probe issue and every completed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub generation: u64,
    pub sequence: u64,
}

/// Outcome of merging one probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Applied,
    /// The identity set was reloaded after the probe was issued
    StaleGeneration,
    /// A newer probe or a mutation already wrote this pair
    StaleSequence,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    state: PolicyState,
    sequence: u64,
    observed_at: Option<Instant>,
}

type Key = (String, RestrictionCategory);

/// In-memory map from (application, category) to observed state
#[derive(Debug, Default)]
pub struct PolicyTable {
    generation: u64,
    next_sequence: u64,
    apps: Vec<ApplicationIdentity>,
    index: HashMap<String, usize>,
    slots: HashMap<Key, Slot>,
}

impl PolicyTable {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Replace the identity set and reset every pair to `Unknown`
    ///
    /// The first occurrence of a package wins. Returns the new generation.
    pub fn replace_applications(&mut self, apps: Vec<ApplicationIdentity>) -> u64 {
        self.generation += 1;
        self.apps.clear();
        self.index.clear();
        self.slots.clear();

        for app in apps {
            if self.index.contains_key(&app.package) {
                log::debug!("Ignoring duplicate package {}", app.package);
                continue;
            }
            for category in RestrictionCategory::ALL {
                self.slots
                    .insert((app.package.clone(), category), Slot::default());
            }
            self.index.insert(app.package.clone(), self.apps.len());
            self.apps.push(app);
        }

        self.generation
    }

    pub fn applications(&self) -> &[ApplicationIdentity] {
        &self.apps
    }

    pub fn identity(&self, package: &str) -> Option<&ApplicationIdentity> {
        self.index.get(package).map(|&i| &self.apps[i])
    }

    /// Allocate a stamp for a probe about to be issued
    pub fn issue(&mut self) -> Stamp {
        self.next_sequence += 1;
        Stamp {
            generation: self.generation,
            sequence: self.next_sequence,
        }
    }

    /// Pairs that are still `Unknown` or were last observed at least `max_age` ago
    pub fn due(&self, now: Instant, max_age: Duration) -> Vec<(ApplicationIdentity, RestrictionCategory)> {
        self.apps
            .iter()
            .flat_map(|app| RestrictionCategory::ALL.map(|category| (app, category)))
            .filter(|(app, category)| {
                let slot = self.slot(&app.package, *category);
                match (slot.state, slot.observed_at) {
                    (PolicyState::Unknown, _) | (_, None) => true,
                    (_, Some(at)) => now.saturating_duration_since(at) >= max_age,
                }
            })
            .map(|(app, category)| (app.clone(), category))
            .collect()
    }

    /// Merge a probe result unless something newer already landed
    pub fn merge_probe(
        &mut self,
        package: &str,
        category: RestrictionCategory,
        present: bool,
        stamp: Stamp,
        now: Instant,
    ) -> Merge {
        if stamp.generation != self.generation {
            return Merge::StaleGeneration;
        }
        let Some(slot) = self.slots.get_mut(&(package.to_string(), category)) else {
            return Merge::StaleGeneration;
        };
        if stamp.sequence <= slot.sequence {
            return Merge::StaleSequence;
        }

        *slot = Slot {
            state: PolicyState::from_blocked(present),
            sequence: stamp.sequence,
            observed_at: Some(now),
        };
        Merge::Applied
    }

    /// Record a completed mutation with a fresh sequence number
    ///
    /// Any probe issued before this call loses against it. Returns false when the
    /// package is no longer part of the identity set.
    pub fn record_mutation(
        &mut self,
        package: &str,
        category: RestrictionCategory,
        blocked: bool,
        now: Instant,
    ) -> bool {
        if !self.slots.contains_key(&(package.to_string(), category)) {
            return false;
        }
        let sequence = self.issue().sequence;
        self.slots.insert(
            (package.to_string(), category),
            Slot {
                state: PolicyState::from_blocked(blocked),
                sequence,
                observed_at: Some(now),
            },
        );
        true
    }

    pub fn state(&self, package: &str, category: RestrictionCategory) -> PolicyState {
        self.slot(package, category).state
    }

    pub fn states(&self, package: &str) -> BTreeMap<RestrictionCategory, PolicyState> {
        RestrictionCategory::ALL
            .iter()
            .map(|&category| (category, self.state(package, category)))
            .collect()
    }

    pub fn row(&self, package: &str) -> Option<AppRow> {
        self.identity(package).map(|app| AppRow {
            identity: app.clone(),
            states: self.states(package),
        })
    }

    /// Copy of every row, in identity order
    pub fn rows(&self) -> Vec<AppRow> {
        self.apps
            .iter()
            .map(|app| AppRow {
                identity: app.clone(),
                states: self.states(&app.package),
            })
            .collect()
    }

    fn slot(&self, package: &str, category: RestrictionCategory) -> Slot {
        self.slots
            .get(&(package.to_string(), category))
            .copied()
            .unwrap_or_default()
    }
}

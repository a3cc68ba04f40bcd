mod refresh;
mod sync;
mod table;

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::{
    sync::{Mutex as AsyncMutex, Semaphore, mpsc},
    task::{JoinHandle, JoinSet},
};

use crate::{
    directory::AppDirectory,
    error::NetwardenError,
    exec::{Capabilities, PrivilegedExecutor},
    policy::{ApplicationIdentity, CommandTable, PolicyState, RestrictionCategory},
    presentation::{AppRow, PolicyEvent},
    rules::{RuleMutator, RuleProber},
};

pub use refresh::spawn_refresh;
pub use sync::ShutdownSignal;
pub use table::{Merge, PolicyTable, Stamp};

const DEFAULT_PROBE_CONCURRENCY: usize = 4;
const DEFAULT_REFRESH_AFTER: Duration = Duration::from_secs(30);
const NO_ROOT: &str = "root shell not available";

/// Tunables for [`PolicyReconciler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Applications probed at the same time
    pub probe_concurrency: usize,
    /// Known states older than this are probed again by `probe_all`
    pub refresh_after: Duration,
    /// Keep system applications in the identity set
    pub include_system: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
            refresh_after: DEFAULT_REFRESH_AFTER,
            include_system: false,
        }
    }
}

/// A probe that could not produce a result
#[derive(Debug)]
pub struct ProbeFailure {
    pub package: String,
    pub category: RestrictionCategory,
    pub error: NetwardenError,
}

/// Summary of one probe pass
#[derive(Debug, Default)]
pub struct ProbeReport {
    pub generation: u64,
    /// Probes that returned, successfully or not
    pub probed: usize,
    pub applied: usize,
    /// Results dropped because a newer write or a reload got there first
    pub discarded: usize,
    pub failures: Vec<ProbeFailure>,
}

type ProbeOutcome = (String, RestrictionCategory, Stamp, Result<bool, NetwardenError>);
type ProbeWork = Vec<(ApplicationIdentity, RestrictionCategory, Stamp)>;

struct Inner<E: PrivilegedExecutor, D: AppDirectory> {
    directory: D,
    prober: RuleProber<E>,
    mutator: RuleMutator<E>,
    capabilities: Capabilities,
    options: ReconcilerOptions,
    table: Mutex<PolicyTable>,
    pair_locks: Mutex<HashMap<(String, RestrictionCategory), Arc<AsyncMutex<()>>>>,
    probe_slots: Semaphore,
    events: mpsc::UnboundedSender<PolicyEvent>,
    privilege_reported: AtomicBool,
}

/// Owns the per-application policy state and keeps it in line with the device
///
/// Cloning is cheap and every clone shares the same state.
pub struct PolicyReconciler<E: PrivilegedExecutor, D: AppDirectory> {
    inner: Arc<Inner<E, D>>,
}

impl<E: PrivilegedExecutor, D: AppDirectory> Clone for PolicyReconciler<E, D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: PrivilegedExecutor, D: AppDirectory> PolicyReconciler<E, D> {
    /// Create a reconciler and the receiving end of its event queue
    pub fn new(
        executor: Arc<E>,
        directory: D,
        commands: CommandTable,
        capabilities: Capabilities,
        options: ReconcilerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<PolicyEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Inner {
            directory,
            prober: RuleProber::new(Arc::clone(&executor), commands.clone())
                .with_missing_tools(capabilities.missing_tools.clone()),
            mutator: RuleMutator::new(executor, commands),
            capabilities,
            probe_slots: Semaphore::new(options.probe_concurrency.max(1)),
            options,
            table: Mutex::new(PolicyTable::default()),
            pair_locks: Mutex::new(HashMap::new()),
            events,
            privilege_reported: AtomicBool::new(false),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    pub fn generation(&self) -> u64 {
        self.inner.table.lock().unwrap().generation()
    }

    /// Re-enumerate installed applications and reset every state to `Unknown`
    ///
    /// Duplicates are dropped (first seen wins), system applications are dropped
    /// unless configured otherwise, and the result is sorted by display name.
    /// Probes still in flight from the previous load are discarded when they land.
    pub async fn load_applications(&self) -> Result<Vec<ApplicationIdentity>, NetwardenError> {
        let enumerated = match self.inner.directory.enumerate().await {
            Ok(apps) => apps,
            Err(err) => {
                let err = match err {
                    err @ NetwardenError::DirectoryUnavailable { .. } => err,
                    other => NetwardenError::DirectoryUnavailable {
                        reason: other.to_string(),
                    },
                };
                log::error!("Failed to enumerate applications: {err}");
                self.publish(PolicyEvent::LoadFailed {
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let selected = select_applications(enumerated, self.inner.options.include_system);

        let mut table = self.inner.table.lock().unwrap();
        let generation = table.replace_applications(selected);
        self.prune_pair_locks(&table);
        log::info!(
            "Loaded {} applications (generation {generation})",
            table.len()
        );
        self.publish(PolicyEvent::Loaded {
            generation,
            rows: table.rows(),
        });
        Ok(table.applications().to_vec())
    }

    /// Probe every pair that is `Unknown` or older than `refresh_after`
    ///
    /// Applications are probed concurrently, bounded by `probe_concurrency`. All
    /// results are merged under one lock and a single `Probed` event is sent.
    pub async fn probe_all(&self) -> ProbeReport {
        self.probe_pass(false).await
    }

    /// Probe every pair regardless of age
    pub async fn refresh_all(&self) -> ProbeReport {
        self.probe_pass(true).await
    }

    /// Run [`PolicyReconciler::probe_all`] on a background task
    pub fn spawn_probe_all(&self) -> JoinHandle<ProbeReport> {
        let this = self.clone();
        tokio::spawn(async move { this.probe_all().await })
    }

    async fn probe_pass(&self, force: bool) -> ProbeReport {
        let max_age = if force {
            Duration::ZERO
        } else {
            self.inner.options.refresh_after
        };

        let (generation, work) = {
            let mut table = self.inner.table.lock().unwrap();
            let due = table.due(Instant::now(), max_age);
            let work: ProbeWork = due
                .into_iter()
                .map(|(app, category)| (app, category, table.issue()))
                .collect();
            (table.generation(), work)
        };

        self.execute_pass(generation, work).await
    }

    /// Probe every category of one application, regardless of age
    pub async fn probe_application(
        &self,
        app: &ApplicationIdentity,
    ) -> Result<ProbeReport, NetwardenError> {
        self.ensure_loaded(app)?;

        let (generation, work) = {
            let mut table = self.inner.table.lock().unwrap();
            let work: ProbeWork = RestrictionCategory::ALL
                .into_iter()
                .map(|category| (app.clone(), category, table.issue()))
                .collect();
            (table.generation(), work)
        };

        Ok(self.execute_pass(generation, work).await)
    }

    async fn execute_pass(&self, generation: u64, work: ProbeWork) -> ProbeReport {
        let mut report = ProbeReport {
            generation,
            ..ProbeReport::default()
        };
        if work.is_empty() {
            return report;
        }

        if !self.inner.capabilities.root {
            self.report_privilege_unavailable(NO_ROOT);
            report.failures = work
                .into_iter()
                .map(|(app, category, _)| ProbeFailure {
                    package: app.package,
                    category,
                    error: NetwardenError::PrivilegeUnavailable {
                        reason: NO_ROOT.to_string(),
                    },
                })
                .collect();
            return report;
        }

        let outcomes = self.run_probes(work).await;
        report.probed = outcomes.len();

        {
            let mut table = self.inner.table.lock().unwrap();
            let now = Instant::now();
            for (package, category, stamp, result) in outcomes {
                match result {
                    Ok(present) => {
                        match table.merge_probe(&package, category, present, stamp, now) {
                            Merge::Applied => report.applied += 1,
                            Merge::StaleGeneration | Merge::StaleSequence => {
                                log::debug!("Discarded stale {category} probe for {package}");
                                report.discarded += 1;
                            }
                        }
                    }
                    Err(error) => {
                        if !error.is_privilege_unavailable() {
                            log::warn!("{error}");
                        }
                        report.failures.push(ProbeFailure {
                            package,
                            category,
                            error,
                        });
                    }
                }
            }
            self.publish(PolicyEvent::Probed {
                generation: table.generation(),
                rows: table.rows(),
                failures: report.failures.len(),
            });
        }

        if let Some(failure) = report
            .failures
            .iter()
            .find(|failure| failure.error.is_privilege_unavailable())
        {
            self.report_privilege_unavailable(&failure.error.to_string());
        }

        log::info!(
            "Probe pass done: {} probed, {} applied, {} discarded, {} failed",
            report.probed,
            report.applied,
            report.discarded,
            report.failures.len()
        );
        report
    }

    async fn run_probes(&self, work: ProbeWork) -> Vec<ProbeOutcome> {
        let mut per_app: Vec<(ApplicationIdentity, Vec<(RestrictionCategory, Stamp)>)> =
            Vec::new();
        for (app, category, stamp) in work {
            match per_app.last_mut() {
                Some((last, pairs)) if last.package == app.package => {
                    pairs.push((category, stamp))
                }
                _ => per_app.push((app, vec![(category, stamp)])),
            }
        }

        let mut tasks = JoinSet::new();
        for (app, pairs) in per_app {
            let inner = Arc::clone(&self.inner);
            tasks.spawn(async move {
                let Ok(_permit) = inner.probe_slots.acquire().await else {
                    return Vec::new();
                };
                let mut outcomes = Vec::with_capacity(pairs.len());
                for (category, stamp) in pairs {
                    let result = inner.prober.probe(&app, category).await;
                    outcomes.push((app.package.clone(), category, stamp, result));
                }
                outcomes
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => outcomes.extend(batch),
                Err(err) => log::error!("Probe task failed: {err}"),
            }
        }
        outcomes
    }

    /// Allow or block one category for one application
    ///
    /// Calls for the same (application, category) run one at a time. On success
    /// the state is set from the requested target without re-probing. On failure
    /// the previous state is kept and `MutationFailed` is returned; nothing is
    /// retried automatically.
    pub async fn set_category(
        &self,
        app: &ApplicationIdentity,
        category: RestrictionCategory,
        allowed: bool,
    ) -> Result<(), NetwardenError> {
        self.ensure_loaded(app)?;

        let lock = self.pair_lock(&app.package, category);
        let _guard = lock.lock().await;

        if !self.inner.capabilities.root {
            self.report_privilege_unavailable(NO_ROOT);
            return Err(NetwardenError::MutationFailed {
                package: app.package.clone(),
                category,
                source: Box::new(NetwardenError::PrivilegeUnavailable {
                    reason: NO_ROOT.to_string(),
                }),
            });
        }

        let block = !allowed;
        if let Err(err) = self.inner.mutator.apply(app, category, block).await {
            if err.is_privilege_unavailable() {
                self.report_privilege_unavailable(&err.to_string());
            }
            log::warn!("{err}");
            return Err(err);
        }

        let mut table = self.inner.table.lock().unwrap();
        if table.record_mutation(&app.package, category, block, Instant::now()) {
            if let Some(row) = table.row(&app.package) {
                self.publish(PolicyEvent::Changed { row });
            }
        } else {
            log::debug!("{} was unloaded while {category} was applied", app.package);
        }
        Ok(())
    }

    /// Allow or block all four categories, in canonical order
    ///
    /// Categories that succeed stay applied even when others fail; the failure is
    /// reported as `PartialMutation` so the caller can retry the failed subset.
    pub async fn set_all_categories(
        &self,
        app: &ApplicationIdentity,
        allowed: bool,
    ) -> Result<(), NetwardenError> {
        self.set_categories(app, &RestrictionCategory::ALL, allowed).await
    }

    /// Allow or block several categories, in the order given
    pub async fn set_categories(
        &self,
        app: &ApplicationIdentity,
        categories: &[RestrictionCategory],
        allowed: bool,
    ) -> Result<(), NetwardenError> {
        self.ensure_loaded(app)?;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for &category in categories {
            match self.set_category(app, category, allowed).await {
                Ok(()) => succeeded.push(category),
                Err(_) => failed.push(category),
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(NetwardenError::PartialMutation {
                package: app.package.clone(),
                succeeded,
                failed,
            })
        }
    }

    /// Copy of the current category states of `app`
    pub fn query(&self, app: &ApplicationIdentity) -> BTreeMap<RestrictionCategory, PolicyState> {
        self.inner.table.lock().unwrap().states(&app.package)
    }

    pub fn identity(&self, package: &str) -> Option<ApplicationIdentity> {
        self.inner.table.lock().unwrap().identity(package).cloned()
    }

    pub fn row(&self, package: &str) -> Option<AppRow> {
        self.inner.table.lock().unwrap().row(package)
    }

    /// Copy of every row, safe to render while probes continue
    pub fn snapshot(&self) -> Vec<AppRow> {
        self.inner.table.lock().unwrap().rows()
    }

    fn ensure_loaded(&self, app: &ApplicationIdentity) -> Result<(), NetwardenError> {
        let table = self.inner.table.lock().unwrap();
        match table.identity(&app.package) {
            Some(_) => Ok(()),
            None => Err(NetwardenError::UnknownApplication {
                package: app.package.clone(),
            }),
        }
    }

    fn pair_lock(&self, package: &str, category: RestrictionCategory) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.pair_locks.lock().unwrap();
        Arc::clone(
            locks
                .entry((package.to_string(), category))
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    /// Drop locks of packages that vanished, unless a mutation still holds one
    fn prune_pair_locks(&self, table: &PolicyTable) {
        let mut locks = self.inner.pair_locks.lock().unwrap();
        locks.retain(|(package, _), lock| {
            table.identity(package).is_some() || Arc::strong_count(lock) > 1
        });
    }

    fn report_privilege_unavailable(&self, reason: &str) {
        if self.inner.privilege_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        log::error!("Root access unavailable, rules cannot be read or changed: {reason}");
        self.publish(PolicyEvent::PrivilegeUnavailable {
            reason: reason.to_string(),
        });
    }

    fn publish(&self, event: PolicyEvent) {
        if self.inner.events.send(event).is_err() {
            log::debug!("No presentation listener, event dropped");
        }
    }
}

fn select_applications(
    apps: Vec<ApplicationIdentity>,
    include_system: bool,
) -> Vec<ApplicationIdentity> {
    let mut seen = HashSet::new();
    let mut selected: Vec<ApplicationIdentity> = apps
        .into_iter()
        .filter(|app| seen.insert(app.package.clone()))
        .filter(|app| include_system || !app.system)
        .collect();
    selected.sort_by_cached_key(|app| app.display_name.to_lowercase());
    selected
}

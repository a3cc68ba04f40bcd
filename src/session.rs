//! Runs one CLI command against a reconciler and renders the result as text.

use std::{collections::HashMap, io::Write, sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    cli::Command,
    directory::AppDirectory,
    error::NetwardenError,
    exec::PrivilegedExecutor,
    policy::{ApplicationIdentity, RestrictionCategory},
    presentation::{AppRow, PolicyEvent},
    reconciler::{PolicyReconciler, ProbeReport, ShutdownSignal, spawn_refresh},
};

/// Which applications `list` shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    System,
    User,
}

impl Scope {
    pub fn from_flags(system: bool, user: bool) -> Self {
        match (system, user) {
            (true, false) => Scope::System,
            (false, true) => Scope::User,
            _ => Scope::All,
        }
    }

    fn includes(self, row: &AppRow) -> bool {
        match self {
            Scope::All => true,
            Scope::System => row.identity.system,
            Scope::User => !row.identity.system,
        }
    }
}

pub struct Session<E: PrivilegedExecutor, D: AppDirectory> {
    reconciler: PolicyReconciler<E, D>,
    events: mpsc::UnboundedReceiver<PolicyEvent>,
}

impl<E: PrivilegedExecutor, D: AppDirectory> Session<E, D> {
    pub fn new(
        reconciler: PolicyReconciler<E, D>,
        events: mpsc::UnboundedReceiver<PolicyEvent>,
    ) -> Self {
        Self { reconciler, events }
    }

    /// Dispatch a parsed command
    pub async fn execute<W: Write>(
        &mut self,
        command: &Command,
        watch_interval: Duration,
        shutdown: Arc<ShutdownSignal>,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        match command {
            Command::List {
                filter,
                system,
                user,
            } => {
                self.list(filter.as_deref(), Scope::from_flags(*system, *user), out)
                    .await
            }
            Command::Status { package } => self.status(package, out).await,
            Command::Block { package, category } => self.set(package, category, false, out).await,
            Command::Allow { package, category } => self.set(package, category, true, out).await,
            Command::Watch { interval } => {
                let interval = interval.map(Duration::from_secs).unwrap_or(watch_interval);
                self.watch(interval, shutdown, out).await
            }
        }
    }

    pub async fn list<W: Write>(
        &mut self,
        filter: Option<&str>,
        scope: Scope,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        self.reconciler.load_applications().await?;
        log_failures(&self.reconciler.probe_all().await);

        for row in self.reconciler.snapshot() {
            if !scope.includes(&row) {
                continue;
            }
            if filter.is_some_and(|query| !row.matches(query)) {
                continue;
            }
            writeln!(out, "{}", row.summary_line())?;
        }
        Ok(())
    }

    pub async fn status<W: Write>(
        &mut self,
        package: &str,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        let app = self.resolve(package).await?;
        log_failures(&self.reconciler.probe_application(&app).await?);
        self.write_detail(&app, out)
    }

    /// Apply `allowed` to `categories`, or to every category when empty
    pub async fn set<W: Write>(
        &mut self,
        package: &str,
        categories: &[RestrictionCategory],
        allowed: bool,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        let app = self.resolve(package).await?;
        let result = if categories.is_empty() {
            self.reconciler.set_all_categories(&app, allowed).await
        } else {
            self.reconciler.set_categories(&app, categories, allowed).await
        };

        log_failures(&self.reconciler.probe_application(&app).await?);
        self.write_detail(&app, out)?;
        result
    }

    /// Print the list once, then every row that changes until `shutdown` fires
    pub async fn watch<W: Write>(
        &mut self,
        interval: Duration,
        shutdown: Arc<ShutdownSignal>,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        self.reconciler.load_applications().await?;
        log_failures(&self.reconciler.probe_all().await);

        let mut shown: HashMap<String, AppRow> = HashMap::new();
        for row in self.reconciler.snapshot() {
            writeln!(out, "{}", row.summary_line())?;
            shown.insert(row.identity.package.clone(), row);
        }
        while self.events.try_recv().is_ok() {}

        let refresh = spawn_refresh(self.reconciler.clone(), interval, Arc::clone(&shutdown));
        loop {
            tokio::select! {
                biased;
                event = self.events.recv() => match event {
                    Some(event) => render_event(event, &mut shown, out)?,
                    None => break,
                },
                _ = shutdown.wait() => break,
            }
        }

        if let Err(err) = refresh.await {
            log::error!("Refresh task failed: {err}");
        }
        Ok(())
    }

    async fn resolve(&self, package: &str) -> Result<ApplicationIdentity, NetwardenError> {
        if let Some(app) = self.reconciler.identity(package) {
            return Ok(app);
        }
        self.reconciler.load_applications().await?;
        self.reconciler
            .identity(package)
            .ok_or_else(|| NetwardenError::UnknownApplication {
                package: package.to_string(),
            })
    }

    fn write_detail<W: Write>(
        &self,
        app: &ApplicationIdentity,
        out: &mut W,
    ) -> Result<(), NetwardenError> {
        if let Some(row) = self.reconciler.row(&app.package) {
            writeln!(out, "{}", row.detail())?;
        }
        Ok(())
    }
}

fn render_event<W: Write>(
    event: PolicyEvent,
    shown: &mut HashMap<String, AppRow>,
    out: &mut W,
) -> Result<(), NetwardenError> {
    match event {
        PolicyEvent::Loaded { rows, .. } => {
            shown.clear();
            writeln!(out, "Loaded {} applications", rows.len())?;
        }
        PolicyEvent::LoadFailed { reason } => writeln!(out, "Reload failed: {reason}")?,
        PolicyEvent::Probed { rows, .. } => {
            for row in rows {
                render_row(row, shown, out)?;
            }
        }
        PolicyEvent::Changed { row } => render_row(row, shown, out)?,
        PolicyEvent::PrivilegeUnavailable { reason } => {
            writeln!(out, "Root access unavailable: {reason}")?
        }
    }
    Ok(())
}

fn render_row<W: Write>(
    row: AppRow,
    shown: &mut HashMap<String, AppRow>,
    out: &mut W,
) -> Result<(), NetwardenError> {
    if shown.get(&row.identity.package) == Some(&row) {
        return Ok(());
    }
    writeln!(out, "{}", row.summary_line())?;
    shown.insert(row.identity.package.clone(), row);
    Ok(())
}

fn log_failures(report: &ProbeReport) {
    for failure in &report.failures {
        log::debug!(
            "{} {} probe failed: {}",
            failure.package,
            failure.category,
            failure.error
        );
    }
    if !report.failures.is_empty() {
        log::warn!(
            "{} probes failed, affected states are shown as unknown",
            report.failures.len()
        );
    }
}

use std::time::Duration;

use crate::{error::NetwardenError, policy::ToolPaths, reconciler::ReconcilerOptions};

use super::args::{Args, Command};
use super::config::ConfigFile;

const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

/// Everything needed to start a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub su: String,
    pub tools: ToolPaths,
    pub options: ReconcilerOptions,
    /// Default period of `watch` when no `--interval` is given
    pub watch_interval: Duration,
}

/// Merge defaults, the config file and command line flags, in that order
pub struct SettingsLoader;

impl SettingsLoader {
    pub fn load(args: &Args) -> Result<Settings, NetwardenError> {
        let config = match args.config.as_ref() {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::merge(args, &config))
    }

    fn merge(args: &Args, config: &ConfigFile) -> Settings {
        let mut options = ReconcilerOptions::default();
        if let Some(concurrency) = config.probe.concurrency {
            options.probe_concurrency = concurrency;
        }
        if let Some(secs) = config.probe.refresh_after_secs {
            options.refresh_after = Duration::from_secs(secs);
        }
        let lists_system = matches!(args.command, Command::List { system: true, .. });
        options.include_system =
            config.directory.include_system || args.include_system || lists_system;
        if let Some(concurrency) = args.concurrency {
            options.probe_concurrency = concurrency;
        }
        options.probe_concurrency = options.probe_concurrency.max(1);

        let watch_interval = config
            .probe
            .refresh_after_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WATCH_INTERVAL);

        Settings {
            su: config.executor.su.clone(),
            tools: config.tool_paths(),
            options,
            watch_interval,
        }
    }
}

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::NetwardenError, policy::ToolPaths};

#[derive(Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Binary used to obtain a root shell
    #[serde(default = "default_su")]
    pub su: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { su: default_su() }
    }
}

fn default_su() -> String {
    "su".to_string()
}

/// Tool binaries; unset entries fall back to the names found on `PATH`
#[derive(Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolsConfig {
    #[serde(default)]
    pub iptables: Option<String>,
    #[serde(default)]
    pub ip6tables: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ProbeConfig {
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub refresh_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub include_system: bool,
}

impl ConfigFile {
    /// Load configuration file
    pub fn load(path: &Path) -> Result<Self, NetwardenError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| NetwardenError::ConfigParse {
            path: PathBuf::from(path),
            source,
        })
    }

    /// Tool paths with configured overrides applied
    pub fn tool_paths(&self) -> ToolPaths {
        let defaults = ToolPaths::default();
        ToolPaths {
            iptables: self.tools.iptables.clone().unwrap_or(defaults.iptables),
            ip6tables: self.tools.ip6tables.clone().unwrap_or(defaults.ip6tables),
            ip: self.tools.ip.clone().unwrap_or(defaults.ip),
            cmd: self.tools.cmd.clone().unwrap_or(defaults.cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_full_config() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[executor]
su = "/system/xbin/su"

[tools]
iptables = "/system/bin/iptables"

[probe]
concurrency = 2
refresh_after_secs = 10

[directory]
include_system = true
"#
        )
        .unwrap();

        let config = ConfigFile::load(tmp.path()).unwrap();
        assert_eq!(config.executor.su, "/system/xbin/su");
        assert_eq!(config.probe.concurrency, Some(2));
        assert_eq!(config.probe.refresh_after_secs, Some(10));
        assert!(config.directory.include_system);

        let tools = config.tool_paths();
        assert_eq!(tools.iptables, "/system/bin/iptables");
        assert_eq!(tools.ip6tables, "ip6tables");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[probe]\nconcurrency = 1\n").unwrap();

        let config = ConfigFile::load(tmp.path()).unwrap();
        assert_eq!(config.executor.su, "su");
        assert_eq!(config.tool_paths(), ToolPaths::default());
        assert!(!config.directory.include_system);
    }

    #[test]
    fn malformed_config_reports_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[probe]\nconcurrency = \"many\"\n").unwrap();

        let err = ConfigFile::load(tmp.path()).unwrap_err();
        match err {
            NetwardenError::ConfigParse { path, .. } => assert_eq!(path, tmp.path()),
            other => panic!("Expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigFile::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, NetwardenError::Io(_)));
    }
}

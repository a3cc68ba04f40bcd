use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::policy::RestrictionCategory;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Per-application network access control for rooted Android devices"
)]
pub struct Args {
    /// Path to configuration file (TOML)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Include system applications
    #[arg(long = "include-system")]
    pub include_system: bool,

    /// Number of applications probed at the same time
    #[arg(long = "concurrency", value_name = "N")]
    pub concurrency: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List applications with their restriction status
    List {
        /// Only show applications whose name or package contains TEXT
        #[arg(long = "filter", value_name = "TEXT")]
        filter: Option<String>,

        /// Only show system applications
        #[arg(long = "system", conflicts_with = "user")]
        system: bool,

        /// Only show user applications
        #[arg(long = "user")]
        user: bool,
    },

    /// Show every category for one application
    Status {
        package: String,
    },

    /// Block network access for an application (all categories by default)
    Block {
        package: String,

        /// Categories to block: wifi, mobile-data, vpn, background
        #[arg(long = "category", value_delimiter = ',')]
        category: Vec<RestrictionCategory>,
    },

    /// Allow network access for an application (all categories by default)
    Allow {
        package: String,

        /// Categories to allow: wifi, mobile-data, vpn, background
        #[arg(long = "category", value_delimiter = ',')]
        category: Vec<RestrictionCategory>,
    },

    /// Keep re-probing rules and print every change until interrupted
    Watch {
        /// Seconds between refresh passes
        #[arg(long = "interval", value_name = "SECS")]
        interval: Option<u64>,
    },
}

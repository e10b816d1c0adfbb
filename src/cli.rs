use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::config::Config;
use crate::store::MAX_RETENTION_HOURS;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Dashboard configuration file
    #[arg(short, long, env = "WQMON_CONFIG", default_value = "wqmon.json")]
    pub config: PathBuf,

    /// History directory, overriding the config file's `historyDir`
    #[arg(long, env = "WQMON_HISTORY_DIR")]
    pub history_dir: Option<PathBuf>,

    /// Directory for wqmon.log
    #[arg(long, env = "WQMON_LOG_DIR", default_value = ".")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Args {
    /// Load the config file, falling back to defaults if it is missing
    pub fn load_config(&self) -> Result<Config> {
        Config::load_or_default(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))
    }

    pub fn history_dir(&self, config: &Config) -> PathBuf {
        match &self.history_dir {
            Some(dir) => dir.clone(),
            None => config.history_dir_relative_to(&self.config),
        }
    }
}

#[derive(Parser, Debug)]
pub enum Commands {
    /// Open the live dashboard
    Watch(WatchArgs),
    /// Poll and persist readings without a dashboard
    Record(RecordArgs),
    /// Write stored history as CSV
    Export(ExportArgs),
    /// Delete all stored history
    Clear(ClearArgs),
    /// Show history shards and disk usage
    Info,
}

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Where CSV exports from the dashboard are written
    #[arg(long, default_value = ".")]
    pub export_dir: PathBuf,
}

#[derive(Parser, Debug)]
pub struct RecordArgs {
    /// Stop after this many readings
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Hours of history to export (defaults to the configured retention)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=MAX_RETENTION_HOURS as i64))]
    pub hours: Option<u32>,

    /// Output file; stdout if omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keys to leave out of the export
    #[arg(long, value_delimiter = ',')]
    pub hide: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ClearArgs {
    /// Do not ask for confirmation
    #[arg(short, long, default_value_t = false)]
    pub yes: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let args = Args::try_parse_from([
            "wqmon", "--config", "/etc/wqmon.json", "export", "--hours", "6", "--hide", "ai1,ai3",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("/etc/wqmon.json"));
        match args.command {
            Commands::Export(export) => {
                assert_eq!(export.hours, Some(6));
                assert_eq!(export.hide, vec!["ai1", "ai3"]);
                assert!(export.output.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_export_hours_bounds() {
        assert!(Args::try_parse_from(["wqmon", "export", "--hours", "0"]).is_err());
        assert!(Args::try_parse_from(["wqmon", "export", "--hours", "4294967295"]).is_err());
        let max = MAX_RETENTION_HOURS.to_string();
        assert!(Args::try_parse_from(["wqmon", "export", "--hours", max.as_str()]).is_ok());
    }

    #[test]
    fn test_history_dir_override() {
        let args = Args::try_parse_from(["wqmon", "--history-dir", "/var/wq", "info"]).unwrap();
        assert_eq!(args.history_dir(&Config::default()), PathBuf::from("/var/wq"));
    }
}

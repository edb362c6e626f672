mod file_config;

pub use file_config::{FileConfig, PostgrestFileConfig};

use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

use crate::coordinator::CoordinatorSettings;
use crate::event_source::DEFAULT_FETCH_LIMIT;
use crate::notifications::presentation::DEFAULT_SNIPPET_MAX_GRAPHEMES;

/// Where like events are read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SourceKind {
    /// Local SQLite database in `db_dir`.
    #[default]
    Sqlite,
    /// Remote PostgREST endpoint.
    Postgrest,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub viewer_id: Option<String>,
    pub source: SourceKind,
    pub postgrest_url: Option<String>,
    pub postgrest_api_key: Option<String>,
    pub fetch_limit: usize,
    pub fetch_timeout_sec: u64,
    pub poll_interval_sec: u64,
    pub snippet_max_graphemes: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            viewer_id: None,
            source: SourceKind::default(),
            postgrest_url: None,
            postgrest_api_key: None,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            fetch_timeout_sec: 10,
            poll_interval_sec: 0,
            snippet_max_graphemes: DEFAULT_SNIPPET_MAX_GRAPHEMES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgrestSettings {
    pub url: String,
    pub api_key: String,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSettings {
    Sqlite,
    Postgrest(PostgrestSettings),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub viewer_id: String,
    pub source: SourceSettings,
    pub coordinator: CoordinatorSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let viewer_id = file
            .viewer_id
            .or_else(|| cli.viewer_id.clone())
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                anyhow!("viewer_id must be specified via --viewer-id or in config file")
            })?;

        let source_kind = match file.source {
            Some(name) => parse_source_kind(&name)
                .ok_or_else(|| anyhow!("Unknown event source {:?}", name))?,
            None => cli.source,
        };

        let source = match source_kind {
            SourceKind::Sqlite => SourceSettings::Sqlite,
            SourceKind::Postgrest => {
                let postgrest = file.postgrest.unwrap_or_default();
                let url = postgrest
                    .url
                    .or_else(|| cli.postgrest_url.clone())
                    .ok_or_else(|| anyhow!("The postgrest source needs a url"))?;
                let api_key = postgrest
                    .api_key
                    .or_else(|| cli.postgrest_api_key.clone())
                    .ok_or_else(|| anyhow!("The postgrest source needs an api key"))?;
                SourceSettings::Postgrest(PostgrestSettings {
                    url,
                    api_key,
                    access_token: postgrest.access_token,
                })
            }
        };

        let fetch_limit = file.fetch_limit.unwrap_or(cli.fetch_limit);
        if fetch_limit == 0 {
            bail!("fetch_limit must be greater than zero");
        }
        let fetch_timeout_sec = file.fetch_timeout_sec.unwrap_or(cli.fetch_timeout_sec);
        if fetch_timeout_sec == 0 {
            bail!("fetch_timeout_sec must be greater than zero");
        }
        let poll_interval_sec = file.poll_interval_sec.unwrap_or(cli.poll_interval_sec);
        let snippet_max_graphemes = file
            .snippet_max_graphemes
            .unwrap_or(cli.snippet_max_graphemes);
        if snippet_max_graphemes == 0 {
            bail!("snippet_max_graphemes must be greater than zero");
        }

        let coordinator = CoordinatorSettings {
            fetch_limit,
            fetch_timeout: Duration::from_secs(fetch_timeout_sec),
            poll_interval: (poll_interval_sec > 0).then(|| Duration::from_secs(poll_interval_sec)),
            snippet_max_graphemes,
        };

        Ok(Self {
            db_dir,
            viewer_id,
            source,
            coordinator,
        })
    }

    pub fn events_db_path(&self) -> PathBuf {
        self.db_dir.join("likes.db")
    }

    pub fn watermark_db_path(&self) -> PathBuf {
        self.db_dir.join("watermark.db")
    }
}

fn parse_source_kind(s: &str) -> Option<SourceKind> {
    SourceKind::from_str(s, true).ok()
}

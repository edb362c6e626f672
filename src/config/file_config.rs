use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub viewer_id: Option<String>,
    pub source: Option<String>,
    pub fetch_limit: Option<usize>,
    pub fetch_timeout_sec: Option<u64>,
    pub poll_interval_sec: Option<u64>,
    pub snippet_max_graphemes: Option<usize>,

    pub postgrest: Option<PostgrestFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PostgrestFileConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Signed-in user's JWT; the anon key is used when absent.
    pub access_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

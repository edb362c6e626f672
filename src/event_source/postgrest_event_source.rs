//! HTTP client for the hosted backend's PostgREST endpoint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::rows::{decode_rows, LikeRow};
use super::{EventSource, LikeQuery};
use crate::notifications::{LikeEvent, NotificationError};
use crate::timestamps::format_timestamp;

const LIKES_SELECT: &str = "id,post_id,user_id,created_at,\
posts!inner(id,content,user_id),\
actor:profiles!post_likes_user_id_fkey(username,display_name,avatar_url)";

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    /// Public API key sent in the `apikey` header.
    pub api_key: String,
    /// Signed-in viewer's access token; the API key is used when absent.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

/// [`EventSource`] backed by the `post_likes` REST resource.
pub struct PostgrestEventSource {
    client: reqwest::Client,
    likes_url: String,
    api_key: String,
    bearer: String,
}

impl PostgrestEventSource {
    pub fn new(config: PostgrestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = config.base_url.trim_end_matches('/');
        let bearer = config
            .access_token
            .unwrap_or_else(|| config.api_key.clone());

        Ok(Self {
            client,
            likes_url: format!("{}/rest/v1/post_likes", base_url),
            api_key: config.api_key,
            bearer,
        })
    }

    pub fn likes_url(&self) -> &str {
        &self.likes_url
    }

    /// Query string of a likes fetch, in request order.
    pub fn query_params(query: &LikeQuery) -> Vec<(&'static str, String)> {
        vec![
            ("select", LIKES_SELECT.to_string()),
            ("posts.user_id", format!("eq.{}", query.viewer_id)),
            (
                "created_at",
                format!("gt.{}", format_timestamp(query.since_exclusive)),
            ),
            ("order", "created_at.desc".to_string()),
            ("limit", query.limit.to_string()),
        ]
    }
}

#[async_trait]
impl EventSource for PostgrestEventSource {
    async fn fetch_likes_since(
        &self,
        query: &LikeQuery,
    ) -> Result<Vec<LikeEvent>, NotificationError> {
        let response = self
            .client
            .get(&self.likes_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.bearer)
            .query(&Self::query_params(query))
            .send()
            .await
            .map_err(|err| {
                NotificationError::source_unavailable(format!(
                    "Failed to reach likes endpoint: {}",
                    err
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::SourceUnavailable(format!(
                "Likes query failed with status {}: {}",
                status, body
            )));
        }

        let rows: Vec<LikeRow> = response.json().await.map_err(|err| {
            NotificationError::source_unavailable(format!(
                "Failed to parse likes response: {}",
                err
            ))
        })?;

        debug!(
            "Fetched {} like rows for viewer {} from {}",
            rows.len(),
            query.viewer_id,
            self.likes_url
        );
        Ok(decode_rows(rows))
    }
}

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::RemarkStoreConfig;
use crate::error::{CollabError, Result};

/// A chat-style message scoped to a room. Immutable once created; the log
/// is a true append sequence and duplicates are never collapsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    pub text: String,
}

/// Client for the external remark store.
///
/// The store owns persistence; this client only fetches the full log at
/// join time and appends on send. Delivery to room peers happens over the
/// relay independently of these calls.
pub struct RemarkStore {
    base_url: String,
    client: reqwest::Client,
}

impl RemarkStore {
    pub fn new(config: &RemarkStoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| CollabError::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Full ordered replay of a room's remarks.
    ///
    /// Store unavailability degrades to an empty list so room entry is
    /// never blocked on chat history.
    pub async fn list(&self, room_id: &str) -> Vec<Remark> {
        let url = format!(
            "{}/remarks/{}",
            self.base_url,
            urlencoding::encode(room_id)
        );

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    room_id = %room_id,
                    error = %e,
                    "Remark store unreachable, returning empty log"
                );
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(
                room_id = %room_id,
                status = %response.status(),
                "Remark store rejected fetch, returning empty log"
            );
            return Vec::new();
        }

        match response.json::<Vec<Remark>>().await {
            Ok(remarks) => remarks,
            Err(e) => {
                tracing::warn!(
                    room_id = %room_id,
                    error = %e,
                    "Failed to parse remark log, returning empty log"
                );
                Vec::new()
            }
        }
    }

    /// Append a remark, echoing the stored copy back.
    pub async fn append(&self, remark: &Remark) -> Result<Remark> {
        let url = format!("{}/remarks", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(remark)
            .send()
            .await
            .map_err(|e| CollabError::store(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CollabError::store(format!(
                "Append failed with status {}: {}",
                status, error_text
            )));
        }

        let stored: Remark = response
            .json()
            .await
            .map_err(|e| CollabError::store(format!("Failed to parse response: {}", e)))?;

        tracing::info!(
            room_id = %stored.room_id,
            user_name = %stored.user_name,
            "Remark appended to store"
        );

        Ok(stored)
    }
}

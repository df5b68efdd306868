//! HTTP implementation of the host boundary.
//!
//! Plain JSON request/response against the host's `/api` endpoints with
//! optional bearer-token auth. No timeout is imposed beyond the client
//! defaults: a hanging call blocks only the flow that issued it.

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::host::{ConfigEntry, DeviceRecord, EntityRecord, HostApi, HostError, LogbookEvent, Result};
use crate::schedule::OptionMap;

pub struct HttpHost {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct ConfigResponse {
    config: OptionMap,
}

#[derive(Deserialize)]
struct UpdateResponse {
    options: OptionMap,
}

#[derive(Deserialize)]
struct UploadResponse {
    version: i64,
}

impl HttpHost {
    pub fn new(base_url: &str, token: Option<String>) -> AnyResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base: base_url.trim_end_matches('/').to_string(), token })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(HostError::NotFound(status.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HostError::Rejected(reject_message(status.as_u16(), &body)));
        }
        resp.json::<T>()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(self.http.get(self.url(path))).await
    }
}

/// Compact error line for a non-success response; long bodies are
/// truncated so a stack of HTML never lands in the log.
fn reject_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("status {status}");
    }
    let mut shown: String = body.chars().take(200).collect();
    if shown.len() < body.len() {
        shown.push('…');
    }
    format!("status {status}: {shown}")
}

#[async_trait]
impl HostApi for HttpHost {
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>> {
        self.get("/api/registry/devices").await
    }

    async fn list_entities(&self) -> Result<Vec<EntityRecord>> {
        self.get("/api/registry/entities").await
    }

    async fn list_config_entries(&self, domain: &str) -> Result<Vec<ConfigEntry>> {
        self.send(
            self.http
                .get(self.url("/api/config/entries"))
                .query(&[("domain", domain)]),
        )
        .await
    }

    async fn get_config(&self, entry_id: &str) -> Result<OptionMap> {
        let resp: ConfigResponse = self.get(&format!("/api/config/entries/{entry_id}")).await?;
        Ok(resp.config)
    }

    async fn update_config(&self, entry_id: &str, patch: OptionMap) -> Result<OptionMap> {
        let resp: UpdateResponse = self
            .send(
                self.http
                    .post(self.url(&format!("/api/config/entries/{entry_id}")))
                    .json(&patch),
            )
            .await?;
        Ok(resp.options)
    }

    async fn upload_image(&self, device_id: &str, entry_id: &str, image: Vec<u8>) -> Result<i64> {
        let resp: UploadResponse = self
            .send(
                self.http
                    .post(self.url(&format!("/api/devices/{device_id}/image")))
                    .query(&[("entry_id", entry_id)])
                    .body(image),
            )
            .await?;
        Ok(resp.version)
    }

    async fn get_events(
        &self,
        start: DateTime<Utc>,
        entity_ids: &[String],
    ) -> Result<Vec<LogbookEvent>> {
        self.send(
            self.http
                .get(self.url("/api/logbook"))
                .query(&[("start", start.to_rfc3339()), ("entity_ids", entity_ids.join(","))]),
        )
        .await
    }

    async fn toggle(&self, entity_id: &str) -> Result<()> {
        let resp = self
            .authed(self.http.post(self.url(&format!("/api/entities/{entity_id}/toggle"))))
            .send()
            .await
            .map_err(|e| HostError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HostError::Rejected(reject_message(status.as_u16(), &body)));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, Response, Url};
use serde::Deserialize;

use rolekeeper_core::application::grant_lifecycle::{GrantReceipt, GrantRequest};
use rolekeeper_core::domain::grant::{ActorId, GrantId, GrantRecord};
use rolekeeper_core::presentation::api::RevokeResponse;

use super::base_url;

/// Error body returned by the daemon for rejected requests.
#[derive(Debug, thiserror::Error)]
#[error("{message} ({kind}, HTTP {status})")]
pub struct DaemonError {
    pub status: u16,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url(host, port),
        })
    }

    pub async fn request_grant(&self, request: &GrantRequest) -> Result<GrantReceipt> {
        let response = self
            .client
            .post(format!("{}/v1/grants", self.base_url))
            .json(request)
            .send()
            .await
            .context("Failed to send grant request")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse grant response")
    }

    pub async fn list_grants(&self, scope_id: Option<&str>) -> Result<Vec<GrantRecord>> {
        let url = format!("{}/v1/grants", self.base_url);
        let url = match scope_id {
            Some(scope) => Url::parse_with_params(&url, &[("scope_id", scope)]),
            None => Url::parse(&url),
        }
        .context("Invalid daemon URL")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to list grants")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse grant list")
    }

    pub async fn revoke_grant(&self, grant_id: GrantId, actor_id: &ActorId) -> Result<RevokeResponse> {
        let url = Url::parse_with_params(
            &format!("{}/v1/grants/{}", self.base_url, grant_id),
            &[("actor_id", actor_id.as_str())],
        )
        .context("Invalid daemon URL")?;

        let response = self
            .client
            .delete(url)
            .send()
            .await
            .context("Failed to revoke grant")?;

        check(response)
            .await?
            .json()
            .await
            .context("Failed to parse revoke response")
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
        message: String,
    }

    let text = response.text().await.unwrap_or_default();
    let error = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => DaemonError {
            status: status.as_u16(),
            kind: body.error,
            message: body.message,
        },
        Err(_) => DaemonError {
            status: status.as_u16(),
            kind: "unknown".to_string(),
            message: text,
        },
    };
    Err(error.into())
}

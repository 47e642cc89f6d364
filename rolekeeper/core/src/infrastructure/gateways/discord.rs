// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Discord REST Gateway
//!
//! Implements both gateway ports against the Discord HTTP API (v10):
//!
//! | Port operation | Request |
//! |----------------|---------|
//! | `has_capability` | `GET /guilds/{guild}/members/{user}` |
//! | `grant_capability` | `PUT /guilds/{guild}/members/{user}/roles/{role}` |
//! | `revoke_capability` | `DELETE /guilds/{guild}/members/{user}/roles/{role}` |
//! | `notify` | `POST /users/@me/channels` then `POST /channels/{dm}/messages` |
//! | `audit_log` | `POST /channels/{channel}/messages` |
//!
//! Notices are rendered as a single embed using the configured branding
//! colors. Every request is bounded by `discord.request_timeout`.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::config::{BrandingConfig, DiscordConfig};
use crate::domain::gateway::{
    CapabilityGateway, GatewayError, Notice, NoticeTone, NotificationGateway,
};
use crate::domain::grant::{ChannelId, GrantKey, SubjectId};

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/100monkeys-ai/rolekeeper, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Discord truncates audit log reasons beyond this many characters.
const MAX_AUDIT_REASON: usize = 512;

const AUDIT_REASON_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct GuildMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField<'a>>,
    footer: EmbedFooter<'a>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct EmbedField<'a> {
    name: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct EmbedFooter<'a> {
    text: &'a str,
}

// ============================================================================
// Gateway
// ============================================================================

pub struct DiscordGateway {
    client: Client,
    api_base: String,
    token: String,
    branding: BrandingConfig,
    /// DM channel per user, resolved once
    dm_channels: DashMap<SubjectId, String>,
}

impl DiscordGateway {
    pub fn new(
        config: &DiscordConfig,
        token: impl Into<String>,
        branding: BrandingConfig,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            branding,
            dm_channels: DashMap::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn authorization(&self) -> String {
        format!("Bot {}", self.token)
    }

    fn role_path(key: &GrantKey) -> String {
        format!(
            "/guilds/{}/members/{}/roles/{}",
            key.scope_id, key.subject_id, key.capability_id
        )
    }

    fn render<'a>(&'a self, notice: &'a Notice) -> CreateMessage<'a> {
        let color = match notice.tone {
            NoticeTone::Success => self.branding.success_color,
            NoticeTone::Warning => self.branding.warn_color,
            NoticeTone::Error => self.branding.error_color,
        };

        CreateMessage {
            embeds: vec![Embed {
                title: &notice.title,
                description: notice.description.as_deref(),
                color,
                fields: notice
                    .fields
                    .iter()
                    .map(|f| EmbedField {
                        name: &f.name,
                        value: &f.value,
                    })
                    .collect(),
                footer: EmbedFooter {
                    text: notice.footer.as_deref().unwrap_or(&self.branding.server_name),
                },
                timestamp: Utc::now().to_rfc3339(),
            }],
        }
    }

    async fn post_message(&self, channel_id: &str, notice: &Notice) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(self.url(&format!("/channels/{}/messages", channel_id)))
            .header("Authorization", self.authorization())
            .json(&self.render(notice))
            .send()
            .await?;

        check_status(response, "create message").await?;
        Ok(())
    }

    async fn dm_channel(&self, subject_id: &SubjectId) -> Result<String, GatewayError> {
        if let Some(channel) = self.dm_channels.get(subject_id) {
            return Ok(channel.clone());
        }

        let response = self
            .client
            .post(self.url("/users/@me/channels"))
            .header("Authorization", self.authorization())
            .json(&serde_json::json!({ "recipient_id": subject_id.as_str() }))
            .send()
            .await?;

        let channel: DmChannel = check_status(response, "open DM channel").await?.json().await?;
        self.dm_channels.insert(subject_id.clone(), channel.id.clone());
        Ok(channel.id)
    }
}

#[async_trait]
impl CapabilityGateway for DiscordGateway {
    async fn has_capability(&self, key: &GrantKey) -> Result<bool, GatewayError> {
        let response = self
            .client
            .get(self.url(&format!("/guilds/{}/members/{}", key.scope_id, key.subject_id)))
            .header("Authorization", self.authorization())
            .send()
            .await?;

        // Not a member (anymore) means the role is not held.
        if response.status() == StatusCode::NOT_FOUND {
            debug!(key = %key, "Member not found in guild");
            return Ok(false);
        }

        let member: GuildMember = check_status(response, "get member").await?.json().await?;
        Ok(member.roles.iter().any(|r| r == key.capability_id.as_str()))
    }

    async fn grant_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .put(self.url(&Self::role_path(key)))
            .header("Authorization", self.authorization())
            .header("X-Audit-Log-Reason", encode_audit_reason(reason))
            .send()
            .await?;

        check_status(response, "add member role").await?;
        Ok(())
    }

    async fn revoke_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError> {
        let response = self
            .client
            .delete(self.url(&Self::role_path(key)))
            .header("Authorization", self.authorization())
            .header("X-Audit-Log-Reason", encode_audit_reason(reason))
            .send()
            .await?;

        check_status(response, "remove member role").await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationGateway for DiscordGateway {
    async fn notify(&self, target: &SubjectId, notice: &Notice) -> Result<(), GatewayError> {
        let channel_id = self.dm_channel(target).await?;
        self.post_message(&channel_id, notice).await
    }

    async fn audit_log(&self, destination: &ChannelId, notice: &Notice) -> Result<(), GatewayError> {
        self.post_message(destination.as_str(), notice).await
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Provider(format!("Unexpected response body: {}", err))
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

async fn check_status(response: Response, operation: &str) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", operation, status, body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::PermissionDenied(detail),
        StatusCode::NOT_FOUND => GatewayError::NotFound(detail),
        _ => GatewayError::Provider(detail),
    })
}

/// Percent-encode a reason for the `X-Audit-Log-Reason` header, which must
/// be ASCII.
fn encode_audit_reason(reason: &str) -> String {
    let truncated: String = reason.chars().take(MAX_AUDIT_REASON).collect();
    utf8_percent_encode(&truncated, AUDIT_REASON_ENCODE_SET).to_string()
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Platform Gateway Ports
//!
//! The grant lifecycle never talks to the chat platform directly. It goes
//! through two ports implemented in `crate::infrastructure::gateways`:
//!
//! | Port | Purpose |
//! |------|---------|
//! | [`CapabilityGateway`] | query, add and remove roles on a member |
//! | [`NotificationGateway`] | direct messages and audit-channel entries |
//!
//! Gateway calls are never retried by the caller; adapters bound them with
//! their own request timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::grant::{ActorId, ChannelId, GrantKey, SubjectId};

#[async_trait]
pub trait CapabilityGateway: Send + Sync {
    /// Whether the subject currently holds the capability in the scope.
    async fn has_capability(&self, key: &GrantKey) -> Result<bool, GatewayError>;

    async fn grant_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError>;

    async fn revoke_capability(&self, key: &GrantKey, reason: &str) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Direct message to a member.
    async fn notify(&self, target: &SubjectId, notice: &Notice) -> Result<(), GatewayError>;

    /// Entry in an audit log channel.
    async fn audit_log(&self, destination: &ChannelId, notice: &Notice) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Platform error: {0}")]
    Provider(String),
}

// ============================================================================
// Notices
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeTone {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeField {
    pub name: String,
    pub value: String,
}

/// Platform-neutral message body. Adapters decide how to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub tone: NoticeTone,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub fields: Vec<NoticeField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

const ROLE_LOG_FOOTER: &str = "Role Management Log";

impl Notice {
    pub fn new(tone: NoticeTone, title: impl Into<String>) -> Self {
        Self {
            tone,
            title: title.into(),
            description: None,
            fields: Vec::new(),
            footer: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(NoticeField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// DM sent to the member when a temporary role is applied.
    pub fn grant_applied(key: &GrantKey, duration: &str, reason: &str) -> Self {
        Self::new(NoticeTone::Success, "Role Granted")
            .with_description(format!(
                "You have been granted the {} role in {}.",
                role_mention(key),
                key.scope_id
            ))
            .with_field("Duration", duration)
            .with_field("Reason", reason)
    }

    /// Audit entry for a newly applied temporary role.
    pub fn grant_audit(key: &GrantKey, actor: &ActorId, duration: &str, reason: &str) -> Self {
        Self::new(NoticeTone::Success, "Role Added (Temporary)")
            .with_field("User", user_mention(&key.subject_id))
            .with_field("Moderator", format!("<@{}>", actor))
            .with_field("Role", role_mention(key))
            .with_field("Duration", duration)
            .with_field("Reason", reason)
            .with_footer(ROLE_LOG_FOOTER)
    }

    pub fn grant_expired(key: &GrantKey) -> Self {
        Self::new(NoticeTone::Warning, "Temporary Role Expired").with_description(format!(
            "Your temporary {} role in {} has expired.",
            role_mention(key),
            key.scope_id
        ))
    }

    pub fn expiry_audit(key: &GrantKey) -> Self {
        Self::new(NoticeTone::Warning, "Role Removed (Automatic)")
            .with_field("User", user_mention(&key.subject_id))
            .with_field("Role", role_mention(key))
            .with_footer(ROLE_LOG_FOOTER)
    }

    pub fn grant_revoked(key: &GrantKey) -> Self {
        Self::new(NoticeTone::Warning, "Temporary Role Revoked").with_description(format!(
            "Your temporary {} role in {} has been removed by a moderator.",
            role_mention(key),
            key.scope_id
        ))
    }

    pub fn revoke_audit(key: &GrantKey, actor: &ActorId) -> Self {
        Self::new(NoticeTone::Warning, "Role Removed (Revoked)")
            .with_field("User", user_mention(&key.subject_id))
            .with_field("Moderator", format!("<@{}>", actor))
            .with_field("Role", role_mention(key))
            .with_footer(ROLE_LOG_FOOTER)
    }

    /// Audit entry when the platform refused to remove an expiring role.
    /// The grant record is gone at this point; manual cleanup is needed.
    pub fn removal_failed_audit(key: &GrantKey, error: &GatewayError) -> Self {
        Self::new(NoticeTone::Error, "Role Removal Failed")
            .with_description("The grant record was cleared; remove the role manually.")
            .with_field("User", user_mention(&key.subject_id))
            .with_field("Role", role_mention(key))
            .with_field("Error", error.to_string())
            .with_footer(ROLE_LOG_FOOTER)
    }
}

fn user_mention(subject: &SubjectId) -> String {
    format!("<@{}>", subject)
}

fn role_mention(key: &GrantKey) -> String {
    format!("<@&{}>", key.capability_id)
}

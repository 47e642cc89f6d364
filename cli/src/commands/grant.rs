// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Temporary grant commands
//!
//! Commands: add, list, revoke

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Subcommand;
use colored::Colorize;

use rolekeeper_core::application::grant_lifecycle::{GrantRequest, RevokeOutcome};
use rolekeeper_core::domain::grant::{ActorId, GrantId, GrantKey, GrantRecord};

use crate::daemon::{check_daemon_running, DaemonClient, DaemonStatus};

#[derive(Subcommand)]
pub enum GrantCommand {
    /// Temporarily add a role to a member
    Add {
        /// Guild (server) ID
        #[arg(long, value_name = "GUILD_ID")]
        guild: String,

        /// Member to give the role to
        #[arg(long, value_name = "USER_ID")]
        user: String,

        /// Role to add
        #[arg(long, value_name = "ROLE_ID")]
        role: String,

        /// Duration (e.g., 7d, 24h, 60m)
        #[arg(long)]
        duration: String,

        /// The reason for adding the role
        #[arg(long)]
        reason: String,

        /// Moderator performing the grant
        #[arg(long, value_name = "USER_ID")]
        moderator: String,
    },

    /// List outstanding grants
    List {
        /// Only grants in this guild
        #[arg(long, value_name = "GUILD_ID")]
        guild: Option<String>,
    },

    /// Remove a temporary role before it expires
    Revoke {
        /// Grant ID
        #[arg(value_name = "GRANT_ID")]
        id: i64,

        /// Moderator performing the revocation
        #[arg(long, value_name = "USER_ID")]
        moderator: String,
    },
}

pub async fn handle_command(command: GrantCommand, host: &str, port: u16) -> Result<()> {
    if check_daemon_running(host, port).await? == DaemonStatus::Stopped {
        anyhow::bail!(
            "rolekeeper daemon is not reachable at {}:{}. Start it with `rolekeeper serve`.",
            host,
            port
        );
    }

    let client = DaemonClient::new(host, port)?;

    match command {
        GrantCommand::Add {
            guild,
            user,
            role,
            duration,
            reason,
            moderator,
        } => {
            let request = GrantRequest {
                key: GrantKey::new(guild, user, role),
                duration,
                reason,
                actor_id: ActorId::new(moderator),
            };
            add(&client, request).await
        }
        GrantCommand::List { guild } => list(&client, guild.as_deref()).await,
        GrantCommand::Revoke { id, moderator } => {
            revoke(&client, GrantId(id), ActorId::new(moderator)).await
        }
    }
}

async fn add(client: &DaemonClient, request: GrantRequest) -> Result<()> {
    let duration = request.duration.clone();
    let receipt = client
        .request_grant(&request)
        .await
        .context("Grant was not applied")?;

    println!(
        "{}",
        format!(
            "✓ Role {} added to {} for {} (grant {})",
            receipt.key.capability_id, receipt.key.subject_id, duration, receipt.id
        )
        .green()
    );
    println!("  Expires: {}", receipt.expires_at.to_rfc3339());

    Ok(())
}

async fn list(client: &DaemonClient, guild: Option<&str>) -> Result<()> {
    let grants = client.list_grants(guild).await?;

    if grants.is_empty() {
        println!("{}", "No outstanding grants".dimmed());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "{:<8} {:<20} {:<20} {:<20} {}",
            "ID", "GUILD", "USER", "ROLE", "EXPIRES"
        )
        .bold()
    );
    for grant in &grants {
        println!("{}", format_row(grant));
    }

    Ok(())
}

fn format_row(grant: &GrantRecord) -> String {
    let expires = grant.expires_at.to_rfc3339();
    let expires = if grant.is_due(Utc::now()) {
        format!("{} (overdue)", expires).yellow().to_string()
    } else {
        expires
    };

    format!(
        "{:<8} {:<20} {:<20} {:<20} {}",
        grant.id.0,
        grant.key.scope_id.as_str(),
        grant.key.subject_id.as_str(),
        grant.key.capability_id.as_str(),
        expires
    )
}

async fn revoke(client: &DaemonClient, id: GrantId, moderator: ActorId) -> Result<()> {
    let response = client.revoke_grant(id, &moderator).await?;

    match response.outcome {
        RevokeOutcome::Revoked => {
            println!("{}", format!("✓ Grant {} revoked", response.id).green());
        }
        RevokeOutcome::AlreadyExpiring => {
            println!(
                "{}",
                format!("Grant {} is already expiring", response.id).yellow()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_row_marks_overdue() {
        colored::control::set_override(false);
        let key = GrantKey::new("g1", "u1", "r1");

        let overdue = GrantRecord::new(GrantId(1), key.clone(), Utc::now() - Duration::hours(1));
        assert!(format_row(&overdue).ends_with("(overdue)"));

        let pending = GrantRecord::new(GrantId(2), key, Utc::now() + Duration::hours(1));
        assert!(!format_row(&pending).contains("overdue"));
    }
}

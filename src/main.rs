//! dm-sync-watch: follow a DM inbox from the terminal
//!
//! Environment:
//! - `DM_SYNC_SERVICE`: PDS URL (default `https://bsky.social`)
//! - `DM_SYNC_ACCESS_TOKEN`: access JWT for the account
//! - `DM_SYNC_DID`: DID of the account
//! - `DM_SYNC_CONFIG`: optional path to a JSON `SyncConfig`
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dm_sync::{SyncConfig, SyncEvent, SyncSession, XrpcChatApi, XrpcClientConfig};
use sync_state::EventKind;

const DEFAULT_SERVICE: &str = "https://bsky.social";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let service = std::env::var("DM_SYNC_SERVICE").unwrap_or_else(|_| DEFAULT_SERVICE.to_string());
    let token = std::env::var("DM_SYNC_ACCESS_TOKEN").context("DM_SYNC_ACCESS_TOKEN is not set")?;
    let did = std::env::var("DM_SYNC_DID").context("DM_SYNC_DID is not set")?;

    let config = match std::env::var("DM_SYNC_CONFIG") {
        Ok(path) => SyncConfig::load(&path)
            .await
            .with_context(|| format!("failed to load {}", path))?,
        Err(_) => SyncConfig::default(),
    };

    let api = XrpcChatApi::new(XrpcClientConfig::new(service).with_access_token(token));
    let session = SyncSession::new(Arc::new(api), config, did)?;

    let self_did = session.self_did().to_string();
    let _messages = session.event_bus().subscribe(EventKind::MessageReceived, move |event| {
        if let SyncEvent::MessageReceived { convo_id, message } = event {
            tracing::info!(%convo_id, sender = %message.sender_did, "{}", message.text);
        }
        Ok(())
    });

    let badge = session.badge().subscribe();
    let _list = session
        .event_bus()
        .subscribe(EventKind::ConversationListUpdated, move |event| {
            if let SyncEvent::ConversationListUpdated(snapshot) = event {
                let unread = *badge.borrow();
                for convo in snapshot.conversations().iter().filter(|c| c.has_unread()) {
                    let name = convo.other_participant_name(&self_did).unwrap_or(&convo.id);
                    tracing::info!(convo_id = %convo.id, unread = convo.unread_count, "{}", name);
                }
                tracing::info!(conversations = snapshot.len(), badge = %unread, "inbox synced");
            }
            Ok(())
        });

    let _failures = session.event_bus().subscribe(EventKind::PollFailed, |event| {
        if let SyncEvent::PollFailed {
            kind,
            attempt,
            will_retry,
            ..
        } = event
        {
            if *will_retry {
                tracing::warn!(%kind, attempt, "reconnecting");
            } else {
                tracing::error!(%kind, "sync halted; sign in again and restart");
            }
        }
        Ok(())
    });

    // A terminal watching the inbox is the conversation list surface
    session.app_activity().set_list_visible(true);
    session.start();

    tokio::signal::ctrl_c().await.context("failed to wait for ctrl-c")?;
    tracing::info!("shutting down");

    if let Some(err) = session.fatal_error() {
        tracing::error!(error = %err, "polling stopped after a fatal error");
    }
    session.sign_out();
    Ok(())
}

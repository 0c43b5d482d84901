//! Action resolution for notification activation
//!
//! When the user activates an entry, the engine maps it to a
//! kind-specific `ActionRequest` for the host shell's navigation layer
//! to execute. The engine never performs navigation itself; this module
//! is a pure, exhaustive mapping with no side effects.

use serde::{Deserialize, Serialize};

use crate::model::{Notification, NotificationPayload};

/// Settings tab targets reachable from a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingsTab {
    Updates,
    Badges,
}

/// Request handed to the external navigation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionRequest {
    /// Start watching the stream that just went live.
    OpenStream { channel: String },
    /// Open the whisper conversation with the sender.
    OpenConversation {
        login: String,
        conversation_id: String,
    },
    /// Jump to a settings tab (updates, badges).
    OpenSettingsTab { tab: SettingsTab },
    /// Open the drops inventory overlay.
    OpenDropsInventory { drop_id: String },
    /// Open the channel points balance overlay.
    OpenPointsSummary,
}

/// Resolve the activation action for a notification.
///
/// Test-flagged live notifications still resolve to `OpenStream`; the
/// host shell decides whether to honor them.
pub fn resolve_action(notification: &Notification) -> ActionRequest {
    match &notification.payload {
        NotificationPayload::Live { streamer, .. } => ActionRequest::OpenStream {
            channel: streamer.clone(),
        },
        NotificationPayload::Whisper {
            sender,
            conversation_id,
            ..
        } => ActionRequest::OpenConversation {
            login: sender.clone(),
            conversation_id: conversation_id.clone(),
        },
        NotificationPayload::Update { .. } => ActionRequest::OpenSettingsTab {
            tab: SettingsTab::Updates,
        },
        NotificationPayload::Drops { drop_id, .. } => ActionRequest::OpenDropsInventory {
            drop_id: drop_id.clone(),
        },
        NotificationPayload::ChannelPoints { .. } => ActionRequest::OpenPointsSummary,
        NotificationPayload::Badge { .. } => ActionRequest::OpenSettingsTab {
            tab: SettingsTab::Badges,
        },
    }
}

use std::collections::HashMap;

use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SecondsFormat, Utc};
use tracing::warn;
use uuid::Uuid;

use parley_db::models::{MessageRow, MessageSummaryRow};
use parley_types::api::{Claims, MarkReadResponse, SendMessageRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::{Message, MessageSummary};

use crate::AppState;
use crate::error::ApiError;

/// Fixed window for the recent-activity feed (no pagination cursor).
const RECENT_MESSAGES_LIMIT: u32 = 50;

/// `POST /messages/send/{receiver_id}`
///
/// Find-or-create the conversation, persist the message, then best-effort
/// push `newMessage` and a fresh `unreadCountUpdate` to the receiver's live
/// session. The created message is returned so the sender's client can append
/// it without waiting for any push.
pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sender_id = claims.sub;
    let content = req.message.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::InvalidInput("message must not be empty"));
    }

    // Run blocking DB work off the async runtime
    let db = state.clone();
    let body = content.clone();
    let message = tokio::task::spawn_blocking(move || {
        let conversation = db.db.find_or_create_conversation(
            &Uuid::new_v4().to_string(),
            &sender_id.to_string(),
            &receiver_id.to_string(),
        )?;

        let message_id = Uuid::new_v4();
        let created_at = Utc::now();
        db.db.insert_message(
            &message_id.to_string(),
            &conversation.id,
            &sender_id.to_string(),
            &receiver_id.to_string(),
            &body,
            &created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;

        Ok::<_, anyhow::Error>(Message {
            id: message_id,
            conversation_id: conversation.id.parse()?,
            sender_id,
            receiver_id,
            content: body,
            read: false,
            created_at,
        })
    })
    .await
    .map_err(|e| anyhow!("join error: {}", e))??;

    // Push to the receiver if online. Best-effort: an offline receiver learns
    // of the message on its next fetch.
    if state.presence.lookup(receiver_id).await.is_some() {
        state
            .presence
            .send_to_user(receiver_id, GatewayEvent::NewMessage(message.clone()))
            .await;

        // Recompute the receiver's unread count for this sender from the
        // store — the count is derived, never incremented.
        let db = state.clone();
        let unread = tokio::task::spawn_blocking(move || {
            db.db
                .count_unread_from(&sender_id.to_string(), &receiver_id.to_string())
        })
        .await
        .map_err(|e| anyhow!("join error: {}", e))??;

        state
            .presence
            .send_to_user(
                receiver_id,
                GatewayEvent::UnreadCountUpdate(HashMap::from([(sender_id, unread)])),
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /messages/{counterpart_id}` — full history for the pair, oldest
/// first. No conversation yet means an empty array, not an error.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = claims.sub;

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || {
        let Some(conversation) = db
            .db
            .find_conversation(&viewer_id.to_string(), &counterpart_id.to_string())?
        else {
            return Ok(vec![]);
        };
        db.db.messages_for_conversation(&conversation.id)
    })
    .await
    .map_err(|e| anyhow!("join error: {}", e))??;

    let messages: Vec<Message> = rows.into_iter().map(message_from_row).collect();
    Ok(Json(messages))
}

/// `PUT /messages/read/{counterpart_id}`
///
/// Bulk-flip every unread message from the counterpart to the viewer, then
/// push a read receipt to the counterpart and a zeroed unread count to the
/// viewer's own session.
pub async fn mark_messages_read(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = claims.sub;

    let db = state.clone();
    let conversation_id = tokio::task::spawn_blocking(move || {
        let Some(conversation) = db
            .db
            .find_conversation(&viewer_id.to_string(), &counterpart_id.to_string())?
        else {
            return Ok(None);
        };

        // Single set-based UPDATE; zero matched rows is a no-op, not an error
        db.db
            .mark_read_from(&counterpart_id.to_string(), &viewer_id.to_string())?;

        Ok::<_, anyhow::Error>(Some(conversation.id))
    })
    .await
    .map_err(|e| anyhow!("join error: {}", e))??
    .ok_or(ApiError::NotFound("conversation"))?;

    // Read receipt for the counterpart's UI
    let conversation_uuid: Uuid = conversation_id.parse().map_err(anyhow::Error::from)?;
    if state.presence.lookup(counterpart_id).await.is_some() {
        state
            .presence
            .send_to_user(
                counterpart_id,
                GatewayEvent::MessagesRead {
                    conversation_id: conversation_uuid,
                    read_by: viewer_id,
                },
            )
            .await;
    }

    // Zero the viewer's own badge immediately instead of waiting for a poll
    if state.presence.lookup(viewer_id).await.is_some() {
        state
            .presence
            .send_to_user(
                viewer_id,
                GatewayEvent::UnreadCountUpdate(HashMap::from([(counterpart_id, 0)])),
            )
            .await;
    }

    Ok(Json(MarkReadResponse {
        message: "Messages marked as read",
    }))
}

/// `GET /messages/unread/counts` — per-counterpart unread counts, recomputed
/// from the store on every call. Zero entries are included so every
/// conversation gets a badge slot.
pub async fn get_unread_counts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = claims.sub;

    let db = state.clone();
    let counts = tokio::task::spawn_blocking(move || {
        let viewer = viewer_id.to_string();
        let conversations = db.db.conversations_for_user(&viewer)?;

        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for conversation in conversations {
            let counterpart = if conversation.participant_a == viewer {
                conversation.participant_b
            } else {
                conversation.participant_a
            };
            let unread = db.db.count_unread_from(&counterpart, &viewer)?;
            if let Ok(counterpart_id) = counterpart.parse::<Uuid>() {
                counts.insert(counterpart_id, unread);
            }
        }
        Ok::<_, anyhow::Error>(counts)
    })
    .await
    .map_err(|e| anyhow!("join error: {}", e))??;

    Ok(Json(counts))
}

/// `GET /messages/recent/all` — the viewer's most recent messages across all
/// counterparts, newest first, enriched with display names.
pub async fn get_recent_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = claims.sub;

    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.db
            .recent_messages_for_user(&viewer_id.to_string(), RECENT_MESSAGES_LIMIT)
    })
    .await
    .map_err(|e| anyhow!("join error: {}", e))??;

    let summaries: Vec<MessageSummary> = rows.into_iter().map(summary_from_row).collect();
    Ok(Json(summaries))
}

fn message_from_row(row: MessageRow) -> Message {
    Message {
        id: parse_uuid(&row.id, "message id"),
        conversation_id: parse_uuid(&row.conversation_id, "conversation_id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        receiver_id: parse_uuid(&row.receiver_id, "receiver_id"),
        content: row.content,
        read: row.read,
        created_at: parse_timestamp(&row.created_at, &row.id),
    }
}

fn summary_from_row(row: MessageSummaryRow) -> MessageSummary {
    MessageSummary {
        id: parse_uuid(&row.id, "message id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        sender_name: row.sender_name,
        receiver_id: parse_uuid(&row.receiver_id, "receiver_id"),
        receiver_name: row.receiver_name,
        content: row.content,
        read: row.read,
        created_at: parse_timestamp(&row.created_at, &row.id),
    }
}

fn parse_uuid(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, value, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(value: &str, record_id: &str) -> chrono::DateTime<Utc> {
    value
        .parse::<chrono::DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') default stores "YYYY-MM-DD HH:MM:SS"
            // without a timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!(
                "Corrupt created_at '{}' on record '{}': {}",
                value, record_id, e
            );
            chrono::DateTime::default()
        })
}

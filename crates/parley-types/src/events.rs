use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent over the WebSocket gateway. The variant names are the wire
/// contract consumed by clients — do not rename them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename = "ready")]
    Ready { user_id: Uuid, username: String },

    /// A new message was sent to this user
    #[serde(rename = "newMessage")]
    NewMessage(Message),

    /// One or more per-counterpart unread counts changed for this user
    #[serde(rename = "unreadCountUpdate")]
    UnreadCountUpdate(HashMap<Uuid, u32>),

    /// The counterpart read this user's messages in a conversation
    #[serde(rename = "messagesRead")]
    MessagesRead {
        #[serde(rename = "conversationId")]
        conversation_id: Uuid,
        #[serde(rename = "readBy")]
        read_by: Uuid,
    },

    /// Full online-user list, broadcast on every connect/disconnect
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<Uuid>),
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}

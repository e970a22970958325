//! Chat traffic
//!
//! [`InboundEvent`] is a chat message as the transport hands it to the
//! router. [`Notification`] is everything the server says back, either
//! threaded under a message or sent to a user directly.

use serde::{Deserialize, Serialize};

use crate::types::{ChatId, MessageId, UserId};

/// A chat message delivered by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub user_id: UserId,
    pub username: Option<String>,
    pub text: String,
    /// Message this one replies to; commands target the post they reply to
    pub reply_to: Option<MessageId>,
    /// Sent on behalf of the chat's linked channel rather than a person.
    /// Channel-originated messages carry admin authority.
    pub via_channel: bool,
}

/// Outbound message the server wants delivered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    /// Threaded reply in the chat
    Reply {
        chat_id: ChatId,
        in_reply_to: MessageId,
        text: String,
    },
    /// Private message to one user
    Direct { user_id: UserId, text: String },
}

impl Notification {
    pub fn reply(chat_id: ChatId, in_reply_to: MessageId, text: impl Into<String>) -> Self {
        Notification::Reply {
            chat_id,
            in_reply_to,
            text: text.into(),
        }
    }

    pub fn direct(user_id: UserId, text: impl Into<String>) -> Self {
        Notification::Direct {
            user_id,
            text: text.into(),
        }
    }
}

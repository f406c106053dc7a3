//! JSON control frames exchanged over the chat WebSocket.
//!
//! Every frame is a JSON object tagged by its `type` field. Client frames are
//! decoded by hand rather than through a derived `Deserialize` so that each
//! rejection carries a precise reason back to the sender.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FrameError;
use crate::types::{ChatId, UserId};

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Binds the connection to a user identity.
    Auth { user_id: UserId },
    /// Sends a chat message.
    Message { chat_id: ChatId, content: String },
}

impl ClientFrame {
    /// Decode and validate a text frame.
    ///
    /// `max_content_len` is counted in characters, not bytes.
    pub fn parse(text: &str, max_content_len: usize) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
        let obj = value
            .as_object()
            .ok_or_else(|| FrameError::Malformed("expected a JSON object".into()))?;
        let kind = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| FrameError::Malformed("missing 'type' field".into()))?;

        match kind {
            "auth" => Ok(ClientFrame::Auth {
                user_id: UserId(integer_field(obj, "userId")?),
            }),
            "message" => {
                let chat_id = ChatId(integer_field(obj, "chatId")?);
                let content = obj
                    .get("content")
                    .and_then(Value::as_str)
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(FrameError::EmptyContent)?;
                if content.chars().count() > max_content_len {
                    return Err(FrameError::ContentTooLong {
                        max: max_content_len,
                    });
                }
                Ok(ClientFrame::Message {
                    chat_id,
                    content: content.to_string(),
                })
            }
            other => Err(FrameError::UnknownType(other.to_string())),
        }
    }
}

fn integer_field(obj: &Map<String, Value>, key: &'static str) -> Result<i64, FrameError> {
    obj.get(key)
        .and_then(Value::as_i64)
        .ok_or(FrameError::NotAnInteger(key))
}

/// Frames sent by the server. `M` is the message payload joined with its
/// sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame<M> {
    /// Delivered to the recipient's live connection.
    NewMessage { message: M },
    /// Confirms persistence to the sender.
    MessageSent { message: M },
    Error { message: String },
}

impl<M> ServerFrame<M> {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }

    pub fn payload(&self) -> Option<&M> {
        match self {
            ServerFrame::NewMessage { message } | ServerFrame::MessageSent { message } => {
                Some(message)
            }
            ServerFrame::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::NewMessage { .. } => "new_message",
            ServerFrame::MessageSent { .. } => "message_sent",
            ServerFrame::Error { .. } => "error",
        }
    }
}

impl<M: Serialize> ServerFrame<M> {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth() {
        let frame = ClientFrame::parse(r#"{"type":"auth","userId":7}"#, 100).unwrap();
        assert_eq!(frame, ClientFrame::Auth { user_id: UserId(7) });
    }

    #[test]
    fn test_parse_message() {
        let frame =
            ClientFrame::parse(r#"{"type":"message","chatId":3,"content":"привет"}"#, 100).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                chat_id: ChatId(3),
                content: "привет".into()
            }
        );
    }

    #[test]
    fn test_rejects_bad_message_fields() {
        assert_eq!(
            ClientFrame::parse(r#"{"type":"message","chatId":"3","content":"hi"}"#, 100),
            Err(FrameError::NotAnInteger("chatId"))
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"message","chatId":3,"content":"   "}"#, 100),
            Err(FrameError::EmptyContent)
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"message","chatId":3,"content":42}"#, 100),
            Err(FrameError::EmptyContent)
        );
        assert_eq!(
            ClientFrame::parse(r#"{"type":"message","chatId":3,"content":"abcdef"}"#, 5),
            Err(FrameError::ContentTooLong { max: 5 })
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            ClientFrame::parse("not json", 100),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            ClientFrame::parse("[1,2]", 100),
            Err(FrameError::Malformed(_))
        ));
        assert_eq!(
            ClientFrame::parse(r#"{"type":"typing"}"#, 100),
            Err(FrameError::UnknownType("typing".into()))
        );
    }

    #[test]
    fn test_server_frame_shape() {
        let frame: ServerFrame<serde_json::Value> = ServerFrame::error("nope");
        let json: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "nope");

        let sent = ServerFrame::MessageSent {
            message: serde_json::json!({"id": 1}),
        };
        let json: Value = serde_json::from_str(&sent.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "message_sent");
        assert_eq!(json["message"]["id"], 1);
    }
}

use serde::{Deserialize, Serialize};

use crate::errors::ChatApiError;

/// A user message to post to a chat session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub content: String,
}

impl MessageRequest {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
        }
    }
}

/// What the chat backend returns for an accepted message: the message id and
/// the one-shot stream URL carrying its answer. `stream_url` must be absolute;
/// implementations resolve relative paths against their base URL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHandle {
    pub message_id: String,
    pub stream_url: String,
}

/// Chat backend operations the stream pipeline depends on.
///
/// Session CRUD and message history are owned by the host application; this
/// seam only covers creating a message and learning where its answer streams.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    async fn create_message(&self, request: MessageRequest) -> Result<MessageHandle, ChatApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_handle_deserializes_backend_payload() {
        let handle: MessageHandle = serde_json::from_str(
            r#"{"message_id":"m-7","stream_url":"/api/messages/m-7/stream"}"#,
        )
        .expect("payload");
        assert_eq!(handle.message_id, "m-7");
        assert_eq!(handle.stream_url, "/api/messages/m-7/stream");
    }

    #[test]
    fn message_request_serializes_snake_case_fields() {
        let value = serde_json::to_value(MessageRequest::new("s-1", "hello")).expect("json");
        assert_eq!(value, serde_json::json!({"session_id": "s-1", "content": "hello"}));
    }
}

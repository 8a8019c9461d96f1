use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::classify::{NormalizedEventType, classify};
use crate::transport::SseFrame;

/// One content event as sent by the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    /// Text payload; meaning depends on the event type.
    #[serde(default)]
    pub content: String,
    /// Wire event-type tag, resolved by [`classify`].
    #[serde(default)]
    pub event_type: String,
    /// Stage hint from the server. Informational only; the classifier decides.
    #[serde(default)]
    pub stage: Option<u8>,
    /// Original structured event, when the backend forwards it.
    #[serde(default)]
    pub raw_json: Option<serde_json::Value>,
    /// Correlation id echoed by the server.
    #[serde(default)]
    pub message_id: Option<String>,
}

impl WireEvent {
    /// Creates a content event with the given tag and text.
    pub fn new(event_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            event_type: event_type.into(),
            stage: None,
            raw_json: None,
            message_id: None,
        }
    }

    /// Attaches a structured payload.
    pub fn with_raw_json(mut self, raw: serde_json::Value) -> Self {
        self.raw_json = Some(raw);
        self
    }

    /// Normalized type of this event.
    pub fn kind(&self) -> NormalizedEventType {
        classify(&self.event_type).0
    }
}

/// A decoded signal from the live transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// The server accepted the stream for a message.
    Start { message_id: Option<String> },
    /// A content event to classify and accumulate.
    Event(WireEvent),
    /// Keep-alive with no content.
    Heartbeat,
    /// Terminal success, optionally carrying metadata and final content.
    Complete {
        message_id: Option<String>,
        metadata: Option<CompletionMetadata>,
        content: Option<String>,
    },
    /// Terminal failure reported by the server.
    Error {
        message_id: Option<String>,
        message: Option<String>,
    },
    /// A frame that could not be decoded; shown raw in Stage 1.
    Malformed { raw: String, reason: String },
}

impl Inbound {
    /// Returns `true` for keep-alives, whether sent as a named SSE event or
    /// as a content event tagged `heartbeat`.
    pub fn is_heartbeat(&self) -> bool {
        match self {
            Self::Heartbeat => true,
            Self::Event(event) => event.kind() == NormalizedEventType::Heartbeat,
            _ => false,
        }
    }

    /// Returns `true` for the two terminal server signals.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

#[derive(Deserialize, Default)]
struct StartPayload {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Deserialize, Default)]
struct CompletePayload {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct ErrorPayload {
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Decodes one SSE frame into an inbound signal.
///
/// Returns `None` for frames that carry nothing (empty data on a content
/// frame). Never fails: undecodable content frames become
/// [`Inbound::Malformed`] so one bad line cannot end the session.
pub fn decode_frame(frame: &SseFrame) -> Option<Inbound> {
    let data = frame.data.trim();
    let event = frame
        .event
        .as_deref()
        .map(|e| e.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match event.as_str() {
        "start" => {
            let payload: StartPayload = parse_or_default(data, "start");
            Some(Inbound::Start {
                message_id: payload.message_id,
            })
        }
        "complete" | "done" => {
            let payload: CompletePayload = parse_or_default(data, "complete");
            Some(Inbound::Complete {
                message_id: payload.message_id,
                metadata: payload
                    .metadata
                    .as_ref()
                    .and_then(CompletionMetadata::from_json),
                content: payload.content,
            })
        }
        "error" => {
            let message = match serde_json::from_str::<ErrorPayload>(data) {
                Ok(payload) => {
                    return Some(Inbound::Error {
                        message_id: payload.message_id,
                        message: payload.error.or(payload.message),
                    });
                }
                Err(_) => (!data.is_empty()).then(|| data.to_string()),
            };
            Some(Inbound::Error {
                message_id: None,
                message,
            })
        }
        "heartbeat" | "ping" | "keepalive" => Some(Inbound::Heartbeat),
        _ => decode_content(data),
    }
}

fn decode_content(data: &str) -> Option<Inbound> {
    if data.is_empty() {
        return None;
    }
    match serde_json::from_str::<WireEvent>(data) {
        Ok(event) => Some(Inbound::Event(event)),
        Err(err) => {
            warn!(error = %err, bytes = data.len(), "dropping undecodable stream event");
            Some(Inbound::Malformed {
                raw: data.to_string(),
                reason: err.to_string(),
            })
        }
    }
}

fn parse_or_default<T: for<'de> Deserialize<'de> + Default>(data: &str, signal: &str) -> T {
    if data.is_empty() {
        return T::default();
    }
    serde_json::from_str(data).unwrap_or_else(|err| {
        warn!(signal, error = %err, "ignoring undecodable signal payload");
        T::default()
    })
}

/// A pointer from answer text back to previously ingested content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    /// Path fragment as cited in the answer.
    #[serde(alias = "file_path")]
    pub path: String,
    /// Resolved content item id, when the backend could match it.
    #[serde(default)]
    pub content_id: Option<String>,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Original URL of the ingested item.
    #[serde(default, alias = "url")]
    pub original_url: Option<String>,
    /// Original content type of the ingested item.
    #[serde(default)]
    pub content_type: Option<String>,
}

impl SourceCitation {
    fn with_title_fallback(mut self) -> Self {
        if self.title.trim().is_empty() {
            self.title = self
                .path
                .rsplit(['/', '\\'])
                .find(|segment| !segment.is_empty())
                .unwrap_or(&self.path)
                .to_string();
        }
        self
    }
}

/// Usage, timing, cost, and citation data reported for a finished answer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
    /// Wall-clock duration.
    pub duration_ms: Option<u64>,
    /// Time spent in the upstream model API.
    pub duration_api_ms: Option<u64>,
    pub cost_usd: Option<f64>,
    /// Provider-side correlation id.
    pub provider_session_id: Option<String>,
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub citations: Vec<SourceCitation>,
}

impl CompletionMetadata {
    /// Extracts metadata from either the flat completion shape or a provider
    /// result message (`usage` object, `total_cost_usd`, `session_id`).
    ///
    /// Returns `None` when the value carries none of the known fields.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let usage = value.get("usage");
        let metadata = Self {
            input_tokens: u64_field(value, usage, &["input_tokens"]),
            output_tokens: u64_field(value, usage, &["output_tokens"]),
            cache_read_tokens: u64_field(
                value,
                usage,
                &["cache_read_tokens", "cache_read_input_tokens"],
            ),
            cache_creation_tokens: u64_field(
                value,
                usage,
                &["cache_creation_tokens", "cache_creation_input_tokens"],
            ),
            duration_ms: u64_field(value, None, &["duration_ms"]),
            duration_api_ms: u64_field(value, None, &["duration_api_ms"]),
            cost_usd: ["cost_usd", "total_cost_usd"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_f64())),
            provider_session_id: ["provider_session_id", "session_id"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
                .map(ToOwned::to_owned),
            num_turns: u64_field(value, None, &["num_turns"])
                .and_then(|n| u32::try_from(n).ok()),
            citations: citations_from(value),
        };
        (metadata != Self::default()).then_some(metadata)
    }

    /// Overlays `other` onto `self`: fields present in `other` win, citations
    /// are replaced only when `other` carries some.
    pub fn merge(&mut self, other: CompletionMetadata) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.input_tokens, other.input_tokens);
        take(&mut self.output_tokens, other.output_tokens);
        take(&mut self.cache_read_tokens, other.cache_read_tokens);
        take(&mut self.cache_creation_tokens, other.cache_creation_tokens);
        take(&mut self.duration_ms, other.duration_ms);
        take(&mut self.duration_api_ms, other.duration_api_ms);
        take(&mut self.cost_usd, other.cost_usd);
        take(&mut self.provider_session_id, other.provider_session_id);
        take(&mut self.num_turns, other.num_turns);
        if !other.citations.is_empty() {
            self.citations = other.citations;
        }
    }

    /// Input plus output tokens, when either is known. Cache tokens are not
    /// counted.
    pub fn total_tokens(&self) -> Option<u64> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (input, output) => Some(input.unwrap_or(0) + output.unwrap_or(0)),
        }
    }
}

fn u64_field(
    value: &serde_json::Value,
    nested: Option<&serde_json::Value>,
    keys: &[&str],
) -> Option<u64> {
    keys.iter().find_map(|key| {
        value
            .get(*key)
            .and_then(|v| v.as_u64())
            .or_else(|| nested.and_then(|n| n.get(*key)).and_then(|v| v.as_u64()))
    })
}

fn citations_from(value: &serde_json::Value) -> Vec<SourceCitation> {
    let Some(items) = value.get("citations").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<SourceCitation>(item.clone()) {
            Ok(citation) => Some(citation.with_title_fallback()),
            Err(err) => {
                warn!(error = %err, "skipping malformed citation");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: Option<&str>, data: &str) -> SseFrame {
        SseFrame {
            event: event.map(ToOwned::to_owned),
            data: data.to_string(),
            ..SseFrame::default()
        }
    }

    #[test]
    fn start_frame_carries_message_id() {
        let inbound = decode_frame(&frame(Some("start"), r#"{"message_id":"m-1"}"#));
        assert_eq!(
            inbound,
            Some(Inbound::Start {
                message_id: Some("m-1".into())
            })
        );
    }

    #[test]
    fn unnamed_frame_decodes_content_event() {
        let inbound = decode_frame(&frame(
            None,
            r#"{"content":"Hello","event_type":"assistant","stage":2,"message_id":"m-1"}"#,
        ))
        .expect("event");
        let Inbound::Event(event) = inbound else {
            panic!("expected content event");
        };
        assert_eq!(event.content, "Hello");
        assert_eq!(event.kind(), NormalizedEventType::Assistant);
        assert_eq!(event.stage, Some(2));
    }

    #[test]
    fn undecodable_content_becomes_malformed() {
        let inbound = decode_frame(&frame(Some("message"), "not json {")).expect("inbound");
        assert!(matches!(inbound, Inbound::Malformed { raw, .. } if raw == "not json {"));
    }

    #[test]
    fn empty_content_frame_is_skipped() {
        assert_eq!(decode_frame(&frame(None, "  ")), None);
    }

    #[test]
    fn heartbeat_frames_and_events_are_heartbeats() {
        assert!(
            decode_frame(&frame(Some("heartbeat"), ""))
                .expect("heartbeat")
                .is_heartbeat()
        );
        let tagged = decode_frame(&frame(None, r#"{"event_type":"heartbeat"}"#)).expect("event");
        assert!(tagged.is_heartbeat());
        assert!(!tagged.is_terminal());
    }

    #[test]
    fn error_frame_accepts_json_and_plain_text() {
        assert_eq!(
            decode_frame(&frame(Some("error"), r#"{"message_id":"m","error":"quota exceeded"}"#)),
            Some(Inbound::Error {
                message_id: Some("m".into()),
                message: Some("quota exceeded".into())
            })
        );
        assert_eq!(
            decode_frame(&frame(Some("error"), "upstream timeout")),
            Some(Inbound::Error {
                message_id: None,
                message: Some("upstream timeout".into())
            })
        );
    }

    #[test]
    fn complete_frame_decodes_flat_metadata_and_citations() {
        let data = serde_json::json!({
            "message_id": "m-9",
            "metadata": {
                "input_tokens": 120,
                "output_tokens": 30,
                "duration_ms": 4200,
                "cost_usd": 0.0123,
                "num_turns": 2,
                "citations": [
                    {"path": "docs/guide/setup.md", "content_id": "c-1"},
                    {"file_path": "notes.txt", "title": "Meeting notes", "url": "https://example.com/n"},
                    {"title": "no path"}
                ]
            }
        })
        .to_string();
        let Some(Inbound::Complete {
            message_id,
            metadata: Some(metadata),
            ..
        }) = decode_frame(&frame(Some("complete"), &data))
        else {
            panic!("expected complete with metadata");
        };
        assert_eq!(message_id.as_deref(), Some("m-9"));
        assert_eq!(metadata.total_tokens(), Some(150));
        assert_eq!(metadata.duration_ms, Some(4200));
        assert_eq!(metadata.num_turns, Some(2));
        assert_eq!(metadata.citations.len(), 2);
        assert_eq!(metadata.citations[0].title, "setup.md");
        assert_eq!(metadata.citations[1].title, "Meeting notes");
        assert_eq!(
            metadata.citations[1].original_url.as_deref(),
            Some("https://example.com/n")
        );
    }

    #[test]
    fn provider_result_shape_is_understood() {
        let raw = serde_json::json!({
            "type": "result",
            "subtype": "success",
            "duration_ms": 9000,
            "duration_api_ms": 7000,
            "num_turns": 3,
            "session_id": "prov-abc",
            "total_cost_usd": 0.5,
            "usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_read_input_tokens": 100,
                "cache_creation_input_tokens": 7
            }
        });
        let metadata = CompletionMetadata::from_json(&raw).expect("metadata");
        assert_eq!(metadata.input_tokens, Some(10));
        assert_eq!(metadata.cache_read_tokens, Some(100));
        assert_eq!(metadata.cache_creation_tokens, Some(7));
        assert_eq!(metadata.duration_api_ms, Some(7000));
        assert_eq!(metadata.cost_usd, Some(0.5));
        assert_eq!(metadata.provider_session_id.as_deref(), Some("prov-abc"));
    }

    #[test]
    fn json_without_known_fields_has_no_metadata() {
        assert_eq!(
            CompletionMetadata::from_json(&serde_json::json!({"type": "assistant"})),
            None
        );
    }

    #[test]
    fn merge_keeps_existing_fields_not_present_in_update() {
        let mut base = CompletionMetadata {
            input_tokens: Some(1),
            cost_usd: Some(0.1),
            citations: vec![SourceCitation {
                path: "a.md".into(),
                content_id: None,
                title: "a.md".into(),
                original_url: None,
                content_type: None,
            }],
            ..CompletionMetadata::default()
        };
        base.merge(CompletionMetadata {
            output_tokens: Some(9),
            cost_usd: Some(0.2),
            ..CompletionMetadata::default()
        });
        assert_eq!(base.input_tokens, Some(1));
        assert_eq!(base.output_tokens, Some(9));
        assert_eq!(base.cost_usd, Some(0.2));
        assert_eq!(base.citations.len(), 1);
    }
}

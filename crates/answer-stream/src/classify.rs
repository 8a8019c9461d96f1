use std::fmt;

/// Normalized kind of a content event, independent of wire spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NormalizedEventType {
    /// Session start marker.
    Start,
    /// Plain initialization text from the backend.
    InitText,
    /// Structured system initialization (model, tools).
    SystemInit,
    /// Structured hook lifecycle event.
    SystemHook,
    /// Incremental token output from the model.
    StreamToken,
    /// Provisional assistant message.
    Assistant,
    /// Final result message.
    Result,
    /// Non-terminal error text reported inside the content stream.
    Error,
    /// Keep-alive with no content.
    Heartbeat,
    /// Anything not recognized above.
    Unknown,
}

impl NormalizedEventType {
    /// Returns the canonical snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::InitText => "init_text",
            Self::SystemInit => "system_init",
            Self::SystemHook => "system_hook",
            Self::StreamToken => "stream_token",
            Self::Assistant => "assistant",
            Self::Result => "result",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for NormalizedEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display stage an event's content belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Stage 1: transient process output shown in a collapsible log area.
    Expandable,
    /// Stage 2: the primary answer, rendered as rich text.
    Primary,
}

impl Stage {
    /// Wire number for this stage (`1` or `2`).
    pub fn number(self) -> u8 {
        match self {
            Self::Expandable => 1,
            Self::Primary => 2,
        }
    }
}

/// Maps a wire event-type tag to its normalized type and display stage.
///
/// Total and side-effect free: every input, including empty or unknown tags,
/// yields a value. Unknown tags land in `Stage::Expandable` so the user still
/// sees progress.
pub fn classify(wire_type: &str) -> (NormalizedEventType, Stage) {
    let kind = normalize(wire_type);
    let stage = match kind {
        NormalizedEventType::Assistant | NormalizedEventType::Result => Stage::Primary,
        _ => Stage::Expandable,
    };
    (kind, stage)
}

fn normalize(wire_type: &str) -> NormalizedEventType {
    let tag = wire_type.trim().to_ascii_lowercase();
    match tag.as_str() {
        "start" => NormalizedEventType::Start,
        "init_text" | "init" => NormalizedEventType::InitText,
        "system_init" => NormalizedEventType::SystemInit,
        "system_hook" | "hook_started" | "hook_response" => NormalizedEventType::SystemHook,
        "stream_token" | "token" | "stream_event" => NormalizedEventType::StreamToken,
        "assistant" => NormalizedEventType::Assistant,
        "result" => NormalizedEventType::Result,
        "error" => NormalizedEventType::Error,
        "heartbeat" | "ping" | "keepalive" => NormalizedEventType::Heartbeat,
        _ => NormalizedEventType::Unknown,
    }
}

/// Renders one Stage-1 log line for an event.
///
/// Structured system events get a short human-readable form built from their
/// `raw_json` payload; when the fields are missing the raw text is used.
pub fn format_stage1_line(
    kind: NormalizedEventType,
    content: &str,
    raw_json: Option<&serde_json::Value>,
) -> String {
    let formatted = raw_json.and_then(|raw| match kind {
        NormalizedEventType::SystemHook => format_hook(raw),
        NormalizedEventType::SystemInit => format_init(raw),
        _ => None,
    });
    match formatted {
        Some(line) => line,
        None if kind == NormalizedEventType::Error && !content.trim().is_empty() => {
            format!("[error] {}", content.trim_end())
        }
        None => content.trim_end_matches(['\r', '\n']).to_string(),
    }
}

fn format_hook(raw: &serde_json::Value) -> Option<String> {
    let name = str_field(raw, &["hook_name", "name", "hook"])?;
    let subtype = str_field(raw, &["subtype", "hook_event"]).unwrap_or_default();
    let outcome = str_field(raw, &["outcome", "decision", "status"]).or_else(|| {
        raw.get("exit_code")
            .and_then(|v| v.as_i64())
            .map(|code| format!("exit {code}"))
    });
    if subtype.ends_with("started") {
        return Some(format!("[hook] {name} started"));
    }
    match outcome {
        Some(outcome) => Some(format!("[hook] {name} \u{2192} {outcome}")),
        None if subtype.is_empty() => Some(format!("[hook] {name} started")),
        None => Some(format!("[hook] {name} finished")),
    }
}

fn format_init(raw: &serde_json::Value) -> Option<String> {
    let model = str_field(raw, &["model", "model_id"])?;
    Some(format!("[init] session ready (model: {model})"))
}

fn str_field(raw: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| raw.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(ToOwned::to_owned)
}

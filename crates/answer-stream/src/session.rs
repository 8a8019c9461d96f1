use tracing::{debug, warn};

use crate::classify::{NormalizedEventType, Stage, classify, format_stage1_line};
use crate::wire::{CompletionMetadata, Inbound, WireEvent};

/// Shown when the connection ends without a terminal signal.
pub const CONNECTION_LOST_MESSAGE: &str =
    "Connection to the answer stream was lost before the answer finished.";
/// Shown when the connection could not be opened.
pub const CONNECT_FAILED_MESSAGE: &str = "Could not connect to the answer stream.";
/// Shown when the server sends an error signal without a message.
pub const SERVER_ERROR_MESSAGE: &str = "The server reported an error while generating the answer.";
/// Shown when the idle timeout expires.
pub const IDLE_TIMEOUT_MESSAGE: &str = "The answer stream stopped responding.";

/// Lifecycle state of a stream session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Streaming,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    /// `Completed`, `Errored`, and `Cancelled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Cancelled)
    }

    /// `Connecting` and `Streaming` own a live connection.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }
}

/// Read-only view of a session, as presentation code sees it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionSnapshot {
    state: SessionState,
    message_id: Option<String>,
    stage1: Vec<String>,
    stage1_appended: usize,
    stage2: String,
    metadata: Option<CompletionMetadata>,
    error: Option<String>,
}

impl SessionSnapshot {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Stage-1 entries in arrival order.
    pub fn stage1_lines(&self) -> &[String] {
        &self.stage1
    }

    /// Number of Stage-1 entries appended this session, including any the
    /// line cap has since dropped. Readers that echo lines incrementally
    /// compare it with the count they have already shown.
    pub fn stage1_appended(&self) -> usize {
        self.stage1_appended
    }

    /// Stage-1 entries not yet seen by a reader that has consumed `seen`
    /// appended entries. Entries the cap dropped before the reader got to
    /// them are skipped.
    pub fn stage1_since(&self, seen: usize) -> &[String] {
        let unseen = self.stage1_appended.saturating_sub(seen);
        &self.stage1[self.stage1.len().saturating_sub(unseen)..]
    }

    /// Stage-1 entries joined, each newline-terminated. Plain text, never HTML.
    pub fn stage1_text(&self) -> String {
        let mut text = String::with_capacity(self.stage1.iter().map(|l| l.len() + 1).sum());
        for line in &self.stage1 {
            text.push_str(line);
            text.push('\n');
        }
        text
    }

    /// Current best-known primary answer. After completion this is the last
    /// known content.
    pub fn content(&self) -> &str {
        &self.stage2
    }

    pub fn metadata(&self) -> Option<&CompletionMetadata> {
        self.metadata.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_complete(&self) -> bool {
        self.state == SessionState::Completed
    }

    pub fn has_error(&self) -> bool {
        self.state == SessionState::Errored
    }

    /// Input plus output tokens reported so far.
    pub fn token_count(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(CompletionMetadata::total_tokens)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.metadata.as_ref().and_then(|m| m.duration_ms)
    }
}

/// Outcome of feeding one signal to a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The signal belongs to a superseded connection or arrived after a
    /// terminal state; the connection should stop.
    Stale,
    /// Accepted without changing anything visible (heartbeat, empty event).
    Ignored,
    /// Visible state changed.
    Updated,
    /// The session reached a terminal state with this signal.
    Terminal,
}

impl Applied {
    /// Whether subscribers need to be notified.
    pub fn changed(self) -> bool {
        matches!(self, Self::Updated | Self::Terminal)
    }
}

/// Stream session state machine.
///
/// Every mutation names the connection epoch it belongs to. `begin_connect`,
/// `reset`, and `cancel` move the epoch forward, so signals still in flight
/// from an older connection are rejected as [`Applied::Stale`].
#[derive(Clone, Debug, Default)]
pub struct StreamSession {
    snapshot: SessionSnapshot,
    epoch: u64,
    stage1_limit: Option<usize>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session that keeps at most `limit` Stage-1 lines.
    pub fn with_stage1_limit(limit: Option<usize>) -> Self {
        Self {
            stage1_limit: limit.filter(|l| *l > 0),
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.state
    }

    /// Current connection epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Starts a new connection. Returns its epoch, or `None` when a
    /// connection is already active. From a terminal state the previous
    /// session's buffers are discarded.
    pub fn begin_connect(&mut self) -> Option<u64> {
        if self.snapshot.state.is_active() {
            return None;
        }
        self.epoch += 1;
        self.snapshot = SessionSnapshot {
            state: SessionState::Connecting,
            ..SessionSnapshot::default()
        };
        Some(self.epoch)
    }

    /// Records that the transport for `epoch` is open.
    pub fn mark_open(&mut self, epoch: u64) -> Applied {
        if !self.accepts(epoch) {
            return Applied::Stale;
        }
        if self.snapshot.state == SessionState::Connecting {
            self.snapshot.state = SessionState::Streaming;
            return Applied::Updated;
        }
        Applied::Ignored
    }

    /// Applies one inbound signal from the connection with `epoch`.
    pub fn apply(&mut self, epoch: u64, inbound: Inbound) -> Applied {
        if !self.accepts(epoch) {
            return Applied::Stale;
        }
        match inbound {
            Inbound::Start { message_id } => {
                self.record_message_id(message_id);
                self.snapshot.state = SessionState::Streaming;
                Applied::Updated
            }
            Inbound::Heartbeat => Applied::Ignored,
            Inbound::Event(event) => self.apply_event(event),
            Inbound::Malformed { raw, reason } => {
                warn!(epoch, reason = %reason, "showing undecodable event as raw text");
                self.snapshot.state = SessionState::Streaming;
                if self.push_stage1(&raw) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
            Inbound::Complete {
                message_id,
                metadata,
                content,
            } => {
                self.record_message_id(message_id);
                if let Some(metadata) = metadata {
                    self.merge_metadata(metadata);
                }
                if let Some(content) = content.filter(|c| !c.is_empty()) {
                    self.snapshot.stage2 = content;
                }
                self.snapshot.state = SessionState::Completed;
                debug!(epoch, message_id = ?self.snapshot.message_id, "answer stream completed");
                Applied::Terminal
            }
            Inbound::Error {
                message_id,
                message,
            } => {
                self.record_message_id(message_id);
                let message = message
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| SERVER_ERROR_MESSAGE.to_string());
                self.finish_with_error(message);
                Applied::Terminal
            }
        }
    }

    /// Ends the connection with `epoch` as errored (transport failure,
    /// idle timeout).
    pub fn fail(&mut self, epoch: u64, message: impl Into<String>) -> Applied {
        if !self.accepts(epoch) {
            return Applied::Stale;
        }
        self.finish_with_error(message.into());
        Applied::Terminal
    }

    /// Marks a session errored before any connection existed (the stream URL
    /// could not be obtained).
    pub fn fail_request(&mut self, message: impl Into<String>) -> Applied {
        if self.snapshot.state.is_active() {
            return Applied::Ignored;
        }
        self.epoch += 1;
        self.snapshot = SessionSnapshot::default();
        self.finish_with_error(message.into());
        Applied::Terminal
    }

    /// Cancels the active connection, keeping buffers for display.
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&mut self) -> bool {
        if !self.snapshot.state.is_active() {
            return false;
        }
        self.epoch += 1;
        self.snapshot.state = SessionState::Cancelled;
        true
    }

    /// Restores every field to its initial value and invalidates any
    /// connection in flight.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.snapshot = SessionSnapshot::default();
    }

    fn accepts(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.snapshot.state.is_active()
    }

    fn apply_event(&mut self, event: WireEvent) -> Applied {
        let (kind, stage) = classify(&event.event_type);
        if let Some(hint) = event.stage
            && hint != stage.number()
        {
            debug!(event_type = %event.event_type, hint, classified = stage.number(), "stage hint differs from classification");
        }
        self.record_message_id(event.message_id);
        self.snapshot.state = SessionState::Streaming;

        if kind == NormalizedEventType::Heartbeat {
            return Applied::Ignored;
        }

        match stage {
            Stage::Primary => {
                // A later Stage-2 event supersedes an earlier one; an empty
                // payload (metadata-only result) keeps the last content.
                if !event.content.is_empty() || self.snapshot.stage2.is_empty() {
                    self.snapshot.stage2 = event.content;
                }
                if let Some(metadata) = event
                    .raw_json
                    .as_ref()
                    .and_then(CompletionMetadata::from_json)
                {
                    self.merge_metadata(metadata);
                }
                Applied::Updated
            }
            Stage::Expandable => {
                let line = format_stage1_line(kind, &event.content, event.raw_json.as_ref());
                if kind == NormalizedEventType::Start && line.trim().is_empty() {
                    return Applied::Updated;
                }
                if self.push_stage1(&line) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
        }
    }

    fn push_stage1(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return false;
        }
        self.snapshot.stage1.push(line.to_string());
        self.snapshot.stage1_appended += 1;
        if let Some(limit) = self.stage1_limit
            && self.snapshot.stage1.len() > limit
        {
            let excess = self.snapshot.stage1.len() - limit;
            self.snapshot.stage1.drain(..excess);
        }
        true
    }

    fn record_message_id(&mut self, message_id: Option<String>) {
        if let Some(id) = message_id.filter(|id| !id.trim().is_empty())
            && self.snapshot.message_id.is_none()
        {
            self.snapshot.message_id = Some(id);
        }
    }

    fn merge_metadata(&mut self, metadata: CompletionMetadata) {
        match self.snapshot.metadata.as_mut() {
            Some(existing) => existing.merge(metadata),
            None => self.snapshot.metadata = Some(metadata),
        }
    }

    fn finish_with_error(&mut self, message: String) {
        warn!(epoch = self.epoch, error = %message, "answer stream errored");
        self.snapshot.state = SessionState::Errored;
        self.snapshot.error = Some(message);
    }
}

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::config::StreamConfig;
use crate::errors::TransportError;
use crate::wire::{Inbound, decode_frame};

/// Stream of decoded inbound signals for one connection.
///
/// Dropping the stream closes the underlying connection.
pub type InboundStream =
    Pin<Box<dyn futures::Stream<Item = Result<Inbound, TransportError>> + Send + 'static>>;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Opens live event connections.
///
/// The session manager is written against this trait so tests and embedders
/// can substitute their own event source.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Opens a connection to `url` and returns its decoded signal stream.
    async fn open(&self, url: &str) -> Result<InboundStream, TransportError>;
}

/// Server-sent events over HTTP, backed by `reqwest`.
pub struct HttpEventTransport {
    client: reqwest::Client,
}

impl HttpEventTransport {
    /// Builds a transport from stream configuration.
    pub fn new(config: &StreamConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Setup(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wraps an existing client (shared connection pool, custom proxy or TLS).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl EventTransport for HttpEventTransport {
    async fn open(&self, url: &str) -> Result<InboundStream, TransportError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| TransportError::invalid_url(url, e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(TransportError::invalid_url(
                url,
                format!("unsupported scheme {:?}", parsed.scheme()),
            ));
        }
        debug!(url = %parsed, "opening answer stream");

        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| TransportError::request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(inbound_stream(bytes_stream)))
    }
}

fn inbound_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<Inbound, TransportError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<Inbound>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(inbound) = state.pending.pop_front() {
                    return Ok(Some((inbound, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        for frame in state.decoder.push_chunk(&chunk) {
                            if let Some(retry) = frame.retry {
                                debug!(?retry, "server suggested a reconnect delay");
                            }
                            state.pending.extend(decode_frame(&frame));
                        }
                    }
                    Some(Err(e)) => {
                        debug!(
                            last_event_id = ?state.decoder.last_event_id(),
                            "answer stream read failed"
                        );
                        return Err(TransportError::read(e.to_string()));
                    }
                    None => {
                        // A final frame without the trailing blank line still counts.
                        if let Some(frame) = state.decoder.finish() {
                            state.pending.extend(decode_frame(&frame));
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` name; `None` means the default `message` type.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// `id:` of this frame, when it set one.
    pub id: Option<String>,
    /// Reconnection delay the server asked for in this frame.
    pub retry: Option<Duration>,
}

impl SseFrame {
    fn is_empty(&self) -> bool {
        self.event.is_none() && self.data.is_empty() && self.id.is_none() && self.retry.is_none()
    }
}

/// Incremental server-sent events parser.
///
/// Input is consumed line by line as it arrives, so each byte is scanned
/// once however the stream is chunked. Lines may end in LF, CR, or CRLF,
/// including a CRLF split across two chunks. Comment lines and unknown
/// fields are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    after_cr: bool,
    pending: SseFrame,
    data_lines: usize,
    last_event_id: Option<String>,
}

impl SseDecoder {
    /// Feeds a chunk and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        let mut rest = chunk;
        if self.after_cr {
            self.after_cr = false;
            if let Some(tail) = rest.strip_prefix(b"\n") {
                rest = tail;
            }
        }
        while let Some(pos) = rest.iter().position(|b| matches!(b, b'\n' | b'\r')) {
            self.line.extend_from_slice(&rest[..pos]);
            let ended_with_cr = rest[pos] == b'\r';
            rest = &rest[pos + 1..];
            if ended_with_cr {
                match rest.strip_prefix(b"\n") {
                    Some(tail) => rest = tail,
                    None => self.after_cr = rest.is_empty(),
                }
            }
            frames.extend(self.end_line());
        }
        self.line.extend_from_slice(rest);
        frames
    }

    /// Flushes whatever is buffered once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.after_cr = false;
        if !self.line.is_empty() {
            if let Some(frame) = self.end_line() {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    /// Most recent `id:` seen on the stream. Persists across frames.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    fn end_line(&mut self) -> Option<SseFrame> {
        let line = std::mem::take(&mut self.line);
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(b":") {
            return None;
        }
        let line = String::from_utf8_lossy(&line);
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        match field {
            "event" => self.pending.event = Some(value.to_string()),
            "data" => {
                if self.data_lines > 0 {
                    self.pending.data.push('\n');
                }
                self.pending.data.push_str(value);
                self.data_lines += 1;
            }
            "id" if !value.contains('\0') => {
                self.pending.id = Some(value.to_string());
                self.last_event_id = Some(value.to_string());
            }
            "retry" => match value.parse::<u64>() {
                Ok(ms) => self.pending.retry = Some(Duration::from_millis(ms)),
                Err(_) => debug!(value, "ignoring invalid SSE retry field"),
            },
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        self.data_lines = 0;
        let frame = std::mem::take(&mut self.pending);
        (!frame.is_empty()).then_some(frame)
    }
}

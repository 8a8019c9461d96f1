//! Client-side pipeline for live, two-stage AI answer streams.
//!
//! A chat backend answers a message over a one-shot server-sent event stream.
//! Events are split into two display stages: transient process output
//! (Stage 1, shown as plain log lines) and the primary answer (Stage 2,
//! Markdown rendered to sanitized HTML). This crate owns the connection,
//! classifies and accumulates events, and renders the answer safely while it
//! is still being generated.
//!
//! # Usage
//!
//! ```no_run
//! use answer_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = StreamSessionManager::builder()
//!     .config(StreamConfig::from_env()?)
//!     .on_complete(|snapshot: &SessionSnapshot| {
//!         println!("answer finished: {:?}", snapshot.state());
//!     })
//!     .build()?;
//!
//! manager.connect("https://chat.example.com/api/messages/42/stream");
//!
//! let mut updates = manager.subscribe();
//! let _ = updates.wait_for(|session| session.snapshot().state().is_terminal()).await;
//!
//! let html = render(&manager.content(), manager.is_streaming());
//! println!("{html}");
//! # Ok(())
//! # }
//! ```

/// Chat API seam used to obtain a stream URL for a new message.
pub mod chat_api;
/// Wire event-type classification and Stage-1 line formatting.
pub mod classify;
/// Stream client configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Stream session manager owning the live connection.
pub mod manager;
/// Process-wide tracing setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Markdown rendering, code highlighting, and HTML sanitization.
pub mod render;
/// Stream session state machine.
pub mod session;
/// Event transports and the SSE frame decoder.
pub mod transport;
/// Wire payloads, inbound signals, and completion metadata.
pub mod wire;

pub use chat_api::{ChatApi, MessageHandle, MessageRequest};
pub use classify::{NormalizedEventType, Stage, classify, format_stage1_line};
pub use config::StreamConfig;
pub use errors::{ChatApiError, ConfigError, TransportError};
pub use manager::{CompletionCallback, StreamSessionManager, StreamSessionManagerBuilder};
pub use render::{Renderer, SanitizedHtml, render, sanitize};
pub use session::{Applied, SessionSnapshot, SessionState, StreamSession};
pub use transport::{EventTransport, HttpEventTransport, InboundStream};
pub use wire::{CompletionMetadata, Inbound, SourceCitation, WireEvent};

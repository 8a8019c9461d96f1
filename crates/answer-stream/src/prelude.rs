//! Common imports for typical answer-stream usage.
//!
//! Presentation code usually needs the manager, its snapshot type, the
//! renderer entry point, and configuration; this module gathers them.
pub use crate::{
    ChatApi, CompletionMetadata, MessageHandle, MessageRequest, Renderer, SanitizedHtml,
    SessionSnapshot, SessionState, SourceCitation, StreamConfig, StreamSessionManager, render,
};

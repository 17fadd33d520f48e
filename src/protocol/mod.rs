//! Query channel protocol.
//!
//! This module defines how requests and responses are laid out on a raw
//! byte stream shared by the pooled client and the listening server.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Framing |
//! |---------|-----------|---------|
//! | [`QueryRequest`] | Client → Server | start marker, JSON, end marker |
//! | Response | Server → Client | JSON, end marker |
//!
//! One connection carries one request at a time. The client writes a
//! request frame and reads until the end marker; the server reads a
//! request frame, runs the executor, and writes the response frame.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Markers, incremental decoder, frame writer |
//! | `request` | Request payload and response envelope helpers |

// ============================================================================
// Submodules
// ============================================================================

/// Delimiter framing.
pub mod frame;

/// Request and response payloads.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{END_MARKER, FrameDecoder, FrameKind, MAX_FRAME_LEN, START_MARKER, write_frame};
pub use request::{QueryRequest, error_payload, into_data};

//! # courier-wire
//!
//! The wire layer of the courier protocol: a compact little-endian binary
//! frame format and the fixed-length random identifiers used for
//! request/reply correlation.
//!
//! - Frames travel as discrete binary messages; see [`Frame`] for the layout
//! - Decoding malformed input yields a [`DecodeError`], never a panic
//! - [`MessageId`] renders into a printable, topic-safe alphabet

#![deny(unsafe_code)]

pub mod frame;
pub mod msgid;

pub use frame::{DecodeError, Frame, FrameKind, HEADER_LEN, pong_reply};
pub use msgid::{MESSAGE_ID_LEN, MessageId, render_bytes};

//! # v8bridge-core
//!
//! Protocol plumbing shared by the bridge server:
//!
//! - [`framing`]: `Content-Length` framed reader/writer for the debuggee byte stream
//! - [`messages`]: front-end and debuggee wire types
//! - [`translator`]: pure mapping between the two vocabularies
//! - [`correlation`]: in-flight sequence tracking for responses
//! - [`summarize`]: compact value rendering for log lines
//! - [`errors`]: the bridge error taxonomy

#![deny(unsafe_code)]

pub mod correlation;
pub mod errors;
pub mod framing;
pub mod ids;
pub mod messages;
pub mod summarize;
pub mod translator;

pub use errors::{BridgeError, Result};
pub use framing::{encode_frame, Frame, FrameReader, V8Codec};
pub use ids::SessionId;
pub use messages::{DebuggeeCommand, DebuggeeMessage, FrontendMessage, FrontendRequest};
pub use translator::{LocalCommand, RequestTranslation};

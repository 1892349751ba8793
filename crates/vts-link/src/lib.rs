//! WebSocket client for a local avatar host's control API.
//!
//! The avatar host (VTube Studio or compatible) exposes a JSON-over-WebSocket
//! API for authenticating plugins and triggering model actions: hotkeys,
//! expression presets, and tracking-parameter injection. This crate provides a
//! typed client around that API with a correlation-id-keyed pending-request
//! table, so concurrent in-flight requests resolve to their own responses.

pub mod client;
pub mod error;
pub mod protocol;

pub use client::{SpeakingCues, VtsClient};
pub use error::VtsError;
pub use protocol::{ApiStateData, ParameterValue, PluginInfo};

//! Skill endpoints and the parent-side client
//!
//! [`SkillHttpAdapter`] and [`SkillWebSocketAdapter`] expose a bot as a skill over
//! HTTP and WebSocket; [`SkillHttpClient`] is what a parent uses to reach one.

pub mod client;
pub mod http;
pub mod websocket;

pub use client::{SkillHttpClient, FORWARD_ERROR_TRACE};
pub use http::{ForwardService, SkillHttpAdapter, SkillHttpService};
pub use websocket::{SkillWebSocketAdapter, SkillWebSocketRequestHandler};

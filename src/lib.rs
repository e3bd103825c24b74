//! # Tower Skill
//!
//! A Tower-based transport for skill bots: child bots that a parent "assistant" bot
//! hands a conversation to, over HTTP, over a persistent WebSocket, or in-process.
//!
//! The crate translates between the turn abstractions a bot is written against
//! ([`turn::TurnContext`], [`turn::Bot`], [`turn::BotAdapter`]) and wire bytes.
//!
//! ## Features
//!
//! - **HTTP**: one POST per activity; the response body carries every activity the bot
//!   produced during the turn
//! - **WebSocket**: framed, correlated requests in both directions over one socket
//! - **In-process**: a router and dialog that run skills inside the parent process
//! - **Composable**: authentication as a Tower layer, middleware around every turn
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use tower_skill::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Bot for Echo {
//!     async fn on_turn(&self, ctx: &TurnContext) -> SkillResult<()> {
//!         let text = ctx.activity().text.clone().unwrap_or_default();
//!         ctx.send_text(format!("You said: {}", text)).await?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = SkillHttpAdapter::new(SkillHttpBotAdapter::new());
//!
//!     let request = hyper::Request::post("/api/skill/messages")
//!         .body(Bytes::from_static(br#"{"type":"message","text":"hi"}"#))?;
//!     let response = adapter.forward(request, Arc::new(Echo)).await?;
//!     println!("{}", String::from_utf8_lossy(response.body()));
//!
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod codec;
pub mod config;
pub mod layer;
pub mod middleware;
pub mod protocol;
pub mod router;
pub mod service;
pub mod telemetry;
pub mod transport;
pub mod turn;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        adapter::{InProcessAdapter, SkillHttpBotAdapter, SkillWebSocketBotAdapter},
        config::{SkillClientConfig, SkillsConfig},
        layer::{AuthCredentials, AuthGate, Authenticator},
        middleware::{Middleware, MiddlewareSet, Next},
        protocol::{
            Activity, ActivityType, ConversationReference, InvokeResponse, ResourceResponse,
            SkillError, SkillManifest, SkillRegistration, SkillResult,
        },
        router::{
            DialogTurnResult, MemoryStorage, SkillDialog, SkillDialogState, SkillFactory,
            SkillRouter, Storage,
        },
        service::{SkillHttpAdapter, SkillHttpClient, SkillWebSocketAdapter},
        transport::{HttpTransport, StreamingConnection},
        turn::{Bot, BotAdapter, TurnContext},
    };
}

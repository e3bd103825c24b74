//! Ordered middleware pipeline run around every turn

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    protocol::error::SkillResult,
    turn::{Bot, TurnContext},
};

/// A step in the turn pipeline
///
/// Call `next.run(ctx)` to continue the chain; returning without calling it
/// short-circuits the remaining middleware and the bot.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn on_turn(&self, ctx: &TurnContext, next: Next<'_>) -> SkillResult<()>;
}

/// Continuation running the rest of the pipeline and then the bot
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    bot: &'a dyn Bot,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &TurnContext) -> SkillResult<()> {
        match self.remaining.split_first() {
            Some((head, rest)) => {
                head.on_turn(
                    ctx,
                    Next {
                        remaining: rest,
                        bot: self.bot,
                    },
                )
                .await
            }
            None => self.bot.on_turn(ctx).await,
        }
    }
}

/// Ordered set of middleware shared by an adapter
#[derive(Clone, Default)]
pub struct MiddlewareSet {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware to the end of the pipeline
    pub fn use_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Run every middleware in order, then the bot
    pub async fn run(&self, ctx: &TurnContext, bot: &dyn Bot) -> SkillResult<()> {
        Next {
            remaining: &self.middleware,
            bot,
        }
        .run(ctx)
        .await
    }
}

impl std::fmt::Debug for MiddlewareSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareSet")
            .field("len", &self.middleware.len())
            .finish()
    }
}

//! Transport boundary
//!
//! The engine never talks to the messaging provider directly; it goes through
//! the [`Transport`] trait, and every provider-side failure arrives as an
//! in-band [`SendError`] value. The taxonomy distinguishes:
//!
//! - flood-wait: throttling-retriable, carries the provider's suggested delay
//! - privacy block: permanent for this recipient, unrelated to rate limiting
//! - generic failure: anything else the provider reports

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::status::{BotId, RecipientId};

/// Failure reported by the send transport for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Provider-side throttling; retriable after the given delay.
    #[error("flood wait, retry after {retry_after:?}")]
    FloodWait { retry_after: Duration },

    /// The recipient's privacy settings refuse messages from this sender.
    /// Permanent for this recipient.
    #[error("recipient privacy settings block this message")]
    PrivacyBlocked,

    /// Any other provider failure.
    #[error("send failed: {0}")]
    Failed(String),
}

impl SendError {
    /// Returns `true` if this error is retriable after a delay.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::FloodWait { .. })
    }

    /// Returns `true` if this error is permanent for the recipient.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::PrivacyBlocked)
    }
}

/// Opaque "send one message via a specific identity" operation.
///
/// Implemented outside this engine (the chat front-end owns the actual
/// provider session). Implementations must be safe to call from many workers
/// concurrently.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send `text` to `recipient` using the sender identity `bot`.
    ///
    /// # Errors
    /// Returns a [`SendError`] describing the provider-side failure. The
    /// transport is expected to bound its own call duration; this engine
    /// imposes no timeout here.
    async fn send(
        &self,
        bot: BotId,
        recipient: RecipientId,
        text: &str,
    ) -> Result<(), SendError>;
}

//! Narrative thesis generation.
//!
//! The synthesizer is an opaque text capability: it is consulted after
//! every deterministic gate has passed, under a timeout, and is never a
//! source of numbers. A failed or slow synthesis leaves the thesis empty
//! rather than blocking a valid recommendation.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::quant::TrendDirection;
use crate::utils::decimal::round_half_up;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("synthesis backend error: {0}")]
    Backend(String),
}

/// Numbers already validated by the pipeline, handed over for narration.
#[derive(Debug, Clone)]
pub struct ThesisContext {
    pub ticker: String,
    pub price: Decimal,
    pub rsi_14: Decimal,
    pub trend: TrendDirection,
    pub iv_natr_ratio: Decimal,
    pub expected_move_1sd: Decimal,
    pub strike: Decimal,
    pub delta: Decimal,
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, ctx: &ThesisContext) -> Result<String, SynthesisError>;
}

/// Deterministic template rendered from the validated numbers.
pub struct StubSynthesizer;

#[async_trait]
impl Synthesizer for StubSynthesizer {
    async fn synthesize(&self, ctx: &ThesisContext) -> Result<String, SynthesisError> {
        let trend = format!("{:?}", ctx.trend).to_lowercase();
        Ok(format!(
            "{} price {}, RSI {}, trend {}. IV/NATR ratio {}. Expected move (1-SD) {}. \
             Strike {} at delta {}; outside 1-SD for premium sell.",
            ctx.ticker,
            ctx.price,
            ctx.rsi_14,
            trend,
            round_half_up(ctx.iv_natr_ratio, 2),
            round_half_up(ctx.expected_move_1sd, 2),
            ctx.strike,
            ctx.delta,
        ))
    }
}

/// Run synthesis under a deadline. Timeouts and backend errors are
/// logged and collapse to `None`.
pub async fn synthesize_with_timeout(
    synthesizer: &dyn Synthesizer,
    ctx: &ThesisContext,
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, synthesizer.synthesize(ctx)).await {
        Ok(Ok(thesis)) => Some(thesis),
        Ok(Err(e)) => {
            warn!(ticker = %ctx.ticker, error = %e, "thesis synthesis failed");
            None
        }
        Err(_) => {
            warn!(ticker = %ctx.ticker, timeout_secs = timeout.as_secs(), "thesis synthesis timed out");
            None
        }
    }
}

//! Batch runner: the single-ticker pipeline replayed across the
//! configured universe under shared rate limiting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::UniverseConfig;

use super::{universe, AnalysisError, AnalysisReport, Analyzer};

/// One universe ticker's outcome. A fetch failure is recorded here and
/// never aborts the rest of the run.
#[derive(Debug, Serialize)]
pub struct BatchEntry {
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<AnalysisReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    /// Reason a global gate suppressed the whole run, if one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<String>,
    pub results: Vec<BatchEntry>,
}

impl Analyzer {
    /// Run the pipeline across the universe. A macro event inside the
    /// lookahead window blocks the whole run up front; per-ticker fetch
    /// failures are isolated.
    pub async fn run_batch(
        &self,
        universe_config: &UniverseConfig,
        now: DateTime<Utc>,
    ) -> Result<BatchReport, AnalysisError> {
        self.limiter.acquire().await?;
        let events = self
            .macro_calendar
            .high_impact_events(self.thresholds.macro_lookahead_hours)
            .await?;
        let cutoff = now + ChronoDuration::hours(self.thresholds.macro_lookahead_hours);
        if let Some(event) = events
            .iter()
            .find(|e| e.start_time >= now && e.start_time <= cutoff)
        {
            let reason = format!(
                "macro gate: {} within {}h",
                event.name, self.thresholds.macro_lookahead_hours
            );
            info!(%reason, "batch run suppressed");
            return Ok(BatchReport {
                blocked: Some(reason),
                results: Vec::new(),
            });
        }

        let tickers: Vec<String> = if universe_config.tickers.is_empty() {
            universe::DEFAULT_UNIVERSE
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else {
            universe_config.tickers.clone()
        };
        let capped = tickers.len().min(universe_config.max_batch_tickers);

        let mut results = Vec::with_capacity(capped);
        for ticker in &tickers[..capped] {
            match self.analyze(ticker, now).await {
                Ok(report) => results.push(BatchEntry {
                    ticker: ticker.clone(),
                    report: Some(report),
                    error: None,
                }),
                Err(AnalysisError::Provider(e)) => {
                    warn!(ticker = %ticker, error = %e, "ticker skipped in batch run");
                    results.push(BatchEntry {
                        ticker: ticker.clone(),
                        report: None,
                        error: Some(e.to_string()),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        info!(tickers = results.len(), "batch run complete");
        Ok(BatchReport {
            blocked: None,
            results,
        })
    }
}

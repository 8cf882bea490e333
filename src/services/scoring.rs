//! Submission scoring: external oracle verdicts scaled by checkpoint weights,
//! with a proportional fallback when the oracle is over budget or degraded.

use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::dao::models::{
    DimensionScores, MAX_DIMENSION_POINTS, OracleDimensions, ScoringBreakdown, ScoringMethod,
};

/// Feedback stored with every fallback-scored submission.
pub const FALLBACK_FEEDBACK: &str =
    "Thanks for your submission! Your mission has been recorded and scored.";

/// Highest overall score an oracle may return.
const MAX_ORACLE_SCORE: f64 = 100.0;

/// Context sent to the oracle for one submission.
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    /// Mission title shown to the team.
    pub mission_title: String,
    /// Mission instructions the answer responds to.
    pub mission_description: String,
    /// Trimmed text answer, if any.
    pub answer: Option<String>,
    /// Uploaded photo, if any.
    pub photo_url: Option<String>,
    /// Checkpoint weight caps.
    pub weights: DimensionScores,
}

/// Raw oracle reply, range-checked by [`validate_verdict`] before use.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleVerdict {
    /// Overall score, expected in `0..=100`.
    pub score: f64,
    /// Per-dimension scores, expected in `0..=25`.
    pub breakdown: OracleDimensions,
    /// Narrative feedback for the team.
    #[serde(default)]
    pub feedback: String,
}

/// Oracle verdict with every value inside its allowed range.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidVerdict {
    /// Overall score rounded for display.
    pub score: u32,
    /// Dimension scores kept unrounded until they are scaled.
    pub dimensions: OracleDimensions,
    /// Narrative feedback for the team.
    pub feedback: String,
}

/// Reasons the oracle could not be used; always absorbed by the fallback path.
#[derive(Debug, Error)]
pub enum OracleError {
    /// No oracle URL was configured.
    #[error("no scoring oracle configured")]
    NotConfigured,
    /// The oracle exceeded its time budget.
    #[error("scoring oracle did not answer within {0:?}")]
    Timeout(Duration),
    /// HTTP transport or decoding failure.
    #[error("scoring oracle request failed")]
    Transport(#[from] reqwest::Error),
    /// The reply was outside the allowed ranges.
    #[error("scoring oracle returned an invalid verdict: {0}")]
    InvalidVerdict(String),
}

/// Opaque external evaluator of submissions.
pub trait ScoringOracle: Send + Sync {
    /// Score one submission.
    fn evaluate(&self, request: OracleRequest) -> BoxFuture<'static, Result<OracleVerdict, OracleError>>;
}

/// Oracle reached over HTTP with a JSON request/response.
pub struct HttpScoringOracle {
    client: reqwest::Client,
    url: String,
}

impl HttpScoringOracle {
    /// Oracle posting requests to `url`.
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl ScoringOracle for HttpScoringOracle {
    fn evaluate(&self, request: OracleRequest) -> BoxFuture<'static, Result<OracleVerdict, OracleError>> {
        let client = self.client.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let verdict = client
                .post(&url)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json::<OracleVerdict>()
                .await?;
            Ok(verdict)
        })
    }
}

/// Stand-in used when no oracle URL is configured.
pub struct DisabledOracle;

impl ScoringOracle for DisabledOracle {
    fn evaluate(&self, _request: OracleRequest) -> BoxFuture<'static, Result<OracleVerdict, OracleError>> {
        Box::pin(async { Err(OracleError::NotConfigured) })
    }
}

fn dimension(name: &str, value: f64) -> Result<f64, OracleError> {
    if !value.is_finite() || !(0.0..=f64::from(MAX_DIMENSION_POINTS)).contains(&value) {
        return Err(OracleError::InvalidVerdict(format!(
            "{name} must be within 0..={MAX_DIMENSION_POINTS}, got {value}"
        )));
    }
    Ok(value)
}

/// Range-check an oracle reply.
pub fn validate_verdict(verdict: OracleVerdict) -> Result<ValidVerdict, OracleError> {
    if !verdict.score.is_finite() || !(0.0..=MAX_ORACLE_SCORE).contains(&verdict.score) {
        return Err(OracleError::InvalidVerdict(format!(
            "score must be within 0..=100, got {}",
            verdict.score
        )));
    }

    let b = &verdict.breakdown;
    Ok(ValidVerdict {
        score: verdict.score.round() as u32,
        dimensions: OracleDimensions {
            connection: dimension("connection", b.connection)?,
            meaning: dimension("meaning", b.meaning)?,
            joy: dimension("joy", b.joy)?,
            growth: dimension("growth", b.growth)?,
        },
        feedback: verdict.feedback,
    })
}

/// Points earned per dimension from an oracle verdict: `round(d / 25 * weight)`.
pub fn oracle_earned(verdict: OracleDimensions, weights: DimensionScores) -> DimensionScores {
    verdict.scale(weights)
}

/// Points earned per dimension without an oracle: `round(weight * factor)`.
pub fn fallback_earned(weights: DimensionScores, factor: f64) -> DimensionScores {
    weights.map(|w| (f64::from(w) * factor).round() as u32)
}

/// Outcome of scoring one submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    /// Method and per-dimension detail stored with the submission.
    pub breakdown: ScoringBreakdown,
    /// Sum of the earned dimensions.
    pub gms_earned: u32,
    /// Oracle feedback or [`FALLBACK_FEEDBACK`].
    pub feedback: String,
}

/// Knobs driving [`score_submission`].
#[derive(Debug, Clone, Copy)]
pub struct ScoringPolicy {
    /// Prior submissions after which the oracle is skipped.
    pub oracle_budget: u64,
    /// Time budget for one oracle call.
    pub oracle_timeout: Duration,
    /// Share of each weight granted by the fallback.
    pub fallback_factor: f64,
}

/// Score a submission, consulting the oracle while the team is within budget.
pub async fn score_submission(
    oracle: &dyn ScoringOracle,
    policy: ScoringPolicy,
    request: OracleRequest,
    prior_submissions: u64,
) -> ScoreOutcome {
    let weights = request.weights;

    if prior_submissions < policy.oracle_budget {
        match evaluate_with_budget(oracle, request, policy.oracle_timeout).await {
            Ok(verdict) => {
                let earned = oracle_earned(verdict.dimensions, weights);
                return ScoreOutcome {
                    breakdown: ScoringBreakdown {
                        method: ScoringMethod::Oracle,
                        ai_score: Some(verdict.score),
                        oracle: Some(verdict.dimensions),
                        earned,
                    },
                    gms_earned: earned.total(),
                    feedback: verdict.feedback,
                };
            }
            Err(OracleError::NotConfigured) => debug!("no scoring oracle configured"),
            Err(err) => warn!(error = %err, "scoring oracle degraded; using fallback scoring"),
        }
    } else {
        debug!(
            prior_submissions,
            budget = policy.oracle_budget,
            "oracle budget reached; using fallback scoring"
        );
    }

    let earned = fallback_earned(weights, policy.fallback_factor);
    ScoreOutcome {
        breakdown: ScoringBreakdown {
            method: ScoringMethod::Fallback,
            ai_score: None,
            oracle: None,
            earned,
        },
        gms_earned: earned.total(),
        feedback: FALLBACK_FEEDBACK.to_string(),
    }
}

async fn evaluate_with_budget(
    oracle: &dyn ScoringOracle,
    request: OracleRequest,
    limit: Duration,
) -> Result<ValidVerdict, OracleError> {
    let verdict = timeout(limit, oracle.evaluate(request))
        .await
        .map_err(|_| OracleError::Timeout(limit))??;
    validate_verdict(verdict)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// Oracle answering with a fixed verdict, optionally after a delay.
    pub(crate) struct StubOracle {
        pub verdict: Option<(f64, [f64; 4])>,
        pub delay: Duration,
        pub calls: Arc<AtomicUsize>,
    }

    impl StubOracle {
        pub(crate) fn answering(score: f64, dims: [f64; 4]) -> Self {
            Self {
                verdict: Some((score, dims)),
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                verdict: None,
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ScoringOracle for StubOracle {
        fn evaluate(&self, _request: OracleRequest) -> BoxFuture<'static, Result<OracleVerdict, OracleError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let verdict = self.verdict;
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                let (score, [connection, meaning, joy, growth]) =
                    verdict.ok_or_else(|| OracleError::InvalidVerdict("stub failure".into()))?;
                Ok(OracleVerdict {
                    score,
                    breakdown: OracleDimensions {
                        connection,
                        meaning,
                        joy,
                        growth,
                    },
                    feedback: "Lovely teamwork".into(),
                })
            })
        }
    }

    const POLICY: ScoringPolicy = ScoringPolicy {
        oracle_budget: 20,
        oracle_timeout: Duration::from_secs(8),
        fallback_factor: 0.6,
    };

    fn request(weights: DimensionScores) -> OracleRequest {
        OracleRequest {
            mission_title: "Statue".into(),
            mission_description: "Find the statue".into(),
            answer: Some("Found it".into()),
            photo_url: None,
            weights,
        }
    }

    fn dims(connection: f64, meaning: f64, joy: f64, growth: f64) -> OracleDimensions {
        OracleDimensions {
            connection,
            meaning,
            joy,
            growth,
        }
    }

    #[test]
    fn oracle_verdict_is_scaled_by_weights() {
        let earned = oracle_earned(
            dims(25.0, 12.0, 0.0, 10.0),
            DimensionScores::new(20, 15, 10, 20),
        );
        assert_eq!(earned, DimensionScores::new(20, 7, 0, 8));
        assert_eq!(earned.total(), 35);
    }

    #[test]
    fn fallback_uses_factor() {
        let earned = fallback_earned(DimensionScores::new(20, 15, 10, 20), 0.6);
        assert_eq!(earned, DimensionScores::new(12, 9, 6, 12));
    }

    #[test]
    fn out_of_range_verdicts_are_rejected() {
        let verdict = |score: f64, connection: f64| OracleVerdict {
            score,
            breakdown: OracleDimensions {
                connection,
                meaning: 1.0,
                joy: 1.0,
                growth: 1.0,
            },
            feedback: String::new(),
        };
        assert!(validate_verdict(verdict(50.0, 26.0)).is_err());
        assert!(validate_verdict(verdict(50.0, -1.0)).is_err());
        assert!(validate_verdict(verdict(101.0, 5.0)).is_err());
        assert!(validate_verdict(verdict(f64::NAN, 5.0)).is_err());
        let valid = validate_verdict(verdict(72.4, 24.6)).unwrap();
        assert_eq!(valid.score, 72);
        assert_eq!(valid.dimensions.connection, 24.6);
    }

    #[test]
    fn fractional_verdicts_round_once_after_scaling() {
        // 2.6 / 25 * 24 = 2.496
        let earned = oracle_earned(
            dims(2.6, 12.5, 24.6, 0.4),
            DimensionScores::new(24, 10, 25, 25),
        );
        assert_eq!(earned, DimensionScores::new(2, 5, 25, 0));
    }

    #[tokio::test]
    async fn stored_oracle_breakdown_keeps_fractions() {
        let oracle = StubOracle::answering(64.0, [2.6, 10.0, 10.0, 10.0]);
        let outcome = score_submission(
            &oracle,
            POLICY,
            request(DimensionScores::new(24, 0, 0, 0)),
            0,
        )
        .await;
        assert_eq!(outcome.breakdown.earned.connection, 2);
        assert_eq!(outcome.gms_earned, 2);
        assert_eq!(
            outcome.breakdown.oracle.map(|oracle| oracle.connection),
            Some(2.6)
        );
    }

    #[tokio::test]
    async fn oracle_path_within_budget() {
        let oracle = StubOracle::answering(80.0, [25.0, 12.0, 0.0, 10.0]);
        let outcome = score_submission(
            &oracle,
            POLICY,
            request(DimensionScores::new(20, 15, 10, 20)),
            0,
        )
        .await;
        assert_eq!(outcome.breakdown.method, ScoringMethod::Oracle);
        assert_eq!(outcome.breakdown.ai_score, Some(80));
        assert_eq!(outcome.gms_earned, 35);
        assert_eq!(outcome.feedback, "Lovely teamwork");
    }

    #[tokio::test]
    async fn budget_exhausted_skips_the_oracle() {
        let oracle = StubOracle::answering(80.0, [25.0, 25.0, 25.0, 25.0]);
        let calls = oracle.calls.clone();
        let outcome = score_submission(
            &oracle,
            POLICY,
            request(DimensionScores::new(20, 15, 10, 20)),
            20,
        )
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.breakdown.method, ScoringMethod::Fallback);
        assert_eq!(outcome.breakdown.ai_score, None);
        assert_eq!(outcome.gms_earned, 39);
        assert_eq!(outcome.feedback, FALLBACK_FEEDBACK);
    }

    #[tokio::test]
    async fn oracle_failure_falls_back() {
        let outcome = score_submission(
            &StubOracle::failing(),
            POLICY,
            request(DimensionScores::new(10, 10, 10, 10)),
            0,
        )
        .await;
        assert_eq!(outcome.breakdown.method, ScoringMethod::Fallback);
        assert_eq!(outcome.gms_earned, 24);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_times_out_into_fallback() {
        let mut oracle = StubOracle::answering(90.0, [25.0, 25.0, 25.0, 25.0]);
        oracle.delay = Duration::from_secs(30);
        let outcome = score_submission(
            &oracle,
            POLICY,
            request(DimensionScores::new(10, 10, 10, 10)),
            0,
        )
        .await;
        assert_eq!(outcome.breakdown.method, ScoringMethod::Fallback);
    }

    #[tokio::test]
    async fn disabled_oracle_always_falls_back() {
        let outcome = score_submission(
            &DisabledOracle,
            POLICY,
            request(DimensionScores::new(5, 5, 5, 5)),
            0,
        )
        .await;
        assert_eq!(outcome.breakdown.method, ScoringMethod::Fallback);
        assert_eq!(outcome.gms_earned, 12);
    }
}

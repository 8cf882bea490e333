//! Write-once mission submissions: validation, rate window, scoring and the
//! score side effects.

use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{AggregateDelta, SessionStatus, SubmissionEntity},
    dto::{
        play::{SubmitRequest, SubmitResponse},
        sse::ScoreUpdateEvent,
    },
    error::{DuplicateKind, ServiceError},
    services::{
        access::{ensure_status, load_session, load_tour_checkpoint, resolve_team},
        scoring::{self, OracleRequest, ScoringPolicy},
        sse_events,
    },
    state::SharedState,
};

/// Score and record a team's answer and/or photo for an unlocked checkpoint.
pub async fn submit(
    state: &SharedState,
    session_id: Uuid,
    request: SubmitRequest,
) -> Result<SubmitResponse, ServiceError> {
    request.validate()?;
    let config = state.config();

    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    ensure_status(&session, &[SessionStatus::Active])?;
    let team = resolve_team(&store, session_id, &request.team_token).await?;
    let checkpoint = load_tour_checkpoint(&store, &session, request.checkpoint_id).await?;

    if !team.has_unlocked(checkpoint.id) {
        return Err(ServiceError::Ordering {
            expected: team.current_checkpoint_index,
            requested: checkpoint.order_index,
        });
    }
    if store.find_submission(team.id, checkpoint.id).await?.is_some() {
        return Err(ServiceError::Duplicate(DuplicateKind::Submission));
    }

    let now = SystemTime::now();
    let cooldown = config.submission_cooldown;
    if !store.claim_submission_slot(team.id, now, cooldown).await? {
        let last = store
            .find_team(team.id)
            .await?
            .and_then(|team| team.last_submission_at);
        return Err(ServiceError::Rate {
            retry_after_ms: retry_after(last, now, cooldown),
        });
    }

    let answer = request.answer().map(str::to_owned);
    let photo_url = request.photo_url().map(str::to_owned);

    let prior_submissions = store.count_team_submissions(team.id).await?;
    let outcome = scoring::score_submission(
        state.oracle(),
        ScoringPolicy {
            oracle_budget: config.oracle_budget,
            oracle_timeout: config.oracle_timeout,
            fallback_factor: config.fallback_factor,
        },
        OracleRequest {
            mission_title: checkpoint.mission.title.clone(),
            mission_description: checkpoint.mission.description.clone(),
            answer: answer.clone(),
            photo_url: photo_url.clone(),
            weights: checkpoint.weights,
        },
        prior_submissions,
    )
    .await;

    let bonus_earned = if photo_url.is_some() {
        checkpoint.bonus_photo_points
    } else {
        0
    };
    let scheduled_deletion_at = (photo_url.is_some() && session.variant.is_kids_safe())
        .then(|| now + config.photo_retention);

    let submission = SubmissionEntity {
        id: Uuid::new_v4(),
        session_id,
        team_id: team.id,
        checkpoint_id: checkpoint.id,
        answer,
        photo_url,
        breakdown: outcome.breakdown,
        gms_earned: outcome.gms_earned,
        bonus_earned,
        feedback: outcome.feedback,
        created_at: now,
        scheduled_deletion_at,
    };

    match store.insert_submission(submission.clone()).await {
        Ok(()) => {}
        Err(err) if err.is_duplicate() => {
            return Err(ServiceError::Duplicate(DuplicateKind::Submission));
        }
        Err(err) => return Err(err.into()),
    }

    store
        .increment_team_score(team.id, submission.gms_earned, bonus_earned, now)
        .await?;
    store
        .upsert_score_aggregate(AggregateDelta::from(&submission))
        .await?;

    info!(
        %session_id,
        team_id = %team.id,
        checkpoint_id = %checkpoint.id,
        method = submission.breakdown.method.as_str(),
        gms_earned = submission.gms_earned,
        bonus_earned,
        "submission scored"
    );

    let updated = match store.find_team(team.id).await {
        Ok(Some(updated)) => updated,
        Ok(None) => team,
        Err(err) => {
            warn!(team_id = %team.id, error = %err, "failed to reload team totals for broadcast");
            team
        }
    };
    sse_events::broadcast_score_update(
        state,
        &ScoreUpdateEvent {
            session_id,
            team_id: updated.id,
            team_name: updated.name.clone(),
            total_gms: updated.total_gms_score,
            bonus_points: updated.bonus_points,
            checkpoints_completed: updated.completed_checkpoints.len() as u32,
            checkpoint_id: Some(checkpoint.id),
        },
    );

    Ok(SubmitResponse {
        ai_score: submission.breakdown.ai_score,
        feedback: submission.feedback,
        gms_breakdown: submission.breakdown.earned,
        gms_earned: submission.gms_earned,
        bonus_earned,
        scoring_method: submission.breakdown.method,
    })
}

/// Milliseconds left in the cooldown window, at least one.
fn retry_after(last: Option<SystemTime>, now: SystemTime, cooldown: Duration) -> u64 {
    let elapsed = last
        .and_then(|last| now.duration_since(last).ok())
        .unwrap_or_default();
    let remaining = cooldown.saturating_sub(elapsed).as_millis();
    u64::try_from(remaining).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::models::{DimensionScores, ScoringMethod, SessionVariant},
        services::{
            score_cache, scoring::tests::StubOracle, sse_events::EVENT_SCORE_UPDATE,
            unlock_service,
        },
        state::Channel,
        test_support::{BONUS, Fixture, Setup, settle},
    };
    use crate::dto::play::UnlockRequest;
    use std::sync::{Arc, atomic::Ordering};

    fn no_cooldown() -> AppConfig {
        AppConfig {
            submission_cooldown: Duration::ZERO,
            ..AppConfig::default()
        }
    }

    async fn unlock(fixture: &Fixture, token: &str, index: usize) {
        let checkpoint = &fixture.checkpoints[index];
        unlock_service::attempt_unlock(
            &fixture.state,
            fixture.session.id,
            UnlockRequest {
                team_token: token.into(),
                checkpoint_id: checkpoint.id,
                lat: checkpoint.location.lat,
                lng: checkpoint.location.lng,
            },
        )
        .await
        .unwrap();
    }

    fn answer(fixture: &Fixture, token: &str, index: usize) -> SubmitRequest {
        SubmitRequest {
            team_token: token.into(),
            checkpoint_id: fixture.checkpoints[index].id,
            answer: Some("We found the fountain".into()),
            photo_url: None,
        }
    }

    #[tokio::test]
    async fn oracle_verdict_is_scaled_and_persisted() {
        let fixture = Setup {
            oracle: Arc::new(StubOracle::answering(82.0, [25.0, 12.0, 0.0, 10.0])),
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;

        let response = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap();
        assert_eq!(response.scoring_method, ScoringMethod::Oracle);
        assert_eq!(response.ai_score, Some(82));
        assert_eq!(response.gms_breakdown, DimensionScores::new(20, 7, 0, 8));
        assert_eq!(response.gms_earned, 35);
        assert_eq!(response.bonus_earned, 0);

        let team = fixture.reload_team(fixture.team.id).await;
        assert_eq!(team.total_gms_score, 35);
    }

    #[tokio::test]
    async fn second_submission_is_a_duplicate_and_scores_once() {
        let fixture = Setup {
            config: no_cooldown(),
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;

        let first = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap();
        let err = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Duplicate(DuplicateKind::Submission)));

        let team = fixture.reload_team(fixture.team.id).await;
        assert_eq!(team.total_gms_score, first.gms_earned);
        assert_eq!(
            fixture.store.count_team_submissions(team.id).await.unwrap(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_submissions_score_exactly_once() {
        let fixture = Setup {
            config: no_cooldown(),
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let state = fixture.state.clone();
                let request = answer(&fixture, &token, 0);
                let session_id = fixture.session.id;
                tokio::spawn(async move { submit(&state, session_id, request).await })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in attempts {
            match handle.await.unwrap() {
                Ok(response) => winners.push(response),
                Err(ServiceError::Duplicate(DuplicateKind::Submission)) => {}
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(winners.len(), 1);
        let earned = winners[0].gms_earned;

        let team = fixture.reload_team(fixture.team.id).await;
        assert_eq!(team.total_gms_score, earned);
        assert_eq!(
            fixture.store.count_team_submissions(team.id).await.unwrap(),
            1
        );
        let aggregates = fixture
            .store
            .list_score_aggregates(fixture.session.id)
            .await
            .unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].total_gms, earned);
        assert_eq!(aggregates[0].checkpoints_count, 1);
    }

    #[tokio::test]
    async fn locked_checkpoint_cannot_be_submitted() {
        let fixture = Setup::default().build().await;
        let token = fixture.team.token.clone();
        let err = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Ordering {
                expected: 0,
                requested: 0
            }
        ));
    }

    #[tokio::test]
    async fn cooldown_rejects_rapid_submissions() {
        let fixture = Setup::default().build().await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;
        unlock(&fixture, &token, 1).await;

        submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap();
        let err = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 1))
            .await
            .unwrap_err();
        match err {
            ServiceError::Rate { retry_after_ms } => {
                assert!(retry_after_ms > 0 && retry_after_ms <= 5_000)
            }
            other => panic!("expected rate error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn budget_exhausted_uses_fallback() {
        let oracle = StubOracle::answering(90.0, [25.0, 25.0, 25.0, 25.0]);
        let calls = oracle.calls.clone();
        let fixture = Setup {
            config: AppConfig {
                oracle_budget: 1,
                ..no_cooldown()
            },
            oracle: Arc::new(oracle),
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;
        unlock(&fixture, &token, 1).await;

        let first = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap();
        assert_eq!(first.scoring_method, ScoringMethod::Oracle);

        let second = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 1))
            .await
            .unwrap();
        assert_eq!(second.scoring_method, ScoringMethod::Fallback);
        assert_eq!(second.ai_score, None);
        assert_eq!(second.gms_breakdown, DimensionScores::new(12, 9, 6, 12));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn photo_bonus_and_kids_retention() {
        let fixture = Setup {
            variant: SessionVariant::Kids,
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;

        let response = submit(
            &fixture.state,
            fixture.session.id,
            SubmitRequest {
                team_token: token.clone(),
                checkpoint_id: fixture.checkpoints[0].id,
                answer: None,
                photo_url: Some("https://cdn.example.com/team.jpg".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.scoring_method, ScoringMethod::Fallback);
        assert_eq!(response.bonus_earned, BONUS);

        let stored = fixture
            .store
            .find_submission(fixture.team.id, fixture.checkpoints[0].id)
            .await
            .unwrap()
            .unwrap();
        let retention = stored
            .scheduled_deletion_at
            .unwrap()
            .duration_since(stored.created_at)
            .unwrap();
        assert_eq!(retention, Duration::from_secs(30 * 24 * 3600));

        let team = fixture.reload_team(fixture.team.id).await;
        assert_eq!(team.bonus_points, BONUS);
    }

    #[tokio::test]
    async fn aggregate_matches_scan_of_submissions() {
        let fixture = Setup {
            config: no_cooldown(),
            oracle: Arc::new(StubOracle::answering(70.0, [20.0, 10.0, 5.0, 25.0])),
            ..Default::default()
        }
        .build()
        .await;
        let token = fixture.team.token.clone();
        for index in 0..3 {
            unlock(&fixture, &token, index).await;
            let mut request = answer(&fixture, &token, index);
            if index == 1 {
                request.photo_url = Some("https://cdn.example.com/1.jpg".into());
            }
            submit(&fixture.state, fixture.session.id, request).await.unwrap();
        }

        let cached = fixture
            .store
            .list_score_aggregates(fixture.session.id)
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        let cached = &cached[0];

        let submissions = fixture.store.list_submissions(fixture.session.id).await.unwrap();
        let scanned =
            score_cache::recompute_from_submissions(fixture.session.id, fixture.team.id, &submissions);

        assert_eq!(cached.totals, scanned.totals);
        assert_eq!(cached.total_gms, scanned.total_gms);
        assert_eq!(cached.bonus_points, scanned.bonus_points);
        assert_eq!(cached.checkpoints_count, 3);
        assert_eq!(cached.results, scanned.results);

        let team = fixture.reload_team(fixture.team.id).await;
        assert_eq!(team.total_gms_score, cached.total_gms);
        assert_eq!(
            cached.total_gms,
            submissions.iter().map(|s| s.gms_earned).sum::<u32>()
        );
    }

    #[tokio::test]
    async fn score_update_reaches_both_channels() {
        let fixture = Setup::default().build().await;
        let token = fixture.team.token.clone();
        unlock(&fixture, &token, 0).await;
        let response = submit(&fixture.state, fixture.session.id, answer(&fixture, &token, 0))
            .await
            .unwrap();
        settle().await;

        let public = fixture.events.payloads(EVENT_SCORE_UPDATE, Channel::Public);
        assert_eq!(public.len(), 1);
        assert_eq!(public[0]["total_gms"], response.gms_earned);
        assert_eq!(
            fixture.events.payloads(EVENT_SCORE_UPDATE, Channel::Operator).len(),
            1
        );
    }

    #[test]
    fn retry_after_counts_down() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let cooldown = Duration::from_secs(5);
        assert_eq!(retry_after(Some(now - Duration::from_secs(2)), now, cooldown), 3_000);
        assert_eq!(retry_after(None, now, cooldown), 5_000);
        assert_eq!(retry_after(Some(now - Duration::from_secs(9)), now, cooldown), 1);
    }
}

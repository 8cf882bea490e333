//! Read side of the per-team score aggregates.
//!
//! Aggregates are maintained incrementally by the submission path; this module
//! recomputes them from raw submissions when a cached row is missing.

use std::{sync::Arc, time::SystemTime};

use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{AggregateDelta, DimensionScores, ScoreAggregateEntity, SubmissionEntity},
        session_store::SessionStore,
    },
    dto::session::{ReportSource, SessionReport, TeamReport},
    error::ServiceError,
    services::access::load_session,
    state::SharedState,
};

/// Rebuild a team aggregate from its submissions, oldest first.
///
/// Submissions of other teams are ignored. A team without submissions gets an
/// all-zero aggregate.
pub fn recompute_from_submissions(
    session_id: Uuid,
    team_id: Uuid,
    submissions: &[SubmissionEntity],
) -> ScoreAggregateEntity {
    let mut own: Vec<&SubmissionEntity> = submissions
        .iter()
        .filter(|submission| submission.session_id == session_id && submission.team_id == team_id)
        .collect();
    own.sort_by_key(|submission| (submission.created_at, submission.id));

    let created_at = own
        .first()
        .map(|submission| submission.created_at)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut aggregate = ScoreAggregateEntity {
        session_id,
        team_id,
        totals: DimensionScores::default(),
        total_gms: 0,
        bonus_points: 0,
        checkpoints_count: 0,
        results: Vec::with_capacity(own.len()),
        insight: None,
        created_at,
        updated_at: created_at,
    };

    for submission in own {
        let AggregateDelta { result, .. } = AggregateDelta::from(submission);
        aggregate.totals = aggregate.totals + result.earned;
        aggregate.total_gms += result.gms_earned;
        aggregate.bonus_points += result.bonus_earned;
        aggregate.checkpoints_count += 1;
        aggregate.updated_at = result.submitted_at;
        aggregate.results.push(result);
    }
    aggregate
}

/// Operator score report, preferring cached aggregates over a submission scan.
pub async fn session_report(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionReport, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let teams = store.list_teams(session_id).await?;
    let cached = store.list_score_aggregates(session_id).await?;

    let mut scanned: Option<Vec<SubmissionEntity>> = None;
    let mut reports = Vec::with_capacity(teams.len());
    for team in teams {
        let report = match cached.iter().find(|aggregate| aggregate.team_id == team.id) {
            Some(aggregate) => TeamReport::from_aggregate(team.name, ReportSource::Cache, aggregate),
            None => {
                debug!(%session_id, team_id = %team.id, "no cached aggregate; scanning submissions");
                if scanned.is_none() {
                    scanned = Some(list_submissions(&store, session_id).await?);
                }
                let submissions = scanned.as_deref().unwrap_or_default();
                let aggregate = recompute_from_submissions(session_id, team.id, submissions);
                TeamReport::from_aggregate(team.name, ReportSource::Scan, &aggregate)
            }
        };
        reports.push(report);
    }
    reports.sort_by(|a, b| {
        (b.total_gms + b.bonus_points)
            .cmp(&(a.total_gms + a.bonus_points))
            .then_with(|| a.team_name.cmp(&b.team_name))
    });

    Ok(SessionReport {
        session: (&session).into(),
        teams: reports,
    })
}

async fn list_submissions(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<Vec<SubmissionEntity>, ServiceError> {
    Ok(store.list_submissions(session_id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::{ScoringBreakdown, ScoringMethod},
        test_support::Setup,
    };
    use std::time::Duration;

    fn submission(
        session_id: Uuid,
        team_id: Uuid,
        earned: DimensionScores,
        bonus: u32,
        secs: u64,
    ) -> SubmissionEntity {
        SubmissionEntity {
            id: Uuid::new_v4(),
            session_id,
            team_id,
            checkpoint_id: Uuid::new_v4(),
            answer: Some("answer".into()),
            photo_url: None,
            breakdown: ScoringBreakdown {
                method: ScoringMethod::Fallback,
                ai_score: None,
                oracle: None,
                earned,
            },
            gms_earned: earned.total(),
            bonus_earned: bonus,
            feedback: String::new(),
            created_at: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
            scheduled_deletion_at: None,
        }
    }

    #[test]
    fn recompute_sums_own_submissions_in_order() {
        let session_id = Uuid::new_v4();
        let team_id = Uuid::new_v4();
        let submissions = vec![
            submission(session_id, team_id, DimensionScores::new(4, 3, 2, 1), 5, 20),
            submission(session_id, Uuid::new_v4(), DimensionScores::new(9, 9, 9, 9), 0, 5),
            submission(session_id, team_id, DimensionScores::new(1, 1, 1, 1), 0, 10),
        ];

        let aggregate = recompute_from_submissions(session_id, team_id, &submissions);
        assert_eq!(aggregate.totals, DimensionScores::new(5, 4, 3, 2));
        assert_eq!(aggregate.total_gms, 14);
        assert_eq!(aggregate.bonus_points, 5);
        assert_eq!(aggregate.checkpoints_count, 2);
        assert_eq!(aggregate.results[0].checkpoint_id, submissions[2].checkpoint_id);
        assert_eq!(aggregate.updated_at, submissions[0].created_at);
    }

    #[test]
    fn recompute_without_submissions_is_zero() {
        let aggregate = recompute_from_submissions(Uuid::new_v4(), Uuid::new_v4(), &[]);
        assert_eq!(aggregate.total_gms, 0);
        assert_eq!(aggregate.checkpoints_count, 0);
        assert!(aggregate.results.is_empty());
    }

    #[tokio::test]
    async fn report_prefers_cache_and_scans_missing_rows() {
        let fixture = Setup::default().build().await;
        let rival = fixture.add_team("Foxes").await;
        let session_id = fixture.session.id;

        // Owls: cached aggregate only.
        let cached = submission(session_id, fixture.team.id, DimensionScores::new(2, 2, 2, 2), 0, 1);
        fixture
            .store
            .upsert_score_aggregate(AggregateDelta::from(&cached))
            .await
            .unwrap();

        // Foxes: raw submission without a cached row.
        let raw = submission(session_id, rival.id, DimensionScores::new(5, 5, 5, 5), 3, 2);
        fixture.store.insert_submission(raw).await.unwrap();

        let report = session_report(&fixture.state, session_id).await.unwrap();
        assert_eq!(report.session.id, session_id);
        assert_eq!(report.teams.len(), 2);

        assert_eq!(report.teams[0].team_name, "Foxes");
        assert_eq!(report.teams[0].source, ReportSource::Scan);
        assert_eq!(report.teams[0].total_gms, 20);
        assert_eq!(report.teams[0].bonus_points, 3);

        assert_eq!(report.teams[1].team_name, "Owls");
        assert_eq!(report.teams[1].source, ReportSource::Cache);
        assert_eq!(report.teams[1].total_gms, 8);
    }

    #[tokio::test]
    async fn report_for_unknown_session_is_not_found() {
        let fixture = Setup::default().build().await;
        let err = session_report(&fixture.state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}

//! Snapshot polling used while the push transport is down.
//!
//! [`PollingFallback`] watches the transport status. While disconnected it
//! fetches the session snapshot on a fixed interval and turns differences
//! between consecutive snapshots into the same events the push channel would
//! have delivered. Polling stops as soon as the transport reports connected.

use std::{sync::Arc, time::Duration};

use async_stream::stream;
use futures::{Stream, future::BoxFuture};
use thiserror::Error;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::{
    session::SessionSnapshot,
    sse::{ScoreUpdateEvent, SessionStatusEvent},
};

/// State of the push connection as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    /// Push events are arriving.
    Connected,
    /// Push channel dropped; poll instead.
    Disconnected,
}

/// Event synthesized from two consecutive snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Equivalent of a pushed `session-status` event.
    SessionStatus(SessionStatusEvent),
    /// Equivalent of a pushed `score-update` event.
    ScoreUpdate(ScoreUpdateEvent),
}

/// Failure of a single snapshot poll; logged and retried on the next tick.
#[derive(Debug, Error)]
pub enum PollError {
    /// Transport, status or decoding failure.
    #[error("snapshot request failed")]
    Http(#[from] reqwest::Error),
    /// The source had nothing to serve.
    #[error("snapshot source unavailable: {0}")]
    Unavailable(String),
}

/// Anything able to produce the current session snapshot.
pub trait SnapshotSource: Send + Sync {
    /// Fetch the latest snapshot.
    fn fetch(&self) -> BoxFuture<'static, Result<SessionSnapshot, PollError>>;
}

/// Snapshot source reading `GET {base_url}/sessions/{id}/snapshot`.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
    team_token: String,
}

impl HttpSnapshotSource {
    /// Source authenticated with the team's token.
    pub fn new(base_url: &str, session_id: Uuid, team_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/sessions/{session_id}/snapshot",
                base_url.trim_end_matches('/')
            ),
            team_token,
        }
    }
}

impl SnapshotSource for HttpSnapshotSource {
    fn fetch(&self) -> BoxFuture<'static, Result<SessionSnapshot, PollError>> {
        let request = self
            .client
            .get(&self.url)
            .header("x-team-token", self.team_token.as_str());
        Box::pin(async move {
            let snapshot = request
                .send()
                .await?
                .error_for_status()?
                .json::<SessionSnapshot>()
                .await?;
            Ok(snapshot)
        })
    }
}

/// Events implied by moving from `previous` to `current`.
///
/// Only teams whose score changed, or that newly appear, produce a score update.
pub fn diff_snapshots(previous: &SessionSnapshot, current: &SessionSnapshot) -> Vec<SyncEvent> {
    let session_id = current.session.id;
    let mut events = Vec::new();

    if previous.session.status != current.session.status {
        events.push(SyncEvent::SessionStatus(SessionStatusEvent {
            session_id,
            status: current.session.status,
            previous: Some(previous.session.status),
        }));
    }

    for entry in &current.scoreboard {
        let changed = previous
            .scoreboard
            .iter()
            .find(|old| old.team_id == entry.team_id)
            .is_none_or(|old| {
                old.total_gms != entry.total_gms || old.bonus_points != entry.bonus_points
            });
        if changed {
            events.push(SyncEvent::ScoreUpdate(ScoreUpdateEvent {
                session_id,
                team_id: entry.team_id,
                team_name: entry.name.clone(),
                total_gms: entry.total_gms,
                bonus_points: entry.bonus_points,
                checkpoints_completed: entry.checkpoints_completed,
                checkpoint_id: None,
            }));
        }
    }
    events
}

enum Step {
    Poll,
    Reconnected,
    Closed,
}

/// Polls a [`SnapshotSource`] whenever the push transport is down.
pub struct PollingFallback {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
    transport: watch::Receiver<TransportStatus>,
}

impl PollingFallback {
    /// Poll `source` every `interval` while `transport` reports disconnected.
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        interval: Duration,
        transport: watch::Receiver<TransportStatus>,
    ) -> Self {
        Self {
            source,
            interval,
            transport,
        }
    }

    /// Synthetic events for every disconnected period, until the status sender is dropped.
    ///
    /// The last snapshot seen is kept across periods so a reconnect followed by
    /// another outage only reports what changed since the previous poll.
    pub fn events(self) -> impl Stream<Item = SyncEvent> + Send {
        let Self {
            source,
            interval: period,
            mut transport,
        } = self;

        stream! {
            let mut last: Option<SessionSnapshot> = None;

            loop {
                // Wait for the push transport to go down.
                let sender_alive = transport
                    .wait_for(|status| *status == TransportStatus::Disconnected)
                    .await
                    .is_ok();
                if !sender_alive {
                    break;
                }
                debug!(every = ?period, "push transport down; polling snapshots");

                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                let closed = loop {
                    let step = tokio::select! {
                        biased;
                        changed = transport.changed() => {
                            if changed.is_err() {
                                Step::Closed
                            } else {
                                let status = *transport.borrow_and_update();
                                if status == TransportStatus::Connected {
                                    Step::Reconnected
                                } else {
                                    continue;
                                }
                            }
                        }
                        _ = ticker.tick() => Step::Poll,
                    };

                    match step {
                        Step::Closed => break true,
                        Step::Reconnected => {
                            debug!("push transport restored; polling stopped");
                            break false;
                        }
                        Step::Poll => match source.fetch().await {
                            Ok(snapshot) => {
                                if let Some(previous) = &last {
                                    for event in diff_snapshots(previous, &snapshot) {
                                        yield event;
                                    }
                                }
                                last = Some(snapshot);
                            }
                            Err(err) => warn!(error = %err, "snapshot poll failed"),
                        },
                    }
                };

                if closed {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::{SessionStatus, SessionVariant},
        dto::session::{ScoreboardEntry, SessionHeader, TeamProgress},
    };
    use futures::StreamExt;
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    fn snapshot(status: SessionStatus, scores: &[(Uuid, u32)]) -> SessionSnapshot {
        let session_id = Uuid::nil();
        SessionSnapshot {
            session: SessionHeader {
                id: session_id,
                tour_id: Uuid::nil(),
                name: "Old town".into(),
                status,
                variant: SessionVariant::Standard,
                is_test_mode: false,
                geofence: Vec::new(),
                started_at: None,
                completed_at: None,
            },
            team: TeamProgress {
                id: scores[0].0,
                name: "Owls".into(),
                current_checkpoint_index: 0,
                completed_checkpoints: Vec::new(),
                total_gms: scores[0].1,
                bonus_points: 0,
                is_outside_geofence: false,
            },
            checkpoints: Vec::new(),
            scoreboard: scores
                .iter()
                .map(|(team_id, total_gms)| ScoreboardEntry {
                    team_id: *team_id,
                    name: format!("team-{total_gms}"),
                    total_gms: *total_gms,
                    bonus_points: 0,
                    checkpoints_completed: 0,
                })
                .collect(),
        }
    }

    /// Source replaying a scripted list of snapshots, repeating the last one.
    struct ScriptedSource {
        script: Mutex<Vec<SessionSnapshot>>,
        calls: Arc<AtomicUsize>,
    }

    impl SnapshotSource for ScriptedSource {
        fn fetch(&self) -> BoxFuture<'static, Result<SessionSnapshot, PollError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                Ok(script.remove(0))
            } else {
                script
                    .first()
                    .cloned()
                    .ok_or_else(|| PollError::Unavailable("empty script".into()))
            };
            Box::pin(async move { next })
        }
    }

    #[test]
    fn diff_reports_only_changed_teams() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let before = snapshot(SessionStatus::Active, &[(a, 10), (b, 5)]);
        let after = snapshot(SessionStatus::Active, &[(a, 10), (b, 40)]);

        let events = diff_snapshots(&before, &after);
        assert_eq!(events.len(), 1);
        match &events[0] {
            SyncEvent::ScoreUpdate(update) => {
                assert_eq!(update.team_id, b);
                assert_eq!(update.total_gms, 40);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(diff_snapshots(&after, &after).is_empty());
    }

    #[test]
    fn progress_without_score_change_is_not_an_update() {
        let team = Uuid::new_v4();
        let before = snapshot(SessionStatus::Active, &[(team, 0)]);
        let mut after = snapshot(SessionStatus::Active, &[(team, 0)]);
        after.scoreboard[0].checkpoints_completed = 1;
        assert!(diff_snapshots(&before, &after).is_empty());

        after.scoreboard[0].bonus_points = 5;
        assert_eq!(diff_snapshots(&before, &after).len(), 1);
    }

    #[test]
    fn newly_joined_teams_are_reported() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let before = snapshot(SessionStatus::Active, &[(a, 0)]);
        let after = snapshot(SessionStatus::Active, &[(a, 0), (b, 0)]);
        match diff_snapshots(&before, &after).as_slice() {
            [SyncEvent::ScoreUpdate(update)] => assert_eq!(update.team_id, b),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn diff_reports_status_changes() {
        let team = Uuid::new_v4();
        let before = snapshot(SessionStatus::Active, &[(team, 10)]);
        let after = snapshot(SessionStatus::Paused, &[(team, 10)]);
        assert_eq!(
            diff_snapshots(&before, &after),
            vec![SyncEvent::SessionStatus(SessionStatusEvent {
                session_id: Uuid::nil(),
                status: SessionStatus::Paused,
                previous: Some(SessionStatus::Active),
            })]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn polls_while_disconnected_and_stops_on_reconnect() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let calls = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(ScriptedSource {
            script: Mutex::new(vec![
                snapshot(SessionStatus::Active, &[(a, 10), (b, 5)]),
                snapshot(SessionStatus::Active, &[(a, 10), (b, 5)]),
                snapshot(SessionStatus::Active, &[(a, 35), (b, 5)]),
            ]),
            calls: calls.clone(),
        });
        let (status_tx, status_rx) = watch::channel(TransportStatus::Connected);
        let fallback = PollingFallback::new(source, Duration::from_secs(5), status_rx);
        let mut events = Box::pin(fallback.events());

        // Connected: nothing is fetched.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        status_tx.send(TransportStatus::Disconnected).unwrap();
        let first = events.next().await.unwrap();
        match first {
            SyncEvent::ScoreUpdate(update) => {
                assert_eq!(update.team_id, a);
                assert_eq!(update.total_gms, 35);
            }
            other => panic!("unexpected event {other:?}"),
        }
        // Immediate tick, then two 5 s periods.
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        status_tx.send(TransportStatus::Connected).unwrap();
        let polled = calls.load(Ordering::SeqCst);
        let pending = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(pending.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), polled);

        drop(status_tx);
        assert!(events.next().await.is_none());
    }
}

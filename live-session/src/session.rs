//! The process-wide live session actor. Generalizes a single-session
//! event-handler-task pattern (command channel in, `broadcast` events out)
//! from a per-session map keyed by id to a true singleton, and swaps direct
//! engine ownership for a `live`-priority submission to the shared worker
//! pool.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use uci_worker::AnalysisOptions;
use worker_pool::{Priority, TaskRequest, WorkerPool};

use crate::error::LiveError;
use crate::types::{EngineStatusKind, Event, ProgressLine, Settings, SettingsPatch};

const IDLE_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

enum Command {
    Create {
        session_id: String,
        reply: oneshot::Sender<Result<(), LiveError>>,
    },
    Analyze {
        session_id: String,
        fen: String,
        patch: Option<SettingsPatch>,
        reply: oneshot::Sender<Result<(), LiveError>>,
    },
    UpdateSettings {
        session_id: String,
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<(), LiveError>>,
    },
    Close {
        session_id: String,
        reply: oneshot::Sender<Result<(), LiveError>>,
    },
    Subscribe {
        reply: oneshot::Sender<Result<broadcast::Receiver<Event>, LiveError>>,
    },
    Shutdown,
}

enum ActorEvent {
    Progress {
        session_id: String,
        fen: String,
        depth: u32,
        lines: Vec<ProgressLine>,
    },
    Done {
        session_id: String,
        fen: String,
        elapsed: Duration,
        result: Result<Vec<ProgressLine>, worker_pool::PoolError>,
    },
}

/// A cheap-to-clone handle to the live session actor.
#[derive(Clone)]
pub struct LiveSessionHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl LiveSessionHandle {
    pub fn spawn(pool: WorkerPool) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let actor = LiveSessionActor { pool, session: None };
        tokio::spawn(actor.run(cmd_rx));
        Self { cmd_tx }
    }

    pub async fn create_session(&self, session_id: impl Into<String>) -> Result<(), LiveError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Create { session_id: session_id.into(), reply })
            .await
            .map_err(|_| LiveError::NoActiveSession)?;
        rx.await.map_err(|_| LiveError::NoActiveSession)?
    }

    pub async fn analyze_position(
        &self,
        session_id: impl Into<String>,
        fen: impl Into<String>,
        patch: Option<SettingsPatch>,
    ) -> Result<(), LiveError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Analyze {
                session_id: session_id.into(),
                fen: fen.into(),
                patch,
                reply,
            })
            .await
            .map_err(|_| LiveError::NoActiveSession)?;
        rx.await.map_err(|_| LiveError::NoActiveSession)?
    }

    pub async fn update_settings(
        &self,
        session_id: impl Into<String>,
        patch: SettingsPatch,
    ) -> Result<(), LiveError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::UpdateSettings { session_id: session_id.into(), patch, reply })
            .await
            .map_err(|_| LiveError::NoActiveSession)?;
        rx.await.map_err(|_| LiveError::NoActiveSession)?
    }

    pub async fn close_session(&self, session_id: impl Into<String>) -> Result<(), LiveError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close { session_id: session_id.into(), reply })
            .await
            .map_err(|_| LiveError::NoActiveSession)?;
        rx.await.map_err(|_| LiveError::NoActiveSession)?
    }

    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Event>, LiveError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { reply })
            .await
            .map_err(|_| LiveError::NoActiveSession)?;
        rx.await.map_err(|_| LiveError::NoActiveSession)?
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

struct SessionState {
    id: String,
    settings: Settings,
    current_position: Option<String>,
    is_analyzing: bool,
    last_activity: Instant,
    event_tx: broadcast::Sender<Event>,
}

struct LiveSessionActor {
    pool: WorkerPool,
    session: Option<SessionState>,
}

impl LiveSessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let (actor_tx, mut actor_rx) = mpsc::channel::<ActorEvent>(64);
        let mut gc = tokio::time::interval(IDLE_GC_INTERVAL);
        gc.tick().await;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Command::Create { session_id, reply } => self.handle_create(session_id, reply).await,
                        Command::Analyze { session_id, fen, patch, reply } => {
                            self.handle_analyze(session_id, fen, patch, reply, &actor_tx).await
                        }
                        Command::UpdateSettings { session_id, patch, reply } => {
                            self.handle_update_settings(session_id, patch, reply)
                        }
                        Command::Close { session_id, reply } => {
                            self.handle_close(session_id, "client requested close".to_string(), reply)
                        }
                        Command::Subscribe { reply } => self.handle_subscribe(reply),
                        Command::Shutdown => break,
                    }
                }
                Some(event) = actor_rx.recv() => self.handle_actor_event(event),
                _ = gc.tick() => self.handle_idle_gc(),
            }
        }
    }

    async fn handle_create(&mut self, session_id: String, reply: oneshot::Sender<Result<(), LiveError>>) {
        if self.pool.stats().await.total == 0 {
            let _ = reply.send(Err(LiveError::NoActiveSession));
            return;
        }
        if let Some(old) = self.session.take() {
            let _ = old.event_tx.send(Event::SessionClosed {
                reason: "replaced by a new session".to_string(),
            });
        }
        let (event_tx, _) = broadcast::channel(256);
        let settings = Settings::default();
        let _ = event_tx.send(Event::EngineStatus {
            status: EngineStatusKind::SessionCreated,
            settings: settings.clone(),
        });
        self.session = Some(SessionState {
            id: session_id,
            settings,
            current_position: None,
            is_analyzing: false,
            last_activity: Instant::now(),
            event_tx,
        });
        let _ = reply.send(Ok(()));
    }

    fn require_session(&mut self, session_id: &str) -> Result<&mut SessionState, LiveError> {
        match &mut self.session {
            Some(s) if s.id == session_id => Ok(s),
            Some(s) => Err(LiveError::SessionMismatch {
                requested: session_id.to_string(),
                active: s.id.clone(),
            }),
            None => Err(LiveError::NoActiveSession),
        }
    }

    async fn handle_analyze(
        &mut self,
        session_id: String,
        fen: String,
        patch: Option<SettingsPatch>,
        reply: oneshot::Sender<Result<(), LiveError>>,
        actor_tx: &mpsc::Sender<ActorEvent>,
    ) {
        if let Err(e) = chess_adapter::validate_fen(&fen) {
            let _ = reply.send(Err(LiveError::InvalidFen(e)));
            return;
        }
        let effective = {
            let session = match self.require_session(&session_id) {
                Ok(s) => s,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            };
            session.current_position = Some(fen.clone());
            session.is_analyzing = true;
            session.last_activity = Instant::now();
            let mut effective = session.settings.clone();
            if let Some(p) = &patch {
                effective.merge(p);
            }
            let _ = session.event_tx.send(Event::AnalysisStarted {
                fen: fen.clone(),
                options: effective.clone(),
            });
            effective
        };

        let pool = self.pool.clone();
        let tx = actor_tx.clone();
        let sid = session_id.clone();
        let fen_for_task = fen.clone();
        tokio::spawn(async move {
            pool.stop_live_task().await;

            let (progress_tx, mut progress_rx) = mpsc::channel(32);
            let opts = AnalysisOptions {
                depth: effective.depth,
                multi_pv: effective.multi_pv,
                time_limit: Some(Duration::from_millis(effective.time_limit_ms)),
            };
            let task = TaskRequest::new(fen_for_task.clone(), opts, Priority::Live).with_progress(progress_tx);

            let forward_sid = sid.clone();
            let forward_fen = fen_for_task.clone();
            let forward_tx = tx.clone();
            let forward = tokio::spawn(async move {
                while let Some(snapshot) = progress_rx.recv().await {
                    let _ = forward_tx
                        .send(ActorEvent::Progress {
                            session_id: forward_sid.clone(),
                            fen: forward_fen.clone(),
                            depth: snapshot.max_depth,
                            lines: snapshot.lines.iter().map(ProgressLine::from).collect(),
                        })
                        .await;
                }
            });

            let start = Instant::now();
            let result = pool.submit(task).await;
            forward.abort();

            let result = result.map(|analysis| analysis.lines.iter().map(ProgressLine::from).collect());
            let _ = tx
                .send(ActorEvent::Done {
                    session_id: sid,
                    fen: fen_for_task,
                    elapsed: start.elapsed(),
                    result,
                })
                .await;
        });

        let _ = reply.send(Ok(()));
    }

    fn handle_update_settings(
        &mut self,
        session_id: String,
        patch: SettingsPatch,
        reply: oneshot::Sender<Result<(), LiveError>>,
    ) {
        let session = match self.require_session(&session_id) {
            Ok(s) => s,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        session.settings.merge(&patch);
        session.last_activity = Instant::now();
        let _ = session.event_tx.send(Event::EngineStatus {
            status: EngineStatusKind::SettingsUpdated,
            settings: session.settings.clone(),
        });
        let _ = reply.send(Ok(()));
    }

    fn handle_close(&mut self, session_id: String, reason: String, reply: oneshot::Sender<Result<(), LiveError>>) {
        match self.require_session(&session_id) {
            Ok(_) => {}
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        }
        if let Some(session) = self.session.take() {
            let _ = session.event_tx.send(Event::SessionClosed { reason });
        }
        let _ = reply.send(Ok(()));
    }

    fn handle_subscribe(&mut self, reply: oneshot::Sender<Result<broadcast::Receiver<Event>, LiveError>>) {
        let result = match &self.session {
            Some(s) => Ok(s.event_tx.subscribe()),
            None => Err(LiveError::NoActiveSession),
        };
        let _ = reply.send(result);
    }

    fn handle_actor_event(&mut self, event: ActorEvent) {
        let Some(session) = &mut self.session else { return };
        match event {
            ActorEvent::Progress { session_id, fen, depth, lines } => {
                if session.id != session_id || session.current_position.as_deref() != Some(fen.as_str()) {
                    return; // stale: discarded silently
                }
                let _ = session.event_tx.send(Event::AnalysisProgress { fen, depth, lines });
            }
            ActorEvent::Done { session_id, fen, elapsed, result } => {
                if session.id != session_id || session.current_position.as_deref() != Some(fen.as_str()) {
                    return; // stale: discarded silently, per analyzePosition contract
                }
                session.is_analyzing = false;
                session.last_activity = Instant::now();
                match result {
                    Ok(lines) => {
                        let _ = session.event_tx.send(Event::AnalysisComplete {
                            fen,
                            lines,
                            analysis_time_ms: elapsed.as_millis() as u64,
                            is_complete: true,
                        });
                    }
                    Err(e) => {
                        let _ = session.event_tx.send(Event::AnalysisError {
                            error: "pool_error".to_string(),
                            message: e.to_string(),
                            fen: Some(fen),
                        });
                    }
                }
            }
        }
    }

    fn handle_idle_gc(&mut self) {
        let Some(session) = &self.session else { return };
        if session.last_activity.elapsed() > IDLE_TIMEOUT {
            let _ = session.event_tx.send(Event::SessionClosed {
                reason: "idle timeout (no activity for 30 minutes)".to_string(),
            });
            self.session = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use worker_pool::PoolConfig;

    use super::*;

    /// A pool with zero workers never boots a subprocess, so `total` stays
    /// 0 forever; useful for exercising the no-idle-worker rejection path.
    fn empty_pool() -> WorkerPool {
        WorkerPool::spawn(PoolConfig { pool_size: 0, ..PoolConfig::default() })
    }

    /// A pool that reports one worker slot without ever needing a real
    /// engine binary to answer `uci`/`isready` (the test never submits a
    /// task, so the worker is left to fail its own boot in the background).
    fn single_slot_pool() -> WorkerPool {
        WorkerPool::spawn(PoolConfig {
            pool_size: 1,
            reserved_for_live: 1,
            engine_path: PathBuf::from("/nonexistent-chess-engine-binary"),
            ..PoolConfig::default()
        })
    }

    /// Answers the boot handshake, then on `go` sleeps a fixed short
    /// duration before answering `bestmove` - deterministic enough to
    /// observe completion ordering between two overlapping live requests.
    const SLOW_BESTMOVE_ENGINE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci) printf 'id name MockEngine\nuciok\n' ;;
    isready) printf 'readyok\n' ;;
    go*)
      sleep 0.2
      printf 'info depth 10 seldepth 12 multipv 1 score cp 20 nodes 100 nps 500 pv e2e4 e7e5\n'
      printf 'bestmove e2e4\n'
      ;;
    quit) exit 0 ;;
  esac
done
"#;

    fn write_executable_script(dir: &std::path::Path, name: &str, contents: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, contents).expect("write mock engine script");
        let mut perms = std::fs::metadata(&path).expect("stat mock engine script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod mock engine script");
        path
    }

    async fn wait_for_idle_worker(pool: &WorkerPool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if pool.stats().await.idle >= 1 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("a worker reached idle before timeout");
    }

    #[tokio::test]
    async fn create_session_fails_without_any_worker_slots() {
        let handle = LiveSessionHandle::spawn(empty_pool());
        let err = handle.create_session("s1").await.unwrap_err();
        assert!(matches!(err, LiveError::NoActiveSession));
    }

    #[tokio::test]
    async fn update_settings_emits_an_engine_status_event() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        handle.create_session("s1").await.unwrap();
        let mut events = handle.subscribe().await.unwrap();

        handle
            .update_settings("s1", SettingsPatch { depth: Some(20), ..Default::default() })
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        match event {
            Event::EngineStatus { status, settings } => {
                assert_eq!(status, EngineStatusKind::SettingsUpdated);
                assert_eq!(settings.depth, 20);
            }
            other => panic!("expected EngineStatus event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn creating_a_new_session_closes_the_previous_one() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        handle.create_session("s1").await.unwrap();
        let mut events = handle.subscribe().await.unwrap();

        handle.create_session("s2").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert!(matches!(event, Event::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn update_settings_against_the_wrong_session_id_is_a_mismatch() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        handle.create_session("s1").await.unwrap();

        let err = handle
            .update_settings("not-s1", SettingsPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveError::SessionMismatch { .. }));
    }

    #[tokio::test]
    async fn update_settings_with_no_session_is_no_active_session() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        let err = handle
            .update_settings("s1", SettingsPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveError::NoActiveSession));
    }

    #[tokio::test]
    async fn close_session_emits_session_closed_and_clears_state() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        handle.create_session("s1").await.unwrap();
        let mut events = handle.subscribe().await.unwrap();

        handle.close_session("s1").await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert!(matches!(event, Event::SessionClosed { .. }));

        let err = handle.close_session("s1").await.unwrap_err();
        assert!(matches!(err, LiveError::NoActiveSession));
    }

    #[tokio::test]
    async fn analyze_position_rejects_a_malformed_fen() {
        let handle = LiveSessionHandle::spawn(single_slot_pool());
        handle.create_session("s1").await.unwrap();

        let err = handle.analyze_position("s1", "not-a-fen", None).await.unwrap_err();
        assert!(matches!(err, LiveError::InvalidFen(_)));
    }

    #[tokio::test]
    async fn a_second_analysis_request_discards_the_first_ones_stale_completion() {
        const F1: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq -";
        const F2: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq -";

        let dir = tempfile::tempdir().expect("tempdir");
        let engine_path = write_executable_script(dir.path(), "slow-bestmove.sh", SLOW_BESTMOVE_ENGINE);
        let pool = WorkerPool::spawn(PoolConfig {
            pool_size: 1,
            reserved_for_live: 1,
            engine_path,
            ..PoolConfig::default()
        });
        wait_for_idle_worker(&pool).await;

        let handle = LiveSessionHandle::spawn(pool);
        handle.create_session("s1").await.unwrap();
        let mut events = handle.subscribe().await.unwrap();

        handle.analyze_position("s1", F1, None).await.unwrap();
        handle.analyze_position("s1", F2, None).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("event within timeout")
                .unwrap();
            seen.push(event);
        }

        match &seen[0] {
            Event::AnalysisStarted { fen, .. } => assert_eq!(fen, F1),
            other => panic!("expected AnalysisStarted(F1), got {other:?}"),
        }
        match &seen[1] {
            Event::AnalysisStarted { fen, .. } => assert_eq!(fen, F2),
            other => panic!("expected AnalysisStarted(F2), got {other:?}"),
        }
        match &seen[2] {
            Event::AnalysisComplete { fen, .. } => assert_eq!(fen, F2),
            other => panic!("expected AnalysisComplete(F2), got {other:?}"),
        }

        let extra = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
        assert!(
            extra.is_err(),
            "no further event (in particular no analysis_complete(F1)) should be emitted"
        );
    }
}

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch, Notify};

use crate::error::UciError;
use crate::handle::{UciWorker, WorkerCommand};
use crate::protocol::{is_readyok, is_uciok, parse_bestmove_line, parse_info_line};
use crate::types::{AnalysisOptions, AnalysisResult, ProgressSnapshot, PvLine, Score, WorkerConfig, WorkerStatus};

const BOOT_TIMEOUT: Duration = Duration::from_secs(15);
const STOP_GRACE: Duration = Duration::from_secs(2);
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// Spawns the worker actor and returns a cheaply-clonable handle to it.
pub fn spawn(config: WorkerConfig) -> UciWorker {
    let id = config.id;
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(WorkerStatus::Initializing);
    let wake = Arc::new(Notify::new());
    let stop_requested = Arc::new(AtomicBool::new(false));
    let shutdown_requested = Arc::new(AtomicBool::new(false));

    let actor = WorkerActor {
        id,
        config,
        cmd_rx,
        status_tx,
        wake: wake.clone(),
        stop_requested: stop_requested.clone(),
        shutdown_requested: shutdown_requested.clone(),
        last_message_time: Arc::new(AtomicI64::new(now_millis())),
        child: None,
        stdin: None,
        line_rx: None,
        configured_multipv: 1,
    };

    tokio::spawn(actor.run());

    UciWorker {
        id,
        cmd_tx,
        wake,
        stop_requested,
        shutdown_requested,
        status_rx,
    }
}

struct WorkerActor {
    id: u32,
    config: WorkerConfig,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    status_tx: watch::Sender<WorkerStatus>,
    wake: Arc<Notify>,
    stop_requested: Arc<AtomicBool>,
    shutdown_requested: Arc<AtomicBool>,
    last_message_time: Arc<AtomicI64>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    line_rx: Option<mpsc::Receiver<String>>,
    configured_multipv: u32,
}

#[derive(Debug, Clone, Default)]
struct PartialLine {
    depth: u32,
    seen_depth: bool,
    seldepth: Option<u32>,
    score: Option<Score>,
    nodes: Option<u64>,
    nps: Option<u64>,
    pv: Option<Vec<String>>,
}

impl WorkerActor {
    async fn run(mut self) {
        if let Err(e) = self.boot().await {
            tracing::error!(worker_id = self.id, error = %e, "initial engine boot failed");
            self.status_tx.send_replace(WorkerStatus::Crashed);
        }

        loop {
            let cmd = match self.line_rx.as_mut() {
                Some(_) => {
                    tokio::select! {
                        cmd = self.cmd_rx.recv() => cmd,
                        line = recv_line(self.line_rx.as_mut().unwrap()) => {
                            if line.is_none() {
                                tracing::warn!(worker_id = self.id, "engine stdout closed while idle");
                                self.child = None;
                                self.line_rx = None;
                                self.status_tx.send_replace(WorkerStatus::Crashed);
                            }
                            continue;
                        }
                    }
                }
                None => self.cmd_rx.recv().await,
            };

            let Some(cmd) = cmd else { break };
            match cmd {
                WorkerCommand::Analyze { fen, opts, progress, reply } => {
                    self.handle_analyze(fen, opts, progress, reply).await;
                }
                WorkerCommand::NewGame => {
                    if self.child.is_some() {
                        self.send_line("ucinewgame").await;
                    }
                }
                WorkerCommand::Restart { reply } => {
                    let r = self.restart().await;
                    let _ = reply.send(r);
                }
                WorkerCommand::Shutdown { reply } => {
                    self.handle_shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn send_line(&mut self, s: &str) {
        tracing::debug!(worker_id = self.id, line = %s, "-> engine");
        if let Some(stdin) = self.stdin.as_mut() {
            let msg = format!("{s}\n");
            if let Err(e) = stdin.write_all(msg.as_bytes()).await {
                tracing::error!(worker_id = self.id, error = %e, "failed writing to engine stdin");
            }
        }
    }

    async fn boot(&mut self) -> Result<(), UciError> {
        self.status_tx.send_replace(WorkerStatus::Initializing);
        self.stop_requested.store(false, Ordering::SeqCst);

        let mut child = Command::new(&self.config.engine_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| UciError::EngineStartFailed("engine process has no stdout".into()))?;
        let stderr = child.stderr.take();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| UciError::EngineStartFailed("engine process has no stdin".into()))?;

        let (line_tx, line_rx) = mpsc::channel(256);
        tokio::spawn(read_stdout(stdout, line_tx, self.last_message_time.clone()));
        if let Some(stderr) = stderr {
            tokio::spawn(drain_stderr(stderr, self.id));
        }

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.line_rx = Some(line_rx);
        self.configured_multipv = 1;

        self.send_line("uci").await;
        self.wait_for(is_uciok, BOOT_TIMEOUT).await?;

        self.send_line(&format!("setoption name Threads value {}", self.config.threads))
            .await;
        self.send_line(&format!("setoption name Hash value {}", self.config.hash_mb))
            .await;
        self.send_line("setoption name MultiPV value 1").await;

        self.send_line("isready").await;
        self.wait_for(is_readyok, BOOT_TIMEOUT).await?;

        self.status_tx.send_replace(WorkerStatus::Idle);
        Ok(())
    }

    async fn wait_for(&mut self, pred: fn(&str) -> bool, timeout: Duration) -> Result<(), UciError> {
        let line_rx = self.line_rx.as_mut().expect("line_rx set during boot");
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                line = line_rx.recv() => {
                    match line {
                        None => return Err(UciError::EngineClosedUnexpectedly),
                        Some(l) => if pred(&l) { return Ok(()); }
                    }
                }
                _ = &mut deadline => return Err(UciError::EngineInitTimeout),
            }
        }
    }

    async fn restart(&mut self) -> Result<(), UciError> {
        self.status_tx.send_replace(WorkerStatus::Restarting);
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
        }
        self.line_rx = None;
        self.stdin = None;

        let mut attempts = 0u8;
        loop {
            attempts += 1;
            match self.boot().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(worker_id = self.id, attempt = attempts, error = %e, "restart attempt failed");
                    if attempts >= 3 {
                        self.status_tx.send_replace(WorkerStatus::Crashed);
                        tracing::error!(worker_id = self.id, "engine-failed: exhausted restart attempts");
                        return Err(e);
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    }

    async fn handle_shutdown(&mut self) {
        self.status_tx.send_replace(WorkerStatus::Shutdown);
        if self.child.is_none() {
            return;
        }
        self.send_line("quit").await;
        let mut child = self.child.take().unwrap();

        if tokio::time::timeout(SHUTDOWN_BUDGET, child.wait()).await.is_ok() {
            return;
        }
        if let Some(pid) = child.id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
        if tokio::time::timeout(SHUTDOWN_BUDGET, child.wait()).await.is_ok() {
            return;
        }
        let _ = child.start_kill();
        let _ = child.wait().await;
    }

    async fn handle_analyze(
        &mut self,
        fen: String,
        opts: AnalysisOptions,
        progress: Option<mpsc::Sender<ProgressSnapshot>>,
        reply: oneshot::Sender<Result<AnalysisResult, UciError>>,
    ) {
        if self.child.is_none() || self.line_rx.is_none() {
            let _ = reply.send(Err(UciError::EngineNotReady));
            return;
        }
        if self.shutdown_requested.load(Ordering::SeqCst) {
            let _ = reply.send(Err(UciError::EngineShuttingDown));
            return;
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.status_tx.send_replace(WorkerStatus::Busy);

        if opts.multi_pv != self.configured_multipv {
            self.send_line(&format!("setoption name MultiPV value {}", opts.multi_pv))
                .await;
            self.configured_multipv = opts.multi_pv;
        }
        self.send_line(&format!("position fen {fen}")).await;
        self.send_line(&format!("go depth {}", opts.depth)).await;

        let result = self.run_analysis_loop(opts.time_limit, &progress).await;

        match &result {
            Ok(_) => {
                self.status_tx.send_replace(WorkerStatus::Idle);
            }
            Err(UciError::NoLegalMoves) => {
                self.status_tx.send_replace(WorkerStatus::Idle);
            }
            Err(UciError::EngineShuttingDown) => {
                // child intentionally left alone; Shutdown command handles it.
            }
            Err(_) => {
                self.status_tx.send_replace(WorkerStatus::Crashed);
                self.child = None;
                self.line_rx = None;
            }
        }

        let _ = reply.send(result);
    }

    async fn run_analysis_loop(
        &mut self,
        time_limit: Option<Duration>,
        progress: &Option<mpsc::Sender<ProgressSnapshot>>,
    ) -> Result<AnalysisResult, UciError> {
        let mut lines: HashMap<u32, PartialLine> = HashMap::new();
        let mut max_depth = 0u32;
        let mut last_emit = Instant::now();
        let mut stop_sent = false;
        let mut grace_armed = false;

        let timeout_duration = time_limit.map(|d| d + Duration::from_secs(1));
        let timeout_sleep = tokio::time::sleep(timeout_duration.unwrap_or(Duration::from_secs(86_400)));
        tokio::pin!(timeout_sleep);
        let grace_sleep = tokio::time::sleep(Duration::from_secs(86_400));
        tokio::pin!(grace_sleep);
        let heartbeat = tokio::time::interval(Duration::from_secs(5));
        tokio::pin!(heartbeat);

        let mut line_rx = self.line_rx.take().expect("checked Some above");

        let result = loop {
            if !stop_sent && self.shutdown_requested.load(Ordering::SeqCst) {
                self.send_line("stop").await;
                break Err(UciError::EngineShuttingDown);
            }
            if !stop_sent && self.stop_requested.load(Ordering::SeqCst) {
                stop_sent = true;
                self.send_line("stop").await;
                grace_armed = true;
                grace_sleep.as_mut().reset(tokio::time::Instant::now() + STOP_GRACE);
            }

            tokio::select! {
                line = line_rx.recv() => {
                    match line {
                        None => break Err(UciError::EngineClosedUnexpectedly),
                        Some(raw) => {
                            if let Some(update) = parse_info_line(&raw) {
                                apply_update(&mut lines, update, &mut max_depth);
                                if let Some(tx) = progress {
                                    if last_emit.elapsed() >= Duration::from_millis(200) {
                                        last_emit = Instant::now();
                                        let snap = snapshot(&lines, max_depth);
                                        let _ = tx.try_send(snap);
                                    }
                                }
                            } else if let Some(bm) = parse_bestmove_line(&raw) {
                                break Ok(finalize(&lines, max_depth, bm.best));
                            }
                        }
                    }
                }
                _ = &mut timeout_sleep, if !stop_sent => {
                    stop_sent = true;
                    self.send_line("stop").await;
                    grace_armed = true;
                    grace_sleep.as_mut().reset(tokio::time::Instant::now() + STOP_GRACE);
                }
                _ = &mut grace_sleep, if grace_armed => {
                    break Err(UciError::EngineClosedUnexpectedly);
                }
                _ = self.wake.notified() => {
                    // loop top re-checks stop_requested/shutdown_requested
                }
                _ = heartbeat.tick() => {
                    let last = self.last_message_time.load(Ordering::Relaxed);
                    if now_millis() - last > 60_000 && !stop_sent {
                        tracing::warn!(worker_id = self.id, "heartbeat stale while busy, forcing stop");
                        stop_sent = true;
                        self.send_line("stop").await;
                        grace_armed = true;
                        grace_sleep.as_mut().reset(tokio::time::Instant::now() + STOP_GRACE);
                    }
                }
            }
        };

        if result.is_ok() || matches!(result, Err(UciError::NoLegalMoves) | Err(UciError::EngineShuttingDown)) {
            self.line_rx = Some(line_rx);
        }
        result
    }
}

fn apply_update(lines: &mut HashMap<u32, PartialLine>, update: crate::protocol::InfoUpdate, max_depth: &mut u32) {
    let (Some(multipv), Some(depth)) = (update.multipv, update.depth) else {
        return;
    };
    if update.score.is_none() && update.pv.is_none() {
        return;
    }
    let entry = lines.entry(multipv).or_default();
    if entry.seen_depth && depth < entry.depth {
        return;
    }
    entry.depth = depth;
    entry.seen_depth = true;
    if let Some(sd) = update.seldepth {
        entry.seldepth = Some(sd);
    }
    if let Some(score) = update.score {
        entry.score = Some(score);
    }
    if let Some(nodes) = update.nodes {
        entry.nodes = Some(nodes);
    }
    if let Some(nps) = update.nps {
        entry.nps = Some(nps);
    }
    if let Some(pv) = update.pv {
        entry.pv = Some(pv);
    }
    if depth > *max_depth {
        *max_depth = depth;
    }
}

fn materialize(lines: &HashMap<u32, PartialLine>) -> Vec<PvLine> {
    let mut out: Vec<PvLine> = lines
        .iter()
        .filter_map(|(idx, l)| {
            let score = l.score?;
            let pv = l.pv.clone()?;
            let best_move = pv.first().cloned()?;
            Some(PvLine {
                multipv_index: *idx,
                score,
                depth: l.depth,
                seldepth: l.seldepth,
                nodes: l.nodes,
                nps: l.nps,
                best_move,
                pv,
            })
        })
        .collect();
    out.sort_by_key(|l| l.multipv_index);
    out
}

fn snapshot(lines: &HashMap<u32, PartialLine>, max_depth: u32) -> ProgressSnapshot {
    ProgressSnapshot {
        lines: materialize(lines),
        max_depth,
    }
}

/// `bestmove (none)` means no legal moves. Otherwise, materialize the
/// accumulated MultiPV map; if the engine resolved before any `info` line
/// carried a full line (e.g. a forced single legal move), fall back to a
/// synthetic single-line result built from the `bestmove` token itself.
fn finalize(lines: &HashMap<u32, PartialLine>, max_depth: u32, best: Option<String>) -> AnalysisResult {
    let mut materialized = materialize(lines);
    if materialized.is_empty() {
        if let Some(best) = best {
            materialized.push(PvLine {
                multipv_index: 1,
                score: Score::Centipawns(0),
                depth: max_depth.max(1),
                seldepth: None,
                nodes: None,
                nps: None,
                best_move: best.clone(),
                pv: vec![best],
            });
        }
    }
    AnalysisResult { lines: materialized }
}

async fn recv_line(rx: &mut mpsc::Receiver<String>) -> Option<String> {
    rx.recv().await
}

async fn read_stdout(stdout: ChildStdout, line_tx: mpsc::Sender<String>, last_message_time: Arc<AtomicI64>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                last_message_time.store(now_millis(), Ordering::Relaxed);
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "error reading engine stdout");
                break;
            }
        }
    }
}

async fn drain_stderr(stderr: ChildStderr, worker_id: u32) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(worker_id, stderr = %line, "engine stderr");
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A fixed-depth, deterministic UCI-speaking shell script. Answers the boot
/// handshake (`uci`/`isready`) normally; on `go` it keeps emitting `info`
/// lines until it reads `stop` on stdin, then immediately answers
/// `bestmove` with whatever partial line it had. Models the "mock engine"
/// a `stop`/timeout scenario needs without a real Stockfish install.
#[cfg(test)]
const STOP_RESPONSIVE_ENGINE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci) printf 'id name MockEngine\nuciok\n' ;;
    isready) printf 'readyok\n' ;;
    go*)
      (
        d=1
        while [ "$d" -le 200 ]; do
          printf 'info depth %d seldepth %d multipv 1 score cp 10 nodes 10 nps 10 pv e2e4\n' "$d" "$((d + 2))"
          d=$((d + 1))
          sleep 0.02
        done
      ) &
      bg=$!
      while IFS= read -r inner; do
        case "$inner" in
          stop) kill "$bg" 2>/dev/null; wait "$bg" 2>/dev/null; printf 'bestmove e2e4\n'; break ;;
          quit) kill "$bg" 2>/dev/null; exit 0 ;;
        esac
      done
      ;;
    quit) exit 0 ;;
  esac
done
"#;

/// Answers the boot handshake normally, then on `go` prints a single `info`
/// line and exits without ever answering `bestmove` - the engine stdout
/// closing mid-analysis that a crash/retry scenario needs to observe.
#[cfg(test)]
const CRASH_ON_GO_ENGINE: &str = r#"#!/bin/sh
while IFS= read -r line; do
  case "$line" in
    uci) printf 'id name MockEngine\nuciok\n' ;;
    isready) printf 'readyok\n' ;;
    go*)
      printf 'info depth 3 seldepth 5 multipv 1 score cp 5 nodes 5 nps 5 pv e2e4\n'
      exit 1
      ;;
    quit) exit 0 ;;
  esac
done
"#;

#[cfg(test)]
fn write_executable_script(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write mock engine script");
    let mut perms = std::fs::metadata(&path).expect("stat mock engine script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod mock engine script");
    path
}

//! The priority-aware dispatcher. A single task owns the worker list, the
//! queue, and every status transition, generalizing a pattern of N workers
//! pulling one shared job queue to a reserved/batch priority split.

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};
use uci_worker::{AnalysisOptions, AnalysisResult, ProgressSnapshot, UciError, UciWorker, WorkerConfig, WorkerStatus};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::stats::PoolStats;
use crate::task::{Priority, TaskRequest};

enum PoolCommand {
    Submit {
        task: TaskRequest,
        reply: oneshot::Sender<Result<AnalysisResult, PoolError>>,
    },
    NewGame,
    StopLiveTask,
    Stats {
        reply: oneshot::Sender<PoolStats>,
    },
    Shutdown,
}

/// A cheap-to-clone handle to the pool's dispatcher actor.
#[derive(Clone)]
pub struct WorkerPool {
    cmd_tx: mpsc::Sender<PoolCommand>,
}

impl WorkerPool {
    pub fn spawn(config: PoolConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let dispatcher = Dispatcher::new(config);
        tokio::spawn(dispatcher.run(cmd_rx));
        Self { cmd_tx }
    }

    pub async fn submit(&self, task: TaskRequest) -> Result<AnalysisResult, PoolError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Submit { task, reply: reply_tx })
            .await
            .map_err(|_| PoolError::PoolShuttingDown)?;
        reply_rx.await.map_err(|_| PoolError::PoolShuttingDown)?
    }

    pub async fn new_game(&self) {
        let _ = self.cmd_tx.send(PoolCommand::NewGame).await;
    }

    pub async fn stop_live_task(&self) {
        let _ = self.cmd_tx.send(PoolCommand::StopLiveTask).await;
    }

    pub async fn stats(&self) -> PoolStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(PoolCommand::Stats { reply: reply_tx }).await.is_err() {
            return PoolStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(PoolCommand::Shutdown).await;
    }
}

/// Pure priority-selection rule, factored out of [`Dispatcher::pick_worker`]
/// so it can be exercised without a real worker pool. `live` prefers an idle
/// reserved worker, falling back to any idle worker; `batch` only ever takes
/// an idle non-reserved worker.
fn select_worker(workers: impl Iterator<Item = (bool, WorkerStatus)>, priority: Priority) -> Option<usize> {
    let workers: Vec<(bool, WorkerStatus)> = workers.collect();
    match priority {
        Priority::Live => workers
            .iter()
            .position(|(reserved, status)| *reserved && *status == WorkerStatus::Idle)
            .or_else(|| workers.iter().position(|(_, status)| *status == WorkerStatus::Idle)),
        Priority::Batch => workers
            .iter()
            .position(|(reserved, status)| !*reserved && *status == WorkerStatus::Idle),
    }
}

struct WorkerSlot {
    handle: UciWorker,
    reserved: bool,
    status: WorkerStatus,
}

struct InFlightTask {
    fen: String,
    options: AnalysisOptions,
    priority: Priority,
    progress: Option<mpsc::Sender<ProgressSnapshot>>,
    retry_count: u32,
    max_retries: u32,
    reply: oneshot::Sender<Result<AnalysisResult, PoolError>>,
}

enum DispatchEvent {
    TaskDone {
        worker_idx: usize,
        task_id: u64,
        result: Result<AnalysisResult, UciError>,
    },
    RestartDone {
        worker_idx: usize,
    },
}

struct Dispatcher {
    config: PoolConfig,
    workers: Vec<WorkerSlot>,
    queue: VecDeque<(u64, InFlightTask)>,
    in_flight: HashMap<u64, InFlightTask>,
    next_id: u64,
    completed: u64,
    failed: u64,
}

impl Dispatcher {
    fn new(config: PoolConfig) -> Self {
        Self {
            config,
            workers: Vec::new(),
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            next_id: 0,
            completed: 0,
            failed: 0,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<PoolCommand>) {
        for i in 0..self.config.pool_size {
            let reserved = i < self.config.reserved_for_live;
            let wc = WorkerConfig {
                id: i as u32,
                engine_path: self.config.engine_path.clone(),
                threads: self.config.threads_per_worker,
                hash_mb: self.config.hash_per_worker_mb,
            };
            let handle = uci_worker::spawn(wc);
            self.workers.push(WorkerSlot {
                handle,
                reserved,
                status: WorkerStatus::Initializing,
            });
        }

        let (event_tx, mut event_rx) = mpsc::channel::<DispatchEvent>(256);
        let mut shutting_down = false;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        PoolCommand::Submit { task, reply } => {
                            self.handle_submit(task, reply, &event_tx, shutting_down);
                        }
                        PoolCommand::NewGame => self.handle_new_game().await,
                        PoolCommand::StopLiveTask => self.handle_stop_live_task().await,
                        PoolCommand::Stats { reply } => { let _ = reply.send(self.stats()); }
                        PoolCommand::Shutdown => {
                            shutting_down = true;
                            self.handle_shutdown().await;
                            break;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_event(event, &event_tx).await;
                }
            }
        }
    }

    fn handle_submit(
        &mut self,
        task: TaskRequest,
        reply: oneshot::Sender<Result<AnalysisResult, PoolError>>,
        event_tx: &mpsc::Sender<DispatchEvent>,
        shutting_down: bool,
    ) {
        if shutting_down {
            let _ = reply.send(Err(PoolError::PoolShuttingDown));
            return;
        }
        if self.queue.len() >= self.config.max_queue_size {
            let _ = reply.send(Err(PoolError::QueueFull));
            return;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back((
            id,
            InFlightTask {
                fen: task.fen,
                options: task.options,
                priority: task.priority,
                progress: task.progress,
                retry_count: 0,
                max_retries: 2,
                reply,
            },
        ));
        self.dispatch(event_tx);
    }

    async fn handle_new_game(&mut self) {
        for w in self.workers.iter() {
            if !w.reserved && w.status == WorkerStatus::Idle {
                w.handle.new_game().await;
            }
        }
    }

    async fn handle_stop_live_task(&mut self) {
        for w in self.workers.iter() {
            if w.reserved && w.status == WorkerStatus::Busy {
                w.handle.stop().await;
            }
        }
    }

    async fn handle_shutdown(&mut self) {
        while let Some((_, task)) = self.queue.pop_front() {
            let _ = task.reply.send(Err(PoolError::PoolShuttingDown));
        }
        for (_, task) in self.in_flight.drain() {
            let _ = task.reply.send(Err(PoolError::PoolShuttingDown));
        }
        for w in self.workers.iter() {
            w.handle.shutdown().await;
        }
    }

    /// `pickWorker(live)`: prefer an idle reserved worker, else any idle
    /// worker. `pickWorker(batch)`: only an idle non-reserved worker, never
    /// stealing reserved capacity.
    fn pick_worker(&self, priority: Priority) -> Option<usize> {
        select_worker(self.workers.iter().map(|w| (w.reserved, w.status)), priority)
    }

    /// FIFO scan of the queue on every enqueue and completion.
    fn dispatch(&mut self, event_tx: &mpsc::Sender<DispatchEvent>) {
        let mut i = 0;
        while i < self.queue.len() {
            let priority = self.queue[i].1.priority;
            match self.pick_worker(priority) {
                Some(worker_idx) => {
                    let (task_id, task) = self.queue.remove(i).expect("index in bounds");
                    self.workers[worker_idx].status = WorkerStatus::Busy;
                    let handle = self.workers[worker_idx].handle.clone();
                    let timeout = self.config.task_timeout;
                    let fen = task.fen.clone();
                    let options = task.options.clone();
                    let progress = task.progress.clone();
                    let tx = event_tx.clone();
                    self.in_flight.insert(task_id, task);
                    tokio::spawn(run_task(handle, timeout, fen, options, progress, worker_idx, task_id, tx));
                }
                None => i += 1,
            }
        }
    }

    async fn handle_event(&mut self, event: DispatchEvent, event_tx: &mpsc::Sender<DispatchEvent>) {
        match event {
            DispatchEvent::TaskDone { worker_idx, task_id, result } => {
                let Some(mut task) = self.in_flight.remove(&task_id) else {
                    return;
                };
                match result {
                    Ok(analysis) => {
                        self.workers[worker_idx].status = self.workers[worker_idx].handle.status();
                        self.completed += 1;
                        let _ = task.reply.send(Ok(analysis));
                    }
                    Err(e) if !e.is_retryable() => {
                        self.workers[worker_idx].status = self.workers[worker_idx].handle.status();
                        self.failed += 1;
                        let _ = task.reply.send(Err(PoolError::Engine(e)));
                    }
                    Err(e) => {
                        tracing::warn!(worker_idx, error = %e, "retryable task failure, scheduling worker restart");
                        self.workers[worker_idx].status = WorkerStatus::Restarting;
                        let handle = self.workers[worker_idx].handle.clone();
                        let tx = event_tx.clone();
                        tokio::spawn(async move {
                            let _ = handle.restart().await;
                            let _ = tx.send(DispatchEvent::RestartDone { worker_idx }).await;
                        });
                        if task.retry_count < task.max_retries {
                            task.retry_count += 1;
                            // Re-enqueue at the front so ply ordering in game
                            // analysis is not disturbed by a mid-game retry.
                            self.queue.push_front((task_id, task));
                        } else {
                            self.failed += 1;
                            let _ = task.reply.send(Err(PoolError::Engine(e)));
                        }
                    }
                }
                self.dispatch(event_tx);
            }
            DispatchEvent::RestartDone { worker_idx } => {
                self.workers[worker_idx].status = self.workers[worker_idx].handle.status();
                self.dispatch(event_tx);
            }
        }
    }

    fn stats(&self) -> PoolStats {
        let mut s = PoolStats {
            total: self.workers.len(),
            queue_len: self.queue.len(),
            completed: self.completed,
            failed: self.failed,
            ..Default::default()
        };
        for w in &self.workers {
            if w.reserved {
                s.reserved += 1;
            } else {
                s.batch_workers += 1;
            }
            match w.status {
                WorkerStatus::Idle => s.idle += 1,
                WorkerStatus::Busy => s.busy += 1,
                WorkerStatus::Crashed => s.crashed += 1,
                WorkerStatus::Restarting => s.restarting += 1,
                WorkerStatus::Initializing | WorkerStatus::Shutdown => {}
            }
        }
        s
    }
}

async fn run_task(
    handle: UciWorker,
    task_timeout: std::time::Duration,
    fen: String,
    options: AnalysisOptions,
    progress: Option<mpsc::Sender<ProgressSnapshot>>,
    worker_idx: usize,
    task_id: u64,
    event_tx: mpsc::Sender<DispatchEvent>,
) {
    let analyze_fut = handle.analyze_with_progress(fen, options, progress);
    tokio::pin!(analyze_fut);
    let sleep = tokio::time::sleep(task_timeout);
    tokio::pin!(sleep);
    let mut stopped = false;

    let result = loop {
        tokio::select! {
            res = &mut analyze_fut => break res,
            _ = &mut sleep, if !stopped => {
                // Cooperative: do not kill the future, the engine will still
                // return best-so-far and `analyze_fut` will resolve normally.
                stopped = true;
                handle.stop().await;
            }
        }
    };

    let _ = event_tx
        .send(DispatchEvent::TaskDone { worker_idx, task_id, result })
        .await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn workers(spec: &[(bool, WorkerStatus)]) -> Vec<(bool, WorkerStatus)> {
        spec.to_vec()
    }

    /// Answers the UCI boot handshake, then on `go` keeps emitting `info`
    /// lines until it reads `stop`, answering `bestmove` right away - the
    /// mock engine a pool-level stop/timeout scenario needs to observe.
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

    /// Crashes (closes stdout mid-`go`, no `bestmove`) exactly once, tracked
    /// via a state file that survives the subprocess restart; every `go`
    /// after that answers normally. Models a worker that crashes mid-task
    /// and comes back healthy on the next boot.
    fn crash_once_then_succeed_script(state_file: &std::path::Path) -> String {
        format!(
            r#"#!/bin/sh
STATE="{state}"
[ -f "$STATE" ] || printf '0' > "$STATE"
while IFS= read -r line; do
  case "$line" in
    uci) printf 'id name MockEngine\nuciok\n' ;;
    isready) printf 'readyok\n' ;;
    go*)
      n=$(cat "$STATE")
      if [ "$n" = "0" ]; then
        printf '1' > "$STATE"
        printf 'info depth 4 seldepth 4 multipv 1 score cp 15 nodes 10 nps 10 pv e2e4\n'
        exit 1
      fi
      printf 'info depth 12 seldepth 14 multipv 1 score cp 30 nodes 500 nps 9000 pv e2e4 e7e5\n'
      printf 'bestmove e2e4\n'
      ;;
    quit) exit 0 ;;
  esac
done
"#,
            state = state_file.display()
        )
    }

    fn write_executable_script(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
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

    #[test]
    fn live_prefers_idle_reserved_worker() {
        let w = workers(&[
            (false, WorkerStatus::Idle),
            (true, WorkerStatus::Busy),
            (true, WorkerStatus::Idle),
        ]);
        assert_eq!(select_worker(w.into_iter(), Priority::Live), Some(2));
    }

    #[test]
    fn live_falls_back_to_any_idle_worker_when_no_reserved_idle() {
        let w = workers(&[(true, WorkerStatus::Busy), (false, WorkerStatus::Idle)]);
        assert_eq!(select_worker(w.into_iter(), Priority::Live), Some(1));
    }

    #[test]
    fn live_returns_none_when_every_worker_is_busy() {
        let w = workers(&[(true, WorkerStatus::Busy), (false, WorkerStatus::Busy)]);
        assert_eq!(select_worker(w.into_iter(), Priority::Live), None);
    }

    #[test]
    fn batch_never_steals_a_reserved_worker() {
        let w = workers(&[(true, WorkerStatus::Idle), (true, WorkerStatus::Idle)]);
        assert_eq!(select_worker(w.into_iter(), Priority::Batch), None);
    }

    #[test]
    fn batch_picks_the_first_idle_non_reserved_worker() {
        let w = workers(&[
            (true, WorkerStatus::Idle),
            (false, WorkerStatus::Busy),
            (false, WorkerStatus::Idle),
        ]);
        assert_eq!(select_worker(w.into_iter(), Priority::Batch), Some(2));
    }

    #[test]
    fn batch_skips_crashed_and_restarting_workers() {
        let w = workers(&[
            (false, WorkerStatus::Crashed),
            (false, WorkerStatus::Restarting),
            (false, WorkerStatus::Idle),
        ]);
        assert_eq!(select_worker(w.into_iter(), Priority::Batch), Some(2));
    }

    #[tokio::test]
    async fn a_slow_task_is_stopped_at_the_task_timeout_and_still_resolves_successfully() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine_path = write_executable_script(dir.path(), "stop-responsive.sh", STOP_RESPONSIVE_ENGINE);
        let pool = WorkerPool::spawn(PoolConfig {
            pool_size: 1,
            reserved_for_live: 0,
            task_timeout: Duration::from_millis(300),
            engine_path,
            ..PoolConfig::default()
        });
        wait_for_idle_worker(&pool).await;

        let started = std::time::Instant::now();
        let opts = uci_worker::AnalysisOptions { depth: 60, multi_pv: 1, time_limit: None };
        let task = TaskRequest::new("startpos", opts, Priority::Batch);
        let result = pool
            .submit(task)
            .await
            .expect("the dispatcher's own timeout resolves the task successfully, not as an error");
        let elapsed = started.elapsed();

        let best = result.best().expect("at least one partial pv line");
        assert!(best.depth < 60, "stop should cut the search well short of the requested depth");
        assert!(
            elapsed < Duration::from_secs(2),
            "the dispatcher should stop the task near its task_timeout, not run it out"
        );
    }

    #[tokio::test]
    async fn a_task_that_crashes_the_worker_mid_analysis_is_retried_and_still_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state_file = dir.path().join("crash-once.state");
        let engine_path =
            write_executable_script(dir.path(), "crash-once.sh", &crash_once_then_succeed_script(&state_file));
        let pool = WorkerPool::spawn(PoolConfig {
            pool_size: 1,
            reserved_for_live: 0,
            engine_path,
            ..PoolConfig::default()
        });
        wait_for_idle_worker(&pool).await;

        let task = TaskRequest::new("startpos", uci_worker::AnalysisOptions::default(), Priority::Batch);
        let result = pool.submit(task).await.expect("the retried task should eventually complete");
        assert!(result.best().is_some());

        let stats = pool.stats().await;
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
    }
}

use std::{
    collections::{HashMap, VecDeque},
    process::Stdio,
    sync::Arc,
};

use regex::Regex;
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
    sync::{RwLock, mpsc},
};
use tracing::{debug, warn};

use crate::domain::{
    error::DomainError,
    events::{EVENT_ACCEPT, EventSink},
    models::{AcceptStatus, AcceptTaskRecord, AcceptTaskState},
};

/// Output lines of `netboot-manager accept` that mark progress.
///
/// Every pattern is checked against every line, in this order.
pub const PROGRESS_PATTERNS: &[(&str, AcceptStatus)] = &[
    (r"^gen_ca: started.*$", AcceptStatus::Started),
    (r"^gen_ca: finished.*$", AcceptStatus::CaReady),
    (r"^gen_server: finished.*$", AcceptStatus::ServerReady),
    (r"^gen_client: finished.*$", AcceptStatus::ClientReady),
];

/// Finished tasks kept for status polling; older ones are forgotten.
pub const FINISHED_TASK_RETENTION: usize = 64;

/// Runs accept processes in the background and reports their progress.
#[derive(Clone)]
pub struct AcceptTaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    sink: Arc<dyn EventSink>,
    patterns: Vec<(Regex, AcceptStatus)>,
    retention: usize,
    tasks: RwLock<TaskTable>,
}

#[derive(Default)]
struct TaskTable {
    records: HashMap<String, AcceptTaskRecord>,
    finished: VecDeque<String>,
}

impl AcceptTaskRunner {
    pub fn new(sink: Arc<dyn EventSink>) -> Result<Self, DomainError> {
        Self::with_patterns(sink, PROGRESS_PATTERNS, FINISHED_TASK_RETENTION)
    }

    pub fn with_patterns(
        sink: Arc<dyn EventSink>,
        patterns: &[(&str, AcceptStatus)],
        retention: usize,
    ) -> Result<Self, DomainError> {
        let patterns = patterns
            .iter()
            .map(|(pattern, status)| {
                Regex::new(pattern)
                    .map(|regex| (regex, *status))
                    .map_err(|error| {
                        DomainError::InvalidRequest(format!(
                            "invalid progress pattern {pattern}: {error}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            inner: Arc::new(RunnerInner {
                sink,
                patterns,
                retention,
                tasks: RwLock::new(TaskTable::default()),
            }),
        })
    }

    /// Starts `command` for `device_id` and returns the task id immediately.
    pub async fn start(&self, device_id: &str, command: Command) -> String {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.inner.tasks.write().await.records.insert(
            task_id.clone(),
            AcceptTaskRecord {
                task_id: task_id.clone(),
                id: device_id.to_owned(),
                state: AcceptTaskState::Pending,
            },
        );

        let inner = Arc::clone(&self.inner);
        let spawned_id = task_id.clone();
        let device_id = device_id.to_owned();
        tokio::spawn(async move {
            inner.run(&spawned_id, &device_id, command).await;
        });

        task_id
    }

    pub async fn status(&self, task_id: &str) -> Option<AcceptTaskRecord> {
        self.inner.tasks.read().await.records.get(task_id).cloned()
    }
}

impl RunnerInner {
    async fn run(&self, task_id: &str, device_id: &str, mut command: Command) {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                warn!("accept task {task_id} failed to start for {device_id}: {error}");
                self.finish(task_id, device_id, false).await;
                return;
            }
        };
        self.set_state(task_id, AcceptTaskState::Running).await;
        debug!("accept task {task_id} running for {device_id}");

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);

        while let Some(line) = line_rx.recv().await {
            for (pattern, status) in &self.patterns {
                if pattern.is_match(&line) {
                    self.notify(task_id, device_id, *status);
                }
            }
        }

        let succeeded = match child.wait().await {
            Ok(status) => status.success(),
            Err(error) => {
                warn!("accept task {task_id} could not be awaited: {error}");
                false
            }
        };
        self.finish(task_id, device_id, succeeded).await;
    }

    async fn finish(&self, task_id: &str, device_id: &str, succeeded: bool) {
        let (state, status) = if succeeded {
            (AcceptTaskState::Succeeded, AcceptStatus::Succeeded)
        } else {
            (AcceptTaskState::Failed, AcceptStatus::Failed)
        };
        self.complete(task_id, state).await;
        debug!("accept task {task_id} for {device_id} finished succeeded={succeeded}");
        self.notify(task_id, device_id, status);
    }

    async fn set_state(&self, task_id: &str, state: AcceptTaskState) {
        if let Some(task) = self.tasks.write().await.records.get_mut(task_id) {
            task.state = state;
        }
    }

    /// Records the terminal state and drops the oldest finished tasks beyond
    /// the retention limit.
    async fn complete(&self, task_id: &str, state: AcceptTaskState) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.records.get_mut(task_id) {
            task.state = state;
        }
        tasks.finished.push_back(task_id.to_owned());
        while tasks.finished.len() > self.retention {
            let Some(evicted) = tasks.finished.pop_front() else {
                break;
            };
            tasks.records.remove(&evicted);
        }
    }

    fn notify(&self, task_id: &str, device_id: &str, status: AcceptStatus) {
        self.sink.emit(
            EVENT_ACCEPT,
            json!({
                "task_id": task_id,
                "status": status,
                "id": device_id,
            }),
        );
    }
}

async fn forward_lines<R>(reader: R, lines_tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if lines_tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                debug!("accept task output closed: {error}");
                break;
            }
        }
    }
}

//! Background process table.
//!
//! Lets a shell-execution tool return immediately with an opaque handle
//! while the spawned command keeps running. The table is the sole owner of
//! process state: output is drained incrementally by reader tasks (never
//! read-to-completion synchronously), and a completed process's output stays
//! retrievable until explicit interrupt or session-end cleanup.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, RwLock};

/// Opaque handle, unique within the session.
pub type ProcessId = String;

/// Liveness of one tracked process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited(i32),
    Killed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Exited(code) => write!(f, "exited({code})"),
            ProcessStatus::Killed => write!(f, "killed"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    /// The id is unrecognized or was already cleaned up.
    #[error("unknown process id: {0}")]
    UnknownProcess(ProcessId),
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Summary row for `list()`.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub command: String,
    pub status: ProcessStatus,
    pub started_at: DateTime<Utc>,
}

struct ProcessEntry {
    id: ProcessId,
    command: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    status: Mutex<ProcessStatus>,
    output: Mutex<String>,
    interrupted: AtomicBool,
}

/// Tracks long-running external processes independent of the conversation.
#[derive(Default)]
pub struct ProcessTable {
    processes: RwLock<HashMap<ProcessId, Arc<ProcessEntry>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a command asynchronously and return its handle immediately.
    pub async fn spawn(&self, command: &str) -> Result<ProcessId, ProcessError> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let id = uuid::Uuid::new_v4().to_string();
        let entry = Arc::new(ProcessEntry {
            id: id.clone(),
            command: command.to_string(),
            pid: child.id(),
            started_at: Utc::now(),
            status: Mutex::new(ProcessStatus::Running),
            output: Mutex::new(String::new()),
            interrupted: AtomicBool::new(false),
        });

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain_lines(stdout, entry.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_lines(stderr, entry.clone()));
        }

        // Reaper: record the exit status once the child finishes. An
        // interrupt that already marked the entry Killed wins.
        let reaper_entry = entry.clone();
        tokio::spawn(async move {
            let exit = child.wait().await;
            let mut status = reaper_entry.status.lock().await;
            if *status != ProcessStatus::Running {
                return;
            }
            *status = if reaper_entry.interrupted.load(Ordering::SeqCst) {
                ProcessStatus::Killed
            } else {
                match exit {
                    Ok(exit) => ProcessStatus::Exited(exit.code().unwrap_or(-1)),
                    Err(_) => ProcessStatus::Exited(-1),
                }
            };
        });

        tracing::info!(id = %id, pid = ?entry.pid, command = %command, "spawned background process");
        self.processes.write().await.insert(id.clone(), entry);
        Ok(id)
    }

    async fn entry(&self, id: &str) -> Result<Arc<ProcessEntry>, ProcessError> {
        self.processes
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ProcessError::UnknownProcess(id.to_string()))
    }

    /// Non-blocking liveness poll.
    pub async fn status(&self, id: &str) -> Result<ProcessStatus, ProcessError> {
        let entry = self.entry(id).await?;
        let status = *entry.status.lock().await;
        Ok(status)
    }

    /// Currently captured stdout/stderr, optionally only the newest lines.
    ///
    /// Safe on a still-running process (returns partial output) and on a
    /// finished one (returns the full buffer).
    pub async fn output(&self, id: &str, tail_lines: Option<usize>) -> Result<String, ProcessError> {
        let entry = self.entry(id).await?;
        let buffer = entry.output.lock().await;
        match tail_lines {
            Some(n) => {
                let lines: Vec<&str> = buffer.lines().collect();
                let start = lines.len().saturating_sub(n);
                Ok(lines[start..].join("\n"))
            }
            None => Ok(buffer.clone()),
        }
    }

    /// Send a termination signal; subsequent `status` calls report `Killed`.
    pub async fn interrupt(&self, id: &str) -> Result<(), ProcessError> {
        let entry = self.entry(id).await?;
        entry.interrupted.store(true, Ordering::SeqCst);
        {
            let mut status = entry.status.lock().await;
            if *status == ProcessStatus::Running {
                *status = ProcessStatus::Killed;
            }
        }
        #[cfg(unix)]
        if let Some(pid) = entry.pid {
            // SIGTERM, not SIGKILL: give the child a chance to clean up.
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        tracing::info!(id = %entry.id, pid = ?entry.pid, "interrupted background process");
        Ok(())
    }

    /// All processes known to the table, oldest first.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let processes = self.processes.read().await;
        let mut infos = Vec::with_capacity(processes.len());
        for entry in processes.values() {
            let status = *entry.status.lock().await;
            infos.push(ProcessInfo {
                id: entry.id.clone(),
                command: entry.command.clone(),
                status,
                started_at: entry.started_at,
            });
        }
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    /// Session-end cleanup: interrupt survivors and release every handle.
    pub async fn shutdown(&self) {
        let ids: Vec<ProcessId> = self.processes.read().await.keys().cloned().collect();
        for id in &ids {
            if let Ok(ProcessStatus::Running) = self.status(id).await {
                let _ = self.interrupt(id).await;
            }
        }
        self.processes.write().await.clear();
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "cleaned up background process table");
        }
    }
}

/// Append each line from a child pipe to the shared buffer as it arrives.
async fn drain_lines<R: AsyncRead + Unpin>(pipe: R, entry: Arc<ProcessEntry>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut buffer = entry.output.lock().await;
        buffer.push_str(&line);
        buffer.push('\n');
    }
}

//! Execution environment backed by a local project directory.
//!
//! All paths are confined to the workspace root. Processes run in the root,
//! each in its own session so a kill takes down everything it started.
//! Live processes are tracked by id until they exit or are killed, so
//! `kill` keeps working after the runner stops watching a process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use smithy_types::{OutputStream, ProcessId};
use smithy_utils::{PathError, atomic_write, ensure_real_within, resolve_within};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};

use crate::env::{EnvError, EnvFut, ExecutionEnvironment, OutputChunk, SpawnedProcess};
use crate::process::{ChildGuard, set_new_session};
use crate::ready::ReadySignal;

/// Output chunks buffered per process before readers wait on the consumer.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const READ_BUF_BYTES: usize = 4096;

type ProcessTable = Arc<Mutex<HashMap<ProcessId, oneshot::Sender<()>>>>;

pub struct LocalEnvironment {
    root: PathBuf,
    ready: ReadySignal,
    processes: ProcessTable,
    next_id: AtomicU64,
}

impl std::fmt::Debug for LocalEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEnvironment")
            .field("root", &self.root)
            .field("live_processes", &self.live_processes())
            .finish_non_exhaustive()
    }
}

impl LocalEnvironment {
    /// Create an environment rooted at `root`, creating the directory if it
    /// does not exist.
    pub fn new(root: impl Into<PathBuf>, ready: ReadySignal) -> Result<Self, EnvError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| EnvError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| EnvError::Io {
            path: root.display().to_string(),
            source,
        })?;
        tracing::debug!(root = %root.display(), "local environment ready");
        Ok(Self {
            root,
            ready,
            processes: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of processes spawned and not yet exited or killed.
    #[must_use]
    pub fn live_processes(&self) -> usize {
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve `path` under the root. Symlinks in the existing part of the
    /// target must not lead outside the root either.
    fn resolve(&self, path: &str) -> Result<PathBuf, EnvError> {
        let target = resolve_within(&self.root, path).map_err(|err| self.rejected(path, &err))?;
        ensure_real_within(&self.root, &target).map_err(|err| self.rejected(path, &err))?;
        Ok(target)
    }

    /// Like [`Self::resolve`], but the last component itself may be a
    /// symlink. Removal unlinks it without following.
    fn resolve_entry(&self, path: &str) -> Result<PathBuf, EnvError> {
        let target = resolve_within(&self.root, path).map_err(|err| self.rejected(path, &err))?;
        let parent = match target.parent() {
            Some(parent) if target != self.root => parent,
            _ => self.root.as_path(),
        };
        ensure_real_within(&self.root, parent).map_err(|err| self.rejected(path, &err))?;
        Ok(target)
    }

    fn rejected(&self, path: &str, err: &PathError) -> EnvError {
        tracing::warn!(path, root = %self.root.display(), "Rejected workspace path: {err}");
        EnvError::PathOutsideRoot {
            path: path.to_string(),
        }
    }

    async fn write_file_impl(&self, path: &str, content: &str) -> Result<(), EnvError> {
        let target = self.resolve(path)?;
        let bytes = content.as_bytes().to_vec();
        let io_err = |source| EnvError::Io {
            path: path.to_string(),
            source,
        };
        tokio::task::spawn_blocking(move || atomic_write(&target, &bytes))
            .await
            .map_err(|join| io_err(std::io::Error::other(join)))?
            .map_err(io_err)?;
        tracing::debug!(path, bytes = content.len(), "wrote file");
        Ok(())
    }

    async fn make_directories_impl(&self, path: &str) -> Result<(), EnvError> {
        let target = self.resolve(path)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|source| EnvError::Io {
                path: path.to_string(),
                source,
            })
    }

    async fn remove_tree_impl(&self, path: &str) -> Result<(), EnvError> {
        let target = self.resolve_entry(path)?;
        let io_err = |source| EnvError::Io {
            path: path.to_string(),
            source,
        };

        // The root itself is emptied, never removed.
        if target == self.root {
            let mut entries = tokio::fs::read_dir(&target).await.map_err(io_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
                remove_path(&entry.path()).await.map_err(io_err)?;
            }
            return Ok(());
        }

        match remove_path(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(err)),
        }
    }

    fn spawn_impl(&self, program: &str, args: &[String]) -> Result<SpawnedProcess, EnvError> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(&self.root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        set_new_session(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| EnvError::Spawn {
            command: display_command(program, args),
            source,
        })?;

        let id = ProcessId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(stdout, out_tx.clone(), OutputStream::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(stderr, out_tx, OutputStream::Stderr));
        }
        let input = child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as Box<dyn tokio::io::AsyncWrite + Send + Unpin>);

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        self.processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, kill_tx);

        tracing::debug!(process = %id, pid = child.id(), program, "spawned process");
        tokio::spawn(supervise(
            id,
            ChildGuard::new(child),
            kill_rx,
            exit_tx,
            Arc::clone(&self.processes),
        ));

        let command = display_command(program, args);
        let exit = Box::pin(async move {
            match exit_rx.await {
                Ok(result) => result.map_err(|source| EnvError::Io {
                    path: command,
                    source,
                }),
                Err(_) => Err(EnvError::ProcessGone(id)),
            }
        });

        Ok(SpawnedProcess {
            id,
            input,
            output: out_rx,
            exit,
        })
    }

    fn kill_impl(&self, id: ProcessId) {
        let trigger = self
            .processes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match trigger {
            Some(trigger) => {
                tracing::debug!(process = %id, "killing process");
                let _ = trigger.send(());
            }
            None => tracing::debug!(process = %id, "kill: process already gone"),
        }
    }
}

impl Drop for LocalEnvironment {
    fn drop(&mut self) {
        let mut table = self.processes.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, trigger) in table.drain() {
            tracing::debug!(process = %id, "killing process on environment drop");
            let _ = trigger.send(());
        }
    }
}

impl ExecutionEnvironment for LocalEnvironment {
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> EnvFut<'a, ()> {
        Box::pin(self.write_file_impl(path, content))
    }

    fn make_directories<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()> {
        Box::pin(self.make_directories_impl(path))
    }

    fn remove_tree<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()> {
        Box::pin(self.remove_tree_impl(path))
    }

    fn spawn<'a>(&'a self, program: &'a str, args: &'a [String]) -> EnvFut<'a, SpawnedProcess> {
        Box::pin(async move { self.spawn_impl(program, args) })
    }

    fn kill(&self, id: ProcessId) -> EnvFut<'_, ()> {
        self.kill_impl(id);
        Box::pin(async { Ok(()) })
    }

    fn is_ready_signal(&self, recent_output: &str) -> bool {
        self.ready.matches(recent_output)
    }
}

/// Own the child until it exits or a kill is requested. A dropped trigger
/// counts as a kill request.
async fn supervise(
    id: ProcessId,
    mut guard: ChildGuard,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<std::io::Result<Option<i32>>>,
    table: ProcessTable,
) {
    let exited = tokio::select! {
        status = guard.wait() => status,
        _ = kill_rx => None,
    };

    let status = match exited {
        Some(status) => status,
        None => {
            guard.kill();
            guard
                .wait()
                .await
                .unwrap_or_else(|| Err(std::io::Error::other("child already reaped")))
        }
    };
    guard.disarm();
    table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);

    let code = status.map(|s| s.code());
    match &code {
        Ok(code) => tracing::debug!(process = %id, ?code, "process exited"),
        Err(err) => tracing::warn!(process = %id, "Failed to wait for process: {err}"),
    }
    let _ = exit_tx.send(code);
}

/// Forward one stream as text chunks. Keeps draining the pipe after the
/// consumer goes away so the child never blocks on a full pipe.
///
/// Text is forwarded raw: ready markers are control sequences.
async fn read_stream<R: AsyncRead + Unpin + Send + 'static>(
    mut reader: R,
    tx: mpsc::Sender<OutputChunk>,
    stream: OutputStream,
) {
    let mut buf = [0u8; READ_BUF_BYTES];
    let mut pending: Vec<u8> = Vec::new();
    let mut consumer_alive = true;
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if !consumer_alive {
            continue;
        }
        pending.extend_from_slice(&buf[..n]);
        let text = take_utf8_prefix(&mut pending);
        if text.is_empty() {
            continue;
        }
        if tx.send(OutputChunk { stream, text }).await.is_err() {
            consumer_alive = false;
        }
    }
    if consumer_alive && !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send(OutputChunk { stream, text }).await;
    }
}

/// Split off the longest valid UTF-8 prefix, keeping an incomplete trailing
/// sequence for the next read. Invalid bytes are replaced.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> String {
    match std::str::from_utf8(pending) {
        Ok(text) => {
            let text = text.to_string();
            pending.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let valid = err.valid_up_to();
            let rest = pending.split_off(valid);
            let text = String::from_utf8_lossy(pending).into_owned();
            *pending = rest;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            text
        }
    }
}

async fn remove_path(path: &Path) -> std::io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

fn display_command(program: &str, args: &[String]) -> String {
    args.last().map_or_else(|| program.to_string(), Clone::clone)
}

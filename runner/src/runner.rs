//! The action runner actor.
//!
//! One task owns the [`ActionQueue`] and all scheduling decisions. Callers
//! talk to it through a cloneable [`RunnerHandle`]; each started action runs
//! in its own task and reports back over an internal channel. Status changes
//! go out as [`RunnerEvent`]s in the order they happen.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use smithy_parser::ParserCallbacks;
use smithy_types::{
    Action, ActionError, ActionId, ActionKind, ActionStatus, ArtifactKey, ExitCodePolicy,
    FailurePolicy, MessageId, ProcessId, RunnerEvent, RunnerSettings, SchedulingPolicy, sanitize_terminal_text,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::env::{ExecutionEnvironment, SpawnedProcess};
use crate::queue::{ActionQueue, QueuedAction};
use crate::ready::{OutputTail, READY_TAIL_BYTES};
use crate::shell::DetectedShell;

/// How long buffered output is still drained after a process exits.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(200);

enum RunnerCommand {
    Add(Action),
    Run(Action),
    AbandonArtifact(ArtifactKey),
    AbandonMessage(MessageId),
    ForgetMessage(MessageId),
    Snapshot(ArtifactKey, oneshot::Sender<Vec<QueuedAction>>),
    LiveProcesses(oneshot::Sender<Vec<(ArtifactKey, ActionId)>>),
    WaitIdle(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// How an action task finished its action.
#[derive(Debug)]
enum Outcome {
    Complete { exit_code: Option<i32>, ready: bool },
    Failed(ActionError),
}

/// Reports from action tasks to the actor.
#[derive(Debug)]
enum TaskEvent {
    Spawned {
        key: ArtifactKey,
        action: ActionId,
        process: ProcessId,
    },
    Finished {
        key: ArtifactKey,
        action: ActionId,
        outcome: Outcome,
    },
    /// A ready-signalled process exited.
    Exited {
        key: ArtifactKey,
        action: ActionId,
        exit_code: Option<i32>,
    },
}

type Slot = (ArtifactKey, ActionId);

struct InFlight {
    process: Option<ProcessId>,
    task: JoinHandle<()>,
}

/// Cloneable handle to a running [`ActionRunner`].
///
/// Plugs directly into a `MessageParser`: action open registers the action,
/// action close makes it runnable.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    commands: mpsc::UnboundedSender<RunnerCommand>,
}

impl std::fmt::Debug for RunnerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunnerCommand::Add(_) => "Add",
            RunnerCommand::Run(_) => "Run",
            RunnerCommand::AbandonArtifact(_) => "AbandonArtifact",
            RunnerCommand::AbandonMessage(_) => "AbandonMessage",
            RunnerCommand::ForgetMessage(_) => "ForgetMessage",
            RunnerCommand::Snapshot(..) => "Snapshot",
            RunnerCommand::LiveProcesses(_) => "LiveProcesses",
            RunnerCommand::WaitIdle(_) => "WaitIdle",
            RunnerCommand::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

impl RunnerHandle {
    fn send(&self, command: RunnerCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("action runner is gone; command dropped");
        }
    }

    /// Register an action whose content is still streaming.
    pub fn add_action(&self, action: &Action) {
        self.send(RunnerCommand::Add(action.clone()));
    }

    /// Provide final content; the action runs once its turn comes.
    pub fn run_action(&self, action: &Action) {
        self.send(RunnerCommand::Run(action.clone()));
    }

    /// Skip everything left in the artifact and kill its processes.
    pub fn abandon_artifact(&self, key: ArtifactKey) {
        self.send(RunnerCommand::AbandonArtifact(key));
    }

    /// Abandon every artifact of a message.
    pub fn abandon_message(&self, message_id: MessageId) {
        self.send(RunnerCommand::AbandonMessage(message_id));
    }

    /// Drop the settled artifacts of a message that will see no further
    /// deliveries. Artifacts with work left or a live process are kept.
    pub fn forget_message(&self, message_id: MessageId) {
        self.send(RunnerCommand::ForgetMessage(message_id));
    }

    /// Current entries of one artifact, in discovery order.
    pub async fn snapshot(&self, key: ArtifactKey) -> Vec<QueuedAction> {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerCommand::Snapshot(key, tx));
        rx.await.unwrap_or_default()
    }

    /// Actions whose processes outlived them after a ready signal.
    pub async fn live_processes(&self) -> Vec<(ArtifactKey, ActionId)> {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerCommand::LiveProcesses(tx));
        rx.await.unwrap_or_default()
    }

    /// Resolve once nothing is running and nothing is eligible to start.
    pub async fn wait_idle(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerCommand::WaitIdle(tx));
        let _ = rx.await;
    }

    /// Kill every tracked process and stop the actor.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(RunnerCommand::Shutdown(tx));
        let _ = rx.await;
    }
}

impl ParserCallbacks for RunnerHandle {
    fn on_action_open(&mut self, action: &Action) {
        self.add_action(action);
    }

    fn on_action_close(&mut self, action: &Action) {
        self.run_action(action);
    }
}

/// Actor state. Construct with [`ActionRunner::spawn`].
pub struct ActionRunner<E> {
    env: Arc<E>,
    settings: RunnerSettings,
    shell: DetectedShell,
    queue: ActionQueue,
    commands: mpsc::UnboundedReceiver<RunnerCommand>,
    task_tx: mpsc::UnboundedSender<TaskEvent>,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    events: mpsc::UnboundedSender<RunnerEvent>,
    /// Actions currently executing. Removal is the transition out of
    /// `Running`.
    running: HashMap<Slot, InFlight>,
    /// Completed through a ready signal, process still alive.
    detached: HashMap<Slot, InFlight>,
    abandoned_artifacts: HashSet<ArtifactKey>,
    abandoned_messages: HashSet<MessageId>,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

impl<E: ExecutionEnvironment> ActionRunner<E> {
    /// Start the actor on the current tokio runtime.
    ///
    /// Returns the handle and the receiving end of the status event stream.
    pub fn spawn(
        env: Arc<E>,
        settings: RunnerSettings,
        shell: DetectedShell,
    ) -> (RunnerHandle, mpsc::UnboundedReceiver<RunnerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tracing::info!(
            shell = %shell,
            scheduling = ?settings.scheduling,
            failure = ?settings.failure,
            exit_code = ?settings.exit_code,
            "starting action runner"
        );

        let runner = Self {
            env,
            settings,
            shell,
            queue: ActionQueue::new(),
            commands: command_rx,
            task_tx,
            task_rx,
            events: event_tx,
            running: HashMap::new(),
            detached: HashMap::new(),
            abandoned_artifacts: HashSet::new(),
            abandoned_messages: HashSet::new(),
            idle_waiters: Vec::new(),
        };
        tokio::spawn(runner.run());

        (
            RunnerHandle {
                commands: command_tx,
            },
            event_rx,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(RunnerCommand::Shutdown(done)) => {
                        self.stop_all();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.stop_all();
                        break;
                    }
                },
                Some(event) = self.task_rx.recv() => self.handle_task_event(event),
            }
            self.schedule();
            self.notify_idle();
        }
        tracing::debug!("action runner stopped");
    }

    fn emit(&self, event: RunnerEvent) {
        let _ = self.events.send(event);
    }

    fn is_abandoned(&self, key: &ArtifactKey) -> bool {
        self.abandoned_artifacts.contains(key) || self.abandoned_messages.contains(&key.message_id)
    }

    fn handle_command(&mut self, command: RunnerCommand) {
        match command {
            RunnerCommand::Add(action) => {
                self.register(&action);
            }
            RunnerCommand::Run(action) => {
                self.register(&action);
                let key = action.key();
                if self.queue.finalize(&action) {
                    tracing::debug!(artifact = %key, action = %action.id(), "action ready to run");
                }
            }
            RunnerCommand::AbandonArtifact(key) => {
                self.abandoned_artifacts.insert(key.clone());
                self.abandon(&key);
            }
            RunnerCommand::AbandonMessage(message_id) => {
                self.abandoned_artifacts
                    .retain(|key| key.message_id != message_id);
                for key in self.queue.keys_for_message(&message_id) {
                    self.abandon(&key);
                }
                self.prune(&message_id);
                self.abandoned_messages.insert(message_id);
            }
            RunnerCommand::ForgetMessage(message_id) => {
                self.prune(&message_id);
                self.abandoned_messages.remove(&message_id);
                self.abandoned_artifacts
                    .retain(|key| key.message_id != message_id);
            }
            RunnerCommand::Snapshot(key, reply) => {
                let _ = reply.send(self.queue.actions_for(&key).cloned().collect());
            }
            RunnerCommand::LiveProcesses(reply) => {
                let _ = reply.send(self.detached.keys().cloned().collect());
            }
            RunnerCommand::WaitIdle(reply) => self.idle_waiters.push(reply),
            RunnerCommand::Shutdown(_) => {}
        }
    }

    /// Enqueue on first sight. Actions of abandoned artifacts are skipped
    /// on arrival.
    fn register(&mut self, action: &Action) {
        let key = action.key();
        if !self.queue.enqueue(action) {
            return;
        }
        self.emit(RunnerEvent::ActionQueued {
            key: key.clone(),
            action: action.id().clone(),
            kind: action.kind().clone(),
        });
        if self.is_abandoned(&key) {
            self.skip_remaining(&key);
        }
    }

    fn skip_remaining(&mut self, key: &ArtifactKey) {
        for action in self.queue.skip_remaining(key) {
            tracing::debug!(artifact = %key, action = %action, "action skipped");
            self.emit(RunnerEvent::ActionSkipped {
                key: key.clone(),
                action,
            });
        }
    }

    fn abandon(&mut self, key: &ArtifactKey) {
        tracing::info!(artifact = %key, "abandoning artifact");
        let slots: Vec<Slot> = self
            .running
            .keys()
            .chain(self.detached.keys())
            .filter(|(k, _)| k == key)
            .cloned()
            .collect();
        for slot in slots {
            let flight = self
                .running
                .remove(&slot)
                .or_else(|| self.detached.remove(&slot));
            if let Some(flight) = flight {
                self.stop(flight);
            }
        }
        self.skip_remaining(key);
    }

    /// Remove the message's artifacts that are settled and own no running
    /// or ready-detached process.
    fn prune(&mut self, message_id: &MessageId) {
        let mut pruned = 0;
        for key in self.queue.keys_for_message(message_id) {
            let busy = self
                .running
                .keys()
                .chain(self.detached.keys())
                .any(|(k, _)| *k == key);
            if !busy && self.queue.remove_settled(&key) {
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(message_id = %message_id, artifacts = pruned, "pruned settled artifacts");
        }
    }

    fn stop(&self, flight: InFlight) {
        flight.task.abort();
        if let Some(process) = flight.process {
            let env = Arc::clone(&self.env);
            tokio::spawn(async move {
                if let Err(err) = env.kill(process).await {
                    tracing::warn!(process = %process, "Failed to kill process: {err}");
                }
            });
        }
    }

    fn stop_all(&mut self) {
        let flights: Vec<InFlight> = self
            .running
            .drain()
            .chain(self.detached.drain())
            .map(|(_, flight)| flight)
            .collect();
        for flight in flights {
            self.stop(flight);
        }
    }

    fn handle_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Spawned {
                key,
                action,
                process,
            } => {
                let slot = (key, action);
                match self.running.get_mut(&slot) {
                    Some(flight) => flight.process = Some(process),
                    None => {
                        // Abandoned before the spawn finished.
                        let env = Arc::clone(&self.env);
                        tokio::spawn(async move {
                            let _ = env.kill(process).await;
                        });
                    }
                }
            }
            TaskEvent::Finished {
                key,
                action,
                outcome,
            } => {
                let slot = (key, action);
                let Some(flight) = self.running.remove(&slot) else {
                    return;
                };
                let (key, action) = slot;
                match outcome {
                    Outcome::Complete { exit_code, ready } => {
                        if !self.queue.complete(&key, &action, exit_code, ready) {
                            self.stop(flight);
                            return;
                        }
                        if ready {
                            self.detached.insert((key.clone(), action.clone()), flight);
                        }
                        tracing::info!(artifact = %key, action = %action, ?exit_code, ready, "action complete");
                        self.emit(RunnerEvent::ActionCompleted {
                            key,
                            action,
                            exit_code,
                            ready,
                        });
                    }
                    Outcome::Failed(error) => {
                        if !self.queue.fail(&key, &action, error.clone()) {
                            self.stop(flight);
                            return;
                        }
                        tracing::warn!(artifact = %key, action = %action, "Action failed: {error}");
                        let kind = self
                            .queue
                            .get(&key, &action)
                            .map_or(ActionKind::Shell, |entry| entry.action().kind().clone());
                        self.emit(RunnerEvent::ActionFailed {
                            key: key.clone(),
                            action,
                            kind,
                            error,
                        });
                        if self.settings.failure == FailurePolicy::FailFast {
                            self.skip_remaining(&key);
                        }
                    }
                }
            }
            TaskEvent::Exited {
                key,
                action,
                exit_code,
            } => {
                if self.detached.remove(&(key.clone(), action.clone())).is_some() {
                    tracing::info!(artifact = %key, action = %action, ?exit_code, "ready process exited");
                    self.emit(RunnerEvent::ProcessExited {
                        key,
                        action,
                        exit_code,
                    });
                }
            }
        }
    }

    fn schedule(&mut self) {
        let next: Vec<Slot> = match self.settings.scheduling {
            SchedulingPolicy::PerArtifact => self
                .queue
                .keys()
                .filter(|key| !self.running.keys().any(|(k, _)| k == *key))
                .filter_map(|key| self.queue.next_eligible(key))
                .map(|entry| (entry.action().key(), entry.id().clone()))
                .collect(),
            SchedulingPolicy::Global => {
                if self.running.is_empty() {
                    self.queue
                        .next_eligible_global()
                        .map(|entry| (entry.action().key(), entry.id().clone()))
                        .into_iter()
                        .collect()
                } else {
                    Vec::new()
                }
            }
        };

        for (key, id) in next {
            self.start(key, id);
        }
    }

    fn start(&mut self, key: ArtifactKey, id: ActionId) {
        let Some(entry) = self.queue.get(&key, &id) else {
            return;
        };
        let action = entry.action().clone();
        self.queue.set_status(&key, &id, ActionStatus::Running);
        tracing::info!(
            artifact = %key,
            action = %id,
            kind = action.kind().label(),
            "starting action"
        );
        self.emit(RunnerEvent::ActionStarted {
            key: key.clone(),
            action: id.clone(),
        });

        let ctx = TaskContext {
            env: Arc::clone(&self.env),
            key: key.clone(),
            reports: self.task_tx.clone(),
            events: self.events.clone(),
        };
        let task = match action.kind() {
            ActionKind::File { path } => {
                let path = path.clone();
                tokio::spawn(run_file_action(ctx, action, path))
            }
            ActionKind::Shell => {
                let (program, args) = self.shell.command_for(action.content());
                let exit_policy = self.settings.exit_code;
                tokio::spawn(run_shell_action(ctx, action, program, args, exit_policy))
            }
        };
        self.running.insert(
            (key, id),
            InFlight {
                process: None,
                task,
            },
        );
    }

    fn notify_idle(&mut self) {
        if self.running.is_empty() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

struct TaskContext<E> {
    env: Arc<E>,
    key: ArtifactKey,
    reports: mpsc::UnboundedSender<TaskEvent>,
    events: mpsc::UnboundedSender<RunnerEvent>,
}

impl<E> TaskContext<E> {
    fn finish(&self, action: &Action, outcome: Outcome) {
        let _ = self.reports.send(TaskEvent::Finished {
            key: self.key.clone(),
            action: action.id().clone(),
            outcome,
        });
    }

    fn output(&self, action: &Action, chunk: crate::env::OutputChunk) {
        let text = sanitize_terminal_text(&chunk.text);
        if text.is_empty() {
            return;
        }
        let _ = self.events.send(RunnerEvent::Output {
            key: self.key.clone(),
            action: action.id().clone(),
            stream: chunk.stream,
            chunk: text.into_owned(),
        });
    }
}

async fn run_file_action<E: ExecutionEnvironment>(
    ctx: TaskContext<E>,
    action: Action,
    path: String,
) {
    let parent = Path::new(&path)
        .parent()
        .and_then(Path::to_str)
        .filter(|p| !p.is_empty());
    if let Some(parent) = parent
        && let Err(err) = ctx.env.make_directories(parent).await
    {
        ctx.finish(&action, Outcome::Failed(err.to_action_error()));
        return;
    }

    let outcome = match ctx.env.write_file(&path, action.content()).await {
        Ok(()) => Outcome::Complete {
            exit_code: None,
            ready: false,
        },
        Err(err) => Outcome::Failed(err.to_action_error()),
    };
    ctx.finish(&action, outcome);
}

async fn run_shell_action<E: ExecutionEnvironment>(
    ctx: TaskContext<E>,
    action: Action,
    program: String,
    args: Vec<String>,
    exit_policy: ExitCodePolicy,
) {
    let SpawnedProcess {
        id,
        input,
        mut output,
        mut exit,
    } = match ctx.env.spawn(&program, &args).await {
        Ok(process) => process,
        Err(err) => {
            ctx.finish(&action, Outcome::Failed(err.to_action_error()));
            return;
        }
    };
    // Commands get no stdin; interactive prompts see EOF instead of hanging.
    drop(input);

    let _ = ctx.reports.send(TaskEvent::Spawned {
        key: ctx.key.clone(),
        action: action.id().clone(),
        process: id,
    });

    let mut tail = OutputTail::new(READY_TAIL_BYTES);
    let mut output_open = true;
    let mut ready = false;

    let status = loop {
        tokio::select! {
            chunk = output.recv(), if output_open => match chunk {
                Some(chunk) => {
                    if !ready {
                        tail.push(&chunk.text);
                    }
                    ctx.output(&action, chunk);
                    if !ready && ctx.env.is_ready_signal(tail.as_str()) {
                        ready = true;
                        tracing::debug!(action = %action.id(), process = %id, "ready signal");
                        ctx.finish(&action, Outcome::Complete { exit_code: None, ready: true });
                    }
                }
                None => output_open = false,
            },
            status = &mut exit => break status,
        }
    };

    // Output still buffered when the process exits belongs before its
    // completion.
    if output_open {
        let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, async {
            while let Some(chunk) = output.recv().await {
                ctx.output(&action, chunk);
            }
        })
        .await;
    }

    let exit_code = match status {
        Ok(code) => code,
        Err(err) if !ready => {
            ctx.finish(&action, Outcome::Failed(err.to_action_error()));
            return;
        }
        Err(err) => {
            tracing::debug!(action = %action.id(), process = %id, "Lost ready process: {err}");
            None
        }
    };

    if ready {
        let _ = ctx.reports.send(TaskEvent::Exited {
            key: ctx.key.clone(),
            action: action.id().clone(),
            exit_code,
        });
        return;
    }

    let outcome = match (exit_policy, exit_code) {
        (ExitCodePolicy::Strict, code) if code != Some(0) => {
            Outcome::Failed(ActionError::ExitStatus { code })
        }
        (_, code) => Outcome::Complete {
            exit_code: code,
            ready: false,
        },
    };
    ctx.finish(&action, outcome);
}

//! Scheduling behaviour of the action runner against a scripted environment.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use smithy_runner::{
    ActionRunner, DetectedShell, EnvError, EnvFut, ExecutionEnvironment, OutputChunk,
    RunnerHandle, SpawnedProcess,
};
use smithy_types::{
    Action, ActionError, ActionId, ActionKind, ActionStatus, Artifact, ArtifactId, ArtifactKey,
    ExitCodePolicy, FailurePolicy, MessageId, OutputStream, ProcessId, RunnerEvent,
    RunnerSettings, SchedulingPolicy,
};
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct MockProcess {
    command: String,
    output: Option<mpsc::Sender<OutputChunk>>,
    exit: Option<oneshot::Sender<Option<i32>>>,
}

#[derive(Default)]
struct MockState {
    log: Vec<String>,
    files: HashMap<String, String>,
    fail_writes: HashSet<String>,
    fail_spawns: HashSet<String>,
    spawned: HashSet<String>,
    processes: HashMap<ProcessId, MockProcess>,
    next_id: u64,
}

/// Environment whose processes only produce output and exit when a test
/// tells them to.
#[derive(Default)]
struct MockEnvironment {
    state: Mutex<MockState>,
    spawned: Notify,
}

impl MockEnvironment {
    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    fn fail_writes_to(&self, path: &str) {
        self.state().fail_writes.insert(path.to_string());
    }

    fn fail_spawns_of(&self, command: &str) {
        self.state().fail_spawns.insert(command.to_string());
    }

    fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    fn file(&self, path: &str) -> Option<String> {
        self.state().files.get(path).cloned()
    }

    fn has_spawned(&self, command: &str) -> bool {
        self.state().spawned.contains(command)
    }

    async fn wait_spawn(&self, command: &str) {
        timeout(WAIT, async {
            loop {
                let notified = self.spawned.notified();
                if self.has_spawned(command) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("`{command}` was never spawned"));
    }

    fn find(&self, command: &str) -> ProcessId {
        self.state()
            .processes
            .iter()
            .find(|(_, p)| p.command == command)
            .map(|(id, _)| *id)
            .unwrap_or_else(|| panic!("no live process for `{command}`"))
    }

    fn emit(&self, command: &str, text: &str) {
        let id = self.find(command);
        let sender = self.state().processes[&id].output.clone().unwrap();
        sender
            .try_send(OutputChunk {
                stream: OutputStream::Stdout,
                text: text.to_string(),
            })
            .unwrap();
    }

    fn finish(&self, command: &str, code: Option<i32>) {
        let id = self.find(command);
        let mut state = self.state();
        state.log.push(format!("exit {command} {code:?}"));
        let mut process = state.processes.remove(&id).unwrap();
        process.output.take();
        if let Some(exit) = process.exit.take() {
            let _ = exit.send(code);
        }
    }

    /// Drop the process without an exit status, as if the environment lost
    /// track of it.
    fn vanish(&self, command: &str) {
        let id = self.find(command);
        let mut state = self.state();
        state.log.push(format!("vanish {command}"));
        state.processes.remove(&id);
    }
}

impl ExecutionEnvironment for MockEnvironment {
    fn write_file<'a>(&'a self, path: &'a str, content: &'a str) -> EnvFut<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            state.log.push(format!("write {path}"));
            if state.fail_writes.contains(path) {
                return Err(EnvError::Io {
                    path: path.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            state.files.insert(path.to_string(), content.to_string());
            Ok(())
        })
    }

    fn make_directories<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()> {
        Box::pin(async move {
            self.state().log.push(format!("mkdir {path}"));
            Ok(())
        })
    }

    fn remove_tree<'a>(&'a self, path: &'a str) -> EnvFut<'a, ()> {
        Box::pin(async move {
            self.state().log.push(format!("rm {path}"));
            Ok(())
        })
    }

    fn spawn<'a>(&'a self, _program: &'a str, args: &'a [String]) -> EnvFut<'a, SpawnedProcess> {
        Box::pin(async move {
            let command = args.last().cloned().unwrap_or_default();
            if self.state().fail_spawns.contains(&command) {
                self.state().log.push(format!("spawn failed {command}"));
                return Err(EnvError::Spawn {
                    command,
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
                });
            }
            let (output_tx, output_rx) = mpsc::channel(64);
            let (exit_tx, exit_rx) = oneshot::channel();
            let id = {
                let mut state = self.state();
                state.next_id += 1;
                let id = ProcessId::new(state.next_id);
                state.log.push(format!("spawn {command}"));
                state.spawned.insert(command.clone());
                state.processes.insert(
                    id,
                    MockProcess {
                        command,
                        output: Some(output_tx),
                        exit: Some(exit_tx),
                    },
                );
                id
            };
            self.spawned.notify_waiters();
            Ok(SpawnedProcess {
                id,
                input: None,
                output: output_rx,
                exit: Box::pin(async move { exit_rx.await.map_err(|_| EnvError::ProcessGone(id)) }),
            })
        })
    }

    fn kill(&self, id: ProcessId) -> EnvFut<'_, ()> {
        Box::pin(async move {
            let mut state = self.state();
            if let Some(mut process) = state.processes.remove(&id) {
                state.log.push(format!("kill {}", process.command));
                process.output.take();
                if let Some(exit) = process.exit.take() {
                    let _ = exit.send(None);
                }
            }
            Ok(())
        })
    }

    fn is_ready_signal(&self, recent_output: &str) -> bool {
        recent_output.contains("READY")
    }
}

fn sh() -> DetectedShell {
    DetectedShell {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".into()],
        name: "sh".into(),
    }
}

struct Harness {
    env: Arc<MockEnvironment>,
    handle: RunnerHandle,
    events: mpsc::UnboundedReceiver<RunnerEvent>,
    seen: Vec<RunnerEvent>,
}

impl Harness {
    fn new(settings: RunnerSettings) -> Self {
        let env = Arc::new(MockEnvironment::default());
        let (handle, events) = ActionRunner::spawn(Arc::clone(&env), settings, sh());
        Self {
            env,
            handle,
            events,
            seen: Vec::new(),
        }
    }

    /// Receive events until one satisfies `pred`, returning it.
    async fn until(&mut self, pred: impl Fn(&RunnerEvent) -> bool) -> RunnerEvent {
        loop {
            let event = timeout(WAIT, self.events.recv())
                .await
                .expect("timed out waiting for a runner event")
                .expect("runner event stream closed");
            self.seen.push(event.clone());
            if pred(&event) {
                return event;
            }
        }
    }

    async fn idle(&mut self) {
        timeout(WAIT, self.handle.wait_idle())
            .await
            .expect("runner never went idle");
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    async fn status(&self, key: &ArtifactKey, id: &ActionId) -> ActionStatus {
        self.handle
            .snapshot(key.clone())
            .await
            .iter()
            .find(|entry| entry.id() == id)
            .map(smithy_runner::QueuedAction::status)
            .expect("action not queued")
    }
}

fn artifact(id: &str) -> Artifact {
    Artifact::open(MessageId::new("m1"), ArtifactId::new(id), "")
}

fn action(artifact: &Artifact, seq: u32, kind: ActionKind, content: &str) -> Action {
    let mut action = Action::new(artifact, ActionId::derive(artifact.id(), seq), kind);
    action.append_content(content);
    action.finalize();
    action
}

fn file(artifact: &Artifact, seq: u32, path: &str, content: &str) -> Action {
    action(
        artifact,
        seq,
        ActionKind::File {
            path: path.to_string(),
        },
        content,
    )
}

fn shell(artifact: &Artifact, seq: u32, command: &str) -> Action {
    action(artifact, seq, ActionKind::Shell, command)
}

fn is_completed(id: &ActionId) -> impl Fn(&RunnerEvent) -> bool + '_ {
    move |event| matches!(event, RunnerEvent::ActionCompleted { action, .. } if action == id)
}

#[tokio::test]
async fn file_action_writes_content() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let write = file(&a, 0, "x.js", "console.log(1)");

    h.handle.add_action(&write);
    h.handle.run_action(&write);
    h.until(is_completed(write.id())).await;

    assert_eq!(h.env.file("x.js").as_deref(), Some("console.log(1)"));
    assert_eq!(h.env.log(), vec!["write x.js"]);
    assert_eq!(
        h.seen,
        vec![
            RunnerEvent::ActionQueued {
                key: a.key(),
                action: write.id().clone(),
                kind: write.kind().clone(),
            },
            RunnerEvent::ActionStarted {
                key: a.key(),
                action: write.id().clone(),
            },
            RunnerEvent::ActionCompleted {
                key: a.key(),
                action: write.id().clone(),
                exit_code: None,
                ready: false,
            },
        ]
    );
}

#[tokio::test]
async fn nested_file_creates_parent_first() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let write = file(&a, 0, "src/app/main.js", "x");

    h.handle.run_action(&write);
    h.until(is_completed(write.id())).await;

    assert_eq!(h.env.log(), vec!["mkdir src/app", "write src/app/main.js"]);
}

#[tokio::test]
async fn streaming_action_waits_for_final_content() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let mut pending = Action::new(&a, ActionId::derive(a.id(), 0), ActionKind::Shell);
    pending.append_content("npm ins");

    h.handle.add_action(&pending);
    h.until(|e| matches!(e, RunnerEvent::ActionQueued { .. })).await;
    assert_eq!(h.status(&a.key(), pending.id()).await, ActionStatus::Pending);
    assert!(!h.env.has_spawned("npm ins"));

    pending.append_content("tall\n");
    pending.finalize();
    h.handle.run_action(&pending);
    h.env.wait_spawn("npm install").await;
    assert_eq!(h.status(&a.key(), pending.id()).await, ActionStatus::Running);
}

#[tokio::test]
async fn actions_in_one_artifact_run_in_order() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let install = shell(&a, 0, "npm install");
    let dev = shell(&a, 1, "npm run dev");

    h.handle.run_action(&install);
    h.handle.run_action(&dev);
    h.env.wait_spawn("npm install").await;

    // Round-trip through the actor so every pending decision has been made.
    let _ = h.handle.snapshot(a.key()).await;
    assert!(!h.env.has_spawned("npm run dev"));

    h.env.finish("npm install", Some(0));
    h.env.wait_spawn("npm run dev").await;
    h.until(is_completed(install.id())).await;

    let log = h.env.log();
    assert_eq!(
        log[..3].to_vec(),
        vec!["spawn npm install", "exit npm install Some(0)", "spawn npm run dev"]
    );
}

#[tokio::test]
async fn failed_write_does_not_stop_the_next_action() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let write = file(&a, 0, "locked.txt", "x");
    let echo = shell(&a, 1, "echo hi");
    h.env.fail_writes_to("locked.txt");

    h.handle.run_action(&write);
    h.handle.run_action(&echo);

    let failed = h
        .until(|e| matches!(e, RunnerEvent::ActionFailed { .. }))
        .await;
    let RunnerEvent::ActionFailed { action, kind, error, .. } = failed else {
        unreachable!()
    };
    assert_eq!(&action, write.id());
    assert_eq!(kind, write.kind().clone());
    assert!(matches!(error, ActionError::Io { ref path, .. } if path == "locked.txt"));

    h.env.wait_spawn("echo hi").await;
    h.env.finish("echo hi", Some(0));
    h.until(is_completed(echo.id())).await;
    assert_eq!(h.status(&a.key(), write.id()).await, ActionStatus::Failed);
}

#[tokio::test]
async fn fail_fast_skips_the_rest_of_the_artifact() {
    let mut h = Harness::new(RunnerSettings {
        failure: FailurePolicy::FailFast,
        ..RunnerSettings::default()
    });
    let a = artifact("a");
    let write = file(&a, 0, "locked.txt", "x");
    let echo = shell(&a, 1, "echo hi");
    h.env.fail_writes_to("locked.txt");

    h.handle.run_action(&write);
    h.handle.run_action(&echo);
    let skipped = h
        .until(|e| matches!(e, RunnerEvent::ActionSkipped { .. }))
        .await;
    assert_eq!(skipped.action(), echo.id());

    h.idle().await;
    assert!(!h.env.has_spawned("echo hi"));
    assert_eq!(h.status(&a.key(), echo.id()).await, ActionStatus::Skipped);
}

#[tokio::test]
async fn artifacts_run_concurrently_per_artifact() {
    let h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let b = artifact("b");

    h.handle.run_action(&shell(&a, 0, "serve a"));
    h.handle.run_action(&shell(&b, 0, "serve b"));

    h.env.wait_spawn("serve a").await;
    h.env.wait_spawn("serve b").await;
}

#[tokio::test]
async fn global_scheduling_runs_one_action_at_a_time() {
    let h = Harness::new(RunnerSettings {
        scheduling: SchedulingPolicy::Global,
        ..RunnerSettings::default()
    });
    let a = artifact("a");
    let b = artifact("b");

    h.handle.run_action(&shell(&a, 0, "serve a"));
    h.handle.run_action(&shell(&b, 0, "serve b"));

    h.env.wait_spawn("serve a").await;
    let _ = h.handle.snapshot(b.key()).await;
    assert!(!h.env.has_spawned("serve b"));

    h.env.finish("serve a", Some(0));
    h.env.wait_spawn("serve b").await;
}

#[tokio::test]
async fn output_is_forwarded_before_completion() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let ls = shell(&a, 0, "ls");

    h.handle.run_action(&ls);
    h.env.wait_spawn("ls").await;
    h.env.emit("ls", "\x1b[1mindex.js\x1b[0m\n");
    h.env.finish("ls", Some(0));
    h.until(is_completed(ls.id())).await;

    let outputs: Vec<&RunnerEvent> = h
        .seen
        .iter()
        .filter(|e| matches!(e, RunnerEvent::Output { .. }))
        .collect();
    assert_eq!(
        outputs,
        vec![&RunnerEvent::Output {
            key: a.key(),
            action: ls.id().clone(),
            stream: OutputStream::Stdout,
            chunk: "index.js\n".into(),
        }]
    );
}

#[tokio::test]
async fn ready_signal_completes_and_unblocks_the_artifact() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let dev = shell(&a, 0, "npm run dev");
    let after = shell(&a, 1, "echo after");

    h.handle.run_action(&dev);
    h.handle.run_action(&after);
    h.env.wait_spawn("npm run dev").await;
    h.env.emit("npm run dev", "compiling...\n");
    h.env.emit("npm run dev", "READY on :5173\n");

    let completed = h.until(is_completed(dev.id())).await;
    assert_eq!(
        completed,
        RunnerEvent::ActionCompleted {
            key: a.key(),
            action: dev.id().clone(),
            exit_code: None,
            ready: true,
        }
    );
    h.env.wait_spawn("echo after").await;
    assert_eq!(
        h.handle.live_processes().await,
        vec![(a.key(), dev.id().clone())]
    );

    h.env.finish("npm run dev", Some(0));
    let exited = h
        .until(|e| matches!(e, RunnerEvent::ProcessExited { .. }))
        .await;
    assert_eq!(
        exited,
        RunnerEvent::ProcessExited {
            key: a.key(),
            action: dev.id().clone(),
            exit_code: Some(0),
        }
    );
    assert!(h.handle.live_processes().await.is_empty());
}

#[tokio::test]
async fn non_zero_exit_is_informational_by_default() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let test = shell(&a, 0, "npm test");

    h.handle.run_action(&test);
    h.env.wait_spawn("npm test").await;
    h.env.finish("npm test", Some(1));

    let completed = h.until(is_completed(test.id())).await;
    assert!(matches!(
        completed,
        RunnerEvent::ActionCompleted {
            exit_code: Some(1),
            ready: false,
            ..
        }
    ));
    let entry = h.handle.snapshot(a.key()).await.remove(0);
    assert_eq!(entry.exit_code(), Some(1));
    assert_eq!(entry.error(), None);
}

#[tokio::test]
async fn strict_exit_policy_fails_on_non_zero() {
    let mut h = Harness::new(RunnerSettings {
        exit_code: ExitCodePolicy::Strict,
        ..RunnerSettings::default()
    });
    let a = artifact("a");
    let test = shell(&a, 0, "npm test");

    h.handle.run_action(&test);
    h.env.wait_spawn("npm test").await;
    h.env.finish("npm test", Some(2));

    let failed = h
        .until(|e| matches!(e, RunnerEvent::ActionFailed { .. }))
        .await;
    let RunnerEvent::ActionFailed { error, .. } = failed else {
        unreachable!()
    };
    assert_eq!(error, ActionError::ExitStatus { code: Some(2) });
    let entry = h.handle.snapshot(a.key()).await.remove(0);
    assert_eq!(entry.status(), ActionStatus::Failed);
    assert_eq!(entry.exit_code(), Some(2));
}

#[tokio::test]
async fn abandoning_an_artifact_kills_and_skips() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let serve = shell(&a, 0, "serve");
    let next = shell(&a, 1, "echo next");

    h.handle.run_action(&serve);
    h.handle.run_action(&next);
    h.env.wait_spawn("serve").await;

    h.handle.abandon_artifact(a.key());
    h.idle().await;

    let skipped: Vec<&ActionId> = h
        .seen
        .iter()
        .filter(|e| matches!(e, RunnerEvent::ActionSkipped { .. }))
        .map(RunnerEvent::action)
        .collect();
    assert_eq!(skipped, vec![serve.id(), next.id()]);
    assert!(!h.env.has_spawned("echo next"));

    timeout(WAIT, async {
        while !h.env.log().contains(&"kill serve".to_string()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("process was never killed");
}

#[tokio::test]
async fn actions_arriving_after_abandon_are_skipped() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let late = shell(&a, 0, "echo late");

    h.handle.abandon_message(MessageId::new("m1"));
    h.handle.run_action(&late);

    let skipped = h
        .until(|e| matches!(e, RunnerEvent::ActionSkipped { .. }))
        .await;
    assert_eq!(skipped.action(), late.id());
    h.idle().await;
    assert!(!h.env.has_spawned("echo late"));
}

#[tokio::test]
async fn shutdown_kills_live_processes() {
    let h = Harness::new(RunnerSettings::default());
    let a = artifact("a");

    h.handle.run_action(&shell(&a, 0, "serve"));
    h.env.wait_spawn("serve").await;
    let _ = h.handle.snapshot(a.key()).await;

    timeout(WAIT, h.handle.shutdown())
        .await
        .expect("shutdown hung");

    timeout(WAIT, async {
        while !h.env.log().contains(&"kill serve".to_string()) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("process was never killed");
}

#[tokio::test]
async fn spawn_failure_fails_the_action_and_the_artifact_continues() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let missing = shell(&a, 0, "missing-tool --version");
    let echo = shell(&a, 1, "echo hi");
    h.env.fail_spawns_of("missing-tool --version");

    h.handle.run_action(&missing);
    h.handle.run_action(&echo);

    let failed = h
        .until(|e| matches!(e, RunnerEvent::ActionFailed { .. }))
        .await;
    let RunnerEvent::ActionFailed { action, kind, error, .. } = failed else {
        unreachable!()
    };
    assert_eq!(&action, missing.id());
    assert_eq!(kind, ActionKind::Shell);
    assert!(matches!(
        error,
        ActionError::Spawn { ref command, .. } if command == "missing-tool --version"
    ));

    h.env.wait_spawn("echo hi").await;
    h.env.finish("echo hi", Some(0));
    h.until(is_completed(echo.id())).await;
    assert_eq!(h.status(&a.key(), missing.id()).await, ActionStatus::Failed);
}

#[tokio::test]
async fn fail_fast_skips_the_rest_after_a_spawn_failure() {
    let mut h = Harness::new(RunnerSettings {
        failure: FailurePolicy::FailFast,
        ..RunnerSettings::default()
    });
    let a = artifact("a");
    let b = artifact("b");
    let missing = shell(&a, 0, "missing-tool");
    let echo = shell(&a, 1, "echo hi");
    let other = file(&b, 0, "b.txt", "b");
    h.env.fail_spawns_of("missing-tool");

    h.handle.run_action(&missing);
    h.handle.run_action(&echo);
    h.handle.run_action(&other);

    let skipped = h
        .until(|e| matches!(e, RunnerEvent::ActionSkipped { .. }))
        .await;
    assert_eq!(skipped.action(), echo.id());

    h.idle().await;
    assert!(!h.env.has_spawned("echo hi"));
    assert_eq!(h.env.file("b.txt").as_deref(), Some("b"));
    assert!(h.seen.iter().any(|e| matches!(
        e,
        RunnerEvent::ActionFailed { kind: ActionKind::Shell, error: ActionError::Spawn { .. }, .. }
    )));
}

#[tokio::test]
async fn ready_process_lost_by_the_environment_is_reported_exited() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let dev = shell(&a, 0, "npm run dev");

    h.handle.run_action(&dev);
    h.env.wait_spawn("npm run dev").await;
    h.env.emit("npm run dev", "READY\n");
    h.until(is_completed(dev.id())).await;
    assert_eq!(h.handle.live_processes().await.len(), 1);

    h.env.vanish("npm run dev");
    let exited = h
        .until(|e| matches!(e, RunnerEvent::ProcessExited { .. }))
        .await;
    assert_eq!(
        exited,
        RunnerEvent::ProcessExited {
            key: a.key(),
            action: dev.id().clone(),
            exit_code: None,
        }
    );
    assert!(h.handle.live_processes().await.is_empty());
}

#[tokio::test]
async fn abandoned_message_is_dropped_from_the_queue() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let write = file(&a, 0, "a.txt", "a");
    let serve = shell(&a, 1, "serve");

    h.handle.run_action(&write);
    h.handle.run_action(&serve);
    h.env.wait_spawn("serve").await;

    h.handle.abandon_message(MessageId::new("m1"));
    h.idle().await;
    assert!(h.handle.snapshot(a.key()).await.is_empty());
    assert!(h.handle.live_processes().await.is_empty());

    // Abandonment is still remembered for late arrivals.
    let late = shell(&a, 2, "echo late");
    h.handle.run_action(&late);
    let skipped = h
        .until(|e| matches!(e, RunnerEvent::ActionSkipped { action, .. } if action == late.id()))
        .await;
    assert_eq!(skipped.key(), &a.key());
    assert!(!h.env.has_spawned("echo late"));
}

#[tokio::test]
async fn forget_message_keeps_artifacts_with_work_left() {
    let mut h = Harness::new(RunnerSettings::default());
    let a = artifact("a");
    let b = artifact("b");
    let write = file(&a, 0, "a.txt", "a");
    let serve = shell(&b, 1, "serve");

    h.handle.run_action(&write);
    h.handle.run_action(&serve);
    h.until(is_completed(write.id())).await;
    h.env.wait_spawn("serve").await;

    h.handle.forget_message(MessageId::new("m1"));
    assert!(h.handle.snapshot(a.key()).await.is_empty());
    assert_eq!(h.handle.snapshot(b.key()).await.len(), 1);

    h.env.finish("serve", Some(0));
    h.until(is_completed(serve.id())).await;
    h.handle.forget_message(MessageId::new("m1"));
    assert!(h.handle.snapshot(b.key()).await.is_empty());
}

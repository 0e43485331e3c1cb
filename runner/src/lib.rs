//! Action queue and runner for Smithy.
//!
//! Actions discovered by the parser are queued per artifact and executed
//! against an [`ExecutionEnvironment`], one at a time per artifact (or one at
//! a time overall, depending on [`SchedulingPolicy`]). Progress is reported
//! as a stream of [`RunnerEvent`]s.
//!
//! [`SchedulingPolicy`]: smithy_types::SchedulingPolicy
//! [`RunnerEvent`]: smithy_types::RunnerEvent

#![allow(clippy::missing_errors_doc)]

mod env;
mod local;
mod process;
mod queue;
mod ready;
mod runner;
mod shell;

pub use env::{EnvError, EnvFut, ExecutionEnvironment, ExitFut, OutputChunk, SpawnedProcess};
pub use local::LocalEnvironment;
pub use queue::{ActionQueue, ActionsFor, QueuedAction};
pub use ready::{OutputTail, READY_TAIL_BYTES, ReadySignal};
pub use runner::{ActionRunner, RunnerHandle};
pub use shell::{DetectedShell, detect_shell};

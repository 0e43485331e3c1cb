//! Per-artifact action queue.
//!
//! Holds the runner's own snapshot of every action it has seen, grouped by
//! artifact in discovery order, together with runtime status and outcome.

use std::collections::HashMap;

use smithy_types::{Action, ActionError, ActionId, ActionStatus, ArtifactKey, MessageId};

/// The runner's view of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedAction {
    action: Action,
    seq: u64,
    exit_code: Option<i32>,
    error: Option<ActionError>,
    ready: bool,
}

impl QueuedAction {
    #[must_use]
    pub fn action(&self) -> &Action {
        &self.action
    }

    #[must_use]
    pub fn id(&self) -> &ActionId {
        self.action.id()
    }

    #[must_use]
    pub fn status(&self) -> ActionStatus {
        self.action.status()
    }

    /// Whether the close tag has been seen and content is complete.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.action.is_final()
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    #[must_use]
    pub fn error(&self) -> Option<&ActionError> {
        self.error.as_ref()
    }

    /// Completed through a ready signal; the process may still be running.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.ready
    }
}

/// Lazy, restartable view over one artifact's entries.
pub type ActionsFor<'a> = std::slice::Iter<'a, QueuedAction>;

#[derive(Debug, Default)]
pub struct ActionQueue {
    artifacts: HashMap<ArtifactKey, Vec<QueuedAction>>,
    /// Artifact keys in discovery order.
    order: Vec<ArtifactKey>,
    next_seq: u64,
}

impl ActionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending, not-yet-final entry. Returns `false` if the action
    /// is already queued.
    pub fn enqueue(&mut self, action: &Action) -> bool {
        let key = action.key();
        if self.find(&key, action.id()).is_some() {
            return false;
        }

        let mut snapshot = action.clone();
        snapshot.set_status(ActionStatus::Pending);
        let entry = QueuedAction {
            action: snapshot,
            seq: self.next_seq,
            exit_code: None,
            error: None,
            ready: false,
        };
        self.next_seq += 1;

        if !self.artifacts.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.artifacts.entry(key).or_default().push(entry);
        true
    }

    /// Install final content, enqueueing first if needed. Returns `false`
    /// when the entry was already final.
    pub fn finalize(&mut self, action: &Action) -> bool {
        let key = action.key();
        self.enqueue(action);
        let Some(entry) = self.find_mut(&key, action.id()) else {
            return false;
        };
        if entry.action.is_final() {
            return false;
        }

        let status = entry.action.status();
        let mut snapshot = action.clone();
        snapshot.finalize();
        snapshot.set_status(status);
        entry.action = snapshot;
        true
    }

    #[must_use]
    pub fn actions_for(&self, key: &ArtifactKey) -> ActionsFor<'_> {
        self.artifacts
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
    }

    /// The next action of `key` that may start: the first non-terminal
    /// entry, provided it is final and pending and nothing in the artifact is
    /// running.
    #[must_use]
    pub fn next_eligible(&self, key: &ArtifactKey) -> Option<&QueuedAction> {
        let first = self
            .actions_for(key)
            .find(|entry| !entry.status().is_terminal())?;
        (first.is_final() && first.status() == ActionStatus::Pending).then_some(first)
    }

    /// Across all artifacts: the earliest-discovered non-terminal entry, if
    /// it may start and nothing anywhere is running.
    #[must_use]
    pub fn next_eligible_global(&self) -> Option<&QueuedAction> {
        let first = self
            .artifacts
            .values()
            .flatten()
            .filter(|entry| !entry.status().is_terminal())
            .min_by_key(|entry| entry.seq)?;
        (first.is_final() && first.status() == ActionStatus::Pending).then_some(first)
    }

    /// Artifact keys in discovery order.
    pub fn keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.order.iter()
    }

    /// Artifact keys belonging to one message.
    #[must_use]
    pub fn keys_for_message(&self, message_id: &MessageId) -> Vec<ArtifactKey> {
        self.order
            .iter()
            .filter(|key| &key.message_id == message_id)
            .cloned()
            .collect()
    }

    /// Whether `key` is known and every one of its entries is terminal.
    #[must_use]
    pub fn is_settled(&self, key: &ArtifactKey) -> bool {
        self.artifacts
            .get(key)
            .is_some_and(|entries| entries.iter().all(|entry| entry.status().is_terminal()))
    }

    /// Drop a settled artifact. Returns `false`, keeping everything, when
    /// the artifact is unknown or still has non-terminal entries.
    pub fn remove_settled(&mut self, key: &ArtifactKey) -> bool {
        if !self.is_settled(key) {
            return false;
        }
        self.artifacts.remove(key);
        self.order.retain(|k| k != key);
        true
    }

    #[must_use]
    pub fn get(&self, key: &ArtifactKey, id: &ActionId) -> Option<&QueuedAction> {
        self.find(key, id)
    }

    /// Move a non-terminal entry to `status`. Terminal entries never change;
    /// returns `false` in that case or if the entry is unknown.
    pub fn set_status(&mut self, key: &ArtifactKey, id: &ActionId, status: ActionStatus) -> bool {
        match self.find_mut(key, id) {
            Some(entry) if !entry.status().is_terminal() => {
                entry.action.set_status(status);
                true
            }
            _ => false,
        }
    }

    /// Mark complete with the process outcome, if any.
    pub fn complete(
        &mut self,
        key: &ArtifactKey,
        id: &ActionId,
        exit_code: Option<i32>,
        ready: bool,
    ) -> bool {
        if !self.set_status(key, id, ActionStatus::Complete) {
            return false;
        }
        if let Some(entry) = self.find_mut(key, id) {
            entry.exit_code = exit_code;
            entry.ready = ready;
        }
        true
    }

    /// Mark failed, recording why.
    pub fn fail(&mut self, key: &ArtifactKey, id: &ActionId, error: ActionError) -> bool {
        if !self.set_status(key, id, ActionStatus::Failed) {
            return false;
        }
        if let Some(entry) = self.find_mut(key, id) {
            if let ActionError::ExitStatus { code } = &error {
                entry.exit_code = *code;
            }
            entry.error = Some(error);
        }
        true
    }

    /// Mark every non-terminal entry of `key` skipped. Returns the ids that
    /// changed, in order.
    pub fn skip_remaining(&mut self, key: &ArtifactKey) -> Vec<ActionId> {
        let Some(entries) = self.artifacts.get_mut(key) else {
            return Vec::new();
        };
        entries
            .iter_mut()
            .filter(|entry| !entry.status().is_terminal())
            .map(|entry| {
                entry.action.set_status(ActionStatus::Skipped);
                entry.id().clone()
            })
            .collect()
    }

    fn find(&self, key: &ArtifactKey, id: &ActionId) -> Option<&QueuedAction> {
        self.artifacts
            .get(key)?
            .iter()
            .find(|entry| entry.id() == id)
    }

    fn find_mut(&mut self, key: &ArtifactKey, id: &ActionId) -> Option<&mut QueuedAction> {
        self.artifacts
            .get_mut(key)?
            .iter_mut()
            .find(|entry| entry.id() == id)
    }
}

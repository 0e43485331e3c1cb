//! Artifacts and the actions they bundle.

use serde::{Deserialize, Serialize};

use crate::{ActionId, ArtifactId, ArtifactKey, MessageId};

/// Lifecycle of an artifact within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Open,
    Closed,
}

/// A named, ordered bundle of actions proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    id: ArtifactId,
    message_id: MessageId,
    title: String,
    actions: Vec<ActionId>,
    status: ArtifactStatus,
}

impl Artifact {
    #[must_use]
    pub fn open(message_id: MessageId, id: ArtifactId, title: impl Into<String>) -> Self {
        Self {
            id,
            message_id,
            title: title.into(),
            actions: Vec::new(),
            status: ArtifactStatus::Open,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.message_id.clone(), self.id.clone())
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Action ids in discovery order.
    #[must_use]
    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    #[must_use]
    pub fn status(&self) -> ArtifactStatus {
        self.status
    }

    pub fn push_action(&mut self, id: ActionId) {
        self.actions.push(id);
    }

    pub fn close(&mut self) {
        self.status = ArtifactStatus::Closed;
    }
}

/// What an action does. File actions always carry their target path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    File { path: String },
    Shell,
}

impl ActionKind {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::File { .. } => "file",
            ActionKind::Shell => "shell",
        }
    }
}

/// Execution status of an action.
///
/// `Complete`, `Failed` and `Skipped` are terminal: no further transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Skipped,
}

impl ActionStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Complete | ActionStatus::Failed | ActionStatus::Skipped
        )
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Running => "running",
            ActionStatus::Complete => "complete",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }
}

/// A single file write or shell command inside an artifact.
///
/// Content accumulates while the body streams in and is frozen by
/// [`Action::finalize`] when the close tag is seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    id: ActionId,
    artifact_id: ArtifactId,
    message_id: MessageId,
    kind: ActionKind,
    content: String,
    finalized: bool,
    status: ActionStatus,
}

impl Action {
    #[must_use]
    pub fn new(artifact: &Artifact, id: ActionId, kind: ActionKind) -> Self {
        Self {
            id,
            artifact_id: artifact.id().clone(),
            message_id: artifact.message_id().clone(),
            kind,
            content: String::new(),
            finalized: false,
            status: ActionStatus::Pending,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ActionId {
        &self.id
    }

    #[must_use]
    pub fn artifact_id(&self) -> &ArtifactId {
        &self.artifact_id
    }

    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey::new(self.message_id.clone(), self.artifact_id.clone())
    }

    #[must_use]
    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// File content for file actions, the command line for shell actions.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.finalized
    }

    #[must_use]
    pub fn status(&self) -> ActionStatus {
        self.status
    }

    /// Append streamed body text. Ignored once the action is final.
    pub fn append_content(&mut self, chunk: &str) {
        if !self.finalized {
            self.content.push_str(chunk);
        }
    }

    /// Freeze the content. Shell commands are trimmed; file content is kept
    /// byte for byte.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        if matches!(self.kind, ActionKind::Shell) {
            let trimmed = self.content.trim();
            if trimmed.len() != self.content.len() {
                self.content = trimmed.to_string();
            }
        }
        self.finalized = true;
    }

    pub fn set_status(&mut self, status: ActionStatus) {
        self.status = status;
    }
}

// Approval and checkpoint types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::message::Message;
use crate::result::TokenUsage;

/// Approval lifecycle. Pending moves to Approved or Denied exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Snapshot of a human-approval request: `{id, tool_name, args, session_id, status}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: Uuid,
    pub tool_name: String,
    pub args: Value,
    pub session_id: String,
    pub status: ApprovalStatus,
    /// Arguments substituted by the approver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRequest {
    pub fn new(tool_name: impl Into<String>, args: Value, session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            tool_name: tool_name.into(),
            args,
            session_id: session_id.into(),
            status: ApprovalStatus::Pending,
            modified_args: None,
            deny_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Arguments the tool should run with: the approver's edit if any
    pub fn effective_args(&self) -> &Value {
        self.modified_args.as_ref().unwrap_or(&self.args)
    }
}

/// Serialized loop state carried by a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    pub messages: Vec<Message>,
    /// Number of completed steps
    pub step_index: usize,
    pub usage: TokenUsage,
}

/// Durable snapshot of a run: `{id, agent_name, state}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub agent_name: String,
    pub state: LoopState,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>, agent_name: impl Into<String>, state: LoopState) -> Self {
        Self {
            id: id.into(),
            agent_name: agent_name.into(),
            state,
            created_at: Utc::now(),
        }
    }
}

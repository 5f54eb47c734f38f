// Human-in-the-loop approvals
//
// Each request is a single-writer state cell: Pending moves to Approved or
// Denied exactly once. Waiters observe the transition through a watch channel,
// so a suspended loop step never holds the manager lock.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use strand_schemas::{ApprovalRequest, ApprovalStatus};
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, RuntimeError};

#[derive(Default)]
struct ApprovalState {
    requests: HashMap<Uuid, watch::Sender<ApprovalRequest>>,
    // insertion order for list_pending
    order: Vec<Uuid>,
}

/// Tracks approval requests and their resolution
///
/// Resolved requests are kept so a second `approve`/`deny` reports
/// `ApprovalAlreadyResolved` instead of `ApprovalNotFound`.
#[derive(Default)]
pub struct ApprovalManager {
    state: Mutex<ApprovalState>,
}

impl ApprovalManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a Pending request and return its snapshot immediately
    pub fn request(&self, tool_name: &str, args: Value, session_id: &str) -> ApprovalRequest {
        let request = ApprovalRequest::new(tool_name, args, session_id);
        let (sender, _) = watch::channel(request.clone());

        let mut state = self.state.lock();
        state.order.push(request.id);
        state.requests.insert(request.id, sender);
        drop(state);

        info!(
            approval_id = %request.id,
            tool = %tool_name,
            session_id = %session_id,
            "Approval requested"
        );
        request
    }

    /// Approve a pending request, optionally replacing its arguments
    pub fn approve(&self, id: Uuid, modified_args: Option<Value>) -> Result<ApprovalRequest> {
        self.resolve(id, |request| {
            request.status = ApprovalStatus::Approved;
            request.modified_args = modified_args;
        })
    }

    /// Deny a pending request
    pub fn deny(&self, id: Uuid, reason: Option<String>) -> Result<ApprovalRequest> {
        self.resolve(id, |request| {
            request.status = ApprovalStatus::Denied;
            request.deny_reason = reason;
        })
    }

    fn resolve(&self, id: Uuid, apply: impl FnOnce(&mut ApprovalRequest)) -> Result<ApprovalRequest> {
        let state = self.state.lock();
        let sender = state
            .requests
            .get(&id)
            .ok_or(RuntimeError::ApprovalNotFound(id))?;

        if !sender.borrow().is_pending() {
            return Err(RuntimeError::ApprovalAlreadyResolved(id));
        }

        sender.send_modify(apply);
        let resolved = sender.borrow().clone();
        drop(state);

        info!(approval_id = %id, status = %resolved.status, "Approval resolved");
        Ok(resolved)
    }

    /// Snapshot of all pending requests in insertion order
    pub fn list_pending(&self) -> Vec<ApprovalRequest> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.requests.get(id))
            .map(|sender| sender.borrow().clone())
            .filter(ApprovalRequest::is_pending)
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<ApprovalRequest> {
        self.state
            .lock()
            .requests
            .get(&id)
            .map(|sender| sender.borrow().clone())
    }

    /// Wait until the request leaves Pending.
    ///
    /// Dropping the returned future (e.g. the run was cancelled) leaves the
    /// request untouched for external resolution.
    pub async fn wait(&self, id: Uuid) -> Result<ApprovalRequest> {
        let mut receiver = {
            let state = self.state.lock();
            state
                .requests
                .get(&id)
                .ok_or(RuntimeError::ApprovalNotFound(id))?
                .subscribe()
        };

        let resolved = receiver
            .wait_for(|request| !request.is_pending())
            .await
            .map_err(|_| RuntimeError::ApprovalNotFound(id))?;
        Ok(resolved.clone())
    }

    /// Drop resolved requests. Returns how many were removed.
    pub fn purge_resolved(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.requests.len();
        state.requests.retain(|_, sender| sender.borrow().is_pending());
        let ApprovalState { requests, order } = &mut *state;
        order.retain(|id| requests.contains_key(id));
        before - requests.len()
    }
}

impl std::fmt::Debug for ApprovalManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ApprovalManager")
            .field("requests", &state.requests.len())
            .finish()
    }
}

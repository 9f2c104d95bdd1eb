pub mod types;

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use types::{ApprovalStatus, PendingAction, WalRecord};

/// Queue of actions awaiting human approval before a dangerous tool call
/// proceeds, per `SafetyPolicyEngine::check_safety`'s `requires_approval`
/// gate.
///
/// Persists every status transition as one JSONL line when `persist` is
/// set, so a restart doesn't silently drop actions a human is mid-review
/// on; the in-memory map is always authoritative for reads.
pub struct ApprovalQueue {
    pending: Mutex<HashMap<String, PendingAction>>,
    wal_path: Option<PathBuf>,
    expiry_secs: u64,
}

impl ApprovalQueue {
    /// `wal_path`: `None` disables persistence (`ApprovalConfig::persist == false`).
    pub fn new(wal_path: Option<PathBuf>, expiry_secs: u64) -> Result<Self> {
        let mut pending = HashMap::new();
        if let Some(path) = &wal_path {
            if path.exists() {
                let file = std::fs::File::open(path)?;
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WalRecord>(&line) {
                        Ok(record) => {
                            pending.insert(record.action.action_id.clone(), record.action);
                        }
                        Err(e) => warn!("skipping malformed approval WAL line: {e}"),
                    }
                }
                info!(count = pending.len(), "replayed approval queue WAL");
            }
        }
        Ok(Self { pending: Mutex::new(pending), wal_path, expiry_secs })
    }

    fn append_wal(&self, action: &PendingAction) {
        let Some(path) = &self.wal_path else { return };
        let record = WalRecord { action: action.clone() };
        let Ok(line) = serde_json::to_string(&record) else { return };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!("failed to append approval WAL: {e}");
        }
    }

    /// Enqueue `tool`/`arguments` for approval, returning the new action id.
    pub async fn enqueue(&self, tool: &str, arguments: serde_json::Value) -> Result<String> {
        let action_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let action = PendingAction {
            action_id: action_id.clone(),
            tool: tool.to_string(),
            arguments,
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + self.expiry_secs as i64,
        };
        self.pending.lock().await.insert(action_id.clone(), action.clone());
        self.append_wal(&action);
        Ok(action_id)
    }

    /// Approve a pending action for `tool`. Errors if the action doesn't
    /// exist, belongs to a different tool, or is no longer pending.
    pub async fn approve(&self, tool: &str, action_id: &str) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let action = pending
            .get_mut(action_id)
            .ok_or_else(|| AgentError::Approval(format!("action {action_id} not found")))?;
        if action.tool != tool {
            return Err(AgentError::Approval(format!(
                "action {action_id} belongs to tool '{}', not '{tool}'",
                action.tool
            )));
        }
        if action.status != ApprovalStatus::Pending {
            return Err(AgentError::Approval(format!(
                "action {action_id} is {}, not pending",
                action.status
            )));
        }
        action.status = ApprovalStatus::Approved;
        let snapshot = action.clone();
        drop(pending);
        self.append_wal(&snapshot);
        Ok(())
    }

    /// Reject a pending action for `tool`.
    pub async fn reject(&self, tool: &str, action_id: &str) -> Result<()> {
        let mut pending = self.pending.lock().await;
        let action = pending
            .get_mut(action_id)
            .ok_or_else(|| AgentError::Approval(format!("action {action_id} not found")))?;
        if action.tool != tool {
            return Err(AgentError::Approval(format!(
                "action {action_id} belongs to tool '{}', not '{tool}'",
                action.tool
            )));
        }
        action.status = ApprovalStatus::Rejected;
        let snapshot = action.clone();
        drop(pending);
        self.append_wal(&snapshot);
        Ok(())
    }

    /// Check whether `action_id` has been approved for `tool`. A `true`
    /// result consumes the grant: the action transitions to `Consumed` and
    /// a second call returns `false`, matching the single-use approval
    /// invariant (an approval authorizes exactly one execution).
    pub async fn is_approved(&self, tool: &str, action_id: &str) -> Result<bool> {
        let mut pending = self.pending.lock().await;
        let Some(action) = pending.get_mut(action_id) else {
            return Ok(false);
        };
        if action.tool != tool || action.status != ApprovalStatus::Approved {
            return Ok(false);
        }
        let now = chrono::Utc::now().timestamp();
        if now > action.expires_at {
            action.status = ApprovalStatus::Expired;
            let snapshot = action.clone();
            drop(pending);
            self.append_wal(&snapshot);
            return Ok(false);
        }
        action.status = ApprovalStatus::Consumed;
        let snapshot = action.clone();
        drop(pending);
        self.append_wal(&snapshot);
        Ok(true)
    }

    pub async fn get(&self, action_id: &str) -> Option<PendingAction> {
        self.pending.lock().await.get(action_id).cloned()
    }

    pub async fn list_pending(&self) -> Vec<PendingAction> {
        let pending = self.pending.lock().await;
        let mut actions: Vec<_> =
            pending.values().filter(|a| a.status == ApprovalStatus::Pending).cloned().collect();
        actions.sort_by_key(|a| a.created_at);
        actions
    }

    /// Mark every `Pending` action past its expiry as `Expired`. Returns
    /// the count swept, intended to run on a periodic background tick.
    pub async fn expire_sweep(&self) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut pending = self.pending.lock().await;
        let mut expired = Vec::new();
        for action in pending.values_mut() {
            if action.status == ApprovalStatus::Pending && now > action.expires_at {
                action.status = ApprovalStatus::Expired;
                expired.push(action.clone());
            }
        }
        drop(pending);
        for action in &expired {
            self.append_wal(action);
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expired stale pending approvals");
        }
        Ok(expired.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(expiry_secs: u64) -> ApprovalQueue {
        ApprovalQueue::new(None, expiry_secs).unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_approve_then_is_approved_consumes() {
        let q = queue(3600);
        let id = q.enqueue("execute_workflow", serde_json::json!({"id": "wf1"})).await.unwrap();
        assert!(!q.is_approved("execute_workflow", &id).await.unwrap());
        q.approve("execute_workflow", &id).await.unwrap();
        assert!(q.is_approved("execute_workflow", &id).await.unwrap());
        // second check consumes the grant, so it's gone now.
        assert!(!q.is_approved("execute_workflow", &id).await.unwrap());
    }

    #[tokio::test]
    async fn approve_wrong_tool_errors() {
        let q = queue(3600);
        let id = q.enqueue("execute_workflow", serde_json::json!({})).await.unwrap();
        assert!(q.approve("other_tool", &id).await.is_err());
    }

    #[tokio::test]
    async fn reject_marks_not_approved() {
        let q = queue(3600);
        let id = q.enqueue("execute_workflow", serde_json::json!({})).await.unwrap();
        q.reject("execute_workflow", &id).await.unwrap();
        assert!(!q.is_approved("execute_workflow", &id).await.unwrap());
    }

    #[tokio::test]
    async fn expire_sweep_expires_past_deadline() {
        let q = queue(0);
        let id = q.enqueue("execute_workflow", serde_json::json!({})).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let swept = q.expire_sweep().await.unwrap();
        assert_eq!(swept, 1);
        let action = q.get(&id).await.unwrap();
        assert_eq!(action.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn unknown_action_is_not_approved() {
        let q = queue(3600);
        assert!(!q.is_approved("execute_workflow", "nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn wal_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let wal = dir.path().join("approvals.jsonl");
        let id = {
            let q = ApprovalQueue::new(Some(wal.clone()), 3600).unwrap();
            let id = q.enqueue("execute_workflow", serde_json::json!({"x": 1})).await.unwrap();
            q.approve("execute_workflow", &id).await.unwrap();
            id
        };
        let q2 = ApprovalQueue::new(Some(wal.clone()), 3600).unwrap();
        assert!(q2.is_approved("execute_workflow", &id).await.unwrap());
    }

    #[tokio::test]
    async fn list_pending_excludes_resolved() {
        let q = queue(3600);
        let id1 = q.enqueue("execute_workflow", serde_json::json!({})).await.unwrap();
        let _id2 = q.enqueue("request_approval", serde_json::json!({})).await.unwrap();
        q.approve("execute_workflow", &id1).await.unwrap();
        let pending = q.list_pending().await;
        assert_eq!(pending.len(), 1);
    }
}

// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory approval backend.
//!
//! Requests and responses live in mutex-guarded maps. First-response-wins
//! is enforced under the lock; waiters are woken through a shared `Notify`
//! and re-check the map, so a racing response is never lost.

use crate::approval::{ApprovalBackend, ApprovalConfig};
use crate::engine_core::constants::defaults;
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{
    ApprovalRequest, ApprovalResponse, ApprovalSnapshot, ApprovalStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct ApprovalState {
    requests: HashMap<String, ApprovalRequest>,
    responses: HashMap<String, ApprovalResponse>,
}

pub struct InMemoryApprovalBackend {
    state: Arc<Mutex<ApprovalState>>,
    notify: Arc<Notify>,
    config: ApprovalConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl InMemoryApprovalBackend {
    pub fn new(config: ApprovalConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(ApprovalState {
                requests: HashMap::new(),
                responses: HashMap::new(),
            })),
            notify: Arc::new(Notify::new()),
            config,
            sweeper: Mutex::new(None),
        }
    }

    /// Spawn the periodic TTL sweep. Call once after construction when a
    /// runtime is available; tests may skip it and sweep implicitly via
    /// the size cap.
    pub fn start_gc(&self) {
        let state = Arc::clone(&self.state);
        let ttl = self.config.ttl;
        let handle = tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_secs(defaults::APPROVAL_SWEEP_SECS));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let cutoff = Utc::now()
                    - chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1));
                let mut guard = lock(&state);
                let before = guard.requests.len();
                guard.requests.retain(|_, r| r.created_at > cutoff);
                guard
                    .responses
                    .retain(|_, r| r.responded_at > cutoff);
                let removed = before - guard.requests.len();
                drop(guard);
                if removed > 0 {
                    debug!(removed, "approval GC sweep");
                }
            }
        });
        if let Ok(mut slot) = self.sweeper.lock() {
            *slot = Some(handle);
        }
    }

    fn evict_oldest_if_full(state: &mut ApprovalState, max_entries: usize) {
        while state.requests.len() >= max_entries {
            let oldest = state
                .requests
                .values()
                .min_by_key(|r| r.created_at)
                .map(|r| r.id.clone());
            match oldest {
                Some(id) => {
                    state.requests.remove(&id);
                    state.responses.remove(&id);
                }
                None => break,
            }
        }
    }

    fn snapshot_locked(
        &self,
        state: &ApprovalState,
        request_id: &str,
    ) -> Option<ApprovalSnapshot> {
        let request = state.requests.get(request_id)?;
        if let Some(response) = state.responses.get(request_id) {
            return Some(ApprovalSnapshot {
                approval_id: request_id.to_string(),
                status: if response.approved {
                    ApprovalStatus::Approved
                } else {
                    ApprovalStatus::Denied
                },
                responder: Some(response.responder.clone()),
                responded_at: Some(response.responded_at),
                comment: response.comment.clone(),
                auto_verdict: None,
            });
        }
        let age = Utc::now() - request.created_at;
        let timed_out = age
            .to_std()
            .map(|d| d > self.config.timeout)
            .unwrap_or(false);
        if timed_out {
            return Some(ApprovalSnapshot {
                approval_id: request_id.to_string(),
                status: ApprovalStatus::Timeout,
                responder: None,
                responded_at: None,
                comment: None,
                auto_verdict: Some(self.config.auto_verdict),
            });
        }
        Some(ApprovalSnapshot {
            approval_id: request_id.to_string(),
            status: ApprovalStatus::Pending,
            responder: None,
            responded_at: None,
            comment: None,
            auto_verdict: None,
        })
    }
}

fn lock(state: &Mutex<ApprovalState>) -> MutexGuard<'_, ApprovalState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl ApprovalBackend for InMemoryApprovalBackend {
    async fn submit(&self, request: ApprovalRequest) -> Result<String, ShieldError> {
        let mut state = lock(&self.state);
        if state.requests.contains_key(&request.id) {
            return Ok(request.id);
        }
        Self::evict_oldest_if_full(&mut state, self.config.max_entries);
        let id = request.id.clone();
        state.requests.insert(id.clone(), request);
        Ok(id)
    }

    async fn respond(
        &self,
        request_id: &str,
        approved: bool,
        responder: &str,
        comment: Option<String>,
    ) -> Result<bool, ShieldError> {
        let accepted = {
            let mut state = lock(&self.state);
            if !state.requests.contains_key(request_id) {
                return Err(ShieldError::Approval(format!(
                    "unknown approval request '{request_id}'"
                )));
            }
            if let Some(existing) = state.responses.get(request_id) {
                warn!(
                    request_id,
                    first_responder = %existing.responder,
                    duplicate_responder = %responder,
                    "duplicate approval response ignored"
                );
                false
            } else {
                let responded_at = Utc::now();
                state.responses.insert(
                    request_id.to_string(),
                    ApprovalResponse {
                        approved,
                        responder: responder.to_string(),
                        comment: comment.clone(),
                        responded_at,
                    },
                );
                // Mirror the terminal state onto the request record
                if let Some(request) = state.requests.get_mut(request_id) {
                    request.status = if approved {
                        ApprovalStatus::Approved
                    } else {
                        ApprovalStatus::Denied
                    };
                    request.responder = Some(responder.to_string());
                    request.responded_at = Some(responded_at);
                    request.comment = comment;
                }
                true
            }
        };
        if accepted {
            self.notify.notify_waiters();
        }
        Ok(accepted)
    }

    async fn get_status(&self, request_id: &str) -> Result<Option<ApprovalSnapshot>, ShieldError> {
        let state = lock(&self.state);
        Ok(self.snapshot_locked(&state, request_id))
    }

    async fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Option<ApprovalResponse>, ShieldError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the waiter before checking so a response landing between
            // the check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = lock(&self.state);
                if let Some(response) = state.responses.get(request_id) {
                    return Ok(Some(response.clone()));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn pending(&self) -> Result<Vec<ApprovalRequest>, ShieldError> {
        let state = lock(&self.state);
        let mut items: Vec<ApprovalRequest> = state
            .requests
            .values()
            .filter(|r| {
                r.status == ApprovalStatus::Pending && !state.responses.contains_key(&r.id)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(items)
    }

    fn stop(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for InMemoryApprovalBackend {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest {
            id: id.to_string(),
            tool: "deploy".to_string(),
            args: json!({"env": "prod"}),
            rule_id: "needs-approval".to_string(),
            message: "deploy requires approval".to_string(),
            session_id: "s".to_string(),
            created_at: Utc::now(),
            status: ApprovalStatus::Pending,
            responder: None,
            responded_at: None,
            comment: None,
        }
    }

    fn backend() -> InMemoryApprovalBackend {
        InMemoryApprovalBackend::new(ApprovalConfig::default())
    }

    #[tokio::test]
    async fn test_submit_then_pending_status() {
        let b = backend();
        let id = b.submit(request("a1")).await.unwrap();
        assert_eq!(id, "a1");
        let status = b.get_status("a1").await.unwrap().unwrap();
        assert_eq!(status.status, ApprovalStatus::Pending);
        assert_eq!(b.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_is_idempotent() {
        let b = backend();
        b.submit(request("a1")).await.unwrap();
        b.submit(request("a1")).await.unwrap();
        assert_eq!(b.pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let b = backend();
        b.submit(request("a1")).await.unwrap();
        assert!(b.respond("a1", true, "alice", None).await.unwrap());
        // Second response is a no-op
        assert!(!b.respond("a1", false, "bob", None).await.unwrap());
        let status = b.get_status("a1").await.unwrap().unwrap();
        assert_eq!(status.status, ApprovalStatus::Approved);
        assert_eq!(status.responder.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_respond_unknown_id_errors() {
        let b = backend();
        assert!(b.respond("nope", true, "alice", None).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_resolution_with_auto_verdict() {
        let b = InMemoryApprovalBackend::new(ApprovalConfig {
            timeout: Duration::from_millis(5),
            ..Default::default()
        });
        b.submit(request("a1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let status = b.get_status("a1").await.unwrap().unwrap();
        assert_eq!(status.status, ApprovalStatus::Timeout);
        assert_eq!(status.auto_verdict, Some(crate::engine_core::models::Verdict::Block));
    }

    #[tokio::test]
    async fn test_wait_for_response_wakes_on_respond() {
        let b = Arc::new(backend());
        b.submit(request("a1")).await.unwrap();
        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.wait_for_response("a1", Duration::from_secs(5)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        b.respond("a1", true, "alice", Some("ok".to_string()))
            .await
            .unwrap();
        let response = waiter.await.unwrap().unwrap().unwrap();
        assert!(response.approved);
        assert_eq!(response.responder, "alice");
    }

    #[tokio::test]
    async fn test_wait_for_response_times_out() {
        let b = backend();
        b.submit(request("a1")).await.unwrap();
        let got = b
            .wait_for_response("a1", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_hard_cap_evicts_oldest() {
        let b = InMemoryApprovalBackend::new(ApprovalConfig {
            max_entries: 3,
            ..Default::default()
        });
        for i in 0..5 {
            let mut r = request(&format!("a{i}"));
            r.created_at = Utc::now() + chrono::Duration::milliseconds(i);
            b.submit(r).await.unwrap();
        }
        assert!(b.pending().await.unwrap().len() <= 3);
        // Oldest ids are gone
        assert!(b.get_status("a0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_responses_only_one_wins() {
        let b = Arc::new(backend());
        b.submit(request("a1")).await.unwrap();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let b = Arc::clone(&b);
            tasks.push(tokio::spawn(async move {
                b.respond("a1", i % 2 == 0, &format!("r{i}"), None).await
            }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap().unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }
}

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

//! Webhook approval backend.
//!
//! Decorates the in-memory store with a best-effort POST notification per
//! submitted request. Responses come back through the HTTP boundary's
//! respond-approval endpoint; delivery failures never block a check.

use crate::approval::{ApprovalBackend, ApprovalConfig, InMemoryApprovalBackend};
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{
    ApprovalRequest, ApprovalResponse, ApprovalSnapshot,
};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

pub struct WebhookApprovalBackend {
    inner: InMemoryApprovalBackend,
    client: reqwest::Client,
    url: String,
}

impl WebhookApprovalBackend {
    pub fn new(url: String, config: ApprovalConfig) -> Self {
        Self {
            inner: InMemoryApprovalBackend::new(config),
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn start_gc(&self) {
        self.inner.start_gc();
    }
}

#[async_trait]
impl ApprovalBackend for WebhookApprovalBackend {
    async fn submit(&self, request: ApprovalRequest) -> Result<String, ShieldError> {
        // Args in the stored request are already sanitized for exposure
        let notification = json!({
            "type": "approval_request",
            "approval_id": request.id,
            "tool": request.tool,
            "args": request.args,
            "rule_id": request.rule_id,
            "message": request.message,
            "session_id": request.session_id,
            "created_at": request.created_at,
        });
        let id = self.inner.submit(request).await?;

        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let sent = client
                .post(&url)
                .json(&notification)
                .timeout(Duration::from_secs(10))
                .send()
                .await;
            if let Err(e) = sent {
                warn!(error = %e, "approval webhook notification failed");
            }
        });
        Ok(id)
    }

    async fn respond(
        &self,
        request_id: &str,
        approved: bool,
        responder: &str,
        comment: Option<String>,
    ) -> Result<bool, ShieldError> {
        self.inner
            .respond(request_id, approved, responder, comment)
            .await
    }

    async fn get_status(&self, request_id: &str) -> Result<Option<ApprovalSnapshot>, ShieldError> {
        self.inner.get_status(request_id).await
    }

    async fn wait_for_response(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Option<ApprovalResponse>, ShieldError> {
        self.inner.wait_for_response(request_id, timeout).await
    }

    async fn pending(&self) -> Result<Vec<ApprovalRequest>, ShieldError> {
        self.inner.pending().await
    }

    fn stop(&self) {
        self.inner.stop();
    }
}

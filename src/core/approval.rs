use crate::common::{SmartLockError, Result};
use crate::core::sessions::generate_url_token;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub token: String,
    pub name: String,
    pub phone: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
}

/// Pending QR access requests keyed by their approval-link token.
///
/// A request leaves `Pending` exactly once. Requests never expire.
#[derive(Default)]
pub struct ApprovalWorkflow {
    requests: Mutex<HashMap<String, ApprovalRequest>>,
}

impl ApprovalWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, name: &str, phone: &str) -> ApprovalRequest {
        let mut requests = self.requests.lock();
        let token = loop {
            let candidate = generate_url_token();
            if !requests.contains_key(&candidate) {
                break candidate;
            }
        };

        let request = ApprovalRequest {
            token: token.clone(),
            name: name.to_string(),
            phone: phone.to_string(),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
        };
        requests.insert(token, request.clone());
        tracing::info!("Created approval request for {} ({})", request.name, request.phone);
        request
    }

    pub fn approve(&self, token: &str) -> Result<ApprovalRequest> {
        self.resolve(token, ApprovalStatus::Approved)
    }

    pub fn deny(&self, token: &str) -> Result<ApprovalRequest> {
        self.resolve(token, ApprovalStatus::Denied)
    }

    fn resolve(&self, token: &str, outcome: ApprovalStatus) -> Result<ApprovalRequest> {
        let mut requests = self.requests.lock();
        match requests.get_mut(token) {
            Some(request) if request.status == ApprovalStatus::Pending => {
                request.status = outcome;
                tracing::info!("Approval request for {} is now {}", request.name, outcome.as_str());
                Ok(request.clone())
            }
            _ => Err(SmartLockError::InvalidApproval),
        }
    }

    pub fn status(&self, token: &str) -> Result<ApprovalStatus> {
        self.requests
            .lock()
            .get(token)
            .map(|r| r.status)
            .ok_or(SmartLockError::UnknownApproval)
    }
}

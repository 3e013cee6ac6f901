//! Salary codes and the requests that redeem them.
//!
//! A code moves `active -> redeemed` exactly once per successful redemption:
//! the flip is a conditional update in the store, so two concurrent callers
//! cannot both win. Requests move `pending -> approved | rejected` and never
//! leave a terminal state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{CreateCodeRequest, RedeemCodeRequest};
use crate::codegen::{generate_code, CODE_LEN};
use crate::error::{persistence, WorkflowError};
use crate::guard::{Admin, Caller};
use crate::model::{
    CodeStatus, CodeSummary, Decision, RedeemRequest, RedeemRequestView, ReviewStatus, SalaryCode,
};
use crate::store::Store;
use crate::validation::ValidationErrors;
use crate::{new_id, now_ms};

// Draws allowed before giving up on finding an unused code.
const MAX_CODE_DRAWS: usize = 4;

/// What happens to a code when its redemption request is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionPolicy {
    /// The code goes back to `active` and can be redeemed again.
    #[default]
    Release,
    /// The code stays `redeemed` for good.
    Retain,
}

impl fmt::Display for RejectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectionPolicy::Release => "release",
            RejectionPolicy::Retain => "retain",
        })
    }
}

impl FromStr for RejectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "release" => Ok(RejectionPolicy::Release),
            "retain" => Ok(RejectionPolicy::Retain),
            other => Err(format!("unknown rejection policy `{other}` (expected release|retain)")),
        }
    }
}

/// Code creation, redemption and review.
#[derive(Clone)]
pub struct RedemptionWorkflow {
    store: Arc<dyn Store>,
    policy: RejectionPolicy,
}

impl RedemptionWorkflow {
    pub fn new(store: Arc<dyn Store>, policy: RejectionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RejectionPolicy {
        self.policy
    }

    /// Validates the payee details, draws a fresh code and stores it as `active`.
    pub async fn create_code(
        &self,
        admin: &Admin,
        req: CreateCodeRequest,
    ) -> Result<SalaryCode, WorkflowError> {
        let now = now_ms();
        let mut errs = ValidationErrors::new();
        errs.min_chars("name", &req.name, 2, "Name must be at least 2 characters");
        errs.phone("phone", &req.phone);
        errs.min_chars("task", &req.task, 5, "Task description must be at least 5 characters");
        let price = errs.positive_price("price", &req.price);
        if req.expires_at.is_some_and(|at| at <= now) {
            errs.push("expiresAt", "Expiry must be in the future");
        }
        errs.finish()?;
        let Some(price) = price else {
            return Err(WorkflowError::field("price", "Price is required"));
        };

        let code = self.fresh_code().await?;
        let salary_code = SalaryCode {
            id: new_id(),
            code,
            name: req.name.trim().to_string(),
            phone: req.phone.trim().to_string(),
            task: req.task.trim().to_string(),
            price,
            status: CodeStatus::Active,
            created_at: now,
            expires_at: req.expires_at,
            created_by: Some(admin.id().to_string()),
        };
        self.store
            .insert_code(&salary_code)
            .await
            .map_err(persistence)?;
        info!(code_id = %salary_code.id, admin_id = %admin.id(), price = %salary_code.price, "salary code created");
        Ok(salary_code)
    }

    async fn fresh_code(&self) -> Result<String, WorkflowError> {
        for _ in 0..MAX_CODE_DRAWS {
            let candidate = generate_code(CODE_LEN)?;
            let taken = self
                .store
                .find_code(&candidate)
                .await
                .map_err(persistence)?;
            if taken.is_none() {
                return Ok(candidate);
            }
            warn!("generated salary code collided with an existing one; drawing again");
        }
        Err(persistence(anyhow::anyhow!(
            "no unused salary code after {MAX_CODE_DRAWS} draws"
        )))
    }

    /// Files a `pending` request against an active code and marks the code `redeemed`.
    pub async fn redeem_code(
        &self,
        caller: &Caller,
        req: RedeemCodeRequest,
    ) -> Result<RedeemRequest, WorkflowError> {
        let code = req.salary_code.trim().to_ascii_uppercase();
        let mut errs = ValidationErrors::new();
        errs.exact_chars("salaryCode", &code, CODE_LEN, "Salary code must be exactly 9 characters");
        errs.min_chars("upiId", &req.upi_id, 5, "UPI ID must be at least 5 characters");
        errs.min_chars("userName", &req.user_name, 2, "Name must be at least 2 characters");
        errs.phone("userPhone", &req.user_phone);
        errs.finish()?;

        let now = now_ms();
        let Some(salary_code) = self.store.find_code(&code).await.map_err(persistence)? else {
            warn!(user_id = %caller.id(), "redemption with unknown salary code");
            return Err(WorkflowError::InvalidCode);
        };
        if salary_code.is_expired(now) {
            warn!(user_id = %caller.id(), code_id = %salary_code.id, "redemption with expired salary code");
            return Err(WorkflowError::InvalidCode);
        }
        if salary_code.status != CodeStatus::Active {
            warn!(user_id = %caller.id(), code_id = %salary_code.id, "salary code already redeemed");
            return Err(WorkflowError::AlreadyRedeemed);
        }
        let open = self
            .store
            .open_requests_for_code(&salary_code.id)
            .await
            .map_err(persistence)?;
        if !open.is_empty() {
            warn!(user_id = %caller.id(), code_id = %salary_code.id, "salary code has an open request");
            return Err(WorkflowError::AlreadyRedeemed);
        }

        let request = RedeemRequest {
            id: new_id(),
            salary_code_id: salary_code.id.clone(),
            user_id: caller.id().to_string(),
            user_name: req.user_name.trim().to_string(),
            user_phone: req.user_phone.trim().to_string(),
            upi_id: req.upi_id.trim().to_string(),
            status: ReviewStatus::Pending,
            created_at: now,
            approved_at: None,
            rejected_at: None,
        };
        let filed = self
            .store
            .file_redemption(&request)
            .await
            .map_err(persistence)?;
        if !filed {
            warn!(user_id = %caller.id(), code_id = %salary_code.id, "lost redemption race");
            return Err(WorkflowError::AlreadyRedeemed);
        }
        info!(request_id = %request.id, code_id = %salary_code.id, user_id = %caller.id(), "redemption filed");
        Ok(request)
    }

    pub async fn approve_request(
        &self,
        admin: &Admin,
        request_id: &str,
    ) -> Result<RedeemRequest, WorkflowError> {
        self.review(admin, request_id, Decision::Approve).await
    }

    /// Rejects a pending request; under [`RejectionPolicy::Release`] the code becomes redeemable again.
    pub async fn reject_request(
        &self,
        admin: &Admin,
        request_id: &str,
    ) -> Result<RedeemRequest, WorkflowError> {
        self.review(admin, request_id, Decision::Reject).await
    }

    async fn review(
        &self,
        admin: &Admin,
        request_id: &str,
        decision: Decision,
    ) -> Result<RedeemRequest, WorkflowError> {
        let target = decision.target();
        let release = self.policy == RejectionPolicy::Release;
        let reviewed = match decision {
            Decision::Approve => {
                self.store
                    .review_redeem_request(request_id, target, now_ms())
                    .await
            }
            Decision::Reject => {
                self.store
                    .reject_redemption(request_id, now_ms(), release)
                    .await
            }
        }
        .map_err(persistence)?;
        let Some(request) = reviewed else {
            return Err(self.review_miss(request_id, target).await);
        };
        info!(request_id = %request.id, admin_id = %admin.id(), status = %request.status, "redemption reviewed");
        if decision == Decision::Reject && release {
            info!(code_id = %request.salary_code_id, "salary code released");
        }
        Ok(request)
    }

    async fn review_miss(&self, request_id: &str, target: ReviewStatus) -> WorkflowError {
        match self.store.get_redeem_request(request_id).await {
            Ok(Some(current)) => {
                warn!(request_id, current = %current.status, requested = %target, "redemption already reviewed");
                WorkflowError::InvalidTransition {
                    entity: "redeem request",
                    id: request_id.to_string(),
                    current: current.status.to_string(),
                    requested: target.to_string(),
                }
            }
            Ok(None) => WorkflowError::not_found("redeem request", request_id),
            Err(e) => persistence(e),
        }
    }

    /// Every code, newest first.
    pub async fn list_codes(&self, _admin: &Admin) -> Result<Vec<SalaryCode>, WorkflowError> {
        self.store.list_codes().await.map_err(persistence)
    }

    /// Every request joined with its code, newest first.
    pub async fn list_requests(&self, _admin: &Admin) -> Result<Vec<RedeemRequestView>, WorkflowError> {
        let requests = self
            .store
            .list_redeem_requests(None)
            .await
            .map_err(persistence)?;
        self.join_codes(requests).await
    }

    /// The caller's own requests joined with their codes, newest first.
    pub async fn my_requests(&self, caller: &Caller) -> Result<Vec<RedeemRequestView>, WorkflowError> {
        let requests = self
            .store
            .list_redeem_requests(Some(caller.id()))
            .await
            .map_err(persistence)?;
        self.join_codes(requests).await
    }

    async fn join_codes(
        &self,
        requests: Vec<RedeemRequest>,
    ) -> Result<Vec<RedeemRequestView>, WorkflowError> {
        let mut codes: HashMap<String, Option<CodeSummary>> = HashMap::new();
        let mut out = Vec::with_capacity(requests.len());
        for request in requests {
            if !codes.contains_key(&request.salary_code_id) {
                let code = self
                    .store
                    .get_code(&request.salary_code_id)
                    .await
                    .map_err(persistence)?;
                codes.insert(
                    request.salary_code_id.clone(),
                    code.as_ref().map(CodeSummary::from),
                );
            }
            let salary_code = codes.get(&request.salary_code_id).cloned().flatten();
            out.push(RedeemRequestView {
                request,
                salary_code,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::AccessGuard;
    use crate::memory::{InMemorySessions, InMemoryStore};
    use crate::model::{Account, Role};

    async fn guard() -> AccessGuard {
        let sessions = InMemorySessions::new();
        for (token, id, role) in [("admin", "a1", Role::Admin), ("user", "u1", Role::User)] {
            sessions
                .insert(
                    token,
                    Account {
                        id: id.into(),
                        email: format!("{id}@example.com"),
                        role,
                        email_verified: true,
                        created_at: 0,
                        updated_at: 0,
                    },
                )
                .unwrap();
        }
        AccessGuard::new(Arc::new(sessions))
    }

    fn redeem(code: &str) -> RedeemCodeRequest {
        RedeemCodeRequest {
            salary_code: code.into(),
            upi_id: "ravi@upi".into(),
            user_name: "Ravi".into(),
            user_phone: "9123456780".into(),
        }
    }

    #[tokio::test]
    async fn failed_release_leaves_request_pending_and_code_claimed() {
        let store = Arc::new(InMemoryStore::new());
        let wf = RedemptionWorkflow::new(store.clone(), RejectionPolicy::Release);
        let guard = guard().await;
        let admin = guard.require_admin(Some("admin")).await.unwrap();
        let user = guard.require_authenticated(Some("user")).await.unwrap();

        let code = wf
            .create_code(
                &admin,
                CreateCodeRequest {
                    name: "Asha".into(),
                    phone: "9876543210".into(),
                    task: "Share post".into(),
                    price: "150".into(),
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        let request = wf.redeem_code(&user, redeem(&code.code)).await.unwrap();

        store.fail_code_releases(true);
        let err = wf.reject_request(&admin, &request.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Persistence(_)));
        let current = store.get_redeem_request(&request.id).await.unwrap().unwrap();
        assert_eq!(current.status, ReviewStatus::Pending);
        assert_eq!(
            store.get_code(&code.id).await.unwrap().unwrap().status,
            CodeStatus::Redeemed
        );

        // The rejection can be retried once the store recovers.
        store.fail_code_releases(false);
        let rejected = wf.reject_request(&admin, &request.id).await.unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);
        assert!(wf.redeem_code(&user, redeem(&code.code)).await.is_ok());
    }

    #[test]
    fn policy_parses_and_displays() {
        assert_eq!("release".parse::<RejectionPolicy>(), Ok(RejectionPolicy::Release));
        assert_eq!(" RETAIN ".parse::<RejectionPolicy>(), Ok(RejectionPolicy::Retain));
        assert!("keep".parse::<RejectionPolicy>().is_err());
        assert_eq!(RejectionPolicy::default().to_string(), "release");
    }

    #[test]
    fn policy_serde_is_lowercase() {
        let p: RejectionPolicy = serde_json::from_str(r#""retain""#).unwrap();
        assert_eq!(p, RejectionPolicy::Retain);
    }
}

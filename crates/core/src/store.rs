//! Collaborator contracts consumed by the workflows.

use async_trait::async_trait;

use crate::model::{
    CodeStatus, EpochMs, RedeemRequest, ReviewStatus, SalaryCode, Task, TaskStatus, TaskSubmission,
};

/// Persistence collaborator.
///
/// Listing methods return rows newest first (`created_at` descending).
/// Methods named `swap_*` / `review_*` are conditional single-row updates: they
/// change the row only if it is currently in the expected state and return the
/// updated row, or `None` when nothing matched.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_code(&self, code: &SalaryCode) -> anyhow::Result<()>;
    async fn get_code(&self, id: &str) -> anyhow::Result<Option<SalaryCode>>;
    /// Looks a code up by its 9-character value.
    async fn find_code(&self, code: &str) -> anyhow::Result<Option<SalaryCode>>;
    async fn list_codes(&self) -> anyhow::Result<Vec<SalaryCode>>;
    async fn swap_code_status(
        &self,
        id: &str,
        from: CodeStatus,
        to: CodeStatus,
    ) -> anyhow::Result<Option<SalaryCode>>;

    async fn insert_redeem_request(&self, req: &RedeemRequest) -> anyhow::Result<()>;
    async fn get_redeem_request(&self, id: &str) -> anyhow::Result<Option<RedeemRequest>>;
    /// Requests against `code_id` whose status is not `rejected`.
    async fn open_requests_for_code(&self, code_id: &str) -> anyhow::Result<Vec<RedeemRequest>>;
    /// All requests, or only those filed by `user_id`.
    async fn list_redeem_requests(&self, user_id: Option<&str>) -> anyhow::Result<Vec<RedeemRequest>>;
    /// Moves a `pending` request to `to`, stamping `approved_at`/`rejected_at` with `at`.
    async fn review_redeem_request(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
    ) -> anyhow::Result<Option<RedeemRequest>>;

    /// Flips the code `active -> redeemed` and files `req` against it as one unit.
    ///
    /// Returns `false`, with nothing written, when the code was no longer
    /// active. The provided implementation composes the conditional update
    /// with the insert and undoes the flip if the insert fails; stores with
    /// transactions should override it.
    async fn file_redemption(&self, req: &RedeemRequest) -> anyhow::Result<bool> {
        let claimed = self
            .swap_code_status(&req.salary_code_id, CodeStatus::Active, CodeStatus::Redeemed)
            .await?;
        if claimed.is_none() {
            return Ok(false);
        }
        if let Err(e) = self.insert_redeem_request(req).await {
            if let Err(undo) = self
                .swap_code_status(&req.salary_code_id, CodeStatus::Redeemed, CodeStatus::Active)
                .await
            {
                tracing::error!(
                    code_id = %req.salary_code_id,
                    error = %undo,
                    "could not release code after failed redemption insert"
                );
            }
            return Err(e);
        }
        Ok(true)
    }

    /// Moves a `rejected` request back to `pending`, clearing `rejected_at`.
    async fn reopen_redeem_request(&self, id: &str) -> anyhow::Result<Option<RedeemRequest>>;

    /// Rejects a `pending` request and, with `release`, flips its code
    /// `redeemed -> active`, as one unit.
    ///
    /// Returns `None`, with nothing written, when the request was not pending.
    /// The provided implementation reopens the request if the release fails;
    /// stores with transactions should override it.
    async fn reject_redemption(
        &self,
        id: &str,
        at: EpochMs,
        release: bool,
    ) -> anyhow::Result<Option<RedeemRequest>> {
        let Some(rejected) = self
            .review_redeem_request(id, ReviewStatus::Rejected, at)
            .await?
        else {
            return Ok(None);
        };
        if !release {
            return Ok(Some(rejected));
        }
        match self
            .swap_code_status(&rejected.salary_code_id, CodeStatus::Redeemed, CodeStatus::Active)
            .await
        {
            Ok(Some(_)) => Ok(Some(rejected)),
            Ok(None) => {
                tracing::warn!(code_id = %rejected.salary_code_id, "salary code was not redeemed; nothing to release");
                Ok(Some(rejected))
            }
            Err(e) => {
                if let Err(undo) = self.reopen_redeem_request(id).await {
                    tracing::error!(
                        request_id = id,
                        error = %undo,
                        "could not reopen request after failed code release"
                    );
                }
                Err(e)
            }
        }
    }

    async fn insert_task(&self, task: &Task) -> anyhow::Result<()>;
    async fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>>;
    /// All tasks, or only those in `status`.
    async fn list_tasks(&self, status: Option<TaskStatus>) -> anyhow::Result<Vec<Task>>;
    /// Unconditional overwrite.
    async fn set_task_status(&self, id: &str, status: TaskStatus) -> anyhow::Result<Option<Task>>;

    async fn insert_submission(&self, sub: &TaskSubmission) -> anyhow::Result<()>;
    async fn get_submission(&self, id: &str) -> anyhow::Result<Option<TaskSubmission>>;
    async fn list_submissions(&self, user_id: Option<&str>) -> anyhow::Result<Vec<TaskSubmission>>;
    /// Moves a `pending` submission to `to`; `admin_notes` replaces the stored notes when given.
    async fn review_submission(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
        admin_notes: Option<&str>,
    ) -> anyhow::Result<Option<TaskSubmission>>;
}

/// File upload collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` on behalf of `owner_id` and returns a stable reference.
    async fn put(&self, owner_id: &str, content_type: &str, bytes: Vec<u8>) -> anyhow::Result<String>;
}

//! Tasks, proof uploads and task submissions.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::amount::Amount;
use crate::api::{CreateTaskRequest, SubmitTaskRequest};
use crate::error::{persistence, WorkflowError};
use crate::guard::{Admin, Caller};
use crate::model::{
    Decision, ReviewStatus, SubmissionProof, SubmissionView, Task, TaskStatus, TaskSubmission,
    TaskSummary, TaskType,
};
use crate::store::{BlobStore, Store};
use crate::validation::{non_blank, ValidationErrors};
use crate::{new_id, now_ms};

/// Upload cap used unless the embedder sets one.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

/// Task administration and the submit/review cycle.
#[derive(Clone)]
pub struct TaskWorkflow {
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    max_upload_bytes: usize,
}

impl TaskWorkflow {
    pub fn new(store: Arc<dyn Store>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            store,
            blobs,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub async fn create_task(&self, admin: &Admin, req: CreateTaskRequest) -> Result<Task, WorkflowError> {
        let mut errs = ValidationErrors::new();
        errs.min_chars("title", &req.title, 5, "Title must be at least 5 characters");
        errs.min_chars(
            "description",
            &req.description,
            10,
            "Description must be at least 10 characters",
        );
        let task_type = TaskType::parse(req.task_type.trim());
        if task_type.is_none() {
            errs.push("taskType", "Please select a valid task type");
        }
        // Price is ignored for free tasks.
        let price = if req.is_free {
            Some(Amount::ZERO)
        } else {
            errs.positive_price("price", req.price.as_deref().unwrap_or_default())
        };
        let requirements = match req.requirements {
            None | Some(serde_json::Value::Null) => serde_json::Value::Object(Default::default()),
            Some(v @ serde_json::Value::Object(_)) => v,
            Some(_) => {
                errs.push("requirements", "Requirements must be a JSON object");
                serde_json::Value::Null
            }
        };
        errs.finish()?;
        let (Some(task_type), Some(price)) = (task_type, price) else {
            return Err(WorkflowError::field("taskType", "Please select a valid task type"));
        };

        let task = Task {
            id: new_id(),
            title: req.title.trim().to_string(),
            description: req.description.trim().to_string(),
            task_type,
            price,
            is_free: req.is_free,
            mb_limit: req.mb_limit,
            requirements,
            status: TaskStatus::Active,
            created_at: now_ms(),
            created_by: Some(admin.id().to_string()),
        };
        self.store.insert_task(&task).await.map_err(persistence)?;
        info!(task_id = %task.id, admin_id = %admin.id(), task_type = task.task_type.as_str(), "task created");
        Ok(task)
    }

    /// Overwrites the status; every status is reachable from every other.
    pub async fn set_task_status(
        &self,
        admin: &Admin,
        task_id: &str,
        status: TaskStatus,
    ) -> Result<Task, WorkflowError> {
        let task = self
            .store
            .set_task_status(task_id, status)
            .await
            .map_err(persistence)?
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
        info!(task_id, admin_id = %admin.id(), status = status.as_str(), "task status set");
        Ok(task)
    }

    /// Non-admins only see active tasks; anything else reads as missing.
    pub async fn get_task(&self, caller: &Caller, task_id: &str) -> Result<Task, WorkflowError> {
        let task = self
            .store
            .get_task(task_id)
            .await
            .map_err(persistence)?
            .filter(|t| caller.is_admin() || t.status == TaskStatus::Active)
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
        Ok(task)
    }

    pub async fn list_active_tasks(&self, _caller: &Caller) -> Result<Vec<Task>, WorkflowError> {
        self.store
            .list_tasks(Some(TaskStatus::Active))
            .await
            .map_err(persistence)
    }

    pub async fn list_tasks(&self, _admin: &Admin) -> Result<Vec<Task>, WorkflowError> {
        self.store.list_tasks(None).await.map_err(persistence)
    }

    /// Stores an image for a later submission and returns its reference.
    pub async fn upload_proof_image(
        &self,
        caller: &Caller,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<String, WorkflowError> {
        let mut errs = ValidationErrors::new();
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            errs.push("file", "Only image uploads are accepted");
        }
        if bytes.is_empty() {
            errs.push("file", "File is empty");
        } else if bytes.len() > self.max_upload_bytes {
            errs.push(
                "file",
                format!("File must be at most {} bytes", self.max_upload_bytes),
            );
        }
        errs.finish()?;

        let size = bytes.len();
        let reference = self
            .blobs
            .put(caller.id(), content_type.trim(), bytes)
            .await
            .map_err(WorkflowError::Upload)?;
        info!(user_id = %caller.id(), size, "proof image stored");
        Ok(reference)
    }

    /// Files a `pending` submission for an active task. Proof text and image
    /// reference are stored exactly as given.
    pub async fn submit_task(
        &self,
        caller: &Caller,
        task_id: &str,
        req: SubmitTaskRequest,
    ) -> Result<TaskSubmission, WorkflowError> {
        if req.proof.trim().is_empty() {
            return Err(WorkflowError::field("proof", "Please provide proof of task completion"));
        }
        let task = self
            .store
            .get_task(task_id)
            .await
            .map_err(persistence)?
            .ok_or_else(|| WorkflowError::not_found("task", task_id))?;
        if task.status != TaskStatus::Active {
            warn!(task_id, user_id = %caller.id(), status = task.status.as_str(), "submission for inactive task");
            return Err(WorkflowError::TaskNotActive(task.id));
        }

        let now = now_ms();
        let submission = TaskSubmission {
            id: new_id(),
            task_id: task.id,
            user_id: caller.id().to_string(),
            submission_proof: SubmissionProof {
                proof: req.proof,
                additional_notes: non_blank(req.additional_notes),
                image_url: req.image_ref.filter(|r| !r.is_empty()),
                submitted_at: now,
            },
            status: ReviewStatus::Pending,
            admin_notes: None,
            created_at: now,
            approved_at: None,
            rejected_at: None,
        };
        self.store
            .insert_submission(&submission)
            .await
            .map_err(persistence)?;
        info!(submission_id = %submission.id, task_id = %submission.task_id, user_id = %caller.id(), "task submitted");
        Ok(submission)
    }

    pub async fn approve_submission(
        &self,
        admin: &Admin,
        submission_id: &str,
        admin_notes: Option<String>,
    ) -> Result<TaskSubmission, WorkflowError> {
        self.review(admin, submission_id, Decision::Approve, admin_notes)
            .await
    }

    pub async fn reject_submission(
        &self,
        admin: &Admin,
        submission_id: &str,
        admin_notes: Option<String>,
    ) -> Result<TaskSubmission, WorkflowError> {
        self.review(admin, submission_id, Decision::Reject, admin_notes)
            .await
    }

    async fn review(
        &self,
        admin: &Admin,
        submission_id: &str,
        decision: Decision,
        admin_notes: Option<String>,
    ) -> Result<TaskSubmission, WorkflowError> {
        let target = decision.target();
        let notes = non_blank(admin_notes);
        let reviewed = self
            .store
            .review_submission(submission_id, target, now_ms(), notes.as_deref())
            .await
            .map_err(persistence)?;
        if let Some(sub) = reviewed {
            info!(submission_id, admin_id = %admin.id(), status = %sub.status, "submission reviewed");
            return Ok(sub);
        }
        match self
            .store
            .get_submission(submission_id)
            .await
            .map_err(persistence)?
        {
            Some(current) => {
                warn!(submission_id, current = %current.status, requested = %target, "submission already reviewed");
                Err(WorkflowError::InvalidTransition {
                    entity: "submission",
                    id: submission_id.to_string(),
                    current: current.status.to_string(),
                    requested: target.to_string(),
                })
            }
            None => Err(WorkflowError::not_found("submission", submission_id)),
        }
    }

    /// Every submission joined with its task, newest first.
    pub async fn list_submissions(&self, _admin: &Admin) -> Result<Vec<SubmissionView>, WorkflowError> {
        let subs = self
            .store
            .list_submissions(None)
            .await
            .map_err(persistence)?;
        self.join_tasks(subs).await
    }

    /// The caller's own submissions joined with their tasks, newest first.
    pub async fn my_submissions(&self, caller: &Caller) -> Result<Vec<SubmissionView>, WorkflowError> {
        let subs = self
            .store
            .list_submissions(Some(caller.id()))
            .await
            .map_err(persistence)?;
        self.join_tasks(subs).await
    }

    async fn join_tasks(&self, subs: Vec<TaskSubmission>) -> Result<Vec<SubmissionView>, WorkflowError> {
        let mut tasks: HashMap<String, Option<TaskSummary>> = HashMap::new();
        let mut out = Vec::with_capacity(subs.len());
        for submission in subs {
            if !tasks.contains_key(&submission.task_id) {
                let task = self
                    .store
                    .get_task(&submission.task_id)
                    .await
                    .map_err(persistence)?;
                tasks.insert(submission.task_id.clone(), task.as_ref().map(TaskSummary::from));
            }
            let task = tasks.get(&submission.task_id).cloned().flatten();
            out.push(SubmissionView { submission, task });
        }
        Ok(out)
    }
}

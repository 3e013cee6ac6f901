use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Unix epoch milliseconds.
pub type EpochMs = i64;

/// Capability attached to an account.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// End user: may redeem codes and submit tasks.
    User,
    /// Administrator: may create codes/tasks and review requests.
    Admin,
}

impl Role {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Identity as handed over by the session collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
    pub created_at: EpochMs,
    pub updated_at: EpochMs,
}

/// Lifecycle of a salary code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CodeStatus {
    Active,
    Redeemed,
}

impl CodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeStatus::Active => "active",
            CodeStatus::Redeemed => "redeemed",
        }
    }
}

/// A single-use alphanumeric token representing a redeemable payout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SalaryCode {
    pub id: String,
    pub code: String,
    pub name: String,
    pub phone: String,
    /// Free-text description of the work being paid for.
    pub task: String,
    pub price: Amount,
    pub status: CodeStatus,
    pub created_at: EpochMs,
    #[serde(default)]
    pub expires_at: Option<EpochMs>,
    /// Administrator who generated the code.
    #[serde(default)]
    pub created_by: Option<String>,
}

impl SalaryCode {
    /// True once `expires_at` has passed.
    pub fn is_expired(&self, now: EpochMs) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Review state shared by redemption requests and task submissions.
///
/// `Pending` is the only state that may transition; both outcomes are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrator verdict on a pending request or submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    /// Status the verdict moves a pending item to.
    pub fn target(self) -> ReviewStatus {
        match self {
            Decision::Approve => ReviewStatus::Approved,
            Decision::Reject => ReviewStatus::Rejected,
        }
    }
}

/// A user's claim against a salary code, subject to admin approval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedeemRequest {
    pub id: String,
    pub salary_code_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_phone: String,
    /// Payout destination.
    pub upi_id: String,
    pub status: ReviewStatus,
    pub created_at: EpochMs,
    #[serde(default)]
    pub approved_at: Option<EpochMs>,
    #[serde(default)]
    pub rejected_at: Option<EpochMs>,
}

/// Kind of work a task asks for.
///
/// Older clients send the platform-flavoured names (`instagram`, `youtube`, ...);
/// those are accepted as aliases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(alias = "instagram")]
    SocialPost,
    #[serde(alias = "youtube")]
    VideoPlatform,
    #[serde(alias = "video")]
    VideoCreation,
    #[serde(alias = "content")]
    ContentCreation,
    Survey,
    AppTest,
    Other,
}

impl TaskType {
    /// Every accepted wire name, canonical and legacy.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "social_post" | "instagram" => TaskType::SocialPost,
            "video_platform" | "youtube" => TaskType::VideoPlatform,
            "video_creation" | "video" => TaskType::VideoCreation,
            "content_creation" | "content" => TaskType::ContentCreation,
            "survey" => TaskType::Survey,
            "app_test" => TaskType::AppTest,
            "other" => TaskType::Other,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::SocialPost => "social_post",
            TaskType::VideoPlatform => "video_platform",
            TaskType::VideoCreation => "video_creation",
            TaskType::ContentCreation => "content_creation",
            TaskType::Survey => "survey",
            TaskType::AppTest => "app_test",
            TaskType::Other => "other",
        }
    }
}

/// Administrator-controlled task state. Any state may be set from any other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        }
    }
}

/// A unit of work offered to users, optionally paid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    /// Always zero for free tasks.
    pub price: Amount,
    pub is_free: bool,
    #[serde(default)]
    pub mb_limit: Option<u32>,
    /// Schema-less document passed through as given.
    #[serde(default)]
    pub requirements: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: EpochMs,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// What a user hands in as proof of completing a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionProof {
    pub proof: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_notes: Option<String>,
    /// Reference returned by the upload store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub submitted_at: EpochMs,
}

/// A user's proof-of-completion record for a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSubmission {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub submission_proof: SubmissionProof,
    pub status: ReviewStatus,
    #[serde(default)]
    pub admin_notes: Option<String>,
    pub created_at: EpochMs,
    #[serde(default)]
    pub approved_at: Option<EpochMs>,
    #[serde(default)]
    pub rejected_at: Option<EpochMs>,
}

/// Code fields shown next to a redemption request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeSummary {
    pub code: String,
    pub task: String,
    pub price: Amount,
}

impl From<&SalaryCode> for CodeSummary {
    fn from(c: &SalaryCode) -> Self {
        Self {
            code: c.code.clone(),
            task: c.task.clone(),
            price: c.price,
        }
    }
}

/// Redemption request joined with its salary code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedeemRequestView {
    #[serde(flatten)]
    pub request: RedeemRequest,
    pub salary_code: Option<CodeSummary>,
}

/// Task fields shown next to a submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSummary {
    pub title: String,
    pub task_type: TaskType,
    pub price: Amount,
    pub is_free: bool,
}

impl From<&Task> for TaskSummary {
    fn from(t: &Task) -> Self {
        Self {
            title: t.title.clone(),
            task_type: t.task_type,
            price: t.price,
            is_free: t.is_free,
        }
    }
}

/// Submission joined with its task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmissionView {
    #[serde(flatten)]
    pub submission: TaskSubmission,
    pub task: Option<TaskSummary>,
}

/// Per-status counts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub approved: u64,
    pub rejected: u64,
}

impl StatusCounts {
    /// Counts one item.
    pub fn record(&mut self, status: ReviewStatus) {
        match status {
            ReviewStatus::Pending => self.pending += 1,
            ReviewStatus::Approved => self.approved += 1,
            ReviewStatus::Rejected => self.rejected += 1,
        }
    }
}

/// A user's overview: where their claims stand and what has been paid out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dashboard {
    pub redemptions: StatusCounts,
    pub submissions: StatusCounts,
    pub approved_earnings: Amount,
    pub active_tasks: u64,
}

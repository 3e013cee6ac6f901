//! JSON request/response bodies shared by the daemon and the CLI.
//!
//! Field names are camelCase on the wire; snake_case is accepted as well.

use serde::{Deserialize, Serialize};

use crate::model::{Account, RedeemRequest, Role, SalaryCode, TaskStatus};
use crate::validation::FieldError;

/// Admin: create a salary code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCodeRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    /// Description of the work being paid for.
    #[serde(default)]
    pub task: String,
    /// Decimal string, e.g. `"150.00"`.
    #[serde(default)]
    pub price: String,
    #[serde(default, alias = "expires_at", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Created code.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCodeResponse {
    pub success: bool,
    /// The 9-character code to hand to the payee.
    pub code: String,
    #[serde(alias = "salary_code")]
    pub salary_code: SalaryCode,
}

/// User: redeem a salary code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeRequest {
    #[serde(default, alias = "salary_code", alias = "code")]
    pub salary_code: String,
    #[serde(default, alias = "upi_id")]
    pub upi_id: String,
    #[serde(default, alias = "user_name")]
    pub user_name: String,
    #[serde(default, alias = "user_phone")]
    pub user_phone: String,
}

/// Filed redemption request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemCodeResponse {
    pub success: bool,
    #[serde(alias = "redeemRequest", alias = "redeem_request")]
    pub redemption: RedeemRequest,
}

/// Admin: create a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "task_type")]
    pub task_type: String,
    /// Ignored for free tasks.
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default, alias = "is_free")]
    pub is_free: bool,
    #[serde(default, alias = "mb_limit")]
    pub mb_limit: Option<u32>,
    #[serde(default)]
    pub requirements: Option<serde_json::Value>,
}

/// Admin: overwrite a task's status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTaskStatusRequest {
    pub status: TaskStatus,
}

/// User: hand in proof for a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub proof: String,
    #[serde(default, alias = "additional_notes")]
    pub additional_notes: Option<String>,
    /// Reference previously returned by the upload endpoint.
    #[serde(default, alias = "image_ref", alias = "imageUrl", alias = "image_url")]
    pub image_ref: Option<String>,
}

/// Admin: optional note attached to a review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[serde(default, alias = "admin_notes")]
    pub admin_notes: Option<String>,
}

/// Stored upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    #[serde(alias = "image_ref")]
    pub image_ref: String,
}

/// Admin: issue an account and a session for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::User
}

/// Issued account plus its bearer token. The token is only shown once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub account: Account,
    pub token: String,
}

/// Body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_accepts_both_casings() {
        let camel: RedeemCodeRequest = serde_json::from_str(
            r#"{"salaryCode":"ABC123XYZ","upiId":"a@upi","userName":"Ravi","userPhone":"9123456780"}"#,
        )
        .unwrap();
        let snake: RedeemCodeRequest = serde_json::from_str(
            r#"{"salary_code":"ABC123XYZ","upi_id":"a@upi","user_name":"Ravi","user_phone":"9123456780"}"#,
        )
        .unwrap();
        assert_eq!(camel.salary_code, snake.salary_code);
        assert_eq!(camel.upi_id, snake.upi_id);
        assert_eq!(camel.user_phone, snake.user_phone);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let req: CreateCodeRequest = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_empty());
        assert!(req.expires_at.is_none());
    }

    #[test]
    fn account_role_defaults_to_user() {
        let req: CreateAccountRequest = serde_json::from_str(r#"{"email":"x@y.z"}"#).unwrap();
        assert_eq!(req.role, Role::User);
    }

    #[test]
    fn error_body_omits_empty_details() {
        let body = ErrorBody {
            error: "nope".into(),
            details: None,
        };
        assert_eq!(serde_json::to_string(&body).unwrap(), r#"{"error":"nope"}"#);
    }
}

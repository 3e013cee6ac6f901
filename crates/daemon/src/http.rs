//! HTTP surface. Every handler authenticates through the [`AccessGuard`]
//! via the [`AuthUser`] / [`AuthAdmin`] extractors before touching a body.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, JsonRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Path, State,
    },
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use taskpay_core::api::{
    CreateAccountRequest, CreateAccountResponse, CreateCodeRequest, CreateCodeResponse,
    CreateTaskRequest, ErrorBody, RedeemCodeRequest, RedeemCodeResponse, ReviewRequest,
    SetTaskStatusRequest, SubmitTaskRequest, UploadResponse,
};
use taskpay_core::model::{
    Account, Dashboard, RedeemRequest, RedeemRequestView, SalaryCode, SubmissionView, Task,
    TaskSubmission,
};
use taskpay_core::validation::ValidationErrors;
use taskpay_core::{
    dashboard, AccessGuard, Admin, BlobStore, Caller, RedemptionWorkflow, Store, TaskWorkflow,
    WorkflowError,
};

use crate::config::DaemonConfig;
use crate::db::Db;
use crate::uploads::FsBlobStore;

#[derive(Clone)]
pub struct AppState {
    pub guard: AccessGuard,
    pub redemption: RedemptionWorkflow,
    pub tasks: TaskWorkflow,
    pub db: Db,
    pub uploads: FsBlobStore,
    pub config: Arc<DaemonConfig>,
}

impl AppState {
    pub fn new(db: Db, uploads: FsBlobStore, config: DaemonConfig) -> Self {
        let store: Arc<dyn Store> = Arc::new(db.clone());
        let blobs: Arc<dyn BlobStore> = Arc::new(uploads.clone());
        Self {
            guard: AccessGuard::new(Arc::new(db.clone())),
            redemption: RedemptionWorkflow::new(store.clone(), config.rejection_policy),
            tasks: TaskWorkflow::new(store, blobs).with_upload_limit(config.max_upload_bytes),
            db,
            uploads,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/admin/generate-code", post(generate_code))
        .route("/v1/admin/codes", get(list_codes))
        .route("/v1/admin/redeem-requests", get(list_redeem_requests))
        .route("/v1/admin/redeem-requests/{id}/approve", post(approve_redeem_request))
        .route("/v1/admin/redeem-requests/{id}/reject", post(reject_redeem_request))
        .route("/v1/admin/tasks", post(create_task).get(list_all_tasks))
        .route("/v1/admin/tasks/{id}/status", put(set_task_status))
        .route("/v1/admin/submissions", get(list_all_submissions))
        .route("/v1/admin/submissions/{id}/approve", post(approve_submission))
        .route("/v1/admin/submissions/{id}/reject", post(reject_submission))
        .route("/v1/admin/accounts", post(create_account).get(list_accounts))
        .route("/v1/admin/accounts/{id}", delete(delete_account))
        .route("/v1/redeem", post(redeem_code))
        .route("/v1/user/redeem-code", post(redeem_code))
        .route("/v1/tasks", get(list_active_tasks))
        .route("/v1/tasks/{id}", get(get_task))
        .route("/v1/tasks/{id}/submissions", post(submit_task))
        .route(
            "/v1/uploads",
            post(upload_image).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/v1/uploads/{owner}/{file}", get(download_upload))
        .route("/v1/me", get(whoami))
        .route("/v1/me/redeem-requests", get(my_redeem_requests))
        .route("/v1/me/submissions", get(my_submissions))
        .route("/v1/me/dashboard", get(my_dashboard))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errs: ValidationErrors) -> Self {
        Self::Workflow(WorkflowError::Validation(errs))
    }
}

const INTERNAL: &str = "internal server error";

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Internal(e) => {
                error!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string(), None)
            }
            ApiError::Workflow(e) => match e {
                WorkflowError::Validation(errs) => (
                    StatusCode::BAD_REQUEST,
                    "validation failed".to_string(),
                    Some(errs.fields),
                ),
                WorkflowError::InvalidCode
                | WorkflowError::AlreadyRedeemed
                | WorkflowError::TaskNotActive(_) => (StatusCode::BAD_REQUEST, e.to_string(), None),
                WorkflowError::Unauthenticated => (StatusCode::UNAUTHORIZED, e.to_string(), None),
                WorkflowError::Forbidden => (StatusCode::FORBIDDEN, e.to_string(), None),
                WorkflowError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string(), None),
                WorkflowError::InvalidTransition { .. } => (StatusCode::CONFLICT, e.to_string(), None),
                WorkflowError::Upload(_) | WorkflowError::Persistence(_) | WorkflowError::CodeGen(_) => {
                    let cause = std::error::Error::source(&e)
                        .map(|s| format!("{s:#}"))
                        .unwrap_or_default();
                    error!(error = %e, cause = %cause, "request failed");
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL.to_string(), None)
                }
            },
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON body whose rejections render as [`ErrorBody`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

/// Any signed-in account.
pub struct AuthUser(pub Caller);

/// A signed-in admin.
pub struct AuthAdmin(pub Admin);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let caller = state
            .guard
            .require_authenticated(bearer(&parts.headers))
            .await?;
        Ok(Self(caller))
    }
}

impl FromRequestParts<AppState> for AuthAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let admin = state.guard.require_admin(bearer(&parts.headers)).await?;
        Ok(Self(admin))
    }
}

/// An empty body reads as `T::default()`.
fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn generate_code(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    ApiJson(req): ApiJson<CreateCodeRequest>,
) -> ApiResult<(StatusCode, Json<CreateCodeResponse>)> {
    let salary_code = state.redemption.create_code(&admin, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateCodeResponse {
            success: true,
            code: salary_code.code.clone(),
            salary_code,
        }),
    ))
}

async fn list_codes(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
) -> ApiResult<Json<Vec<SalaryCode>>> {
    Ok(Json(state.redemption.list_codes(&admin).await?))
}

async fn list_redeem_requests(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
) -> ApiResult<Json<Vec<RedeemRequestView>>> {
    Ok(Json(state.redemption.list_requests(&admin).await?))
}

async fn approve_redeem_request(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
) -> ApiResult<Json<RedeemRequest>> {
    Ok(Json(state.redemption.approve_request(&admin, &id).await?))
}

async fn reject_redeem_request(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
) -> ApiResult<Json<RedeemRequest>> {
    Ok(Json(state.redemption.reject_request(&admin, &id).await?))
}

async fn create_task(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    ApiJson(req): ApiJson<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.tasks.create_task(&admin, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_all_tasks(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.tasks.list_tasks(&admin).await?))
}

async fn set_task_status(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SetTaskStatusRequest>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.set_task_status(&admin, &id, req.status).await?))
}

async fn list_all_submissions(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
) -> ApiResult<Json<Vec<SubmissionView>>> {
    Ok(Json(state.tasks.list_submissions(&admin).await?))
}

async fn approve_submission(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<TaskSubmission>> {
    let req: ReviewRequest = optional_json(&body)?;
    Ok(Json(
        state
            .tasks
            .approve_submission(&admin, &id, req.admin_notes)
            .await?,
    ))
}

async fn reject_submission(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<TaskSubmission>> {
    let req: ReviewRequest = optional_json(&body)?;
    Ok(Json(
        state
            .tasks
            .reject_submission(&admin, &id, req.admin_notes)
            .await?,
    ))
}

async fn create_account(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    ApiJson(req): ApiJson<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<CreateAccountResponse>)> {
    let email = req.email.trim();
    let mut errs = ValidationErrors::new();
    if email.len() < 3 || !email.contains('@') {
        errs.push("email", "Please enter a valid email address");
    }
    errs.finish()?;

    let Some(account) = state.db.create_account(email, req.role).await? else {
        let mut errs = ValidationErrors::new();
        errs.push("email", "An account with this email already exists");
        return Err(errs.into());
    };
    let token = state.db.issue_session(&account.id).await?;
    info!(account_id = %account.id, role = account.role.as_str(), admin_id = %admin.id(), "account issued");
    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse { account, token }),
    ))
}

async fn list_accounts(
    State(state): State<AppState>,
    AuthAdmin(_admin): AuthAdmin,
) -> ApiResult<Json<Vec<Account>>> {
    Ok(Json(state.db.list_accounts().await?))
}

async fn delete_account(
    State(state): State<AppState>,
    AuthAdmin(admin): AuthAdmin,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if id == admin.id() {
        let mut errs = ValidationErrors::new();
        errs.push("id", "You cannot delete your own account");
        return Err(errs.into());
    }
    if !state.db.delete_account(&id).await? {
        return Err(WorkflowError::NotFound { entity: "account", id }.into());
    }
    info!(account_id = %id, admin_id = %admin.id(), "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn redeem_code(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    ApiJson(req): ApiJson<RedeemCodeRequest>,
) -> ApiResult<(StatusCode, Json<RedeemCodeResponse>)> {
    let redemption = state.redemption.redeem_code(&caller, req).await?;
    Ok((
        StatusCode::CREATED,
        Json(RedeemCodeResponse {
            success: true,
            redemption,
        }),
    ))
}

async fn list_active_tasks(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.tasks.list_active_tasks(&caller).await?))
}

async fn get_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get_task(&caller, &id).await?))
}

async fn submit_task(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SubmitTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskSubmission>)> {
    let submission = state.tasks.submit_task(&caller, &id, req).await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

async fn upload_image(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let bytes = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            let mut errs = ValidationErrors::new();
            errs.push(
                "file",
                format!("File must be at most {} bytes", state.config.max_upload_bytes),
            );
            ApiError::from(errs)
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let image_ref = state
        .tasks
        .upload_proof_image(&caller, content_type, bytes.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { image_ref })))
}

/// Serves a stored proof image to its owner or to an admin.
async fn download_upload(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path((owner, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    if owner != caller.id() && !caller.is_admin() {
        return Err(WorkflowError::Forbidden.into());
    }
    let reference = format!("upload://{owner}/{file}");
    let Some((content_type, bytes)) = state.uploads.read(&reference).await? else {
        return Err(WorkflowError::NotFound {
            entity: "upload",
            id: reference,
        }
        .into());
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn whoami(AuthUser(caller): AuthUser) -> Json<Account> {
    Json(caller.account().clone())
}

async fn my_redeem_requests(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<Vec<RedeemRequestView>>> {
    Ok(Json(state.redemption.my_requests(&caller).await?))
}

async fn my_submissions(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<Vec<SubmissionView>>> {
    Ok(Json(state.tasks.my_submissions(&caller).await?))
}

async fn my_dashboard(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
) -> ApiResult<Json<Dashboard>> {
    Ok(Json(dashboard(&state.db, &caller).await?))
}

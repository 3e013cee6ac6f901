use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{header, Method, RequestBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use taskpay_core::api::{
    CreateAccountRequest, CreateCodeRequest, CreateTaskRequest, ErrorBody, RedeemCodeRequest,
    ReviewRequest, SetTaskStatusRequest, SubmitTaskRequest, UploadResponse,
};
use taskpay_core::model::{Role, TaskStatus};

#[derive(Parser, Debug)]
#[command(name = "taskpayctl", version, about = "Command-line client for taskpay-daemon")]
struct Args {
    /// Base URL of the daemon.
    #[arg(long, env = "TASKPAY_DAEMON", default_value = "http://127.0.0.1:8787", global = true)]
    daemon: String,

    /// Bearer token of the account to act as.
    #[arg(long, env = "TASKPAY_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Salary codes (admin).
    Codes {
        #[command(subcommand)]
        codes: CodeCmd,
    },
    /// Claim a salary code.
    Redeem {
        #[arg(long)]
        code: String,
        #[arg(long)]
        upi_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
    },
    /// Redemption requests.
    Requests {
        #[command(subcommand)]
        requests: ReviewCmd,
    },
    Tasks {
        #[command(subcommand)]
        tasks: TaskCmd,
    },
    /// Task submissions.
    Submissions {
        #[command(subcommand)]
        submissions: ReviewCmd,
    },
    /// Accounts and their tokens (admin).
    Accounts {
        #[command(subcommand)]
        accounts: AccountCmd,
    },
    /// Show the calling account.
    Me,
    /// Show the calling account's dashboard.
    Dashboard,
}

#[derive(Subcommand, Debug)]
enum CodeCmd {
    Generate {
        #[arg(long)]
        name: String,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        task: String,
        /// Decimal amount, e.g. 150.00
        #[arg(long)]
        price: String,
        /// Expiry as epoch milliseconds.
        #[arg(long)]
        expires_at: Option<i64>,
    },
    List,
}

#[derive(Subcommand, Debug)]
enum ReviewCmd {
    /// Everything, newest first (admin).
    List,
    /// Only the caller's own.
    Mine,
    Approve {
        id: String,
        /// Only recorded on submissions.
        #[arg(long)]
        notes: Option<String>,
    },
    Reject {
        id: String,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TaskCmd {
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        task_type: String,
        #[arg(long)]
        price: Option<String>,
        #[arg(long)]
        free: bool,
        #[arg(long)]
        mb_limit: Option<u32>,
        /// JSON object.
        #[arg(long)]
        requirements: Option<String>,
    },
    /// Active tasks, or every task with --all (admin).
    List {
        #[arg(long)]
        all: bool,
    },
    Get {
        id: String,
    },
    Status {
        id: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    /// Hand in proof, uploading an image first when --image is given.
    Submit {
        id: String,
        #[arg(long)]
        proof: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCmd {
    Create {
        #[arg(long)]
        email: String,
        #[arg(long)]
        admin: bool,
    },
    List,
    /// Remove an account and revoke its tokens.
    Delete {
        id: String,
    },
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    serde_json::from_value(Value::String(s.to_ascii_lowercase()))
        .map_err(|_| format!("unknown task status {s:?} (active | paused | completed)"))
}

fn image_content_type(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    Ok(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => bail!("{} does not look like an image", path.display()),
    })
}

struct Client {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl Client {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base.trim_end_matches('/'), path);
        let req = self.http.request(method, url);
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> anyhow::Result<Value> {
        let resp = req.send().await.context("send request")?;
        let status = resp.status();
        let bytes = resp.bytes().await.context("read response")?;
        if status.is_success() {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).context("parse response");
        }
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => {
                let mut msg = format!("{status}: {}", body.error);
                for d in body.details.unwrap_or_default() {
                    msg.push_str(&format!("\n  {}: {}", d.field, d.message));
                }
                bail!(msg)
            }
            Err(_) => bail!("{status}: {}", String::from_utf8_lossy(&bytes)),
        }
    }

    async fn get(&self, path: &str) -> anyhow::Result<Value> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> anyhow::Result<Value> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn upload(&self, path: &Path) -> anyhow::Result<String> {
        let content_type = image_content_type(path)?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let req = self
            .request(Method::POST, "/v1/uploads")
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes);
        let resp: UploadResponse = serde_json::from_value(self.send(req).await?)?;
        Ok(resp.image_ref)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = Client {
        http: reqwest::Client::new(),
        base: args.daemon,
        token: args.token,
    };

    let out = match args.cmd {
        Cmd::Codes { codes } => match codes {
            CodeCmd::Generate {
                name,
                phone,
                task,
                price,
                expires_at,
            } => {
                let req = CreateCodeRequest {
                    name,
                    phone,
                    task,
                    price,
                    expires_at,
                };
                client.post("/v1/admin/generate-code", &req).await?
            }
            CodeCmd::List => client.get("/v1/admin/codes").await?,
        },
        Cmd::Redeem {
            code,
            upi_id,
            name,
            phone,
        } => {
            let req = RedeemCodeRequest {
                salary_code: code,
                upi_id,
                user_name: name,
                user_phone: phone,
            };
            client.post("/v1/redeem", &req).await?
        }
        Cmd::Requests { requests } => match requests {
            ReviewCmd::List => client.get("/v1/admin/redeem-requests").await?,
            ReviewCmd::Mine => client.get("/v1/me/redeem-requests").await?,
            ReviewCmd::Approve { id, .. } => {
                let path = format!("/v1/admin/redeem-requests/{id}/approve");
                client.send(client.request(Method::POST, &path)).await?
            }
            ReviewCmd::Reject { id, .. } => {
                let path = format!("/v1/admin/redeem-requests/{id}/reject");
                client.send(client.request(Method::POST, &path)).await?
            }
        },
        Cmd::Tasks { tasks } => match tasks {
            TaskCmd::Create {
                title,
                description,
                task_type,
                price,
                free,
                mb_limit,
                requirements,
            } => {
                let requirements = requirements
                    .map(|r| serde_json::from_str::<Value>(&r))
                    .transpose()
                    .context("--requirements is not valid JSON")?;
                let req = CreateTaskRequest {
                    title,
                    description,
                    task_type,
                    price,
                    is_free: free,
                    mb_limit,
                    requirements,
                };
                client.post("/v1/admin/tasks", &req).await?
            }
            TaskCmd::List { all: true } => client.get("/v1/admin/tasks").await?,
            TaskCmd::List { all: false } => client.get("/v1/tasks").await?,
            TaskCmd::Get { id } => client.get(&format!("/v1/tasks/{id}")).await?,
            TaskCmd::Status { id, status } => {
                let path = format!("/v1/admin/tasks/{id}/status");
                let req = client
                    .request(Method::PUT, &path)
                    .json(&SetTaskStatusRequest { status });
                client.send(req).await?
            }
            TaskCmd::Submit {
                id,
                proof,
                notes,
                image,
            } => {
                let image_ref = match image {
                    Some(path) => Some(client.upload(&path).await?),
                    None => None,
                };
                let req = SubmitTaskRequest {
                    proof,
                    additional_notes: notes,
                    image_ref,
                };
                client.post(&format!("/v1/tasks/{id}/submissions"), &req).await?
            }
        },
        Cmd::Submissions { submissions } => match submissions {
            ReviewCmd::List => client.get("/v1/admin/submissions").await?,
            ReviewCmd::Mine => client.get("/v1/me/submissions").await?,
            ReviewCmd::Approve { id, notes } => {
                let req = ReviewRequest { admin_notes: notes };
                client
                    .post(&format!("/v1/admin/submissions/{id}/approve"), &req)
                    .await?
            }
            ReviewCmd::Reject { id, notes } => {
                let req = ReviewRequest { admin_notes: notes };
                client
                    .post(&format!("/v1/admin/submissions/{id}/reject"), &req)
                    .await?
            }
        },
        Cmd::Accounts { accounts } => match accounts {
            AccountCmd::Create { email, admin } => {
                let role = if admin { Role::Admin } else { Role::User };
                client
                    .post("/v1/admin/accounts", &CreateAccountRequest { email, role })
                    .await?
            }
            AccountCmd::List => client.get("/v1/admin/accounts").await?,
            AccountCmd::Delete { id } => {
                let path = format!("/v1/admin/accounts/{id}");
                client.send(client.request(Method::DELETE, &path)).await?;
                json!({ "deleted": id })
            }
        },
        Cmd::Me => client.get("/v1/me").await?,
        Cmd::Dashboard => client.get("/v1/me/dashboard").await?,
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_argument_parses_case_insensitively() {
        assert_eq!(parse_status("Paused"), Ok(TaskStatus::Paused));
        assert!(parse_status("archived").is_err());
    }

    #[test]
    fn image_types_follow_extension() {
        assert_eq!(image_content_type(Path::new("a/b.JPG")).unwrap(), "image/jpeg");
        assert!(image_content_type(Path::new("notes.txt")).is_err());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let args = Args::try_parse_from([
            "taskpayctl",
            "tasks",
            "status",
            "t1",
            "completed",
            "--token",
            "abc",
        ])
        .unwrap();
        assert_eq!(args.token.as_deref(), Some("abc"));
        assert!(matches!(
            args.cmd,
            Cmd::Tasks {
                tasks: TaskCmd::Status {
                    status: TaskStatus::Completed,
                    ..
                }
            }
        ));
    }
}

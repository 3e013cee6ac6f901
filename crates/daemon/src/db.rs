//! SQLite persistence: the [`Store`] the workflows run on, plus accounts and
//! bearer sessions.
//!
//! One connection behind a mutex; every call runs on the blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use taskpay_core::model::{
    Account, CodeStatus, EpochMs, RedeemRequest, ReviewStatus, Role, SalaryCode, Task, TaskStatus,
    TaskSubmission,
};
use taskpay_core::{new_id, now_ms, Amount, SessionResolver, Store};

const CODE_COLS: &str =
    "id, code, name, phone, task, price_minor, status, created_at, expires_at, created_by";
const REQUEST_COLS: &str = "id, salary_code_id, user_id, user_name, user_phone, upi_id, status, \
     created_at, approved_at, rejected_at";
const TASK_COLS: &str = "id, title, description, task_type, price_minor, is_free, mb_limit, \
     requirements_json, status, created_at, created_by";
const SUBMISSION_COLS: &str =
    "id, task_id, user_id, proof_json, status, admin_notes, created_at, approved_at, rejected_at";
const ACCOUNT_COLS: &str = "id, email, role, email_verified, created_at, updated_at";

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Opens (creating if needed) the database file and applies the schema.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("open sqlite db {}", db_path.display()))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(include_str!("../migrations/0001_init.sql"))
            .context("apply schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
            f(&mut guard)
        })
        .await
        .context("sqlite worker panicked")?
    }

    /// New account, or `None` if the email is taken.
    pub async fn create_account(&self, email: &str, role: Role) -> Result<Option<Account>> {
        let email = email.trim().to_ascii_lowercase();
        self.with_conn(move |c| {
            let taken: Option<String> = c
                .query_row("SELECT id FROM accounts WHERE email=?1", params![email], |r| r.get(0))
                .optional()?;
            if taken.is_some() {
                return Ok(None);
            }
            let now = now_ms();
            let account = Account {
                id: new_id(),
                email,
                role,
                email_verified: false,
                created_at: now,
                updated_at: now,
            };
            c.execute(
                "INSERT INTO accounts(id, email, role, email_verified, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    account.id,
                    account.email,
                    account.role.as_str(),
                    account.email_verified,
                    account.created_at,
                    account.updated_at
                ],
            )?;
            Ok(Some(account))
        })
        .await
    }

    /// Mints a bearer token for `account_id`. Only its digest is kept.
    pub async fn issue_session(&self, account_id: &str) -> Result<String> {
        let token = uuid::Uuid::new_v4().to_string();
        let digest = token_digest(&token);
        let account_id = account_id.to_string();
        self.with_conn(move |c| {
            c.execute(
                "INSERT INTO sessions(token_sha256, account_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, NULL)",
                params![digest, account_id, now_ms()],
            )?;
            Ok(())
        })
        .await?;
        Ok(token)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {ACCOUNT_COLS} FROM accounts ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map([], account_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Removes the account and every session it holds. Claims it filed are kept.
    ///
    /// Returns `false` when no such account exists.
    pub async fn delete_account(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |c| {
            let tx = c.transaction()?;
            tx.execute("DELETE FROM sessions WHERE account_id=?1", params![id])?;
            let n = tx.execute("DELETE FROM accounts WHERE id=?1", params![id])?;
            tx.commit()?;
            Ok(n == 1)
        })
        .await
    }

    /// Makes sure an admin account with `email` exists and that `token` is one
    /// of its sessions.
    pub async fn ensure_admin(&self, email: &str, token: &str) -> Result<Account> {
        let email = email.trim().to_ascii_lowercase();
        let digest = token_digest(token);
        self.with_conn(move |c| {
            let tx = c.transaction()?;
            let now = now_ms();
            tx.execute(
                "INSERT INTO accounts(id, email, role, email_verified, created_at, updated_at)
                 VALUES (?1, ?2, 'admin', 1, ?3, ?3)
                 ON CONFLICT(email) DO UPDATE SET role='admin', updated_at=excluded.updated_at",
                params![new_id(), email, now],
            )?;
            let account = tx.query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE email=?1"),
                params![email],
                account_row,
            )?;
            tx.execute(
                "INSERT INTO sessions(token_sha256, account_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, NULL)
                 ON CONFLICT(token_sha256) DO UPDATE SET account_id=excluded.account_id, expires_at=NULL",
                params![digest, account.id, now],
            )?;
            tx.commit()?;
            Ok(account)
        })
        .await
    }
}

fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn conversion_err(idx: usize, ty: Type, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

/// Enum columns hold the serde wire name.
fn enum_col<T: DeserializeOwned>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = r.get(idx)?;
    serde_json::from_value(serde_json::Value::String(s)).map_err(|e| conversion_err(idx, Type::Text, e))
}

fn json_col<T: DeserializeOwned>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let s: String = r.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion_err(idx, Type::Text, e))
}

fn amount_col(r: &Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let v: i64 = r.get(idx)?;
    u64::try_from(v)
        .map(Amount::from_minor)
        .map_err(|e| conversion_err(idx, Type::Integer, e))
}

fn minor(a: Amount) -> Result<i64> {
    i64::try_from(a.minor()).context("amount out of range for storage")
}

fn account_row(r: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: r.get(0)?,
        email: r.get(1)?,
        role: enum_col(r, 2)?,
        email_verified: r.get(3)?,
        created_at: r.get(4)?,
        updated_at: r.get(5)?,
    })
}

fn code_row(r: &Row<'_>) -> rusqlite::Result<SalaryCode> {
    Ok(SalaryCode {
        id: r.get(0)?,
        code: r.get(1)?,
        name: r.get(2)?,
        phone: r.get(3)?,
        task: r.get(4)?,
        price: amount_col(r, 5)?,
        status: enum_col(r, 6)?,
        created_at: r.get(7)?,
        expires_at: r.get(8)?,
        created_by: r.get(9)?,
    })
}

fn request_row(r: &Row<'_>) -> rusqlite::Result<RedeemRequest> {
    Ok(RedeemRequest {
        id: r.get(0)?,
        salary_code_id: r.get(1)?,
        user_id: r.get(2)?,
        user_name: r.get(3)?,
        user_phone: r.get(4)?,
        upi_id: r.get(5)?,
        status: enum_col(r, 6)?,
        created_at: r.get(7)?,
        approved_at: r.get(8)?,
        rejected_at: r.get(9)?,
    })
}

fn task_row(r: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: r.get(0)?,
        title: r.get(1)?,
        description: r.get(2)?,
        task_type: enum_col(r, 3)?,
        price: amount_col(r, 4)?,
        is_free: r.get(5)?,
        mb_limit: r.get(6)?,
        requirements: json_col(r, 7)?,
        status: enum_col(r, 8)?,
        created_at: r.get(9)?,
        created_by: r.get(10)?,
    })
}

fn submission_row(r: &Row<'_>) -> rusqlite::Result<TaskSubmission> {
    Ok(TaskSubmission {
        id: r.get(0)?,
        task_id: r.get(1)?,
        user_id: r.get(2)?,
        submission_proof: json_col(r, 3)?,
        status: enum_col(r, 4)?,
        admin_notes: r.get(5)?,
        created_at: r.get(6)?,
        approved_at: r.get(7)?,
        rejected_at: r.get(8)?,
    })
}

fn insert_request(c: &Connection, req: &RedeemRequest) -> Result<()> {
    c.execute(
        &format!("INSERT INTO redeem_requests({REQUEST_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            req.id,
            req.salary_code_id,
            req.user_id,
            req.user_name,
            req.user_phone,
            req.upi_id,
            req.status.as_str(),
            req.created_at,
            req.approved_at,
            req.rejected_at
        ],
    )
    .context("insert redeem request")?;
    Ok(())
}

/// Moves a pending row of `table` to `to` and returns whether anything changed.
fn review_row(c: &Connection, table: &str, id: &str, to: ReviewStatus, at: EpochMs) -> Result<bool> {
    let n = c.execute(
        &format!(
            "UPDATE {table}
             SET status=?2,
                 approved_at=CASE WHEN ?2='approved' THEN ?3 ELSE approved_at END,
                 rejected_at=CASE WHEN ?2='rejected' THEN ?3 ELSE rejected_at END
             WHERE id=?1 AND status='pending'"
        ),
        params![id, to.as_str(), at],
    )?;
    Ok(n == 1)
}

#[async_trait]
impl Store for Db {
    async fn insert_code(&self, code: &SalaryCode) -> Result<()> {
        let code = code.clone();
        self.with_conn(move |c| {
            c.execute(
                &format!("INSERT INTO salary_codes({CODE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    code.id,
                    code.code,
                    code.name,
                    code.phone,
                    code.task,
                    minor(code.price)?,
                    code.status.as_str(),
                    code.created_at,
                    code.expires_at,
                    code.created_by
                ],
            )
            .context("insert salary code")?;
            Ok(())
        })
        .await
    }

    async fn get_code(&self, id: &str) -> Result<Option<SalaryCode>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            Ok(c.query_row(
                &format!("SELECT {CODE_COLS} FROM salary_codes WHERE id=?1"),
                params![id],
                code_row,
            )
            .optional()?)
        })
        .await
    }

    async fn find_code(&self, code: &str) -> Result<Option<SalaryCode>> {
        let code = code.to_string();
        self.with_conn(move |c| {
            Ok(c.query_row(
                &format!("SELECT {CODE_COLS} FROM salary_codes WHERE code=?1"),
                params![code],
                code_row,
            )
            .optional()?)
        })
        .await
    }

    async fn list_codes(&self) -> Result<Vec<SalaryCode>> {
        self.with_conn(|c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {CODE_COLS} FROM salary_codes ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map([], code_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn swap_code_status(
        &self,
        id: &str,
        from: CodeStatus,
        to: CodeStatus,
    ) -> Result<Option<SalaryCode>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            let n = c.execute(
                "UPDATE salary_codes SET status=?3 WHERE id=?1 AND status=?2",
                params![id, from.as_str(), to.as_str()],
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(c.query_row(
                &format!("SELECT {CODE_COLS} FROM salary_codes WHERE id=?1"),
                params![id],
                code_row,
            )
            .optional()?)
        })
        .await
    }

    async fn insert_redeem_request(&self, req: &RedeemRequest) -> Result<()> {
        let req = req.clone();
        self.with_conn(move |c| insert_request(c, &req)).await
    }

    async fn get_redeem_request(&self, id: &str) -> Result<Option<RedeemRequest>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            Ok(c.query_row(
                &format!("SELECT {REQUEST_COLS} FROM redeem_requests WHERE id=?1"),
                params![id],
                request_row,
            )
            .optional()?)
        })
        .await
    }

    async fn open_requests_for_code(&self, code_id: &str) -> Result<Vec<RedeemRequest>> {
        let code_id = code_id.to_string();
        self.with_conn(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {REQUEST_COLS} FROM redeem_requests
                 WHERE salary_code_id=?1 AND status != 'rejected'
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![code_id], request_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_redeem_requests(&self, user_id: Option<&str>) -> Result<Vec<RedeemRequest>> {
        let user_id = user_id.map(str::to_string);
        self.with_conn(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {REQUEST_COLS} FROM redeem_requests
                 WHERE ?1 IS NULL OR user_id=?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![user_id], request_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn review_redeem_request(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
    ) -> Result<Option<RedeemRequest>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            if !review_row(c, "redeem_requests", &id, to, at)? {
                return Ok(None);
            }
            Ok(c.query_row(
                &format!("SELECT {REQUEST_COLS} FROM redeem_requests WHERE id=?1"),
                params![id],
                request_row,
            )
            .optional()?)
        })
        .await
    }

    /// Conditional flip and insert in one transaction.
    async fn file_redemption(&self, req: &RedeemRequest) -> Result<bool> {
        let req = req.clone();
        self.with_conn(move |c| {
            let tx = c.transaction()?;
            let claimed = tx.execute(
                "UPDATE salary_codes SET status='redeemed' WHERE id=?1 AND status='active'",
                params![req.salary_code_id],
            )?;
            if claimed == 0 {
                return Ok(false);
            }
            insert_request(&tx, &req)?;
            tx.commit()?;
            Ok(true)
        })
        .await
    }

    async fn reopen_redeem_request(&self, id: &str) -> Result<Option<RedeemRequest>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            let n = c.execute(
                "UPDATE redeem_requests SET status='pending', rejected_at=NULL
                 WHERE id=?1 AND status='rejected'",
                params![id],
            )?;
            if n == 0 {
                return Ok(None);
            }
            Ok(c.query_row(
                &format!("SELECT {REQUEST_COLS} FROM redeem_requests WHERE id=?1"),
                params![id],
                request_row,
            )
            .optional()?)
        })
        .await
    }

    /// Rejection and code release in one transaction.
    async fn reject_redemption(
        &self,
        id: &str,
        at: EpochMs,
        release: bool,
    ) -> Result<Option<RedeemRequest>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            let tx = c.transaction()?;
            if !review_row(&tx, "redeem_requests", &id, ReviewStatus::Rejected, at)? {
                return Ok(None);
            }
            let request = tx.query_row(
                &format!("SELECT {REQUEST_COLS} FROM redeem_requests WHERE id=?1"),
                params![id],
                request_row,
            )?;
            if release {
                tx.execute(
                    "UPDATE salary_codes SET status='active' WHERE id=?1 AND status='redeemed'",
                    params![request.salary_code_id],
                )
                .context("release salary code")?;
            }
            tx.commit()?;
            Ok(Some(request))
        })
        .await
    }

    async fn insert_task(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        self.with_conn(move |c| {
            c.execute(
                &format!("INSERT INTO tasks({TASK_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
                params![
                    task.id,
                    task.title,
                    task.description,
                    task.task_type.as_str(),
                    minor(task.price)?,
                    task.is_free,
                    task.mb_limit,
                    serde_json::to_string(&task.requirements)?,
                    task.status.as_str(),
                    task.created_at,
                    task.created_by
                ],
            )
            .context("insert task")?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            Ok(c.query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id=?1"),
                params![id],
                task_row,
            )
            .optional()?)
        })
        .await
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.with_conn(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {TASK_COLS} FROM tasks
                 WHERE ?1 IS NULL OR status=?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![status.map(TaskStatus::as_str)], task_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn set_task_status(&self, id: &str, status: TaskStatus) -> Result<Option<Task>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            c.execute(
                "UPDATE tasks SET status=?2 WHERE id=?1",
                params![id, status.as_str()],
            )?;
            Ok(c.query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id=?1"),
                params![id],
                task_row,
            )
            .optional()?)
        })
        .await
    }

    async fn insert_submission(&self, sub: &TaskSubmission) -> Result<()> {
        let sub = sub.clone();
        self.with_conn(move |c| {
            c.execute(
                &format!("INSERT INTO task_submissions({SUBMISSION_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
                params![
                    sub.id,
                    sub.task_id,
                    sub.user_id,
                    serde_json::to_string(&sub.submission_proof)?,
                    sub.status.as_str(),
                    sub.admin_notes,
                    sub.created_at,
                    sub.approved_at,
                    sub.rejected_at
                ],
            )
            .context("insert task submission")?;
            Ok(())
        })
        .await
    }

    async fn get_submission(&self, id: &str) -> Result<Option<TaskSubmission>> {
        let id = id.to_string();
        self.with_conn(move |c| {
            Ok(c.query_row(
                &format!("SELECT {SUBMISSION_COLS} FROM task_submissions WHERE id=?1"),
                params![id],
                submission_row,
            )
            .optional()?)
        })
        .await
    }

    async fn list_submissions(&self, user_id: Option<&str>) -> Result<Vec<TaskSubmission>> {
        let user_id = user_id.map(str::to_string);
        self.with_conn(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {SUBMISSION_COLS} FROM task_submissions
                 WHERE ?1 IS NULL OR user_id=?1
                 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(params![user_id], submission_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn review_submission(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
        admin_notes: Option<&str>,
    ) -> Result<Option<TaskSubmission>> {
        let id = id.to_string();
        let notes = admin_notes.map(str::to_string);
        self.with_conn(move |c| {
            let tx = c.transaction()?;
            if !review_row(&tx, "task_submissions", &id, to, at)? {
                return Ok(None);
            }
            if let Some(notes) = notes {
                tx.execute(
                    "UPDATE task_submissions SET admin_notes=?2 WHERE id=?1",
                    params![id, notes],
                )?;
            }
            let sub = tx
                .query_row(
                    &format!("SELECT {SUBMISSION_COLS} FROM task_submissions WHERE id=?1"),
                    params![id],
                    submission_row,
                )
                .optional()?;
            tx.commit()?;
            Ok(sub)
        })
        .await
    }
}

#[async_trait]
impl SessionResolver for Db {
    async fn resolve(&self, token: &str) -> Result<Option<Account>> {
        let digest = token_digest(token);
        self.with_conn(move |c| {
            Ok(c.query_row(
                "SELECT a.id, a.email, a.role, a.email_verified, a.created_at, a.updated_at
                 FROM sessions s JOIN accounts a ON a.id = s.account_id
                 WHERE s.token_sha256=?1 AND (s.expires_at IS NULL OR s.expires_at > ?2)",
                params![digest, now_ms()],
                account_row,
            )
            .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskpay_core::model::{SubmissionProof, TaskType};

    fn open() -> (tempfile::TempDir, Db) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(&dir.path().join("taskpay.db")).unwrap();
        (dir, db)
    }

    fn code(id: &str, value: &str) -> SalaryCode {
        SalaryCode {
            id: id.into(),
            code: value.into(),
            name: "Asha".into(),
            phone: "9876543210".into(),
            task: "Share post".into(),
            price: Amount::from_minor(15_000),
            status: CodeStatus::Active,
            created_at: now_ms(),
            expires_at: None,
            created_by: Some("a1".into()),
        }
    }

    fn request(id: &str, code_id: &str) -> RedeemRequest {
        RedeemRequest {
            id: id.into(),
            salary_code_id: code_id.into(),
            user_id: "u1".into(),
            user_name: "Ravi".into(),
            user_phone: "9123456780".into(),
            upi_id: "ravi@upi".into(),
            status: ReviewStatus::Pending,
            created_at: now_ms(),
            approved_at: None,
            rejected_at: None,
        }
    }

    #[tokio::test]
    async fn code_round_trips_through_sqlite() {
        let (_dir, db) = open();
        let c = code("c1", "ABCDE1234");
        db.insert_code(&c).await.unwrap();
        assert_eq!(db.find_code("ABCDE1234").await.unwrap(), Some(c.clone()));
        assert_eq!(db.get_code("c1").await.unwrap(), Some(c));
        assert!(db.insert_code(&code("c2", "ABCDE1234")).await.is_err());
    }

    #[tokio::test]
    async fn file_redemption_is_all_or_nothing() {
        let (_dir, db) = open();
        db.insert_code(&code("c1", "ABCDE1234")).await.unwrap();

        assert!(db.file_redemption(&request("r1", "c1")).await.unwrap());
        assert!(!db.file_redemption(&request("r2", "c1")).await.unwrap());
        assert!(db.get_redeem_request("r2").await.unwrap().is_none());
        assert_eq!(
            db.get_code("c1").await.unwrap().unwrap().status,
            CodeStatus::Redeemed
        );

        // Duplicate id makes the insert fail; the flip must be rolled back.
        db.insert_code(&code("c2", "ZZZZZ9999")).await.unwrap();
        assert!(db.file_redemption(&request("r1", "c2")).await.is_err());
        assert_eq!(
            db.get_code("c2").await.unwrap().unwrap().status,
            CodeStatus::Active
        );
    }

    #[tokio::test]
    async fn one_open_request_per_code() {
        let (_dir, db) = open();
        db.insert_code(&code("c1", "ABCDE1234")).await.unwrap();
        db.insert_redeem_request(&request("r1", "c1")).await.unwrap();
        assert!(db.insert_redeem_request(&request("r2", "c1")).await.is_err());

        db.review_redeem_request("r1", ReviewStatus::Rejected, 5).await.unwrap();
        db.insert_redeem_request(&request("r3", "c1")).await.unwrap();
        assert_eq!(db.open_requests_for_code("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn review_is_conditional_on_pending() {
        let (_dir, db) = open();
        db.insert_code(&code("c1", "ABCDE1234")).await.unwrap();
        db.insert_redeem_request(&request("r1", "c1")).await.unwrap();

        let r = db
            .review_redeem_request("r1", ReviewStatus::Approved, 42)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.approved_at, Some(42));
        assert!(db
            .review_redeem_request("r1", ReviewStatus::Rejected, 43)
            .await
            .unwrap()
            .is_none());
        let stored = db.get_redeem_request("r1").await.unwrap().unwrap();
        assert_eq!(stored.status, ReviewStatus::Approved);
        assert_eq!(stored.rejected_at, None);
    }

    #[tokio::test]
    async fn tasks_and_submissions_round_trip() {
        let (_dir, db) = open();
        let task = Task {
            id: "t1".into(),
            title: "Post a story".into(),
            description: "Share our launch post".into(),
            task_type: TaskType::SocialPost,
            price: Amount::from_minor(2_550),
            is_free: false,
            mb_limit: Some(20),
            requirements: serde_json::json!({"hashtags": ["#launch"]}),
            status: TaskStatus::Active,
            created_at: now_ms(),
            created_by: None,
        };
        db.insert_task(&task).await.unwrap();
        assert_eq!(db.get_task("t1").await.unwrap(), Some(task.clone()));

        let paused = db.set_task_status("t1", TaskStatus::Paused).await.unwrap().unwrap();
        assert_eq!(paused.status, TaskStatus::Paused);
        assert!(db.list_tasks(Some(TaskStatus::Active)).await.unwrap().is_empty());
        assert!(db.set_task_status("nope", TaskStatus::Paused).await.unwrap().is_none());

        let sub = TaskSubmission {
            id: "s1".into(),
            task_id: "t1".into(),
            user_id: "u1".into(),
            submission_proof: SubmissionProof {
                proof: " link ".into(),
                additional_notes: None,
                image_url: Some("upload://u1/x.png".into()),
                submitted_at: 7,
            },
            status: ReviewStatus::Pending,
            admin_notes: None,
            created_at: 7,
            approved_at: None,
            rejected_at: None,
        };
        db.insert_submission(&sub).await.unwrap();
        let reviewed = db
            .review_submission("s1", ReviewStatus::Rejected, 9, Some("no link"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reviewed.admin_notes.as_deref(), Some("no link"));
        assert_eq!(reviewed.submission_proof, sub.submission_proof);
        assert_eq!(db.list_submissions(Some("u2")).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn sessions_resolve_by_token() {
        let (_dir, db) = open();
        let account = db.create_account("Ravi@Example.com", Role::User).await.unwrap().unwrap();
        assert_eq!(account.email, "ravi@example.com");
        assert!(db.create_account("ravi@example.com", Role::Admin).await.unwrap().is_none());

        let token = db.issue_session(&account.id).await.unwrap();
        assert_eq!(db.resolve(&token).await.unwrap(), Some(account));
        assert_eq!(db.resolve("not-a-token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_admin_is_idempotent_and_promotes() {
        let (_dir, db) = open();
        db.create_account("boss@example.com", Role::User).await.unwrap();
        let a = db.ensure_admin("boss@example.com", "secret").await.unwrap();
        let b = db.ensure_admin("boss@example.com", "secret").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.role, Role::Admin);
        assert_eq!(db.resolve("secret").await.unwrap().unwrap().id, a.id);
        assert_eq!(db.list_accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reject_redemption_releases_code_in_same_transaction() {
        let (_dir, db) = open();
        db.insert_code(&code("c1", "ABCDE1234")).await.unwrap();
        assert!(db.file_redemption(&request("r1", "c1")).await.unwrap());

        let r = db.reject_redemption("r1", 11, true).await.unwrap().unwrap();
        assert_eq!(r.status, ReviewStatus::Rejected);
        assert_eq!(r.rejected_at, Some(11));
        assert_eq!(db.get_code("c1").await.unwrap().unwrap().status, CodeStatus::Active);
        assert!(db.reject_redemption("r1", 12, true).await.unwrap().is_none());
        assert!(db.reject_redemption("missing", 12, true).await.unwrap().is_none());

        // Without release the code stays claimed.
        assert!(db.file_redemption(&request("r2", "c1")).await.unwrap());
        db.reject_redemption("r2", 13, false).await.unwrap().unwrap();
        assert_eq!(db.get_code("c1").await.unwrap().unwrap().status, CodeStatus::Redeemed);
    }

    #[tokio::test]
    async fn reopen_only_moves_rejected() {
        let (_dir, db) = open();
        db.insert_code(&code("c1", "ABCDE1234")).await.unwrap();
        db.insert_redeem_request(&request("r1", "c1")).await.unwrap();
        assert!(db.reopen_redeem_request("r1").await.unwrap().is_none());
        db.review_redeem_request("r1", ReviewStatus::Rejected, 5).await.unwrap();
        let r = db.reopen_redeem_request("r1").await.unwrap().unwrap();
        assert_eq!(r.status, ReviewStatus::Pending);
        assert_eq!(r.rejected_at, None);
    }

    #[tokio::test]
    async fn deleting_an_account_revokes_its_sessions() {
        let (_dir, db) = open();
        let account = db.create_account("ravi@example.com", Role::User).await.unwrap().unwrap();
        let first = db.issue_session(&account.id).await.unwrap();
        let second = db.issue_session(&account.id).await.unwrap();

        assert!(db.delete_account(&account.id).await.unwrap());
        assert_eq!(db.resolve(&first).await.unwrap(), None);
        assert_eq!(db.resolve(&second).await.unwrap(), None);
        assert!(db.list_accounts().await.unwrap().is_empty());
        assert!(!db.delete_account(&account.id).await.unwrap());
    }
}

//! In-memory collaborators for tests and local experiments. Not durable.

use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::guard::SessionResolver;
use crate::model::{
    Account, CodeStatus, EpochMs, RedeemRequest, ReviewStatus, SalaryCode, Task, TaskStatus,
    TaskSubmission,
};
use crate::new_id;
use crate::store::{BlobStore, Store};

/// Vec-backed tables behind one lock, so every method is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    #[cfg(test)]
    faults: Faults,
}

/// Switches for exercising compensation paths.
#[cfg(test)]
#[derive(Default)]
struct Faults {
    request_inserts: AtomicBool,
    code_releases: AtomicBool,
}

#[derive(Default)]
struct Inner {
    codes: Vec<SalaryCode>,
    requests: Vec<RedeemRequest>,
    tasks: Vec<Task>,
    submissions: Vec<TaskSubmission>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `insert_redeem_request` fail until switched off again.
    #[cfg(test)]
    pub(crate) fn fail_request_inserts(&self, fail: bool) {
        self.faults.request_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes `redeemed -> active` code swaps fail until switched off again.
    #[cfg(test)]
    pub(crate) fn fail_code_releases(&self, fail: bool) {
        self.faults.code_releases.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

/// Newest first; among equal timestamps the later insert wins.
fn newest_first<T: Clone>(rows: &[T], created_at: impl Fn(&T) -> EpochMs) -> Vec<T> {
    let mut out: Vec<T> = rows.iter().rev().cloned().collect();
    out.sort_by_key(|r| std::cmp::Reverse(created_at(r)));
    out
}

fn stamp(status: ReviewStatus, at: EpochMs) -> (Option<EpochMs>, Option<EpochMs>) {
    match status {
        ReviewStatus::Approved => (Some(at), None),
        ReviewStatus::Rejected => (None, Some(at)),
        ReviewStatus::Pending => (None, None),
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_code(&self, code: &SalaryCode) -> anyhow::Result<()> {
        let mut inner = self.lock()?;
        if inner.codes.iter().any(|c| c.code == code.code) {
            return Err(anyhow!("duplicate salary code value"));
        }
        inner.codes.push(code.clone());
        Ok(())
    }

    async fn get_code(&self, id: &str) -> anyhow::Result<Option<SalaryCode>> {
        Ok(self.lock()?.codes.iter().find(|c| c.id == id).cloned())
    }

    async fn find_code(&self, code: &str) -> anyhow::Result<Option<SalaryCode>> {
        Ok(self.lock()?.codes.iter().find(|c| c.code == code).cloned())
    }

    async fn list_codes(&self) -> anyhow::Result<Vec<SalaryCode>> {
        Ok(newest_first(&self.lock()?.codes, |c| c.created_at))
    }

    async fn swap_code_status(
        &self,
        id: &str,
        from: CodeStatus,
        to: CodeStatus,
    ) -> anyhow::Result<Option<SalaryCode>> {
        #[cfg(test)]
        if (from, to) == (CodeStatus::Redeemed, CodeStatus::Active)
            && self.faults.code_releases.load(Ordering::SeqCst)
        {
            return Err(anyhow!("injected release failure"));
        }
        let mut inner = self.lock()?;
        Ok(inner
            .codes
            .iter_mut()
            .find(|c| c.id == id && c.status == from)
            .map(|c| {
                c.status = to;
                c.clone()
            }))
    }

    async fn insert_redeem_request(&self, req: &RedeemRequest) -> anyhow::Result<()> {
        #[cfg(test)]
        if self.faults.request_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("injected insert failure"));
        }
        let mut inner = self.lock()?;
        let blocked = inner.requests.iter().any(|r| {
            r.salary_code_id == req.salary_code_id && r.status != ReviewStatus::Rejected
        });
        if blocked {
            return Err(anyhow!("open redemption request already exists for code"));
        }
        inner.requests.push(req.clone());
        Ok(())
    }

    async fn get_redeem_request(&self, id: &str) -> anyhow::Result<Option<RedeemRequest>> {
        Ok(self.lock()?.requests.iter().find(|r| r.id == id).cloned())
    }

    async fn open_requests_for_code(&self, code_id: &str) -> anyhow::Result<Vec<RedeemRequest>> {
        let inner = self.lock()?;
        let open: Vec<_> = inner
            .requests
            .iter()
            .filter(|r| r.salary_code_id == code_id && r.status != ReviewStatus::Rejected)
            .cloned()
            .collect();
        Ok(newest_first(&open, |r| r.created_at))
    }

    async fn list_redeem_requests(&self, user_id: Option<&str>) -> anyhow::Result<Vec<RedeemRequest>> {
        let inner = self.lock()?;
        let rows: Vec<_> = inner
            .requests
            .iter()
            .filter(|r| user_id.map_or(true, |u| r.user_id == u))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |r| r.created_at))
    }

    async fn review_redeem_request(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
    ) -> anyhow::Result<Option<RedeemRequest>> {
        let mut inner = self.lock()?;
        Ok(inner
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.status == ReviewStatus::Pending)
            .map(|r| {
                r.status = to;
                (r.approved_at, r.rejected_at) = stamp(to, at);
                r.clone()
            }))
    }

    async fn reopen_redeem_request(&self, id: &str) -> anyhow::Result<Option<RedeemRequest>> {
        let mut inner = self.lock()?;
        Ok(inner
            .requests
            .iter_mut()
            .find(|r| r.id == id && r.status == ReviewStatus::Rejected)
            .map(|r| {
                r.status = ReviewStatus::Pending;
                r.rejected_at = None;
                r.clone()
            }))
    }

    async fn insert_task(&self, task: &Task) -> anyhow::Result<()> {
        self.lock()?.tasks.push(task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> anyhow::Result<Option<Task>> {
        Ok(self.lock()?.tasks.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tasks(&self, status: Option<TaskStatus>) -> anyhow::Result<Vec<Task>> {
        let inner = self.lock()?;
        let rows: Vec<_> = inner
            .tasks
            .iter()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |t| t.created_at))
    }

    async fn set_task_status(&self, id: &str, status: TaskStatus) -> anyhow::Result<Option<Task>> {
        let mut inner = self.lock()?;
        Ok(inner.tasks.iter_mut().find(|t| t.id == id).map(|t| {
            t.status = status;
            t.clone()
        }))
    }

    async fn insert_submission(&self, sub: &TaskSubmission) -> anyhow::Result<()> {
        self.lock()?.submissions.push(sub.clone());
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> anyhow::Result<Option<TaskSubmission>> {
        Ok(self.lock()?.submissions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_submissions(&self, user_id: Option<&str>) -> anyhow::Result<Vec<TaskSubmission>> {
        let inner = self.lock()?;
        let rows: Vec<_> = inner
            .submissions
            .iter()
            .filter(|s| user_id.map_or(true, |u| s.user_id == u))
            .cloned()
            .collect();
        Ok(newest_first(&rows, |s| s.created_at))
    }

    async fn review_submission(
        &self,
        id: &str,
        to: ReviewStatus,
        at: EpochMs,
        admin_notes: Option<&str>,
    ) -> anyhow::Result<Option<TaskSubmission>> {
        let mut inner = self.lock()?;
        Ok(inner
            .submissions
            .iter_mut()
            .find(|s| s.id == id && s.status == ReviewStatus::Pending)
            .map(|s| {
                s.status = to;
                (s.approved_at, s.rejected_at) = stamp(to, at);
                if let Some(notes) = admin_notes {
                    s.admin_notes = Some(notes.to_string());
                }
                s.clone()
            }))
    }
}

/// Token -> account map.
#[derive(Default)]
pub struct InMemorySessions {
    by_token: Mutex<HashMap<String, Account>>,
}

impl InMemorySessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: &str, account: Account) -> anyhow::Result<()> {
        self.by_token
            .lock()
            .map_err(|_| anyhow!("session map lock poisoned"))?
            .insert(token.to_string(), account);
        Ok(())
    }
}

#[async_trait]
impl SessionResolver for InMemorySessions {
    async fn resolve(&self, token: &str) -> anyhow::Result<Option<Account>> {
        let map = self
            .by_token
            .lock()
            .map_err(|_| anyhow!("session map lock poisoned"))?;
        Ok(map.get(token).cloned())
    }
}

/// Keeps uploads in a map; references look like `mem://<owner>/<id>`.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content type and bytes behind a reference.
    pub fn get(&self, reference: &str) -> Option<(String, Vec<u8>)> {
        self.blobs.lock().ok()?.get(reference).cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, owner_id: &str, content_type: &str, bytes: Vec<u8>) -> anyhow::Result<String> {
        let reference = format!("mem://{owner_id}/{}", new_id());
        self.blobs
            .lock()
            .map_err(|_| anyhow!("blob map lock poisoned"))?
            .insert(reference.clone(), (content_type.to_string(), bytes));
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;

    fn code(id: &str, value: &str, created_at: EpochMs) -> SalaryCode {
        SalaryCode {
            id: id.into(),
            code: value.into(),
            name: "Asha".into(),
            phone: "9876543210".into(),
            task: "Share post".into(),
            price: Amount::from_minor(15_000),
            status: CodeStatus::Active,
            created_at,
            expires_at: None,
            created_by: None,
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
            created_at: 1,
            approved_at: None,
            rejected_at: None,
        }
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 10)).await.unwrap();
        store.insert_code(&code("c2", "BBBBBBBBB", 30)).await.unwrap();
        store.insert_code(&code("c3", "CCCCCCCCC", 20)).await.unwrap();
        let ids: Vec<_> = store.list_codes().await.unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["c2", "c3", "c1"]);
    }

    #[tokio::test]
    async fn duplicate_code_value_is_refused() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 1)).await.unwrap();
        assert!(store.insert_code(&code("c2", "AAAAAAAAA", 2)).await.is_err());
    }

    #[tokio::test]
    async fn swap_only_matches_expected_state() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 1)).await.unwrap();
        let first = store
            .swap_code_status("c1", CodeStatus::Active, CodeStatus::Redeemed)
            .await
            .unwrap();
        assert_eq!(first.unwrap().status, CodeStatus::Redeemed);
        let second = store
            .swap_code_status("c1", CodeStatus::Active, CodeStatus::Redeemed)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn failed_insert_releases_the_code() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 1)).await.unwrap();
        store.fail_request_inserts(true);
        assert!(store.file_redemption(&request("r1", "c1")).await.is_err());
        let c = store.get_code("c1").await.unwrap().unwrap();
        assert_eq!(c.status, CodeStatus::Active);

        store.fail_request_inserts(false);
        assert!(store.file_redemption(&request("r1", "c1")).await.unwrap());
        assert!(!store.file_redemption(&request("r2", "c1")).await.unwrap());
        assert_eq!(store.open_requests_for_code("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn review_only_moves_pending() {
        let store = InMemoryStore::new();
        store.insert_redeem_request(&request("r1", "c1")).await.unwrap();
        let r = store
            .review_redeem_request("r1", ReviewStatus::Rejected, 99)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(r.rejected_at, Some(99));
        assert!(r.approved_at.is_none());
        assert!(store
            .review_redeem_request("r1", ReviewStatus::Approved, 100)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn failed_release_reopens_the_request() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 1)).await.unwrap();
        assert!(store.file_redemption(&request("r1", "c1")).await.unwrap());

        store.fail_code_releases(true);
        assert!(store.reject_redemption("r1", 50, true).await.is_err());
        let r = store.get_redeem_request("r1").await.unwrap().unwrap();
        assert_eq!(r.status, ReviewStatus::Pending);
        assert!(r.rejected_at.is_none());
        let c = store.get_code("c1").await.unwrap().unwrap();
        assert_eq!(c.status, CodeStatus::Redeemed);

        store.fail_code_releases(false);
        let r = store.reject_redemption("r1", 60, true).await.unwrap().unwrap();
        assert_eq!(r.rejected_at, Some(60));
        let c = store.get_code("c1").await.unwrap().unwrap();
        assert_eq!(c.status, CodeStatus::Active);
        assert!(store.reject_redemption("r1", 70, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reject_without_release_keeps_code_redeemed() {
        let store = InMemoryStore::new();
        store.insert_code(&code("c1", "AAAAAAAAA", 1)).await.unwrap();
        assert!(store.file_redemption(&request("r1", "c1")).await.unwrap());
        store.fail_code_releases(true);
        let r = store.reject_redemption("r1", 50, false).await.unwrap().unwrap();
        assert_eq!(r.status, ReviewStatus::Rejected);
        let c = store.get_code("c1").await.unwrap().unwrap();
        assert_eq!(c.status, CodeStatus::Redeemed);
    }

    #[test]
    fn session_insert_reports_poisoned_lock() {
        let sessions = std::sync::Arc::new(InMemorySessions::new());
        let poisoner = sessions.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.by_token.lock().unwrap();
            panic!("poison the session map");
        })
        .join();
        let account = Account {
            id: "u1".into(),
            email: "u1@example.com".into(),
            role: crate::model::Role::User,
            email_verified: false,
            created_at: 0,
            updated_at: 0,
        };
        assert!(sessions.insert("t", account).is_err());
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let blobs = InMemoryBlobStore::new();
        let r = blobs.put("u1", "image/png", vec![1, 2, 3]).await.unwrap();
        assert!(r.starts_with("mem://u1/"));
        assert_eq!(blobs.get(&r), Some(("image/png".to_string(), vec![1, 2, 3])));
    }
}

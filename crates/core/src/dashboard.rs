//! Per-user overview.

use std::collections::HashMap;

use crate::amount::Amount;
use crate::error::{persistence, WorkflowError};
use crate::guard::Caller;
use crate::model::{Dashboard, ReviewStatus, StatusCounts, TaskStatus};
use crate::store::Store;

/// Counts the caller's requests and submissions per status and totals what
/// has been approved for payout.
///
/// Earnings are the prices of the codes behind approved redemptions plus the
/// prices of tasks behind approved submissions; free tasks add nothing.
pub async fn dashboard(store: &dyn Store, caller: &Caller) -> Result<Dashboard, WorkflowError> {
    let requests = store
        .list_redeem_requests(Some(caller.id()))
        .await
        .map_err(persistence)?;
    let submissions = store
        .list_submissions(Some(caller.id()))
        .await
        .map_err(persistence)?;
    let active_tasks = store
        .list_tasks(Some(TaskStatus::Active))
        .await
        .map_err(persistence)?
        .len() as u64;

    let mut earnings = Amount::ZERO;
    let mut redemptions = StatusCounts::default();
    for r in &requests {
        redemptions.record(r.status);
        if r.status == ReviewStatus::Approved {
            if let Some(code) = store.get_code(&r.salary_code_id).await.map_err(persistence)? {
                earnings = add(earnings, code.price)?;
            }
        }
    }

    let mut task_prices: HashMap<String, Amount> = HashMap::new();
    let mut subs = StatusCounts::default();
    for s in &submissions {
        subs.record(s.status);
        if s.status != ReviewStatus::Approved {
            continue;
        }
        let price = match task_prices.get(&s.task_id) {
            Some(p) => *p,
            None => {
                let p = store
                    .get_task(&s.task_id)
                    .await
                    .map_err(persistence)?
                    .filter(|t| !t.is_free)
                    .map_or(Amount::ZERO, |t| t.price);
                task_prices.insert(s.task_id.clone(), p);
                p
            }
        };
        earnings = add(earnings, price)?;
    }

    Ok(Dashboard {
        redemptions,
        submissions: subs,
        approved_earnings: earnings,
        active_tasks,
    })
}

fn add(a: Amount, b: Amount) -> Result<Amount, WorkflowError> {
    a.checked_add(b)
        .ok_or_else(|| persistence(anyhow::anyhow!("approved earnings overflow")))
}

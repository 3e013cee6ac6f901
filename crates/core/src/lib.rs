#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Domain core for the task-and-reward service: salary-code redemption,
//! task submissions, and the access guard in front of both.

pub mod amount;
pub mod api;
pub mod codegen;
pub mod dashboard;
pub mod error;
pub mod guard;
pub mod memory;
pub mod model;
pub mod redemption;
pub mod store;
pub mod tasks;
pub mod validation;

mod util;

pub use amount::Amount;
pub use dashboard::dashboard;
pub use error::WorkflowError;
pub use guard::{AccessGuard, Admin, Caller, SessionResolver};
pub use redemption::{RedemptionWorkflow, RejectionPolicy};
pub use store::{BlobStore, Store};
pub use tasks::TaskWorkflow;
pub use util::{new_id, now_ms};

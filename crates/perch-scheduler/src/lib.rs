//! # Perch Scheduler
//!
//! The polling loop that turns durable scheduled tasks into platform
//! actions. Each cycle loads due pending tasks in order, defers thread
//! items whose predecessor has not posted, lets the pacing governor veto
//! over-budget actions (a silent reschedule, never a failure), then claims
//! and executes one task at a time:
//!
//! ```text
//! tick (tokio interval)
//!   ├── due pending tasks, ordered by time then thread position
//!   ├── thread gate: predecessor not posted → skip, no writes
//!   ├── budget gate: denied → scheduled_for = wait_until, retry untouched
//!   ├── claim (pending → running, content → posting, one transaction)
//!   ├── session acquire + human pacing delays around the executor call
//!   └── outcome: completed/posted + analytics, or failed with message
//! ```
//!
//! Failed tasks are never requeued automatically; re-arming is an explicit
//! operator action through the queue service.

mod engine;
mod sink;

pub use engine::{Scheduler, spawn_scheduler};
pub use sink::StoreSink;

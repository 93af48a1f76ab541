//! Human-in-the-loop gate queue sitting between the guardrail engine and the
//! scheduler (C4, §4.4).

mod queue;

pub use queue::{ApprovalQueue, ApprovalQueueError};

//! Policy gate every tool call, plugin install, and task dispatch passes
//! through before it runs (C3, §4.3).

mod action;
mod classification;
mod engine;
mod rate_limit;
mod redact;

pub use action::Action;
pub use classification::Classification;
pub use engine::GuardrailEngine;
pub use rate_limit::RateLimiter;
pub use redact::redact;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error("action denied: {0}")]
    Denied(String),
    #[error("rate limited, resets in {reset_secs}s")]
    RateLimited { reset_secs: u64 },
}

//! Token accounting
//!
//! Everything that reasons about prompt size goes through this module:
//!
//! - **Counting**: [`TokenCounter`] gives a deterministic approximation of how
//!   many model tokens a piece of text costs.
//! - **Limits**: [`ModelLimitRegistry`] resolves a model identifier to its input
//!   token limit and the safety margin applied on top of it.
//!
//! Both are pure and stateless after construction, so every other component can
//! hold its own copy.

mod counter;
mod limits;

pub use counter::{TokenCounter, count_tokens};
pub use limits::{
    DEFAULT_INPUT_TOKEN_LIMIT, DEFAULT_SAFETY_MARGIN, ModelLimit, ModelLimitRegistry,
    parse_safety_margin,
};

//! Budget gates.
//!
//! [`PreflightValidator`] refuses prompts that would not fit the model before
//! any network call is made; [`RecoveryStrategy`] decides what happens next.

mod preflight;
mod recovery;

pub use preflight::{BudgetCheck, PreflightValidator};
pub use recovery::{
    Batch, FixedChooser, InteractiveChooser, RecoveryChoice, RecoveryChooser, RecoveryPlan,
    RecoveryState, RecoveryStrategy, partition,
};

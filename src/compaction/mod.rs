//! Test Report Compaction
//!
//! Shrinks a [`ParsedReport`](crate::parser::ParsedReport) until it fits a
//! model's token budget while keeping every distinct failure readable.
//!
//! ## Pipeline
//!
//! 1. **Dedup**: failures with the same normalized message and raising frame
//!    collapse into one record with a `duplicate_count`
//! 2. **Filter**: runner-internal frames and banner lines are removed
//! 3. **Truncate**: stacks keep the first and last K frames
//! 4. **Escalate**: smaller K, then (lossy profile only) message-only
//!    rendering, then omitting the lowest-priority failures
//!
//! ## Configuration
//!
//! ```toml
//! [compression]
//! stack_window = 5
//! aggressive_stack_window = 2
//! message_max_chars = 600
//! target_reduction = 0.85
//! ```

mod compressor;
mod config;
mod noise;
mod signature;
mod stack;

pub use compressor::{CompressedReport, CompressionLevel, Compressor, dedup};
pub use config::{
    CompressionSettings, DEFAULT_AGGRESSIVE_STACK_WINDOW, DEFAULT_MESSAGE_MAX_CHARS,
    DEFAULT_STACK_WINDOW, DEFAULT_TARGET_REDUCTION,
};
pub use noise::{filter_frames, filter_lines, is_internal_frame, is_noise_line};
pub use signature::{dedup_key, digest, normalize_line, raising_frame};
pub use stack::{omission_marker, truncate_frames};

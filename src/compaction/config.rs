//! Compression knobs.

use serde::{Deserialize, Serialize};

/// Frames kept at each end of a stack in the standard profile.
pub const DEFAULT_STACK_WINDOW: usize = 5;
/// Frames kept at each end of a stack under aggressive truncation.
pub const DEFAULT_AGGRESSIVE_STACK_WINDOW: usize = 2;
/// Character cap for messages once frames are dropped.
pub const DEFAULT_MESSAGE_MAX_CHARS: usize = 600;
/// Reduction the compressor aims for when no explicit budget is given.
pub const DEFAULT_TARGET_REDUCTION: f64 = 0.85;

/// Settings for one compression pass.
///
/// The standard profile only shortens stacks. The aggressive profile (see
/// [`CompressionSettings::aggressive`]) may also drop frames entirely, clip
/// messages, and omit low-priority failures to reach the budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionSettings {
    pub stack_window: usize,
    pub aggressive_stack_window: usize,
    pub message_max_chars: usize,
    pub target_reduction: f64,
    /// Allow message-only rendering and omitting failures.
    #[serde(default)]
    pub allow_lossy: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            stack_window: DEFAULT_STACK_WINDOW,
            aggressive_stack_window: DEFAULT_AGGRESSIVE_STACK_WINDOW,
            message_max_chars: DEFAULT_MESSAGE_MAX_CHARS,
            target_reduction: DEFAULT_TARGET_REDUCTION,
            allow_lossy: false,
        }
    }
}

impl CompressionSettings {
    /// The stricter profile used by the aggressive-truncate recovery.
    pub fn aggressive(&self) -> Self {
        Self {
            stack_window: self.aggressive_stack_window.max(1),
            aggressive_stack_window: 1,
            message_max_chars: (self.message_max_chars / 2).max(80),
            target_reduction: self.target_reduction,
            allow_lossy: true,
        }
    }

    /// Budget implied by `target_reduction` for a report of `original_tokens`.
    pub fn default_budget(&self, original_tokens: usize) -> usize {
        let keep = (1.0 - self.target_reduction).clamp(0.0, 1.0);
        (original_tokens as f64 * keep).ceil() as usize
    }

    /// Stack windows tried in order, deduplicated and never below one.
    pub(crate) fn windows(&self) -> Vec<usize> {
        let mut windows = Vec::new();
        for k in [self.stack_window, self.aggressive_stack_window, 1] {
            let k = k.max(1);
            if windows.last().is_none_or(|last| k < *last) {
                windows.push(k);
            }
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggressive_profile() {
        let settings = CompressionSettings::default();
        let aggressive = settings.aggressive();
        assert_eq!(aggressive.stack_window, 2);
        assert_eq!(aggressive.aggressive_stack_window, 1);
        assert_eq!(aggressive.message_max_chars, 300);
        assert!(aggressive.allow_lossy);
        assert!(!settings.allow_lossy);
    }

    #[test]
    fn test_windows_are_strictly_decreasing() {
        assert_eq!(CompressionSettings::default().windows(), vec![5, 2, 1]);
        let settings = CompressionSettings {
            stack_window: 2,
            aggressive_stack_window: 3,
            ..Default::default()
        };
        assert_eq!(settings.windows(), vec![2, 1]);
        let zero = CompressionSettings {
            stack_window: 0,
            aggressive_stack_window: 0,
            ..Default::default()
        };
        assert_eq!(zero.windows(), vec![1]);
    }

    #[test]
    fn test_default_budget() {
        let settings = CompressionSettings::default();
        assert_eq!(settings.default_budget(10_000), 1_500);
        assert_eq!(settings.default_budget(0), 0);
    }
}

//! Token usage accounting for provider calls.
//!
//! Every [`ChatResponse`](crate::chat::ChatResponse) reports the tokens it
//! consumed; the executor accumulates them across the whole workflow run
//! (goal loops, supervision phases, security tiers, sub-agents) and
//! surfaces the total in the [`RunReport`](crate::executor::RunReport).

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage from one or more LLM operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt/input.
    #[serde(default)]
    pub input_tokens: u64,

    /// Tokens in the completion/output.
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Total tokens used (input + output).
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Check whether no tokens were used.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::fmt::Display for Usage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Usage(in: {}, out: {}, total: {})",
            self.input_tokens,
            self.output_tokens,
            self.total()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_records_both_directions() {
        let usage = Usage::new(100, 50);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.output_tokens, 50);
        assert_eq!(usage.total(), 150);
    }

    #[test]
    fn zero_is_empty() {
        assert!(Usage::zero().is_empty());
        assert!(!Usage::new(1, 0).is_empty());
    }

    #[test]
    fn add_sums_tokens() {
        let total = Usage::new(100, 50) + Usage::new(200, 100);
        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 150);
    }

    #[test]
    fn add_assign_accumulates() {
        let mut usage = Usage::zero();
        usage += Usage::new(50, 20);
        usage += Usage::new(30, 10);
        assert_eq!(usage, Usage::new(80, 30));
    }

    #[test]
    fn serde_roundtrip() {
        let usage = Usage::new(12, 7);
        let json = serde_json::to_string(&usage).unwrap();
        let parsed: Usage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, usage);
    }

    #[test]
    fn display_mentions_all_counts() {
        let rendered = Usage::new(100, 50).to_string();
        assert!(rendered.contains("100"));
        assert!(rendered.contains("50"));
        assert!(rendered.contains("150"));
    }
}

//! Token estimation utilities.
//!
//! Uses a byte-based heuristic: ~4 bytes per token, rounded up. Every
//! budget decision in the allocator goes through [`estimate_tokens`], so
//! the heuristic only has to be consistent, not exact.

use cinder_core::Turn;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Largest byte length that still estimates to at most `tokens`.
pub fn bytes_for_tokens(tokens: usize) -> usize {
    tokens.saturating_mul(4)
}

/// Estimate tokens for a rendered history line (`"User: ...\n"`).
pub fn estimate_turn_tokens(turn: &Turn) -> usize {
    estimate_tokens(&turn.render()) + 1
}

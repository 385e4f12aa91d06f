//! Debounce Engine
//!
//! Converts a noisy boolean detection stream into stable SET / HEALED
//! decisions using a counter bounded to `[-limit, +limit]`.

mod engine;

pub use engine::{debounce, DebounceAction, DebounceResult, DebounceState, DEFAULT_DEBOUNCE_LIMIT};

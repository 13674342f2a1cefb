// ABOUTME: Sealed trait pattern for the engine API traits.
// ABOUTME: Prevents external implementations, allowing non-breaking evolution.

/// Only [`crate::client::Client`] implements the API traits.
pub trait Sealed {}

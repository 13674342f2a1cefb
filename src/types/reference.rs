// ABOUTME: Opaque subscription reference handed out by the dispatcher.
// ABOUTME: Only the crate can mint one, so callers cannot forge references.

use uuid::Uuid;

/// Identifies one live asynchronous exchange.
///
/// References are minted fresh for every asynchronous command and are never
/// reused, even after the subscription they name has ended.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reference(Uuid);

impl Reference {
    pub(crate) fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reference({})", self.0.simple())
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#ref<{}>", self.0.simple())
    }
}

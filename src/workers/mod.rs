/// Reconciliation worker driving the balloon
pub(crate) mod balloon;

/// Single thread task worker scaffolding
pub(crate) mod spawner;

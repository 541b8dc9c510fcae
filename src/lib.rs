//! A lock-free LIFO stack whose head is a versioned snapshot.
//!
//! Every successful push or pop installs a new immutable snapshot of the
//! head carrying a strictly increasing version, and mutations are published
//! with a single compare-and-swap against the snapshot that was read. A
//! stale snapshot can never win that exchange, even when the same item is
//! back on top. Detached nodes are reclaimed with `crossbeam-epoch`.
//!
//! Enable the `tracing` feature to emit per-mutation events.

mod error;
mod node;
mod stack;
mod versioned;

pub use error::StackError;
pub use stack::LockFreeStack;

use crate::node::Node;
use crossbeam_epoch::{Atomic, Guard, Shared};
use std::sync::atomic::Ordering;

/// An immutable snapshot of the stack's head: the top node paired with the
/// number of successful mutations that led to it.
///
/// The stack's head slot holds a pointer to one of these, and every
/// successful push or pop swaps in a freshly allocated one. A snapshot is
/// never modified once it has been published, and epoch reclamation keeps
/// its address from being reused while any thread still holds it, so a
/// compare-and-swap against the slot can only succeed if no mutation has
/// happened since the snapshot was read.
pub(crate) struct VersionedRef<T> {
    node: Atomic<Node<T>>,
    version: u64,
}

impl<T> VersionedRef<T> {
    /// The snapshot of a freshly constructed, empty stack.
    pub(crate) fn initial() -> Self {
        Self {
            node: Atomic::null(),
            version: 0,
        }
    }

    /// The snapshot that follows this one when the head becomes `node`.
    pub(crate) fn with_new_reference(&self, node: Shared<'_, Node<T>>) -> Self {
        Self {
            node: Atomic::from(node),
            version: self.version.wrapping_add(1),
        }
    }

    /// The top node; null when the stack is empty.
    pub(crate) fn node<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
        // Never written after construction; the slot's acquire load already
        // synchronized with the snapshot's publisher.
        self.node.load(Ordering::Relaxed, guard)
    }

    pub(crate) fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch::{self as epoch, Owned};

    #[test]
    fn test_initial_snapshot() {
        let guard = epoch::pin();
        let snapshot: VersionedRef<u32> = VersionedRef::initial();
        assert!(snapshot.node(&guard).is_null());
        assert_eq!(snapshot.version(), 0);
    }

    #[test]
    fn test_with_new_reference_bumps_version() {
        let guard = epoch::pin();
        let node = Owned::new(Node::new(1u32)).into_shared(&guard);

        let initial = VersionedRef::initial();
        let pushed = initial.with_new_reference(node);
        assert_eq!(pushed.node(&guard), node);
        assert_eq!(pushed.version(), 1);

        // Returning to an empty head still yields a distinct snapshot.
        let popped = pushed.with_new_reference(Shared::null());
        assert!(popped.node(&guard).is_null());
        assert_eq!(popped.version(), 2);
        assert_eq!(initial.version(), 0);

        unsafe { drop(node.into_owned()) };
    }
}

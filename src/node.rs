use crossbeam_epoch::{Atomic, Guard, Shared};
use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

/// A cell in the stack's singly-linked chain.
///
/// The item is written once at construction. `next` is only written by the
/// push that owns the node, and only before the node is published; after
/// publication neither field changes, so any traversal of a chain segment
/// stays consistent.
pub(crate) struct Node<T> {
    /// Moved out by the pop that detaches the node, so it is never dropped
    /// together with the node.
    item: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    pub(crate) fn new(item: T) -> Self {
        Self {
            item: ManuallyDrop::new(item),
            next: Atomic::null(),
        }
    }

    /// Points this node at `next`.
    ///
    /// # Safety
    /// The node must not be reachable from the stack yet.
    pub(crate) unsafe fn link(&self, next: Shared<'_, Node<T>>) {
        self.next.store(next, Ordering::Relaxed);
    }

    pub(crate) fn next<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<T>> {
        self.next.load(Ordering::Acquire, guard)
    }

    pub(crate) fn item(&self) -> &T {
        &self.item
    }

    /// Moves the item out of the node.
    ///
    /// # Safety
    /// Must be called at most once per node, by the operation that detached
    /// it from the stack.
    pub(crate) unsafe fn take_item(&self) -> T {
        ptr::read(&*self.item)
    }

    /// Drops the item in place. Used when the stack itself is torn down.
    ///
    /// # Safety
    /// The item must not have been taken, and the node must not be accessed
    /// again afterwards.
    pub(crate) unsafe fn drop_item(&mut self) {
        ManuallyDrop::drop(&mut self.item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_epoch::{self as epoch, Owned};
    use std::sync::Arc;

    #[test]
    fn test_new_node_is_bottom() {
        let guard = epoch::pin();
        let node = Node::new(7);
        assert!(node.next(&guard).is_null());
        assert_eq!(*node.item(), 7);
    }

    #[test]
    fn test_relink_before_publication() {
        let guard = epoch::pin();
        let first = Owned::new(Node::new(1)).into_shared(&guard);
        let second = Owned::new(Node::new(2)).into_shared(&guard);
        let candidate = Node::new(3);

        unsafe {
            candidate.link(first);
            assert_eq!(candidate.next(&guard), first);
            candidate.link(second);
            assert_eq!(candidate.next(&guard), second);

            drop(first.into_owned());
            drop(second.into_owned());
        }
    }

    #[test]
    fn test_take_item_moves_without_double_drop() {
        let tracked = Arc::new(());
        let mut node = Node::new(Arc::clone(&tracked));
        assert_eq!(Arc::strong_count(&tracked), 2);

        let taken = unsafe { node.take_item() };
        drop(node);
        assert_eq!(Arc::strong_count(&tracked), 2);
        drop(taken);
        assert_eq!(Arc::strong_count(&tracked), 1);

        node = Node::new(Arc::clone(&tracked));
        unsafe { node.drop_item() };
        assert_eq!(Arc::strong_count(&tracked), 1);
    }
}

use crate::error::StackError;
use crate::node::Node;
use crate::versioned::VersionedRef;
use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use std::fmt;
use std::sync::atomic::Ordering;

/// Retry count above which a contended push or pop is reported at debug level.
#[cfg(feature = "tracing")]
const CONTENTION_REPORT_THRESHOLD: u32 = 64;

/// A lock-free LIFO stack with a versioned head.
///
/// The head slot holds a pointer to an immutable [`VersionedRef`] pairing
/// the top node with a mutation counter. Every successful push or pop
/// installs a new snapshot with the counter advanced by one, so the
/// compare-and-swap that publishes a mutation fails whenever anything has
/// changed since the snapshot was read, even if the same item is on top
/// again. Detached nodes and replaced snapshots are reclaimed with
/// epoch-based reclamation.
///
/// Push and pop are linearizable and lock-free. `peek`, `is_empty` and
/// `len` read the head without retrying and may be stale by the time they
/// return.
///
/// `pop` moves its item out to the caller while a concurrent reader may
/// still be looking at the same node, so `peek`, `try_peek` and `to_vec`
/// hand out bitwise copies and are only available when `T: Copy`. A stack
/// of owned values such as `String` can push and pop but not peek:
///
/// ```compile_fail
/// use versioned_stack::LockFreeStack;
///
/// let stack = LockFreeStack::new();
/// stack.push(String::from("owned"));
/// let _ = stack.peek();
/// ```
///
/// # Examples
/// ```
/// use versioned_stack::LockFreeStack;
///
/// let stack = LockFreeStack::new();
/// stack.push(1);
/// stack.push(2);
/// assert_eq!(stack.peek(), Some(2));
/// assert_eq!(stack.pop(), Some(2));
/// assert_eq!(stack.version(), 3);
/// ```
pub struct LockFreeStack<T> {
    head: Atomic<VersionedRef<T>>,
}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LockFreeStack<T> {
    /// Creates a new empty stack at version 0
    pub fn new() -> Self {
        Self {
            head: Atomic::new(VersionedRef::initial()),
        }
    }

    /// Loads the current head snapshot.
    fn current<'g>(&self, guard: &'g Guard) -> (Shared<'g, VersionedRef<T>>, &'g VersionedRef<T>) {
        let shared = self.head.load(Ordering::Acquire, guard);
        // SAFETY: the slot is never null, and a replaced snapshot is only
        // destroyed once every guard that could have loaded it is gone.
        let snapshot = unsafe { shared.deref() };
        (shared, snapshot)
    }

    /// Pushes an item onto the stack
    ///
    /// Always succeeds; under contention the push yields and retries until
    /// its compare-and-swap wins.
    pub fn push(&self, item: T) {
        self.push_versioned(item);
    }

    /// Pushes an item and returns the version its publication installed.
    ///
    /// The returned version is the push's position in the total order of
    /// successful mutations on this stack.
    pub fn push_versioned(&self, item: T) -> u64 {
        let guard = epoch::pin();
        let node = Owned::new(Node::new(item)).into_shared(&guard);
        let backoff = Backoff::new();
        #[cfg(feature = "tracing")]
        let mut retries: u32 = 0;

        loop {
            let (current, snapshot) = self.current(&guard);
            // SAFETY: `node` is unreachable by other threads until the
            // exchange below succeeds, so re-linking it on every attempt is
            // not observable.
            unsafe { node.deref().link(snapshot.node(&guard)) };

            let candidate = Owned::new(snapshot.with_new_reference(node));
            let version = candidate.version();

            match self.head.compare_exchange(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    // SAFETY: the old snapshot is out of the slot; threads
                    // that loaded it are still protected by their guards.
                    unsafe { guard.defer_destroy(current) };
                    #[cfg(feature = "tracing")]
                    report_mutation("push", version, retries);
                    return version;
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    {
                        retries += 1;
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Removes and returns the top item from the stack
    ///
    /// # Returns
    /// * `Some(T)` if an item was on top when the pop took effect
    /// * `None` if the stack was observed empty; the version is unchanged
    pub fn pop(&self) -> Option<T> {
        self.pop_versioned().map(|(item, _)| item)
    }

    /// Pops the top item together with the version its removal installed.
    pub fn pop_versioned(&self) -> Option<(T, u64)> {
        let guard = epoch::pin();
        let backoff = Backoff::new();
        #[cfg(feature = "tracing")]
        let mut retries: u32 = 0;

        loop {
            let (current, snapshot) = self.current(&guard);
            let top = snapshot.node(&guard);
            // SAFETY: nodes reachable from a loaded snapshot are retired
            // through the same epoch as the snapshot itself.
            let Some(top_node) = (unsafe { top.as_ref() }) else {
                #[cfg(feature = "tracing")]
                tracing::trace!(version = snapshot.version(), "pop observed empty stack");
                return None;
            };

            let candidate = Owned::new(snapshot.with_new_reference(top_node.next(&guard)));
            let version = candidate.version();

            match self.head.compare_exchange(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => {
                    // SAFETY: winning the exchange against `current` makes
                    // this the only pop that detached `top`, so the item is
                    // taken exactly once. Both allocations are destroyed only
                    // after concurrent readers unpin.
                    let item = unsafe {
                        guard.defer_destroy(current);
                        let item = top_node.take_item();
                        guard.defer_destroy(top);
                        item
                    };
                    #[cfg(feature = "tracing")]
                    report_mutation("pop", version, retries);
                    return Some((item, version));
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    {
                        retries += 1;
                    }
                    backoff.snooze();
                }
            }
        }
    }

    /// Like [`pop`](Self::pop), with an empty stack reported as an error.
    pub fn try_pop(&self) -> Result<T, StackError> {
        self.pop().ok_or(StackError::Empty)
    }

    /// Returns a copy of the top item without removing it.
    ///
    /// Items leave the stack by move, so a concurrent pop may take the item
    /// this call is reading; copying is the only way to hand it out.
    pub fn peek(&self) -> Option<T>
    where
        T: Copy,
    {
        let guard = epoch::pin();
        let (_, snapshot) = self.current(&guard);
        // SAFETY: see `pop_versioned`.
        unsafe { snapshot.node(&guard).as_ref() }.map(|node| *node.item())
    }

    /// Like [`peek`](Self::peek), with an empty stack reported as an error.
    pub fn try_peek(&self) -> Result<T, StackError>
    where
        T: Copy,
    {
        self.peek().ok_or(StackError::Empty)
    }

    /// Returns true if the head was empty when read
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let (_, snapshot) = self.current(&guard);
        snapshot.node(&guard).is_null()
    }

    /// Counts the items reachable from the current head.
    ///
    /// This walks the chain, so it is O(n). Published nodes never change,
    /// so the walk always terminates, but under concurrent mutation the
    /// count may match neither the state before nor after any single
    /// operation.
    pub fn len(&self) -> usize {
        let guard = epoch::pin();
        let (_, snapshot) = self.current(&guard);
        let mut count = 0;
        let mut cursor = snapshot.node(&guard);
        // SAFETY: see `pop_versioned`.
        while let Some(node) = unsafe { cursor.as_ref() } {
            count += 1;
            cursor = node.next(&guard);
        }
        count
    }

    /// Copies the items reachable from the current head, top first.
    ///
    /// Same consistency as [`len`](Self::len).
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Copy,
    {
        let guard = epoch::pin();
        let (_, snapshot) = self.current(&guard);
        let mut items = Vec::new();
        let mut cursor = snapshot.node(&guard);
        // SAFETY: see `pop_versioned`.
        while let Some(node) = unsafe { cursor.as_ref() } {
            items.push(*node.item());
            cursor = node.next(&guard);
        }
        items
    }

    /// Number of successful pushes and pops so far.
    ///
    /// Diagnostic only; it is already outdated when it returns if other
    /// threads are mutating the stack.
    pub fn version(&self) -> u64 {
        let guard = epoch::pin();
        self.current(&guard).1.version()
    }

    /// Attempts to collect garbage from previous operations
    ///
    /// Flushes this thread's deferred destructions so retired nodes and
    /// snapshots can be freed sooner.
    pub fn try_collect_garbage(&self) {
        let mut guard = epoch::pin();
        guard.flush();
        guard.repin();
        guard.flush();
    }
}

#[cfg(feature = "tracing")]
fn report_mutation(op: &'static str, version: u64, retries: u32) {
    if retries > CONTENTION_REPORT_THRESHOLD {
        tracing::debug!(op, version, retries, "heavily contended mutation");
    }
    tracing::trace!(op, version, retries, "stack mutated");
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no other thread can reach the stack,
        // and every node still linked owns an item that was never taken.
        unsafe {
            let guard = epoch::unprotected();
            let head = self.head.load(Ordering::Relaxed, guard);
            let mut cursor = head.deref().node(guard);
            while !cursor.is_null() {
                let mut node = cursor.into_owned();
                cursor = node.next(guard);
                node.drop_item();
            }
            drop(head.into_owned());
        }
    }
}

impl<T> fmt::Debug for LockFreeStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        let (_, snapshot) = self.current(&guard);
        f.debug_struct("LockFreeStack")
            .field("version", &snapshot.version())
            .field("is_empty", &snapshot.node(&guard).is_null())
            .finish()
    }
}

impl<T> FromIterator<T> for LockFreeStack<T> {
    /// Pushes the items in iteration order, so the last one ends up on top.
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut stack = Self::new();
        stack.extend(iter);
        stack
    }
}

impl<T> Extend<T> for LockFreeStack<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for item in iter {
            self.push(item);
        }
    }
}

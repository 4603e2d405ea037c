//! Index-linked thread queues
//!
//! Ready list and wait queues are doubly-linked lists threaded through the
//! `link` field of the thread table. A thread is linked into at most one
//! queue at a time; [`WaitQueue`] records which one.
//!
//! Author: Moroya Sakamoto

use crate::condvar::CondVarId;
use crate::mutex::MutexId;
use crate::semaphore::SemaphoreId;
use crate::thread::{Priority, ThreadId};

/// Queue a thread is currently linked into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitQueue {
    /// Not linked
    None,
    /// Ready list
    Ready,
    Semaphore(SemaphoreId),
    Mutex(MutexId),
    CondVar(CondVarId),
    /// Waiting for the given thread to terminate
    Exit(ThreadId),
}

/// Neighbours of a linked thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Link {
    pub prev: Option<ThreadId>,
    pub next: Option<ThreadId>,
}

impl Link {
    pub const fn new() -> Self {
        Self { prev: None, next: None }
    }
}

/// Element stored in a [`ThreadQueue`]
pub(crate) trait QueueNode {
    fn link(&self) -> &Link;
    fn link_mut(&mut self) -> &mut Link;
    fn priority(&self) -> Priority;
}

/// Priority-ordered queue, FIFO among equal priorities
///
/// The queue stores only its ends; nodes are borrowed from the table on
/// every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct ThreadQueue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: u8,
}

impl ThreadQueue {
    pub const fn new() -> Self {
        Self { head: None, tail: None, len: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// First thread in queue order
    pub fn head(&self) -> Option<ThreadId> {
        self.head
    }

    /// Link `id` behind every node of higher or equal priority
    pub fn insert<T: QueueNode>(&mut self, nodes: &mut [T], id: ThreadId) {
        let prio = nodes[id.index()].priority();
        self.link_before_first(nodes, id, |other| prio.is_higher_than(other));
    }

    /// Link `id` ahead of its equals, behind strictly higher priorities
    pub fn insert_ahead<T: QueueNode>(&mut self, nodes: &mut [T], id: ThreadId) {
        let prio = nodes[id.index()].priority();
        self.link_before_first(nodes, id, |other| !other.is_higher_than(prio));
    }

    fn link_before_first<T: QueueNode>(
        &mut self,
        nodes: &mut [T],
        id: ThreadId,
        stop: impl Fn(Priority) -> bool,
    ) {
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if stop(nodes[c.index()].priority()) {
                break;
            }
            cursor = nodes[c.index()].link().next;
        }

        let prev = match cursor {
            Some(c) => nodes[c.index()].link().prev,
            None => self.tail,
        };
        *nodes[id.index()].link_mut() = Link { prev, next: cursor };
        match prev {
            Some(p) => nodes[p.index()].link_mut().next = Some(id),
            None => self.head = Some(id),
        }
        match cursor {
            Some(c) => nodes[c.index()].link_mut().prev = Some(id),
            None => self.tail = Some(id),
        }
        self.len += 1;
    }

    /// Unlink `id`, which must be a member of this queue
    pub fn remove<T: QueueNode>(&mut self, nodes: &mut [T], id: ThreadId) {
        debug_assert!(self.len > 0, "remove from an empty queue");
        let Link { prev, next } = *nodes[id.index()].link();
        match prev {
            Some(p) => nodes[p.index()].link_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => nodes[n.index()].link_mut().prev = prev,
            None => self.tail = prev,
        }
        *nodes[id.index()].link_mut() = Link::new();
        self.len -= 1;
    }

    /// Unlink and return the head
    pub fn pop_front<T: QueueNode>(&mut self, nodes: &mut [T]) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Walk the queue in order
    pub fn iter<'a, T: QueueNode>(&self, nodes: &'a [T]) -> impl Iterator<Item = ThreadId> + 'a {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let c = cursor?;
            cursor = nodes[c.index()].link().next;
            Some(c)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    struct Node {
        link: Link,
        prio: Priority,
    }

    impl QueueNode for Node {
        fn link(&self) -> &Link {
            &self.link
        }
        fn link_mut(&mut self) -> &mut Link {
            &mut self.link
        }
        fn priority(&self) -> Priority {
            self.prio
        }
    }

    fn nodes(prios: &[u8]) -> Vec<Node> {
        prios
            .iter()
            .map(|&p| Node { link: Link::new(), prio: Priority(p) })
            .collect()
    }

    fn id(i: usize) -> ThreadId {
        ThreadId(i as u8)
    }

    #[test]
    fn test_priority_order() {
        let mut n = nodes(&[30, 10, 20]);
        let mut q = ThreadQueue::new();
        for i in 0..3 {
            q.insert(&mut n, id(i));
        }
        assert_eq!(q.len(), 3);
        assert_eq!(q.iter(&n).collect::<Vec<_>>(), [id(1), id(2), id(0)]);
    }

    #[test]
    fn test_fifo_among_equals() {
        let mut n = nodes(&[5, 5, 1, 5]);
        let mut q = ThreadQueue::new();
        for i in 0..4 {
            q.insert(&mut n, id(i));
        }
        assert_eq!(q.pop_front(&mut n), Some(id(2)));
        assert_eq!(q.pop_front(&mut n), Some(id(0)));
        assert_eq!(q.pop_front(&mut n), Some(id(1)));
        assert_eq!(q.pop_front(&mut n), Some(id(3)));
        assert_eq!(q.pop_front(&mut n), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_remove_middle_and_ends() {
        let mut n = nodes(&[1, 2, 3, 4]);
        let mut q = ThreadQueue::new();
        for i in 0..4 {
            q.insert(&mut n, id(i));
        }
        q.remove(&mut n, id(1));
        q.remove(&mut n, id(0));
        q.remove(&mut n, id(3));
        assert_eq!(q.iter(&n).collect::<Vec<_>>(), [id(2)]);
        assert_eq!(q.head(), Some(id(2)));
        assert_eq!(n[1].link, Link::new());
    }

    #[test]
    fn test_reinsert_after_priority_change() {
        let mut n = nodes(&[10, 20, 30]);
        let mut q = ThreadQueue::new();
        for i in 0..3 {
            q.insert(&mut n, id(i));
        }
        q.remove(&mut n, id(2));
        n[2].prio = Priority(0);
        q.insert(&mut n, id(2));
        assert_eq!(q.iter(&n).collect::<Vec<_>>(), [id(2), id(0), id(1)]);
    }

    #[test]
    fn test_insert_ahead_of_equals() {
        let mut n = nodes(&[1, 5, 5, 9, 5]);
        let mut q = ThreadQueue::new();
        for i in 0..4 {
            q.insert(&mut n, id(i));
        }
        q.insert_ahead(&mut n, id(4));
        assert_eq!(q.iter(&n).collect::<Vec<_>>(), [id(0), id(4), id(1), id(2), id(3)]);
    }

    proptest! {
        #[test]
        fn prop_pop_order_is_stable_priority_sort(
            prios in proptest::collection::vec(0u8..8, 0..16)
        ) {
            let mut n = nodes(&prios);
            let mut q = ThreadQueue::new();
            for i in 0..prios.len() {
                q.insert(&mut n, id(i));
            }

            let mut expected: Vec<usize> = (0..prios.len()).collect();
            expected.sort_by_key(|&i| prios[i]);

            let mut popped = Vec::new();
            while let Some(t) = q.pop_front(&mut n) {
                popped.push(t.index());
            }
            prop_assert_eq!(popped, expected);
        }

        #[test]
        fn prop_backward_links_mirror_forward(
            prios in proptest::collection::vec(0u8..4, 1..16),
            drop_at in 0usize..16
        ) {
            let mut n = nodes(&prios);
            let mut q = ThreadQueue::new();
            for i in 0..prios.len() {
                q.insert(&mut n, id(i));
            }
            q.remove(&mut n, id(drop_at % prios.len()));

            let forward: Vec<ThreadId> = q.iter(&n).collect();
            let mut backward = Vec::new();
            let mut cursor = q.tail;
            while let Some(c) = cursor {
                backward.push(c);
                cursor = n[c.index()].link.prev;
            }
            backward.reverse();
            prop_assert_eq!(q.len(), forward.len());
            prop_assert_eq!(forward, backward);
        }
    }
}

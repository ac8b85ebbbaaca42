//! Single-threaded publish/subscribe for state snapshots.
//!
//! Each subscriber gets its own unbounded channel. A new subscriber first
//! receives the latest published value, so late subscribers never miss the
//! current state.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use std::cell::RefCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Inner<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, UnboundedSender<T>)>,
    latest: Option<T>,
}

pub struct Broadcaster<T: Clone> {
    inner: RefCell<Inner<T>>,
}

impl<T: Clone> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(Inner {
                next_id: 0,
                subscribers: Vec::new(),
                latest: None,
            }),
        }
    }

    pub fn subscribe(&self) -> (SubscriptionId, UnboundedReceiver<T>) {
        let mut inner = self.inner.borrow_mut();
        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;

        let (tx, rx) = unbounded();
        if let Some(latest) = &inner.latest {
            let _ = tx.unbounded_send(latest.clone());
        }
        inner.subscribers.push((id, tx));
        (id, rx)
    }

    /// Drops the sender; the receiver sees end-of-stream.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .borrow_mut()
            .subscribers
            .retain(|(sub, _)| *sub != id);
    }

    pub fn publish(&self, value: T) {
        let mut inner = self.inner.borrow_mut();
        // 顺便清理已关闭的接收端
        inner
            .subscribers
            .retain(|(_, tx)| tx.unbounded_send(value.clone()).is_ok());
        inner.latest = Some(value);
    }

    pub fn latest(&self) -> Option<T> {
        self.inner.borrow().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

/// A list's storage plus its own lock and wakeup signal.
///
/// Kept behind its own `Arc` so BLPOP's poll loop against one key never has
/// to take the whole keyspace's lock and starve operations on other keys.
#[derive(Debug, Default)]
pub struct ListHandle {
    items: Mutex<VecDeque<Bytes>>,
    notify: Notify,
}

impl ListHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn append(&self, values: impl IntoIterator<Item = Bytes>) -> usize {
        let mut items = self.items.lock().await;
        for value in values {
            items.push_back(value);
        }
        self.notify.notify_waiters();
        items.len()
    }

    pub async fn prepend(&self, values: impl IntoIterator<Item = Bytes>) -> usize {
        let mut items = self.items.lock().await;
        for value in values {
            items.push_front(value);
        }
        self.notify.notify_waiters();
        items.len()
    }

    pub async fn pop_front(&self, count: usize) -> Vec<Bytes> {
        let mut items = self.items.lock().await;
        (0..count).filter_map(|_| items.pop_front()).collect()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn range(&self, start: i64, end: i64) -> Vec<Bytes> {
        let items = self.items.lock().await;
        let len = items.len() as i64;
        if len == 0 {
            return vec![];
        }

        let norm = |idx: i64| -> i64 {
            if idx < 0 { (len + idx).max(0) } else { idx }
        };

        let start = norm(start);
        let end = norm(end).min(len - 1);

        if start > end || start >= len {
            return vec![];
        }

        items
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .collect()
    }

    /// Blocks until an element is available or `timeout_secs` elapses (`0`
    /// means block indefinitely). Returns the popped element, or `None` on
    /// timeout.
    ///
    /// The waiter is registered via `enable()` *before* the queue is
    /// checked, so a concurrent `append`/`prepend` that locks, pushes, and
    /// calls `notify_waiters()` between our check and our first poll still
    /// wakes us — `Notify::notify_waiters()` only wakes waiters already
    /// registered, so registering after the check would risk missing it.
    pub async fn blocking_pop(&self, timeout_secs: f64) -> Option<Bytes> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.items.lock().await.pop_front() {
                return Some(value);
            }

            if timeout_secs == 0.0 {
                notified.await;
            } else if timeout(Duration::from_secs_f64(timeout_secs), notified).await.is_err() {
                // one last check in case the value arrived exactly as we timed out
                return self.items.lock().await.pop_front();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_pop_preserve_order() {
        let list = ListHandle::new();
        list.append([Bytes::from_static(b"a"), Bytes::from_static(b"b")]).await;
        let popped = list.pop_front(1).await;
        assert_eq!(popped, vec![Bytes::from_static(b"a")]);
        assert_eq!(list.len().await, 1);
    }

    #[tokio::test]
    async fn prepend_reverses_insertion_order_at_head() {
        let list = ListHandle::new();
        list.append([Bytes::from_static(b"a")]).await;
        list.prepend([Bytes::from_static(b"x"), Bytes::from_static(b"y")]).await;
        let all = list.range(0, -1).await;
        assert_eq!(all, vec![Bytes::from_static(b"y"), Bytes::from_static(b"x"), Bytes::from_static(b"a")]);
    }

    #[tokio::test]
    async fn range_supports_negative_indexing() {
        let list = ListHandle::new();
        list.append([b"a".as_slice(), b"b", b"c"].map(Bytes::from_static)).await;
        assert_eq!(list.range(-2, -1).await, vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        assert_eq!(list.range(0, 100).await, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
    }

    #[tokio::test]
    async fn range_on_empty_list_is_empty() {
        let list = ListHandle::new();
        assert_eq!(list.range(0, -1).await, Vec::<Bytes>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_pop_times_out_when_empty() {
        let list = ListHandle::new();
        let popped = list.blocking_pop(0.05).await;
        assert_eq!(popped, None);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_pop_wakes_on_push() {
        let list = ListHandle::new();

        let waiter = {
            let list = Arc::clone(&list);
            tokio::spawn(async move { list.blocking_pop(0.0).await })
        };

        tokio::task::yield_now().await;
        list.append([Bytes::from_static(b"item")]).await;

        let result = waiter.await.unwrap();
        assert_eq!(result, Some(Bytes::from_static(b"item")));
    }
}

//! Publish Queue: a fixed-capacity ring buffer of owned payloads, coupling
//! application threads to the session thread. Guarded by a single mutex so
//! `put`/`get` are serializable with respect to each other.

use std::sync::Mutex;

use crate::error::Error;

/// The kind of a queued publish.
#[derive(Debug, Clone)]
pub enum PublishKind {
    /// An ad-hoc publish to an application-chosen topic (`publish(topic, payload)`).
    UserTopic(String),
    Status,
    Data,
    Config,
    Resource,
    CommandResponse,
}

/// A queued, heap-owned publish. Ownership transfers from producer to queue
/// to the session thread, which frees it after the publish attempt
/// regardless of outcome.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub kind: PublishKind,
    pub payload: Vec<u8>,
}

struct Inner<const N: usize> {
    slots: Vec<Option<QueueEntry>>,
    iread: usize,
    iwrite: usize,
}

/// A bounded, mutex-guarded single-producer*-safe queue (the mutex makes it
/// safe for any number of producer threads) of capacity `N`.
pub struct PublishQueue<const N: usize> {
    inner: Mutex<Inner<N>>,
}

impl<const N: usize> Default for PublishQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PublishQueue<N> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: (0..N).map(|_| None).collect(),
                iread: 0,
                iwrite: 0,
            }),
        }
    }

    /// Enqueue an entry. Fails without overwriting anything if the next
    /// slot is already occupied.
    pub fn put(&self, entry: QueueEntry) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        let iwrite = inner.iwrite;
        if inner.slots[iwrite].is_some() {
            return Err(Error::QueueFull);
        }
        inner.slots[iwrite] = Some(entry);
        inner.iwrite = (iwrite + 1) % N;
        Ok(())
    }

    /// Dequeue the oldest pending entry, if any.
    pub fn get(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().unwrap();
        if inner.iread == inner.iwrite && inner.slots[inner.iread].is_none() {
            return None;
        }
        let iread = inner.iread;
        let entry = inner.slots[iread].take();
        if entry.is_some() {
            inner.iread = (iread + 1) % N;
        }
        entry
    }

    /// Free all pending entries.
    pub fn purge(&self) {
        let mut inner = self.inner.lock().unwrap();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.iread = 0;
        inner.iwrite = 0;
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u8) -> QueueEntry {
        QueueEntry {
            kind: PublishKind::Status,
            payload: vec![tag],
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let q: PublishQueue<4> = PublishQueue::new();
        q.put(entry(1)).unwrap();
        q.put(entry(2)).unwrap();
        assert_eq!(q.get().unwrap().payload, vec![1]);
        assert_eq!(q.get().unwrap().payload, vec![2]);
        assert!(q.get().is_none());
    }

    #[test]
    fn put_fails_without_overwrite_when_full() {
        let q: PublishQueue<2> = PublishQueue::new();
        q.put(entry(1)).unwrap();
        q.put(entry(2)).unwrap();
        assert_eq!(q.put(entry(3)), Err(Error::QueueFull));
        assert_eq!(q.get().unwrap().payload, vec![1]);
        assert_eq!(q.get().unwrap().payload, vec![2]);
    }

    #[test]
    fn purge_drops_all_pending() {
        let q: PublishQueue<4> = PublishQueue::new();
        q.put(entry(1)).unwrap();
        q.put(entry(2)).unwrap();
        q.purge();
        assert!(q.get().is_none());
        q.put(entry(3)).unwrap();
        assert_eq!(q.get().unwrap().payload, vec![3]);
    }
}

//! Deferred calls drained by the frame driver.
//!
//! Anything may post a message through a [`MessageSender`] (background
//! loaders hold clones on their own threads). Only the main thread flushes.
//! A flush keeps draining until the queue is empty, so messages posted by a
//! handler during the flush are delivered in the same flush.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// A deferred call. Receives nothing and returns nothing; handlers capture
/// what they need.
pub type Message = Box<dyn FnOnce() + Send>;

/// Cloneable posting end of the queue.
#[derive(Clone)]
pub struct MessageSender {
    tx: Sender<Message>,
}

impl MessageSender {
    /// Post a message. Silently dropped if the queue has been destroyed.
    pub fn push(&self, message: impl FnOnce() + Send + 'static) {
        if self.tx.send(Box::new(message)).is_err() {
            tracing::trace!("message posted after queue shutdown, dropped");
        }
    }
}

impl std::fmt::Debug for MessageSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender").finish_non_exhaustive()
    }
}

/// The queue owned by the engine context.
pub struct MessageQueue {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    flushed_total: u64,
}

impl MessageQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            flushed_total: 0,
        }
    }

    pub fn sender(&self) -> MessageSender {
        MessageSender {
            tx: self.tx.clone(),
        }
    }

    /// Post from the owning thread.
    pub fn push(&self, message: impl FnOnce() + Send + 'static) {
        // The queue holds its own receiver, so sending cannot fail here.
        let _ = self.tx.send(Box::new(message));
    }

    /// Number of messages waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Deliver every pending message, including those posted while flushing.
    /// Returns the number delivered.
    pub fn flush(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            match self.rx.try_recv() {
                Ok(message) => {
                    message();
                    delivered += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.flushed_total += delivered as u64;
        delivered
    }

    /// Messages delivered since construction.
    pub fn flushed_total(&self) -> u64 {
        self.flushed_total
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("pending", &self.rx.len())
            .field("flushed_total", &self.flushed_total)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn flush_delivers_in_post_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = MessageQueue::new();
        for i in 0..5 {
            let log = Arc::clone(&log);
            queue.push(move || log.lock().unwrap().push(i));
        }
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.flush(), 5);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn messages_posted_during_flush_are_delivered_same_flush() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut queue = MessageQueue::new();
        let sender = queue.sender();
        let inner_log = Arc::clone(&log);
        queue.push(move || {
            inner_log.lock().unwrap().push("outer");
            let nested = Arc::clone(&inner_log);
            sender.push(move || nested.lock().unwrap().push("nested"));
        });

        assert_eq!(queue.flush(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "nested"]);
        assert_eq!(queue.flushed_total(), 2);
    }

    #[test]
    fn background_thread_can_post() {
        let hits = Arc::new(Mutex::new(0));
        let mut queue = MessageQueue::new();
        let sender = queue.sender();
        let h = Arc::clone(&hits);
        std::thread::spawn(move || sender.push(move || *h.lock().unwrap() += 1))
            .join()
            .unwrap();
        queue.flush();
        assert_eq!(*hits.lock().unwrap(), 1);
    }
}

//! # Delay Queues
//!
//! A [`MessageQueue`] holds outbound messages until their release time.
//! Messages leave in queue order; a message that is not yet due never blocks
//! a later one that is.

use mirage_shared::ConnectionId;

/// One outbound payload waiting for its release time.
#[derive(Clone, Debug, PartialEq)]
pub struct QueuedMessage {
    /// Target connection ([`ConnectionId::SERVER`] for client→server).
    pub connection: ConnectionId,
    /// Owned copy of the payload, taken at send time.
    pub bytes: Box<[u8]>,
    /// Seconds on the simulation clock at or after which the message is due.
    pub release_time: f64,
}

impl QueuedMessage {
    /// Copies `payload` into a new message.
    #[must_use]
    pub fn new(connection: ConnectionId, payload: &[u8], release_time: f64) -> Self {
        Self {
            connection,
            bytes: payload.into(),
            release_time,
        }
    }

    /// True once `now` has reached the release time.
    #[inline]
    #[must_use]
    pub fn is_due(&self, now: f64) -> bool {
        self.release_time <= now
    }
}

/// Ordered list of delayed messages.
#[derive(Clone, Debug, Default)]
pub struct MessageQueue {
    messages: Vec<QueuedMessage>,
}

impl MessageQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends at the tail.
    pub fn push_back(&mut self, message: QueuedMessage) {
        self.messages.push(message);
    }

    /// Inserts at `index`; anything past the tail lands at the tail.
    pub fn insert(&mut self, index: usize, message: QueuedMessage) {
        let index = index.min(self.messages.len());
        self.messages.insert(index, message);
    }

    /// Release time of the tail message.
    #[must_use]
    pub fn last_release_time(&self) -> Option<f64> {
        self.messages.last().map(|message| message.release_time)
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drops every queued message, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let cleared = self.messages.len();
        self.messages.clear();
        cleared
    }

    /// Queued messages in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }

    /// Hands every due message to `deliver` in queue order and removes it.
    ///
    /// Messages that stay keep their relative order. Returns the number of
    /// delivered messages.
    pub fn flush_due<F>(&mut self, now: f64, mut deliver: F) -> usize
    where
        F: FnMut(&QueuedMessage),
    {
        // Invariant: messages[..write] are the kept messages seen so far, in
        // their original order. Everything in messages[write..read] is
        // delivered and waits to be truncated.
        let mut write = 0;
        for read in 0..self.messages.len() {
            if self.messages[read].is_due(now) {
                deliver(&self.messages[read]);
            } else {
                self.messages.swap(write, read);
                write += 1;
            }
        }

        let delivered = self.messages.len() - write;
        self.messages.truncate(write);
        delivered
    }
}

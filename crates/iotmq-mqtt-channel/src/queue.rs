//! Bounded offline publish queue.

use std::collections::VecDeque;

use iotmq_protocol::QueuedMessage;

use crate::config::QueueFullPolicy;
use crate::error::{MqttError, MqttResult};

/// What happened to a message handed to [`OfflineQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Appended,
    /// Appended after evicting the oldest message.
    EvictedOldest,
    /// Queue full and keeping the oldest; the new message was discarded.
    Dropped,
}

/// FIFO of messages published while the connection was down.
#[derive(Debug)]
pub struct OfflineQueue {
    messages: VecDeque<QueuedMessage>,
    bound: usize,
    policy: QueueFullPolicy,
}

impl OfflineQueue {
    pub fn new(bound: usize, policy: QueueFullPolicy) -> MqttResult<Self> {
        if bound == 0 {
            return Err(MqttError::InvalidArgument(
                "offline queue bound must be > 0".into(),
            ));
        }
        Ok(Self {
            messages: VecDeque::with_capacity(bound.min(1024)),
            bound,
            policy,
        })
    }

    pub fn enqueue(&mut self, message: QueuedMessage) -> Enqueued {
        if self.messages.len() < self.bound {
            self.messages.push_back(message);
            return Enqueued::Appended;
        }
        match self.policy {
            QueueFullPolicy::KeepOldest => Enqueued::Dropped,
            QueueFullPolicy::KeepNewest => {
                self.messages.pop_front();
                self.messages.push_back(message);
                Enqueued::EvictedOldest
            }
        }
    }

    pub fn pop_front(&mut self) -> Option<QueuedMessage> {
        self.messages.pop_front()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedMessage> {
        self.messages.iter()
    }
}

//! Ordered, completable queues feeding pull-based transcript consumers.

use crate::error::{Result, TranscriberError};
use async_channel::{Receiver, Sender, TrySendError};
use futures_util::Stream;

/// What a bounded conduit does when a publish finds it full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Suspend the publisher until a consumer makes room
    #[default]
    Block,
    /// Evict the oldest queued item
    DropOldest,
    /// Reject the publish with `ConduitOverflow`
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConduitCapacity {
    #[default]
    Unbounded,
    Bounded {
        capacity: usize,
        overflow: OverflowPolicy,
    },
}

impl ConduitCapacity {
    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        ConduitCapacity::Bounded {
            capacity: capacity.max(1),
            overflow,
        }
    }
}

/// A FIFO conduit. Clones share the same channel; concurrent readers
/// compete for items, so every item is delivered to exactly one reader.
pub struct Conduit<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
    capacity: ConduitCapacity,
}

impl<T> Clone for Conduit<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: self.receiver.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> std::fmt::Debug for Conduit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conduit")
            .field("len", &self.receiver.len())
            .field("completed", &self.sender.is_closed())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> Conduit<T> {
    pub fn new(capacity: ConduitCapacity) -> Self {
        let (sender, receiver) = match capacity {
            ConduitCapacity::Unbounded => async_channel::unbounded(),
            ConduitCapacity::Bounded { capacity, .. } => async_channel::bounded(capacity.max(1)),
        };
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(ConduitCapacity::Unbounded)
    }

    /// Append an item. Items published after completion are discarded.
    pub async fn publish(&self, item: T) -> Result<()> {
        match self.capacity {
            ConduitCapacity::Unbounded
            | ConduitCapacity::Bounded {
                overflow: OverflowPolicy::DropOldest,
                ..
            } => {
                if let Ok(Some(_)) = self.sender.force_send(item) {
                    log::trace!("Conduit full, evicted oldest item");
                }
                Ok(())
            }
            ConduitCapacity::Bounded {
                capacity,
                overflow: OverflowPolicy::Fail,
            } => match self.sender.try_send(item) {
                Err(TrySendError::Full(_)) => Err(TranscriberError::ConduitOverflow(capacity)),
                Ok(()) | Err(TrySendError::Closed(_)) => Ok(()),
            },
            ConduitCapacity::Bounded {
                overflow: OverflowPolicy::Block,
                ..
            } => {
                // A closed channel releases a blocked send; the item is dropped
                let _ = self.sender.send(item).await;
                Ok(())
            }
        }
    }

    /// Take the next item without waiting
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next item. Returns `None` once the conduit is completed
    /// and drained.
    pub async fn recv(&self) -> Option<T> {
        self.receiver.recv().await.ok()
    }

    /// Mark the conduit finished. Returns false if it already was.
    pub fn complete(&self) -> bool {
        self.sender.close()
    }

    pub fn is_completed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Lazy sequence over the conduit, ending when it completes
    pub fn stream(&self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        self.receiver.clone()
    }
}

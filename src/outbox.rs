//! Per-client outbound queue
//!
//! A bounded FIFO of serialized payloads with an explicit close signal.
//! Senders (`Outbox`) are cloned into the Hub and into at most one Room;
//! the single receiver is owned by the connection's write task. Closing the
//! outbox is the only way the write task is told to stop, and it happens at
//! most once no matter how many holders try.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};

use crate::client::{Member, Participant};
use crate::error::DeliveryError;
use crate::types::ClientId;

/// A serialized outbound record, shared between all recipients of a broadcast
pub type Payload = Arc<str>;

#[derive(Debug, Default)]
struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

/// Sending half of a client's outbound queue
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<Payload>,
    signal: Arc<CloseSignal>,
}

/// Receiving half of a client's outbound queue
#[derive(Debug)]
pub struct OutboxReceiver {
    receiver: mpsc::Receiver<Payload>,
    signal: Arc<CloseSignal>,
    draining: bool,
}

/// Create a new outbound queue holding at most `capacity` payloads
pub fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    let signal = Arc::new(CloseSignal::default());
    (
        Outbox {
            sender,
            signal: signal.clone(),
        },
        OutboxReceiver {
            receiver,
            signal,
            draining: false,
        },
    )
}

impl Outbox {
    /// Try to enqueue without waiting
    ///
    /// Used by broadcast passes, which must never block on one recipient.
    pub fn try_deliver(&self, payload: Payload) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.sender.try_send(payload).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Enqueue, waiting for capacity
    ///
    /// Only for replies to the client whose own task is calling.
    pub async fn deliver(&self, payload: Payload) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.sender
            .send(payload)
            .await
            .map_err(|_| DeliveryError::Closed)
    }

    /// Close the queue
    ///
    /// Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if self.signal.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.signal.notify.notify_one();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.signal.closed.load(Ordering::Acquire)
    }
}

impl OutboxReceiver {
    /// Receive the next payload
    ///
    /// After the outbox is closed, payloads already queued are still
    /// returned, then `None`.
    pub async fn recv(&mut self) -> Option<Payload> {
        if !self.draining {
            if self.signal.closed.load(Ordering::Acquire) {
                self.start_draining();
            } else {
                tokio::select! {
                    biased;
                    payload = self.receiver.recv() => return payload,
                    _ = self.signal.notify.notified() => self.start_draining(),
                }
            }
        }
        self.receiver.recv().await
    }

    /// Take a queued payload if one is immediately available
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.receiver.try_recv().ok()
    }

    fn start_draining(&mut self) {
        self.receiver.close();
        self.draining = true;
    }
}

/// One broadcast pass over a member set
///
/// Delivers `payload` to every member except `sender`. Members whose outbox
/// is full or closed are closed and removed from `members`; they are
/// returned so the caller can log them.
pub fn broadcast_pass(
    members: &mut HashMap<ClientId, Member>,
    payload: &Payload,
    sender: Option<ClientId>,
) -> Vec<Member> {
    let unresponsive: Vec<ClientId> = members
        .iter()
        .filter(|(id, _)| Some(**id) != sender)
        .filter_map(|(id, member)| {
            member
                .outbox()
                .try_deliver(payload.clone())
                .err()
                .map(|_| *id)
        })
        .collect();

    unresponsive
        .into_iter()
        .filter_map(|id| members.remove(&id))
        .inspect(|member| {
            member.outbox().close();
        })
        .collect()
}

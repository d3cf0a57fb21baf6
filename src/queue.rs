use crate::event::ExportEvent;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

/// What travels between the tracking loop and the sender.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Event(ExportEvent),
    /// Drain-and-terminate sentinel, sent once at end of stream.
    Stop,
}

/// Producer half of the delivery queue. Pushing never blocks the
/// tracking loop: a full queue hands the event back so the caller can
/// spool it instead.
#[derive(Clone)]
pub struct QueueSender {
    tx: Sender<QueueItem>,
}

/// Consumer half, owned by the sender loop.
pub struct QueueReceiver {
    rx: Receiver<QueueItem>,
}

/// Bounded FIFO hand-off between driver and sender.
pub fn delivery_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

impl QueueSender {
    /// Non-blocking push. `Err` returns the event to the caller when the
    /// queue is full (or the consumer is gone).
    pub fn push(&self, event: ExportEvent) -> Result<(), ExportEvent> {
        match self.tx.try_send(QueueItem::Event(event)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(QueueItem::Event(event)))
            | Err(TrySendError::Disconnected(QueueItem::Event(event))) => Err(event),
            Err(_) => unreachable!("only events are pushed here"),
        }
    }

    /// Signal the consumer to drain and terminate. Blocks until there is
    /// room; the sentinel must not be lost.
    pub fn push_stop(&self) {
        let _ = self.tx.send(QueueItem::Stop);
    }
}

impl QueueReceiver {
    /// Take one item if immediately available.
    pub fn try_take(&self) -> Option<QueueItem> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

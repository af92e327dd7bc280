use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use crate::wait_node::WaitNode;

/// Consumer of tracker notifications.
///
/// Both methods run synchronously on the thread that resolved the node or
/// drained the queue, while the tracker's drain lock may be held. They must
/// not call back into the same tracker's `post`, `many_post` or `drain`.
pub trait AckCallback: Send + Sync {
    /// Fired exactly once per node when it leaves the pending state.
    fn on_node_resolved(&self, node: &WaitNode);

    /// Fired when the acknowledged watermark moves to `acked_seq`; `node` is
    /// the last node popped by the drain that moved it.
    fn on_sequence_advanced(&self, acked_seq: u64, node: &WaitNode);
}

impl<C: AckCallback + ?Sized> AckCallback for Arc<C> {
    fn on_node_resolved(&self, node: &WaitNode) {
        (**self).on_node_resolved(node)
    }

    fn on_sequence_advanced(&self, acked_seq: u64, node: &WaitNode) {
        (**self).on_sequence_advanced(acked_seq, node)
    }
}

/// Notification forwarded by [`ChannelCallback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckEvent {
    NodeResolved(WaitNode),
    SequenceAdvanced { acked_seq: u64, node: WaitNode },
}

/// Forwards notifications to an owning consumer over an unbounded channel,
/// keeping consumer work off the completing thread. Event order matches
/// callback order.
#[derive(Debug)]
pub struct ChannelCallback {
    tx: Mutex<Sender<AckEvent>>,
}

impl ChannelCallback {
    pub fn new() -> (Self, Receiver<AckEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, event: AckEvent) {
        // receiver gone means nobody is listening any more
        let _ = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(event);
    }
}

impl AckCallback for ChannelCallback {
    fn on_node_resolved(&self, node: &WaitNode) {
        self.send(AckEvent::NodeResolved(node.clone()));
    }

    fn on_sequence_advanced(&self, acked_seq: u64, node: &WaitNode) {
        self.send(AckEvent::SequenceAdvanced {
            acked_seq,
            node: node.clone(),
        });
    }
}

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use super::messages::{Broadcast, Message, Reply, Sender};

#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("Dispatcher is not running")]
    Closed,

    #[error("Dispatcher dropped the request without replying")]
    NoReply,
}

/// A request in flight to the dispatcher
#[derive(Debug)]
pub struct Envelope {
    pub sender: Sender,
    pub message: Message,
    /// Present for request/reply, absent for fire-and-forget
    pub reply: Option<oneshot::Sender<Reply>>,
}

/// Handle used by every surface to reach the dispatcher
///
/// Every message also goes out on the broadcast side so other surfaces
/// (recorder tabs listening for `STOP_RECORDING`) observe it.
#[derive(Clone)]
pub struct BusClient {
    requests: mpsc::Sender<Envelope>,
    broadcast: broadcast::Sender<Broadcast>,
}

impl BusClient {
    pub(crate) fn new(
        requests: mpsc::Sender<Envelope>,
        broadcast: broadcast::Sender<Broadcast>,
    ) -> Self {
        Self { requests, broadcast }
    }

    /// Send a message and wait for the single reply
    pub async fn request(&self, sender: Sender, message: Message) -> Result<Reply, BusError> {
        debug!("bus request {} from {:?}", message.kind(), sender.tab);
        self.publish(sender, &message);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Envelope {
                sender,
                message,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| BusError::Closed)?;

        reply_rx.await.map_err(|_| BusError::NoReply)
    }

    /// Send a message without waiting for a reply
    pub async fn notify(&self, sender: Sender, message: Message) -> Result<(), BusError> {
        debug!("bus notify {} from {:?}", message.kind(), sender.tab);
        self.publish(sender, &message);

        self.requests
            .send(Envelope {
                sender,
                message,
                reply: None,
            })
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Broadcast a message to surfaces only, bypassing the dispatcher
    pub fn publish(&self, sender: Sender, message: &Message) {
        // No subscribers is fine
        let _ = self.broadcast.send(Broadcast {
            sender,
            message: message.clone(),
        });
    }

    /// Observe every message sent on the bus
    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.broadcast.subscribe()
    }

    /// Broadcast-only side of the bus; does not keep the dispatcher alive
    pub fn publisher(&self) -> Publisher {
        Publisher {
            broadcast: self.broadcast.clone(),
        }
    }
}

/// Publishes to bus subscribers without holding a request channel
#[derive(Clone)]
pub struct Publisher {
    broadcast: broadcast::Sender<Broadcast>,
}

impl Publisher {
    pub fn publish(&self, sender: Sender, message: &Message) {
        let _ = self.broadcast.send(Broadcast {
            sender,
            message: message.clone(),
        });
    }
}

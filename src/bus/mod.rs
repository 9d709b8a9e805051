//! Message passing between contexts
//!
//! Surfaces never share memory with the dispatcher. They send `Message`s
//! through a `BusClient` (request/single reply or fire-and-forget), and every
//! message is also broadcast so recorder surfaces can react to it.

pub mod client;
pub mod messages;

pub use client::{BusClient, BusError, Envelope, Publisher};
pub use messages::{Broadcast, Message, Reply, Sender};

use tokio::sync::{broadcast, mpsc};

/// Create a bus: the client side for surfaces and the receiving side for
/// the dispatcher service.
pub fn channel(capacity: usize) -> (BusClient, mpsc::Receiver<Envelope>) {
    let (requests_tx, requests_rx) = mpsc::channel(capacity);
    let (broadcast_tx, _) = broadcast::channel(capacity);
    (BusClient::new(requests_tx, broadcast_tx), requests_rx)
}

//! Abstraction over the Bluetooth radio and the one peripheral the session talks to.
//!
//! The session manager is generic over [`Radio`], so the same lock / connect /
//! request sequence drives the real `bluest` backend and the in-memory
//! [`crate::simulator`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Failures reported by a transport backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No usable Bluetooth adapter on this host.
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,
    /// The peripheral does not expose the BMS service.
    #[error("BMS service {0} not found on device")]
    ServiceNotFound(String),
    /// The BMS service does not expose the data characteristic.
    #[error("BMS characteristic {0} not found on device")]
    CharacteristicNotFound(String),
    /// A write or subscription was attempted before service discovery.
    #[error("services have not been discovered")]
    NotDiscovered,
    /// The peripheral is not connected.
    #[error("device is not connected")]
    NotConnected,
    /// The notification subscription ended before a frame was complete.
    #[error("notification stream closed")]
    NotificationsClosed,
    /// Error reported by the platform Bluetooth stack.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Power state of the local Bluetooth radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    PoweredOn,
    PoweredOff,
    Unknown,
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone)]
pub struct Advertisement<P> {
    /// Name reported by the platform for the device.
    pub name: Option<String>,
    /// Local name carried in the advertising data.
    pub local_name: Option<String>,
    pub peripheral: P,
}

/// The local Bluetooth adapter.
#[async_trait]
pub trait Radio: Send + Sync {
    type Peripheral: Peripheral + 'static;

    async fn state(&self) -> Result<RadioState, TransportError>;

    /// Starts scanning. Scanning stops when the returned stream is dropped.
    async fn scan(
        &self,
    ) -> Result<BoxStream<'_, Advertisement<Self::Peripheral>>, TransportError>;
}

/// One BMS peripheral exposing the combined write / notify characteristic.
#[async_trait]
pub trait Peripheral: Clone + Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    /// Discovers all services and characteristics and resolves the BMS characteristic.
    async fn discover(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> Result<bool, TransportError>;

    async fn cancel_connection(&self) -> Result<(), TransportError>;

    /// Writes one command frame to the characteristic, with response.
    async fn write(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Subscribes to characteristic notifications.
    async fn notifications(&self) -> Result<Notifications, TransportError>;

    /// Resolves once the platform reports that the link dropped.
    async fn wait_disconnected(&self) -> Result<(), TransportError>;
}

/// Sending half used by backends to deliver notification payloads.
pub type NotificationSender = mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>;

/// An active notification subscription.
///
/// Dropping the handle, or calling [`Notifications::cancel`], closes the
/// channel and stops any forwarding task the backend spawned.
#[derive(Debug)]
pub struct Notifications {
    rx: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Notifications {
    /// Creates a subscription fed through the returned sender.
    pub fn channel() -> (NotificationSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, forwarder: None })
    }

    /// Creates a subscription whose payloads are pumped by `forwarder`.
    pub fn with_forwarder(
        rx: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
        forwarder: JoinHandle<()>,
    ) -> Self {
        Self {
            rx,
            forwarder: Some(forwarder),
        }
    }

    /// Next notification, or `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        self.rx.recv().await
    }

    /// Tears the subscription down.
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.rx.close();
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl Drop for Notifications {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_closes_sender() {
        let (tx, mut notifications) = Notifications::channel();
        tx.send(Ok(vec![1, 2, 3])).unwrap();
        assert_eq!(notifications.next().await, Some(Ok(vec![1, 2, 3])));
        assert!(!tx.is_closed());
        notifications.cancel();
        assert!(tx.is_closed());
        assert!(tx.send(Ok(vec![4])).is_err());
    }

    #[tokio::test]
    async fn drop_aborts_forwarder() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let forwarder = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });
        drop(Notifications::with_forwarder(rx, forwarder));
        // the sender half is only dropped once the aborted task is torn down
        assert!(alive_rx.await.is_err());
    }
}

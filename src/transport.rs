use core::fmt::Display;
use core::future::Future;

use tokio::sync::mpsc::UnboundedSender;

/// The byte-oriented link a [`ClientEngine`](crate::client::ClientEngine)
/// talks through.
///
/// Implementations own the link-layer framing (HDLC, the IP wrapper, ...).
/// Every frame they hand to the reception channel must hold exactly one
/// complete APDU, and every slice passed to [`send`](Transport::send) is one
/// complete APDU to be framed and written.
///
/// Inbound frames are delivered asynchronously: the engine registers a
/// channel with [`set_reception`](Transport::set_reception) after
/// [`connect`](Transport::connect) and drains it from a background task, so
/// replies and unsolicited notifications share the same path.
///
/// # Example
///
/// A loopback that answers every request with a canned reply:
///
/// ```
/// use dlms_engine::transport::Transport;
/// use tokio::sync::mpsc::UnboundedSender;
///
/// struct Loopback {
///     reply: Vec<u8>,
///     reception: Option<UnboundedSender<Vec<u8>>>,
///     open: bool,
/// }
///
/// impl Transport for Loopback {
///     type Error = std::io::Error;
///
///     async fn connect(&mut self) -> Result<(), Self::Error> {
///         self.open = true;
///         Ok(())
///     }
///
///     async fn disconnect(&mut self) -> Result<(), Self::Error> {
///         self.open = false;
///         self.reception = None;
///         Ok(())
///     }
///
///     fn is_connected(&self) -> bool {
///         self.open
///     }
///
///     fn set_reception(&mut self, reception: UnboundedSender<Vec<u8>>) {
///         self.reception = Some(reception);
///     }
///
///     async fn send(&mut self, _apdu: &[u8]) -> Result<(), Self::Error> {
///         if let Some(reception) = &self.reception {
///             let _ = reception.send(self.reply.clone());
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Transport: Send + 'static {
    /// The error type returned by transport operations.
    type Error: Display + Send;

    fn connect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn disconnect(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn is_connected(&self) -> bool;

    /// Registers where inbound frames are delivered. Replaces any earlier
    /// registration.
    fn set_reception(&mut self, reception: UnboundedSender<Vec<u8>>);

    /// Writes one APDU. Returns once the frame is handed to the link, not
    /// when a reply arrives.
    fn send(&mut self, apdu: &[u8]) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

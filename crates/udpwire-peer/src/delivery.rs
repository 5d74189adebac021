/// Delivery status of a tracked outbound packet.
///
/// `Dropped` means no acknowledgment arrived within the trailing window; it is
/// an inference, not a certainty. Whether to resend is the application's
/// decision, never this layer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    /// Sent, no acknowledgment seen yet.
    Pending,
    /// Acknowledged by the peer.
    Successful,
    /// Fell out of the acknowledgment window without being acknowledged.
    Dropped,
}

/// Caller-visible delivery result for one outbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketResult {
    /// Sequence number the payload rode on.
    pub sequence_number: u16,
    /// Last observed delivery status.
    pub status: PacketStatus,
}

/// Callback invoked once when a pending packet resolves to `Successful` or
/// `Dropped`. Runs on the driver-loop thread after the connection's internal
/// locks have been released.
pub type AckCallback = Box<dyn FnOnce(u16, PacketStatus) + Send>;

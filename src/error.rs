use thiserror::Error;

/// Errors surfaced by the RLC entities and their codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RlcError {
    /// Malformed PDU header: reserved bits set, truncated octets, or a
    /// field value the wire format forbids.
    #[error("malformed PDU: {0}")]
    Decode(&'static str),
    /// Sequence number outside the receive window.
    #[error("sequence number outside window")]
    WindowViolation,
    /// The buffer pool had no free region; the input was dropped.
    #[error("buffer pool exhausted")]
    PoolExhausted,
    /// A PDU reached the configured retransmission limit. The entity is
    /// faulted until `reset()`.
    #[error("maximum retransmissions reached")]
    RetxExceeded,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Payload would exceed the buffer capacity. Nothing is written.
    #[error("payload exceeds buffer capacity")]
    BufferOverflow,
}

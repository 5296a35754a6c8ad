//! # RLC Acknowledged Mode
//!
//! Radio Link Control entities providing lossless, in-order SDU delivery
//! over a lossy link: segmentation and concatenation into byte-budgeted
//! PDUs, selective-repeat retransmission driven by peer status reports, and
//! bit-exact packing of the LTE and NR header layouts.
//!
//! ## Architecture
//!
//! - **Entities**: [`NrAmEntity`] (12/18-bit sequence numbers, SI/SO
//!   segmentation) and [`LteAmEntity`] (10-bit sequence numbers, SDU
//!   concatenation with length indicators). One entity per bidirectional
//!   logical channel; entities are passive objects with no threads of their
//!   own.
//! - **Memory**: all payload storage comes from an injected [`BufferPool`];
//!   buffer ownership moves one-shot between queue, window and delivery.
//! - **Time**: entities sample an injected [`Clock`]; timer expirations are
//!   dispatched from `run_timers`, never reentrantly.
//! - **Upward interface**: reassembled SDUs and escalations are drained as
//!   [`RlcEvent`]s.

pub mod config;
pub mod error;
pub mod lte;
pub mod nr;
pub mod packing;
pub mod pool;
mod reassembly;
pub mod sn;
pub mod timers;
pub mod window;

pub use config::{AmConfig, SnFieldLength};
pub use error::RlcError;
pub use lte::LteAmEntity;
pub use nr::NrAmEntity;
pub use pool::{BufferPool, ByteBuffer, BUFFER_CAPACITY};
pub use sn::{Sn, SnSpace};
pub use timers::{Clock, ManualClock, SystemClock};

/// Upward notifications from an entity.
#[derive(Debug)]
pub enum RlcEvent {
    /// A complete SDU, delivered exactly once and in order.
    SduDelivered { lcid: u32, sdu: ByteBuffer },
    /// A PDU hit the retransmission limit; the entity is faulted until
    /// reset.
    MaxRetxAttempted { lcid: u32 },
}

/// Per-entity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmMetrics {
    pub num_tx_pdus: u64,
    pub num_rx_pdus: u64,
    pub num_tx_pdu_bytes: u64,
    pub num_rx_pdu_bytes: u64,
    pub num_retx: u64,
    pub num_malformed: u64,
    pub num_out_of_window: u64,
}

//! NR acknowledged-mode entity (12- or 18-bit sequence numbers, one SDU per
//! sequence number, SI/SO segmentation).

mod rx;
mod tx;

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::{AmConfig, SnFieldLength};
use crate::error::RlcError;
use crate::packing::nr::{self, NrSnSize};
use crate::packing::{self, SegmentInfo};
use crate::pool::{BufferPool, ByteBuffer};
use crate::sn::{Sn, SnSpace};
use crate::timers::Clock;
use crate::{AmMetrics, RlcEvent};

use rx::NrRx;
use tx::NrTx;

/// A bidirectional NR AM entity over one logical channel.
///
/// The entity is passive: all state changes happen inside `write_sdu`,
/// `read_pdu`, `write_pdu` and `run_timers`, which the caller serializes
/// (exclusive access is enforced by `&mut self`). Upward deliveries and
/// escalations are queued as [`RlcEvent`]s.
pub struct NrAmEntity {
    lcid: u32,
    clock: Arc<dyn Clock>,
    tx: NrTx,
    rx: NrRx,
    events: VecDeque<RlcEvent>,
    metrics: AmMetrics,
    faulted: bool,
    sn_size: NrSnSize,
}

impl NrAmEntity {
    pub fn new(
        lcid: u32,
        cfg: AmConfig,
        pool: BufferPool,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RlcError> {
        cfg.validate()?;
        let sn_size = match cfg.sn_field_length {
            SnFieldLength::Bits12 => NrSnSize::Size12,
            SnFieldLength::Bits18 => NrSnSize::Size18,
            SnFieldLength::Bits10 => {
                return Err(RlcError::InvalidConfig("10-bit SN selects the LTE entity"))
            }
        };
        let space = SnSpace::new(sn_size.width());
        Ok(Self {
            lcid,
            clock,
            tx: NrTx::new(&cfg, space, sn_size),
            rx: NrRx::new(&cfg, space, sn_size, pool),
            events: VecDeque::new(),
            metrics: AmMetrics::default(),
            faulted: false,
            sn_size,
        })
    }

    pub fn lcid(&self) -> u32 {
        self.lcid
    }

    /// Accepts one SDU from the upper layer.
    pub fn write_sdu(&mut self, sdu: ByteBuffer) -> Result<(), RlcError> {
        if self.faulted {
            return Err(RlcError::RetxExceeded);
        }
        if sdu.is_empty() {
            warn!("lcid={} dropping empty SDU", self.lcid);
            return Ok(());
        }
        self.tx.enqueue_sdu(sdu);
        Ok(())
    }

    /// Fills `buf` with at most one PDU; the slice length is the byte
    /// budget. Returns the bytes written (0 when idle or the budget is too
    /// small for a header plus one payload byte).
    pub fn read_pdu(&mut self, buf: &mut [u8]) -> usize {
        if self.faulted || buf.is_empty() {
            return 0;
        }
        let now = self.clock.now();
        if self.rx.status_due(now) {
            return match self.rx.build_status(buf, now) {
                Some(n) => {
                    self.metrics.num_tx_pdus += 1;
                    self.metrics.num_tx_pdu_bytes += n as u64;
                    n
                }
                None => 0,
            };
        }
        let n = self.tx.read(buf, now);
        if n > 0 {
            self.metrics.num_tx_pdus += 1;
            self.metrics.num_tx_pdu_bytes += n as u64;
        }
        n
    }

    /// Accepts one PDU from the lower layer (data or status).
    pub fn write_pdu(&mut self, bytes: &[u8]) {
        if self.faulted || bytes.is_empty() {
            return;
        }
        let now = self.clock.now();
        if packing::is_control(bytes[0]) {
            match nr::read_status(bytes, self.sn_size) {
                Ok(status) => {
                    self.metrics.num_rx_pdus += 1;
                    self.metrics.num_rx_pdu_bytes += bytes.len() as u64;
                    let outcome = self.tx.handle_status(&status);
                    if outcome.max_retx_reached {
                        self.escalate();
                    }
                }
                Err(e) => {
                    self.metrics.num_malformed += 1;
                    warn!("lcid={} dropping control PDU: {}", self.lcid, e);
                }
            }
            return;
        }
        match nr::read_data_header(bytes, self.sn_size) {
            Ok((header, hdr_len)) => {
                self.metrics.num_rx_pdus += 1;
                self.metrics.num_rx_pdu_bytes += bytes.len() as u64;
                let delivered = self.rx.handle_data(&header, &bytes[hdr_len..], now);
                for sdu in delivered {
                    self.events.push_back(RlcEvent::SduDelivered {
                        lcid: self.lcid,
                        sdu,
                    });
                }
            }
            Err(e) => {
                self.metrics.num_malformed += 1;
                warn!("lcid={} dropping data PDU: {}", self.lcid, e);
            }
        }
    }

    /// Advisory byte demand: pending status, retransmissions and queued
    /// SDUs, headers included.
    pub fn get_buffer_state(&self) -> usize {
        if self.faulted {
            return 0;
        }
        let now = self.clock.now();
        self.rx.status_size(now) + self.tx.buffer_state()
    }

    /// Drains one queued upward event.
    pub fn poll_event(&mut self) -> Option<RlcEvent> {
        self.events.pop_front()
    }

    /// Dispatches any timer expirations. Driven by the external timer
    /// service; expiry actions run here, never reentrantly.
    pub fn run_timers(&mut self) {
        if self.faulted {
            return;
        }
        let now = self.clock.now();
        if self.tx.t_poll_retx.take_expiry(now) {
            let outcome = self.tx.on_poll_retx_expiry();
            if outcome.max_retx_reached {
                self.escalate();
                return;
            }
        }
        if self.rx.t_reordering.take_expiry(now) {
            self.rx.on_reordering_expiry(now);
        }
    }

    /// Clears all state, queues and timers; the entity starts over at
    /// sequence number zero.
    pub fn reset(&mut self) {
        debug!("lcid={} reset", self.lcid);
        self.tx.reset();
        self.rx.reset();
        self.events.clear();
        self.faulted = false;
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn metrics(&self) -> AmMetrics {
        let mut m = self.metrics;
        m.num_retx = self.tx.num_retx;
        m.num_out_of_window = self.rx.num_out_of_window;
        m
    }

    /// The smallest useful read budget: a full-SDU header plus one byte.
    pub fn min_read_budget(&self) -> usize {
        nr::data_header_len(SegmentInfo::Full, self.sn_size) + 1
    }

    /// Lowest unacknowledged transmit SN; modular-monotone over the
    /// entity's lifetime.
    pub fn lowest_unacked_sn(&self) -> Sn {
        self.tx.tx_next_ack()
    }

    /// Transmitted PDUs awaiting acknowledgment.
    pub fn unacked_pdus(&self) -> usize {
        self.tx.unacked_count()
    }

    fn escalate(&mut self) {
        error!("lcid={} maximum retransmissions reached", self.lcid);
        self.tx.fault();
        self.rx.t_reordering.stop();
        self.rx.t_status_prohibit.stop();
        self.faulted = true;
        self.events
            .push_back(RlcEvent::MaxRetxAttempted { lcid: self.lcid });
    }
}

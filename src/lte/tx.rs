//! LTE transmit side: concatenating PDU assembly, stored-PDU window,
//! retransmission and resegmentation.

use std::collections::VecDeque;
use std::time::Instant;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::AmConfig;
use crate::packing::lte::{
    self, FramingInfo, LteDataHeader, LteStatusPdu, ResegmentInfo, SO_END_OF_PDU,
};
use crate::pool::{BufferPool, ByteBuffer};
use crate::sn::{Sn, SnSpace};
use crate::timers::Timer;
use crate::window::SnMap;

/// A built PDU retained in the window until acknowledged. The payload is the
/// data field only; the header is re-packed on (re)transmission.
struct LteTxPdu {
    payload: ByteBuffer,
    fi: FramingInfo,
    li: SmallVec<[u16; 4]>,
    acked: bool,
    retx_count: u32,
}

impl LteTxPdu {
    /// Field layout of the data field as half-open byte spans.
    fn fields(&self) -> SmallVec<[(u32, u32); 4]> {
        let mut fields = SmallVec::new();
        let mut cursor = 0u32;
        for li in &self.li {
            fields.push((cursor, cursor + u32::from(*li)));
            cursor += u32::from(*li);
        }
        fields.push((cursor, self.payload.len() as u32));
        fields
    }

    /// Wire size of the stored PDU when retransmitted whole.
    fn packed_len(&self) -> usize {
        lte::data_header_len(false, self.li.len()) + self.payload.len()
    }
}

/// A pending retransmission span over a stored PDU's data field.
#[derive(Debug, Clone, Copy)]
struct Retx {
    sn: Sn,
    so: usize,
    end: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatusOutcome {
    pub max_retx_reached: bool,
}

pub(crate) struct LteTx {
    space: SnSpace,
    pool: BufferPool,
    queue: VecDeque<ByteBuffer>,
    queue_bytes: usize,
    /// SDU partially copied into an earlier PDU; its read offset has been
    /// advanced past the consumed part.
    current_sdu: Option<ByteBuffer>,
    window: SnMap<LteTxPdu>,
    vt_a: Sn,
    vt_s: Sn,
    retx_queue: VecDeque<Retx>,
    pdu_without_poll: u32,
    byte_without_poll: usize,
    poll_sn: Option<Sn>,
    force_poll: bool,
    poll_pdu: Option<u32>,
    poll_byte: Option<usize>,
    max_retx: u32,
    pub(crate) t_poll_retx: Timer,
    pub(crate) num_retx: u64,
}

impl LteTx {
    pub fn new(cfg: &AmConfig, space: SnSpace, pool: BufferPool) -> Self {
        Self {
            space,
            pool,
            queue: VecDeque::new(),
            queue_bytes: 0,
            current_sdu: None,
            window: SnMap::new(),
            vt_a: Sn(0),
            vt_s: Sn(0),
            retx_queue: VecDeque::new(),
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_sn: None,
            force_poll: false,
            poll_pdu: cfg.poll_pdu,
            poll_byte: cfg.poll_byte(),
            max_retx: cfg.max_retx_thresh,
            t_poll_retx: Timer::new(cfg.t_poll_retx_ms),
            num_retx: 0,
        }
    }

    pub fn vt_a(&self) -> Sn {
        self.vt_a
    }

    pub fn unacked_count(&self) -> usize {
        self.window.len()
    }

    pub fn enqueue_sdu(&mut self, sdu: ByteBuffer) {
        self.queue_bytes += sdu.len();
        self.queue.push_back(sdu);
    }

    pub fn read(&mut self, buf: &mut [u8], now: Instant) -> usize {
        if let Some(n) = self.read_retx(buf, now) {
            return n;
        }
        self.read_new(buf, now)
    }

    fn read_retx(&mut self, buf: &mut [u8], now: Instant) -> Option<usize> {
        loop {
            let front = *self.retx_queue.front()?;
            let whole = match self.window.get(front.sn) {
                Some(e) if !e.acked => front.so == 0 && front.end == e.payload.len(),
                _ => {
                    self.retx_queue.pop_front();
                    continue;
                }
            };

            if whole {
                let (fits, fi, li) = {
                    let entry = self.window.get(front.sn).expect("checked above");
                    (buf.len() >= entry.packed_len(), entry.fi, entry.li.clone())
                };
                if fits {
                    self.retx_queue.pop_front();
                    let header = LteDataHeader {
                        resegment: None,
                        poll: false,
                        fi,
                        sn: front.sn,
                        li,
                    };
                    return Some(self.emit(buf, front.sn, header, front.so, front.end, now));
                }
            }
            return Some(self.read_resegment(buf, front, now));
        }
    }

    /// Builds a PDU segment for the front retransmission span. Space is
    /// budget minus the grown header minus a two-octet reserve, matching the
    /// original assembler's arithmetic.
    fn read_resegment(&mut self, buf: &mut [u8], front: Retx, now: Instant) -> usize {
        let (fields, payload_len, orig_fi) = {
            let entry = self.window.get(front.sn).expect("caller checked");
            (entry.fields(), entry.payload.len(), entry.fi)
        };

        let mut head = lte::data_header_len(true, 0);
        let mut copied = 0usize;
        let mut seg_fields: SmallVec<[u16; 4]> = SmallVec::new();
        let mut cursor = front.so;

        for &(_, fe) in fields.iter() {
            if (fe as usize) <= cursor {
                continue;
            }
            if cursor >= front.end {
                break;
            }
            if !seg_fields.is_empty() {
                let new_head = lte::data_header_len(true, seg_fields.len());
                if buf.len() < new_head + copied + 1 + 2 {
                    break;
                }
                head = new_head;
            }
            let avail = buf.len().saturating_sub(head + copied + 2);
            if avail == 0 {
                break;
            }
            let field_left = (fe as usize).min(front.end) - cursor;
            let take = avail.min(field_left);
            seg_fields.push(take as u16);
            copied += take;
            cursor += take;
            if take < field_left {
                break;
            }
        }

        if copied == 0 {
            return 0;
        }

        // FI of the segment speaks about SDU boundaries, not PDU edges.
        let starts_mid = if front.so == 0 {
            orig_fi.starts_mid
        } else {
            !self.is_field_start(&fields, front.so as u32)
        };
        let ends_mid = if cursor == payload_len {
            orig_fi.ends_mid
        } else {
            !self.is_field_start(&fields, cursor as u32)
        };
        let lsf = cursor == payload_len;
        let li: SmallVec<[u16; 4]> = seg_fields[..seg_fields.len() - 1].iter().copied().collect();

        let header = LteDataHeader {
            resegment: Some(ResegmentInfo {
                lsf,
                so: front.so as u16,
            }),
            poll: false,
            fi: FramingInfo {
                starts_mid,
                ends_mid,
            },
            sn: front.sn,
            li,
        };

        // Keep the remainder at the queue front for the next budget.
        if cursor >= front.end {
            self.retx_queue.pop_front();
        } else {
            let held = self.retx_queue.front_mut().expect("caller checked");
            held.so = cursor;
        }

        self.emit(buf, front.sn, header, front.so, cursor, now)
    }

    fn is_field_start(&self, fields: &[(u32, u32)], off: u32) -> bool {
        fields.iter().any(|&(fs, _)| fs == off)
    }

    fn read_new(&mut self, buf: &mut [u8], now: Instant) -> usize {
        if self.queue.is_empty() && self.current_sdu.is_none() {
            return 0;
        }
        if !self.space.in_window(self.vt_a, self.vt_s) {
            debug!("tx window stalled at sn={}", self.vt_s);
            return 0;
        }
        if buf.len() < lte::data_header_len(false, 0) + 1 {
            return 0;
        }
        let Some(mut payload) = self.pool.allocate() else {
            warn!("pool exhausted, cannot build PDU");
            return 0;
        };

        let mut head = lte::data_header_len(false, 0);
        let starts_mid = self.current_sdu.is_some();
        let mut ends_mid = false;
        let mut field_lens: SmallVec<[u16; 4]> = SmallVec::new();

        loop {
            let Some(mut sdu) = self.current_sdu.take().or_else(|| {
                let s = self.queue.pop_front()?;
                self.queue_bytes -= s.len();
                Some(s)
            }) else {
                break;
            };

            let avail = buf.len() - head - payload.len();
            let take = avail.min(sdu.len());
            if payload.append(&sdu.as_slice()[..take]).is_err() {
                // Cannot happen for in-budget copies, but never truncate an
                // SDU silently.
                self.current_sdu = Some(sdu);
                break;
            }
            field_lens.push(take as u16);
            sdu.trim_front(take);

            if !sdu.is_empty() {
                self.current_sdu = Some(sdu);
                ends_mid = true;
                break;
            }
            drop(sdu);

            if self.queue.is_empty() {
                break;
            }
            // Another field needs a length indicator for the one just
            // closed; re-check the budget against the grown header.
            let new_head = lte::data_header_len(false, field_lens.len());
            if buf.len() < new_head + payload.len() + 1 {
                break;
            }
            head = new_head;
        }

        if payload.is_empty() {
            return 0;
        }

        let sn = self.vt_s;
        let li: SmallVec<[u16; 4]> = field_lens[..field_lens.len() - 1].iter().copied().collect();
        let fi = FramingInfo {
            starts_mid,
            ends_mid,
        };
        let payload_len = payload.len();
        self.window.insert(
            sn,
            LteTxPdu {
                payload,
                fi,
                li: li.clone(),
                acked: false,
                retx_count: 0,
            },
        );
        self.vt_s = self.space.add(self.vt_s, 1);

        let header = LteDataHeader {
            resegment: None,
            poll: false,
            fi,
            sn,
            li,
        };
        self.emit(buf, sn, header, 0, payload_len, now)
    }

    /// Packs the header (poll bit decided here) and copies the payload span.
    fn emit(
        &mut self,
        buf: &mut [u8],
        sn: Sn,
        mut header: LteDataHeader,
        so: usize,
        end: usize,
        now: Instant,
    ) -> usize {
        header.poll = self.poll_for_pdu(sn, end - so, now);
        let hdr_len = lte::write_data_header(&header, buf);
        let entry = self.window.get(sn).expect("emitting from window");
        buf[hdr_len..hdr_len + (end - so)].copy_from_slice(&entry.payload.as_slice()[so..end]);
        debug!(
            "tx PDU sn={} rf={} so={} len={} poll={}",
            sn,
            header.resegment.is_some(),
            so,
            end - so,
            header.poll
        );
        hdr_len + (end - so)
    }

    fn poll_for_pdu(&mut self, sn: Sn, payload_len: usize, now: Instant) -> bool {
        let mut poll = self.force_poll;
        self.pdu_without_poll += 1;
        self.byte_without_poll += payload_len;
        if let Some(limit) = self.poll_pdu {
            if self.pdu_without_poll >= limit {
                poll = true;
            }
        }
        if let Some(limit) = self.poll_byte {
            if self.byte_without_poll > limit {
                poll = true;
            }
        }
        if self.queue.is_empty() && self.current_sdu.is_none() && self.retx_queue.is_empty() {
            poll = true;
        }
        if !self.space.in_window(self.vt_a, self.vt_s) {
            poll = true;
        }
        if poll {
            self.force_poll = false;
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.poll_sn = Some(sn);
            self.t_poll_retx.start(now);
        }
        poll
    }

    pub fn handle_status(&mut self, status: &LteStatusPdu) -> StatusOutcome {
        let mut outcome = StatusOutcome::default();
        let base = self.vt_a;
        let ack_dist = self.space.distance(base, status.ack_sn);
        if ack_dist > self.space.distance(base, self.vt_s) {
            warn!("status ACK_SN={} outside [{}, {}]", status.ack_sn, base, self.vt_s);
            return outcome;
        }

        let mut counted: Vec<Sn> = Vec::new();
        for nack in &status.nacks {
            if self.space.distance(base, nack.sn) >= ack_dist {
                continue;
            }
            let payload_len = match self.window.get(nack.sn) {
                Some(e) if !e.acked => e.payload.len(),
                _ => continue,
            };
            let (so, end) = match nack.so {
                None => (0, payload_len),
                Some((s, e)) => {
                    let so = s as usize;
                    let end = if e == SO_END_OF_PDU {
                        payload_len
                    } else {
                        (e as usize + 1).min(payload_len)
                    };
                    (so, end)
                }
            };
            if end <= so {
                continue;
            }
            if self.overlaps_queued(nack.sn, so, end) {
                continue;
            }
            if !counted.contains(&nack.sn) {
                counted.push(nack.sn);
                let entry = self.window.get_mut(nack.sn).expect("checked above");
                entry.retx_count += 1;
                self.num_retx += 1;
                if entry.retx_count >= self.max_retx {
                    outcome.max_retx_reached = true;
                    return outcome;
                }
            }
            debug!("retx queued sn={} so={} end={}", nack.sn, so, end);
            self.retx_queue.push_back(Retx {
                sn: nack.sn,
                so,
                end,
            });
        }

        let nacked: Vec<Sn> = status.nacks.iter().map(|n| n.sn).collect();
        for sn in self.window.keys_sorted(&self.space, base) {
            if self.space.distance(base, sn) >= ack_dist {
                break;
            }
            if !nacked.contains(&sn) {
                if let Some(entry) = self.window.get_mut(sn) {
                    entry.acked = true;
                }
            }
        }

        self.advance_vt_a();
        let window = &self.window;
        self.retx_queue
            .retain(|r| matches!(window.get(r.sn), Some(e) if !e.acked));

        if let Some(ps) = self.poll_sn {
            let poll_acked = match self.window.get(ps) {
                Some(e) => e.acked,
                None => true,
            };
            if poll_acked {
                self.t_poll_retx.stop();
                self.poll_sn = None;
            }
        }

        outcome
    }

    fn overlaps_queued(&self, sn: Sn, so: usize, end: usize) -> bool {
        self.retx_queue
            .iter()
            .any(|r| r.sn == sn && so < r.end && r.so < end)
    }

    fn advance_vt_a(&mut self) {
        while let Some(entry) = self.window.get(self.vt_a) {
            if !entry.acked {
                break;
            }
            self.window.remove(self.vt_a);
            self.vt_a = self.space.add(self.vt_a, 1);
        }
    }

    pub fn on_poll_retx_expiry(&mut self) -> StatusOutcome {
        let mut outcome = StatusOutcome::default();
        let mut highest: Option<(Sn, u32)> = None;
        for (sn, entry) in self.window.iter() {
            if entry.acked {
                continue;
            }
            let d = self.space.distance(self.vt_a, sn);
            if highest.map_or(true, |(_, hd)| d > hd) {
                highest = Some((sn, d));
            }
        }
        let Some((sn, _)) = highest else {
            return outcome;
        };

        self.force_poll = true;
        let entry = self.window.get_mut(sn).expect("selected from window");
        entry.retx_count += 1;
        self.num_retx += 1;
        if entry.retx_count >= self.max_retx {
            outcome.max_retx_reached = true;
            return outcome;
        }
        let len = entry.payload.len();
        if !self.overlaps_queued(sn, 0, len) {
            debug!("poll retransmit expired, retx sn={}", sn);
            self.retx_queue.push_back(Retx { sn, so: 0, end: len });
        }
        outcome
    }

    /// Advisory byte demand. New data uses the worst-case allowance of one
    /// packed length indicator per additional SDU plus a three-octet fixed
    /// part; retransmissions use their exact wire size.
    pub fn buffer_state(&self) -> usize {
        let mut total = 0;
        for r in &self.retx_queue {
            let Some(entry) = self.window.get(r.sn) else {
                continue;
            };
            if entry.acked {
                continue;
            }
            if r.so == 0 && r.end == entry.payload.len() {
                total += entry.packed_len();
            } else {
                let fields = entry.fields();
                let in_span = fields
                    .iter()
                    .filter(|&&(fs, fe)| (fs as usize) < r.end && r.so < fe as usize)
                    .count();
                total += lte::data_header_len(true, in_span.saturating_sub(1)) + (r.end - r.so);
            }
        }

        let n_sdus = self.queue.len() + usize::from(self.current_sdu.is_some());
        if n_sdus > 0 {
            let bytes = self.queue_bytes
                + self.current_sdu.as_ref().map_or(0, |s| s.len());
            total += bytes + (3 * (n_sdus - 1) + 1) / 2 + 3;
        }
        total
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.queue_bytes = 0;
        self.current_sdu = None;
        self.window.clear();
        self.retx_queue.clear();
        self.vt_a = Sn(0);
        self.vt_s = Sn(0);
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_sn = None;
        self.force_poll = false;
        self.t_poll_retx.stop();
    }

    pub fn fault(&mut self) {
        self.queue.clear();
        self.queue_bytes = 0;
        self.current_sdu = None;
        self.retx_queue.clear();
        self.t_poll_retx.stop();
    }
}

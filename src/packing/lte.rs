//! LTE acknowledged-mode PDU headers (10-bit sequence numbers).
//!
//! The LTE data PDU concatenates SDU fields: the framing-info bits say
//! whether the payload edges align with SDU boundaries and an 11-bit length
//! indicator precedes every field except the last. Retransmission segments
//! set the resegmentation flag and carry a 15-bit segment offset plus a
//! last-segment flag.

use smallvec::SmallVec;

use super::{BitReader, BitWriter};
use crate::error::RlcError;
use crate::sn::Sn;

/// Sentinel segment offset end: "through the last byte of the PDU".
pub const SO_END_OF_PDU: u16 = 0x7FFF;

/// Framing info: whether the payload edges fall inside an SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FramingInfo {
    /// First payload byte is not the first byte of an SDU.
    pub starts_mid: bool,
    /// Last payload byte is not the last byte of an SDU.
    pub ends_mid: bool,
}

/// Present on retransmission segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResegmentInfo {
    /// This segment reaches the last byte of the original PDU.
    pub lsf: bool,
    /// Byte offset of the segment within the original PDU payload.
    pub so: u16,
}

/// Header of an LTE data PDU or PDU segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LteDataHeader {
    pub resegment: Option<ResegmentInfo>,
    pub poll: bool,
    pub fi: FramingInfo,
    pub sn: Sn,
    /// Lengths of every SDU field except the last.
    pub li: SmallVec<[u16; 4]>,
}

/// Octets occupied by `count` packed length indicators (12 bits each).
pub fn li_len(count: usize) -> usize {
    if count == 0 {
        0
    } else {
        (3 * count + 1) / 2
    }
}

/// Packed size of a header with `li_count` length indicators.
pub fn data_header_len(resegment: bool, li_count: usize) -> usize {
    2 + if resegment { 2 } else { 0 } + li_len(li_count)
}

pub fn read_data_header(buf: &[u8]) -> Result<(LteDataHeader, usize), RlcError> {
    let mut r = BitReader::new(buf);
    if r.read(1)? == 0 {
        return Err(RlcError::Decode("not a data PDU"));
    }
    let rf = r.read(1)? != 0;
    let poll = r.read(1)? != 0;
    let fi_bits = r.read(2)?;
    let mut more = r.read(1)? != 0;
    let sn = Sn(r.read(10)?);

    let resegment = if rf {
        let lsf = r.read(1)? != 0;
        let so = r.read(15)? as u16;
        Some(ResegmentInfo { lsf, so })
    } else {
        None
    };

    let mut li = SmallVec::new();
    while more {
        let next = r.read(1)? != 0;
        let indicator = r.read(11)? as u16;
        if indicator == 0 {
            return Err(RlcError::Decode("zero length indicator"));
        }
        li.push(indicator);
        more = next;
    }

    let len = r.bytes_consumed();
    let field_bytes: usize = li.iter().map(|l| *l as usize).sum();
    if buf.len() <= len + field_bytes {
        return Err(RlcError::Decode("length indicators exceed payload"));
    }

    Ok((
        LteDataHeader {
            resegment,
            poll,
            fi: FramingInfo {
                starts_mid: fi_bits & 0b10 != 0,
                ends_mid: fi_bits & 0b01 != 0,
            },
            sn,
            li,
        },
        len,
    ))
}

/// Packs a data header into the front of `out`, returning the octet count.
pub fn write_data_header(header: &LteDataHeader, out: &mut [u8]) -> usize {
    let mut w = BitWriter::new();
    w.write(1, 1);
    w.write(u32::from(header.resegment.is_some()), 1);
    w.write(u32::from(header.poll), 1);
    let fi = (u32::from(header.fi.starts_mid) << 1) | u32::from(header.fi.ends_mid);
    w.write(fi, 2);
    w.write(u32::from(!header.li.is_empty()), 1);
    w.write(header.sn.0, 10);
    if let Some(seg) = header.resegment {
        w.write(u32::from(seg.lsf), 1);
        w.write(u32::from(seg.so), 15);
    }
    for (i, li) in header.li.iter().enumerate() {
        let more = i + 1 < header.li.len();
        w.write(u32::from(more), 1);
        w.write(u32::from(*li), 11);
    }
    let bytes = w.finish();
    out[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LteNack {
    pub sn: Sn,
    /// Inclusive byte range of the missing portion of the PDU; `None` nacks
    /// the whole PDU. An end of [`SO_END_OF_PDU`] runs to the last byte.
    pub so: Option<(u16, u16)>,
}

/// An LTE status PDU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LteStatusPdu {
    pub ack_sn: Sn,
    pub nacks: SmallVec<[LteNack; 4]>,
}

/// Packed size of a status PDU.
pub fn status_len(status: &LteStatusPdu) -> usize {
    let so_pairs = status.nacks.iter().filter(|n| n.so.is_some()).count();
    let bits = 15 + 12 * status.nacks.len() + 30 * so_pairs;
    bits.div_ceil(8)
}

pub fn read_status(buf: &[u8]) -> Result<LteStatusPdu, RlcError> {
    let mut r = BitReader::new(buf);
    if r.read(1)? != 0 {
        return Err(RlcError::Decode("not a control PDU"));
    }
    if r.read(3)? != 0 {
        return Err(RlcError::Decode("unknown control PDU type"));
    }
    let ack_sn = Sn(r.read(10)?);
    let mut more = r.read(1)? != 0;

    let mut status = LteStatusPdu {
        ack_sn,
        nacks: SmallVec::new(),
    };
    while more {
        let sn = Sn(r.read(10)?);
        more = r.read(1)? != 0;
        let has_so = r.read(1)? != 0;
        let so = if has_so {
            let start = r.read(15)? as u16;
            let end = r.read(15)? as u16;
            Some((start, end))
        } else {
            None
        };
        status.nacks.push(LteNack { sn, so });
    }

    Ok(status)
}

/// Packs a status PDU into `out`, returning the octet count.
pub fn write_status(status: &LteStatusPdu, out: &mut [u8]) -> usize {
    let mut w = BitWriter::new();
    w.write(0, 1);
    w.write(0, 3);
    w.write(status.ack_sn.0, 10);
    w.write(u32::from(!status.nacks.is_empty()), 1);
    for (i, nack) in status.nacks.iter().enumerate() {
        w.write(nack.sn.0, 10);
        let more = i + 1 < status.nacks.len();
        w.write(u32::from(more), 1);
        w.write(u32::from(nack.so.is_some()), 1);
        if let Some((start, end)) = nack.so {
            w.write(u32::from(start), 15);
            w.write(u32::from(end), 15);
        }
    }
    let bytes = w.finish();
    out[..bytes.len()].copy_from_slice(&bytes);
    bytes.len()
}

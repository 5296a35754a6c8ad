//! NR acknowledged-mode PDU headers (12- and 18-bit sequence numbers).

use smallvec::SmallVec;

use super::SegmentInfo;
use crate::error::RlcError;
use crate::sn::Sn;

/// Sequence-number width selector for the NR layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NrSnSize {
    Size12,
    Size18,
}

impl NrSnSize {
    pub fn width(&self) -> u8 {
        match self {
            NrSnSize::Size12 => 12,
            NrSnSize::Size18 => 18,
        }
    }

    /// Fixed part of a data header (before any segment offset).
    fn fixed_len(&self) -> usize {
        match self {
            NrSnSize::Size12 => 2,
            NrSnSize::Size18 => 3,
        }
    }

    fn status_fixed_len(&self) -> usize {
        3
    }

    fn nack_len(&self) -> usize {
        match self {
            NrSnSize::Size12 => 2,
            NrSnSize::Size18 => 3,
        }
    }
}

/// Sentinel segment offset: "through the end of the SDU".
pub const SO_END_OF_SDU: u16 = 0xFFFF;

/// Header of an NR data PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrDataHeader {
    pub poll: bool,
    pub si: SegmentInfo,
    pub sn: Sn,
    /// Byte offset of this segment within its SDU. Zero unless `si` carries
    /// an explicit offset field.
    pub so: u16,
}

/// Size of the packed header for a given segmentation info.
pub fn data_header_len(si: SegmentInfo, sn_size: NrSnSize) -> usize {
    sn_size.fixed_len() + if si.has_so() { 2 } else { 0 }
}

/// Unpacks a data header, returning it with the number of header octets.
/// The PDU must carry at least one payload byte past the header.
pub fn read_data_header(
    buf: &[u8],
    sn_size: NrSnSize,
) -> Result<(NrDataHeader, usize), RlcError> {
    let b0 = *buf.first().ok_or(RlcError::Decode("empty PDU"))?;
    if b0 & 0x80 == 0 {
        return Err(RlcError::Decode("not a data PDU"));
    }
    let poll = b0 & 0x40 != 0;
    let si = SegmentInfo::from_bits((b0 >> 4) & 0b11);

    let (sn, mut len) = match sn_size {
        NrSnSize::Size12 => {
            if buf.len() < 2 {
                return Err(RlcError::Decode("truncated header"));
            }
            let sn = (u32::from(b0 & 0x0F) << 8) | u32::from(buf[1]);
            (sn, 2)
        }
        NrSnSize::Size18 => {
            if buf.len() < 3 {
                return Err(RlcError::Decode("truncated header"));
            }
            if b0 & 0x0C != 0 {
                return Err(RlcError::Decode("reserved bits set"));
            }
            let sn = (u32::from(b0 & 0x03) << 16)
                | (u32::from(buf[1]) << 8)
                | u32::from(buf[2]);
            (sn, 3)
        }
    };

    let mut so = 0u16;
    if si.has_so() {
        if buf.len() < len + 2 {
            return Err(RlcError::Decode("truncated segment offset"));
        }
        so = u16::from_be_bytes([buf[len], buf[len + 1]]);
        len += 2;
    }

    if buf.len() <= len {
        return Err(RlcError::Decode("data PDU without payload"));
    }

    Ok((
        NrDataHeader {
            poll,
            si,
            sn: Sn(sn),
            so,
        },
        len,
    ))
}

/// Packs a data header into the front of `out`, returning the octet count.
pub fn write_data_header(header: &NrDataHeader, sn_size: NrSnSize, out: &mut [u8]) -> usize {
    let sn = header.sn.0;
    let mut b0 = 0x80 | (header.si.to_bits() << 4);
    if header.poll {
        b0 |= 0x40;
    }
    let mut len = match sn_size {
        NrSnSize::Size12 => {
            out[0] = b0 | ((sn >> 8) & 0x0F) as u8;
            out[1] = (sn & 0xFF) as u8;
            2
        }
        NrSnSize::Size18 => {
            out[0] = b0 | ((sn >> 16) & 0x03) as u8;
            out[1] = ((sn >> 8) & 0xFF) as u8;
            out[2] = (sn & 0xFF) as u8;
            3
        }
    };
    if header.si.has_so() {
        out[len..len + 2].copy_from_slice(&header.so.to_be_bytes());
        len += 2;
    }
    len
}

/// One negative acknowledgment inside a status PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrNack {
    pub sn: Sn,
    /// Inclusive byte range of the missing portion; `None` nacks the whole
    /// SDU. An end of [`SO_END_OF_SDU`] runs to the end of the SDU.
    pub so: Option<(u16, u16)>,
}

/// An NR status PDU: cumulative acknowledgment plus explicit gaps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NrStatusPdu {
    pub ack_sn: Sn,
    pub nacks: SmallVec<[NrNack; 4]>,
}

/// Packed size of a status PDU.
pub fn status_len(status: &NrStatusPdu, sn_size: NrSnSize) -> usize {
    sn_size.status_fixed_len()
        + status
            .nacks
            .iter()
            .map(|n| sn_size.nack_len() + if n.so.is_some() { 4 } else { 0 })
            .sum::<usize>()
}

/// Size a single additional NACK record would add.
pub fn nack_len(has_so: bool, sn_size: NrSnSize) -> usize {
    sn_size.nack_len() + if has_so { 4 } else { 0 }
}

pub fn read_status(buf: &[u8], sn_size: NrSnSize) -> Result<NrStatusPdu, RlcError> {
    let b0 = *buf.first().ok_or(RlcError::Decode("empty PDU"))?;
    if b0 & 0x80 != 0 {
        return Err(RlcError::Decode("not a control PDU"));
    }
    if (b0 >> 4) & 0x07 != 0 {
        return Err(RlcError::Decode("unknown control PDU type"));
    }
    if buf.len() < sn_size.status_fixed_len() {
        return Err(RlcError::Decode("truncated status PDU"));
    }

    let (ack_sn, mut e1) = match sn_size {
        NrSnSize::Size12 => {
            let ack = (u32::from(b0 & 0x0F) << 8) | u32::from(buf[1]);
            (ack, buf[2] & 0x80 != 0)
        }
        NrSnSize::Size18 => {
            let ack = (u32::from(b0 & 0x0F) << 14)
                | (u32::from(buf[1]) << 6)
                | (u32::from(buf[2]) >> 2);
            (ack, buf[2] & 0x02 != 0)
        }
    };

    let mut status = NrStatusPdu {
        ack_sn: Sn(ack_sn),
        nacks: SmallVec::new(),
    };

    let mut pos = sn_size.status_fixed_len();
    while e1 {
        if buf.len() < pos + sn_size.nack_len() {
            return Err(RlcError::Decode("truncated NACK record"));
        }
        let (sn, e1_next, e2, e3) = match sn_size {
            NrSnSize::Size12 => {
                let sn = (u32::from(buf[pos]) << 4) | (u32::from(buf[pos + 1]) >> 4);
                let flags = buf[pos + 1];
                (sn, flags & 0x08 != 0, flags & 0x04 != 0, flags & 0x02 != 0)
            }
            NrSnSize::Size18 => {
                let sn = (u32::from(buf[pos]) << 10)
                    | (u32::from(buf[pos + 1]) << 2)
                    | (u32::from(buf[pos + 2]) >> 6);
                let flags = buf[pos + 2];
                (sn, flags & 0x20 != 0, flags & 0x10 != 0, flags & 0x08 != 0)
            }
        };
        if e3 {
            return Err(RlcError::Decode("NACK range not supported"));
        }
        pos += sn_size.nack_len();

        let so = if e2 {
            if buf.len() < pos + 4 {
                return Err(RlcError::Decode("truncated segment offsets"));
            }
            let start = u16::from_be_bytes([buf[pos], buf[pos + 1]]);
            let end = u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]);
            pos += 4;
            Some((start, end))
        } else {
            None
        };

        status.nacks.push(NrNack { sn: Sn(sn), so });
        e1 = e1_next;
    }

    Ok(status)
}

/// Packs a status PDU into `out`, returning the octet count.
pub fn write_status(status: &NrStatusPdu, sn_size: NrSnSize, out: &mut [u8]) -> usize {
    let ack = status.ack_sn.0;
    let e1 = !status.nacks.is_empty();
    let mut pos = match sn_size {
        NrSnSize::Size12 => {
            out[0] = ((ack >> 8) & 0x0F) as u8;
            out[1] = (ack & 0xFF) as u8;
            out[2] = if e1 { 0x80 } else { 0 };
            3
        }
        NrSnSize::Size18 => {
            out[0] = ((ack >> 14) & 0x0F) as u8;
            out[1] = ((ack >> 6) & 0xFF) as u8;
            out[2] = ((ack << 2) & 0xFC) as u8 | if e1 { 0x02 } else { 0 };
            3
        }
    };

    for (i, nack) in status.nacks.iter().enumerate() {
        let more = i + 1 < status.nacks.len();
        let sn = nack.sn.0;
        match sn_size {
            NrSnSize::Size12 => {
                out[pos] = ((sn >> 4) & 0xFF) as u8;
                let mut flags = ((sn << 4) & 0xF0) as u8;
                if more {
                    flags |= 0x08;
                }
                if nack.so.is_some() {
                    flags |= 0x04;
                }
                out[pos + 1] = flags;
                pos += 2;
            }
            NrSnSize::Size18 => {
                out[pos] = ((sn >> 10) & 0xFF) as u8;
                out[pos + 1] = ((sn >> 2) & 0xFF) as u8;
                let mut flags = ((sn << 6) & 0xC0) as u8;
                if more {
                    flags |= 0x20;
                }
                if nack.so.is_some() {
                    flags |= 0x10;
                }
                out[pos + 2] = flags;
                pos += 3;
            }
        }
        if let Some((start, end)) = nack.so {
            out[pos..pos + 2].copy_from_slice(&start.to_be_bytes());
            out[pos + 2..pos + 4].copy_from_slice(&end.to_be_bytes());
            pos += 4;
        }
    }

    pos
}

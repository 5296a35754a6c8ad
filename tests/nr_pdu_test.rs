use rlc_am::packing::nr::{
    read_data_header, read_status, status_len, write_data_header, write_status, NrDataHeader,
    NrNack, NrSnSize, NrStatusPdu,
};
use rlc_am::packing::{is_control, SegmentInfo};
use rlc_am::sn::Sn;
use rlc_am::RlcError;
use smallvec::smallvec;

fn repack_data(header: &NrDataHeader, sn_size: NrSnSize, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    let n = write_data_header(header, sn_size, &mut out);
    out.truncate(n);
    out.extend_from_slice(payload);
    out
}

#[test]
fn test_data_12bit_full_sdu() {
    let tv = [0x80, 0x00, 0x11, 0x22, 0x33, 0x44];
    let (header, hdr_len) = read_data_header(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(header.si, SegmentInfo::Full);
    assert_eq!(header.sn, Sn(0));
    assert!(!header.poll);
    assert_eq!(hdr_len, 2);
    assert_eq!(&tv[hdr_len..], &[0x11, 0x22, 0x33, 0x44]);

    assert_eq!(repack_data(&header, NrSnSize::Size12, &tv[hdr_len..]), tv);
}

#[test]
fn test_data_12bit_first_segment_with_poll() {
    let tv = [0xd1, 0xff, 0x11, 0x22, 0x33, 0x44];
    let (header, hdr_len) = read_data_header(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(header.si, SegmentInfo::First);
    assert_eq!(header.sn, Sn(511));
    assert_eq!(header.so, 0);
    assert!(header.poll);
    assert_eq!(hdr_len, 2);

    assert_eq!(repack_data(&header, NrSnSize::Size12, &tv[hdr_len..]), tv);
}

#[test]
fn test_data_12bit_last_segment() {
    let tv = [0xa4, 0x04, 0x04, 0x04, 0x11, 0x22, 0x33, 0x44];
    let (header, hdr_len) = read_data_header(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(header.si, SegmentInfo::Last);
    assert_eq!(header.sn, Sn(1028));
    assert_eq!(header.so, 1028);
    assert!(!header.poll);
    assert_eq!(hdr_len, 4);

    assert_eq!(repack_data(&header, NrSnSize::Size12, &tv[hdr_len..]), tv);
}

#[test]
fn test_data_18bit_full_sdu() {
    let tv = [0xc2, 0x02, 0x02, 0x11, 0x22, 0x33, 0x44];
    let (header, hdr_len) = read_data_header(&tv, NrSnSize::Size18).unwrap();
    assert_eq!(header.si, SegmentInfo::Full);
    assert_eq!(header.sn, Sn(131586));
    assert_eq!(header.so, 0);
    assert!(header.poll);
    assert_eq!(hdr_len, 3);

    assert_eq!(repack_data(&header, NrSnSize::Size18, &tv[hdr_len..]), tv);
}

#[test]
fn test_data_18bit_middle_segment() {
    let tv = [0xb2, 0x00, 0xff, 0x02, 0x02, 0x11, 0x22, 0x33, 0x44];
    let (header, hdr_len) = read_data_header(&tv, NrSnSize::Size18).unwrap();
    assert_eq!(header.si, SegmentInfo::Middle);
    assert_eq!(header.sn, Sn(131327));
    assert_eq!(header.so, 514);
    assert_eq!(hdr_len, 5);

    assert_eq!(repack_data(&header, NrSnSize::Size18, &tv[hdr_len..]), tv);
}

#[test]
fn test_data_18bit_reserved_bits_rejected() {
    let tv = [0xb7, 0x00, 0xff, 0x02, 0x02, 0x11, 0x22, 0x33, 0x44];
    assert_eq!(
        read_data_header(&tv, NrSnSize::Size18),
        Err(RlcError::Decode("reserved bits set"))
    );
}

#[test]
fn test_data_truncated_rejected() {
    assert!(read_data_header(&[0x80], NrSnSize::Size12).is_err());
    // Middle segment announcing a segment offset it does not carry.
    assert!(read_data_header(&[0xb0, 0x00, 0x01], NrSnSize::Size12).is_err());
    // Header only, no payload byte.
    assert!(read_data_header(&[0x80, 0x00], NrSnSize::Size12).is_err());
}

#[test]
fn test_status_no_nacks() {
    let tv = [0x08, 0x11, 0x00];
    assert!(is_control(tv[0]));
    let status = read_status(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(status.ack_sn, Sn(2065));
    assert!(status.nacks.is_empty());
    assert_eq!(status_len(&status, NrSnSize::Size12), 3);

    let mut out = [0u8; 8];
    let n = write_status(&status, NrSnSize::Size12, &mut out);
    assert_eq!(&out[..n], &tv);
}

#[test]
fn test_status_single_nack() {
    let tv = [0x08, 0x11, 0x80, 0x11, 0x10];
    let status = read_status(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(status.ack_sn, Sn(2065));
    assert_eq!(status.nacks.len(), 1);
    assert_eq!(status.nacks[0].sn, Sn(273));
    assert_eq!(status.nacks[0].so, None);

    let mut out = [0u8; 8];
    let n = write_status(&status, NrSnSize::Size12, &mut out);
    assert_eq!(&out[..n], &tv);
}

#[test]
fn test_status_nacks_with_segment_offsets() {
    let tv = [
        0x08, 0x11, 0x80, 0x11, 0x1c, 0x00, 0x02, 0x00, 0x05, 0x11, 0x34, 0x00, 0x05, 0xFF, 0xFF,
    ];
    let status = read_status(&tv, NrSnSize::Size12).unwrap();
    assert_eq!(status.ack_sn, Sn(2065));
    assert_eq!(status.nacks.len(), 2);
    assert_eq!(status.nacks[0].sn, Sn(273));
    assert_eq!(status.nacks[0].so, Some((2, 5)));
    assert_eq!(status.nacks[1].sn, Sn(275));
    assert_eq!(status.nacks[1].so, Some((5, 0xFFFF)));
    assert_eq!(status_len(&status, NrSnSize::Size12), tv.len());

    let mut out = [0u8; 32];
    let n = write_status(&status, NrSnSize::Size12, &mut out);
    assert_eq!(&out[..n], &tv);
}

#[test]
fn test_status_18bit_roundtrip() {
    let status = NrStatusPdu {
        ack_sn: Sn(131586),
        nacks: smallvec![
            NrNack {
                sn: Sn(7),
                so: None,
            },
            NrNack {
                sn: Sn(131585),
                so: Some((10, 0xFFFF)),
            },
        ],
    };
    let mut out = [0u8; 32];
    let n = write_status(&status, NrSnSize::Size18, &mut out);
    assert_eq!(n, status_len(&status, NrSnSize::Size18));
    assert_eq!(read_status(&out[..n], NrSnSize::Size18).unwrap(), status);
}

#[test]
fn test_status_unknown_control_type_rejected() {
    // CPT = 1.
    let tv = [0x18, 0x11, 0x00];
    assert!(read_status(&tv, NrSnSize::Size12).is_err());
}

#[test]
fn test_status_truncated_rejected() {
    assert!(read_status(&[0x08, 0x11], NrSnSize::Size12).is_err());
    // E1 set but no NACK record follows.
    assert!(read_status(&[0x08, 0x11, 0x80], NrSnSize::Size12).is_err());
    // E2 set but the offsets are cut short.
    assert!(read_status(&[0x08, 0x11, 0x80, 0x11, 0x14, 0x00], NrSnSize::Size12).is_err());
}

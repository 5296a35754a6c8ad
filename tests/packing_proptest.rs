use proptest::prelude::*;
use rlc_am::packing::lte::{
    self, FramingInfo, LteDataHeader, LteNack, LteStatusPdu, ResegmentInfo,
};
use rlc_am::packing::nr::{self, NrDataHeader, NrNack, NrSnSize, NrStatusPdu};
use rlc_am::packing::SegmentInfo;
use rlc_am::sn::Sn;

fn nr_sizes() -> impl Strategy<Value = NrSnSize> {
    prop_oneof![Just(NrSnSize::Size12), Just(NrSnSize::Size18)]
}

proptest! {
    #[test]
    fn test_nr_data_header_roundtrip(
        sn_size in nr_sizes(),
        poll in any::<bool>(),
        si_bits in 0u8..4,
        sn in 0u32..(1 << 18),
        so in any::<u16>(),
        payload in prop::collection::vec(any::<u8>(), 1..64),
    ) {
        let si = SegmentInfo::from_bits(si_bits);
        let header = NrDataHeader {
            poll,
            si,
            sn: Sn(sn % (1 << sn_size.width())),
            so: if si.has_so() { so } else { 0 },
        };

        let mut out = vec![0u8; 8];
        let n = nr::write_data_header(&header, sn_size, &mut out);
        prop_assert_eq!(n, nr::data_header_len(si, sn_size));
        out.truncate(n);
        out.extend_from_slice(&payload);

        let (parsed, hdr_len) = nr::read_data_header(&out, sn_size).unwrap();
        prop_assert_eq!(hdr_len, n);
        prop_assert_eq!(parsed, header);
    }

    #[test]
    fn test_nr_status_roundtrip(
        sn_size in nr_sizes(),
        ack in 0u32..(1 << 18),
        nacks in prop::collection::vec(
            (0u32..(1 << 18), proptest::option::of((any::<u16>(), any::<u16>()))),
            0..12,
        ),
    ) {
        let modulus = 1u32 << sn_size.width();
        let status = NrStatusPdu {
            ack_sn: Sn(ack % modulus),
            nacks: nacks
                .iter()
                .map(|(sn, so)| NrNack {
                    sn: Sn(sn % modulus),
                    so: *so,
                })
                .collect(),
        };

        let mut out = vec![0u8; 256];
        let n = nr::write_status(&status, sn_size, &mut out);
        prop_assert_eq!(n, nr::status_len(&status, sn_size));
        prop_assert_eq!(nr::read_status(&out[..n], sn_size).unwrap(), status);
    }

    #[test]
    fn test_lte_data_header_roundtrip(
        poll in any::<bool>(),
        starts_mid in any::<bool>(),
        ends_mid in any::<bool>(),
        sn in 0u32..1024,
        resegment in proptest::option::of((any::<bool>(), 0u16..0x8000)),
        li in prop::collection::vec(1u16..60, 0..4),
        extra in 1usize..40,
    ) {
        let header = LteDataHeader {
            resegment: resegment.map(|(lsf, so)| ResegmentInfo { lsf, so }),
            poll,
            fi: FramingInfo { starts_mid, ends_mid },
            sn: Sn(sn),
            li: li.iter().copied().collect(),
        };
        let payload_len = li.iter().map(|l| *l as usize).sum::<usize>() + extra;
        let payload = vec![0x5a_u8; payload_len];

        let mut out = vec![0u8; 32];
        let n = lte::write_data_header(&header, &mut out);
        prop_assert_eq!(n, lte::data_header_len(header.resegment.is_some(), header.li.len()));
        out.truncate(n);
        out.extend_from_slice(&payload);

        let (parsed, hdr_len) = lte::read_data_header(&out).unwrap();
        prop_assert_eq!(hdr_len, n);
        prop_assert_eq!(parsed, header);
    }

    #[test]
    fn test_lte_status_roundtrip(
        ack in 0u32..1024,
        nacks in prop::collection::vec(
            (0u32..1024, proptest::option::of((0u16..0x8000, 0u16..0x8000))),
            0..12,
        ),
    ) {
        let status = LteStatusPdu {
            ack_sn: Sn(ack),
            nacks: nacks
                .iter()
                .map(|(sn, so)| LteNack { sn: Sn(*sn), so: *so })
                .collect(),
        };

        let mut out = vec![0u8; 256];
        let n = lte::write_status(&status, &mut out);
        prop_assert_eq!(n, lte::status_len(&status));
        prop_assert_eq!(lte::read_status(&out[..n]).unwrap(), status);
    }
}

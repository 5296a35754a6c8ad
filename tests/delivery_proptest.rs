//! End-to-end delivery properties: whatever the budget pattern and however
//! many first-pass PDUs the channel eats, the receiver ends up with every
//! SDU, in order, byte-identical, and the transmit window drains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use proptest::prelude::*;
use rlc_am::sn::SnSpace;
use rlc_am::{
    AmConfig, BufferPool, LteAmEntity, ManualClock, NrAmEntity, RlcEvent, SnFieldLength,
};

fn config(sn: SnFieldLength) -> AmConfig {
    AmConfig {
        t_reordering_ms: 5,
        t_status_prohibit_ms: 0,
        t_poll_retx_ms: 45,
        poll_pdu: Some(4),
        poll_byte_kb: Some(25),
        max_retx_thresh: 32,
        sn_field_length: sn,
    }
}

struct Harness {
    budgets: Vec<usize>,
    budget_at: usize,
    drops: Vec<bool>,
    data_seen: usize,
}

impl Harness {
    fn new(budgets: Vec<usize>, drops: Vec<bool>) -> Self {
        Self {
            budgets,
            budget_at: 0,
            drops,
            data_seen: 0,
        }
    }

    fn next_budget(&mut self) -> usize {
        let b = self.budgets[self.budget_at % self.budgets.len()];
        self.budget_at += 1;
        b
    }

    /// Whether the channel eats this PDU. Only data PDUs are ever lost,
    /// and only while the loss mask lasts.
    fn eats(&mut self, pdu: &[u8]) -> bool {
        if pdu[0] & 0x80 == 0 {
            return false;
        }
        let i = self.data_seen;
        self.data_seen += 1;
        self.drops.get(i).copied().unwrap_or(false)
    }
}

macro_rules! link_property {
    ($a:ident, $b:ident, $clock:ident, $sdus:ident, $harness:ident, $space:expr) => {{
        let space = $space;
        let mut delivered: Vec<Vec<u8>> = Vec::new();
        let mut prev_ack = $a.lowest_unacked_sn();

        for _ in 0..500 {
            loop {
                let mut buf = vec![0u8; $harness.next_budget()];
                let n = $a.read_pdu(&mut buf);
                if n == 0 {
                    break;
                }
                if !$harness.eats(&buf[..n]) {
                    $b.write_pdu(&buf[..n]);
                }
            }

            let ack = $a.lowest_unacked_sn();
            prop_assert!(ack == prev_ack || space.lt(prev_ack, ack));
            prev_ack = ack;
            prop_assert!($a.unacked_pdus() <= space.window_size() as usize);

            while let Some(ev) = $b.poll_event() {
                if let RlcEvent::SduDelivered { sdu, .. } = ev {
                    delivered.push(sdu.as_slice().to_vec());
                }
            }
            if delivered.len() == $sdus.len() && $a.unacked_pdus() == 0 {
                break;
            }

            loop {
                let mut buf = vec![0u8; 200];
                let n = $b.read_pdu(&mut buf);
                if n == 0 {
                    break;
                }
                $a.write_pdu(&buf[..n]);
            }

            $clock.advance(Duration::from_millis(10));
            $a.run_timers();
            $b.run_timers();
        }

        prop_assert_eq!(&delivered, &$sdus);
        prop_assert_eq!($a.unacked_pdus(), 0);
    }};
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_nr_delivers_in_order_under_loss(
        sdus in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..80), 1..8),
        budgets in prop::collection::vec(8usize..60, 1..10),
        drops in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let clock = Arc::new(ManualClock::new(Instant::now()));
        let pool = BufferPool::new(512);
        let cfg = config(SnFieldLength::Bits12);
        let mut a = NrAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();
        let mut b = NrAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();

        for sdu in &sdus {
            a.write_sdu(pool.allocate_with(sdu).unwrap()).unwrap();
        }
        let mut harness = Harness::new(budgets, drops);
        link_property!(a, b, clock, sdus, harness, SnSpace::new(12));
    }

    #[test]
    fn test_lte_delivers_in_order_under_loss(
        sdus in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..80), 1..8),
        budgets in prop::collection::vec(8usize..60, 1..10),
        drops in prop::collection::vec(any::<bool>(), 0..12),
    ) {
        let clock = Arc::new(ManualClock::new(Instant::now()));
        let pool = BufferPool::new(512);
        let cfg = config(SnFieldLength::Bits10);
        let mut a = LteAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();
        let mut b = LteAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();

        for sdu in &sdus {
            a.write_sdu(pool.allocate_with(sdu).unwrap()).unwrap();
        }
        let mut harness = Harness::new(budgets, drops);
        link_property!(a, b, clock, sdus, harness, SnSpace::new(10));
    }
}

//! Seeded stress runs: hundreds of SDUs through random budgets and a lossy
//! first pass, for both entity flavors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rlc_am::{
    AmConfig, BufferPool, LteAmEntity, ManualClock, NrAmEntity, RlcEvent, SnFieldLength,
};

fn config(sn: SnFieldLength) -> AmConfig {
    AmConfig {
        t_reordering_ms: 5,
        t_status_prohibit_ms: 0,
        t_poll_retx_ms: 45,
        poll_pdu: Some(8),
        poll_byte_kb: Some(25),
        max_retx_thresh: 32,
        sn_field_length: sn,
    }
}

macro_rules! stress_run {
    ($a:ident, $b:ident, $clock:ident, $pool:ident, $rng:ident, $n_sdus:expr) => {{
        let sdus: Vec<Vec<u8>> = (0..$n_sdus)
            .map(|_| {
                let len = $rng.gen_range(1..200usize);
                (0..len).map(|_| $rng.gen::<u8>()).collect()
            })
            .collect();

        let mut pushed = 0usize;
        let mut delivered: Vec<Vec<u8>> = Vec::new();
        let mut first_pass_losses = 40i32;

        for round in 0..5000 {
            assert!(round < 4999, "link failed to converge");

            while pushed < sdus.len() && $a.get_buffer_state() < 4000 {
                $a.write_sdu($pool.allocate_with(&sdus[pushed]).unwrap())
                    .unwrap();
                pushed += 1;
            }

            loop {
                let budget = $rng.gen_range(8..120);
                let mut buf = vec![0u8; budget];
                let n = $a.read_pdu(&mut buf);
                if n == 0 {
                    break;
                }
                let is_data = buf[0] & 0x80 != 0;
                if is_data && first_pass_losses > 0 && $rng.gen_range(0..10) == 0 {
                    first_pass_losses -= 1;
                    continue;
                }
                $b.write_pdu(&buf[..n]);
            }

            while let Some(ev) = $b.poll_event() {
                if let RlcEvent::SduDelivered { sdu, .. } = ev {
                    delivered.push(sdu.as_slice().to_vec());
                }
            }
            if delivered.len() == sdus.len() && $a.unacked_pdus() == 0 {
                break;
            }

            loop {
                let mut buf = vec![0u8; 400];
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

        assert_eq!(delivered.len(), sdus.len());
        assert_eq!(delivered, sdus);
        assert_eq!($a.unacked_pdus(), 0);
    }};
}

#[test]
fn test_nr_stress_lossy_link() {
    let mut rng = StdRng::seed_from_u64(7);
    let clock = Arc::new(ManualClock::new(Instant::now()));
    let pool = BufferPool::new(1024);
    let cfg = config(SnFieldLength::Bits12);
    let mut a = NrAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();
    let mut b = NrAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();

    stress_run!(a, b, clock, pool, rng, 300);
}

#[test]
fn test_lte_stress_lossy_link() {
    let mut rng = StdRng::seed_from_u64(11);
    let clock = Arc::new(ManualClock::new(Instant::now()));
    let pool = BufferPool::new(2048);
    let cfg = config(SnFieldLength::Bits10);
    let mut a = LteAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();
    let mut b = LteAmEntity::new(1, cfg, pool.clone(), clock.clone()).unwrap();

    stress_run!(a, b, clock, pool, rng, 300);
}

//! Warm-up discard and sample decoding.
//!
//! The first RX cycles after the TX path goes live carry a settling
//! transient (on a real antenna run it looked like mains-frequency hum), so
//! a fixed number of refills is drained and thrown away before anything is
//! recorded. The constant was tuned empirically, not derived from signal
//! statistics.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};

use crate::buffer::LoopbackRig;
use crate::hw::Hardware;
use crate::{Error, RawSample};

/// One captured sample with its derived metrics.
///
/// Phase uses the single-argument arctangent of q/i so recorded rows stay
/// comparable with earlier datasets; it folds opposite quadrants together
/// and is unstable as i approaches zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RxRecord {
    pub i: RawSample,
    pub q: RawSample,
    pub amplitude: f64,
    pub phase_deg: f64,
}

pub fn decode(i: RawSample, q: RawSample) -> RxRecord {
    let fi = f64::from(i);
    let fq = f64::from(q);
    RxRecord {
        i,
        q,
        amplitude: (fi * fi + fq * fq).sqrt(),
        phase_deg: (fq / fi).atan() * (180.0 / PI),
    }
}

fn cancelled(cancel: &AtomicBool) -> bool {
    if cancel.load(Ordering::Relaxed) {
        warn!("cancellation requested, stopping at cycle boundary");
        true
    } else {
        false
    }
}

/// Drains `cycles` RX refills and discards every sample in them, returning
/// how many samples were thrown away. Checks the cancellation token before
/// each refill.
pub fn discard_warmup<H: Hardware>(
    hw: &mut H,
    rig: &mut LoopbackRig,
    cycles: usize,
    cancel: &AtomicBool,
) -> Result<usize, Error> {
    let mut discarded = 0usize;
    for _ in 0..cycles {
        if cancelled(cancel) {
            break;
        }
        let buf = rig.refill_rx(hw)?;
        discarded += buf.pairs().count();
    }
    info!("discarded {discarded} warm-up samples");
    Ok(discarded)
}

/// Runs `cycles` capture refills, decoding every sample and handing records
/// to `sink` in capture order. Returns the captured-sample count.
pub fn capture<H: Hardware>(
    hw: &mut H,
    rig: &mut LoopbackRig,
    cycles: usize,
    cancel: &AtomicBool,
    sink: &mut impl FnMut(&RxRecord),
) -> Result<usize, Error> {
    let mut captured = 0usize;
    for _ in 0..cycles {
        if cancelled(cancel) {
            break;
        }
        let buf = rig.refill_rx(hw)?;
        for (i, q) in buf.pairs() {
            captured += 1;
            sink(&decode(i, q));
        }
    }
    info!("captured {captured} samples");
    Ok(captured)
}

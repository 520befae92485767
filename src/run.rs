//! End-to-end loopback run.
//!
//! Phases are strictly sequential: both directions are fully configured
//! before any lane is enabled or buffer created, the TX buffer is filled and
//! pushed before the first refill, and every exit path funnels through the
//! one teardown in `LoopbackRig`.

use std::sync::atomic::AtomicBool;

use chrono::Local;
use log::info;

use crate::buffer::LoopbackRig;
use crate::capture::{capture, discard_warmup, RxRecord};
use crate::config::{Direction, RunParams, StreamConfig};
use crate::hw::{Hardware, HwError};
use crate::seq::{configure_stream, stream_channel, stream_device};
use crate::waveform::fill_tone;
use crate::{Error, RawSample};

/// External persistence collaborator: receives the transmitted pairs during
/// synthesis and the decoded records during capture, in order.
pub trait RecordSink {
    fn transmitted(&mut self, i: RawSample, q: RawSample);
    fn received(&mut self, rec: &RxRecord);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub transmitted: usize,
    pub discarded: usize,
    pub captured: usize,
}

/// Runs the whole test sequence against `hw` and tears down afterwards, no
/// matter how the run ended.
pub fn run<H: Hardware, S: RecordSink>(
    hw: &mut H,
    rx_cfg: &StreamConfig,
    tx_cfg: &StreamConfig,
    params: &RunParams,
    cancel: &AtomicBool,
    sink: &mut S,
) -> Result<RunSummary, Error> {
    let mut rig = LoopbackRig::new();
    let result = run_inner(hw, &mut rig, rx_cfg, tx_cfg, params, cancel, sink);
    rig.teardown(hw);
    result
}

fn run_inner<H: Hardware, S: RecordSink>(
    hw: &mut H,
    rig: &mut LoopbackRig,
    rx_cfg: &StreamConfig,
    tx_cfg: &StreamConfig,
    params: &RunParams,
    cancel: &AtomicBool,
    sink: &mut S,
) -> Result<RunSummary, Error> {
    info!("configuring streaming channels");
    configure_stream(hw, rx_cfg, Direction::Rx, 0)?;
    configure_stream(hw, tx_cfg, Direction::Tx, 0)?;

    info!("initializing streaming i/q lanes");
    let rx_dev = stream_device(hw, Direction::Rx)?;
    let tx_dev = stream_device(hw, Direction::Tx)?;
    let rx_i = stream_channel(hw, rx_dev, Direction::Rx, 0)?;
    let rx_q = stream_channel(hw, rx_dev, Direction::Rx, 1)?;
    let tx_i = stream_channel(hw, tx_dev, Direction::Tx, 0)?;
    let tx_q = stream_channel(hw, tx_dev, Direction::Tx, 1)?;
    rig.enable_lane(hw, rx_i);
    rig.enable_lane(hw, rx_q);
    rig.enable_lane(hw, tx_i);
    rig.enable_lane(hw, tx_q);

    info!(
        "creating non-cyclic buffers ({} rx / {} tx samples)",
        params.rx_buf_samples,
        params.tx_buf_samples()
    );
    rig.create_rx(hw, rx_dev, params.rx_buf_samples)?;
    rig.create_tx(hw, tx_dev, params.tx_buf_samples())?;

    let mut transmitted = 0usize;
    {
        let tx_buf = rig.tx_buf_mut().ok_or(Error::Buffer {
            op: "fill",
            source: HwError::BadHandle,
        })?;
        fill_tone(
            tx_buf.words_mut(),
            tx_cfg.fs_hz,
            params.tone_hz,
            params.tone_ampl,
            |i, q| {
                transmitted += 1;
                sink.transmitted(i, q);
            },
        );
    }

    info!(
        "starting io streaming at {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f")
    );
    rig.push_tx(hw)?;

    let discarded = discard_warmup(hw, rig, params.warmup_cycles, cancel)?;
    let captured = capture(hw, rig, params.capture_cycles, cancel, &mut |rec| {
        sink.received(rec)
    })?;

    Ok(RunSummary {
        transmitted,
        discarded,
        captured,
    })
}

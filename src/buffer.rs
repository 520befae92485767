//! Sample buffers and their lifecycle.
//!
//! One RX buffer and one TX buffer, both requested non-cyclic. The TX side
//! is observed to replay its contents indefinitely regardless of that
//! request, so it is over-allocated and pushed exactly once; the RX side is
//! refilled once per capture cycle. Teardown runs on every exit path and is
//! idempotent: RX buffer, TX buffer, lane disables, then the context.

use log::{info, warn};

use crate::hw::{BufferHandle, ChannelHandle, DeviceHandle, Hardware};
use crate::{Error, RawSample};

/// Fixed-capacity region of interleaved 16-bit I/Q samples. The capacity and
/// stride never change after creation.
pub struct SampleBuffer {
    handle: BufferHandle,
    data: Vec<RawSample>,
    nsamples: usize,
}

impl SampleBuffer {
    pub fn nsamples(&self) -> usize {
        self.nsamples
    }

    pub fn words(&self) -> &[RawSample] {
        &self.data
    }

    pub fn words_mut(&mut self) -> &mut [RawSample] {
        &mut self.data
    }

    /// Iterates the buffer as (i, q) pairs in capture order.
    pub fn pairs(&self) -> impl Iterator<Item = (RawSample, RawSample)> + '_ {
        self.data.chunks_exact(2).map(|p| (p[0], p[1]))
    }
}

/// Owns every resource the run creates on the hardware side: the enabled
/// I/Q lanes, the two buffers, and the context itself.
pub struct LoopbackRig {
    lanes: Vec<ChannelHandle>,
    rx_buf: Option<SampleBuffer>,
    tx_buf: Option<SampleBuffer>,
    ctx_held: bool,
    torn_down: bool,
}

impl LoopbackRig {
    pub fn new() -> Self {
        LoopbackRig {
            lanes: Vec::new(),
            rx_buf: None,
            tx_buf: None,
            ctx_held: true,
            torn_down: false,
        }
    }

    /// Enables a streaming lane and registers it for disable at teardown.
    pub fn enable_lane<H: Hardware>(&mut self, hw: &mut H, chan: ChannelHandle) {
        hw.enable(chan);
        self.lanes.push(chan);
    }

    pub fn create_rx<H: Hardware>(
        &mut self,
        hw: &mut H,
        dev: DeviceHandle,
        nsamples: usize,
    ) -> Result<(), Error> {
        let handle = hw
            .create_buffer(dev, nsamples, false)
            .map_err(|source| Error::Buffer { op: "create rx", source })?;
        self.rx_buf = Some(SampleBuffer {
            handle,
            data: vec![0; 2 * nsamples],
            nsamples,
        });
        Ok(())
    }

    pub fn create_tx<H: Hardware>(
        &mut self,
        hw: &mut H,
        dev: DeviceHandle,
        nsamples: usize,
    ) -> Result<(), Error> {
        let handle = hw
            .create_buffer(dev, nsamples, false)
            .map_err(|source| Error::Buffer { op: "create tx", source })?;
        self.tx_buf = Some(SampleBuffer {
            handle,
            data: vec![0; 2 * nsamples],
            nsamples,
        });
        Ok(())
    }

    pub fn tx_buf_mut(&mut self) -> Option<&mut SampleBuffer> {
        self.tx_buf.as_mut()
    }

    /// Schedules the TX buffer a single time. No further TX scheduling
    /// happens for the rest of the run; the hardware keeps replaying the
    /// pushed contents on its own.
    pub fn push_tx<H: Hardware>(&mut self, hw: &mut H) -> Result<usize, Error> {
        let buf = self.tx_buf.as_ref().ok_or(Error::Buffer {
            op: "push",
            source: crate::hw::HwError::BadHandle,
        })?;
        hw.push(buf.handle, &buf.data)
            .map_err(|source| Error::Buffer { op: "push", source })
    }

    /// One blocking capture cycle: refills the RX buffer with fresh samples
    /// and hands back the populated buffer.
    pub fn refill_rx<H: Hardware>(&mut self, hw: &mut H) -> Result<&SampleBuffer, Error> {
        let buf = self.rx_buf.as_mut().ok_or(Error::Buffer {
            op: "refill",
            source: crate::hw::HwError::BadHandle,
        })?;
        hw.refill(buf.handle, &mut buf.data)
            .map_err(|source| Error::Buffer { op: "refill", source })?;
        Ok(&*buf)
    }

    /// Destroys whatever was actually created, exactly once each. Safe to
    /// call on any exit path, any number of times.
    pub fn teardown<H: Hardware>(&mut self, hw: &mut H) {
        if self.torn_down {
            warn!("teardown called again; nothing left to release");
        }
        self.torn_down = true;

        if self.rx_buf.is_some() || self.tx_buf.is_some() {
            info!("destroying buffers");
        }
        if let Some(buf) = self.rx_buf.take() {
            hw.destroy_buffer(buf.handle);
        }
        if let Some(buf) = self.tx_buf.take() {
            hw.destroy_buffer(buf.handle);
        }

        if !self.lanes.is_empty() {
            info!("disabling streaming channels");
        }
        for chan in self.lanes.drain(..) {
            hw.disable(chan);
        }

        if self.ctx_held {
            info!("destroying context");
            self.ctx_held = false;
            hw.destroy_context();
        }
    }
}

impl Default for LoopbackRig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Direction;
    use crate::seq::stream_device;
    use crate::sim::{SimEvent, SimLoopback};

    #[test]
    fn teardown_with_nothing_created_releases_only_the_context() {
        let mut sim = SimLoopback::new();
        let mut rig = LoopbackRig::new();
        rig.teardown(&mut sim);

        assert_eq!(sim.count(|e| matches!(e, SimEvent::DestroyBuffer(_))), 0);
        assert_eq!(sim.count(|e| matches!(e, SimEvent::Disable(_))), 0);
        assert_eq!(sim.count(|e| matches!(e, SimEvent::DestroyContext)), 1);
    }

    #[test]
    fn double_teardown_destroys_each_resource_once() {
        let mut sim = SimLoopback::new();
        let mut rig = LoopbackRig::new();
        let rx_dev = stream_device(&mut sim, Direction::Rx).unwrap();
        rig.create_rx(&mut sim, rx_dev, 64).unwrap();

        rig.teardown(&mut sim);
        rig.teardown(&mut sim);

        assert_eq!(sim.count(|e| matches!(e, SimEvent::DestroyBuffer(_))), 1);
        assert_eq!(sim.count(|e| matches!(e, SimEvent::DestroyContext)), 1);
    }

    #[test]
    fn buffers_are_requested_non_cyclic() {
        let mut sim = SimLoopback::new();
        let mut rig = LoopbackRig::new();
        let rx_dev = stream_device(&mut sim, Direction::Rx).unwrap();
        let tx_dev = stream_device(&mut sim, Direction::Tx).unwrap();
        rig.create_rx(&mut sim, rx_dev, 256).unwrap();
        rig.create_tx(&mut sim, tx_dev, 1024).unwrap();

        let cyclic_flags: Vec<bool> = sim
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::CreateBuffer { cyclic, .. } => Some(*cyclic),
                _ => None,
            })
            .collect();
        assert_eq!(cyclic_flags, vec![false, false]);
        rig.teardown(&mut sim);
    }

    #[test]
    fn teardown_order_is_buffers_then_lanes_then_context() {
        let mut sim = SimLoopback::new();
        let mut rig = LoopbackRig::new();
        let rx_dev = stream_device(&mut sim, Direction::Rx).unwrap();
        let lane = crate::seq::stream_channel(&mut sim, rx_dev, Direction::Rx, 0).unwrap();
        rig.enable_lane(&mut sim, lane);
        rig.create_rx(&mut sim, rx_dev, 16).unwrap();
        rig.teardown(&mut sim);

        let destroy = sim
            .events
            .iter()
            .position(|e| matches!(e, SimEvent::DestroyBuffer(_)))
            .unwrap();
        let disable = sim
            .events
            .iter()
            .position(|e| matches!(e, SimEvent::Disable(_)))
            .unwrap();
        let ctx = sim
            .events
            .iter()
            .position(|e| matches!(e, SimEvent::DestroyContext))
            .unwrap();
        assert!(destroy < disable && disable < ctx);
    }
}

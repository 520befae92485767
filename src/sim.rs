//! Software loopback backend.
//!
//! Stands in for the real transceiver the same way a fake device would on a
//! bench: the three AD9361 device names resolve, attributes round-trip
//! through a store, and a pushed TX buffer is replayed into RX refills
//! through a fixed channel model (phase rotation, 6 dB of path loss, a DC
//! offset on I). The replay deliberately keeps going past the end of the
//! pushed buffer — the observed behavior of the hardware even when the
//! buffer was requested non-cyclic. Every operation lands in an ordered
//! event log so tests can assert sequencing.

use std::collections::{HashMap, HashSet};

use num::Complex;

use crate::hw::{BufferHandle, ChannelHandle, DeviceHandle, Hardware, HwError};
use crate::seq::{PHY_DEVICE, RX_STREAM_DEVICE, TX_STREAM_DEVICE};
use crate::RawSample;

/// Loopback path model: 30 degrees of rotation, half-scale attenuation and
/// a receiver DC offset on the I lane.
const PATH_ROT_DEG: f64 = 30.0;
const PATH_ATTEN: f64 = 0.5;
const DC_OFFSET_I: f64 = 40.0;

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    AttrWrite {
        chan: ChannelHandle,
        attr: String,
        value: String,
    },
    Enable(ChannelHandle),
    Disable(ChannelHandle),
    CreateBuffer {
        dev: DeviceHandle,
        nsamples: usize,
        cyclic: bool,
    },
    Push {
        buf: BufferHandle,
        nsamples: usize,
    },
    Refill {
        buf: BufferHandle,
    },
    DestroyBuffer(BufferHandle),
    DestroyContext,
}

struct SimBuffer {
    nsamples: usize,
}

pub struct SimLoopback {
    devices: HashMap<String, DeviceHandle>,
    channels: HashMap<(u32, String, bool), ChannelHandle>,
    attrs: HashMap<(ChannelHandle, String), String>,
    rejects: HashSet<String>,
    buffers: HashMap<u32, SimBuffer>,
    tx_data: Option<Vec<RawSample>>,
    replay_pos: usize,
    idle_pos: usize,
    next_handle: u32,
    pub events: Vec<SimEvent>,
}

impl SimLoopback {
    pub fn new() -> Self {
        let mut sim = Self::without_devices();
        for name in [PHY_DEVICE, RX_STREAM_DEVICE, TX_STREAM_DEVICE] {
            let handle = DeviceHandle(sim.next_handle);
            sim.next_handle += 1;
            sim.devices.insert(name.to_string(), handle);
        }
        sim
    }

    /// An empty context, for exercising resolution-failure paths.
    pub fn without_devices() -> Self {
        SimLoopback {
            devices: HashMap::new(),
            channels: HashMap::new(),
            attrs: HashMap::new(),
            rejects: HashSet::new(),
            buffers: HashMap::new(),
            tx_data: None,
            replay_pos: 0,
            idle_pos: 0,
            next_handle: 1,
            events: Vec::new(),
        }
    }

    /// Makes every write to `attr` fail with `AttrRejected`.
    pub fn reject_attr(&mut self, attr: &str) {
        self.rejects.insert(attr.to_string());
    }

    pub fn count(&self, pred: impl Fn(&SimEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    fn fresh(&mut self) -> u32 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn next_rx_pair(&mut self) -> (RawSample, RawSample) {
        match &self.tx_data {
            Some(tx) => {
                // Continuous replay through the loopback path, wrapping past
                // the end of the pushed buffer.
                let npairs = tx.len() / 2;
                let idx = self.replay_pos % npairs;
                self.replay_pos += 1;
                let sent = Complex::new(f64::from(tx[2 * idx]), f64::from(tx[2 * idx + 1]));
                let rx = sent * Complex::from_polar(PATH_ATTEN, PATH_ROT_DEG.to_radians());
                (
                    (rx.re + DC_OFFSET_I).round() as RawSample,
                    rx.im.round() as RawSample,
                )
            }
            None => {
                // Nothing on the air yet: DC offset plus a small settling
                // ripple.
                let k = self.idle_pos;
                self.idle_pos += 1;
                ((DC_OFFSET_I as RawSample) + (k % 7) as RawSample - 3, 0)
            }
        }
    }
}

impl Default for SimLoopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for SimLoopback {
    fn resolve_device(&mut self, name: &str) -> Option<DeviceHandle> {
        self.devices.get(name).copied()
    }

    fn resolve_channel(
        &mut self,
        dev: DeviceHandle,
        name: &str,
        output: bool,
    ) -> Option<ChannelHandle> {
        if !self.devices.values().any(|&d| d == dev) {
            return None;
        }
        if !name.starts_with("voltage") && !name.starts_with("altvoltage") {
            return None;
        }
        let key = (dev.0, name.to_string(), output);
        if let Some(&chan) = self.channels.get(&key) {
            return Some(chan);
        }
        let chan = ChannelHandle(self.fresh());
        self.channels.insert(key, chan);
        Some(chan)
    }

    fn attr_write_i64(
        &mut self,
        chan: ChannelHandle,
        attr: &str,
        val: i64,
    ) -> Result<(), HwError> {
        self.attr_write_str(chan, attr, &val.to_string())
    }

    fn attr_read_i64(&mut self, chan: ChannelHandle, attr: &str) -> Result<i64, HwError> {
        self.attr_read_str(chan, attr)?
            .parse()
            .map_err(|_| HwError::AttrRejected)
    }

    fn attr_write_str(
        &mut self,
        chan: ChannelHandle,
        attr: &str,
        val: &str,
    ) -> Result<(), HwError> {
        if self.rejects.contains(attr) {
            return Err(HwError::AttrRejected);
        }
        self.attrs
            .insert((chan, attr.to_string()), val.to_string());
        self.events.push(SimEvent::AttrWrite {
            chan,
            attr: attr.to_string(),
            value: val.to_string(),
        });
        Ok(())
    }

    fn attr_read_str(&mut self, chan: ChannelHandle, attr: &str) -> Result<String, HwError> {
        self.attrs
            .get(&(chan, attr.to_string()))
            .cloned()
            .ok_or(HwError::AttrRejected)
    }

    fn enable(&mut self, chan: ChannelHandle) {
        self.events.push(SimEvent::Enable(chan));
    }

    fn disable(&mut self, chan: ChannelHandle) {
        self.events.push(SimEvent::Disable(chan));
    }

    fn create_buffer(
        &mut self,
        dev: DeviceHandle,
        nsamples: usize,
        cyclic: bool,
    ) -> Result<BufferHandle, HwError> {
        if !self.devices.values().any(|&d| d == dev) {
            return Err(HwError::BadHandle);
        }
        if nsamples == 0 {
            return Err(HwError::NoMem);
        }
        let buf = BufferHandle(self.fresh());
        self.buffers.insert(buf.0, SimBuffer { nsamples });
        self.events.push(SimEvent::CreateBuffer {
            dev,
            nsamples,
            cyclic,
        });
        Ok(buf)
    }

    fn push(&mut self, buf: BufferHandle, data: &[i16]) -> Result<usize, HwError> {
        let nsamples = self.buffers.get(&buf.0).ok_or(HwError::BadHandle)?.nsamples;
        if data.len() != 2 * nsamples {
            return Err(HwError::ShortTransfer(data.len() * 2));
        }
        self.tx_data = Some(data.to_vec());
        self.replay_pos = 0;
        self.events.push(SimEvent::Push { buf, nsamples });
        Ok(data.len() * 2)
    }

    fn refill(&mut self, buf: BufferHandle, data: &mut [i16]) -> Result<usize, HwError> {
        let nsamples = self.buffers.get(&buf.0).ok_or(HwError::BadHandle)?.nsamples;
        if data.len() != 2 * nsamples {
            return Err(HwError::ShortTransfer(data.len() * 2));
        }
        for pair in data.chunks_exact_mut(2) {
            let (i, q) = self.next_rx_pair();
            pair[0] = i;
            pair[1] = q;
        }
        self.events.push(SimEvent::Refill { buf });
        Ok(data.len() * 2)
    }

    fn destroy_buffer(&mut self, buf: BufferHandle) {
        self.buffers.remove(&buf.0);
        self.events.push(SimEvent::DestroyBuffer(buf));
    }

    fn destroy_context(&mut self) {
        self.events.push(SimEvent::DestroyContext);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_buffer(sim: &mut SimLoopback, nsamples: usize) -> BufferHandle {
        let dev = sim.resolve_device(TX_STREAM_DEVICE).unwrap();
        sim.create_buffer(dev, nsamples, false).unwrap()
    }

    fn rx_buffer(sim: &mut SimLoopback, nsamples: usize) -> BufferHandle {
        let dev = sim.resolve_device(RX_STREAM_DEVICE).unwrap();
        sim.create_buffer(dev, nsamples, false).unwrap()
    }

    #[test]
    fn replay_wraps_past_the_pushed_buffer() {
        let mut sim = SimLoopback::new();
        let tx = tx_buffer(&mut sim, 4);
        let rx = rx_buffer(&mut sim, 16);

        sim.push(tx, &[0, 160, 0, 320, 0, 480, 0, 640]).unwrap();
        let mut data = vec![0i16; 32];
        sim.refill(rx, &mut data).unwrap();

        // 16 received pairs from 4 transmitted ones: period 4.
        for n in 0..12 {
            assert_eq!(data[2 * n], data[2 * (n + 4)], "pair {n}");
            assert_eq!(data[2 * n + 1], data[2 * (n + 4) + 1], "pair {n}");
        }
    }

    #[test]
    fn replay_cursor_survives_across_refills() {
        let mut sim = SimLoopback::new();
        let tx = tx_buffer(&mut sim, 4);
        let rx = rx_buffer(&mut sim, 2);

        sim.push(tx, &[0, 160, 0, 320, 0, 480, 0, 640]).unwrap();
        let mut first = vec![0i16; 4];
        let mut second = vec![0i16; 4];
        sim.refill(rx, &mut first).unwrap();
        sim.refill(rx, &mut second).unwrap();

        // Second refill picks up at pairs 2 and 3, not back at pair 0.
        assert_ne!(first, second);
        let mut third = vec![0i16; 4];
        sim.refill(rx, &mut third).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn idle_refills_have_a_dc_offset_before_any_push() {
        let mut sim = SimLoopback::new();
        let rx = rx_buffer(&mut sim, 32);
        let mut data = vec![0i16; 64];
        sim.refill(rx, &mut data).unwrap();
        assert!(data.chunks_exact(2).all(|p| p[0] != 0 && p[1] == 0));
    }

    #[test]
    fn short_push_is_rejected() {
        let mut sim = SimLoopback::new();
        let tx = tx_buffer(&mut sim, 4);
        assert!(matches!(
            sim.push(tx, &[1, 2]),
            Err(HwError::ShortTransfer(_))
        ));
    }

    #[test]
    fn unknown_device_does_not_resolve() {
        let mut sim = SimLoopback::new();
        assert!(sim.resolve_device("cf-ad9364-lpc").is_none());
    }
}

//! Stream configuration sequencer.
//!
//! Attribute order matters and must not be shuffled: the RF port selection
//! establishes which analog path the numeric settings apply to, the device
//! only honours a manual gain value while gain control is in manual mode,
//! and the local oscillator channel is configured last, independently of the
//! baseband channel.

use log::info;

use crate::config::{Direction, StreamConfig};
use crate::hw::{ChannelHandle, DeviceHandle, Hardware, HwError};
use crate::Error;

pub const PHY_DEVICE: &str = "ad9361-phy";
pub const RX_STREAM_DEVICE: &str = "cf-ad9361-lpc";
pub const TX_STREAM_DEVICE: &str = "cf-ad9361-dds-core-lpc";

fn attr_err(attr: &str, source: HwError) -> Error {
    Error::Attribute {
        attr: attr.to_string(),
        source,
    }
}

pub fn stream_device_name(dir: Direction) -> &'static str {
    match dir {
        Direction::Rx => RX_STREAM_DEVICE,
        Direction::Tx => TX_STREAM_DEVICE,
    }
}

pub fn stream_device<H: Hardware>(hw: &mut H, dir: Direction) -> Result<DeviceHandle, Error> {
    let name = stream_device_name(dir);
    hw.resolve_device(name)
        .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
}

/// Baseband configuration channel on the phy device for (direction, id).
pub fn phy_channel<H: Hardware>(
    hw: &mut H,
    dir: Direction,
    chid: usize,
) -> Result<ChannelHandle, Error> {
    let phy = hw
        .resolve_device(PHY_DEVICE)
        .ok_or_else(|| Error::DeviceNotFound(PHY_DEVICE.to_string()))?;
    let name = format!("voltage{chid}");
    hw.resolve_channel(phy, &name, dir.is_output())
        .ok_or_else(|| Error::ChannelNotFound {
            device: PHY_DEVICE.to_string(),
            name,
        })
}

/// Local oscillator channel for a direction. LO channels are always output:
/// altvoltage0 carries the RX LO, altvoltage1 the TX LO.
pub fn lo_channel<H: Hardware>(hw: &mut H, dir: Direction) -> Result<ChannelHandle, Error> {
    let phy = hw
        .resolve_device(PHY_DEVICE)
        .ok_or_else(|| Error::DeviceNotFound(PHY_DEVICE.to_string()))?;
    let name = match dir {
        Direction::Rx => "altvoltage0",
        Direction::Tx => "altvoltage1",
    };
    hw.resolve_channel(phy, name, true)
        .ok_or_else(|| Error::ChannelNotFound {
            device: PHY_DEVICE.to_string(),
            name: name.to_string(),
        })
}

/// Streaming I/Q lane on a streaming device. Some device trees expose the
/// lanes as `altvoltageN` instead of `voltageN`, so fall back to that.
pub fn stream_channel<H: Hardware>(
    hw: &mut H,
    dev: DeviceHandle,
    dir: Direction,
    chid: usize,
) -> Result<ChannelHandle, Error> {
    let name = format!("voltage{chid}");
    if let Some(chan) = hw.resolve_channel(dev, &name, dir.is_output()) {
        return Ok(chan);
    }
    let alt = format!("altvoltage{chid}");
    hw.resolve_channel(dev, &alt, dir.is_output())
        .ok_or_else(|| Error::ChannelNotFound {
            device: stream_device_name(dir).to_string(),
            name,
        })
}

/// Applies a stream configuration to the phy channel `chid` of `dir` and to
/// the direction's LO channel, in the fixed order described above.
pub fn configure_stream<H: Hardware>(
    hw: &mut H,
    cfg: &StreamConfig,
    dir: Direction,
    chid: usize,
) -> Result<(), Error> {
    info!("acquiring {} phy channel {}", dir.label(), chid);
    let chan = phy_channel(hw, dir, chid)?;

    hw.attr_write_str(chan, "rf_port_select", &cfg.rfport)
        .map_err(|e| attr_err("rf_port_select", e))?;
    hw.attr_write_i64(chan, "rf_bandwidth", cfg.bw_hz)
        .map_err(|e| attr_err("rf_bandwidth", e))?;
    hw.attr_write_i64(chan, "sampling_frequency", cfg.fs_hz)
        .map_err(|e| attr_err("sampling_frequency", e))?;

    match dir {
        Direction::Tx => {
            hw.attr_write_i64(chan, "hardwaregain", cfg.gain_db)
                .map_err(|e| attr_err("hardwaregain", e))?;
            let gain = hw
                .attr_read_i64(chan, "hardwaregain")
                .map_err(|e| attr_err("hardwaregain", e))?;
            info!("TX attenuation is {gain} dB");
        }
        Direction::Rx => {
            // Manual mode first; the device ignores explicit gain otherwise.
            hw.attr_write_str(chan, "gain_control_mode", "manual")
                .map_err(|e| attr_err("gain_control_mode", e))?;
            let mode = hw
                .attr_read_str(chan, "gain_control_mode")
                .map_err(|e| attr_err("gain_control_mode", e))?;
            hw.attr_write_i64(chan, "hardwaregain", cfg.gain_db)
                .map_err(|e| attr_err("hardwaregain", e))?;
            let gain = hw
                .attr_read_i64(chan, "hardwaregain")
                .map_err(|e| attr_err("hardwaregain", e))?;
            info!("RX gain is {gain} dB, mode is {mode}");
        }
    }

    info!("acquiring {} lo channel", dir.label());
    let lo = lo_channel(hw, dir)?;
    hw.attr_write_i64(lo, "frequency", cfg.lo_hz)
        .map_err(|e| attr_err("frequency", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimEvent, SimLoopback};

    fn write_index(sim: &SimLoopback, attr: &str) -> usize {
        sim.events
            .iter()
            .position(|e| matches!(e, SimEvent::AttrWrite { attr: a, .. } if a == attr))
            .unwrap_or_else(|| panic!("no write of {attr}"))
    }

    #[test]
    fn rx_attributes_apply_in_dependency_order() {
        let mut sim = SimLoopback::new();
        configure_stream(&mut sim, &StreamConfig::loopback_rx(), Direction::Rx, 0).unwrap();

        let port = write_index(&sim, "rf_port_select");
        let bw = write_index(&sim, "rf_bandwidth");
        let fs = write_index(&sim, "sampling_frequency");
        let mode = write_index(&sim, "gain_control_mode");
        let gain = write_index(&sim, "hardwaregain");
        let lo = write_index(&sim, "frequency");

        assert!(port < bw && port < fs);
        assert!(mode < gain, "manual mode must precede the gain write");
        assert!(lo > gain && lo > fs, "LO frequency is written last");
    }

    #[test]
    fn tx_attributes_apply_in_dependency_order() {
        let mut sim = SimLoopback::new();
        configure_stream(&mut sim, &StreamConfig::loopback_tx(), Direction::Tx, 0).unwrap();

        let port = write_index(&sim, "rf_port_select");
        let bw = write_index(&sim, "rf_bandwidth");
        let fs = write_index(&sim, "sampling_frequency");
        let gain = write_index(&sim, "hardwaregain");
        let lo = write_index(&sim, "frequency");

        assert!(port < bw && bw < fs && fs < gain && gain < lo);
    }

    #[test]
    fn rx_readbacks_round_trip() {
        let mut sim = SimLoopback::new();
        configure_stream(&mut sim, &StreamConfig::loopback_rx(), Direction::Rx, 0).unwrap();

        let phy = phy_channel(&mut sim, Direction::Rx, 0).unwrap();
        assert_eq!(sim.attr_read_str(phy, "gain_control_mode").unwrap(), "manual");
        assert_eq!(sim.attr_read_i64(phy, "hardwaregain").unwrap(), 50);
    }

    #[test]
    fn rejected_attribute_is_fatal() {
        let mut sim = SimLoopback::new();
        sim.reject_attr("rf_bandwidth");
        let err =
            configure_stream(&mut sim, &StreamConfig::loopback_rx(), Direction::Rx, 0).unwrap_err();
        assert!(matches!(err, Error::Attribute { ref attr, .. } if attr == "rf_bandwidth"));
    }

    #[test]
    fn missing_phy_device_reports_resolution_failure() {
        let mut sim = SimLoopback::without_devices();
        let err =
            configure_stream(&mut sim, &StreamConfig::loopback_rx(), Direction::Rx, 0).unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(ref name) if name == PHY_DEVICE));
    }

    #[test]
    fn lo_channels_are_direction_specific_outputs() {
        let mut sim = SimLoopback::new();
        let rx_lo = lo_channel(&mut sim, Direction::Rx).unwrap();
        let tx_lo = lo_channel(&mut sim, Direction::Tx).unwrap();
        assert_ne!(rx_lo, tx_lo);
    }
}

pub mod buffer;
pub mod capture;
pub mod config;
pub mod hw;
pub mod run;
pub mod seq;
pub mod sim;
pub mod waveform;

use crate::hw::HwError;

pub type RawSample = i16;

/// Fatal run errors. There is no retry anywhere: a rejected attribute or a
/// failed buffer transfer means the hardware is in a state we do not
/// understand, so the only recourse is teardown.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no usable hardware context")]
    Context,

    #[error("device {0:?} not found")]
    DeviceNotFound(String),

    #[error("channel {name:?} not found on {device:?}")]
    ChannelNotFound { device: String, name: String },

    #[error("attribute {attr:?} rejected (value may not be supported): {source}")]
    Attribute { attr: String, source: HwError },

    #[error("buffer {op} failed: {source}")]
    Buffer { op: &'static str, source: HwError },
}

//! Hardware attribute interface.
//!
//! The transceiver is driven entirely through named attributes on named
//! channels of named devices, plus fixed-size streaming buffers. This trait
//! is that surface; the rest of the crate never talks to a device any other
//! way. Handles are opaque and owned by the backend for the lifetime of the
//! run.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u32);

#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("attribute not accepted by device")]
    AttrRejected,

    #[error("buffer allocation failed")]
    NoMem,

    #[error("short transfer ({0} bytes)")]
    ShortTransfer(usize),

    #[error("stale or unknown handle")]
    BadHandle,
}

/// One streaming sample is an interleaved (I, Q) pair of `i16`, so a buffer
/// of `nsamples` holds `2 * nsamples` words. Sample memory stays on the
/// caller's side; `push` and `refill` copy through this boundary.
pub trait Hardware {
    fn resolve_device(&mut self, name: &str) -> Option<DeviceHandle>;

    fn resolve_channel(
        &mut self,
        dev: DeviceHandle,
        name: &str,
        output: bool,
    ) -> Option<ChannelHandle>;

    fn attr_write_i64(&mut self, chan: ChannelHandle, attr: &str, val: i64)
    -> Result<(), HwError>;

    fn attr_read_i64(&mut self, chan: ChannelHandle, attr: &str) -> Result<i64, HwError>;

    fn attr_write_str(&mut self, chan: ChannelHandle, attr: &str, val: &str)
    -> Result<(), HwError>;

    fn attr_read_str(&mut self, chan: ChannelHandle, attr: &str) -> Result<String, HwError>;

    fn enable(&mut self, chan: ChannelHandle);

    fn disable(&mut self, chan: ChannelHandle);

    fn create_buffer(
        &mut self,
        dev: DeviceHandle,
        nsamples: usize,
        cyclic: bool,
    ) -> Result<BufferHandle, HwError>;

    /// Schedules the buffer contents for transmission; blocks until the
    /// transfer is handed to the device. Returns bytes written.
    fn push(&mut self, buf: BufferHandle, data: &[i16]) -> Result<usize, HwError>;

    /// Blocks until the buffer has been filled with fresh captured samples.
    /// Returns bytes read.
    fn refill(&mut self, buf: BufferHandle, data: &mut [i16]) -> Result<usize, HwError>;

    fn destroy_buffer(&mut self, buf: BufferHandle);

    fn destroy_context(&mut self);
}

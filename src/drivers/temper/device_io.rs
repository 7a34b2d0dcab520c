use hidapi::HidDevice;

use crate::error::Result;

/// Raw report I/O, implemented by [`HidDevice`] and by test doubles.
pub trait DeviceIO: Send + 'static {
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Reads one report; `Ok(0)` when nothing arrived within `timeout_ms`.
    fn read(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;
}

impl DeviceIO for HidDevice {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        Ok(Self::write(self, buf)?)
    }

    fn read(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize> {
        Ok(Self::read_timeout(self, buf, timeout_ms)?)
    }
}

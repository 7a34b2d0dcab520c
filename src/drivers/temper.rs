//! USB HID thermometers of the TEMPer family.

pub mod device_io;
pub mod protocol;
pub mod sensor;

use std::sync::Arc;

use async_trait::async_trait;
use hidapi::{HidApi, HidDevice};
use log::info;
use tokio::sync::Mutex;

use self::{device_io::DeviceIO, protocol::Model, sensor::Sensor};
use crate::{
    config::UsbSelector,
    error::{Error, Result},
};

/// TEMPerGold exposes a keyboard emulation on interface 0; readings come
/// from interface 1.
const DATA_INTERFACE: i32 = 1;

/// Something that reports a temperature in degrees Celsius.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Thermometer: Send + Sync {
    async fn read_celsius(&self) -> Result<f64>;
}

/// Async wrapper running [`Sensor`] requests on the blocking pool.
///
/// # Example
///
/// ```no_run
/// use camlinkd::{config::UsbSelector, drivers::temper::{TemperDevice, Thermometer}};
/// use hidapi::HidApi;
///
/// # async fn example() -> anyhow::Result<()> {
/// let api = HidApi::new()?;
/// let usb = UsbSelector { vid: 0x413d, pid: 0x2107, serial: None };
/// let device = TemperDevice::find(&api, &usb)?;
/// println!("{:.1} °C", device.read_celsius().await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TemperDevice<Io: DeviceIO = HidDevice>(Arc<Mutex<Sensor<Io>>>);

impl<Io: DeviceIO> TemperDevice<Io> {
    pub fn new(sensor: Sensor<Io>) -> Self {
        Self(Arc::new(Mutex::new(sensor)))
    }

    pub async fn firmware(&self) -> Result<String> {
        let sensor = self.0.clone();
        tokio::task::spawn_blocking(move || sensor.blocking_lock().firmware())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

impl TemperDevice<HidDevice> {
    /// Opens the first HID device matching `usb`. No match is
    /// [`Error::DeviceNotFound`].
    pub fn find(api: &HidApi, usb: &UsbSelector) -> Result<Self> {
        let mut candidates: Vec<_> = api
            .device_list()
            .filter(|d| d.vendor_id() == usb.vid && d.product_id() == usb.pid)
            .filter(|d| match &usb.serial {
                Some(serial) => d.serial_number() == Some(serial.as_str()),
                None => true,
            })
            .inspect(|d| {
                info!(
                    "{:?} device {:04x}:{:04x} interface {}",
                    d.product_string(),
                    d.vendor_id(),
                    d.product_id(),
                    d.interface_number()
                )
            })
            .collect();
        candidates.sort_by_key(|d| d.interface_number() != DATA_INTERFACE);

        let info = candidates
            .first()
            .ok_or_else(|| Error::DeviceNotFound(format!("TEMPer {usb}")))?;
        let dev = info.open_device(api)?;

        Ok(Self::new(Sensor::new(
            format!("TEMPer {:04x}:{:04x}", usb.vid, usb.pid),
            dev,
            Model::from_ids(usb.vid, usb.pid),
        )))
    }
}

#[async_trait]
impl<Io: DeviceIO> Thermometer for TemperDevice<Io> {
    async fn read_celsius(&self) -> Result<f64> {
        let sensor = self.0.clone();
        tokio::task::spawn_blocking(move || sensor.blocking_lock().read_celsius())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }
}

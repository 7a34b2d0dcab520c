use log::debug;

use super::{
    device_io::DeviceIO,
    protocol::{Command, Model, REPORT_LEN, Response},
};
use crate::error::{Error, Result};

/// Per-attempt read timeout in milliseconds.
pub const READ_TIMEOUT: i32 = 200;

/// Write-then-read attempts before a request times out.
pub const MAX_ATTEMPTS: usize = 10;

/// Blocking TEMPer handle. Every call blocks for up to
/// `MAX_ATTEMPTS * READ_TIMEOUT` ms and must run off the async workers.
#[derive(Debug)]
pub struct Sensor<Io: DeviceIO> {
    pub name: String,
    pub dev: Io,
    pub model: Model,
}

impl<Io: DeviceIO> Sensor<Io> {
    pub fn new(name: impl Into<String>, dev: Io, model: Model) -> Self {
        Self {
            name: name.into(),
            dev,
            model,
        }
    }

    fn request(&self, cmd: Command) -> Result<Response> {
        let pkt = cmd.to_bytes();
        let mut buf = [0u8; REPORT_LEN];

        for attempt in 1..=MAX_ATTEMPTS {
            self.dev.write(&pkt)?;
            let n = self.dev.read(&mut buf, READ_TIMEOUT)?;
            if n >= 4 {
                return Response::parse(&cmd, self.model, &buf[..n]);
            }
            debug!("{}: no report on attempt {attempt}/{MAX_ATTEMPTS}", self.name);
        }

        Err(Error::Timeout(format!(
            "{}: no answer after {MAX_ATTEMPTS} attempts",
            self.name
        )))
    }

    pub fn read_celsius(&self) -> Result<f64> {
        match self.request(Command::ReadTemperature)? {
            Response::Temperature { celsius } => Ok(celsius),
            other => Err(Error::Io(std::io::Error::other(format!(
                "unexpected response {other:?}"
            )))),
        }
    }

    pub fn firmware(&self) -> Result<String> {
        match self.request(Command::GetFirmware)? {
            Response::Firmware(version) => Ok(version),
            other => Err(Error::Io(std::io::Error::other(format!(
                "unexpected response {other:?}"
            )))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{collections::VecDeque, sync::Mutex};

    /// Scripted device; an empty reply stands for a read timeout.
    #[derive(Default)]
    pub struct FakeIo {
        pub writes: Mutex<Vec<Vec<u8>>>,
        pub replies: Mutex<VecDeque<Vec<u8>>>,
    }

    impl FakeIo {
        pub fn with_replies(replies: Vec<Vec<u8>>) -> Self {
            Self {
                writes: Mutex::new(Vec::new()),
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl DeviceIO for FakeIo {
        fn write(&self, buf: &[u8]) -> Result<usize> {
            self.writes.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn read(&self, buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or_default();
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }
    }

    pub fn gold_report(centi: i16) -> Vec<u8> {
        let [hi, lo] = centi.to_be_bytes();
        vec![0x80, 0x02, hi, lo, 0x00, 0x00, 0x00, 0x00]
    }

    #[test]
    fn reads_after_retries() {
        let io = FakeIo::with_replies(vec![vec![], vec![], gold_report(2150)]);
        let sensor = Sensor::new("temper", io, Model::TemperGold);

        assert_eq!(sensor.read_celsius().unwrap(), 21.5);
        assert_eq!(sensor.dev.writes.lock().unwrap().len(), 3);
    }

    #[test]
    fn times_out_after_ten_attempts() {
        let sensor = Sensor::new("temper", FakeIo::default(), Model::TemperGold);

        let err = sensor.read_celsius().unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(sensor.dev.writes.lock().unwrap().len(), MAX_ATTEMPTS);
    }
}

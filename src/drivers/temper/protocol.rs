use crate::error::{Error, Result};

/// TEMPer report length, without the HID report id.
pub const REPORT_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Model {
    /// `413d:2107`, centi-degrees.
    TemperGold,
    /// `0c45:7401`, 1/256 degree.
    Temper1,
}

impl Model {
    pub const TEMPER_GOLD_IDS: (u16, u16) = (0x413d, 0x2107);
    pub const TEMPER1_IDS: (u16, u16) = (0x0c45, 0x7401);

    /// Unknown ids are treated as TEMPerGold, the current hardware revision.
    pub fn from_ids(vid: u16, pid: u16) -> Self {
        if (vid, pid) == Self::TEMPER1_IDS {
            Model::Temper1
        } else {
            Model::TemperGold
        }
    }

    fn divisor(self) -> f64 {
        match self {
            Model::TemperGold => 100.0,
            Model::Temper1 => 256.0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Command {
    ReadTemperature,
    GetFirmware,
}

impl Command {
    /// Output report including the leading report id `0x00`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body: [u8; REPORT_LEN] = match self {
            Command::ReadTemperature => [0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00],
            Command::GetFirmware => [0x01, 0x86, 0xff, 0x01, 0x00, 0x00, 0x00, 0x00],
        };
        let mut buf = Vec::with_capacity(REPORT_LEN + 1);
        buf.push(0x00);
        buf.extend_from_slice(&body);
        buf
    }
}

#[derive(Debug, PartialEq)]
pub enum Response {
    Temperature { celsius: f64 },
    Firmware(String),
}

impl Response {
    pub fn parse(cmd: &Command, model: Model, buf: &[u8]) -> Result<Self> {
        match cmd {
            Command::ReadTemperature => {
                let raw = buf
                    .get(2..4)
                    .ok_or_else(|| Error::Io(std::io::Error::other("short temperature report")))?;
                let raw = i16::from_be_bytes([raw[0], raw[1]]);
                Ok(Response::Temperature {
                    celsius: f64::from(raw) / model.divisor(),
                })
            }
            Command::GetFirmware => {
                let text: String = buf
                    .iter()
                    .take_while(|b| **b != 0)
                    .map(|b| *b as char)
                    .collect();
                Ok(Response::Firmware(text.trim().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn read_command_has_report_id() {
        assert_eq!(
            Command::ReadTemperature.to_bytes(),
            vec![0x00, 0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn gold_uses_centidegrees() {
        // 0x0997 = 2455
        let buf = [0x80, 0x02, 0x09, 0x97, 0x4e, 0x20, 0x00, 0x00];
        let resp = Response::parse(&Command::ReadTemperature, Model::TemperGold, &buf).unwrap();
        assert_eq!(resp, Response::Temperature { celsius: 24.55 });
    }

    #[test]
    fn temper1_uses_256ths_and_sign() {
        // 0xfe00 = -512
        let buf = [0x80, 0x02, 0xfe, 0x00, 0x00, 0x00, 0x00, 0x00];
        let resp = Response::parse(&Command::ReadTemperature, Model::Temper1, &buf).unwrap();
        assert_eq!(resp, Response::Temperature { celsius: -2.0 });
    }

    #[test]
    fn short_report() {
        assert!(Response::parse(&Command::ReadTemperature, Model::TemperGold, &[0x80]).is_err());
    }

    #[test]
    fn model_from_ids() {
        assert_eq!(Model::from_ids(0x0c45, 0x7401), Model::Temper1);
        assert_eq!(Model::from_ids(0x413d, 0x2107), Model::TemperGold);
    }

    #[test]
    fn firmware_string() {
        let resp = Response::parse(&Command::GetFirmware, Model::TemperGold, b"TEMPerGo").unwrap();
        assert_eq!(resp, Response::Firmware("TEMPerGo".into()));
    }
}

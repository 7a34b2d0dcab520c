//! Persistent byte-stream sources (TCP bridges and serial devices).

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use futures::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncRead, net::TcpStream};
use tokio_util::{
    codec::{Decoder, FramedRead},
    sync::CancellationToken,
};

use super::usb;
use crate::{
    config::UsbSelector,
    error::{Error, Result},
};

pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Where a stream-driven package reads its frames from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEndpoint {
    /// Serial-to-Ethernet bridge.
    Tcp { ip: String, port: u16 },
    /// Device node such as `/dev/ttyUSB0`.
    Device { path: PathBuf },
    /// USB serial adapter, resolved to its tty at open time.
    Usb(UsbSelector),
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEndpoint::Tcp { ip, port } => write!(f, "tcp://{ip}:{port}"),
            StreamEndpoint::Device { path } => write!(f, "{}", path.display()),
            StreamEndpoint::Usb(usb) => write!(f, "usb {usb}"),
        }
    }
}

impl StreamEndpoint {
    /// Opens the endpoint. Every failure is fatal: the process is expected to
    /// be restarted rather than to reconnect in place.
    pub async fn open(&self, sysfs_root: &Path, timeout: Duration) -> Result<ByteStream> {
        let stream: ByteStream = match self {
            StreamEndpoint::Tcp { ip, port } => {
                let connect = TcpStream::connect((ip.as_str(), *port));
                let socket = tokio::time::timeout(timeout, connect)
                    .await
                    .map_err(|_| Error::SourceClosed(format!("{self}: connect timed out")))?
                    .map_err(|e| Error::SourceClosed(format!("{self}: {e}")))?;
                Box::new(socket)
            }
            StreamEndpoint::Device { path } => Box::new(open_device(path).await?),
            StreamEndpoint::Usb(selector) => {
                let path = usb::find_tty(sysfs_root, selector)?;
                Box::new(open_device(&path).await?)
            }
        };
        info!("Opened stream source {self}");
        Ok(stream)
    }
}

async fn open_device(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::DeviceNotFound(path.display().to_string())
        } else {
            Error::SourceClosed(format!("{}: {e}", path.display()))
        }
    })
}

/// Decoded frames of a stream source.
pub struct Frames<C> {
    name: String,
    inner: FramedRead<ByteStream, C>,
}

impl<C> Frames<C>
where
    C: Decoder<Item = String, Error = std::io::Error>,
{
    pub fn new(name: impl Into<String>, stream: ByteStream, codec: C) -> Self {
        Self {
            name: name.into(),
            inner: FramedRead::new(stream, codec),
        }
    }

    /// Next frame. End of stream and read errors are [`Error::SourceClosed`].
    pub async fn next_frame(&mut self) -> Result<String> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(e)) => Err(Error::SourceClosed(format!("{}: {e}", self.name))),
            None => Err(Error::SourceClosed(format!("{}: end of stream", self.name))),
        }
    }

    /// Like [`Frames::next_frame`], but `Ok(None)` once `cancel` fires.
    pub async fn next_or_cancelled(&mut self, cancel: &CancellationToken) -> Result<Option<String>> {
        cancel.run_until_cancelled(self.next_frame()).await.transpose()
    }
}

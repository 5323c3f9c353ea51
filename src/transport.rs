//! Line transport to the instrument: a USBTMC character device (how the
//! meters show up when connected over USB) or an RS-232 serial port.
//! `Transport::open` hides the difference and picks the right one.

use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;

use crate::proto::codec::LineCodec;
use crate::proto::{ProtoError, Result};

/// Baud rates the meters support on their serial interface.
pub const BAUDRATES: &[u32] = &[1200, 2400, 4800, 9600, 19200, 38400, 57600];

/// Default baud rate for the serial transport.
pub const DEFAULT_BAUDRATE: u32 = 9600;

/// Fixed read timeout on the serial transport. The USBTMC transport has
/// none; a stalled read there blocks until the device answers.
const SERIAL_TIMEOUT: Duration = Duration::from_secs(5);

trait LineIo:
    futures::Sink<String, Error = std::io::Error> + futures::Stream<Item = std::io::Result<String>>
{
}

impl<T> LineIo for T where
    T: futures::Sink<String, Error = std::io::Error>
        + futures::Stream<Item = std::io::Result<String>>
{
}

/// A line-oriented connection to one instrument. One logical caller per
/// handle; every exchange runs to completion before the next can start.
pub struct Transport {
    stream: Pin<Box<dyn LineIo>>,
    devnode: String,
    kind: &'static str,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("devnode", &self.devnode)
            .field("kind", &self.kind)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Open `devnode`, trying the USBTMC character device transport first
    /// and falling back to serial when the device is not a USBTMC one. A
    /// missing or inaccessible device node is fatal and reported
    /// immediately; if no transport recognizes the device, the error lists
    /// every attempt.
    pub async fn open(devnode: &str, baudrate: Option<u32>) -> Result<Self> {
        let baudrate = baudrate.unwrap_or(DEFAULT_BAUDRATE);
        if !BAUDRATES.contains(&baudrate) {
            return Err(ProtoError::Connection {
                devnode: devnode.to_string(),
                reason: format!("bad baud rate '{baudrate}'"),
            });
        }

        let mut attempts: Vec<(&str, ProtoError)> = Vec::new();

        #[cfg(unix)]
        match Self::open_usbtmc(devnode) {
            Ok(transport) => return Ok(transport),
            Err(err @ ProtoError::Connection { .. }) => return Err(err),
            Err(err) => attempts.push(("usbtmc", err)),
        }

        match Self::open_serial(devnode, baudrate) {
            Ok(transport) => Ok(transport),
            Err(err) => {
                attempts.push(("serial", err));
                let details = attempts
                    .iter()
                    .map(|(kind, err)| format!(" * {kind}: {err}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                Err(ProtoError::AutoDetect {
                    devnode: devnode.to_string(),
                    details,
                })
            }
        }
    }

    #[cfg(unix)]
    fn open_usbtmc(devnode: &str) -> Result<Self> {
        use std::os::unix::fs::FileTypeExt;
        use std::os::unix::io::AsRawFd;

        // IOCTL clearing the device's input and output buffers. Only the
        // USBTMC driver implements it, so it doubles as the class check.
        const USBTMC_IOCTL_CLEAR: libc::c_ulong = 0x5b02;

        let metadata = std::fs::metadata(devnode).map_err(|err| ProtoError::Connection {
            devnode: devnode.to_string(),
            reason: err.to_string(),
        })?;
        if !metadata.file_type().is_char_device() {
            return Err(ProtoError::WrongDeviceClass {
                devnode: devnode.to_string(),
                kind: "usbtmc",
            });
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(devnode)
            .map_err(|err| ProtoError::Connection {
                devnode: devnode.to_string(),
                reason: err.to_string(),
            })?;

        let ret = unsafe { libc::ioctl(file.as_raw_fd(), USBTMC_IOCTL_CLEAR) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(if err.raw_os_error() == Some(libc::ENOTTY) {
                ProtoError::WrongDeviceClass {
                    devnode: devnode.to_string(),
                    kind: "usbtmc",
                }
            } else {
                ProtoError::Io {
                    context: format!("ioctl on device '{devnode}' failed"),
                    source: err,
                }
            });
        }

        log::debug!("{devnode}: opened as a usbtmc device");
        Ok(Self {
            stream: Box::pin(LineCodec.framed(tokio::fs::File::from_std(file))),
            devnode: devnode.to_string(),
            kind: "usbtmc",
            read_timeout: None,
        })
    }

    fn open_serial(devnode: &str, baudrate: u32) -> Result<Self> {
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(devnode, baudrate)
            .timeout(SERIAL_TIMEOUT)
            .open_native_async()
            .map_err(|err| ProtoError::Connection {
                devnode: devnode.to_string(),
                reason: err.to_string(),
            })?;

        #[cfg(unix)]
        port.set_exclusive(false)
            .map_err(|err| ProtoError::Connection {
                devnode: devnode.to_string(),
                reason: err.to_string(),
            })?;

        log::debug!("{devnode}: opened as a serial device at {baudrate} baud");
        Ok(Self {
            stream: Box::pin(LineCodec.framed(port)),
            devnode: devnode.to_string(),
            kind: "serial",
            read_timeout: Some(SERIAL_TIMEOUT),
        })
    }

    /// Wrap an in-memory stream; lets the tests drive the whole engine
    /// without hardware.
    #[cfg(test)]
    pub(crate) fn from_stream<S>(stream: S, devnode: &str) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + 'static,
    {
        Self {
            stream: Box::pin(LineCodec.framed(stream)),
            devnode: devnode.to_string(),
            kind: "fake",
            read_timeout: None,
        }
    }

    pub fn devnode(&self) -> &str {
        &self.devnode
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Write one line, the line terminator is appended here.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        log::debug!("{}: sent: {}", self.devnode, line.trim_start());
        self.stream
            .send(line.to_string())
            .await
            .map_err(|err| ProtoError::Io {
                context: format!("error while writing to device '{}'", self.devnode),
                source: err,
            })
    }

    /// Read one line, blocking until the terminator arrives or the
    /// transport's read timeout expires.
    pub async fn read_line(&mut self) -> Result<String> {
        let next = self.stream.next();
        let item = match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, next)
                .await
                .map_err(|_| ProtoError::Timeout(self.devnode.clone()))?,
            None => next.await,
        };
        let line = match item {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                return Err(ProtoError::Io {
                    context: format!("error while reading from device '{}'", self.devnode),
                    source: err,
                })
            }
            None => {
                return Err(ProtoError::Io {
                    context: format!("error while reading from device '{}'", self.devnode),
                    source: std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "device closed the connection",
                    ),
                })
            }
        };
        log::debug!("{}: received: {}", self.devnode, line);
        Ok(line)
    }

    /// Write `line` and return the response line.
    pub async fn query_line(&mut self, line: &str) -> Result<String> {
        self.write_line(line).await?;
        self.read_line().await
    }
}

//!
//! This library provides control of Yokogawa WT210 and WT310/WT330 digital
//! power meters over their USB (USBTMC) or RS-232 interfaces.
//!
//! <br>
//!
//! # Details
//!
//! - The instrument shows up as a USBTMC character device when connected
//!   over USB, or as a serial port; `PowerMeter::open` figures out which.
//!
//! - Commands use stable human-facing names; the library translates them to
//!   the wire commands of the connected model, verifies arguments, and
//!   decodes device error codes.
//!
//! - Basic setup and connection
//!
//!   ```no_run
//!   use wtctrl::{PowerMeter, DEFAULT_TTY};
//!   #[tokio::main]
//!   async fn main() -> wtctrl::Result<()> {
//!       let mut meter = PowerMeter::open(DEFAULT_TTY, None, None).await?;
//!       if let Some(id) = meter.command("get-id", None).await? {
//!           eprintln!("Connected to: {id}\n");
//!       }
//!       Ok(())
//!   }
//!   ```
//!
//! # Supported devices
//!
//!  * Yokogawa WT210
//!  * Yokogawa WT310, WT310HC
//!  * Yokogawa WT330 series (one input element)
//!

pub mod device;
pub mod proto;
pub mod transport;

pub use device::PowerMeter;
pub use proto::{Model, ProtoError, Result, Value};
pub use transport::{BAUDRATES, DEFAULT_BAUDRATE};

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/usbtmc0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

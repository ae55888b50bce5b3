//! # speedwire
//!
//! Client for the UDP-based Speedwire protocol spoken by SMA
//! photovoltaic inverters and energy meters on the local network.
//!
//! ## Architecture
//! - A [`Station`] per network interface owns the multicast socket and
//!   runs the single receive loop, demultiplexing envelopes by source IP.
//! - A [`Device`] per peer handles identification, login and typed
//!   value queries (inverters) or consumes broadcasts (meters).
//! - [`Station::discover`] materializes sessions from whatever answers
//!   on the multicast group.
//! - [`values`] maps vendor codes and OBIS identifiers to the closed
//!   [`ValueId`] catalog with units and scale factors.
//!
//! The wire codec lives in the [`speedwire_proto`] crate, re-exported
//! as [`proto`].
//!
//! ```no_run
//! use std::time::Duration;
//! use speedwire::{Device, Station, ValueId};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> speedwire::Result<()> {
//! let station = Station::open("").await?;
//! let cancel = CancellationToken::new();
//!
//! let device = Device::open(&station, "192.168.2.123", "0000", &cancel).await?;
//! let power = device
//!     .value(ValueId::ActivePowerPlus, Duration::from_secs(5), &cancel)
//!     .await?;
//! println!("{power:?}");
//! # Ok(())
//! # }
//! ```

pub use speedwire_proto as proto;

pub mod device;
mod discover;
pub mod error;
pub mod station;
pub mod values;

pub use device::Device;
pub use error::{Error, Result};
pub use station::{IpObservation, Station, Subscription};
pub use values::{Quantity, Value, ValueId, ValueInfo};

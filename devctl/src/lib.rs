//! Userland client library for a BSD-style kernel's device-control
//! channel (`drvctl(4)`): device-tree enumeration and hotplug event
//! monitoring.
//!
//! A [`Context`] owns the channel to the kernel. From it, build an
//! [`Enumerator`] to walk the current device tree, or a [`Monitor`] to
//! receive hotplug events as they happen. [`Device`] records are
//! immutable, cheaply cloned snapshots; neither they nor the handles
//! that produce them parse the kernel's externalized property
//! dictionaries beyond the handful of well-known fields this crate
//! needs -- callers who need the full dictionary get it verbatim from
//! [`Device::externalize`].
//!
//! Advanced callers who want to point this crate at something other
//! than a real `drvctl(4)` device (a test harness, a proxy, a
//! record/replay shim) can implement [`Channel`] and
//! [`DriverTable`] themselves and hand them to
//! [`Context::with_parts`].

mod channel;
mod context;
mod device;
mod driver_table;
mod enumerator;
mod error;
mod filter;
mod ioutil;
mod list;
mod monitor;
#[cfg(test)]
mod testutil;

pub use channel::{Channel, DrvctlChannel, EventRecord, PropertyReply, DEFAULT_CHANNEL_PATH};
pub use context::Context;
pub use device::{Device, NodeType, EVENT_ATTACH, UNKNOWN_CLASS, UNKNOWN_UNIT};
pub use driver_table::{DriverInfo, DriverTable, NullDriverTable, StaticDriverTable, SysctlDriverTable};
pub use enumerator::{Enumerator, UNLIMITED_DEPTH};
pub use error::{Error, Result};
pub use filter::Filter;
pub use list::DeviceList;
pub use monitor::Monitor;

//! Device records: immutable snapshots of a single device's attributes,
//! grounded in `original_source/xdev_device.c`'s `xdev_device_new` /
//! `xdev_device_from_devname` / `xdev_device_from_node`.

use std::sync::Arc;

use crate::channel::Channel;
use crate::context::Context;
use crate::driver_table::DriverTable;
use crate::error::{Error, Result};

/// Placeholder used for `devclass`/`devsubclass` whenever the kernel
/// protocol doesn't surface them -- `spec.md` §9 is explicit that this
/// value should never be synthesized into something more specific.
pub const UNKNOWN_CLASS: &str = "???";

/// Event tag used for devices produced by enumeration rather than by a
/// live hotplug event.
pub const EVENT_ATTACH: &str = "device-attach";

/// Sentinel for an unknown instance number (events don't carry one).
pub const UNKNOWN_UNIT: u32 = u32::MAX;

/// The kind of device node `Device::from_node` should resolve a major
/// number against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Char,
    Block,
}

struct DeviceInner {
    context: Context,
    devname: String,
    driver: String,
    devclass: String,
    devsubclass: String,
    event: String,
    parent: String,
    unit: u32,
    xml: String,
}

/// An immutable, reference-counted snapshot of one device's attributes.
///
/// `Device` is cheap to `Clone` (an `Arc` bump) and holds a strong
/// reference to the [`Context`] it was built from, keeping the
/// driver-control channel alive for as long as any device record
/// derived from it exists.
#[derive(Clone)]
pub struct Device(Arc<DeviceInner>);

impl Device {
    #[allow(clippy::too_many_arguments)]
    fn new(
        context: Context,
        devname: impl Into<String>,
        driver: impl Into<String>,
        devclass: impl Into<String>,
        devsubclass: impl Into<String>,
        event: impl Into<String>,
        parent: impl Into<String>,
        xml: impl Into<String>,
        unit: u32,
    ) -> Self {
        Device(Arc::new(DeviceInner {
            context,
            devname: devname.into(),
            driver: driver.into(),
            devclass: devclass.into(),
            devsubclass: devsubclass.into(),
            event: event.into(),
            parent: parent.into(),
            unit,
            xml: xml.into(),
        }))
    }

    /// Issues a `get-properties` request for `devname` on the context's
    /// channel and builds a device record from the reply.
    ///
    /// Mirrors `xdev_device_from_devname`: `device-driver` and
    /// `device-unit` are required; a missing `device-parent` means the
    /// node is a top-level entry in the tree (stored as an empty
    /// string). The entire reply is kept, externalized, as `xml`.
    pub fn from_devname(context: &Context, devname: &str) -> Result<Self> {
        if devname.is_empty() {
            return Err(Error::InvalidArgument("device name is empty".into()));
        }

        let reply = context.channel().get_properties(devname)?;

        Ok(Device::new(
            context.clone(),
            devname,
            reply.driver,
            UNKNOWN_CLASS,
            UNKNOWN_CLASS,
            EVENT_ATTACH,
            reply.parent.unwrap_or_default(),
            reply.raw,
            reply.unit,
        ))
    }

    /// Resolves `major` to a driver name through the context's
    /// [`DriverTable`], builds the device name as `{driver}{unit}`, and
    /// delegates to [`Device::from_devname`].
    ///
    /// Mirrors `xdev_device_from_node`.
    pub fn from_node(context: &Context, major: i32, unit: u32, node_type: NodeType) -> Result<Self> {
        let info = context
            .driver_table()
            .lookup(major)
            .ok_or(Error::NotFound)?;

        let driver = match node_type {
            NodeType::Char if info.char_major == major => info.name,
            NodeType::Block if info.block_major == major => info.name,
            _ => return Err(Error::NotFound),
        };

        let devname = format!("{driver}{unit}");
        Device::from_devname(context, &devname)
    }

    /// Builds a device record directly from a decoded hotplug event,
    /// without a round trip through `get-properties`. Used by the
    /// monitor's producer thread (`spec.md` §4.6 step 5): `devclass`/
    /// `devsubclass` are always `"???"` and `unit` is always
    /// [`UNKNOWN_UNIT`], since events don't carry those fields.
    pub(crate) fn from_event(
        context: &Context,
        event: impl Into<String>,
        device: impl Into<String>,
        parent: impl Into<String>,
        xml: impl Into<String>,
    ) -> Self {
        Device::new(
            context.clone(),
            device,
            UNKNOWN_CLASS,
            UNKNOWN_CLASS,
            UNKNOWN_CLASS,
            event,
            parent,
            xml,
            UNKNOWN_UNIT,
        )
    }

    /// The context this device was resolved through.
    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn devname(&self) -> &str {
        &self.0.devname
    }

    pub fn driver(&self) -> &str {
        &self.0.driver
    }

    pub fn devclass(&self) -> &str {
        &self.0.devclass
    }

    pub fn devsubclass(&self) -> &str {
        &self.0.devsubclass
    }

    pub fn event(&self) -> &str {
        &self.0.event
    }

    pub fn parent(&self) -> &str {
        &self.0.parent
    }

    pub fn unit(&self) -> u32 {
        self.0.unit
    }

    /// Resolves the device's own major number for the given node type
    /// by looking its driver name back up in the context's
    /// [`DriverTable`].
    pub fn major(&self, node_type: NodeType) -> Option<i32> {
        let info = self.0.context.driver_table().lookup_by_name(&self.0.driver)?;
        Some(match node_type {
            NodeType::Char => info.char_major,
            NodeType::Block => info.block_major,
        })
    }

    /// The opaque, externalized property (or event) blob this device
    /// was built from. This crate never parses it; callers who need to
    /// inspect it should use their own externalization-aware library.
    pub fn externalize(&self) -> &str {
        &self.0.xml
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("devname", &self.0.devname)
            .field("driver", &self.0.driver)
            .field("event", &self.0.event)
            .field("parent", &self.0.parent)
            .field("unit", &self.0.unit)
            .finish_non_exhaustive()
    }
}

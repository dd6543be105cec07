//! The root handle: owns the driver-control channel and (indirectly,
//! through every [`Device`], [`Enumerator`](crate::Enumerator), and
//! [`Monitor`](crate::Monitor) built from it) keeps it alive.
//!
//! Mirrors `original_source/xdev.c`'s `xdev_new`/`xdev_ref`/`xdev_unref`.
//! There is no magic word and no explicit `ref`/`unref` pair here:
//! `Context` is an `Arc` handle, so `Clone` and `Drop` already give the
//! reference-counting discipline `spec.md` §4.1 describes, and an
//! invalid handle is unrepresentable rather than merely checked for.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::channel::{Channel, DrvctlChannel};
use crate::driver_table::{DriverTable, NullDriverTable, SysctlDriverTable};
use crate::error::Result;

struct ContextInner {
    channel: Arc<dyn Channel>,
    driver_table: Arc<dyn DriverTable>,
    user_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

/// Owns the driver-control channel. The root of every other handle's
/// ownership graph (`spec.md` §3).
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    /// Opens the default driver-control device and wires up the real,
    /// sysctl-based driver table.
    pub fn new() -> Result<Self> {
        let channel = Arc::new(DrvctlChannel::open()?);
        Ok(Self::with_parts(channel, Arc::new(SysctlDriverTable)))
    }

    /// Opens the driver-control device at `path` instead of the default.
    pub fn new_with_path(path: &str) -> Result<Self> {
        let channel = Arc::new(DrvctlChannel::open_path(path)?);
        Ok(Self::with_parts(channel, Arc::new(SysctlDriverTable)))
    }

    /// Builds a context over a caller-supplied channel, with a driver
    /// table that never resolves a major number. Handy for tests that
    /// only exercise `Device::from_devname`, the enumerator, or the
    /// monitor.
    pub fn new_with_channel(channel: Arc<dyn Channel>) -> Result<Self> {
        Ok(Self::with_parts(channel, Arc::new(NullDriverTable)))
    }

    /// Builds a context over caller-supplied channel and driver-table
    /// implementations. The seam tests use to inject mocks.
    pub fn with_parts(channel: Arc<dyn Channel>, driver_table: Arc<dyn DriverTable>) -> Self {
        Context(Arc::new(ContextInner {
            channel,
            driver_table,
            user_data: Mutex::new(None),
        }))
    }

    pub(crate) fn channel(&self) -> &Arc<dyn Channel> {
        &self.0.channel
    }

    pub(crate) fn driver_table(&self) -> &Arc<dyn DriverTable> {
        &self.0.driver_table
    }

    /// Retrieves the caller-supplied user data, if any was set.
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.0.user_data.lock().expect("user_data lock poisoned").clone()
    }

    /// Attaches arbitrary caller data to this context, replacing
    /// whatever was set before.
    pub fn set_user_data(&self, data: Arc<dyn Any + Send + Sync>) {
        *self.0.user_data.lock().expect("user_data lock poisoned") = Some(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChannel;

    #[test]
    fn user_data_round_trips() {
        let ctx = Context::new_with_channel(Arc::new(MockChannel::new())).unwrap();
        assert!(ctx.user_data().is_none());

        ctx.set_user_data(Arc::new(42i32));
        let got = ctx.user_data().unwrap();
        assert_eq!(*got.downcast_ref::<i32>().unwrap(), 42);
    }

    #[test]
    fn clone_shares_the_same_channel() {
        let ctx = Context::new_with_channel(Arc::new(MockChannel::new())).unwrap();
        let clone = ctx.clone();
        assert!(Arc::ptr_eq(ctx.channel(), clone.channel()));
    }
}

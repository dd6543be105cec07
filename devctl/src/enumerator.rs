//! Recursive device-tree enumeration, grounded in
//! `original_source/xdev_enumerate.c`'s `xdev_enumerate_scan_devices`
//! and its recursive helper.
//!
//! The walk is post-order: a node's descendants are fully resolved and
//! appended before the node itself is. `list_children` already retries
//! internally on a count/fetch race (`Channel::list_children`); a
//! child that still disappears between being named and having its own
//! properties fetched is treated as a benign, already-detached device
//! and simply skipped rather than failing the whole scan.

use std::sync::Arc;

use crate::context::Context;
use crate::device::Device;
use crate::error::Result;
use crate::filter::Filter;
use crate::list::DeviceList;

/// Sentinel `max_depth` meaning "no limit", the idiomatic stand-in for
/// `spec.md` §4.5's `max_depth = -1` now that depth is unsigned: no
/// real device tree nests anywhere near `u32::MAX` levels deep, so this
/// never terminates a genuine scan early.
pub const UNLIMITED_DEPTH: u32 = u32::MAX;

/// Walks the device tree rooted at a given node, collecting the
/// devices that pass an optional filter.
pub struct Enumerator {
    context: Context,
    filter: Option<Arc<dyn Filter>>,
    devices: DeviceList,
}

impl Enumerator {
    pub fn new(context: &Context) -> Self {
        Enumerator {
            context: context.clone(),
            filter: None,
            devices: DeviceList::new(),
        }
    }

    /// Attaches a predicate applied to each fully-resolved device
    /// after the recursion has finished visiting it. Devices that
    /// don't pass are excluded from the result but never prevent their
    /// own children from being visited.
    pub fn with_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Scans the tree rooted at `root_devname` (empty string for the
    /// whole tree) down to `max_depth` levels, returning the number of
    /// devices collected. Pass [`UNLIMITED_DEPTH`] for unbounded
    /// recursion -- the idiomatic replacement for `spec.md` §4.5's
    /// signed `max_depth = -1` sentinel now that depth is unsigned.
    /// Call [`Enumerator::devices`] (or iterate `self`) afterward for
    /// the results.
    pub fn scan(&mut self, root_devname: &str, max_depth: u32) -> Result<usize> {
        self.devices = DeviceList::new();
        self.visit(root_devname, 0, max_depth)?;
        Ok(self.devices.len())
    }

    fn visit(&mut self, devname: &str, depth: u32, max_depth: u32) -> Result<()> {
        if depth >= max_depth {
            return Ok(());
        }

        let children = self.context.channel().list_children(devname)?;
        for child in children {
            self.visit(&child, depth + 1, max_depth)?;

            let device = match Device::from_devname(&self.context, &child) {
                Ok(d) => d,
                // The child was named by list_children a moment ago
                // but is already gone by the time we ask for its
                // properties: a harmless race, not a scan failure.
                Err(_) => continue,
            };

            let keep = match &self.filter {
                Some(f) => f.should_include(&device),
                None => true,
            };
            if keep {
                self.devices.push_back(device);
            }
        }

        Ok(())
    }

    /// The devices collected by the most recent [`Enumerator::scan`].
    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    /// Consumes the enumerator, yielding its collected devices.
    pub fn into_devices(self) -> DeviceList {
        self.devices
    }
}

impl IntoIterator for Enumerator {
    type Item = Device;
    type IntoIter = <DeviceList as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChannel;
    use std::sync::Arc;

    fn ctx_with(mock: MockChannel) -> Context {
        Context::new_with_channel(Arc::new(mock)).unwrap()
    }

    #[test]
    fn empty_tree_scans_to_nothing() {
        let ctx = ctx_with(MockChannel::new());
        let mut e = Enumerator::new(&ctx);
        assert_eq!(e.scan("", UNLIMITED_DEPTH).unwrap(), 0);
        assert!(e.devices().is_empty());
    }

    #[test]
    fn two_level_tree_visits_post_order() {
        let mock = MockChannel::new();
        mock.add_device("wd0", "wd", Some(""), 0, "<dict/>");
        mock.add_device("wd0a", "dk", Some("wd0"), 0, "<dict/>");
        mock.add_device("wd0b", "dk", Some("wd0"), 1, "<dict/>");
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx);
        let n = e.scan("", UNLIMITED_DEPTH).unwrap();
        assert_eq!(n, 3);

        let names: Vec<&str> = e.devices().iter().map(|d| d.devname()).collect();
        // Children appear before their parent (post-order).
        let wd0_pos = names.iter().position(|n| *n == "wd0").unwrap();
        let wd0a_pos = names.iter().position(|n| *n == "wd0a").unwrap();
        let wd0b_pos = names.iter().position(|n| *n == "wd0b").unwrap();
        assert!(wd0a_pos < wd0_pos);
        assert!(wd0b_pos < wd0_pos);
    }

    #[test]
    fn depth_limit_prunes_recursion() {
        let mock = MockChannel::new();
        mock.add_device("wd0", "wd", Some(""), 0, "<dict/>");
        mock.add_device("wd0a", "dk", Some("wd0"), 0, "<dict/>");
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx);
        // depth 1 visits the root's direct children but never recurses
        // into them.
        let n = e.scan("", 1).unwrap();
        assert_eq!(n, 1);
        assert_eq!(e.devices().iter().next().unwrap().devname(), "wd0");
    }

    #[test]
    fn unlimited_depth_reaches_a_chain_deeper_than_any_finite_test_bound() {
        const CHAIN_LEN: usize = 64;
        let mock = MockChannel::new();
        let mut parent = String::new();
        let mut names = Vec::with_capacity(CHAIN_LEN);
        for i in 0..CHAIN_LEN {
            let name = format!("d{i}");
            mock.add_device(&name, "d", Some(parent.as_str()), i as u32, "<dict/>");
            names.push(name.clone());
            parent = name;
        }
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx);
        let n = e.scan("", UNLIMITED_DEPTH).unwrap();
        assert_eq!(n, CHAIN_LEN);
        // Post-order over a straight-line chain is the deepest name first.
        assert_eq!(e.devices().iter().next().unwrap().devname(), names[CHAIN_LEN - 1]);
    }

    #[test]
    fn racy_detach_between_list_and_properties_is_skipped() {
        let mock = MockChannel::new();
        // "wd0" is named as a child of the root by list_children, but
        // never registered as a device: get_properties will fail for
        // it, simulating a concurrent detach.
        mock.add_device("wd1", "wd", Some(""), 1, "<dict/>");
        mock.add_phantom_child("", "wd0");
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx);
        let n = e.scan("", UNLIMITED_DEPTH).unwrap();
        assert_eq!(n, 1);
        assert_eq!(e.devices().iter().next().unwrap().devname(), "wd1");
    }

    #[test]
    fn scan_tolerates_a_forced_list_children_retry() {
        let mock = MockChannel::new();
        mock.add_device("wd0", "wd", Some(""), 0, "<dict/>");
        mock.make_next_list_stale("");
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx);
        let n = e.scan("", UNLIMITED_DEPTH).unwrap();
        assert_eq!(n, 1);
        assert_eq!(e.devices().iter().next().unwrap().devname(), "wd0");
    }

    #[test]
    fn filter_excludes_without_pruning_descendants() {
        let mock = MockChannel::new();
        mock.add_device("wd0", "wd", Some(""), 0, "<dict/>");
        mock.add_device("wd0a", "dk", Some("wd0"), 0, "<dict/>");
        let ctx = ctx_with(mock);

        let mut e = Enumerator::new(&ctx).with_filter(Arc::new(|d: &Device| d.driver() != "wd"));
        let n = e.scan("", UNLIMITED_DEPTH).unwrap();
        assert_eq!(n, 1);
        assert_eq!(e.devices().iter().next().unwrap().devname(), "wd0a");
    }
}

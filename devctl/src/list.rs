//! A simple FIFO collection of [`Device`] records, used by the
//! enumerator to accumulate scan results.
//!
//! `original_source/xdev_list.c` threads devices through an intrusive
//! `TAILQ`; there's no reason to hand-roll that here when `VecDeque`
//! gives the same push-back/pop-front discipline with none of the
//! manual link bookkeeping.

use std::collections::VecDeque;
use std::collections::vec_deque;

use crate::device::Device;

/// An ordered collection of devices, built up during a scan and
/// consumed in the order they were discovered.
#[derive(Debug, Default, Clone)]
pub struct DeviceList(VecDeque<Device>);

impl DeviceList {
    pub fn new() -> Self {
        DeviceList(VecDeque::new())
    }

    pub fn push_back(&mut self, device: Device) {
        self.0.push_back(device);
    }

    pub fn pop_front(&mut self) -> Option<Device> {
        self.0.pop_front()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> vec_deque::Iter<'_, Device> {
        self.0.iter()
    }
}

impl IntoIterator for DeviceList {
    type Item = Device;
    type IntoIter = vec_deque::IntoIter<Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a Device;
    type IntoIter = vec_deque::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<Device> for DeviceList {
    fn from_iter<T: IntoIterator<Item = Device>>(iter: T) -> Self {
        DeviceList(iter.into_iter().collect())
    }
}

impl Extend<Device> for DeviceList {
    fn extend<T: IntoIterator<Item = Device>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

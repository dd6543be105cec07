//! The predicate seam shared by [`Enumerator`](crate::Enumerator) and
//! [`Monitor`](crate::Monitor): both accept an optional caller-supplied
//! test used to decide whether a device is worth keeping.
//!
//! `spec.md` §4.4/§4.6 describes this as a post-hoc filter -- applied
//! to a device *after* it's been fully resolved, never used to prune
//! the recursion or skip reading an event off the wire.

use crate::device::Device;

/// A test a [`Device`] must pass to be kept.
pub trait Filter: Send + Sync {
    fn should_include(&self, device: &Device) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Device) -> bool + Send + Sync,
{
    fn should_include(&self, device: &Device) -> bool {
        self(device)
    }
}

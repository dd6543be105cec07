//! The driver-control channel: the one kernel dependency of this crate.
//!
//! `Channel` is the thin adapter `spec.md` calls an "external
//! collaborator" -- it exposes exactly the three operations the
//! enumerator and monitor need (`list_children`, `get_properties`,
//! `next_event`) plus a raw fd for the monitor's `poll()` loop. The real
//! implementation, [`DrvctlChannel`], talks to a NetBSD-style `drvctl(4)`
//! device. Tests use an in-process mock instead (see `tests` below and
//! `crate::testutil`).
//!
//! The kernel's wire format for property dictionaries (NetBSD's
//! `libprop` externalized plists) is not fully implemented here: per
//! `spec.md`'s non-goal, this crate treats the reply as an opaque blob
//! it passes through verbatim, only picking out the handful of
//! well-known fields it actually needs. See `plist` below.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::fcntl::OFlag;

use crate::error::{Error, Result};
use crate::ioutil;

/// Default path of the driver-control device, mirroring NetBSD's
/// `/dev/drvctl`.
pub const DEFAULT_CHANNEL_PATH: &str = "/dev/drvctl";

/// The properties reply for a single device, as `Device::from_devname`
/// needs them.
#[derive(Debug, Clone)]
pub struct PropertyReply {
    pub driver: String,
    pub parent: Option<String>,
    pub unit: u32,
    /// The entire reply dictionary, externalized verbatim.
    pub raw: String,
}

/// A single hotplug event, as the monitor's producer needs it.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: String,
    pub device: String,
    pub parent: String,
    /// The entire event dictionary, externalized verbatim.
    pub raw: String,
}

/// The operations the enumerator and monitor need from the kernel's
/// device-control channel. Implemented by [`DrvctlChannel`] for real
/// use and by an in-process mock in tests.
pub trait Channel: Send + Sync {
    /// Returns the immediate children of `name` (empty string means the
    /// root of the tree). Must retry internally if the kernel's
    /// "count, then fetch" protocol races with a concurrent topology
    /// change (see `spec.md` §4.4).
    fn list_children(&self, name: &str) -> Result<Vec<String>>;

    /// Fetches the property dictionary for `name`.
    fn get_properties(&self, name: &str) -> Result<PropertyReply>;

    /// Blocks until the next hotplug event is available.
    fn next_event(&self) -> Result<EventRecord>;

    /// The channel's file descriptor, for the monitor's producer to
    /// `poll()` alongside its shutdown pipe.
    fn as_fd(&self) -> BorrowedFd<'_>;
}

const DEVNAME_LEN: usize = 16;

#[repr(C)]
#[derive(Clone, Copy)]
struct RawChildName([libc::c_char; DEVNAME_LEN]);

/// Mirrors NetBSD's `struct devlistargs` from `<sys/drvctlio.h>`.
#[repr(C)]
struct RawDevListArgs {
    devname: [libc::c_char; DEVNAME_LEN],
    children: libc::size_t,
    childname: *mut RawChildName,
}

/// Mirrors `libprop`'s `struct plistref`: a pointer/length pair to an
/// externalized plist buffer, as used by `prop_dictionary_send(recv)
/// _ioctl`.
#[repr(C)]
struct PlistRef {
    ptr: *mut u8,
    len: libc::size_t,
}

mod raw_ioctl {
    use super::{PlistRef, RawDevListArgs};

    // Request codes mirror the group/number scheme in NetBSD's
    // <sys/drvctlio.h>; this crate doesn't link against that header, so
    // the exact numeric values are representative rather than ABI-exact.
    nix::ioctl_readwrite!(drvlistdev, b'D', 2, RawDevListArgs);
    nix::ioctl_readwrite!(drvctlcommand, b'D', 1, PlistRef);
    nix::ioctl_readwrite!(drvgetevent, b'D', 3, PlistRef);
}

fn name_to_raw(name: &str) -> Result<[libc::c_char; DEVNAME_LEN]> {
    if name.len() >= DEVNAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "device name {name:?} exceeds {DEVNAME_LEN} bytes"
        )));
    }
    let mut buf = [0 as libc::c_char; DEVNAME_LEN];
    for (dst, src) in buf.iter_mut().zip(name.bytes()) {
        *dst = src as libc::c_char;
    }
    Ok(buf)
}

fn raw_to_name(raw: &RawChildName) -> String {
    let bytes: Vec<u8> = raw
        .0
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A minimal, non-general textual stand-in for `libprop`'s externalized
/// plist format. It is sufficient to build the small, fixed-shape
/// request dictionaries this crate sends and to extract the well-known
/// reply fields it consumes -- it is not a plist parser and isn't meant
/// to become one; the full format is explicitly out of scope for this
/// crate (`spec.md` §1).
mod plist {
    pub fn envelope(command: &str, args: &[(&str, &str)]) -> String {
        let mut body = String::from("<dict><key>drvctl-command</key>");
        body.push_str(&format!("<string>{command}</string>"));
        if !args.is_empty() {
            body.push_str("<key>drvctl-arguments</key><dict>");
            for (k, v) in args {
                body.push_str(&format!("<key>{k}</key><string>{v}</string>"));
            }
            body.push_str("</dict>");
        }
        body.push_str("</dict>");
        body
    }

    pub fn extract_string(xml: &str, key: &str) -> Option<String> {
        let needle = format!("<key>{key}</key><string>");
        let start = xml.find(&needle)? + needle.len();
        let end = xml[start..].find("</string>")? + start;
        Some(xml[start..end].to_string())
    }

    pub fn extract_u32(xml: &str, key: &str) -> Option<u32> {
        let needle = format!("<key>{key}</key><integer>");
        let start = xml.find(&needle)? + needle.len();
        let end = xml[start..].find("</integer>")? + start;
        xml[start..end].parse().ok()
    }

    pub fn extract_i8(xml: &str, key: &str) -> Option<i8> {
        extract_u32(xml, key).map(|v| v as i8)
    }
}

/// Real implementation of [`Channel`] over a `drvctl(4)`-style device.
pub struct DrvctlChannel {
    fd: OwnedFd,
}

impl DrvctlChannel {
    /// Opens the driver-control device at the default path.
    pub fn open() -> Result<Self> {
        Self::open_path(DEFAULT_CHANNEL_PATH)
    }

    /// Opens the driver-control device at `path`, `O_RDWR | O_CLOEXEC`.
    pub fn open_path(path: &str) -> Result<Self> {
        let fd = ioutil::xopen(path, OFlag::O_RDWR | OFlag::O_CLOEXEC)?;
        tracing::info!(path, fd = ioutil::raw(&fd), "opened driver-control channel");
        Ok(DrvctlChannel { fd })
    }

    fn send_command(&self, command: &str, args: &[(&str, &str)]) -> Result<String> {
        let mut body = plist::envelope(command, args).into_bytes();
        let mut plref = PlistRef {
            ptr: body.as_mut_ptr(),
            len: body.len(),
        };

        // SAFETY: `plref` points at `body`, which outlives the call;
        // the ioctl fills in a reply in place of the request per
        // `prop_dictionary_sendrecv_ioctl`'s contract.
        unsafe { raw_ioctl::drvctlcommand(ioutil::raw(&self.fd), &mut plref) }
            .map_err(|e| Error::Channel(format!("DRVCTLCOMMAND failed: {e}")))?;

        let reply = unsafe { std::slice::from_raw_parts(plref.ptr, plref.len) };
        Ok(String::from_utf8_lossy(reply).into_owned())
    }
}

impl Channel for DrvctlChannel {
    fn list_children(&self, name: &str) -> Result<Vec<String>> {
        loop {
            let mut args = RawDevListArgs {
                devname: name_to_raw(name)?,
                children: 0,
                childname: std::ptr::null_mut(),
            };

            unsafe { raw_ioctl::drvlistdev(ioutil::raw(&self.fd), &mut args) }
                .map_err(|e| Error::Channel(format!("DRVLISTDEV (count) failed: {e}")))?;

            let n = args.children;
            if n == 0 {
                return Ok(Vec::new());
            }

            let mut buf = vec![RawChildName([0; DEVNAME_LEN]); n];
            args.childname = buf.as_mut_ptr();

            unsafe { raw_ioctl::drvlistdev(ioutil::raw(&self.fd), &mut args) }
                .map_err(|e| Error::Channel(format!("DRVLISTDEV (fetch) failed: {e}")))?;

            if args.children != n {
                // Topology changed between the count and the fetch;
                // retry from the beginning, per spec.md §4.4.
                continue;
            }

            return Ok(buf.iter().map(raw_to_name).filter(|s| !s.is_empty()).collect());
        }
    }

    fn get_properties(&self, name: &str) -> Result<PropertyReply> {
        let reply = self.send_command("get-properties", &[("device-name", name)])?;

        match plist::extract_i8(&reply, "drvctl-error") {
            Some(0) => {}
            Some(_) | None => {
                return Err(Error::Channel(format!("get-properties failed for {name:?}")))
            }
        }

        let driver = plist::extract_string(&reply, "device-driver")
            .ok_or_else(|| Error::Decode("missing device-driver".into()))?;
        let parent = plist::extract_string(&reply, "device-parent");
        let unit = plist::extract_string(&reply, "device-unit")
            .and_then(|v| v.parse().ok())
            .or_else(|| plist::extract_u32(&reply, "device-unit"))
            .ok_or_else(|| Error::Decode("missing device-unit".into()))?;

        Ok(PropertyReply {
            driver,
            parent,
            unit,
            raw: reply,
        })
    }

    fn next_event(&self) -> Result<EventRecord> {
        let mut buf = vec![0u8; 0];
        let mut plref = PlistRef {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        };

        // SAFETY: DRVGETEVENT allocates and fills the reply buffer in
        // the kernel and returns it through `plref`; this call blocks
        // until an event is available.
        unsafe { raw_ioctl::drvgetevent(ioutil::raw(&self.fd), &mut plref) }
            .map_err(|e| Error::Channel(format!("DRVGETEVENT failed: {e}")))?;

        let reply_bytes = unsafe { std::slice::from_raw_parts(plref.ptr, plref.len) };
        let reply = String::from_utf8_lossy(reply_bytes).into_owned();

        let event = plist::extract_string(&reply, "event")
            .ok_or_else(|| Error::Decode("missing event".into()))?;
        let device = plist::extract_string(&reply, "device")
            .ok_or_else(|| Error::Decode("missing device".into()))?;
        let parent = plist::extract_string(&reply, "parent").unwrap_or_default();

        Ok(EventRecord {
            event,
            device,
            parent,
            raw: reply,
        })
    }

    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::plist;

    #[test]
    fn envelope_roundtrips_known_fields() {
        let xml = plist::envelope("get-properties", &[("device-name", "wd0")]);
        assert_eq!(
            plist::extract_string(&xml, "device-name"),
            Some("wd0".to_string())
        );
        assert_eq!(
            plist::extract_string(&xml, "drvctl-command"),
            Some("get-properties".to_string())
        );
    }

    #[test]
    fn extract_missing_key_is_none() {
        let xml = plist::envelope("list-devices", &[]);
        assert_eq!(plist::extract_string(&xml, "device-name"), None);
    }
}

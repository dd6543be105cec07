//! The host driver table: resolves a major number to a driver name, or
//! a driver name back to its major numbers.
//!
//! `spec.md` §1 calls this an external collaborator "provided by a
//! host helper returning `(driver_name, char_major, block_major)`
//! tuples". [`SysctlDriverTable`] is that helper's real implementation,
//! grounded in `original_source/xdev_device.c`'s `kinfo_getdrivers`,
//! which walks the `kern.drivers` sysctl's array of `struct
//! kinfo_drivers`.

use crate::error::Result;

/// One row of the kernel's driver table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    pub name: String,
    pub char_major: i32,
    pub block_major: i32,
}

/// Resolves major numbers to driver names and back.
pub trait DriverTable: Send + Sync {
    /// Finds the driver whose character *or* block major equals
    /// `major`. Callers distinguish which matched via the returned
    /// `DriverInfo`'s fields.
    fn lookup(&self, major: i32) -> Option<DriverInfo>;

    /// Finds a driver by name, the direction `Device::major` needs.
    fn lookup_by_name(&self, name: &str) -> Option<DriverInfo>;
}

/// A driver table that never resolves anything. Used as the default
/// for contexts built over a caller-supplied channel that don't need
/// `Device::from_node` (most tests).
pub struct NullDriverTable;

impl DriverTable for NullDriverTable {
    fn lookup(&self, _major: i32) -> Option<DriverInfo> {
        None
    }

    fn lookup_by_name(&self, _name: &str) -> Option<DriverInfo> {
        None
    }
}

/// A small, explicit in-memory driver table, handy for tests of
/// `Device::from_node` that don't want to depend on `SysctlDriverTable`.
#[derive(Default)]
pub struct StaticDriverTable(Vec<DriverInfo>);

impl StaticDriverTable {
    pub fn new(entries: Vec<DriverInfo>) -> Self {
        StaticDriverTable(entries)
    }
}

impl DriverTable for StaticDriverTable {
    fn lookup(&self, major: i32) -> Option<DriverInfo> {
        self.0
            .iter()
            .find(|d| d.char_major == major || d.block_major == major)
            .cloned()
    }

    fn lookup_by_name(&self, name: &str) -> Option<DriverInfo> {
        self.0.iter().find(|d| d.name == name).cloned()
    }
}

/// The kernel driver table via the `kern.drivers` sysctl, mirroring
/// `kinfo_getdrivers`'s "ask for the size, then ask for the data"
/// sequence.
pub struct SysctlDriverTable;

/// Mirrors NetBSD's `struct kinfo_drivers`.
#[repr(C)]
#[derive(Clone, Copy)]
struct KinfoDrivers {
    d_cmajor: i32,
    d_bmajor: i32,
    d_name: [libc::c_char; 16],
}

// `kern.drivers`'s MIB, matching NetBSD's <sys/sysctl.h> `CTL_KERN`,
// `KERN_DRIVERS` constants.
const CTL_KERN: libc::c_int = 1;
const KERN_DRIVERS: libc::c_int = 62;

fn kinfo_getdrivers() -> Result<Vec<KinfoDrivers>> {
    let mut mib = [CTL_KERN, KERN_DRIVERS];
    let mut len: libc::size_t = 0;

    // SAFETY: `mib`/`len` are valid for the duration of the call; a
    // null `oldp` asks the kernel to report the required buffer size
    // in `len` without copying anything out, the standard two-call
    // sysctl(3) idiom.
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            std::ptr::null_mut(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    let count = len / std::mem::size_of::<KinfoDrivers>();
    let mut buf: Vec<KinfoDrivers> = vec![
        KinfoDrivers {
            d_cmajor: -1,
            d_bmajor: -1,
            d_name: [0; 16],
        };
        count
    ];
    let mut out_len = len;

    // SAFETY: `buf` has room for `len` bytes (`count` entries of
    // `KinfoDrivers`); the kernel writes at most `out_len` bytes back
    // into it.
    let rc = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            mib.len() as libc::c_uint,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut out_len,
            std::ptr::null_mut(),
            0,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    buf.truncate(out_len / std::mem::size_of::<KinfoDrivers>());
    Ok(buf)
}

fn driver_name(raw: &[libc::c_char; 16]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

impl DriverTable for SysctlDriverTable {
    fn lookup(&self, major: i32) -> Option<DriverInfo> {
        let drivers = kinfo_getdrivers().ok()?;
        drivers
            .iter()
            .find(|d| d.d_cmajor == major || d.d_bmajor == major)
            .map(|d| DriverInfo {
                name: driver_name(&d.d_name),
                char_major: d.d_cmajor,
                block_major: d.d_bmajor,
            })
    }

    fn lookup_by_name(&self, name: &str) -> Option<DriverInfo> {
        let drivers = kinfo_getdrivers().ok()?;
        drivers
            .iter()
            .find(|d| driver_name(&d.d_name) == name)
            .map(|d| DriverInfo {
                name: driver_name(&d.d_name),
                char_major: d.d_cmajor,
                block_major: d.d_bmajor,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_resolves_by_major_and_name() {
        let table = StaticDriverTable::new(vec![DriverInfo {
            name: "wd".into(),
            char_major: 3,
            block_major: 0,
        }]);

        assert_eq!(table.lookup(3).unwrap().name, "wd");
        assert_eq!(table.lookup(0).unwrap().name, "wd");
        assert!(table.lookup(99).is_none());
        assert_eq!(table.lookup_by_name("wd").unwrap().char_major, 3);
        assert!(table.lookup_by_name("missing").is_none());
    }

    #[test]
    fn null_table_never_resolves() {
        let table = NullDriverTable;
        assert!(table.lookup(0).is_none());
        assert!(table.lookup_by_name("wd").is_none());
    }
}

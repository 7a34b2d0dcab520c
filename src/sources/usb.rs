//! USB serial adapter lookup through sysfs.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    config::UsbSelector,
    error::{Error, Result},
};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// USB attributes sit a few levels above the tty's `device` link.
const MAX_ANCESTORS: usize = 4;

fn read_attr(dir: &Path, name: &str) -> Option<String> {
    fs::read_to_string(dir.join(name))
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_hex(dir: &Path, name: &str) -> Option<u16> {
    u16::from_str_radix(&read_attr(dir, name)?, 16).ok()
}

fn matches(dir: &Path, selector: &UsbSelector) -> bool {
    let ids = read_hex(dir, "idVendor") == Some(selector.vid)
        && read_hex(dir, "idProduct") == Some(selector.pid);
    match &selector.serial {
        Some(serial) => ids && read_attr(dir, "serial").as_deref() == Some(serial.as_str()),
        None => ids,
    }
}

/// Finds the `/dev` node of the tty whose USB parent matches `selector`.
///
/// Scans `<sysfs_root>/class/tty/*/device` and walks up from each device to
/// the first directory carrying `idVendor`/`idProduct`.
pub fn find_tty(sysfs_root: &Path, selector: &UsbSelector) -> Result<PathBuf> {
    let class_dir = sysfs_root.join("class/tty");
    let mut entries: Vec<_> = fs::read_dir(&class_dir)
        .map_err(|e| Error::DeviceNotFound(format!("{}: {e}", class_dir.display())))?
        .filter_map(|entry| entry.ok())
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let Ok(device) = fs::canonicalize(entry.path().join("device")) else {
            continue;
        };
        let found = device
            .ancestors()
            .take(MAX_ANCESTORS)
            .any(|dir| matches(dir, selector));
        if found {
            let node = Path::new("/dev").join(entry.file_name());
            debug!("USB {selector} is {}", node.display());
            return Ok(node);
        }
    }

    Err(Error::DeviceNotFound(format!("no tty for USB {selector}")))
}

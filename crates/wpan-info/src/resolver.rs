//! Mapping user supplied device names onto interface and phy indices.

use crate::config::WirelessConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Section type a radio must declare to be resolved through the config.
pub const RADIO_TYPE: &str = "mac802154";

/// The two addressing primitives nl802154 understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRef {
    Interface(u32),
    Phy(u32),
    Unresolved,
}

impl DeviceRef {
    pub fn is_resolved(self) -> bool {
        !matches!(self, DeviceRef::Unresolved)
    }
}

/// Read-only view of the host's network devices.
pub trait HostLookup {
    /// Interface index by name, `None` when there is no such interface.
    fn if_nametoindex(&self, name: &str) -> Option<u32>;
    /// Index of an 802.15.4 phy by its kernel name (`wpan-phy0`).
    fn phy_index(&self, phy: &str) -> Option<u32>;
    fn net_interfaces(&self) -> Vec<String>;
    /// Index of the phy behind a network interface.
    fn netdev_phy_index(&self, ifname: &str) -> Option<u32>;
    fn netdev_ifindex(&self, ifname: &str) -> Option<u32>;
}

/// The running system, seen through sysfs.
#[derive(Debug, Clone)]
pub struct SystemHost {
    root: PathBuf,
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl SystemHost {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            root: sysfs_root.into(),
        }
    }

    fn class(&self, class: &str) -> PathBuf {
        self.root.join("class").join(class)
    }
}

/// First integer in a sysfs attribute file.
fn read_index(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

/// Whether the sysfs device at `dev` belongs to the 802.15.4 phy class.
fn is_wpan_phy(dev: &Path) -> bool {
    fs::read_link(dev.join("subsystem"))
        .ok()
        .and_then(|target| target.file_name().map(|n| n == "ieee802154"))
        .unwrap_or(false)
}

impl HostLookup for SystemHost {
    fn if_nametoindex(&self, name: &str) -> Option<u32> {
        let idx = self.netdev_ifindex(name).filter(|&idx| idx != 0);
        if idx.is_none() {
            debug!(name, "no such network interface");
        }
        idx
    }

    fn phy_index(&self, phy: &str) -> Option<u32> {
        read_index(&self.class("ieee802154").join(phy).join("index"))
    }

    fn net_interfaces(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.class("net")) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    fn netdev_phy_index(&self, ifname: &str) -> Option<u32> {
        let dev = self.class("net").join(ifname);
        let parent = dev.join("device");
        if is_wpan_phy(&parent) {
            return read_index(&parent.join("index"));
        }
        read_index(&dev.join("phy80211").join("index"))
    }

    fn netdev_ifindex(&self, ifname: &str) -> Option<u32> {
        read_index(&self.class("net").join(ifname).join("ifindex"))
    }
}

/// `phy<N>` or the kernel's own `wpan-phy<N>`.
fn parse_phy_name(id: &str) -> Option<Option<u32>> {
    let digits = id
        .strip_prefix("wpan-phy")
        .or_else(|| id.strip_prefix("phy"))?;
    Some(digits.parse().ok())
}

pub struct Resolver {
    host: Box<dyn HostLookup + Send>,
    config: Option<WirelessConfig>,
}

impl Resolver {
    pub fn new(host: Box<dyn HostLookup + Send>, config: Option<WirelessConfig>) -> Self {
        Self { host, config }
    }

    pub fn host(&self) -> &dyn HostLookup {
        self.host.as_ref()
    }

    pub fn config(&self) -> Option<&WirelessConfig> {
        self.config.as_ref()
    }

    pub fn resolve(&self, id: &str) -> DeviceRef {
        let resolved = if let Some(phy) = parse_phy_name(id) {
            phy.map_or(DeviceRef::Unresolved, DeviceRef::Phy)
        } else if id.starts_with("radio") || id.starts_with('@') {
            self.radio_phy_index(id)
                .map_or(DeviceRef::Unresolved, DeviceRef::Phy)
        } else {
            let ifname = id.strip_prefix("mon.").unwrap_or(id);
            self.host
                .if_nametoindex(ifname)
                .map_or(DeviceRef::Unresolved, DeviceRef::Interface)
        };
        debug!(id, ?resolved, "device resolved");
        resolved
    }

    /// Phy index of a configured radio section.
    pub fn radio_phy_index(&self, section: &str) -> Option<u32> {
        let Some(cfg) = self.config.as_ref() else {
            debug!(section, "no wireless config loaded");
            return None;
        };
        let Some(phy) = cfg.radio(section, RADIO_TYPE).and_then(|s| s.option("phy")) else {
            warn!(section, "no {RADIO_TYPE} radio with a phy option in config");
            return None;
        };
        let idx = self.host.phy_index(phy);
        if idx.is_none() {
            warn!(section, phy, "configured phy not present");
        }
        idx
    }

    /// The interface with the lowest ifindex on the phy named by `id`. Only
    /// phy and radio names are considered.
    pub fn phy_to_ifname(&self, id: &str) -> Option<String> {
        let phy = match parse_phy_name(id) {
            Some(idx) => idx?,
            None if id.starts_with("radio") || id.starts_with('@') => {
                self.radio_phy_index(id)?
            }
            None => return None,
        };
        self.host
            .net_interfaces()
            .into_iter()
            .filter(|name| self.host.netdev_phy_index(name) == Some(phy))
            .filter_map(|name| self.host.netdev_ifindex(&name).map(|idx| (idx, name)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(_, name)| name)
    }
}

//! The nl802154 backend: builds one request per property, sends it over the
//! control channel and reduces the decoded reply to the property's value.

use crate::backend::WpanBackend;
use crate::channel::{ControlChannel, Terminal};
use crate::freq::{channel_to_mhz, dbm_to_mw, mbm_to_dbm};
use crate::nl802154 as nl;
use crate::resolver::{DeviceRef, Resolver, RADIO_TYPE};
use crate::types::{
    list_capacity, CcaEdLevelEntry, CcaMode, CcaOpt, FreqEntry, OpMode, TxPowerEntry,
};
use crate::QueryError;
use genl_transport::{AttrBuf, AttrMap, CodecError, GenlRequest, Transport};
use tracing::{debug, warn};

pub const BACKEND_NAME: &str = "nl802154";

/// Attach the device's index attributes to a request.
pub fn encode_device(attrs: &mut AttrBuf, dev: DeviceRef) -> Result<(), CodecError> {
    match dev {
        DeviceRef::Interface(ifindex) => {
            attrs.put_u32(nl::ATTR_IFINDEX, ifindex)?;
        }
        DeviceRef::Phy(phy) => {
            attrs.put_u32(nl::ATTR_WPAN_PHY, phy)?;
        }
        DeviceRef::Unresolved => {}
    }
    Ok(())
}

/// Which nl802154 object a property lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Interface,
    Phy,
}

impl Scope {
    fn cmd(self) -> u8 {
        match self {
            Scope::Interface => nl::CMD_GET_INTERFACE,
            Scope::Phy => nl::CMD_GET_WPAN_PHY,
        }
    }

    fn reply_cmd(self) -> u8 {
        match self {
            Scope::Interface => nl::CMD_NEW_INTERFACE,
            Scope::Phy => nl::CMD_NEW_WPAN_PHY,
        }
    }
}

pub struct Nl802154<T: Transport> {
    channel: ControlChannel<T>,
    resolver: Resolver,
}

impl<T: Transport> Nl802154<T> {
    pub fn new(channel: ControlChannel<T>, resolver: Resolver) -> Self {
        Self { channel, resolver }
    }

    pub fn control(&self) -> &ControlChannel<T> {
        &self.channel
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Interface-scoped commands are issued against an interface whenever
    /// one can be derived from a phy or radio name.
    fn target(&self, dev: &str) -> String {
        self.resolver
            .phy_to_ifname(dev)
            .unwrap_or_else(|| dev.to_owned())
    }

    /// Resolve `dev`, send one request and merge the attributes of every
    /// data reply.
    fn fetch(&mut self, dev: &str, scope: Scope) -> Result<AttrMap, QueryError> {
        let device = self.resolver.resolve(dev);
        if !device.is_resolved() {
            return Err(QueryError::Unresolved(dev.to_owned()));
        }
        let family = self.channel.family()?.id;
        let mut req = GenlRequest::new(family, scope.cmd());
        encode_device(req.attrs_mut(), device).map_err(QueryError::Capacity)?;
        let exchange = self.channel.request(req)?;
        match exchange.terminal {
            Terminal::Error(code) => {
                debug!(dev, code, ?scope, "kernel rejected query");
                return Err(QueryError::Protocol { code });
            }
            Terminal::Timeout => return Err(QueryError::Timeout),
            Terminal::Ack | Terminal::Done => {}
        }
        let mut merged = AttrMap::new();
        for reply in &exchange.replies {
            if reply.cmd != scope.reply_cmd() {
                debug!(dev, cmd = reply.cmd, ?scope, "ignoring reply to another command");
                continue;
            }
            match reply.attrs(&nl::ATTRS) {
                Ok(attrs) => {
                    for (tag, value) in attrs.iter() {
                        merged.insert(tag, value.clone());
                    }
                }
                Err(e) => warn!(dev, error = %e, "undecodable nl802154 reply treated as no data"),
            }
        }
        Ok(merged)
    }

    fn fetch_target(&mut self, dev: &str, scope: Scope) -> Result<AttrMap, QueryError> {
        let target = self.target(dev);
        self.fetch(&target, scope)
    }

    fn scalar<V>(
        &mut self,
        dev: &str,
        scope: Scope,
        what: &'static str,
        get: impl FnOnce(&AttrMap) -> Option<V>,
    ) -> Result<V, QueryError> {
        let attrs = self.fetch_target(dev, scope)?;
        get(&attrs).ok_or(QueryError::Unavailable(what))
    }

    /// The nested capability list `cap` of the phy behind `dev`.
    fn capability(
        &mut self,
        dev: &str,
        cap: u16,
        what: &'static str,
    ) -> Result<AttrMap, QueryError> {
        let attrs = self.fetch_target(dev, Scope::Phy)?;
        attrs
            .nested(nl::ATTR_WPAN_PHY_CAPS)
            .and_then(|caps| caps.nested(cap))
            .cloned()
            .ok_or(QueryError::Unavailable(what))
    }
}

fn check_capacity<E>(len: usize) -> Result<(), QueryError> {
    let capacity = list_capacity::<E>();
    if len > capacity {
        return Err(QueryError::Capacity(CodecError::Capacity {
            needed: len,
            capacity,
        }));
    }
    Ok(())
}

fn levels_dbm(levels: &AttrMap) -> Vec<i32> {
    levels
        .iter()
        .filter_map(|(_, v)| v.as_i32())
        .map(mbm_to_dbm)
        .collect()
}

impl<T: Transport> WpanBackend for Nl802154<T> {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    /// A device is ours when nl802154 can name its phy.
    fn probe(&mut self, dev: &str) -> bool {
        self.phyname(dev).is_ok()
    }

    fn mode(&mut self, dev: &str) -> Result<OpMode, QueryError> {
        let attrs = self.fetch_target(dev, Scope::Interface)?;
        Ok(OpMode::from_iftype(attrs.u32(nl::ATTR_IFTYPE)))
    }

    fn channel(&mut self, dev: &str) -> Result<u8, QueryError> {
        self.scalar(dev, Scope::Phy, "channel", |a| a.u8(nl::ATTR_CHANNEL))
    }

    /// Derived from page and channel of the same reply.
    fn frequency(&mut self, dev: &str) -> Result<f32, QueryError> {
        let (page, channel) = self.scalar(dev, Scope::Phy, "frequency", |a| {
            Some((a.u8(nl::ATTR_PAGE)?, a.u8(nl::ATTR_CHANNEL)?))
        })?;
        let mhz = channel_to_mhz(page, channel);
        if mhz <= 0.0 {
            debug!(dev, page, channel, "no frequency for page/channel");
            return Err(QueryError::Unavailable("frequency"));
        }
        Ok(mhz)
    }

    fn txpower(&mut self, dev: &str) -> Result<i32, QueryError> {
        self.scalar(dev, Scope::Phy, "tx power", |a| {
            a.i32(nl::ATTR_TX_POWER).map(mbm_to_dbm)
        })
    }

    fn phyname(&mut self, dev: &str) -> Result<String, QueryError> {
        let direct = self
            .fetch(dev, Scope::Phy)
            .and_then(|a| {
                a.str(nl::ATTR_WPAN_PHY_NAME)
                    .map(str::to_owned)
                    .ok_or(QueryError::Unavailable("phy name"))
            });
        match direct {
            Err(e) if !matches!(e, QueryError::Channel(_)) => {
                let ifname = self.resolver.phy_to_ifname(dev).ok_or(e)?;
                let attrs = self.fetch(&ifname, Scope::Phy)?;
                attrs
                    .str(nl::ATTR_WPAN_PHY_NAME)
                    .map(str::to_owned)
                    .ok_or(QueryError::Unavailable("phy name"))
            }
            other => other,
        }
    }

    fn txpower_list(&mut self, dev: &str) -> Result<Vec<TxPowerEntry>, QueryError> {
        let levels = self.capability(dev, nl::CAP_ATTR_TX_POWERS, "tx power list")?;
        check_capacity::<TxPowerEntry>(levels.len())?;
        let list: Vec<TxPowerEntry> = levels_dbm(&levels)
            .into_iter()
            .map(|dbm| TxPowerEntry {
                dbm,
                mw: dbm_to_mw(dbm),
            })
            .collect();
        if list.is_empty() {
            return Err(QueryError::Unavailable("tx power list"));
        }
        Ok(list)
    }

    /// Supported channels of every page the phy advertises. The identifier
    /// is used as given.
    fn frequency_list(&mut self, dev: &str) -> Result<Vec<FreqEntry>, QueryError> {
        let attrs = self.fetch(dev, Scope::Phy)?;
        let pages = attrs
            .nested(nl::ATTR_WPAN_PHY_CAPS)
            .and_then(|caps| caps.nested(nl::CAP_ATTR_CHANNELS))
            .ok_or(QueryError::Unavailable("frequency list"))?;
        let mut list = Vec::new();
        for (page_tag, channels) in pages.iter() {
            let (Ok(page), Some(channels)) = (u8::try_from(page_tag), channels.as_nested()) else {
                warn!(dev, page_tag, "skipping malformed channel page");
                continue;
            };
            for channel in channels.tags().filter_map(|t| u8::try_from(t).ok()) {
                list.push(FreqEntry {
                    page,
                    channel,
                    mhz: channel_to_mhz(page, channel),
                });
            }
            check_capacity::<FreqEntry>(list.len())?;
        }
        if list.is_empty() {
            return Err(QueryError::Unavailable("frequency list"));
        }
        Ok(list)
    }

    fn cca_ed_level_list(&mut self, dev: &str) -> Result<Vec<CcaEdLevelEntry>, QueryError> {
        let levels = self.capability(dev, nl::CAP_ATTR_CCA_ED_LEVELS, "cca ed level list")?;
        check_capacity::<CcaEdLevelEntry>(levels.len())?;
        let list: Vec<CcaEdLevelEntry> = levels_dbm(&levels)
            .into_iter()
            .map(|dbm| CcaEdLevelEntry { dbm })
            .collect();
        if list.is_empty() {
            return Err(QueryError::Unavailable("cca ed level list"));
        }
        Ok(list)
    }

    /// `phy<N>` for a configured radio section, or for a phy named directly.
    fn lookup_phy(&mut self, section: &str) -> Result<String, QueryError> {
        let configured = self
            .resolver
            .config()
            .and_then(|cfg| cfg.radio(section, RADIO_TYPE))
            .and_then(|s| s.option("phy"))
            .map(str::to_owned);
        let phy = configured.as_deref().unwrap_or(section);
        self.resolver
            .host()
            .phy_index(phy)
            .map(|idx| format!("phy{idx}"))
            .ok_or(QueryError::Unavailable("phy"))
    }

    fn pan_id(&mut self, dev: &str) -> Result<u16, QueryError> {
        self.scalar(dev, Scope::Interface, "pan id", |a| a.u16(nl::ATTR_PAN_ID))
    }

    fn short_address(&mut self, dev: &str) -> Result<u16, QueryError> {
        self.scalar(dev, Scope::Interface, "short address", |a| {
            a.u16(nl::ATTR_SHORT_ADDR)
        })
    }

    fn extended_address(&mut self, dev: &str) -> Result<u64, QueryError> {
        self.scalar(dev, Scope::Interface, "extended address", |a| {
            a.u64(nl::ATTR_EXTENDED_ADDR)
        })
    }

    fn page(&mut self, dev: &str) -> Result<u8, QueryError> {
        self.scalar(dev, Scope::Phy, "page", |a| a.u8(nl::ATTR_PAGE))
    }

    fn min_be(&mut self, dev: &str) -> Result<u8, QueryError> {
        self.scalar(dev, Scope::Interface, "min be", |a| a.u8(nl::ATTR_MIN_BE))
    }

    fn max_be(&mut self, dev: &str) -> Result<u8, QueryError> {
        self.scalar(dev, Scope::Interface, "max be", |a| a.u8(nl::ATTR_MAX_BE))
    }

    fn csma_backoffs(&mut self, dev: &str) -> Result<u8, QueryError> {
        self.scalar(dev, Scope::Interface, "csma backoffs", |a| {
            a.u8(nl::ATTR_MAX_CSMA_BACKOFFS)
        })
    }

    /// Reads `MAX_FRAME_RETRIES`. Older iwpaninfo releases reported the CSMA
    /// backoff count here instead.
    fn frame_retries(&mut self, dev: &str) -> Result<i8, QueryError> {
        self.scalar(dev, Scope::Interface, "frame retries", |a| {
            a.i8(nl::ATTR_MAX_FRAME_RETRIES)
        })
    }

    fn lbt_mode(&mut self, dev: &str) -> Result<bool, QueryError> {
        self.scalar(dev, Scope::Interface, "lbt mode", |a| {
            a.u8(nl::ATTR_LBT_MODE).map(|v| v != 0)
        })
    }

    fn cca_mode(&mut self, dev: &str) -> Result<CcaMode, QueryError> {
        self.scalar(dev, Scope::Phy, "cca mode", |a| {
            a.u32(nl::ATTR_CCA_MODE).map(CcaMode::from_raw)
        })
    }

    fn cca_opt(&mut self, dev: &str) -> Result<CcaOpt, QueryError> {
        self.scalar(dev, Scope::Phy, "cca opt", |a| {
            a.u32(nl::ATTR_CCA_OPT).map(CcaOpt::from_raw)
        })
    }

    fn close(&mut self) {
        self.channel.close();
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::sim::{SimKernel, SimPhy};
    use crate::types::{or_sentinel, unavailable};
    use crate::WirelessConfig;
    use genl_transport::parse_attrs;

    fn config() -> WirelessConfig {
        serde_yaml::from_str(
            "sections:\n  radio0:\n    kind: wpan-device\n    type: mac802154\n    phy: wpan-phy1\n",
        )
        .unwrap()
    }

    #[test]
    fn interface_index_survives_encode_and_decode() {
        let mut attrs = AttrBuf::new();
        encode_device(&mut attrs, DeviceRef::Interface(42)).unwrap();
        let decoded = parse_attrs(attrs.as_bytes(), &nl::ATTRS).unwrap();
        assert_eq!(decoded.u32(nl::ATTR_IFINDEX), Some(42));
        assert!(!decoded.contains(nl::ATTR_WPAN_PHY));
    }

    #[test]
    fn full_buffer_is_a_capacity_error() {
        let mut attrs = AttrBuf::with_capacity(4);
        assert!(matches!(
            encode_device(&mut attrs, DeviceRef::Interface(1)),
            Err(CodecError::Capacity { .. })
        ));
    }

    #[test]
    fn list_budget_is_enforced() {
        assert!(check_capacity::<TxPowerEntry>(4096).is_ok());
        assert!(matches!(
            check_capacity::<TxPowerEntry>(4097),
            Err(QueryError::Capacity(_))
        ));
    }

    #[test]
    fn interface_properties() {
        let mut be = SimKernel::demo().backend(None);
        assert_eq!(be.mode("wpan0").unwrap(), OpMode::Node);
        assert_eq!(be.pan_id("wpan0").unwrap(), 0xbeef);
        assert_eq!(be.short_address("wpan0").unwrap(), 0x0001);
        assert_eq!(be.extended_address("wpan0").unwrap(), 0x0011_2233_4455_6677);
        assert_eq!(be.min_be("wpan0").unwrap(), 3);
        assert_eq!(be.max_be("wpan0").unwrap(), 5);
        assert_eq!(be.csma_backoffs("wpan0").unwrap(), 4);
        assert_eq!(be.frame_retries("wpan0").unwrap(), 3);
        assert!(!be.lbt_mode("wpan0").unwrap());
    }

    #[test]
    fn phy_properties() {
        let mut be = SimKernel::demo().backend(None);
        assert_eq!(be.channel("wpan0").unwrap(), 11);
        assert_eq!(be.page("wpan0").unwrap(), 0);
        assert_eq!(be.frequency("wpan0").unwrap(), 2405.0);
        assert_eq!(be.txpower("wpan0").unwrap(), 3);
        assert_eq!(be.cca_mode("wpan0").unwrap(), CcaMode::Energy);
        assert_eq!(be.cca_opt("wpan0").unwrap(), CcaOpt::And);
        assert_eq!(be.phyname("wpan0").unwrap(), "wpan-phy0");
    }

    #[test]
    fn phy_names_are_redirected_to_an_interface() {
        let mut be = SimKernel::demo().backend(None);
        // GET_INTERFACE needs an ifindex; phy1 is served through monitor0.
        assert_eq!(be.mode("phy1").unwrap(), OpMode::Monitor);
        assert_eq!(be.pan_id("phy1").unwrap(), 0xffff);
        assert_eq!(be.frame_retries("phy1").unwrap(), -1);
        assert!(be.lbt_mode("mon.monitor0").unwrap());
    }

    #[test]
    fn radio_sections_resolve_through_config() {
        let mut be = SimKernel::demo().backend(Some(config()));
        assert_eq!(be.channel("radio0").unwrap(), 9);
        assert_eq!(be.cca_mode("radio0").unwrap(), CcaMode::UwbShr);
        assert!((be.frequency("radio0").unwrap() - 7987.2).abs() < 0.01);
        assert_eq!(be.lookup_phy("radio0").unwrap(), "phy1");
        assert_eq!(be.lookup_phy("wpan-phy0").unwrap(), "phy0");
        assert!(be.lookup_phy("radio7").is_err());
    }

    #[test]
    fn tx_power_list_in_dbm_and_order() {
        let sim = SimKernel::new();
        sim.add_phy(SimPhy {
            index: 0,
            name: "wpan-phy0".into(),
            page: 0,
            channel: 26,
            tx_power_mbm: 1234,
            cca_mode: 1,
            cca_opt: 0,
            cca_ed_level_mbm: -7500,
            tx_powers_mbm: vec![500, 1200, -300],
            cca_ed_levels_mbm: vec![-9150],
            channels: vec![(0, vec![11, 26]), (2, vec![1, 10])],
        });
        let mut be = sim.backend(None);
        let dbm: Vec<i32> = be.txpower_list("phy0").unwrap().iter().map(|e| e.dbm).collect();
        assert_eq!(dbm, vec![5, 12, -3]);
        assert_eq!(be.txpower("phy0").unwrap(), 12);
        assert_eq!(be.cca_ed_level_list("phy0").unwrap(), vec![CcaEdLevelEntry { dbm: -91 }]);

        let freqs = be.frequency_list("phy0").unwrap();
        let pairs: Vec<(u8, u8)> = freqs.iter().map(|f| (f.page, f.channel)).collect();
        assert_eq!(pairs, vec![(0, 11), (0, 26), (2, 1), (2, 10)]);
        assert_eq!(freqs[1].mhz, 2480.0);
        assert_eq!(freqs[3].mhz, 924.0);
    }

    #[test]
    fn missing_iftype_is_unknown_mode() {
        let sim = SimKernel::demo();
        sim.omit_attr(nl::ATTR_IFTYPE);
        let mut be = sim.backend(None);
        assert_eq!(be.mode("wpan0").unwrap(), OpMode::Unknown);
    }

    #[test]
    fn missing_attribute_is_unavailable_with_sentinel() {
        let sim = SimKernel::demo();
        sim.omit_attr(nl::ATTR_TX_POWER);
        sim.omit_attr(nl::ATTR_PAGE);
        let mut be = sim.backend(None);
        let power = be.txpower("wpan0");
        assert!(matches!(power, Err(QueryError::Unavailable("tx power"))));
        assert_eq!(or_sentinel(power, unavailable::TX_POWER), i32::MIN);
        assert_eq!(or_sentinel(be.page("wpan0"), unavailable::PAGE), -1);
        assert!(be.frequency("wpan0").is_err());
        assert_eq!(be.channel("wpan0").unwrap(), 11);
    }

    #[test]
    fn kernel_errors_are_per_property() {
        let mut be = SimKernel::demo().backend(None);
        // lo has no wpan phy: the kernel answers -ENODEV.
        let err = be.channel("lo").unwrap_err();
        assert!(matches!(err, QueryError::Protocol { code } if code < 0));
        assert!(!err.is_hard());
        assert!(!be.probe("lo"));
        assert!(be.probe("wpan0"));
    }

    #[test]
    fn unknown_device_is_a_hard_error() {
        let mut be = SimKernel::demo().backend(None);
        let err = be.channel("eth9").unwrap_err();
        assert!(matches!(err, QueryError::Unresolved(_)));
        assert!(err.is_hard());
    }

    #[test]
    fn corrupt_capabilities_are_treated_as_no_data() {
        let sim = SimKernel::demo();
        sim.corrupt_caps(true);
        let mut be = sim.backend(None);
        assert!(matches!(
            be.txpower_list("wpan0"),
            Err(QueryError::Unavailable(_))
        ));
    }

    #[test]
    fn channel_failure_heals_on_next_call() {
        let sim = SimKernel::demo();
        sim.fail_connect(true);
        let mut be = sim.backend(None);
        assert!(matches!(be.channel("wpan0"), Err(QueryError::Channel(_))));
        assert!(!be.control().is_open());
        sim.fail_connect(false);
        assert_eq!(be.channel("wpan0").unwrap(), 11);
        assert_eq!(sim.connections(), 1);
    }

    #[test]
    fn missing_family_fails_every_query() {
        let sim = SimKernel::demo();
        sim.hide_family(true);
        let mut be = sim.backend(None);
        assert!(matches!(
            be.mode("wpan0"),
            Err(QueryError::Channel(crate::ChannelError::FamilyNotFound(_)))
        ));
    }

    #[test]
    fn one_link_serves_many_queries_and_close_releases_it() {
        let sim = SimKernel::demo();
        let mut be = sim.backend(None);
        let info = be.info("wpan0");
        assert_eq!(info.channel, Some(11));
        assert_eq!(info.phy_name.as_deref(), Some("wpan-phy0"));
        assert_eq!(sim.connections(), 1);
        be.close();
        be.close();
        assert!(!be.control().is_open());
        assert_eq!(be.page("wpan0").unwrap(), 0);
        assert_eq!(sim.connections(), 2);
    }
}

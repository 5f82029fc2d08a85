//! An in-process nl802154 kernel.
//!
//! [`SimKernel`] answers generic netlink requests with the same bytes the
//! kernel would send: a `GETFAMILY` dump on the control family, and
//! `GET_WPAN_PHY` / `GET_INTERFACE` replies followed by an ack. It also
//! serves as the [`HostLookup`] for the devices it simulates. Clones share
//! state, so a test can change the kernel while a channel is talking to it.

use crate::channel::ControlChannel;
use crate::config::WirelessConfig;
use crate::metrics::MetricsHub;
use crate::nl802154 as nl;
use crate::query::Nl802154;
use crate::resolver::{HostLookup, Resolver};
use crate::BackendRegistry;
use genl_transport::message::{encode_done, encode_error, encode_genl};
use genl_transport::{
    parse_attrs, parse_datagram, AttrBuf, AttrMap, AttrValue, CodecError, GenlHeader, MessageBody,
    MockTransport, NlMsgHeader, TransportError, NLM_F_MULTI,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

pub const SIM_FAMILY_ID: u16 = 0x1a;

#[derive(Debug, Clone)]
pub struct SimPhy {
    pub index: u32,
    pub name: String,
    pub page: u8,
    pub channel: u8,
    pub tx_power_mbm: i32,
    pub cca_mode: u32,
    pub cca_opt: u32,
    pub cca_ed_level_mbm: i32,
    pub tx_powers_mbm: Vec<i32>,
    pub cca_ed_levels_mbm: Vec<i32>,
    /// Supported channels per page.
    pub channels: Vec<(u8, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct SimInterface {
    pub ifindex: u32,
    pub name: String,
    /// `None` for interfaces that are not 802.15.4 (loopback, ethernet).
    pub phy: Option<u32>,
    pub iftype: u32,
    pub pan_id: u16,
    pub short_addr: u16,
    pub extended_addr: u64,
    pub min_be: u8,
    pub max_be: u8,
    pub csma_backoffs: u8,
    pub frame_retries: i8,
    pub lbt: bool,
}

#[derive(Debug, Default)]
struct State {
    phys: Vec<SimPhy>,
    ifaces: Vec<SimInterface>,
    connections: usize,
    fail_connect: bool,
    hide_family: bool,
    corrupt_caps: bool,
    omitted: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct SimKernel {
    state: Arc<Mutex<State>>,
}

/// Negative errno values, as the kernel puts them in `nlmsgerr`.
mod errno {
    pub const ENOENT: i32 = -2;
    pub const ENODEV: i32 = -19;
    pub const EINVAL: i32 = -22;
    pub const EMSGSIZE: i32 = -90;
    pub const EOPNOTSUPP: i32 = -95;
    pub const ENOBUFS: i32 = -105;
}

impl SimKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Two radios: a 2.4 GHz node on `wpan0` and a UWB phy in monitor mode.
    pub fn demo() -> Self {
        let sim = Self::new();
        sim.add_phy(SimPhy {
            index: 0,
            name: "wpan-phy0".into(),
            page: 0,
            channel: 11,
            tx_power_mbm: 300,
            cca_mode: nl::CCA_ENERGY,
            cca_opt: nl::CCA_OPT_ENERGY_CARRIER_AND,
            cca_ed_level_mbm: -7500,
            tx_powers_mbm: vec![300, 200, 100, 0, -100, -200, -300, -400, -500, -700, -900, -1200, -1700],
            cca_ed_levels_mbm: vec![-9100, -8900, -8700, -8500, -8300, -8100, -7900, -7700, -7500],
            channels: vec![(0, (11..=26).collect())],
        });
        sim.add_phy(SimPhy {
            index: 1,
            name: "wpan-phy1".into(),
            page: 4,
            channel: 9,
            tx_power_mbm: -1400,
            cca_mode: nl::CCA_UWB_SHR,
            cca_opt: nl::CCA_OPT_ENERGY_CARRIER_OR,
            cca_ed_level_mbm: -8000,
            tx_powers_mbm: vec![-1400],
            cca_ed_levels_mbm: vec![-8000],
            channels: vec![(4, (0..=15).collect())],
        });
        sim.add_interface(SimInterface {
            ifindex: 1,
            name: "lo".into(),
            phy: None,
            iftype: nl::IFTYPE_UNSPEC,
            pan_id: 0,
            short_addr: 0,
            extended_addr: 0,
            min_be: 0,
            max_be: 0,
            csma_backoffs: 0,
            frame_retries: 0,
            lbt: false,
        });
        sim.add_interface(SimInterface {
            ifindex: 5,
            name: "wpan0".into(),
            phy: Some(0),
            iftype: nl::IFTYPE_NODE,
            pan_id: 0xbeef,
            short_addr: 0x0001,
            extended_addr: 0x0011_2233_4455_6677,
            min_be: 3,
            max_be: 5,
            csma_backoffs: 4,
            frame_retries: 3,
            lbt: false,
        });
        sim.add_interface(SimInterface {
            ifindex: 6,
            name: "monitor0".into(),
            phy: Some(1),
            iftype: nl::IFTYPE_MONITOR,
            pan_id: 0xffff,
            short_addr: 0xfffe,
            extended_addr: 0x8899_aabb_ccdd_eeff,
            min_be: 3,
            max_be: 5,
            csma_backoffs: 4,
            frame_retries: -1,
            lbt: true,
        });
        sim
    }

    pub fn add_phy(&self, phy: SimPhy) {
        self.state.lock().phys.push(phy);
    }

    pub fn add_interface(&self, iface: SimInterface) {
        self.state.lock().ifaces.push(iface);
    }

    /// Number of links opened so far.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Leave nl802154 out of the family dump, as on a kernel without it.
    pub fn hide_family(&self, hide: bool) {
        self.state.lock().hide_family = hide;
    }

    /// Send capability lists whose entries are too short to decode.
    pub fn corrupt_caps(&self, corrupt: bool) {
        self.state.lock().corrupt_caps = corrupt;
    }

    /// Drop a top-level attribute from every reply.
    pub fn omit_attr(&self, tag: u16) {
        self.state.lock().omitted.push(tag);
    }

    pub fn transport(&self) -> genl_transport::Result<MockTransport> {
        let mut state = self.state.lock();
        if state.fail_connect {
            return Err(TransportError::Io("simulated connect failure".into()));
        }
        state.connections += 1;
        drop(state);
        let kernel = self.clone();
        Ok(MockTransport::with_responder(move |req| kernel.handle(req)))
    }

    pub fn channel(&self) -> ControlChannel<MockTransport> {
        let kernel = self.clone();
        ControlChannel::with_connector(move || kernel.transport())
    }

    pub fn host(&self) -> SimHost {
        SimHost {
            kernel: self.clone(),
        }
    }

    pub fn backend(&self, config: Option<WirelessConfig>) -> Nl802154<MockTransport> {
        Nl802154::new(self.channel(), Resolver::new(Box::new(self.host()), config))
    }

    /// Registry holding one nl802154 backend wired to this kernel.
    pub fn registry(
        &self,
        config: Option<WirelessConfig>,
        metrics: Option<&MetricsHub>,
    ) -> BackendRegistry {
        let mut channel = self.channel();
        if let Some(m) = metrics {
            channel = channel.with_metrics(m.channel.clone());
        }
        let resolver = Resolver::new(Box::new(self.host()), config);
        let mut reg = BackendRegistry::new();
        reg.register(Box::new(Nl802154::new(channel, resolver)));
        reg
    }

    fn handle(&self, req: &[u8]) -> Vec<Vec<u8>> {
        let msgs = match parse_datagram(req) {
            Ok(msgs) => msgs,
            Err(e) => {
                trace!(error = %e, "sim kernel dropped malformed request");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for msg in msgs {
            let MessageBody::Genl { header, payload } = msg.body else {
                continue;
            };
            let mut datagram = match self.dispatch(&msg.header, header, &payload) {
                Ok(bytes) => bytes,
                Err(code) => encode_error(msg.header.seq, 0, code, &msg.header),
            };
            if is_data_reply(&datagram) && msg.header.flags & genl_transport::NLM_F_ACK != 0 {
                datagram.extend(encode_error(msg.header.seq, 0, 0, &msg.header));
            }
            out.push(datagram);
        }
        out
    }

    fn dispatch(&self, hdr: &NlMsgHeader, genl: GenlHeader, payload: &[u8]) -> Result<Vec<u8>, i32> {
        let state = self.state.lock();
        if hdr.kind == nl::GENL_ID_CTRL {
            if genl.cmd != nl::CTRL_CMD_GETFAMILY {
                return Err(errno::EOPNOTSUPP);
            }
            return state.family_dump(hdr.seq).map_err(|_| errno::ENOBUFS);
        }
        if hdr.kind != SIM_FAMILY_ID || state.hide_family {
            return Err(errno::ENOENT);
        }
        let attrs = parse_attrs(payload, &nl::ATTRS).map_err(|_| errno::EINVAL)?;
        let reply = match genl.cmd {
            nl::CMD_GET_WPAN_PHY => {
                let phy = state.phy_for(&attrs)?;
                state.phy_attrs(phy)
            }
            nl::CMD_GET_INTERFACE => {
                let ifindex = attrs.u32(nl::ATTR_IFINDEX).ok_or(errno::EINVAL)?;
                let iface = state
                    .ifaces
                    .iter()
                    .find(|i| i.ifindex == ifindex && i.phy.is_some())
                    .ok_or(errno::ENODEV)?;
                state.iface_attrs(iface)
            }
            _ => return Err(errno::EOPNOTSUPP),
        }
        .map_err(|_| errno::EMSGSIZE)?;
        let cmd = if genl.cmd == nl::CMD_GET_WPAN_PHY {
            nl::CMD_NEW_WPAN_PHY
        } else {
            nl::CMD_NEW_INTERFACE
        };
        encode_genl(
            SIM_FAMILY_ID,
            0,
            hdr.seq,
            0,
            GenlHeader { cmd, version: 0 },
            reply.as_bytes(),
        )
        .map_err(|_| errno::EMSGSIZE)
    }
}

/// Data replies carry a family message rather than an error or done header.
fn is_data_reply(datagram: &[u8]) -> bool {
    NlMsgHeader::parse(datagram)
        .map(|h| h.kind == SIM_FAMILY_ID)
        .unwrap_or(false)
}

impl State {
    fn family_dump(&self, seq: u32) -> Result<Vec<u8>, CodecError> {
        let mut families = vec![(nl::CTRL_FAMILY_NAME, nl::GENL_ID_CTRL)];
        if !self.hide_family {
            families.push((nl::FAMILY_NAME, SIM_FAMILY_ID));
        }
        let mut out = Vec::new();
        for (name, id) in families {
            let mut attrs = AttrBuf::new();
            attrs
                .put_u16(nl::CTRL_ATTR_FAMILY_ID, id)?
                .put_str(nl::CTRL_ATTR_FAMILY_NAME, name)?
                .put_u32(nl::CTRL_ATTR_VERSION, 1)?
                .put_u32(nl::CTRL_ATTR_HDRSIZE, 0)?
                .put_u32(nl::CTRL_ATTR_MAXATTR, u32::from(nl::ATTR_PAD))?;
            out.extend(encode_genl(
                nl::GENL_ID_CTRL,
                NLM_F_MULTI,
                seq,
                0,
                GenlHeader {
                    cmd: nl::CTRL_CMD_NEWFAMILY,
                    version: 2,
                },
                attrs.as_bytes(),
            )?);
        }
        out.extend(encode_done(seq, 0));
        Ok(out)
    }

    fn phy_for(&self, attrs: &AttrMap) -> Result<&SimPhy, i32> {
        let index = if let Some(idx) = attrs.u32(nl::ATTR_WPAN_PHY) {
            idx
        } else if let Some(ifindex) = attrs.u32(nl::ATTR_IFINDEX) {
            self.ifaces
                .iter()
                .find(|i| i.ifindex == ifindex)
                .and_then(|i| i.phy)
                .ok_or(errno::ENODEV)?
        } else {
            return Err(errno::EINVAL);
        };
        self.phys
            .iter()
            .find(|p| p.index == index)
            .ok_or(errno::ENODEV)
    }

    fn keep(&self, tag: u16) -> bool {
        !self.omitted.contains(&tag)
    }

    fn phy_attrs(&self, phy: &SimPhy) -> Result<AttrBuf, CodecError> {
        let mut a = AttrBuf::new();
        a.put_u32(nl::ATTR_WPAN_PHY, phy.index)?;
        a.put_str(nl::ATTR_WPAN_PHY_NAME, &phy.name)?;
        a.put_u32(nl::ATTR_GENERATION, 1)?;
        if self.keep(nl::ATTR_PAGE) {
            a.put_u8(nl::ATTR_PAGE, phy.page)?;
        }
        if self.keep(nl::ATTR_CHANNEL) {
            a.put_u8(nl::ATTR_CHANNEL, phy.channel)?;
        }
        if self.keep(nl::ATTR_TX_POWER) {
            a.put_s32(nl::ATTR_TX_POWER, phy.tx_power_mbm)?;
        }
        if self.keep(nl::ATTR_CCA_MODE) {
            a.put_u32(nl::ATTR_CCA_MODE, phy.cca_mode)?;
        }
        if self.keep(nl::ATTR_CCA_OPT) {
            a.put_u32(nl::ATTR_CCA_OPT, phy.cca_opt)?;
        }
        a.put_s32(nl::ATTR_CCA_ED_LEVEL, phy.cca_ed_level_mbm)?;
        if !self.keep(nl::ATTR_WPAN_PHY_CAPS) {
            return Ok(a);
        }
        let corrupt = self.corrupt_caps;
        a.nest(nl::ATTR_WPAN_PHY_CAPS, |caps| {
            caps.nest(nl::CAP_ATTR_CHANNELS, |pages| {
                for (page, channels) in &phy.channels {
                    pages.nest(u16::from(*page), |chs| {
                        for ch in channels {
                            chs.put_flag(u16::from(*ch))?;
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            })?;
            caps.nest(nl::CAP_ATTR_TX_POWERS, |lv| put_levels(lv, &phy.tx_powers_mbm, corrupt))?;
            caps.nest(nl::CAP_ATTR_CCA_ED_LEVELS, |lv| {
                put_levels(lv, &phy.cca_ed_levels_mbm, corrupt)
            })?;
            caps.nest(nl::CAP_ATTR_CCA_MODES, |m| {
                for mode in [nl::CCA_ENERGY, nl::CCA_CARRIER, nl::CCA_ENERGY_CARRIER] {
                    m.put_flag(mode as u16)?;
                }
                Ok(())
            })?;
            caps.put_u8(nl::CAP_ATTR_MIN_MINBE, 0)?
                .put_u8(nl::CAP_ATTR_MAX_MAXBE, 8)?
                .put_s8(nl::CAP_ATTR_MIN_FRAME_RETRIES, -1)?
                .put_s8(nl::CAP_ATTR_MAX_FRAME_RETRIES, 7)?
                .put_u32(nl::CAP_ATTR_LBT, 0)?;
            Ok(())
        })?;
        Ok(a)
    }

    fn iface_attrs(&self, iface: &SimInterface) -> Result<AttrBuf, CodecError> {
        let mut a = AttrBuf::new();
        a.put_u32(nl::ATTR_IFINDEX, iface.ifindex)?;
        a.put_str(nl::ATTR_IFNAME, &iface.name)?;
        if let Some(phy) = iface.phy {
            a.put_u32(nl::ATTR_WPAN_PHY, phy)?;
        }
        a.put_u64(nl::ATTR_WPAN_DEV, u64::from(iface.ifindex))?;
        let fields = [
            (nl::ATTR_IFTYPE, AttrValue::U32(iface.iftype)),
            (nl::ATTR_MIN_BE, AttrValue::U8(iface.min_be)),
            (nl::ATTR_MAX_BE, AttrValue::U8(iface.max_be)),
            (nl::ATTR_MAX_CSMA_BACKOFFS, AttrValue::U8(iface.csma_backoffs)),
            (nl::ATTR_MAX_FRAME_RETRIES, AttrValue::S8(iface.frame_retries)),
            (nl::ATTR_LBT_MODE, AttrValue::U8(u8::from(iface.lbt))),
            (nl::ATTR_ACKREQ_DEFAULT, AttrValue::U8(0)),
        ];
        for (tag, value) in fields.iter().filter(|(tag, _)| self.keep(*tag)) {
            a.put_value(*tag, value)?;
        }
        if self.keep(nl::ATTR_PAN_ID) {
            a.put_le16(nl::ATTR_PAN_ID, iface.pan_id)?;
        }
        if self.keep(nl::ATTR_SHORT_ADDR) {
            a.put_le16(nl::ATTR_SHORT_ADDR, iface.short_addr)?;
        }
        if self.keep(nl::ATTR_EXTENDED_ADDR) {
            a.put_le64(nl::ATTR_EXTENDED_ADDR, iface.extended_addr)?;
        }
        Ok(a)
    }
}

fn put_levels(buf: &mut AttrBuf, levels: &[i32], corrupt: bool) -> Result<(), CodecError> {
    for (i, mbm) in levels.iter().enumerate() {
        let tag = u16::try_from(i).map_err(|_| CodecError::BadLength {
            what: "level index",
            len: i,
        })?;
        if corrupt {
            buf.put(tag, &mbm.to_ne_bytes()[..2])?;
        } else {
            buf.put_s32(tag, *mbm)?;
        }
    }
    Ok(())
}

/// Host view of the simulated devices.
#[derive(Debug, Clone)]
pub struct SimHost {
    kernel: SimKernel,
}

impl HostLookup for SimHost {
    fn if_nametoindex(&self, name: &str) -> Option<u32> {
        self.netdev_ifindex(name)
    }

    fn phy_index(&self, phy: &str) -> Option<u32> {
        let state = self.kernel.state.lock();
        state.phys.iter().find(|p| p.name == phy).map(|p| p.index)
    }

    fn net_interfaces(&self) -> Vec<String> {
        let state = self.kernel.state.lock();
        state.ifaces.iter().map(|i| i.name.clone()).collect()
    }

    fn netdev_phy_index(&self, ifname: &str) -> Option<u32> {
        let state = self.kernel.state.lock();
        state.ifaces.iter().find(|i| i.name == ifname)?.phy
    }

    fn netdev_ifindex(&self, ifname: &str) -> Option<u32> {
        let state = self.kernel.state.lock();
        state
            .ifaces
            .iter()
            .find(|i| i.name == ifname)
            .map(|i| i.ifindex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Terminal;
    use genl_transport::GenlRequest;

    #[test]
    fn channel_opens_against_sim() {
        let sim = SimKernel::demo();
        let mut ch = sim.channel();
        assert_eq!(ch.family().unwrap().id, SIM_FAMILY_ID);
        assert_eq!(sim.connections(), 1);
    }

    #[test]
    fn interface_query_without_ifindex_is_einval() {
        let sim = SimKernel::demo();
        let mut ch = sim.channel();
        let mut req = GenlRequest::new(SIM_FAMILY_ID, nl::CMD_GET_INTERFACE);
        req.attrs_mut().put_u32(nl::ATTR_WPAN_PHY, 0).unwrap();
        let ex = ch.request(req).unwrap();
        assert_eq!(ex.terminal, Terminal::Error(errno::EINVAL));
    }

    #[test]
    fn phy_query_by_ifindex_returns_data_and_ack() {
        let sim = SimKernel::demo();
        let mut ch = sim.channel();
        let mut req = GenlRequest::new(SIM_FAMILY_ID, nl::CMD_GET_WPAN_PHY);
        req.attrs_mut().put_u32(nl::ATTR_IFINDEX, 5).unwrap();
        let ex = ch.request(req).unwrap();
        assert_eq!(ex.terminal, Terminal::Ack);
        assert_eq!(ex.replies[0].cmd, nl::CMD_NEW_WPAN_PHY);
        let attrs = ex.replies[0].attrs(&nl::ATTRS).unwrap();
        assert_eq!(attrs.str(nl::ATTR_WPAN_PHY_NAME), Some("wpan-phy0"));
        let pages = attrs
            .nested(nl::ATTR_WPAN_PHY_CAPS)
            .and_then(|c| c.nested(nl::CAP_ATTR_CHANNELS))
            .unwrap();
        assert_eq!(pages.nested(0).unwrap().len(), 16);
    }

    #[test]
    fn replies_carry_the_kernel_new_commands() {
        let sim = SimKernel::demo();
        let mut ch = sim.channel();
        let mut req = GenlRequest::new(SIM_FAMILY_ID, nl::CMD_GET_INTERFACE);
        req.attrs_mut().put_u32(nl::ATTR_IFINDEX, 5).unwrap();
        let ex = ch.request(req).unwrap();
        assert_eq!(ex.replies.len(), 1);
        assert_eq!(ex.replies[0].cmd, 7);

        let mut req = GenlRequest::new(SIM_FAMILY_ID, nl::CMD_GET_WPAN_PHY);
        req.attrs_mut().put_u32(nl::ATTR_WPAN_PHY, 0).unwrap();
        let ex = ch.request(req).unwrap();
        assert_eq!(ex.replies[0].cmd, 3);
    }

    #[test]
    fn host_view_matches_devices() {
        let host = SimKernel::demo().host();
        assert_eq!(host.if_nametoindex("wpan0"), Some(5));
        assert_eq!(host.phy_index("wpan-phy1"), Some(1));
        assert_eq!(host.netdev_phy_index("lo"), None);
        assert_eq!(host.net_interfaces(), vec!["lo", "wpan0", "monitor0"]);
    }
}

//! The control channel: one generic netlink link plus the family ids resolved
//! over it.
//!
//! A request moves `Idle -> Sent -> Receiving* -> (Acked | Errored) -> Idle`.
//! Data replies are collected while receiving and handed back together with
//! the terminal outcome in an [`Exchange`]. I/O failures fail only the call
//! in progress; the channel stays open for the next request.

use crate::metrics::ChannelMetrics;
use crate::nl802154::{
    CTRL_ATTRS, CTRL_ATTR_FAMILY_ID, CTRL_ATTR_FAMILY_NAME, CTRL_ATTR_HDRSIZE, CTRL_ATTR_MAXATTR,
    CTRL_ATTR_VERSION, CTRL_CMD_GETFAMILY, CTRL_FAMILY_NAME, FAMILY_NAME, GENL_ID_CTRL,
};
use crate::ChannelError;
use genl_transport::{
    parse_attrs, parse_datagram, AttrMap, CodecError, FamilyInfo, GenlRequest, MessageBody,
    Schema, Transport, TransportError, NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST,
};
use tracing::{debug, info, warn};

/// How a request finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Ack,
    /// End of a multipart dump.
    Done,
    /// Kernel error code (negative errno).
    Error(i32),
    Timeout,
}

/// One data message received for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub cmd: u8,
    pub payload: Vec<u8>,
}

impl Reply {
    pub fn attrs(&self, schema: &'static Schema) -> Result<AttrMap, CodecError> {
        parse_attrs(&self.payload, schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub replies: Vec<Reply>,
    pub terminal: Terminal,
}

/// Families published by the kernel, filled from one `GETFAMILY` dump.
#[derive(Debug, Default)]
struct FamilyCache {
    families: Vec<FamilyInfo>,
}

impl FamilyCache {
    fn search_by_name(&self, name: &str) -> Option<&FamilyInfo> {
        self.families.iter().find(|f| f.name == name)
    }
}

fn family_from_attrs(attrs: &AttrMap) -> Option<FamilyInfo> {
    Some(FamilyInfo {
        id: attrs.u16(CTRL_ATTR_FAMILY_ID)?,
        name: attrs.str(CTRL_ATTR_FAMILY_NAME)?.to_owned(),
        version: attrs.u32(CTRL_ATTR_VERSION).unwrap_or(0),
        hdrsize: attrs.u32(CTRL_ATTR_HDRSIZE).unwrap_or(0),
        maxattr: attrs.u32(CTRL_ATTR_MAXATTR).unwrap_or(0),
    })
}

// Fields drop in declaration order: family handles, cache, then the link.
struct Session<T> {
    wpan: Option<FamilyInfo>,
    ctrl: Option<FamilyInfo>,
    cache: Option<FamilyCache>,
    seq: u32,
    transport: T,
}

impl<T: Transport> Session<T> {
    fn new(transport: T) -> Self {
        Self {
            wpan: None,
            ctrl: None,
            cache: None,
            seq: 0,
            transport,
        }
    }

    fn exchange(
        &mut self,
        req: GenlRequest,
        metrics: Option<&ChannelMetrics>,
    ) -> Result<Exchange, ChannelError> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let bytes = req
            .flags(NLM_F_REQUEST | NLM_F_ACK)
            .encode(seq, self.transport.port_id())?;
        self.transport.send(&bytes)?;
        if let Some(m) = metrics {
            m.requests_sent.inc();
        }
        debug!(seq, len = bytes.len(), "request sent");

        let mut replies = Vec::new();
        loop {
            let datagram = match self.transport.recv() {
                Ok(d) => d,
                Err(TransportError::Timeout) => {
                    debug!(seq, "no terminal reply before timeout");
                    return Ok(Exchange {
                        replies,
                        terminal: Terminal::Timeout,
                    });
                }
                Err(e) => return Err(e.into()),
            };
            for msg in parse_datagram(&datagram)? {
                if msg.header.seq != seq {
                    debug!(expected = seq, got = msg.header.seq, "skipping stale reply");
                    continue;
                }
                let terminal = match msg.body {
                    MessageBody::Genl { header, payload } => {
                        if let Some(m) = metrics {
                            m.replies_received.inc();
                        }
                        replies.push(Reply {
                            cmd: header.cmd,
                            payload,
                        });
                        continue;
                    }
                    MessageBody::Noop => continue,
                    MessageBody::Overrun => return Err(ChannelError::Overrun),
                    MessageBody::Error { code: 0 } => Terminal::Ack,
                    MessageBody::Error { code } => {
                        if let Some(m) = metrics {
                            m.protocol_errors.inc();
                        }
                        Terminal::Error(code)
                    }
                    MessageBody::Done => Terminal::Done,
                };
                debug!(seq, ?terminal, replies = replies.len(), "request finished");
                return Ok(Exchange { replies, terminal });
            }
        }
    }

    fn fill_cache(&mut self, metrics: Option<&ChannelMetrics>) -> Result<(), ChannelError> {
        let req = GenlRequest::new(GENL_ID_CTRL, CTRL_CMD_GETFAMILY).flags(NLM_F_DUMP);
        let ex = self.exchange(req, metrics)?;
        match ex.terminal {
            Terminal::Timeout => return Err(TransportError::Timeout.into()),
            Terminal::Error(code) => warn!(code, "family dump ended with error"),
            Terminal::Ack | Terminal::Done => {}
        }
        let mut cache = FamilyCache::default();
        for reply in &ex.replies {
            match reply.attrs(&CTRL_ATTRS) {
                Ok(attrs) => cache.families.extend(family_from_attrs(&attrs)),
                Err(e) => warn!(error = %e, "skipping malformed family record"),
            }
        }
        debug!(families = cache.families.len(), "family cache filled");
        self.cache = Some(cache);
        Ok(())
    }

    fn resolve_families(&mut self) -> Result<(), ChannelError> {
        let cache = self
            .cache
            .as_ref()
            .ok_or(ChannelError::FamilyNotFound(FAMILY_NAME))?;
        let wpan = cache
            .search_by_name(FAMILY_NAME)
            .cloned()
            .ok_or(ChannelError::FamilyNotFound(FAMILY_NAME))?;
        let ctrl = cache
            .search_by_name(CTRL_FAMILY_NAME)
            .cloned()
            .ok_or(ChannelError::FamilyNotFound(CTRL_FAMILY_NAME))?;
        self.wpan = Some(wpan);
        self.ctrl = Some(ctrl);
        Ok(())
    }
}

type Connector<T> = Box<dyn FnMut() -> genl_transport::Result<T> + Send>;

/// Owner of the process' link to nl802154. Opened lazily on first use,
/// closed explicitly or on drop, and reopenable after closing.
pub struct ControlChannel<T: Transport> {
    connect: Connector<T>,
    session: Option<Session<T>>,
    metrics: Option<ChannelMetrics>,
}

impl<T: Transport + 'static> ControlChannel<T> {
    /// Channel whose links are made with [`Transport::open`].
    pub fn new() -> Self {
        Self::with_connector(T::open)
    }

    pub fn with_connector<F>(connect: F) -> Self
    where
        F: FnMut() -> genl_transport::Result<T> + Send + 'static,
    {
        Self {
            connect: Box::new(connect),
            session: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ChannelMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<T: Transport + 'static> Default for ControlChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> ControlChannel<T> {
    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Connect and resolve the nl802154 and nlctrl families. A no-op when
    /// already open; on failure nothing is kept and the next call starts over.
    pub fn open(&mut self) -> Result<(), ChannelError> {
        if self.session.is_some() {
            return Ok(());
        }
        match self.establish() {
            Ok(session) => {
                if let Some(wpan) = &session.wpan {
                    info!(family = %wpan.name, id = wpan.id, "control channel open");
                }
                self.session = Some(session);
                if let Some(m) = &self.metrics {
                    m.open_channels.inc();
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "control channel init failed");
                if let Some(m) = &self.metrics {
                    m.init_failures.inc();
                }
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<Session<T>, ChannelError> {
        let transport = (self.connect)()?;
        let mut session = Session::new(transport);
        session.fill_cache(self.metrics.as_ref())?;
        session.resolve_families()?;
        Ok(session)
    }

    /// Release family handles, cache and link. Safe to repeat.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            drop(session);
            if let Some(m) = &self.metrics {
                m.open_channels.dec();
            }
            info!("control channel closed");
        }
    }

    /// nl802154 family, opening the channel if needed.
    pub fn family(&mut self) -> Result<&FamilyInfo, ChannelError> {
        self.open()?;
        self.session
            .as_ref()
            .and_then(|s| s.wpan.as_ref())
            .ok_or(ChannelError::FamilyNotFound(FAMILY_NAME))
    }

    pub fn ctrl_family(&mut self) -> Result<&FamilyInfo, ChannelError> {
        self.open()?;
        self.session
            .as_ref()
            .and_then(|s| s.ctrl.as_ref())
            .ok_or(ChannelError::FamilyNotFound(CTRL_FAMILY_NAME))
    }

    /// Send `req` and collect its replies up to the terminal message.
    pub fn request(&mut self, req: GenlRequest) -> Result<Exchange, ChannelError> {
        self.open()?;
        let metrics = self.metrics.as_ref();
        match self.session.as_mut() {
            Some(session) => session.exchange(req, metrics),
            None => Err(TransportError::Closed.into()),
        }
    }
}

impl<T: Transport> Drop for ControlChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::nl802154::{ATTRS, ATTR_CHANNEL, ATTR_IFINDEX, CMD_GET_WPAN_PHY, CTRL_CMD_NEWFAMILY};
    use genl_transport::message::{encode_done, encode_error, encode_genl};
    use genl_transport::{AttrBuf, GenlHeader, MockTransport, NlMsgHeader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const WPAN_ID: u16 = 0x1a;

    fn family_record(id: u16, name: &str, seq: u32) -> Vec<u8> {
        let mut attrs = AttrBuf::new();
        attrs.put_u16(CTRL_ATTR_FAMILY_ID, id).unwrap();
        attrs.put_str(CTRL_ATTR_FAMILY_NAME, name).unwrap();
        attrs.put_u32(CTRL_ATTR_VERSION, 1).unwrap();
        encode_genl(
            GENL_ID_CTRL,
            genl_transport::NLM_F_MULTI,
            seq,
            0,
            GenlHeader {
                cmd: CTRL_CMD_NEWFAMILY,
                version: 2,
            },
            attrs.as_bytes(),
        )
        .unwrap()
    }

    /// Answers the family dump with `families`, then hands every other
    /// request to `reply`.
    fn kernel<F>(families: &'static [(&'static str, u16)], mut reply: F) -> MockTransport
    where
        F: FnMut(NlMsgHeader) -> Vec<Vec<u8>> + Send + 'static,
    {
        MockTransport::with_responder(move |req| {
            let hdr = NlMsgHeader::parse(req).unwrap();
            if hdr.kind == GENL_ID_CTRL {
                let mut out: Vec<u8> = Vec::new();
                for (name, id) in families {
                    out.extend(family_record(*id, name, hdr.seq));
                }
                out.extend(encode_done(hdr.seq, 0));
                vec![out]
            } else {
                reply(hdr)
            }
        })
    }

    const BOTH: &[(&str, u16)] = &[("nlctrl", GENL_ID_CTRL), ("nl802154", WPAN_ID)];

    fn channel_reply(hdr: NlMsgHeader, channel: u8) -> Vec<u8> {
        let mut attrs = AttrBuf::new();
        attrs.put_u8(ATTR_CHANNEL, channel).unwrap();
        encode_genl(
            WPAN_ID,
            0,
            hdr.seq,
            0,
            GenlHeader { cmd: 2, version: 0 },
            attrs.as_bytes(),
        )
        .unwrap()
    }

    fn get_phy() -> GenlRequest {
        let mut req = GenlRequest::new(WPAN_ID, CMD_GET_WPAN_PHY);
        req.attrs_mut().put_u32(ATTR_IFINDEX, 3).unwrap();
        req
    }

    #[test]
    fn open_resolves_both_families() {
        let mut ch = ControlChannel::with_connector(|| Ok(kernel(BOTH, |_| Vec::new())));
        assert!(!ch.is_open());
        assert_eq!(ch.family().unwrap().id, WPAN_ID);
        assert_eq!(ch.ctrl_family().unwrap().id, GENL_ID_CTRL);
        assert!(ch.is_open());
    }

    #[test]
    fn data_then_ack_is_collected() {
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| {
                vec![channel_reply(hdr, 11), encode_error(hdr.seq, 0, 0, &hdr)]
            }))
        });
        let ex = ch.request(get_phy()).unwrap();
        assert_eq!(ex.terminal, Terminal::Ack);
        assert_eq!(ex.replies.len(), 1);
        let attrs = ex.replies[0].attrs(&ATTRS).unwrap();
        assert_eq!(attrs.u8(ATTR_CHANNEL), Some(11));
    }

    #[test]
    fn kernel_error_is_terminal() {
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| vec![encode_error(hdr.seq, 0, -19, &hdr)]))
        });
        let ex = ch.request(get_phy()).unwrap();
        assert_eq!(ex.terminal, Terminal::Error(-19));
        assert!(ex.replies.is_empty());
    }

    #[test]
    fn replies_for_other_sequence_numbers_are_skipped() {
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| {
                let stale = NlMsgHeader {
                    seq: hdr.seq.wrapping_sub(1),
                    ..hdr
                };
                vec![
                    channel_reply(stale, 26),
                    channel_reply(hdr, 15),
                    encode_error(hdr.seq, 0, 0, &hdr),
                ]
            }))
        });
        let ex = ch.request(get_phy()).unwrap();
        assert_eq!(ex.replies.len(), 1);
        assert_eq!(ex.replies[0].attrs(&ATTRS).unwrap().u8(ATTR_CHANNEL), Some(15));
    }

    #[test]
    fn missing_terminal_reports_timeout() {
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| vec![channel_reply(hdr, 11)]))
        });
        let ex = ch.request(get_phy()).unwrap();
        assert_eq!(ex.terminal, Terminal::Timeout);
        assert_eq!(ex.replies.len(), 1);
    }

    #[test]
    fn failed_init_is_retried_from_scratch() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut ch = ControlChannel::with_connector(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(kernel(&[("nlctrl", GENL_ID_CTRL)], |_| Vec::new()))
            } else {
                Ok(kernel(BOTH, |_| Vec::new()))
            }
        });
        assert!(matches!(
            ch.open(),
            Err(ChannelError::FamilyNotFound("nl802154"))
        ));
        assert!(!ch.is_open());
        ch.open().unwrap();
        assert!(ch.is_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connect_failure_leaves_channel_closed() {
        let mut ch: ControlChannel<MockTransport> =
            ControlChannel::with_connector(|| Err(TransportError::Io("no netlink".into())));
        assert!(matches!(ch.open(), Err(ChannelError::Transport(_))));
        assert!(!ch.is_open());
        assert!(ch.request(get_phy()).is_err());
    }

    #[test]
    fn close_twice_matches_fresh_channel() {
        let mut ch = ControlChannel::with_connector(|| Ok(kernel(BOTH, |_| Vec::new())));
        ch.open().unwrap();
        ch.close();
        ch.close();
        assert!(!ch.is_open());
        let fresh = ControlChannel::with_connector(|| Ok(kernel(BOTH, |_| Vec::new())));
        assert_eq!(ch.is_open(), fresh.is_open());
        ch.open().unwrap();
        assert!(ch.is_open());
    }

    #[test]
    fn send_failure_fails_only_that_call() {
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| vec![encode_error(hdr.seq, 0, 0, &hdr)]))
        });
        ch.open().unwrap();
        if let Some(s) = ch.session.as_mut() {
            s.transport.fail_sends(true);
        }
        assert!(matches!(
            ch.request(get_phy()),
            Err(ChannelError::Transport(_))
        ));
        if let Some(s) = ch.session.as_mut() {
            s.transport.fail_sends(false);
        }
        assert_eq!(ch.request(get_phy()).unwrap().terminal, Terminal::Ack);
    }

    #[test]
    fn metrics_follow_channel_lifecycle() {
        let hub = crate::MetricsHub::new().unwrap();
        let mut ch = ControlChannel::with_connector(|| {
            Ok(kernel(BOTH, |hdr| vec![encode_error(hdr.seq, 0, -22, &hdr)]))
        })
        .with_metrics(hub.channel.clone());
        ch.request(get_phy()).unwrap();
        assert_eq!(hub.channel.open_channels.get(), 1);
        assert_eq!(hub.channel.requests_sent.get(), 2);
        assert_eq!(hub.channel.protocol_errors.get(), 1);
        drop(ch);
        assert_eq!(hub.channel.open_channels.get(), 0);
    }
}

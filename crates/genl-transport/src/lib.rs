//! genl-transport: generic netlink framing and transports
//!
//! This crate provides the netlink message and attribute codec plus a small
//! [`Transport`] trait with feature-gated backends. The default build enables
//! both the `socket` backend (a real `NETLINK_GENERIC` socket) and the `mock`
//! backend used by tests and simulated hosts.

mod types;
pub use types::{
    align, FamilyInfo, GenlHeader, NlMsgHeader, GENL_HDRLEN, NLA_F_NESTED, NLA_F_NET_BYTEORDER,
    NLA_HDRLEN, NLA_TYPE_MASK, NLMSG_DONE, NLMSG_ERROR, NLMSG_HDRLEN, NLMSG_NOOP, NLMSG_OVERRUN,
    NLM_F_ACK, NLM_F_DUMP, NLM_F_MATCH, NLM_F_MULTI, NLM_F_REQUEST, NLM_F_ROOT,
};

mod error;
pub use error::{CodecError, Result, TransportError};

pub mod attr;
pub use attr::{parse_attrs, AttrBuf, AttrKind, AttrMap, AttrValue, Schema};

pub mod message;
pub use message::{parse_datagram, GenlRequest, MessageBody, NetlinkMessage};

mod traits;
pub use traits::Transport;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockTransport;

#[cfg(feature = "socket")]
mod socket;

#[cfg(feature = "socket")]
pub use socket::GenlSocket;

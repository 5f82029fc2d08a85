//! Framing of whole generic netlink messages.

use crate::attr::{AttrBuf, DEFAULT_MESSAGE_CAPACITY};
use crate::types::{
    align, GenlHeader, NlMsgHeader, GENL_HDRLEN, NLMSG_DONE, NLMSG_ERROR, NLMSG_HDRLEN,
    NLMSG_NOOP, NLMSG_OVERRUN, NLM_F_MULTI,
};
use crate::CodecError;

/// An outbound generic netlink request.
#[derive(Clone, Debug)]
pub struct GenlRequest {
    pub family: u16,
    pub cmd: u8,
    pub version: u8,
    pub flags: u16,
    pub attrs: AttrBuf,
}

impl GenlRequest {
    pub fn new(family: u16, cmd: u8) -> Self {
        Self {
            family,
            cmd,
            version: 0,
            flags: 0,
            attrs: AttrBuf::new(),
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    pub fn attrs_mut(&mut self) -> &mut AttrBuf {
        &mut self.attrs
    }

    /// Serialize with the given sequence number and port id.
    pub fn encode(&self, seq: u32, pid: u32) -> Result<Vec<u8>, CodecError> {
        encode_genl(
            self.family,
            self.flags,
            seq,
            pid,
            GenlHeader {
                cmd: self.cmd,
                version: self.version,
            },
            self.attrs.as_bytes(),
        )
    }
}

/// Frame a generic netlink message around an attribute run.
pub fn encode_genl(
    family: u16,
    flags: u16,
    seq: u32,
    pid: u32,
    genl: GenlHeader,
    attrs: &[u8],
) -> Result<Vec<u8>, CodecError> {
    let len = NLMSG_HDRLEN + GENL_HDRLEN + attrs.len();
    if len > DEFAULT_MESSAGE_CAPACITY {
        return Err(CodecError::Capacity {
            needed: len,
            capacity: DEFAULT_MESSAGE_CAPACITY,
        });
    }
    let mut out = Vec::with_capacity(len);
    NlMsgHeader {
        len: len as u32,
        kind: family,
        flags,
        seq,
        pid,
    }
    .write(&mut out);
    genl.write(&mut out);
    out.extend_from_slice(attrs);
    Ok(out)
}

/// `NLMSG_ERROR` carrying `code` (0 for an acknowledgement) and the header
/// of the request it answers.
pub fn encode_error(seq: u32, pid: u32, code: i32, request: &NlMsgHeader) -> Vec<u8> {
    let len = NLMSG_HDRLEN + 4 + NLMSG_HDRLEN;
    let mut out = Vec::with_capacity(len);
    NlMsgHeader {
        len: len as u32,
        kind: NLMSG_ERROR,
        flags: 0,
        seq,
        pid,
    }
    .write(&mut out);
    out.extend_from_slice(&code.to_ne_bytes());
    request.write(&mut out);
    out
}

/// `NLMSG_DONE` terminating a multipart dump.
pub fn encode_done(seq: u32, pid: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(NLMSG_HDRLEN + 4);
    NlMsgHeader {
        len: (NLMSG_HDRLEN + 4) as u32,
        kind: NLMSG_DONE,
        flags: NLM_F_MULTI,
        seq,
        pid,
    }
    .write(&mut out);
    out.extend_from_slice(&0i32.to_ne_bytes());
    out
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// Family message; `payload` is the attribute run after the genl header.
    Genl { header: GenlHeader, payload: Vec<u8> },
    /// `NLMSG_ERROR`; a zero code is an acknowledgement.
    Error { code: i32 },
    Done,
    Noop,
    Overrun,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetlinkMessage {
    pub header: NlMsgHeader,
    pub body: MessageBody,
}

impl NetlinkMessage {
    pub fn is_multipart(&self) -> bool {
        self.header.flags & NLM_F_MULTI != 0
    }
}

/// Split one received datagram into its messages.
pub fn parse_datagram(buf: &[u8]) -> Result<Vec<NetlinkMessage>, CodecError> {
    let mut out = Vec::new();
    let mut rest = buf;
    while rest.len() >= NLMSG_HDRLEN {
        let header = NlMsgHeader::parse(rest)?;
        let len = header.len as usize;
        if len < NLMSG_HDRLEN || len > rest.len() {
            return Err(CodecError::BadLength {
                what: "nlmsghdr",
                len,
            });
        }
        let data = &rest[NLMSG_HDRLEN..len];
        let body = match header.kind {
            NLMSG_ERROR => {
                let code = data
                    .get(..4)
                    .ok_or(CodecError::Truncated("nlmsgerr"))?;
                MessageBody::Error {
                    code: i32::from_ne_bytes([code[0], code[1], code[2], code[3]]),
                }
            }
            NLMSG_DONE => MessageBody::Done,
            NLMSG_NOOP => MessageBody::Noop,
            NLMSG_OVERRUN => MessageBody::Overrun,
            _ => MessageBody::Genl {
                header: GenlHeader::parse(data)?,
                payload: data[GENL_HDRLEN..].to_vec(),
            },
        };
        out.push(NetlinkMessage { header, body });
        rest = &rest[align(len).min(rest.len())..];
    }
    Ok(out)
}

use std::collections::VecDeque;

use crate::{Result, Transport, TransportError};

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// In-process transport. Each sent datagram is handed to an optional
/// responder whose returned datagrams are queued for `recv`.
#[derive(Default)]
pub struct MockTransport {
    responder: Option<Responder>,
    inbox: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    fail_send: bool,
}

impl MockTransport {
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn fail_sends(&mut self, fail: bool) {
        self.fail_send = fail;
    }
}

impl Transport for MockTransport {
    fn open() -> Result<Self> {
        Ok(Self::default())
    }

    fn send(&mut self, datagram: &[u8]) -> Result<()> {
        if self.fail_send {
            return Err(TransportError::Io("mock send failure".into()));
        }
        self.sent.push(datagram.to_vec());
        if let Some(responder) = self.responder.as_mut() {
            self.inbox.extend(responder(datagram));
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        self.inbox.pop_front().ok_or(TransportError::Timeout)
    }
}

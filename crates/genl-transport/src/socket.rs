use std::io;

use netlink_sys::{protocols::NETLINK_GENERIC, Socket, SocketAddr};
use tracing::{debug, trace};

use crate::{Result, Transport, TransportError};

/// `NETLINK_GENERIC` socket connected to the kernel.
pub struct GenlSocket {
    socket: Socket,
    port: u32,
}

impl Transport for GenlSocket {
    fn open() -> Result<Self> {
        // Opened with SOCK_CLOEXEC.
        let mut socket = Socket::new(NETLINK_GENERIC).map_err(io_err)?;
        let local = socket.bind_auto().map_err(io_err)?;
        socket.connect(&SocketAddr::new(0, 0)).map_err(io_err)?;
        let port = local.port_number();
        debug!(port, "generic netlink socket bound");
        Ok(Self { socket, port })
    }

    fn send(&mut self, datagram: &[u8]) -> Result<()> {
        trace!(len = datagram.len(), "netlink send");
        let sent = self.socket.send(datagram, 0).map_err(io_err)?;
        if sent != datagram.len() {
            return Err(TransportError::Io(format!(
                "short send: {sent} of {} bytes",
                datagram.len()
            )));
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let (buf, _from) = self.socket.recv_from_full().map_err(io_err)?;
        trace!(len = buf.len(), "netlink recv");
        Ok(buf)
    }

    fn port_id(&self) -> u32 {
        self.port
    }
}

fn io_err(e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportError::Timeout,
        _ => TransportError::Io(e.to_string()),
    }
}

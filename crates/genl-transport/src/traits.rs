use crate::Result;

/// A blocking datagram link to the kernel's generic netlink bus.
pub trait Transport {
    /// Open and bind a fresh link.
    fn open() -> Result<Self>
    where
        Self: Sized;

    /// Send one already-framed request.
    fn send(&mut self, datagram: &[u8]) -> Result<()>;

    /// Receive one datagram, which may carry several messages.
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Port id assigned to this link; 0 lets the kernel fill it in.
    fn port_id(&self) -> u32 {
        0
    }
}

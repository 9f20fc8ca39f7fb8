//! A simple non-blocking UDP transport.
//!
//! UDP gives neither reliability nor ordering, so [`DeliveryMode::Reliable`]
//! is honored by the layers above (the chat queue retransmits until
//! acknowledged, the round lifecycle re-requests finalize); at this level
//! both modes send a single datagram.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use tracing::warn;

use crate::network::transport::{CloseReason, DeliveryMode, Inbox, Transport};
use crate::TidelinkError;

const RECV_BUFFER_SIZE: usize = 4096;
/// A packet larger than this may be fragmented, so ideally we wouldn't send
/// packets larger than this.
/// Source: <https://stackoverflow.com/a/35697810/775982>
const IDEAL_MAX_UDP_PACKET_SIZE: usize = 508;

/// A non-blocking UDP transport connected to a single server address.
///
/// [`pump`] must be called once per tick (or from a dedicated receive loop)
/// to move datagrams from the socket into the shared [`Inbox`].
///
/// [`pump`]: UdpTransport::pump
#[derive(Debug)]
pub struct UdpTransport {
    server_addr: SocketAddr,
    socket: Option<UdpSocket>,
    inbox: Inbox,
    /// Receive buffer - reused across recv calls
    recv_buffer: [u8; RECV_BUFFER_SIZE],
}

impl UdpTransport {
    /// Creates a transport aimed at the given server address. The socket is
    /// not opened until [`Transport::open`] is called.
    #[must_use]
    pub fn new(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            socket: None,
            inbox: Inbox::new(),
            recv_buffer: [0; RECV_BUFFER_SIZE],
        }
    }

    /// A handle onto the inbound frame queue.
    #[must_use]
    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    /// Drains all pending datagrams from the socket into the inbox.
    ///
    /// Non-blocking; returns the number of frames deposited.
    pub fn pump(&mut self) -> usize {
        let Some(socket) = &self.socket else {
            return 0;
        };
        let mut deposited = 0;
        loop {
            match socket.recv(&mut self.recv_buffer) {
                Ok(number_of_bytes) => {
                    if let Some(frame) = self.recv_buffer.get(..number_of_bytes) {
                        self.inbox.push(frame.to_vec());
                        deposited += 1;
                    }
                }
                // there are no more datagrams
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return deposited,
                // datagram sockets sometimes report this as a result of a prior send
                Err(ref err) if err.kind() == ErrorKind::ConnectionReset => continue,
                Err(err) => {
                    warn!("unexpected socket error: {:?}: {}", err.kind(), err);
                    return deposited;
                }
            }
        }
    }
}

impl Transport for UdpTransport {
    fn open(&mut self) -> Result<(), TidelinkError> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let socket = UdpSocket::bind(bind_addr).map_err(|e| TidelinkError::SocketError {
            context: format!("bind failed: {e}"),
        })?;
        socket
            .connect(self.server_addr)
            .map_err(|e| TidelinkError::SocketError {
                context: format!("connect to {} failed: {e}", self.server_addr),
            })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TidelinkError::SocketError {
                context: format!("set_nonblocking failed: {e}"),
            })?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, frame: &[u8], _mode: DeliveryMode) -> Result<(), TidelinkError> {
        let Some(socket) = &self.socket else {
            return Err(TidelinkError::NotConnected);
        };
        if frame.len() > IDEAL_MAX_UDP_PACKET_SIZE {
            warn!(
                "sending UDP packet of {} bytes, larger than ideal ({})",
                frame.len(),
                IDEAL_MAX_UDP_PACKET_SIZE
            );
        }
        // UDP is best-effort; a dropped packet is expected behavior, but a
        // hard send error is surfaced to the supervisor.
        socket.send(frame).map_err(|e| TidelinkError::SocketError {
            context: format!("send failed: {e}"),
        })?;
        Ok(())
    }

    fn close(&mut self, _reason: CloseReason) {
        self.socket = None;
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn poll_receive(&mut self) {
        let _ = self.pump();
    }
}

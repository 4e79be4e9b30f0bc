use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::probe::protocol::Protocol as EchoProtocol;

/// Socket timeouts of zero mean "block forever", so clamp to this instead
const MIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// Socket capability level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketCapability {
    /// Raw ICMP socket - sees every ICMP message the host receives
    Raw,
    /// Unprivileged ICMP socket - kernel filters replies and owns the identifier
    Dgram,
}

/// Endpoint that sends and receives ICMP messages for one probe.
///
/// Operations block for at most the timeout set beforehand, which bounds
/// how long an abandoned send or receive can keep the endpoint alive.
pub trait PacketConn: Send + Sync {
    fn send_to(&self, packet: &[u8], target: IpAddr) -> io::Result<usize>;

    /// Receive one datagram into `buffer`, returning its length
    fn recv(&self, buffer: &mut [u8]) -> io::Result<usize>;

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()>;

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()>;

    /// Whether received datagrams start with an IPv4 header
    fn has_ip_header(&self) -> bool;

    /// Whether the endpoint also delivers ICMP traffic meant for others
    fn sees_foreign_traffic(&self) -> bool {
        false
    }

    /// Identifier the kernel stamps on outgoing requests, if it overrides ours
    fn kernel_identifier(&self) -> Option<u16> {
        None
    }
}

/// Opens a fresh [`PacketConn`] for each probe
pub trait Listen: Send + Sync {
    fn listen(&self, protocol: &dyn EchoProtocol) -> io::Result<Arc<dyn PacketConn>>;
}

/// Listener backed by the operating system's ICMP sockets
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemListener;

impl Listen for SystemListener {
    fn listen(&self, protocol: &dyn EchoProtocol) -> io::Result<Arc<dyn PacketConn>> {
        let conn: Arc<dyn PacketConn> = Arc::new(protocol.listen_packet()?);
        Ok(conn)
    }
}

/// ICMP socket bound to the wildcard address of one family
#[derive(Debug)]
pub struct SocketConn {
    socket: Socket,
    capability: SocketCapability,
    ipv6: bool,
}

impl SocketConn {
    /// Open a RAW ICMP socket, falling back to an unprivileged DGRAM one
    pub fn open(ipv6: bool) -> io::Result<Self> {
        let (socket, capability) = match create_raw_icmp_socket(ipv6) {
            Ok(socket) => (socket, SocketCapability::Raw),
            Err(raw_err) => match create_dgram_icmp_socket(ipv6) {
                Ok(socket) => {
                    warn!("Using unprivileged ICMP socket (raw socket unavailable: {raw_err})");
                    (socket, SocketCapability::Dgram)
                }
                Err(dgram_err) => {
                    return Err(io::Error::new(
                        dgram_err.kind(),
                        format!(
                            "raw socket: {raw_err}; unprivileged socket: {dgram_err}. \
                             Run with CAP_NET_RAW or widen net.ipv4.ping_group_range"
                        ),
                    ));
                }
            },
        };

        // Bind to the wildcard address; for DGRAM sockets this also makes
        // the kernel pick the identifier it will use
        let unspecified = if ipv6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        socket.bind(&SockAddr::from(SocketAddr::new(unspecified, 0)))?;

        debug!(?capability, ipv6, "Opened ICMP socket");
        Ok(Self {
            socket,
            capability,
            ipv6,
        })
    }

    pub fn capability(&self) -> SocketCapability {
        self.capability
    }
}

impl PacketConn for SocketConn {
    fn send_to(&self, packet: &[u8], target: IpAddr) -> io::Result<usize> {
        let addr = SockAddr::from(SocketAddr::new(target, 0));
        self.socket.send_to(packet, &addr).map_err(timeout_error)
    }

    fn recv(&self, buffer: &mut [u8]) -> io::Result<usize> {
        (&self.socket).read(buffer).map_err(timeout_error)
    }

    fn set_write_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket
            .set_write_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_SOCKET_TIMEOUT)))
    }

    fn has_ip_header(&self) -> bool {
        // Raw IPv6 sockets strip the header too
        !self.ipv6 && self.capability == SocketCapability::Raw
    }

    fn sees_foreign_traffic(&self) -> bool {
        self.capability == SocketCapability::Raw
    }

    fn kernel_identifier(&self) -> Option<u16> {
        if self.capability != SocketCapability::Dgram {
            return None;
        }
        // Linux reports the ICMP identifier as the bound "port"
        let port = self.socket.local_addr().ok()?.as_socket()?.port();
        (port != 0).then_some(port)
    }
}

/// Socket timeouts surface as WouldBlock; report them as timeouts
fn timeout_error(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::WouldBlock {
        io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
    } else {
        err
    }
}

/// Create a raw ICMP socket
pub fn create_raw_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };

    let socket = Socket::new(domain, Type::RAW, Some(protocol))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

/// Create an unprivileged ICMP socket (SOCK_DGRAM)
pub fn create_dgram_icmp_socket(ipv6: bool) -> io::Result<Socket> {
    let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
    let protocol = if ipv6 {
        Protocol::ICMPV6
    } else {
        Protocol::ICMPV4
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))?;
    socket.set_nonblocking(false)?;
    Ok(socket)
}

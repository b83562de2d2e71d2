//! Utility functions related to networking.

use std::io;
use std::net::{
    IpAddr, SocketAddr, TcpListener as StdListener, ToSocketAddrs
};
use crate::error::Failed;


//------------ split_host_port -----------------------------------------------

/// Splits an endpoint string of the form `host[:port]` into its parts.
///
/// The host may be an IPv6 address in brackets. A bare IPv6 address, i.e.,
/// one containing more than one colon without brackets, is taken to be a
/// host without a port. If no port is present, `default_port` is used.
///
/// An unparseable port number is an error. The host part is returned
/// verbatim; resolving it is left to the caller.
pub fn split_host_port(
    endpoint: &str, default_port: u16
) -> Result<(String, u16), Failed> {
    if let Some(rest) = endpoint.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or(Failed)?;
        let port = match rest.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| Failed)?,
            None if rest.is_empty() => default_port,
            None => return Err(Failed)
        };
        return Ok((host.into(), port))
    }
    match endpoint.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            Ok((host.into(), port.parse().map_err(|_| Failed)?))
        }
        // More than one colon and no brackets: a bare IPv6 address.
        Some(_) => Ok((endpoint.into(), default_port)),
        None => Ok((endpoint.into(), default_port))
    }
}


//------------ resolve -------------------------------------------------------

/// Turns a host string and port into a socket address.
///
/// An IP address literal is used directly, anything else goes through the
/// system resolver and the first result wins.
pub fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    if let Ok(addr) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(addr, port))
    }
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound, format!("cannot resolve '{host}'")
        )
    })
}


//------------ bind ----------------------------------------------------------

/// Binds a listener socket and switches it to non-blocking mode.
///
/// The socket needs to be non-blocking so it can later be handed to the
/// reactor’s async runtime.
pub fn bind(addr: &SocketAddr) -> io::Result<StdListener> {
    let listener = StdListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}


//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_port_splitting() {
        assert_eq!(
            split_host_port("127.0.0.1:8545", 10).unwrap(),
            ("127.0.0.1".into(), 8545)
        );
        assert_eq!(
            split_host_port("127.0.0.1", 10).unwrap(),
            ("127.0.0.1".into(), 10)
        );
        assert_eq!(
            split_host_port("[::1]:8545", 10).unwrap(),
            ("::1".into(), 8545)
        );
        assert_eq!(
            split_host_port("[2001:db8::17]", 10).unwrap(),
            ("2001:db8::17".into(), 10)
        );
        assert_eq!(
            split_host_port("2001:db8::17", 10).unwrap(),
            ("2001:db8::17".into(), 10)
        );
        assert_eq!(
            split_host_port("example.com:80", 10).unwrap(),
            ("example.com".into(), 80)
        );
        assert!(split_host_port("127.0.0.1:http", 10).is_err());
        assert!(split_host_port("[::1]x", 10).is_err());
    }

    #[test]
    fn resolve_literal() {
        assert_eq!(
            resolve("127.0.0.1", 80).unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 80))
        );
    }
}

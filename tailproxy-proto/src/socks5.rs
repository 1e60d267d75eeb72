//! RFC 1928 framing shared by the client half (in the interposer) and the
//! server half (in the supervisor). This module only encodes/decodes byte
//! buffers — it performs no I/O, so both halves can drive it with whatever
//! read/write primitives fit their context (blocking libc calls on the
//! client side, `tokio::io` on the server side).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const VERSION: u8 = 0x05;
pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NONE_ACCEPTABLE: u8 = 0xff;

pub const CMD_CONNECT: u8 = 0x01;

pub const ATYP_V4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_V6: u8 = 0x04;

/// Reply codes (REP field), RFC 1928 §6.
pub const REP_SUCCEEDED: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
pub const REP_HOST_UNREACHABLE: u8 = 0x05;

/// The client's initial greeting: version + method list. We only ever speak
/// NO-AUTH, so the method list is always the single byte `[0x00]`.
pub fn encode_greeting() -> [u8; 3] {
    [VERSION, 0x01, METHOD_NO_AUTH]
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected SOCKS version byte {0:#x}")]
    BadVersion(u8),
    #[error("server rejected all offered auth methods")]
    NoAcceptableMethod,
    #[error("unsupported SOCKS command {0:#x}")]
    UnsupportedCommand(u8),
    #[error("unsupported address type {0:#x}")]
    UnsupportedAddressType(u8),
    #[error("server replied with error code {0:#x}")]
    ServerError(u8),
}

/// Parses the server's greeting reply (`VER METHOD`). Only NO-AUTH is
/// accepted; any other reply fails.
pub fn parse_greeting_reply(reply: [u8; 2]) -> Result<(), FrameError> {
    if reply[0] != VERSION {
        return Err(FrameError::BadVersion(reply[0]));
    }
    if reply[1] != METHOD_NO_AUTH {
        return Err(FrameError::NoAcceptableMethod);
    }
    Ok(())
}

/// A parsed destination address, tagged by the SOCKS5 ATYP it arrived under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addr {
    V4(Ipv4Addr),
    Domain(String),
    V6(Ipv6Addr),
}

impl Addr {
    /// Renders the address the way it should appear joined with a port as
    /// `host:port` for a dial call (dotted quad, bracket-free v6 text form,
    /// or the raw domain string).
    pub fn host_string(&self) -> String {
        match self {
            Addr::V4(ip) => ip.to_string(),
            Addr::Domain(name) => name.clone(),
            Addr::V6(ip) => ip.to_string(),
        }
    }

    pub fn atyp(&self) -> u8 {
        match self {
            Addr::V4(_) => ATYP_V4,
            Addr::Domain(_) => ATYP_DOMAIN,
            Addr::V6(_) => ATYP_V6,
        }
    }
}

impl From<IpAddr> for Addr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Addr::V4(v4),
            IpAddr::V6(v6) => Addr::V6(v6),
        }
    }
}

/// Encodes a CONNECT request: `VER CMD RSV ATYP ADDR PORT`. The interposer
/// only ever emits `ATYP_V4`/`ATYP_V6` (per spec.md §4.D: callers have
/// already resolved names), but the encoder accepts `Addr::Domain` too since
/// the framing itself is symmetric and the server half must decode it.
pub fn encode_connect_request(addr: &Addr, port: u16) -> Vec<u8> {
    let mut buf = vec![VERSION, CMD_CONNECT, 0x00, addr.atyp()];
    match addr {
        Addr::V4(ip) => buf.extend_from_slice(&ip.octets()),
        Addr::V6(ip) => buf.extend_from_slice(&ip.octets()),
        Addr::Domain(name) => {
            buf.push(name.len() as u8);
            buf.extend_from_slice(name.as_bytes());
        }
    }
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

/// Encodes a CONNECT reply: `VER REP RSV ATYP BND.ADDR BND.PORT`. The client
/// ignores the bound-address fields, so a success reply always zeros them
/// (spec.md §4.F step 5).
pub fn encode_connect_reply_success() -> [u8; 10] {
    [VERSION, REP_SUCCEEDED, 0x00, ATYP_V4, 0, 0, 0, 0, 0, 0]
}

pub fn encode_connect_reply_error(rep: u8) -> [u8; 10] {
    [VERSION, rep, 0x00, ATYP_V4, 0, 0, 0, 0, 0, 0]
}

/// Parses a CONNECT reply's leading `VER REP` bytes (the server's BND fields
/// carry no information the client needs, per §4.D).
pub fn parse_connect_reply_header(header: [u8; 2]) -> Result<(), FrameError> {
    if header[0] != VERSION {
        return Err(FrameError::BadVersion(header[0]));
    }
    if header[1] != REP_SUCCEEDED {
        return Err(FrameError::ServerError(header[1]));
    }
    Ok(())
}

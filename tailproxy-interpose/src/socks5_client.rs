//! SOCKS5 client half (spec.md §4.D): greeting + CONNECT request against the
//! proxy socket, driven with blocking libc reads/writes. The caller
//! (`shims::connect`) is responsible for having switched the socket to
//! blocking mode first — the handshake itself assumes synchronous I/O.

use std::io;
use std::os::raw::c_void;
use tailproxy_proto::socks5::{
    self, encode_connect_request, encode_greeting, parse_connect_reply_header,
    parse_greeting_reply, Addr, FrameError,
};

fn read_exact(fd: i32, buf: &mut [u8]) -> io::Result<()> {
    let mut off = 0;
    while off < buf.len() {
        let n = unsafe {
            libc::read(
                fd,
                buf[off..].as_mut_ptr() as *mut c_void,
                buf.len() - off,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "proxy closed connection during SOCKS5 handshake",
            ));
        }
        off += n as usize;
    }
    Ok(())
}

fn write_all(fd: i32, buf: &[u8]) -> io::Result<()> {
    let mut off = 0;
    while off < buf.len() {
        let n = unsafe { libc::write(fd, buf[off..].as_ptr() as *const c_void, buf.len() - off) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        off += n as usize;
    }
    Ok(())
}

fn frame_err(e: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionRefused, e.to_string())
}

/// Runs the full client-side CONNECT handshake against an already-connected
/// proxy fd, for `dest:port`. On success the fd is ready to carry the
/// application's bytes.
pub fn handshake(fd: i32, dest: Addr, port: u16) -> io::Result<()> {
    write_all(fd, &encode_greeting())?;

    let mut greeting_reply = [0u8; 2];
    read_exact(fd, &mut greeting_reply)?;
    parse_greeting_reply(greeting_reply).map_err(frame_err)?;

    let request = encode_connect_request(&dest, port);
    write_all(fd, &request)?;

    let mut reply_header = [0u8; 2];
    read_exact(fd, &mut reply_header)?;
    parse_connect_reply_header(reply_header).map_err(frame_err)?;

    // Drain the rest of the fixed-size reply (RSV, ATYP, BND.ADDR, BND.PORT)
    // — the client ignores their contents per spec.md §4.D, but must still
    // consume them so the stream is positioned at the first application byte.
    // Success replies always carry ATYP_V4 BND fields (§4.F step 5): RSV(1) +
    // ATYP(1) + 4-byte address + 2-byte port = 8 bytes beyond the VER/REP
    // header already read above.
    let mut rest = [0u8; 8];
    read_exact(fd, &mut rest)?;

    Ok(())
}

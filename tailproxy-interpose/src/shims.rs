//! The four shimmed primitives (spec.md §4.C). Each function here is safe
//! Rust operating on raw fds and pointers handed in by the `extern "C"`
//! wrappers in `lib.rs`, which are the ones that actually cross the FFI
//! boundary and catch panics.

use crate::fd_table::FdTable;
use crate::proxy_config::{config, vlog};
use crate::{control_client::ControlClient, original, socks5_client};
use socket2::SockAddr;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::raw::c_int;
use tailproxy_proto::socks5::Addr as Socks5Addr;
use tailproxy_proto::{ControlMessage, Family};

/// Mirrors the errno convention shim callers must return: 0/positive on
/// success passthrough, `-1` with `errno` set on failure.
pub const FAIL: c_int = -1;

fn set_errno(err: io::Error) {
    if let Some(code) = err.raw_os_error() {
        unsafe {
            *libc::__errno_location() = code;
        }
    } else {
        unsafe {
            *libc::__errno_location() = libc::EIO;
        }
    }
}

/// spec.md §4.C step 3 spells out only the v4 case, but the GLOSSARY
/// defines loopback as both `127.0.0.0/8` and `::1` — bypassing both
/// families here follows that broader definition.
fn is_loopback(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(v4) => v4.octets()[0] == 127,
        IpAddr::V6(v6) => v6 == Ipv6Addr::LOCALHOST,
    }
}

fn family_of(addr: &SocketAddr) -> Family {
    match addr {
        SocketAddr::V4(_) => Family::Tcp4,
        SocketAddr::V6(_) => Family::Tcp6,
    }
}

fn socket_type(fd: i32) -> Option<i32> {
    let mut ty: c_int = 0;
    let mut len = std::mem::size_of::<c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut ty as *mut _ as *mut _,
            &mut len,
        )
    };
    if ret == 0 {
        Some(ty)
    } else {
        None
    }
}

fn is_blocking(fd: i32) -> Option<bool> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        None
    } else {
        Some(flags & libc::O_NONBLOCK == 0)
    }
}

fn set_blocking(fd: i32, blocking: bool) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return;
        }
        let new_flags = if blocking {
            flags & !libc::O_NONBLOCK
        } else {
            flags | libc::O_NONBLOCK
        };
        libc::fcntl(fd, libc::F_SETFL, new_flags);
    }
}

fn sockaddr_to_socket_addr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<SocketAddr> {
    if len as usize > std::mem::size_of::<libc::sockaddr_storage>() {
        return None;
    }
    let sockaddr = unsafe {
        SockAddr::try_init(|storage, storage_len| {
            std::ptr::copy_nonoverlapping(addr as *const u8, storage as *mut u8, len as usize);
            *storage_len = len;
            Ok(())
        })
    };
    let sockaddr = sockaddr.ok()?.0;
    sockaddr.as_socket()
}

/// Waits up to `timeout_ms` for `fd` to become writable, then returns the
/// accumulated `SO_ERROR` (0 means the connect succeeded).
fn poll_connect_result(fd: i32, timeout_ms: i32) -> io::Result<i32> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if ret == 0 {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out connecting to proxy",
        ));
    }

    let mut err: c_int = 0;
    let mut len = std::mem::size_of::<c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut _,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(err)
}

const PROXY_CONNECT_TIMEOUT_MS: i32 = 30_000;

/// spec.md §4.C `connect`.
pub fn connect(fd: c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> c_int {
    let cfg = config();
    connect_impl(fd, addr, len, &cfg.host, cfg.port)
}

/// Core `connect` logic, parameterized over the proxy target so unit tests
/// can point it at an in-process fake SOCKS5 server instead of the
/// process-wide, env-sourced `ProxyConfig`.
fn connect_impl(
    fd: c_int,
    addr: *const libc::sockaddr,
    len: libc::socklen_t,
    proxy_host: &str,
    proxy_port: u16,
) -> c_int {
    let Some(originals) = original::originals() else {
        set_errno(io::Error::from_raw_os_error(libc::ENOSYS));
        return FAIL;
    };

    let Some(ty) = socket_type(fd) else {
        return unsafe { (originals.connect)(fd, addr, len) };
    };
    if ty != libc::SOCK_STREAM {
        return unsafe { (originals.connect)(fd, addr, len) };
    }

    let Some(dest) = sockaddr_to_socket_addr(addr, len) else {
        return unsafe { (originals.connect)(fd, addr, len) };
    };

    if is_loopback(&dest) {
        vlog!("connect to {dest} is loopback, bypassing proxy");
        return unsafe { (originals.connect)(fd, addr, len) };
    }

    let proxy_addr = match format!("{proxy_host}:{proxy_port}").parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => {
            set_errno(io::Error::from_raw_os_error(libc::EINVAL));
            return FAIL;
        }
    };
    let proxy_sockaddr = SockAddr::from(proxy_addr);

    let was_blocking = is_blocking(fd);

    let connect_ret = unsafe {
        (originals.connect)(
            fd,
            proxy_sockaddr.as_ptr() as *const libc::sockaddr,
            proxy_sockaddr.len(),
        )
    };
    if connect_ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            vlog!("connect to proxy {proxy_addr} failed: {err}");
            set_errno(err);
            return FAIL;
        }
        match poll_connect_result(fd, PROXY_CONNECT_TIMEOUT_MS) {
            Ok(0) => {}
            Ok(errno) => {
                let err = io::Error::from_raw_os_error(errno);
                vlog!("connect to proxy {proxy_addr} failed: {err}");
                set_errno(err);
                if let Some(was_blocking) = was_blocking {
                    set_blocking(fd, was_blocking);
                }
                return FAIL;
            }
            Err(err) => {
                vlog!("connect to proxy {proxy_addr} failed: {err}");
                set_errno(err);
                if let Some(was_blocking) = was_blocking {
                    set_blocking(fd, was_blocking);
                }
                return FAIL;
            }
        }
    }

    // The SOCKS5 handshake relies on synchronous reads/writes; force
    // blocking mode for its duration regardless of the application's
    // original setting, then restore afterward.
    set_blocking(fd, true);

    let socks_dest: Socks5Addr = dest.ip().into();
    let result = socks5_client::handshake(fd, socks_dest, dest.port());

    if let Some(was_blocking) = was_blocking {
        set_blocking(fd, was_blocking);
    }

    match result {
        Ok(()) => {
            vlog!("proxied connect to {dest} succeeded");
            0
        }
        Err(err) => {
            vlog!("SOCKS5 handshake to {dest} failed: {err}");
            set_errno(io::Error::from_raw_os_error(
                err.raw_os_error().unwrap_or(libc::ECONNREFUSED),
            ));
            FAIL
        }
    }
}

fn loopback_for(family: Family) -> IpAddr {
    match family {
        Family::Tcp4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
        Family::Tcp6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
    }
}

/// spec.md §4.C `bind`.
pub fn bind(fd: c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> c_int {
    bind_impl(fd, addr, len, config().export_enabled)
}

/// Core `bind` logic, parameterized over `export_enabled` so unit tests can
/// exercise both modes without touching the env-sourced `ProxyConfig`
/// singleton.
fn bind_impl(fd: c_int, addr: *const libc::sockaddr, len: libc::socklen_t, export_enabled: bool) -> c_int {
    let Some(originals) = original::originals() else {
        set_errno(io::Error::from_raw_os_error(libc::ENOSYS));
        return FAIL;
    };

    if !export_enabled {
        return unsafe { (originals.bind)(fd, addr, len) };
    }

    let Some(ty) = socket_type(fd) else {
        return unsafe { (originals.bind)(fd, addr, len) };
    };
    if ty != libc::SOCK_STREAM {
        return unsafe { (originals.bind)(fd, addr, len) };
    }

    let Some(requested) = sockaddr_to_socket_addr(addr, len) else {
        return unsafe { (originals.bind)(fd, addr, len) };
    };

    let family = family_of(&requested);
    FdTable::global().mark_bound(fd, family);

    // Rewrite any non-loopback address to loopback of the same family,
    // preserving the requested port — this is mandatory, not best-effort:
    // a service must never become reachable on LAN/WAN even for a
    // wildcard bind (spec.md §4.C).
    let rewritten = SocketAddr::new(loopback_for(family), requested.port());
    if rewritten != requested {
        vlog!("rewriting bind {requested} -> {rewritten}");
    }
    let rewritten_sockaddr = SockAddr::from(rewritten);

    unsafe {
        (originals.bind)(
            fd,
            rewritten_sockaddr.as_ptr() as *const libc::sockaddr,
            rewritten_sockaddr.len(),
        )
    }
}

/// spec.md §4.C `listen`.
pub fn listen(fd: c_int, backlog: c_int) -> c_int {
    listen_impl(fd, backlog, config().export_enabled)
}

/// Core `listen` logic, parameterized over `export_enabled` so unit tests
/// can exercise both modes without touching the env-sourced `ProxyConfig`
/// singleton.
fn listen_impl(fd: c_int, backlog: c_int, export_enabled: bool) -> c_int {
    let Some(originals) = original::originals() else {
        set_errno(io::Error::from_raw_os_error(libc::ENOSYS));
        return FAIL;
    };

    let ret = unsafe { (originals.listen)(fd, backlog) };
    if ret != 0 {
        return ret;
    }

    if !export_enabled {
        return ret;
    }

    let Some(entry) = FdTable::global().lookup(fd) else {
        return ret;
    };
    if !entry.is_tcp {
        return ret;
    }

    let Some(family) = entry.family else {
        return ret;
    };
    let Some(actual_port) = bound_port(fd, family) else {
        return ret;
    };

    FdTable::global().mark_listener(fd, family, actual_port);
    ControlClient::global().send(ControlMessage::Listen {
        family,
        port: actual_port,
    });

    ret
}

/// Queries the kernel for the port actually bound to `fd` — authoritative
/// even for an ephemeral (port 0) bind, per spec.md §3/§8.
fn bound_port(fd: c_int, family: Family) -> Option<u16> {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(
            fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };
    if ret != 0 {
        return None;
    }
    let sockaddr = unsafe { SockAddr::try_init(|s, l| {
        std::ptr::copy_nonoverlapping(
            &storage as *const _ as *const u8,
            s as *mut u8,
            len as usize,
        );
        *l = len;
        Ok(())
    }) }
    .ok()?
    .0;
    let resolved = sockaddr.as_socket()?;
    if family_of(&resolved) != family {
        return None;
    }
    Some(resolved.port())
}

/// spec.md §4.C `close`.
pub fn close(fd: c_int) -> c_int {
    let Some(originals) = original::originals() else {
        set_errno(io::Error::from_raw_os_error(libc::ENOSYS));
        return FAIL;
    };

    if let Some(entry) = FdTable::global().clear(fd) {
        if entry.is_listener && entry.port > 0 {
            if let Some(family) = entry.family {
                ControlClient::global().send(ControlMessage::Close {
                    family,
                    port: entry.port,
                });
            }
        }
    }

    unsafe { (originals.close)(fd) }
}

//! The preloaded interposition library (spec.md §4.A-D, §1 component "Syscall-
//! interposition library"). Loaded into a child process ahead of libc via
//! the dynamic linker's preload mechanism, it redirects outbound TCP
//! connects through a local SOCKS5 proxy, rewrites inbound binds to
//! loopback, and reports listener lifecycle on a Unix control socket.
//!
//! Every exported symbol below crosses an FFI boundary into arbitrary host
//! code, so each one is wrapped in `catch_unwind`: unwinding across that
//! boundary is undefined behavior, and a caught panic is translated into
//! the same errno-style failure the shim would report for any other
//! internal error.

mod control_client;
mod fd_table;
mod original;
mod proxy_config;
mod shims;
mod socks5_client;

use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

/// Library-constructor init. Resolving the original primitives is the only
/// side effect here, and `original::originals()` is itself idempotent and
/// safe to call again from any shim — this constructor exists so the first
/// real shim call (which may happen during the host's own static
/// initializers) doesn't pay the resolution cost inline, not because
/// anything here is unsafe to repeat.
#[ctor::ctor]
fn init() {
    let _ = original::originals();
}

fn guarded<F: FnOnce() -> c_int>(f: F) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(ret) => ret,
        Err(_) => {
            unsafe {
                *libc::__errno_location() = libc::EIO;
            }
            shims::FAIL
        }
    }
}

// These symbols are only defined outside of `cargo test`: the test harness
// links this crate as an rlib into its own executable, and a `#[no_mangle]
// extern "C" fn connect` there would collide with (or accidentally shadow)
// libc's own symbol in the test binary itself. The cdylib build used for
// actual preloading is unaffected by `cfg(test)`.
#[cfg(not(test))]
mod exports {
    use super::*;

    /// # Safety
    /// `addr`/`len` must describe a valid `sockaddr` as the C `connect(2)`
    /// contract requires; this is guaranteed by whatever application code
    /// calls through the dynamic linker's symbol resolution into this shim.
    #[no_mangle]
    pub unsafe extern "C" fn connect(
        fd: c_int,
        addr: *const libc::sockaddr,
        len: libc::socklen_t,
    ) -> c_int {
        guarded(|| shims::connect(fd, addr, len))
    }

    /// # Safety
    /// See `connect`; same contract, for `bind(2)`.
    #[no_mangle]
    pub unsafe extern "C" fn bind(
        fd: c_int,
        addr: *const libc::sockaddr,
        len: libc::socklen_t,
    ) -> c_int {
        guarded(|| shims::bind(fd, addr, len))
    }

    /// # Safety
    /// `fd` must be a valid, open file descriptor, as `listen(2)` requires.
    #[no_mangle]
    pub unsafe extern "C" fn listen(fd: c_int, backlog: c_int) -> c_int {
        guarded(|| shims::listen(fd, backlog))
    }

    /// # Safety
    /// `fd` must be a value previously returned by `open`/`socket`/etc., as
    /// `close(2)` requires.
    #[no_mangle]
    pub unsafe extern "C" fn close(fd: c_int) -> c_int {
        guarded(|| shims::close(fd))
    }
}

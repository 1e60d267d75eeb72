//! Resolves the real libc primitives via `dlsym(RTLD_NEXT, ...)`.
//!
//! Because this library is preloaded ahead of libc, a plain `extern "C"`
//! declaration of `connect`/`bind`/`listen`/`close` would bind back to our
//! own exported symbols of the same name — `RTLD_NEXT` is what lets us skip
//! past ourselves to the next definition in the search order (the real
//! libc). Resolution happens once, guarded by a one-shot flag, and is
//! re-entered defensively from every shim call per spec.md's reentrancy
//! requirement: the original-primitive lookups must be the very first
//! action, behind a flag protecting against re-entry.

use once_cell::sync::OnceCell;
use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};

pub type ConnectFn =
    unsafe extern "C" fn(c_int, *const libc::sockaddr, libc::socklen_t) -> c_int;
pub type BindFn = unsafe extern "C" fn(c_int, *const libc::sockaddr, libc::socklen_t) -> c_int;
pub type ListenFn = unsafe extern "C" fn(c_int, c_int) -> c_int;
pub type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

pub struct Originals {
    pub connect: ConnectFn,
    pub bind: BindFn,
    pub listen: ListenFn,
    pub close: CloseFn,
}

static ORIGINALS: OnceCell<Option<Originals>> = OnceCell::new();

/// Returns the resolved original primitives, or `None` if any symbol could
/// not be found (in which case every shim must delegate to failure per
/// spec.md §4.C step 1: "If the original is unresolved -> fail with
/// 'unsupported operation'").
pub fn originals() -> Option<&'static Originals> {
    ORIGINALS.get_or_init(resolve).as_ref()
}

fn resolve() -> Option<Originals> {
    // Safety: dlsym with RTLD_NEXT is the documented mechanism for preload
    // shims to find the libc definition they are shadowing.
    unsafe {
        let connect = dlsym_next("connect")? as usize;
        let bind = dlsym_next("bind")? as usize;
        let listen = dlsym_next("listen")? as usize;
        let close = dlsym_next("close")? as usize;
        Some(Originals {
            connect: std::mem::transmute::<usize, ConnectFn>(connect),
            bind: std::mem::transmute::<usize, BindFn>(bind),
            listen: std::mem::transmute::<usize, ListenFn>(listen),
            close: std::mem::transmute::<usize, CloseFn>(close),
        })
    }
}

unsafe fn dlsym_next(name: &str) -> Option<*mut c_void> {
    let cname = CString::new(name).ok()?;
    let ptr = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr() as *const c_char);
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

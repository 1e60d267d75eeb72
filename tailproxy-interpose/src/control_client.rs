//! Best-effort, non-blocking Unix-socket client for reporting listener
//! lifecycle to the supervisor (spec.md §4.B).
//!
//! Losing a notification only loses an export opportunity — it must never
//! corrupt the application or stall it, so every failure path here marks
//! the channel `Broken` and goes silent for the rest of the process
//! lifetime instead of retrying or erroring out to the caller.

use crate::proxy_config::vlog;
use std::ffi::CString;
use std::os::raw::c_void;
use std::sync::Mutex;
use tailproxy_proto::ControlMessage;

enum State {
    Unopened,
    Connected(i32),
    Broken,
}

pub struct ControlClient {
    state: Mutex<State>,
    sock_path: Option<String>,
}

impl ControlClient {
    const fn new(sock_path: Option<String>) -> Self {
        Self {
            state: Mutex::new(State::Unopened),
            sock_path,
        }
    }

    pub fn global() -> &'static ControlClient {
        static CLIENT: std::sync::OnceLock<ControlClient> = std::sync::OnceLock::new();
        CLIENT.get_or_init(|| {
            ControlClient::new(crate::proxy_config::config().control_sock.clone())
        })
    }

    /// Sends a message, silently dropping it if the channel is unopened and
    /// fails to open, already broken, or the send buffer is full.
    pub fn send(&self, message: ControlMessage) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let fd = match &*guard {
            State::Connected(fd) => *fd,
            State::Broken => return,
            State::Unopened => match self.open() {
                Some(fd) => {
                    *guard = State::Connected(fd);
                    fd
                }
                None => {
                    *guard = State::Broken;
                    vlog!("control socket unavailable, exports will degrade silently");
                    return;
                }
            },
        };

        let line = message.encode();
        if !Self::write_nonblocking(fd, line.as_bytes()) {
            vlog!("control channel send buffer full or broken, dropping message");
            unsafe {
                libc::close(fd);
            }
            *guard = State::Broken;
        }
    }

    fn open(&self) -> Option<i32> {
        let path = self.sock_path.as_ref()?;
        unsafe {
            let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
            if fd < 0 {
                return None;
            }

            let mut addr: libc::sockaddr_un = std::mem::zeroed();
            addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
            let cpath = CString::new(path.as_str()).ok()?;
            let bytes = cpath.as_bytes_with_nul();
            if bytes.len() > addr.sun_path.len() {
                libc::close(fd);
                return None;
            }
            for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
                *dst = *src as libc::c_char;
            }

            let ret = libc::connect(
                fd,
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            );
            if ret != 0 {
                libc::close(fd);
                return None;
            }

            // Non-blocking from here on: a full buffer must drop the
            // message rather than stall the caller (spec.md §5).
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags >= 0 {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }

            Some(fd)
        }
    }

    fn write_nonblocking(fd: i32, buf: &[u8]) -> bool {
        let ret = unsafe { libc::write(fd, buf.as_ptr() as *const c_void, buf.len()) };
        if ret < 0 {
            return false;
        }
        // A short write on a line this small means the buffer was nearly
        // full; treat it the same as EAGAIN and drop rather than loop, to
        // keep this call non-blocking under all circumstances.
        ret as usize == buf.len()
    }
}

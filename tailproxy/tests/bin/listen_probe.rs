//! Test fixture, not part of the supervisor: binds a TCP listener on an
//! ephemeral wildcard port and echoes back whatever it reads on each
//! accepted connection, forever.
//!
//! Run under `LD_PRELOAD=libtailproxy_interpose.so` by the integration
//! suite, this is what actually exercises `shims::bind`/`shims::listen`'s
//! real code path: the wildcard bind gets rewritten to loopback, and the
//! kernel-assigned port gets reported to the supervisor over the control
//! socket. The assigned port is printed to stdout so the test harness (which
//! inherits this process's stdout through the supervisor) can read it back.

use std::io::{Read, Write};
use std::net::TcpListener;

fn main() {
    let listener = TcpListener::bind("0.0.0.0:0").expect("bind listen_probe socket");
    let port = listener.local_addr().expect("local_addr").port();
    println!("LISTENING {port}");
    std::io::stdout().flush().expect("flush stdout");

    for stream in listener.incoming() {
        let Ok(mut stream) = stream else { continue };
        let mut buf = [0u8; 4];
        if stream.read_exact(&mut buf).is_ok() {
            let _ = stream.write_all(&buf);
        }
    }
}

//! Wire formats shared between the supervisor and the preloaded interposer.
//!
//! Both processes need to agree on two framings: the line-based control
//! protocol the child uses to report listener lifecycle (`control`), and the
//! SOCKS5 address-type/request/reply framing used on both the client half
//! (in the child) and the server half (in the supervisor) (`socks5`). Keeping
//! both here means the two halves can't drift apart.

pub mod control;
pub mod socks5;

pub use control::{ControlMessage, Family};

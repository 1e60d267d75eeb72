//! Black-box integration testing for the tailproxy supervisor binary.

pub mod infrastructure;
pub mod scenarios;

pub use infrastructure::{free_port, ControlSocketClient, MockMeshNode, TailproxyProcess};

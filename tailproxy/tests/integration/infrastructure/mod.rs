//! Shared test infrastructure for black-box tailproxy integration tests.

pub mod control_socket_client;
pub mod mock_mesh_node;
pub mod process_harness;

pub use control_socket_client::ControlSocketClient;
pub use mock_mesh_node::{free_port, MockMeshNode};
pub use process_harness::TailproxyProcess;

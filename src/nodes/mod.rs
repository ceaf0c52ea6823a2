//! Streaming node implementations
//!
//! Currently one node type: the transmit streamer, which terminates the
//! block graph and drives the device-control interface from its per-channel
//! properties.

mod tx_stream;

pub use tx_stream::{StreamArgs, TxStreamNode};

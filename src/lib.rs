//! Property dependency resolution for multi-channel TX streaming nodes
//!
//! This library implements the configuration control path of a
//! hardware-attached, multi-channel transmit streamer. Each channel exposes a
//! small set of typed, directional properties (scaling, sample rate, tick
//! rate, wire encoding, MTU). Setting one property deterministically
//! propagates consequences to the others, to the attached device driver, and
//! across sibling channels.
//!
//! # Architecture
//!
//! - **PropertyStore**: typed per-channel property slots with validity and
//!   dirty tracking
//! - **ResolutionEngine**: runs property resolvers to a fixed point on every
//!   external set
//! - **TxStreamNode**: the streaming endpoint itself — wires per-channel
//!   resolvers to a device-control interface, negotiates a uniform MTU
//!   across channels, and acts as a terminal sink in the surrounding block
//!   graph (zero input ports, DROP forwarding)
//!
//! # Example
//!
//! ```no_run
//! use txflow::{PropKey, StreamArgs, TxStreamNode};
//! # struct Dev;
//! # impl txflow::DeviceControl for Dev {
//! #     fn set_scale_factor(&mut self, _: usize, _: f64) {}
//! #     fn set_samp_rate(&mut self, _: f64) {}
//! #     fn set_tick_rate(&mut self, _: f64) {}
//! # }
//!
//! let args = StreamArgs { otw_format: "sc16".into(), num_chans: 2 };
//! let mut node = TxStreamNode::new(args, Dev)?;
//! node.set_property(PropKey::SampRate, 0, 1e6)?;
//! # Ok::<(), txflow::StreamError>(())
//! ```

pub mod nodes;
pub mod runtime;

// Re-export the streaming node and its construction arguments
pub use nodes::{StreamArgs, TxStreamNode};

// Re-export the resolution engine and property model
pub use runtime::{
    DeviceControl, EdgeInfo, ForwardingPolicy, GraphNode, PortDirection, PropError, PropId,
    PropKey, PropValue, PropertyStore, ResolutionEngine, ResolveError, StreamError, Transport,
};

/// Crate-wide result type for streaming-node operations
pub type Result<T> = std::result::Result<T, StreamError>;

//! Runtime support for property resolution on streaming nodes

pub mod device;
pub mod engine;
pub mod errors;
pub mod node;
pub mod property;

pub use device::{DeviceControl, Transport};
pub use engine::ResolutionEngine;
pub use errors::{PropError, ResolveError, StreamError};
pub use node::{ports_in_range, ForwardingPolicy, GraphNode};
pub use property::{EdgeInfo, PortDirection, PropId, PropKey, PropValue, PropertyStore};

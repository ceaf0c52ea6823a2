//! External collaborator interfaces
//!
//! Resolvers call synchronously into these; any latency on the other side
//! (hardware register access, link negotiation) is visible to whoever set
//! the property. Implementations must not call back into the engine.

/// Device-control surface the per-channel resolvers drive
pub trait DeviceControl {
    /// Apply a fixed-point scale factor for one channel
    fn set_scale_factor(&mut self, chan: usize, factor: f64);

    /// Apply the sample rate (node-wide, single clock domain)
    fn set_samp_rate(&mut self, rate: f64);

    /// Apply the tick rate
    fn set_tick_rate(&mut self, rate: f64);
}

/// A data transport supplied once per channel at attachment time
pub trait Transport {
    /// Maximum payload size negotiated for this link, in bytes
    fn max_payload_size(&self) -> usize;
}

//! Multi-channel TX streaming node
//!
//! `TxStreamNode` terminates the block graph: it has zero input ports, drops
//! all property/action traffic, and exposes one output edge per channel.
//! Each channel carries five properties (scaling, sample rate, tick rate,
//! wire encoding, MTU). Channel-local resolvers forward scaling and rates to
//! the device-control interface; a cross-channel resolver keeps every
//! channel's MTU pinned to the node-wide minimum, because all channels share
//! one timing/framing domain.

use crate::runtime::device::{DeviceControl, Transport};
use crate::runtime::engine::ResolutionEngine;
use crate::runtime::errors::{PropError, StreamError};
use crate::runtime::node::{ports_in_range, ForwardingPolicy, GraphNode};
use crate::runtime::property::{EdgeInfo, PortDirection, PropId, PropKey, PropValue};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, trace};

const STREAMER_ID: &str = "TxStreamer";

/// Full scale of a 16-bit signed sample; scaling resolves to 32767 / s
const FULL_SCALE_I16: f64 = 32767.0;

// Process-wide instance counter. Relaxed is enough: ids only need to be
// distinct, not ordered.
static STREAMER_INST_CTR: AtomicU64 = AtomicU64::new(0);

/// Stream construction arguments
#[derive(Debug, Clone)]
pub struct StreamArgs {
    /// Over-the-wire sample encoding per channel (e.g. "sc16")
    pub otw_format: String,
    /// Number of channels this streamer drives
    pub num_chans: usize,
}

impl Default for StreamArgs {
    fn default() -> Self {
        Self {
            otw_format: "sc16".to_string(),
            num_chans: 1,
        }
    }
}

/// Transmit streaming endpoint with per-channel property resolution.
///
/// Single-threaded: the node holds `Rc` handles shared with its resolver
/// closures and is deliberately `!Send`. The surrounding graph is
/// responsible for serializing all property mutations on a node.
pub struct TxStreamNode<D: DeviceControl> {
    unique_id: String,
    args: StreamArgs,
    engine: ResolutionEngine,
    device: Rc<RefCell<D>>,
    /// Aggregate MTU: minimum negotiated across all channels. Starts
    /// unbounded (`usize::MAX`) and is only ever lowered, from inside the
    /// resolution loop.
    mtu: Rc<Cell<usize>>,
    /// Bound transports, one slot per channel
    xports: Vec<Option<Box<dyn Transport>>>,
}

impl<D: DeviceControl + 'static> TxStreamNode<D> {
    /// Create a streaming node and settle its initial property state
    pub fn new(args: StreamArgs, device: D) -> crate::Result<Self> {
        let unique_id = format!(
            "{}#{}",
            STREAMER_ID,
            STREAMER_INST_CTR.fetch_add(1, Ordering::Relaxed)
        );
        let num_chans = args.num_chans;

        let mut node = Self {
            unique_id,
            args,
            engine: ResolutionEngine::new(),
            device: Rc::new(RefCell::new(device)),
            mtu: Rc::new(Cell::new(usize::MAX)),
            xports: (0..num_chans).map(|_| None).collect(),
        };

        for chan in 0..num_chans {
            node.register_props(chan)?;
        }

        // Cross-channel MTU resolvers: each reads its own channel's MTU but
        // may write every channel's, keeping packet sizing identical across
        // the shared framing domain.
        let mtu_outputs: Vec<PropId> = (0..num_chans)
            .map(|c| PropId::new(PropKey::Mtu, c))
            .collect();
        for chan in 0..num_chans {
            let agg = Rc::clone(&node.mtu);
            node.engine.add_resolver(
                vec![PropId::new(PropKey::Mtu, chan)],
                mtu_outputs.clone(),
                move |store| {
                    trace!(chan, "resolving mtu");
                    if let Some(m) = store.get::<usize>(PropKey::Mtu, chan)? {
                        let current = agg.get();
                        if m < current {
                            // Smaller values win and apply to every channel
                            for c in 0..num_chans {
                                store.set(PropKey::Mtu, c, m)?;
                            }
                            agg.set(m);
                        } else if m > current {
                            // Never grow back up: clamp this channel to the
                            // established minimum
                            store.set(PropKey::Mtu, chan, current)?;
                        }
                    }
                    Ok(())
                },
            );
        }

        node.engine.init_props()?;
        info!(id = %node.unique_id, num_chans, "created tx streaming node");
        Ok(node)
    }

    /// Register one channel's properties and its effect-sink resolvers
    fn register_props(&mut self, chan: usize) -> Result<(), PropError> {
        let edge = EdgeInfo {
            direction: PortDirection::Output,
            chan,
        };
        self.engine.register::<f64>(PropKey::Scaling, edge)?;
        self.engine.register::<f64>(PropKey::SampRate, edge)?;
        self.engine.register::<f64>(PropKey::TickRate, edge)?;
        self.engine
            .register_with::<String>(PropKey::Type, edge, self.args.otw_format.clone())?;
        self.engine.register::<usize>(PropKey::Mtu, edge)?;
        debug!(chan, "registered channel properties");

        let device = Rc::clone(&self.device);
        self.engine
            .add_resolver(vec![PropId::new(PropKey::Scaling, chan)], vec![], move |store| {
                trace!(chan, "resolving scaling");
                if let Some(s) = store.get::<f64>(PropKey::Scaling, chan)? {
                    device.borrow_mut().set_scale_factor(chan, FULL_SCALE_I16 / s);
                }
                Ok(())
            });

        let device = Rc::clone(&self.device);
        self.engine
            .add_resolver(vec![PropId::new(PropKey::SampRate, chan)], vec![], move |store| {
                trace!(chan, "resolving samp_rate");
                if let Some(rate) = store.get::<f64>(PropKey::SampRate, chan)? {
                    device.borrow_mut().set_samp_rate(rate);
                }
                Ok(())
            });

        let device = Rc::clone(&self.device);
        self.engine
            .add_resolver(vec![PropId::new(PropKey::TickRate, chan)], vec![], move |store| {
                trace!(chan, "resolving tick_rate");
                if let Some(rate) = store.get::<f64>(PropKey::TickRate, chan)? {
                    device.borrow_mut().set_tick_rate(rate);
                }
                Ok(())
            });

        Ok(())
    }

    /// Set a channel property and resolve to a fixed point
    pub fn set_property<T: PropValue>(
        &mut self,
        key: PropKey,
        chan: usize,
        value: T,
    ) -> crate::Result<()> {
        self.check_chan(chan)?;
        self.engine.set(key, chan, value)?;
        Ok(())
    }

    /// Read a channel property (`Ok(None)` if not yet configured)
    pub fn property<T: PropValue>(&self, key: PropKey, chan: usize) -> crate::Result<Option<T>> {
        self.check_chan(chan)?;
        Ok(self.engine.get::<T>(key, chan)?)
    }

    /// Attach a transport to a channel.
    ///
    /// The transport's negotiated payload size is fed through the resolution
    /// engine (not applied directly), so the cross-channel resolver enforces
    /// MTU uniformity before the transport is bound.
    pub fn connect_channel(&mut self, chan: usize, xport: Box<dyn Transport>) -> crate::Result<()> {
        self.check_chan(chan)?;
        let payload = xport.max_payload_size();
        debug!(chan, payload, "negotiating channel mtu");
        self.engine.set(PropKey::Mtu, chan, payload)?;
        self.xports[chan] = Some(xport);
        Ok(())
    }

    /// Aggregate MTU: the minimum negotiated across all channels
    /// (`usize::MAX` before any channel is attached)
    pub fn mtu(&self) -> usize {
        self.mtu.get()
    }

    /// Whether a transport is bound to the given channel
    pub fn channel_connected(&self, chan: usize) -> crate::Result<bool> {
        self.check_chan(chan)?;
        Ok(self.xports[chan].is_some())
    }

    /// Construction arguments this node was built with
    pub fn stream_args(&self) -> &StreamArgs {
        &self.args
    }

    pub fn num_channels(&self) -> usize {
        self.args.num_chans
    }

    fn check_chan(&self, chan: usize) -> crate::Result<()> {
        if chan >= self.args.num_chans {
            return Err(StreamError::OutOfRange {
                chan,
                num_chans: self.args.num_chans,
            });
        }
        Ok(())
    }
}

impl<D: DeviceControl> GraphNode for TxStreamNode<D> {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    // No input edges: property and action traffic terminates here
    fn num_input_ports(&self) -> usize {
        0
    }

    fn num_output_ports(&self) -> usize {
        self.args.num_chans
    }

    fn prop_forwarding_policy(&self) -> ForwardingPolicy {
        ForwardingPolicy::Drop
    }

    fn action_forwarding_policy(&self) -> ForwardingPolicy {
        ForwardingPolicy::Drop
    }

    /// Every channel's output edge must be connected; partial fan-out is
    /// unusable for a streamer.
    fn check_topology(&self, connected_inputs: &[usize], connected_outputs: &[usize]) -> bool {
        if connected_outputs.len() != self.num_output_ports() {
            return false;
        }
        ports_in_range(connected_inputs, self.num_input_ports())
            && ports_in_range(connected_outputs, self.num_output_ports())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct CallLog {
        scale: Vec<(usize, f64)>,
        samp_rate: Vec<f64>,
        tick_rate: Vec<f64>,
    }

    /// Device mock recording every control call
    struct MockDevice {
        calls: Rc<RefCell<CallLog>>,
    }

    impl DeviceControl for MockDevice {
        fn set_scale_factor(&mut self, chan: usize, factor: f64) {
            self.calls.borrow_mut().scale.push((chan, factor));
        }
        fn set_samp_rate(&mut self, rate: f64) {
            self.calls.borrow_mut().samp_rate.push(rate);
        }
        fn set_tick_rate(&mut self, rate: f64) {
            self.calls.borrow_mut().tick_rate.push(rate);
        }
    }

    struct NullDevice;
    impl DeviceControl for NullDevice {
        fn set_scale_factor(&mut self, _: usize, _: f64) {}
        fn set_samp_rate(&mut self, _: f64) {}
        fn set_tick_rate(&mut self, _: f64) {}
    }

    struct FixedTransport(usize);
    impl Transport for FixedTransport {
        fn max_payload_size(&self) -> usize {
            self.0
        }
    }

    fn make_node(num_chans: usize) -> (TxStreamNode<MockDevice>, Rc<RefCell<CallLog>>) {
        let calls = Rc::new(RefCell::new(CallLog::default()));
        let device = MockDevice {
            calls: Rc::clone(&calls),
        };
        let args = StreamArgs {
            otw_format: "sc16".to_string(),
            num_chans,
        };
        let node = TxStreamNode::new(args, device).unwrap();
        (node, calls)
    }

    #[test]
    fn test_construction_is_quiet() {
        // The settling pass must not touch the device: nothing is valid yet
        let (node, calls) = make_node(4);
        assert!(calls.borrow().scale.is_empty());
        assert!(calls.borrow().samp_rate.is_empty());
        assert!(calls.borrow().tick_rate.is_empty());
        assert_eq!(node.mtu(), usize::MAX);
    }

    #[test]
    fn test_unique_ids_distinct_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    let node = TxStreamNode::new(StreamArgs::default(), NullDevice).unwrap();
                    node.unique_id().to_string()
                })
            })
            .collect();

        let ids: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 8, "Every node must get a distinct id");
        assert!(ids.iter().all(|id| id.starts_with("TxStreamer#")));
    }

    #[test]
    fn test_node_is_a_structural_sink() {
        let (node, _) = make_node(2);
        assert_eq!(node.num_input_ports(), 0);
        assert_eq!(node.num_output_ports(), 2);
        assert_eq!(node.prop_forwarding_policy(), ForwardingPolicy::Drop);
        assert_eq!(node.action_forwarding_policy(), ForwardingPolicy::Drop);
        // Any claimed input edge fails validation outright
        assert!(!node.check_topology(&[0], &[0, 1]));
    }

    #[test]
    fn test_check_topology_requires_full_fanout() {
        let (node, _) = make_node(4);
        assert!(node.check_topology(&[], &[0, 1, 2, 3]));
        assert!(!node.check_topology(&[], &[]));
        assert!(!node.check_topology(&[], &[0, 1, 2]));
        assert!(!node.check_topology(&[], &[0, 1, 2, 3, 4]));
        // Right count but invalid indices
        assert!(!node.check_topology(&[], &[0, 1, 2, 4]));
        assert!(!node.check_topology(&[], &[0, 1, 2, 2]));
    }

    #[test]
    fn test_scaling_resolves_to_device_call() {
        let (mut node, calls) = make_node(4);
        node.set_property(PropKey::Scaling, 2, 1.0).unwrap();

        assert_eq!(calls.borrow().scale, vec![(2, 32767.0)]);
        assert!(calls.borrow().samp_rate.is_empty());
        assert!(calls.borrow().tick_rate.is_empty());
    }

    #[test]
    fn test_scaling_divides_full_scale() {
        let (mut node, calls) = make_node(1);
        node.set_property(PropKey::Scaling, 0, 2.0).unwrap();
        assert_eq!(calls.borrow().scale, vec![(0, 32767.0 / 2.0)]);
    }

    #[test]
    fn test_rates_forwarded() {
        let (mut node, calls) = make_node(2);
        node.set_property(PropKey::SampRate, 0, 1e6).unwrap();
        node.set_property(PropKey::TickRate, 1, 200e6).unwrap();

        assert_eq!(calls.borrow().samp_rate, vec![1e6]);
        assert_eq!(calls.borrow().tick_rate, vec![200e6]);
    }

    #[test]
    fn test_set_property_idempotent() {
        let (mut node, calls) = make_node(4);
        node.set_property(PropKey::Scaling, 1, 4.0).unwrap();
        node.set_property(PropKey::Scaling, 1, 4.0).unwrap();

        assert_eq!(
            calls.borrow().scale.len(),
            1,
            "Rewriting the same value must not re-drive the device"
        );
        assert_eq!(
            node.property::<f64>(PropKey::Scaling, 1).unwrap(),
            Some(4.0)
        );
    }

    #[test]
    fn test_type_property_initialized_from_args() {
        let (node, _) = make_node(3);
        for chan in 0..3 {
            assert_eq!(
                node.property::<String>(PropKey::Type, chan).unwrap(),
                Some("sc16".to_string())
            );
        }
    }

    #[test]
    fn test_mtu_negotiation_takes_minimum() {
        let (mut node, _) = make_node(4);
        for (chan, payload) in [1500usize, 1400, 1500, 1472].into_iter().enumerate() {
            node.connect_channel(chan, Box::new(FixedTransport(payload)))
                .unwrap();
        }

        assert_eq!(node.mtu(), 1400);
        for chan in 0..4 {
            assert_eq!(
                node.property::<usize>(PropKey::Mtu, chan).unwrap(),
                Some(1400),
                "Every channel's MTU must equal the negotiated minimum"
            );
        }
    }

    #[test]
    fn test_mtu_never_grows() {
        let (mut node, _) = make_node(2);
        node.connect_channel(0, Box::new(FixedTransport(1400))).unwrap();
        node.connect_channel(1, Box::new(FixedTransport(9000))).unwrap();

        assert_eq!(node.mtu(), 1400);
        assert_eq!(node.property::<usize>(PropKey::Mtu, 1).unwrap(), Some(1400));
    }

    #[test]
    fn test_first_attachment_sets_all_channels() {
        let (mut node, _) = make_node(3);
        node.connect_channel(1, Box::new(FixedTransport(8000))).unwrap();

        assert_eq!(node.mtu(), 8000);
        for chan in 0..3 {
            assert_eq!(node.property::<usize>(PropKey::Mtu, chan).unwrap(), Some(8000));
        }
    }

    #[test]
    fn test_connect_channel_out_of_range() {
        let (mut node, _) = make_node(2);
        let result = node.connect_channel(2, Box::new(FixedTransport(1500)));

        assert!(matches!(
            result,
            Err(StreamError::OutOfRange { chan: 2, num_chans: 2 })
        ));
        // Rejected before any state mutation
        assert_eq!(node.mtu(), usize::MAX);
    }

    #[test]
    fn test_transport_bound_after_resolution() {
        let (mut node, _) = make_node(2);
        assert!(!node.channel_connected(0).unwrap());

        node.connect_channel(0, Box::new(FixedTransport(1500))).unwrap();
        assert!(node.channel_connected(0).unwrap());
        assert!(!node.channel_connected(1).unwrap());
        assert!(node.channel_connected(2).is_err());
    }

    #[test]
    fn test_property_access_out_of_range() {
        let (mut node, _) = make_node(2);
        assert!(matches!(
            node.set_property(PropKey::Scaling, 5, 1.0),
            Err(StreamError::OutOfRange { chan: 5, .. })
        ));
        assert!(matches!(
            node.property::<f64>(PropKey::Scaling, 5),
            Err(StreamError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_mtu_converges_at_scale() {
        // Worst case per node size: strictly decreasing payloads re-broadcast
        // the minimum on every attachment
        for num_chans in [1usize, 4, 16] {
            let (mut node, _) = make_node(num_chans);
            for chan in 0..num_chans {
                let payload = 9000 - chan * 100;
                node.connect_channel(chan, Box::new(FixedTransport(payload)))
                    .unwrap();
            }
            let expected = 9000 - (num_chans - 1) * 100;
            assert_eq!(node.mtu(), expected);
            for chan in 0..num_chans {
                assert_eq!(
                    node.property::<usize>(PropKey::Mtu, chan).unwrap(),
                    Some(expected)
                );
            }
        }
    }

    #[test]
    fn test_stream_args_retained() {
        let args = StreamArgs {
            otw_format: "sc8".to_string(),
            num_chans: 2,
        };
        let node = TxStreamNode::new(args, NullDevice).unwrap();
        assert_eq!(node.stream_args().otw_format, "sc8");
        assert_eq!(node.num_channels(), 2);
    }
}

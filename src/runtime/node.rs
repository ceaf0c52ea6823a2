//! Graph-facing node contract
//!
//! Defines the GraphNode trait through which the surrounding block graph
//! addresses a node: identity, port counts, forwarding policy, and topology
//! validation before a streaming session is activated.

/// How a node propagates property changes and actions arriving from the
/// surrounding graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardingPolicy {
    /// Forward on the matching port of the opposite direction
    OneToOne,
    /// Forward on all ports of the opposite direction
    FanOut,
    /// Absorb: the node is a terminal sink for this traffic
    Drop,
}

/// Base edge validation: every connected port index must be in range and
/// appear at most once. With zero declared ports, only the empty list
/// passes, which is what makes a zero-input node a sink structurally.
pub fn ports_in_range(connected: &[usize], num_ports: usize) -> bool {
    connected
        .iter()
        .enumerate()
        .all(|(i, &port)| port < num_ports && !connected[..i].contains(&port))
}

/// A node in the surrounding block graph
pub trait GraphNode {
    /// Process-wide unique identifier for this node instance
    fn unique_id(&self) -> &str;

    /// Number of input edges this node accepts
    fn num_input_ports(&self) -> usize;

    /// Number of output edges this node provides
    fn num_output_ports(&self) -> usize;

    /// Policy for property changes arriving from the graph
    fn prop_forwarding_policy(&self) -> ForwardingPolicy {
        ForwardingPolicy::OneToOne
    }

    /// Policy for action messages arriving from the graph
    fn action_forwarding_policy(&self) -> ForwardingPolicy {
        ForwardingPolicy::OneToOne
    }

    /// Pure predicate the graph calls before activating a session; no side
    /// effects. The default accepts any in-range, duplicate-free edge sets.
    fn check_topology(&self, connected_inputs: &[usize], connected_outputs: &[usize]) -> bool {
        ports_in_range(connected_inputs, self.num_input_ports())
            && ports_in_range(connected_outputs, self.num_output_ports())
    }
}

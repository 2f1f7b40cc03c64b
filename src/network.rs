//! The finalized network the core consumes (spec.md §6).
//!
//! Parsing Pajek / link-list / multilayer file formats into this shape is an
//! external collaborator's job (spec.md §1); this module only defines the shape and
//! the validation performed when it is finalized.

use hashbrown::HashMap;

use crate::config::FlowModel;
use crate::error::InputDomainError;

/// A single outgoing link, before flow has been computed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEdge {
    pub source: u32,
    pub target: u32,
    pub weight: f64,
}

/// One leaf (state node) of the input network.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateNodeInfo {
    pub state_id: u32,
    pub physical_id: u32,
    pub layer_id: u32,
    pub teleport_weight: f64,
    pub name: Option<String>,
    /// Integer meta-category vector (meta objective, spec.md §4.3).
    pub meta_categories: Vec<i64>,
}

/// A network ready for [`crate::flow::FlowCalculator`] and the engine: every node id
/// referenced by an edge or node record is in `0..num_state_nodes`, and
/// `directedness` has already been fixed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Network {
    pub nodes: Vec<StateNodeInfo>,
    pub edges: Vec<RawEdge>,
    pub directedness: FlowModel,
    /// Node ids >= this threshold belong to the "feature" partition of a bipartite
    /// network. `None` means the network is not bipartite.
    pub bipartite_start_id: Option<u32>,
    /// `(layer, physical_id) -> state_id`, populated for multilayer networks.
    pub layer_node_to_state_id: HashMap<(u32, u32), u32>,
    pub num_physical_nodes: u32,
}

impl Network {
    pub fn num_state_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Validate the domain invariants spec.md §7 names for *InputDomain* errors and
    /// drop edges the config says to ignore (`include_self_links`,
    /// `weight_threshold`), returning the network ready for flow computation.
    pub fn finalize(
        mut self,
        include_self_links: bool,
        weight_threshold: f64,
    ) -> Result<Self, InputDomainError> {
        if self.nodes.is_empty() {
            return Err(InputDomainError::EmptyNetwork);
        }
        if self.edges.is_empty() {
            return Err(InputDomainError::NoLinks);
        }
        let n = self.nodes.len() as u32;
        for edge in &self.edges {
            if edge.source >= n {
                return Err(InputDomainError::NodeIdOutOfRange(edge.source, n));
            }
            if edge.target >= n {
                return Err(InputDomainError::NodeIdOutOfRange(edge.target, n));
            }
        }
        if let Some(start) = self.bipartite_start_id {
            for edge in &self.edges {
                let source_feature = edge.source >= start;
                let target_feature = edge.target >= start;
                if source_feature == target_feature {
                    return Err(InputDomainError::BipartiteViolation(
                        edge.source,
                        edge.target,
                        start,
                    ));
                }
            }
        }
        for ((layer_a, _), &state_id) in &self.layer_node_to_state_id {
            if let Some(node) = self.nodes.get(state_id as usize) {
                if node.layer_id != *layer_a {
                    // the map is keyed by the layer the node actually belongs to; a
                    // mismatch here would mean the caller built an inconsistent map,
                    // which is the same class of input-domain problem as an
                    // inter-layer self-link below.
                    return Err(InputDomainError::EqualInterLayerLink(state_id, *layer_a));
                }
            }
        }

        self.edges.retain(|edge| {
            if !include_self_links && edge.source == edge.target {
                return false;
            }
            edge.weight >= weight_threshold
        });

        if self.edges.is_empty() {
            return Err(InputDomainError::NoLinks);
        }

        Ok(self)
    }

    /// Group outgoing edges by source, for [`crate::flow::FlowCalculator`].
    pub fn outgoing_by_source(&self) -> Vec<Vec<(u32, f64)>> {
        let mut out = vec![Vec::new(); self.nodes.len()];
        for edge in &self.edges {
            out[edge.source as usize].push((edge.target, edge.weight));
        }
        out
    }

    /// Group incoming edges by target, needed by undirected/undirdir flow models
    /// (spec.md §4.4 step 2a: "if undirected, incoming edge flows too").
    pub fn incoming_by_target(&self) -> Vec<Vec<(u32, f64)>> {
        let mut inn = vec![Vec::new(); self.nodes.len()];
        for edge in &self.edges {
            inn[edge.target as usize].push((edge.source, edge.weight));
        }
        inn
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Build an undirected network from a symmetric edge list (each pair added both
    /// ways), the way `graph.rs::test_utils::random_data` builds symmetric
    /// adjacency in the teacher crate.
    pub fn undirected(num_nodes: u32, edges: &[(u32, u32, f64)]) -> Network {
        let nodes = (0..num_nodes)
            .map(|i| StateNodeInfo {
                state_id: i,
                physical_id: i,
                layer_id: 0,
                teleport_weight: 1.0,
                name: None,
                meta_categories: Vec::new(),
            })
            .collect();
        let mut raw_edges = Vec::new();
        for &(a, b, w) in edges {
            raw_edges.push(RawEdge { source: a, target: b, weight: w });
            raw_edges.push(RawEdge { source: b, target: a, weight: w });
        }
        Network {
            nodes,
            edges: raw_edges,
            directedness: FlowModel::Undirected,
            bipartite_start_id: None,
            layer_node_to_state_id: HashMap::new(),
            num_physical_nodes: num_nodes,
        }
    }

    pub fn directed(num_nodes: u32, edges: &[(u32, u32, f64)]) -> Network {
        let nodes = (0..num_nodes)
            .map(|i| StateNodeInfo {
                state_id: i,
                physical_id: i,
                layer_id: 0,
                teleport_weight: 1.0,
                name: None,
                meta_categories: Vec::new(),
            })
            .collect();
        let raw_edges = edges
            .iter()
            .map(|&(a, b, w)| RawEdge { source: a, target: b, weight: w })
            .collect();
        Network {
            nodes,
            edges: raw_edges,
            directedness: FlowModel::Directed,
            bipartite_start_id: None,
            layer_node_to_state_id: HashMap::new(),
            num_physical_nodes: num_nodes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn empty_network_rejected() {
        let network = Network::default();
        assert_eq!(network.finalize(false, 0.0), Err(InputDomainError::EmptyNetwork));
    }

    #[test]
    fn node_id_out_of_range_rejected() {
        let mut network = undirected(2, &[(0, 1, 1.0)]);
        network.edges.push(RawEdge { source: 0, target: 5, weight: 1.0 });
        assert_eq!(
            network.finalize(false, 0.0),
            Err(InputDomainError::NodeIdOutOfRange(5, 2))
        );
    }

    #[test]
    fn self_links_dropped_by_default() {
        let mut network = undirected(2, &[(0, 1, 1.0)]);
        network.edges.push(RawEdge { source: 0, target: 0, weight: 1.0 });
        let finalized = network.finalize(false, 0.0).unwrap();
        assert!(finalized.edges.iter().all(|e| e.source != e.target));
    }

    #[test]
    fn bipartite_violation_rejected() {
        let mut network = undirected(4, &[]);
        network.bipartite_start_id = Some(2);
        network.edges = vec![RawEdge { source: 0, target: 1, weight: 1.0 }];
        assert!(matches!(
            network.finalize(false, 0.0),
            Err(InputDomainError::BipartiteViolation(0, 1, 2))
        ));
    }

    #[test]
    fn directed_builder_keeps_single_direction() {
        let network = directed(3, &[(0, 1, 1.0), (0, 2, 1.0)]);
        let finalized = network.finalize(false, 0.0).unwrap();
        assert_eq!(finalized.edges.len(), 2);
    }
}

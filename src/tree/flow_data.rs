//! Per-node flow attributes (spec.md §3.1, §3.4).

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, SubAssign};

/// Scalar flow attributes carried by every tree node, leaf or interior.
///
/// Mirrors `original_source/src/core/FlowData.h`'s `FlowData` struct field-for-field;
/// the multilayer teleport-flow map lives alongside it (rather than in a derived
/// `MultiFlowData` subtype as the C++ does) since Rust has no cheap way to substitute
/// a derived struct only for the multilayer objective, and the map costs nothing for
/// networks that never populate it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowData {
    pub flow: f64,
    pub enter_flow: f64,
    pub exit_flow: f64,
    pub teleport_weight: f64,
    pub teleport_flow: f64,
    pub teleport_source_flow: f64,
    pub dangling_flow: f64,
}

impl FlowData {
    pub fn with_flow(flow: f64) -> Self {
        FlowData { flow, ..Default::default() }
    }
}

impl AddAssign for FlowData {
    fn add_assign(&mut self, other: Self) {
        self.flow += other.flow;
        self.enter_flow += other.enter_flow;
        self.exit_flow += other.exit_flow;
        self.teleport_weight += other.teleport_weight;
        self.teleport_flow += other.teleport_flow;
        self.teleport_source_flow += other.teleport_source_flow;
        self.dangling_flow += other.dangling_flow;
    }
}

impl SubAssign for FlowData {
    fn sub_assign(&mut self, other: Self) {
        self.flow -= other.flow;
        self.enter_flow -= other.enter_flow;
        self.exit_flow -= other.exit_flow;
        self.teleport_weight -= other.teleport_weight;
        self.teleport_flow -= other.teleport_flow;
        self.teleport_source_flow -= other.teleport_source_flow;
        self.dangling_flow -= other.dangling_flow;
    }
}

/// Per-layer teleport bookkeeping for the regularized multilayer objective
/// (`original_source/src/core/FlowData.h`'s `LayerTeleFlowData`).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerTeleFlowData {
    pub num_nodes: u32,
    pub teleport_flow: f64,
    pub teleport_weight: f64,
}

impl LayerTeleFlowData {
    pub fn is_empty(&self) -> bool {
        self.num_nodes == 0
    }
}

impl AddAssign for LayerTeleFlowData {
    fn add_assign(&mut self, other: Self) {
        self.num_nodes += other.num_nodes;
        self.teleport_flow += other.teleport_flow;
        self.teleport_weight += other.teleport_weight;
    }
}

impl SubAssign for LayerTeleFlowData {
    fn sub_assign(&mut self, other: Self) {
        self.num_nodes -= other.num_nodes;
        self.teleport_flow -= other.teleport_flow;
        self.teleport_weight -= other.teleport_weight;
    }
}

/// Per-module, per-layer teleport map used only by `RegularizedMultilayerMapEq`.
pub type MultiFlowData = HashMap<u32, LayerTeleFlowData>;

pub fn merge_multi_flow(into: &mut MultiFlowData, other: &MultiFlowData) {
    for (layer, data) in other {
        *into.entry(*layer).or_default() += *data;
    }
}

pub fn unmerge_multi_flow(into: &mut MultiFlowData, other: &MultiFlowData) {
    for (layer, data) in other {
        if let Some(entry) = into.get_mut(layer) {
            *entry -= *data;
            if entry.is_empty() {
                into.remove(layer);
            }
        }
    }
}

/// Per-physical-id aggregation entry kept on memory (state) leaves
/// (`original_source/src/core/FlowData.h`'s `PhysData`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhysData {
    pub phys_node_index: u32,
    pub sum_flow_from_state_node: f64,
}

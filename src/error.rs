//! Error types raised at the core's public entry points.
//!
//! Every fallible entry point returns a [`Result<T, Error>`]; nothing is retried
//! internally, and the engine never continues past an inconsistent state (see
//! spec.md §7).

use thiserror::Error;

use crate::tree::NodeId;

/// Top-level error raised to callers of the core entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("invalid input network: {0}")]
    InputDomain(#[from] InputDomainError),

    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error("internal invariant violated (this is a bug): {0}")]
    Internal(#[from] InternalError),
}

/// Problems with the network passed in from outside the core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputDomainError {
    #[error("network has zero nodes")]
    EmptyNetwork,

    #[error("network has no links")]
    NoLinks,

    #[error("node id {0} is out of the declared range 0..{1}")]
    NodeIdOutOfRange(u32, u32),

    #[error("edge ({0}, {1}) does not cross the declared bipartite boundary at {2}")]
    BipartiteViolation(u32, u32, u32),

    #[error("inter-layer link on node {0} has equal source and target layer {1}")]
    EqualInterLayerLink(u32, u32),
}

/// Problems with the [`InfomapConfig`](crate::config::InfomapConfig) itself, or with
/// combinations of options that cannot be jointly satisfied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unrecognized flow model {0:?}")]
    UnknownFlowModel(String),

    #[error("conflicting options: {0}")]
    ConflictingOptions(String),

    #[error("missing required input: {0}")]
    MissingInput(String),
}

/// Invariant violations (I1-I5, spec.md §3.1) or misuse of an internal API. Always a
/// bug in the engine, never something a caller can repair by changing input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InternalError {
    #[error("node {0:?} is not a leaf but was visited as one")]
    NotALeaf(NodeId),

    #[error("node {0:?} has both ordinary children and a sub-engine (I4 violated)")]
    ChildrenAndSubEngine(NodeId),

    #[error("expand_children called on node {0:?} which already has live children")]
    ExpandOnLiveNode(NodeId),

    #[error("collapse_children called on node {0:?} which has no children")]
    CollapseOnLeaf(NodeId),

    #[error("child degree mismatch on node {0:?}: tracked {1}, walked {2}")]
    ChildDegreeMismatch(NodeId, u32, u32),

    #[error("flow conservation violated at node {0:?}: parent {1}, children sum {2}")]
    FlowNotConserved(NodeId, f64, f64),

    #[error("module index {0} referenced but has no live entry")]
    DanglingModuleIndex(u32),
}

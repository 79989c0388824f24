//! Error types for the export pipeline
//!
//! Every stage has its own error enum. [`ErrorKind`] folds them back into the
//! coarse categories an operator sees in the final report.

use std::path::PathBuf;

use thiserror::Error;

use crate::cad::ComponentId;
use crate::model::{EdgeId, NodeId};
use crate::tree::NodeHandle;

/// Coarse classification of everything that can go wrong during an export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The CAD analysis (or a bridge answer) is malformed. Aborts the run.
    InputInconsistency,
    /// Some body cannot be reached from the grounded root. Aborts the run.
    DisconnectedGraph,
    /// Two groups resolve to the same output file. Aborts before any write.
    PathCollision,
    /// A group exported more vertices than downstream consumers handle well.
    VertexBudgetExceeded,
    /// A file could not be written. Recorded, the run continues.
    WriteFailure,
}

impl ErrorKind {
    /// Whether the run can carry on after an error of this kind
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::VertexBudgetExceeded | ErrorKind::WriteFailure
        )
    }
}

/// Errors reported by the CAD bridge
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("no open document named '{0}'")]
    DocumentMismatch(String),

    #[error("unknown occurrence: {0}")]
    UnknownOccurrence(ComponentId),

    #[error("occurrence parent chain loops through {0}")]
    OccurrenceCycle(ComponentId),

    #[error("rigid body analysis failed: {0}")]
    Analysis(String),

    #[error("triangulation of {component} failed: {reason}")]
    Triangulation {
        component: ComponentId,
        reason: String,
    },
}

/// Errors from building and cleaning the rigid graph
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("duplicate rigid body id {0}")]
    DuplicateBody(NodeId),

    #[error("edge {edge} references unknown body {node}")]
    UnknownNode { edge: EdgeId, node: NodeId },

    #[error("edge {edge} connects body {node} to itself")]
    SelfLoop { edge: EdgeId, node: NodeId },

    #[error("edge {edge} has invalid weight {weight}")]
    InvalidWeight { edge: EdgeId, weight: f32 },

    #[error("body {node} references unknown group '{group}'")]
    UnknownGroup { node: NodeId, group: String },

    #[error("duplicate group id '{0}'")]
    DuplicateGroup(String),

    #[error("group '{group}' is assigned to both body {first} and body {second}")]
    SharedGroup {
        group: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("no grounded body in the analysis")]
    NoGroundedBody,

    #[error("expected exactly one grounded body, found {0:?}")]
    AmbiguousGround(Vec<NodeId>),

    #[error("bodies unreachable from grounded body {root}: {nodes:?}")]
    Disconnected { root: NodeId, nodes: Vec<NodeId> },

    #[error("transform of body {node} unavailable: {source}")]
    Transform {
        node: NodeId,
        #[source]
        source: BridgeError,
    },
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GraphError::Disconnected { .. } => ErrorKind::DisconnectedGraph,
            _ => ErrorKind::InputInconsistency,
        }
    }
}

/// Errors from editing a built joint tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeHandle),

    #[error("moving {child} under {parent} would create a cycle")]
    WouldCreateCycle { child: NodeHandle, parent: NodeHandle },

    #[error("the root node cannot be given a parent")]
    RootHasNoParent,
}

/// Errors from skeleton serialization
#[derive(Debug, Error)]
pub enum SkeletonError {
    #[error("groups '{first}' and '{second}' both resolve to {}", path.display())]
    PathCollision {
        path: PathBuf,
        first: String,
        second: String,
    },

    #[error("failed to encode skeleton: {0}")]
    Encode(String),

    #[error("failed to parse skeleton {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to read skeleton {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write skeleton {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SkeletonError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SkeletonError::PathCollision { .. } => ErrorKind::PathCollision,
            SkeletonError::Write { .. } => ErrorKind::WriteFailure,
            _ => ErrorKind::InputInconsistency,
        }
    }
}

/// Errors from surface export and the BXDA codec
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("write_bxda called before export_all")]
    NothingExported,

    #[error("batch for {component} has {vertices} vertices, ceiling is {max}")]
    BatchTooLarge {
        component: ComponentId,
        vertices: usize,
        max: usize,
    },

    #[error("malformed batch for {component}: {reason}")]
    MalformedBatch {
        component: ComponentId,
        reason: String,
    },

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("invalid BXDA data: {0}")]
    InvalidFormat(String),

    #[error("failed to write mesh {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mesh I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SurfaceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SurfaceError::Write { .. } | SurfaceError::Io(_) => ErrorKind::WriteFailure,
            _ => ErrorKind::InputInconsistency,
        }
    }
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("failed to encode config: {0}")]
    Serialize(String),
}

/// Unrecoverable pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Skeleton(#[from] SkeletonError),

    #[error("failed to create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Bridge(_) => ErrorKind::InputInconsistency,
            PipelineError::Graph(e) => e.kind(),
            PipelineError::Skeleton(e) => e.kind(),
            PipelineError::OutputDirectory { .. } => ErrorKind::WriteFailure,
        }
    }
}

//! BXD Exporter Core
//!
//! Turns the rigid-body analysis of a CAD assembly into a robot description:
//! - cad: bridge to the CAD application and an in-memory fixture
//! - model: rigid bodies, joints and the graph between them
//! - cleaner: ground merging and shortest-path joint tree construction
//! - tree: the rooted joint tree
//! - skeleton: BXDJ skeleton document
//! - surface: BXDA mesh accumulation and encoding
//! - pipeline: end-to-end export with a review hook

pub mod cad;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod skeleton;
pub mod surface;
pub mod tree;

pub use cad::{AssemblyFixture, CadBridge, CadContext, ComponentId};
pub use cleaner::{CleanReport, build_and_clean_dijkstra, clean_grounded_bodies};
pub use config::ExportConfig;
pub use error::{ErrorKind, PipelineError};
pub use model::{CustomRigidGroup, GroupModel, NodeId, RigidBody, RigidGraph};
pub use pipeline::{
    AcceptTree, ExportOutcome, ExportReport, ReviewOutcome, TreeReview, export_robot,
};
pub use skeleton::SkeletonDocument;
pub use surface::{BxdaMesh, SurfaceExporter};
pub use tree::{NodeHandle, RigidNode, RigidTree};

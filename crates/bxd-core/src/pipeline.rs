//! Export pipeline
//!
//! analysis → graph → ground cleanup → joint tree → review → skeleton → meshes
//!
//! Everything up to and including output planning fails fast. Once files are
//! being written, failures are collected and the remaining files are still
//! attempted.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::cad::{CadBridge, CadContext};
use crate::cleaner::{CleanReport, OrphanedBody, build_and_clean_dijkstra, clean_grounded_bodies};
use crate::config::ExportConfig;
use crate::error::{ErrorKind, PipelineError, SkeletonError, SurfaceError};
use crate::model::{CustomRigidGroup, RigidGraph};
use crate::skeleton::{plan_outputs, write_skeleton};
use crate::surface::{ExportGroup, SurfaceExporter, SurfaceOptions, VertexBudgetExceeded};
use crate::tree::RigidTree;

/// Decision returned by the review step
#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    /// Export this tree (possibly edited)
    Submit(RigidTree),
    Cancel,
}

/// Hook that lets a user confirm or edit the automatically built tree
pub trait TreeReview {
    fn review(&mut self, tree: RigidTree, groups: &[CustomRigidGroup]) -> ReviewOutcome;
}

/// Accepts the tree unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptTree;

impl TreeReview for AcceptTree {
    fn review(&mut self, tree: RigidTree, _groups: &[CustomRigidGroup]) -> ReviewOutcome {
        ReviewOutcome::Submit(tree)
    }
}

impl<F> TreeReview for F
where
    F: FnMut(RigidTree, &[CustomRigidGroup]) -> ReviewOutcome,
{
    fn review(&mut self, tree: RigidTree, groups: &[CustomRigidGroup]) -> ReviewOutcome {
        self(tree, groups)
    }
}

/// Something the operator should know about, which did not stop the export
#[derive(Debug, Clone, PartialEq)]
pub enum ExportWarning {
    OrphanDropped(OrphanedBody),
    VertexBudgetExceeded(VertexBudgetExceeded),
}

impl ExportWarning {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ExportWarning::OrphanDropped(_) => None,
            ExportWarning::VertexBudgetExceeded(_) => Some(ErrorKind::VertexBudgetExceeded),
        }
    }
}

impl fmt::Display for ExportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportWarning::OrphanDropped(body) => {
                write!(f, "body {} '{}' has no connections and was dropped", body.id, body.name)
            }
            ExportWarning::VertexBudgetExceeded(warning) => warning.fmt(f),
        }
    }
}

/// A file that could not be produced
#[derive(Debug)]
pub enum ExportFailure {
    Skeleton(SkeletonError),
    Mesh {
        group: String,
        path: PathBuf,
        error: SurfaceError,
    },
}

impl ExportFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportFailure::Skeleton(error) => error.kind(),
            ExportFailure::Mesh { error, .. } => error.kind(),
        }
    }
}

impl fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFailure::Skeleton(error) => error.fmt(f),
            ExportFailure::Mesh { group, path, error } => {
                write!(f, "group '{}' ({}): {}", group, path.display(), error)
            }
        }
    }
}

/// Everything written, warned about, or failed during one export
#[derive(Debug, Default)]
pub struct ExportReport {
    pub skeleton: Option<PathBuf>,
    pub meshes: Vec<PathBuf>,
    pub warnings: Vec<ExportWarning>,
    pub failures: Vec<ExportFailure>,
}

impl ExportReport {
    /// All files were written
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn vertex_warnings(&self) -> impl Iterator<Item = &VertexBudgetExceeded> {
        self.warnings.iter().filter_map(|w| match w {
            ExportWarning::VertexBudgetExceeded(v) => Some(v),
            ExportWarning::OrphanDropped(_) => None,
        })
    }
}

/// Result of [`export_robot`]
#[derive(Debug)]
pub enum ExportOutcome {
    /// The review step declined the tree; nothing was written
    Cancelled,
    Completed(ExportReport),
}

/// A joint tree ready for review
#[derive(Debug, Clone)]
pub struct PreparedTree {
    pub tree: RigidTree,
    pub clean: CleanReport,
}

/// Analyze the assembly and build the joint tree
pub fn build_tree(
    bridge: &dyn CadBridge,
    ctx: &CadContext,
    groups: &[CustomRigidGroup],
    config: &ExportConfig,
) -> Result<PreparedTree, PipelineError> {
    tracing::info!(document = ctx.document(), "Running rigid body analysis");
    let analysis = bridge.rigid_analysis(ctx)?;
    let mut graph =
        RigidGraph::from_analysis(bridge, ctx, &analysis, groups, config.default_edge_weight)?;
    let clean = clean_grounded_bodies(&mut graph)?;
    let tree = build_and_clean_dijkstra(&graph)?;
    Ok(PreparedTree { tree, clean })
}

/// Write the skeleton and one mesh per group of `tree` into the configured directory
pub fn write_outputs(
    bridge: &dyn CadBridge,
    ctx: &CadContext,
    tree: &RigidTree,
    config: &ExportConfig,
) -> Result<ExportReport, PipelineError> {
    let outputs = plan_outputs(tree, &config.output_dir, &config.mesh_extension)?;
    create_output_dir(&config.output_dir)?;

    let mut report = ExportReport::default();

    let skeleton_path = config.skeleton_path();
    match write_skeleton(&skeleton_path, tree, &outputs) {
        Ok(()) => report.skeleton = Some(skeleton_path),
        Err(error) => {
            tracing::warn!("{}", error);
            report.failures.push(ExportFailure::Skeleton(error));
        }
    }

    let mut exporter = SurfaceExporter::new(SurfaceOptions::from(config));
    for (handle, path) in outputs.iter() {
        let Some(group) = tree.get(handle).and_then(ExportGroup::from_node) else {
            continue;
        };
        tracing::info!("Output {} to {:?}", group.name, path);

        exporter.reset();
        let result = exporter
            .export_all(bridge, ctx, group)
            .and_then(|summary| exporter.write_bxda(path).map(|()| summary));
        match result {
            Ok(summary) => {
                report.meshes.push(path.to_path_buf());
                if let Some(warning) = summary.warning {
                    report
                        .warnings
                        .push(ExportWarning::VertexBudgetExceeded(warning));
                }
            }
            Err(error) => {
                tracing::warn!(group = group.name, "Mesh export failed: {}", error);
                report.failures.push(ExportFailure::Mesh {
                    group: group.name.to_string(),
                    path: path.to_path_buf(),
                    error,
                });
            }
        }
    }

    tracing::info!(
        meshes = report.meshes.len(),
        warnings = report.warnings.len(),
        failures = report.failures.len(),
        "Export finished"
    );
    Ok(report)
}

/// Run the whole pipeline
pub fn export_robot(
    bridge: &dyn CadBridge,
    ctx: &CadContext,
    groups: &[CustomRigidGroup],
    review: &mut dyn TreeReview,
    config: &ExportConfig,
) -> Result<ExportOutcome, PipelineError> {
    let PreparedTree { tree, clean } = build_tree(bridge, ctx, groups, config)?;
    tracing::info!("Joint tree:\n{}", tree);

    let tree = match review.review(tree, groups) {
        ReviewOutcome::Submit(tree) => tree,
        ReviewOutcome::Cancel => {
            tracing::info!("Export cancelled at review");
            return Ok(ExportOutcome::Cancelled);
        }
    };

    let mut report = write_outputs(bridge, ctx, &tree, config)?;
    let mut warnings: Vec<ExportWarning> = clean
        .orphans
        .into_iter()
        .map(ExportWarning::OrphanDropped)
        .collect();
    warnings.append(&mut report.warnings);
    report.warnings = warnings;
    Ok(ExportOutcome::Completed(report))
}

fn create_output_dir(dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir).map_err(|source| PipelineError::OutputDirectory {
        path: dir.to_path_buf(),
        source,
    })
}

//! Skeleton serialization (BXDJ)
//!
//! The skeleton document lists every tree node in pre-order with its parent
//! index, the joint to that parent and a reference to the node's group.
//! Mesh paths are planned here as well, so path collisions surface before
//! anything touches the disk.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::SkeletonError;
use crate::geometry::{Pose, relative_transform};
use crate::model::{EdgeId, GroupHints, GroupModel, JointLimits, JointType, MassProperties, NodeId};
use crate::tree::{NodeHandle, RigidTree};

/// Current BXDJ format version
pub const SKELETON_FORMAT_VERSION: u32 = 1;

/// Where each group's mesh must be written, keyed by tree node
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputMapping {
    entries: Vec<(NodeHandle, PathBuf)>,
}

impl OutputMapping {
    pub fn get(&self, handle: NodeHandle) -> Option<&Path> {
        self.entries
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, p)| p.as_path())
    }

    /// Entries in skeleton (pre-order) order
    pub fn iter(&self) -> impl Iterator<Item = (NodeHandle, &Path)> {
        self.entries.iter().map(|(h, p)| (*h, p.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Joint from a node to its parent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonJoint {
    pub edge: EdgeId,
    pub joint_type: JointType,
    pub axis: Vec3,
    pub anchor: Vec3,
    pub limits: Option<JointLimits>,
    /// Node frame relative to the parent frame
    pub relative: Pose,
}

/// Reference from a skeleton node to its group and mesh file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReference {
    pub name: String,
    /// Id of the user-defined group, `None` for plain CAD clusters
    pub custom_id: Option<String>,
    /// Mesh file name relative to the skeleton document
    pub mesh: Option<String>,
    pub hints: Option<GroupHints>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonNode {
    pub index: u32,
    /// `None` at the root
    pub parent: Option<u32>,
    pub body: NodeId,
    pub name: String,
    pub joint: Option<SkeletonJoint>,
    /// `None` when the node has no group of its own
    pub group: Option<GroupReference>,
    pub mass: Option<MassProperties>,
}

/// The BXDJ document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonDocument {
    pub version: u32,
    pub nodes: Vec<SkeletonNode>,
}

impl SkeletonDocument {
    /// Describe `tree` in pre-order, linking groups to the planned mesh files
    pub fn from_tree(tree: &RigidTree, outputs: &OutputMapping) -> Self {
        let order = tree.list_all_nodes();
        let index_of: HashMap<NodeHandle, u32> = order
            .iter()
            .enumerate()
            .map(|(i, h)| (*h, i as u32))
            .collect();

        let nodes = order
            .iter()
            .filter_map(|&handle| {
                let node = tree.get(handle)?;
                let parent = node.parent().and_then(|p| tree.get(p));
                let joint = match (node.joint, parent) {
                    (Some(joint), Some(parent)) => Some(SkeletonJoint {
                        edge: joint.edge,
                        joint_type: joint.geometry.joint_type,
                        axis: joint.geometry.axis,
                        anchor: joint.geometry.anchor,
                        limits: joint.geometry.limits,
                        relative: Pose::from_mat4(relative_transform(
                            parent.world_transform,
                            node.world_transform,
                        )),
                    }),
                    _ => None,
                };
                let group = node.model.as_ref().map(|model| GroupReference {
                    name: model.name().to_string(),
                    custom_id: match model {
                        GroupModel::Custom(group) => Some(group.id.clone()),
                        GroupModel::Cad { .. } => None,
                    },
                    mesh: outputs
                        .get(handle)
                        .and_then(Path::file_name)
                        .map(|f| f.to_string_lossy().into_owned()),
                    hints: model.hints().cloned(),
                });

                Some(SkeletonNode {
                    index: index_of[&handle],
                    parent: node.parent().map(|p| index_of[&p]),
                    body: node.source,
                    name: node.name.clone(),
                    joint,
                    group,
                    mass: node.mass,
                })
            })
            .collect();

        Self {
            version: SKELETON_FORMAT_VERSION,
            nodes,
        }
    }

    /// Write the document as pretty RON
    pub fn write(&self, path: &Path) -> Result<(), SkeletonError> {
        let content = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SkeletonError::Encode(e.to_string()))?;

        let write_err = |source| SkeletonError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content.as_bytes()).map_err(write_err)?;
        writer.flush().map_err(write_err)?;
        Ok(())
    }

    /// Read a BXDJ document
    pub fn read(path: &Path) -> Result<Self, SkeletonError> {
        let content = std::fs::read_to_string(path).map_err(|source| SkeletonError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&content).map_err(|e| SkeletonError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// File stem for a group: `[A-Za-z0-9_-]` kept, everything else becomes `_`
fn file_stem(name: &str, body: NodeId) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        format!("group_{}", body.0)
    } else {
        stem
    }
}

/// Allocate one mesh path per node that has a group.
///
/// Paths are compared case-insensitively; two groups landing on the same
/// file is a [`SkeletonError::PathCollision`].
pub fn plan_outputs(
    tree: &RigidTree,
    output_dir: &Path,
    extension: &str,
) -> Result<OutputMapping, SkeletonError> {
    let mut claimed: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::new();

    for handle in tree.list_all_nodes() {
        let Some(node) = tree.get(handle) else {
            continue;
        };
        let Some(model) = &node.model else {
            continue;
        };

        let path = output_dir.join(format!("{}.{}", file_stem(model.name(), node.source), extension));
        let key = path.to_string_lossy().to_lowercase();
        if let Some(first) = claimed.get(&key) {
            return Err(SkeletonError::PathCollision {
                path,
                first: first.clone(),
                second: model.name().to_string(),
            });
        }
        claimed.insert(key, model.name().to_string());
        entries.push((handle, path));
    }

    Ok(OutputMapping { entries })
}

/// Write the skeleton document for `tree` to `path`, pointing at the planned mesh files
pub fn write_skeleton(
    path: &Path,
    tree: &RigidTree,
    outputs: &OutputMapping,
) -> Result<(), SkeletonError> {
    let document = SkeletonDocument::from_tree(tree, outputs);
    document.write(path)?;
    tracing::info!(
        nodes = document.nodes.len(),
        meshes = outputs.len(),
        "Wrote skeleton to {:?}",
        path
    );
    Ok(())
}

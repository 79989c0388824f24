//! CAD bridge interface
//!
//! The CAD application is an external collaborator. Everything this crate needs
//! from it goes through [`CadBridge`], always together with an explicit
//! [`CadContext`] that scopes the open document to one export run.
//! [`AssemblyFixture`] is an in-memory bridge backed by a RON file.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::geometry::{self, Pose};
use crate::model::{CustomRigidGroup, JointLimits, JointType, MassProperties};

/// Hard ceiling on vertices in one triangulation batch returned by the CAD side
pub const MAX_BATCH_VERTICES: usize = 8192;

/// Stable identifier of a CAD component occurrence (its occurrence path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentId {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(path: String) -> Self {
        Self(path)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to the CAD document an export run works against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadContext {
    document: String,
}

impl CadContext {
    pub fn open(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }

    pub fn document(&self) -> &str {
        &self.document
    }
}

/// One component occurrence with its transform relative to its parent
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub id: ComponentId,
    pub parent: Option<ComponentId>,
    pub transform: Mat4,
}

/// A batch of triangulated surface data in component-local coordinates
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetBatch {
    pub vertices: Vec<Vec3>,
    /// One normal per vertex, or empty when the CAD side has none
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl FacetBatch {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// A rigid-body cluster reported by the CAD analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedBody {
    pub id: u32,
    pub name: String,
    pub components: Vec<ComponentId>,
    #[serde(default)]
    pub grounded: bool,
    #[serde(default)]
    pub mass: Option<MassProperties>,
    /// Id of the user-defined group this body was assigned to
    #[serde(default)]
    pub group: Option<String>,
}

/// A mechanical connection between two analyzed bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedConnection {
    pub bodies: (u32, u32),
    #[serde(default)]
    pub joint_type: JointType,
    #[serde(default = "default_axis")]
    pub axis: Vec3,
    #[serde(default)]
    pub anchor: Vec3,
    /// Selection weight. Lower is preferred. Falls back to the configured default.
    #[serde(default)]
    pub weight: Option<f32>,
    #[serde(default)]
    pub limits: Option<JointLimits>,
}

fn default_axis() -> Vec3 {
    Vec3::Z
}

/// Raw rigid-body analysis of an assembly
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigidAnalysis {
    pub bodies: Vec<AnalyzedBody>,
    pub connections: Vec<AnalyzedConnection>,
}

/// Everything the export core consumes from the CAD application
pub trait CadBridge {
    /// Run the rigid-body analysis on the active assembly
    fn rigid_analysis(&self, ctx: &CadContext) -> Result<RigidAnalysis, BridgeError>;

    /// Look up one occurrence; `None` if the document has no such occurrence
    fn occurrence(&self, ctx: &CadContext, id: &ComponentId) -> Option<Occurrence>;

    /// Triangulate the visible surface of a component.
    ///
    /// Implementations must not return batches larger than `max_vertices`.
    fn facets(
        &self,
        ctx: &CadContext,
        id: &ComponentId,
        max_vertices: usize,
    ) -> Result<Vec<FacetBatch>, BridgeError>;

    /// World transform of a component, composed over its parent chain
    fn world_transform(&self, ctx: &CadContext, id: &ComponentId) -> Result<Mat4, BridgeError> {
        geometry::world_transform(id, |c| self.occurrence(ctx, c))
    }
}

/// Surface data of a fixture occurrence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FixtureMesh {
    pub vertices: Vec<[f32; 3]>,
    #[serde(default)]
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

/// A component occurrence stored in a fixture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureOccurrence {
    pub id: ComponentId,
    #[serde(default)]
    pub parent: Option<ComponentId>,
    #[serde(default)]
    pub transform: Pose,
    #[serde(default)]
    pub mesh: Option<FixtureMesh>,
}

/// In-memory CAD bridge: a captured assembly with its analysis and groups
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyFixture {
    pub document: String,
    #[serde(default)]
    pub occurrences: Vec<FixtureOccurrence>,
    #[serde(default)]
    pub analysis: RigidAnalysis,
    /// Output of the grouping step
    #[serde(default)]
    pub groups: Vec<CustomRigidGroup>,
}

impl AssemblyFixture {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            ..Self::default()
        }
    }

    /// Load a fixture from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Analysis(format!("{}: {}", path.display(), e)))?;
        Self::from_ron(&content)
    }

    pub fn from_ron(content: &str) -> Result<Self, BridgeError> {
        ron::from_str(content).map_err(|e| BridgeError::Analysis(e.to_string()))
    }

    /// Context for the document this fixture captures
    pub fn context(&self) -> CadContext {
        CadContext::open(self.document.clone())
    }

    /// Add an occurrence
    pub fn with_occurrence(
        mut self,
        id: &str,
        parent: Option<&str>,
        transform: Pose,
        mesh: Option<FixtureMesh>,
    ) -> Self {
        self.occurrences.push(FixtureOccurrence {
            id: ComponentId::from(id),
            parent: parent.map(ComponentId::from),
            transform,
            mesh,
        });
        self
    }

    /// Add an analyzed body
    pub fn with_body(mut self, body: AnalyzedBody) -> Self {
        self.analysis.bodies.push(body);
        self
    }

    /// Add an analyzed connection with default joint data
    pub fn with_connection(mut self, a: u32, b: u32, weight: f32) -> Self {
        self.analysis.connections.push(AnalyzedConnection {
            bodies: (a, b),
            joint_type: JointType::default(),
            axis: Vec3::Z,
            anchor: Vec3::ZERO,
            weight: Some(weight),
            limits: None,
        });
        self
    }

    /// Add a user-defined group
    pub fn with_group(mut self, group: CustomRigidGroup) -> Self {
        self.groups.push(group);
        self
    }

    fn find(&self, id: &ComponentId) -> Option<&FixtureOccurrence> {
        self.occurrences.iter().find(|o| &o.id == id)
    }

    fn check_document(&self, ctx: &CadContext) -> Result<(), BridgeError> {
        if ctx.document() != self.document {
            return Err(BridgeError::DocumentMismatch(ctx.document().to_string()));
        }
        Ok(())
    }
}

impl CadBridge for AssemblyFixture {
    fn rigid_analysis(&self, ctx: &CadContext) -> Result<RigidAnalysis, BridgeError> {
        self.check_document(ctx)?;
        Ok(self.analysis.clone())
    }

    fn occurrence(&self, ctx: &CadContext, id: &ComponentId) -> Option<Occurrence> {
        if ctx.document() != self.document {
            return None;
        }
        self.find(id).map(|o| Occurrence {
            id: o.id.clone(),
            parent: o.parent.clone(),
            transform: o.transform.to_mat4(),
        })
    }

    fn facets(
        &self,
        ctx: &CadContext,
        id: &ComponentId,
        max_vertices: usize,
    ) -> Result<Vec<FacetBatch>, BridgeError> {
        self.check_document(ctx)?;
        let occurrence = self
            .find(id)
            .ok_or_else(|| BridgeError::UnknownOccurrence(id.clone()))?;
        match &occurrence.mesh {
            Some(mesh) => split_batches(id, mesh, max_vertices),
            None => Ok(Vec::new()),
        }
    }
}

/// Split a mesh into batches of at most `max_vertices` vertices, triangle by triangle
fn split_batches(
    id: &ComponentId,
    mesh: &FixtureMesh,
    max_vertices: usize,
) -> Result<Vec<FacetBatch>, BridgeError> {
    let has_normals = !mesh.normals.is_empty();
    if has_normals && mesh.normals.len() != mesh.vertices.len() {
        return Err(BridgeError::Triangulation {
            component: id.clone(),
            reason: format!(
                "{} normals for {} vertices",
                mesh.normals.len(),
                mesh.vertices.len()
            ),
        });
    }
    if let Some(&bad) = mesh
        .indices
        .iter()
        .find(|&&i| i as usize >= mesh.vertices.len())
    {
        return Err(BridgeError::Triangulation {
            component: id.clone(),
            reason: format!("index {bad} out of range"),
        });
    }

    let mut batches = Vec::new();
    let mut batch = FacetBatch::default();
    let mut remap: HashMap<u32, u32> = HashMap::new();

    for triangle in mesh.indices.chunks_exact(3) {
        let fresh = triangle.iter().filter(|i| !remap.contains_key(i)).count();
        if batch.vertices.len() + fresh > max_vertices && !batch.indices.is_empty() {
            batches.push(std::mem::take(&mut batch));
            remap.clear();
        }
        for &index in triangle {
            let local = *remap.entry(index).or_insert_with(|| {
                batch.vertices.push(Vec3::from(mesh.vertices[index as usize]));
                if has_normals {
                    batch.normals.push(Vec3::from(mesh.normals[index as usize]));
                }
                (batch.vertices.len() - 1) as u32
            });
            batch.indices.push(local);
        }
    }
    if !batch.indices.is_empty() {
        batches.push(batch);
    }

    Ok(batches)
}

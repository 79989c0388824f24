//! Surface export (BXDA)
//!
//! [`SurfaceExporter`] collects the triangulated surface of every component in
//! a group, moves it into world space and accumulates one combined buffer,
//! which [`SurfaceExporter::write_bxda`] then writes as a BXDA file.
//!
//! # Binary Format
//!
//! All values little-endian.
//!
//! ```text
//! UINT8[4]     – Magic "BXDA"
//! UINT32       – Format version
//! UINT32       – Vertex count V
//! UINT32       – Index count I (multiple of 3)
//! foreach vertex
//!     REAL32[3] – Position
//!     REAL32[3] – Normal
//! end
//! UINT32[I]    – Triangle indices
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use glam::{Mat4, Vec3};

use crate::cad::{CadBridge, CadContext, ComponentId, FacetBatch, MAX_BATCH_VERTICES};
use crate::config::{ExportConfig, VERTEX_WARNING_THRESHOLD};
use crate::error::SurfaceError;
use crate::tree::RigidNode;

const MAGIC: &[u8; 4] = b"BXDA";

/// Current BXDA format version
pub const BXDA_FORMAT_VERSION: u32 = 1;

/// Surface export tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceOptions {
    pub vertex_warning_threshold: usize,
    pub max_batch_vertices: usize,
    pub dedupe: bool,
    pub precision: f32,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            vertex_warning_threshold: VERTEX_WARNING_THRESHOLD,
            max_batch_vertices: MAX_BATCH_VERTICES,
            dedupe: true,
            precision: 10000.0,
        }
    }
}

impl From<&ExportConfig> for SurfaceOptions {
    fn from(config: &ExportConfig) -> Self {
        Self {
            vertex_warning_threshold: config.vertex_warning_threshold,
            max_batch_vertices: config.max_batch_vertices,
            dedupe: config.dedupe_vertices,
            precision: config.dedupe_precision,
        }
    }
}

/// The part of a tree node the exporter needs
#[derive(Debug, Clone, Copy)]
pub struct ExportGroup<'a> {
    pub name: &'a str,
    pub components: &'a [ComponentId],
}

impl<'a> ExportGroup<'a> {
    /// `None` for nodes without a group
    pub fn from_node(node: &'a RigidNode) -> Option<Self> {
        node.model.as_ref().map(|model| Self {
            name: model.name(),
            components: &node.components,
        })
    }
}

/// Raised when a group exceeds the vertex warning threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexBudgetExceeded {
    pub group: String,
    pub vertex_count: usize,
    pub threshold: usize,
}

impl fmt::Display for VertexBudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group '{}' has {} vertices (more than {}); the simulator may misbehave",
            self.group, self.vertex_count, self.threshold
        )
    }
}

/// Result of one `export_all` call
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    /// Vertices accumulated so far (including earlier calls since `reset`)
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub warning: Option<VertexBudgetExceeded>,
}

/// Indexed triangle mesh in BXDA layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BxdaMesh {
    pub vertices: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl BxdaMesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Encode to `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), SurfaceError> {
        writer.write_all(MAGIC)?;
        writer.write_all(&BXDA_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.vertices.len() as u32).to_le_bytes())?;
        writer.write_all(&(self.indices.len() as u32).to_le_bytes())?;
        for (position, normal) in self.vertices.iter().zip(&self.normals) {
            for value in position.iter().chain(normal) {
                writer.write_all(&value.to_le_bytes())?;
            }
        }
        for index in &self.indices {
            writer.write_all(&index.to_le_bytes())?;
        }
        Ok(())
    }

    /// Decode from `reader`, validating header and index ranges
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, SurfaceError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SurfaceError::InvalidFormat("bad magic".to_string()));
        }
        let version = read_u32(reader)?;
        if version != BXDA_FORMAT_VERSION {
            return Err(SurfaceError::InvalidFormat(format!(
                "unsupported version {version}"
            )));
        }
        let vertex_count = read_u32(reader)? as usize;
        let index_count = read_u32(reader)? as usize;
        if index_count % 3 != 0 {
            return Err(SurfaceError::InvalidFormat(format!(
                "index count {index_count} is not a multiple of 3"
            )));
        }

        let mut mesh = BxdaMesh::default();
        for _ in 0..vertex_count {
            mesh.vertices.push(read_vec3(reader)?);
            mesh.normals.push(read_vec3(reader)?);
        }
        for _ in 0..index_count {
            let index = read_u32(reader)?;
            if index as usize >= vertex_count {
                return Err(SurfaceError::InvalidFormat(format!(
                    "index {index} out of range"
                )));
            }
            mesh.indices.push(index);
        }
        Ok(mesh)
    }

    /// Read a BXDA file
    pub fn load(path: &Path) -> Result<Self, SurfaceError> {
        let file = File::open(path)?;
        Self::read_from(&mut BufReader::new(file))
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, SurfaceError> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<[f32; 3], SurfaceError> {
    let mut out = [0.0f32; 3];
    for value in &mut out {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf)?;
        *value = f32::from_le_bytes(buf);
    }
    Ok(out)
}

/// Accumulated buffer plus the dedup lookup
#[derive(Debug, Default)]
struct MeshBuffer {
    mesh: BxdaMesh,
    lookup: HashMap<[i32; 6], u32>,
}

impl MeshBuffer {
    fn push_vertex(&mut self, position: Vec3, normal: Vec3, options: &SurfaceOptions) -> u32 {
        let p = position.to_array();
        let n = normal.to_array();
        if !options.dedupe {
            return self.append(p, n);
        }

        // Quantize for comparison
        let q = |v: f32| (v * options.precision).round() as i32;
        let key = [q(p[0]), q(p[1]), q(p[2]), q(n[0]), q(n[1]), q(n[2])];
        if let Some(&existing) = self.lookup.get(&key) {
            return existing;
        }
        let index = self.append(p, n);
        self.lookup.insert(key, index);
        index
    }

    fn append(&mut self, position: [f32; 3], normal: [f32; 3]) -> u32 {
        let index = self.mesh.vertices.len() as u32;
        self.mesh.vertices.push(position);
        self.mesh.normals.push(normal);
        index
    }
}

/// Collects group surfaces and writes them as BXDA
#[derive(Debug, Default)]
pub struct SurfaceExporter {
    options: SurfaceOptions,
    /// `None` until `export_all` runs after construction or `reset`
    buffer: Option<MeshBuffer>,
}

impl SurfaceExporter {
    pub fn new(options: SurfaceOptions) -> Self {
        Self {
            options,
            buffer: None,
        }
    }

    /// Drop all accumulated geometry
    pub fn reset(&mut self) {
        self.buffer = None;
    }

    /// Vertices accumulated since the last reset
    pub fn vertex_count(&self) -> usize {
        self.mesh().map_or(0, BxdaMesh::vertex_count)
    }

    /// Accumulated mesh, if `export_all` ran since the last reset
    pub fn mesh(&self) -> Option<&BxdaMesh> {
        self.buffer.as_ref().map(|buffer| &buffer.mesh)
    }

    /// Triangulate every component of `group` in world space and add it to the buffer
    pub fn export_all(
        &mut self,
        bridge: &dyn CadBridge,
        ctx: &CadContext,
        group: ExportGroup<'_>,
    ) -> Result<ExportSummary, SurfaceError> {
        let options = self.options;
        let buffer = self.buffer.get_or_insert_with(MeshBuffer::default);

        for component in group.components {
            let world = bridge.world_transform(ctx, component)?;
            let batches = bridge.facets(ctx, component, options.max_batch_vertices)?;
            for batch in &batches {
                add_batch(buffer, component, batch, world, &options)?;
            }
            tracing::debug!(
                group = group.name,
                component = %component,
                batches = batches.len(),
                "Triangulated component"
            );
        }

        let vertex_count = buffer.mesh.vertex_count();
        let warning = (vertex_count > options.vertex_warning_threshold).then(|| {
            VertexBudgetExceeded {
                group: group.name.to_string(),
                vertex_count,
                threshold: options.vertex_warning_threshold,
            }
        });
        if let Some(warning) = &warning {
            tracing::warn!("{}", warning);
        }

        Ok(ExportSummary {
            vertex_count,
            triangle_count: buffer.mesh.triangle_count(),
            warning,
        })
    }

    /// Write the accumulated buffer to `path`
    pub fn write_bxda(&self, path: &Path) -> Result<(), SurfaceError> {
        let mesh = self.mesh().ok_or(SurfaceError::NothingExported)?;

        let write_err = |source| SurfaceError::Write {
            path: path.to_path_buf(),
            source,
        };
        let file = File::create(path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        mesh.write_to(&mut writer).map_err(|e| match e {
            SurfaceError::Io(source) => write_err(source),
            other => other,
        })?;
        writer.flush().map_err(write_err)?;

        tracing::info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            "Wrote mesh to {:?}",
            path
        );
        Ok(())
    }
}

fn add_batch(
    buffer: &mut MeshBuffer,
    component: &ComponentId,
    batch: &FacetBatch,
    world: Mat4,
    options: &SurfaceOptions,
) -> Result<(), SurfaceError> {
    if batch.vertex_count() > options.max_batch_vertices {
        return Err(SurfaceError::BatchTooLarge {
            component: component.clone(),
            vertices: batch.vertex_count(),
            max: options.max_batch_vertices,
        });
    }
    if !batch.normals.is_empty() && batch.normals.len() != batch.vertices.len() {
        return Err(SurfaceError::MalformedBatch {
            component: component.clone(),
            reason: format!(
                "{} normals for {} vertices",
                batch.normals.len(),
                batch.vertices.len()
            ),
        });
    }
    if batch.indices.len() % 3 != 0 {
        return Err(SurfaceError::MalformedBatch {
            component: component.clone(),
            reason: format!("{} indices is not a whole number of triangles", batch.indices.len()),
        });
    }

    let normal_mat = world.inverse().transpose();
    let remap: Vec<u32> = batch
        .vertices
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let position = world.transform_point3(*v);
            let normal = batch
                .normals
                .get(i)
                .map(|n| normal_mat.transform_vector3(*n).normalize_or_zero())
                .unwrap_or(Vec3::ZERO);
            buffer.push_vertex(position, normal, options)
        })
        .collect();

    for &index in &batch.indices {
        let mapped = remap.get(index as usize).ok_or_else(|| SurfaceError::MalformedBatch {
            component: component.clone(),
            reason: format!("index {index} out of range"),
        })?;
        buffer.mesh.indices.push(*mapped);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cad::{AssemblyFixture, FixtureMesh};
    use crate::geometry::Pose;
    use std::io::Cursor;

    /// `triangles` disjoint triangles, every vertex distinct
    fn soup(triangles: u32) -> FixtureMesh {
        let mut mesh = FixtureMesh::default();
        for t in 0..triangles {
            let base = mesh.vertices.len() as u32;
            let x = (t % 1000) as f32;
            let y = (t / 1000) as f32 * 3.0;
            mesh.vertices.extend([[x, y, 0.0], [x + 0.5, y, 0.0], [x, y + 1.0, 0.0]]);
            mesh.normals.extend([[0.0, 0.0, 1.0]; 3]);
            mesh.indices.extend([base, base + 1, base + 2]);
        }
        mesh
    }

    /// A unit square made of two triangles sharing an edge, given as a soup
    fn square_soup() -> FixtureMesh {
        FixtureMesh {
            vertices: vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
            ],
            normals: vec![[0.0, 0.0, 1.0]; 6],
            indices: vec![0, 1, 2, 3, 4, 5],
        }
    }

    fn fixture_with(mesh: FixtureMesh, at: [f32; 3]) -> AssemblyFixture {
        AssemblyFixture::new("bot.iam").with_occurrence(
            "part",
            None,
            Pose::from_position(at),
            Some(mesh),
        )
    }

    fn group(components: &[ComponentId]) -> ExportGroup<'_> {
        ExportGroup {
            name: "plate",
            components,
        }
    }

    #[test]
    fn test_write_before_export_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bxda");
        let exporter = SurfaceExporter::default();
        assert!(matches!(
            exporter.write_bxda(&path),
            Err(SurfaceError::NothingExported)
        ));
        assert!(!path.exists());
    }

    #[test]
    fn test_reset_clears_export() {
        let fixture = fixture_with(square_soup(), [0.0; 3]);
        let ctx = fixture.context();
        let parts = [ComponentId::from("part")];
        let mut exporter = SurfaceExporter::default();

        exporter.export_all(&fixture, &ctx, group(&parts)).unwrap();
        assert!(exporter.mesh().is_some());
        exporter.reset();
        assert_eq!(exporter.vertex_count(), 0);
        assert!(matches!(
            exporter.write_bxda(Path::new("unused.bxda")),
            Err(SurfaceError::NothingExported)
        ));
    }

    #[test]
    fn test_coincident_vertices_are_merged() {
        let fixture = fixture_with(square_soup(), [0.0; 3]);
        let ctx = fixture.context();
        let parts = [ComponentId::from("part")];

        let mut exporter = SurfaceExporter::default();
        let summary = exporter.export_all(&fixture, &ctx, group(&parts)).unwrap();
        assert_eq!(summary.vertex_count, 4);
        assert_eq!(summary.triangle_count, 2);

        let mut raw = SurfaceExporter::new(SurfaceOptions {
            dedupe: false,
            ..SurfaceOptions::default()
        });
        assert_eq!(raw.export_all(&fixture, &ctx, group(&parts)).unwrap().vertex_count, 6);
    }

    #[test]
    fn test_vertices_are_moved_to_world_space() {
        let fixture = fixture_with(square_soup(), [10.0, 0.0, 0.0]);
        let ctx = fixture.context();
        let parts = [ComponentId::from("part")];
        let mut exporter = SurfaceExporter::default();
        exporter.export_all(&fixture, &ctx, group(&parts)).unwrap();

        let mesh = exporter.mesh().unwrap();
        assert!(mesh.vertices.iter().all(|v| v[0] >= 10.0 && v[0] <= 11.0));
        assert!(mesh.normals.iter().all(|n| (n[2] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_small_group_has_no_warning() {
        let fixture = fixture_with(soup(34), [0.0; 3]);
        let ctx = fixture.context();
        let parts = [ComponentId::from("part")];
        let mut exporter = SurfaceExporter::default();

        let summary = exporter.export_all(&fixture, &ctx, group(&parts)).unwrap();
        assert_eq!(summary.vertex_count, 102);
        assert!(summary.warning.is_none());
    }

    #[test]
    fn test_large_group_warns_but_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plate.bxda");
        // 23_334 triangles -> 70_002 distinct vertices
        let fixture = fixture_with(soup(23_334), [0.0; 3]);
        let ctx = fixture.context();
        let parts = [ComponentId::from("part")];
        let mut exporter = SurfaceExporter::default();

        let summary = exporter.export_all(&fixture, &ctx, group(&parts)).unwrap();
        assert_eq!(summary.vertex_count, 70_002);
        let warning = summary.warning.unwrap();
        assert_eq!(warning.group, "plate");
        assert_eq!(warning.threshold, 65_000);

        exporter.write_bxda(&path).unwrap();
        let mesh = BxdaMesh::load(&path).unwrap();
        assert_eq!(mesh.vertex_count(), 70_002);
        assert_eq!(mesh.triangle_count(), 23_334);
    }

    #[test]
    fn test_oversized_batch_is_rejected() {
        struct Greedy;
        impl CadBridge for Greedy {
            fn rigid_analysis(
                &self,
                _ctx: &CadContext,
            ) -> Result<crate::cad::RigidAnalysis, crate::error::BridgeError> {
                Ok(Default::default())
            }
            fn occurrence(
                &self,
                _ctx: &CadContext,
                id: &ComponentId,
            ) -> Option<crate::cad::Occurrence> {
                Some(crate::cad::Occurrence {
                    id: id.clone(),
                    parent: None,
                    transform: Mat4::IDENTITY,
                })
            }
            fn facets(
                &self,
                _ctx: &CadContext,
                _id: &ComponentId,
                max_vertices: usize,
            ) -> Result<Vec<FacetBatch>, crate::error::BridgeError> {
                Ok(vec![FacetBatch {
                    vertices: vec![Vec3::ZERO; max_vertices + 1],
                    normals: Vec::new(),
                    indices: Vec::new(),
                }])
            }
        }

        let parts = [ComponentId::from("part")];
        let mut exporter = SurfaceExporter::default();
        let err = exporter
            .export_all(&Greedy, &CadContext::open("x"), group(&parts))
            .unwrap_err();
        assert!(matches!(err, SurfaceError::BatchTooLarge { vertices: 8193, .. }));
    }

    #[test]
    fn test_codec_rejects_bad_data() {
        let mesh = BxdaMesh {
            vertices: vec![[0.0; 3]; 3],
            normals: vec![[0.0, 0.0, 1.0]; 3],
            indices: vec![0, 1, 2],
        };
        let mut bytes = Vec::new();
        mesh.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 16 + 3 * 24 + 3 * 4);
        assert_eq!(BxdaMesh::read_from(&mut Cursor::new(&bytes)).unwrap(), mesh);

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            BxdaMesh::read_from(&mut Cursor::new(&bad_magic)),
            Err(SurfaceError::InvalidFormat(_))
        ));

        let mut bad_index = bytes.clone();
        let last = bad_index.len() - 4;
        bad_index[last..].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(
            BxdaMesh::read_from(&mut Cursor::new(&bad_index)),
            Err(SurfaceError::InvalidFormat(_))
        ));

        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            BxdaMesh::read_from(&mut Cursor::new(truncated)),
            Err(SurfaceError::Io(_))
        ));
    }
}

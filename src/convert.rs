use std::io;
use nalgebra::{Point3, Vector3, Vector4};
use crate::bfres::{ByteOrder, Model, ResFile, Shape, Skeleton};
use crate::cast::{CastNode, NodeId, PropertyValue};
use crate::skeleton;


/// Every material is tagged with this fixed shading model; material
/// parameters are not translated.
const SHADING_MODEL: &str = "pbr";


/// One compiled vertex, including the bone-id to weight map built up
/// during weight encoding and mutated in place by rigid relocation.
#[derive(Clone, Debug)]
pub struct VertexInfo {
    pub index: usize,
    pub pos: Vector3<f32>,
    pub normal: Vector3<f32>,
    pub tangent: Vector4<f32>,
    pub weights: Vec<(u16, f32)>,
}

impl VertexInfo {
    /// First-wins: a bone already present keeps its original weight, even
    /// when a later blend slot names the same bone again.
    pub fn add_weight(&mut self, bone: u16, weight: f32) {
        if !self.weights.iter().any(|&(b, _)| b == bone) {
            self.weights.push((bone, weight));
        }
    }

    pub fn weight_for(&self, bone: u16) -> Option<f32> {
        self.weights.iter()
            .find(|&&(b, _)| b == bone)
            .map(|&(_, w)| w)
    }
}

/// The per-shape working set: parallel attribute streams pulled out of the
/// vertex buffer, the flattened triangle list, and the compiled vertices.
pub struct RawShape<'a> {
    pub shape: &'a Shape,
    pub indices: Vec<u32>,
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub tangents: Vec<Vector4<f32>>,
    /// UV channels in insertion order. Channel ids are not necessarily
    /// contiguous; emission renumbers them densely.
    pub uvs: Vec<(u8, Vec<[f32; 2]>)>,
    pub colors: Vec<(u8, Vec<[f32; 4]>)>,
    pub blend_indices: Vec<[f32; 4]>,
    pub blend_weights: Vec<[f32; 4]>,
    pub verts: Vec<VertexInfo>,
}

impl<'a> RawShape<'a> {
    fn new(shape: &'a Shape) -> RawShape<'a> {
        RawShape {
            shape,
            indices: Vec::new(),
            positions: Vec::new(),
            normals: Vec::new(),
            tangents: Vec::new(),
            uvs: Vec::new(),
            colors: Vec::new(),
            blend_indices: Vec::new(),
            blend_weights: Vec::new(),
            verts: Vec::new(),
        }
    }

    /// One vertex per position entry; normals and tangents are read
    /// positionally and default to zero when the stream is short or
    /// absent. Weight maps start empty and are filled by
    /// `consume_weights`.
    pub fn compile_vertices(&mut self) {
        for (i, &pos) in self.positions.iter().enumerate() {
            self.verts.push(VertexInfo {
                index: i,
                pos,
                normal: self.normals.get(i).copied().unwrap_or_else(Vector3::zeros),
                tangent: self.tangents.get(i).copied().unwrap_or_else(Vector4::zeros),
                weights: Vec::new(),
            });
        }
    }
}

fn push_channel<T>(channels: &mut Vec<(u8, Vec<T>)>, channel: u8, data: Vec<T>) {
    match channels.iter_mut().find(|(c, _)| *c == channel) {
        Some(entry) => entry.1.extend(data),
        None => channels.push((channel, data)),
    }
}

/// Pulls the recognized attribute streams of a shape's vertex buffer into
/// a `RawShape`. Unrecognized attribute names are skipped.
pub fn read_raw_shape<'a>(
    shape: &'a Shape,
    model: &Model,
    byte_order: ByteOrder,
) -> io::Result<RawShape<'a>> {
    let mut raw = RawShape::new(shape);

    let mesh = shape.meshes.get(0).ok_or_else(|| io::Error::new(
        io::ErrorKind::InvalidData,
        format!("shape {} has no meshes", shape.name),
    ))?;
    raw.indices.extend_from_slice(&mesh.indices);

    let buffer = model.vertex_buffers.get(shape.vertex_buffer_index as usize)
        .ok_or_else(|| io::Error::new(
            io::ErrorKind::InvalidData,
            format!("shape {} references missing vertex buffer {}",
                shape.name, shape.vertex_buffer_index),
        ))?;

    for attrib in &buffer.attribs {
        match attrib.name.as_str() {
            "_p0" => {
                let data = buffer.attrib_data(attrib, byte_order)?;
                raw.positions.extend(data.iter().map(|v| Vector3::new(v[0], v[1], v[2])));
            }
            "_n0" => {
                let data = buffer.attrib_data(attrib, byte_order)?;
                raw.normals.extend(data.iter().map(|v| Vector3::new(v[0], v[1], v[2])));
            }
            "_t0" => {
                let data = buffer.attrib_data(attrib, byte_order)?;
                raw.tangents.extend(data.iter().map(|&v| Vector4::from(v)));
            }
            "_i0" => {
                raw.blend_indices.extend(buffer.attrib_data(attrib, byte_order)?);
            }
            "_w0" => {
                raw.blend_weights.extend(buffer.attrib_data(attrib, byte_order)?);
            }
            name => {
                // UV and color channel ids live in the name suffix and can
                // be sparse; a suffix that fails to parse is treated as an
                // unknown attribute.
                if let Some(suffix) = name.strip_prefix("_u") {
                    if let Ok(channel) = suffix.parse::<u8>() {
                        let data = buffer.attrib_data(attrib, byte_order)?;
                        let uv = data.iter().map(|v| [v[0], v[1]]).collect();
                        push_channel(&mut raw.uvs, channel, uv);
                    }
                } else if let Some(suffix) = name.strip_prefix("_c") {
                    if let Ok(channel) = suffix.parse::<u8>() {
                        let data = buffer.attrib_data(attrib, byte_order)?;
                        push_channel(&mut raw.colors, channel, data);
                    }
                }
            }
        }
    }

    raw.compile_vertices();
    Ok(raw)
}


/// An unsigned integer array stored at the narrowest width sufficient for
/// an upper bound chosen up front.
pub enum IndexArray {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl IndexArray {
    /// Width for bone indices, chosen per model from the skeleton's total
    /// bone count.
    pub fn for_bone_count(count: usize) -> IndexArray {
        if count <= 0xFF {
            IndexArray::U8(Vec::new())
        } else if count <= 0xFFFF {
            IndexArray::U16(Vec::new())
        } else {
            IndexArray::U32(Vec::new())
        }
    }

    /// Width for face indices, chosen per shape from its vertex count.
    /// The single-byte bound is strict, so a count of 0xFF already moves
    /// to two bytes.
    pub fn for_vertex_count(count: usize) -> IndexArray {
        if count < 0xFF {
            IndexArray::U8(Vec::new())
        } else if count <= 0xFFFF {
            IndexArray::U16(Vec::new())
        } else {
            IndexArray::U32(Vec::new())
        }
    }

    pub fn push(&mut self, value: u32) {
        match self {
            IndexArray::U8(v) => v.push(value as u8),
            IndexArray::U16(v) => v.push(value as u16),
            IndexArray::U32(v) => v.push(value),
        }
    }

    pub fn into_value(self) -> PropertyValue {
        match self {
            IndexArray::U8(v) => PropertyValue::ByteArray(v),
            IndexArray::U16(v) => PropertyValue::ShortArray(v),
            IndexArray::U32(v) => PropertyValue::IntArray(v),
        }
    }
}


/// Serializes bone weights and bone indices into the mesh node and fills
/// the per-vertex weight maps used by rigid relocation.
pub fn consume_weights(
    model: &Model,
    raw: &mut RawShape,
    mesh_node: &mut CastNode,
) -> io::Result<()> {
    let skeleton = &model.skeleton;
    let skin_count = raw.shape.vertex_skin_count as usize;
    if skin_count > 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("shape {} has vertex skin count {}, at most 4 is supported",
                raw.shape.name, skin_count),
        ));
    }

    let mut weights: Vec<f32> = Vec::new();
    let mut bone_indices = IndexArray::for_bone_count(skeleton.bones.len());

    if skin_count == 0 {
        // A single implicit bone with full weight per vertex.
        let bone_index = raw.shape.bone_index;
        for v in raw.verts.iter_mut() {
            bone_indices.push(bone_index as u32);
            weights.push(1.);
            v.add_weight(bone_index, 1.);
        }
    } else {
        let shape = raw.shape;
        for (i, blend) in raw.blend_indices.iter().enumerate() {
            let vert = raw.verts.get_mut(i).ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidData,
                format!("shape {}: blend stream is longer than the vertex list",
                    shape.name),
            ))?;
            let weight = raw.blend_weights.get(i).copied().unwrap_or([1., 0., 0., 0.]);
            for j in 0 .. skin_count {
                // The blend stream addresses bones through the matrix
                // indirection table, not by bone id.
                let matrix_index = blend[j] as usize;
                let bone_id = *skeleton.matrix_to_bone_list.get(matrix_index)
                    .ok_or_else(|| io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("shape {}: matrix index {} is out of range",
                            shape.name, matrix_index),
                    ))?;
                bone_indices.push(bone_id as u32);
                let w = if raw.blend_weights.is_empty() { 1. } else { weight[j] };
                weights.push(w);
                vert.add_weight(bone_id, w);
            }
        }
    }

    mesh_node.add_value("wv", PropertyValue::FloatArray(weights));
    mesh_node.add_value("mi", PropertyValue::Byte(raw.shape.vertex_skin_count.max(1)));
    mesh_node.add_value("wb", bone_indices.into_value());
    Ok(())
}


/// Transforms every vertex bound to the bone into the bone's world space.
/// A bone without a rigid matrix slot leaves its vertices untouched.
pub fn move_vertices_to_bone(
    raw: &mut RawShape,
    skeleton: &Skeleton,
    bone_index: u16,
) -> io::Result<()> {
    let bone = skeleton.bones.get(bone_index as usize).ok_or_else(|| io::Error::new(
        io::ErrorKind::InvalidData,
        format!("shape {} is bound to missing bone {}", raw.shape.name, bone_index),
    ))?;
    if bone.rigid_matrix_index == -1 {
        return Ok(());
    }

    let matrix = skeleton::world_matrix(bone, skeleton);
    for v in raw.verts.iter_mut() {
        match v.weight_for(bone_index) {
            Some(w) if w > 0. => {}
            _ => continue,
        }
        v.pos = matrix.transform_point(&Point3::from(v.pos)).coords;
        v.normal = matrix.transform_vector(&v.normal);
        v.tangent = matrix * v.tangent;
    }
    Ok(())
}

/// Rigid binding dispatch. Shapes with two or more bones per vertex blend
/// through their weight arrays instead and are left untouched.
fn relocate_rigid(raw: &mut RawShape, skeleton: &Skeleton) -> io::Result<()> {
    let shape = raw.shape;
    match shape.vertex_skin_count {
        0 => move_vertices_to_bone(raw, skeleton, shape.bone_index)?,
        1 => {
            for &bone_index in &shape.skin_bone_indices {
                move_vertices_to_bone(raw, skeleton, bone_index)?;
            }
        }
        _ => {}
    }
    Ok(())
}


/// Drops degenerate triangles and serializes the survivors at the
/// narrowest index width the shape's vertex count allows.
pub fn consume_faces(mesh_node: &mut CastNode, raw: &RawShape) {
    let mut faces = IndexArray::for_vertex_count(raw.verts.len());
    for tri in raw.indices.chunks_exact(3) {
        if tri[0] != tri[1] && tri[1] != tri[2] && tri[2] != tri[0] {
            faces.push(tri[0]);
            faces.push(tri[1]);
            faces.push(tri[2]);
        }
    }
    mesh_node.add_value("f", faces.into_value());
}


/// One material node per source material, in source order. Returns the
/// content hashes meshes reference materials by.
pub fn consume_materials(model: &Model, model_node: &mut CastNode) -> Vec<u64> {
    let mut hashes = Vec::with_capacity(model.materials.len());
    for material in &model.materials {
        let mut node = CastNode::hashed(NodeId::Material, &material.name);
        node.add_string("n", &material.name);
        node.add_string("t", SHADING_MODEL);
        hashes.push(node.hash);
        model_node.push_child(node);
    }
    hashes
}

/// Builds the skeleton node: world transforms per bone, then a post-pass
/// deriving each bone's local transform from the accumulated world
/// transforms relative to its parent's.
pub fn consume_skeleton(model: &Model) -> CastNode {
    let skeleton = &model.skeleton;

    let mut world_positions = Vec::with_capacity(skeleton.bones.len());
    let mut world_rotations = Vec::with_capacity(skeleton.bones.len());
    for bone in &skeleton.bones {
        world_positions.push(skeleton::world_position(bone, skeleton));
        world_rotations.push(skeleton::world_rotation(bone, skeleton));
    }

    let mut skeleton_node = CastNode::new(NodeId::Skeleton);
    for (i, bone) in skeleton.bones.iter().enumerate() {
        let mut node = CastNode::hashed(NodeId::Bone, &bone.name);
        node.add_string("n", &bone.name);
        node.add_value("p", PropertyValue::Int(bone.parent_index as i32 as u32));

        let wp = world_positions[i];
        let wr = world_rotations[i];
        node.add_value("wp", PropertyValue::Vec3([wp.x, wp.y, wp.z]));
        node.add_value("wr", PropertyValue::Vec4([wr.i, wr.j, wr.k, wr.w]));

        let (lp, lr) = if bone.parent_index != -1 {
            let parent = bone.parent_index as usize;
            let inverse = world_rotations[parent].inverse();
            (
                inverse.transform_vector(&(wp - world_positions[parent])),
                inverse * wr,
            )
        } else {
            (wp, wr)
        };
        node.add_value("lp", PropertyValue::Vec3([lp.x, lp.y, lp.z]));
        node.add_value("lr", PropertyValue::Vec4([lr.i, lr.j, lr.k, lr.w]));

        skeleton_node.push_child(node);
    }
    skeleton_node
}

/// Converts one source model into a single-root output tree: model node,
/// skeleton node, materials in source order, one mesh per shape in source
/// order. The skeleton is fully resolved before any shape is processed.
pub fn convert_model(model: &Model, res: &ResFile) -> io::Result<CastNode> {
    let mut root = CastNode::new(NodeId::Root);
    let mut model_node = CastNode::hashed(NodeId::Model, &model.name);

    model_node.push_child(consume_skeleton(model));
    let material_hashes = consume_materials(model, &mut model_node);

    for shape in &model.shapes {
        let mut mesh_node = CastNode::hashed(NodeId::Mesh, &shape.name);
        mesh_node.add_string("n", &shape.name);
        let material_hash = material_hashes.get(shape.material_index as usize)
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidData,
                format!("shape {} references missing material {}",
                    shape.name, shape.material_index),
            ))?;
        mesh_node.add_value("m", PropertyValue::Long(*material_hash));

        let mut raw = read_raw_shape(shape, model, res.byte_order)?;

        // Weights come first so the vertex weight maps are populated
        // before relocation selects vertices by bone.
        consume_weights(model, &mut raw, &mut mesh_node)?;
        relocate_rigid(&mut raw, &model.skeleton)?;

        mesh_node.add_value("vp", PropertyValue::Vec3Array(
            raw.verts.iter().map(|v| [v.pos.x, v.pos.y, v.pos.z]).collect(),
        ));
        mesh_node.add_value("vn", PropertyValue::Vec3Array(
            raw.verts.iter().map(|v| [v.normal.x, v.normal.y, v.normal.z]).collect(),
        ));
        mesh_node.add_value("vt", PropertyValue::Vec4Array(
            raw.verts.iter()
                .map(|v| [v.tangent.x, v.tangent.y, v.tangent.z, v.tangent.w])
                .collect(),
        ));

        // Channels are renumbered densely: a source with channels 0 and 2
        // emits u0 and u1.
        mesh_node.add_value("ul", PropertyValue::Byte(raw.uvs.len() as u8));
        for (i, (_, uv)) in raw.uvs.iter().enumerate() {
            mesh_node.add_value(&format!("u{}", i), PropertyValue::Vec2Array(uv.clone()));
        }
        mesh_node.add_value("cl", PropertyValue::Byte(raw.colors.len() as u8));
        for (i, (_, color)) in raw.colors.iter().enumerate() {
            mesh_node.add_value(&format!("c{}", i), PropertyValue::Vec4Array(color.clone()));
        }

        consume_faces(&mut mesh_node, &raw);
        model_node.push_child(mesh_node);
    }

    root.push_child(model_node);
    Ok(root)
}

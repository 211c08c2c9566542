use std::io::{self, Read, Seek, SeekFrom};
use crate::read_from::{ReadExt, SeekExt};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Clone, Debug, Default)]
pub struct ResFile {
    pub name: String,
    pub byte_order: ByteOrder,
    pub models: Vec<Model>,
}

impl Default for ByteOrder {
    fn default() -> ByteOrder {
        ByteOrder::Little
    }
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub name: String,
    pub skeleton: Skeleton,
    pub vertex_buffers: Vec<VertexBuffer>,
    pub shapes: Vec<Shape>,
    pub materials: Vec<Material>,
}

#[derive(Clone, Debug, Default)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
    /// Remaps the matrix indices found in blend-index streams to bone ids.
    /// Smooth matrices come first, rigid matrices after them.
    pub matrix_to_bone_list: Vec<u16>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RotationMode {
    EulerXyz,
    Quaternion,
}

#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent_index: i16,
    pub smooth_matrix_index: i16,
    pub rigid_matrix_index: i16,
    pub rotation_mode: RotationMode,
    pub scale: [f32; 3],
    /// Euler angles in `xyz` (radians) or a full quaternion in `xyzw`,
    /// depending on `rotation_mode`.
    pub rotation: [f32; 4],
    pub position: [f32; 3],
}

impl Default for Bone {
    fn default() -> Bone {
        Bone {
            name: String::new(),
            parent_index: -1,
            smooth_matrix_index: -1,
            rigid_matrix_index: -1,
            rotation_mode: RotationMode::EulerXyz,
            scale: [1., 1., 1.],
            rotation: [0.; 4],
            position: [0.; 3],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VertexBuffer {
    pub vertex_count: u32,
    pub attribs: Vec<VertexAttrib>,
    pub buffers: Vec<DataBuffer>,
}

#[derive(Clone, Debug)]
pub struct VertexAttrib {
    pub name: String,
    pub format: AttribFormat,
    pub offset: u16,
    pub buffer_index: u16,
}

#[derive(Clone, Debug, Default)]
pub struct DataBuffer {
    pub stride: u16,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
pub struct Shape {
    pub name: String,
    pub material_index: u16,
    pub bone_index: u16,
    pub vertex_buffer_index: u16,
    pub vertex_skin_count: u8,
    pub skin_bone_indices: Vec<u16>,
    pub meshes: Vec<Mesh>,
}

#[derive(Clone, Debug, Default)]
pub struct Mesh {
    /// Flattened triangle list; every run of three indices is one triangle.
    pub indices: Vec<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct Material {
    pub name: String,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttribFormat {
    pub ty: AttribType,
    pub layout: AttribLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttribType {
    UNorm,
    SNorm,
    UInt,
    SInt,
    Float,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttribLayout {
    Bits8,
    Bits8x2,
    Bits8x4,
    Bits16,
    Bits16x2,
    Bits16x4,
    Bits32,
    Bits32x2,
    Bits32x3,
    Bits32x4,
    Bits10_10_10_2,
}

impl AttribLayout {
    fn widths(self) -> &'static [usize] {
        match self {
            AttribLayout::Bits8 => &[1],
            AttribLayout::Bits8x2 => &[1, 1],
            AttribLayout::Bits8x4 => &[1, 1, 1, 1],
            AttribLayout::Bits16 => &[2],
            AttribLayout::Bits16x2 => &[2, 2],
            AttribLayout::Bits16x4 => &[2, 2, 2, 2],
            AttribLayout::Bits32 => &[4],
            AttribLayout::Bits32x2 => &[4, 4],
            AttribLayout::Bits32x3 => &[4, 4, 4],
            AttribLayout::Bits32x4 => &[4, 4, 4, 4],
            AttribLayout::Bits10_10_10_2 => &[4],
        }
    }

    pub fn byte_size(self) -> usize {
        self.widths().iter().sum()
    }
}

impl AttribFormat {
    /// Decodes the on-disk format code. The low byte selects the component
    /// layout, the second byte the component type.
    pub fn from_code(code: u32) -> io::Result<AttribFormat> {
        let layout = match code & 0xFF {
            0x02 => AttribLayout::Bits8,
            0x09 => AttribLayout::Bits8x2,
            0x0A => AttribLayout::Bits16,
            0x0B => AttribLayout::Bits8x4,
            0x0E => AttribLayout::Bits10_10_10_2,
            0x12 => AttribLayout::Bits16x2,
            0x14 => AttribLayout::Bits32,
            0x15 => AttribLayout::Bits16x4,
            0x17 => AttribLayout::Bits32x2,
            0x18 => AttribLayout::Bits32x3,
            0x19 => AttribLayout::Bits32x4,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown attribute layout in format {:#010x}", code),
                ));
            }
        };
        let ty = match (code >> 8) & 0xFF {
            0x01 => AttribType::UNorm,
            0x02 => AttribType::SNorm,
            0x03 | 0x08 => AttribType::UInt,
            0x04 | 0x0A => AttribType::SInt,
            0x05 => AttribType::Float,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown attribute type in format {:#010x}", code),
                ));
            }
        };
        if ty == AttribType::Float && !matches!(
            layout,
            AttribLayout::Bits16 | AttribLayout::Bits16x2 | AttribLayout::Bits16x4
                | AttribLayout::Bits32 | AttribLayout::Bits32x2
                | AttribLayout::Bits32x3 | AttribLayout::Bits32x4,
        ) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("float attribute with integer layout in format {:#010x}", code),
            ));
        }
        Ok(AttribFormat { ty, layout })
    }

    pub fn byte_size(self) -> usize {
        self.layout.byte_size()
    }

    /// Widens one sample to four float components. Components absent from
    /// the layout are zero.
    pub fn decode(self, bytes: &[u8]) -> [f32; 4] {
        let mut out = [0.; 4];
        if self.layout == AttribLayout::Bits10_10_10_2 {
            let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            for i in 0 .. 3 {
                out[i] = self.convert_packed((v >> (10 * i)) & 0x3FF, 10);
            }
            out[3] = self.convert_packed(v >> 30, 2);
            return out;
        }

        let mut pos = 0;
        for (i, &width) in self.layout.widths().iter().enumerate() {
            let b = &bytes[pos .. pos + width];
            out[i] = match width {
                1 => self.convert8(b[0]),
                2 => self.convert16(u16::from_le_bytes([b[0], b[1]])),
                _ => self.convert32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            };
            pos += width;
        }
        out
    }

    fn convert8(self, v: u8) -> f32 {
        match self.ty {
            AttribType::UNorm => v as f32 / 255.,
            AttribType::SNorm => (v as i8 as f32 / 127.).max(-1.),
            AttribType::UInt => v as f32,
            AttribType::SInt => v as i8 as f32,
            AttribType::Float => unreachable!("rejected in from_code"),
        }
    }

    fn convert16(self, v: u16) -> f32 {
        match self.ty {
            AttribType::UNorm => v as f32 / 65535.,
            AttribType::SNorm => (v as i16 as f32 / 32767.).max(-1.),
            AttribType::UInt => v as f32,
            AttribType::SInt => v as i16 as f32,
            AttribType::Float => half::f16::from_bits(v).to_f32(),
        }
    }

    fn convert32(self, v: u32) -> f32 {
        match self.ty {
            AttribType::UNorm => v as f32 / u32::MAX as f32,
            AttribType::SNorm => (v as i32 as f32 / i32::MAX as f32).max(-1.),
            AttribType::UInt => v as f32,
            AttribType::SInt => v as i32 as f32,
            AttribType::Float => f32::from_bits(v),
        }
    }

    fn convert_packed(self, v: u32, bits: u32) -> f32 {
        let max = (1u32 << (bits - 1)) as f32 - 1.;
        match self.ty {
            AttribType::UNorm => v as f32 / ((1u32 << bits) - 1) as f32,
            AttribType::UInt => v as f32,
            _ => {
                let signed = ((v << (32 - bits)) as i32) >> (32 - bits);
                match self.ty {
                    AttribType::SNorm => (signed as f32 / max).max(-1.),
                    _ => signed as f32,
                }
            }
        }
    }
}

impl VertexBuffer {
    /// Decodes one attribute stream into one `[f32; 4]` sample per vertex.
    pub fn attrib_data(
        &self,
        attrib: &VertexAttrib,
        order: ByteOrder,
    ) -> io::Result<Vec<[f32; 4]>> {
        if order == ByteOrder::Big {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "big-endian vertex buffers are not supported",
            ));
        }
        let buffer = self.buffers.get(attrib.buffer_index as usize)
            .ok_or_else(|| io::Error::new(
                io::ErrorKind::InvalidData,
                format!("attribute {} references missing buffer {}",
                    attrib.name, attrib.buffer_index),
            ))?;

        let sample_size = attrib.format.byte_size();
        let mut out = Vec::with_capacity(self.vertex_count as usize);
        for i in 0 .. self.vertex_count as usize {
            let start = i * buffer.stride as usize + attrib.offset as usize;
            let bytes = buffer.data.get(start .. start + sample_size)
                .ok_or_else(|| io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("attribute {} reads past the end of buffer {}",
                        attrib.name, attrib.buffer_index),
                ))?;
            out.push(attrib.format.decode(bytes));
        }
        Ok(out)
    }
}


const FMDL_SIZE: u64 = 0x70;
const BONE_SIZE: u64 = 0x58;
const FVTX_SIZE: u64 = 0x50;
const ATTRIB_SIZE: u64 = 0x10;
const BUFFER_INFO_ENTRY_SIZE: u64 = 0x10;
const FSHP_SIZE: u64 = 0x60;
const MESH_SIZE: u64 = 0x38;
const FMAT_SIZE: u64 = 0xB8;

const PRIM_TYPE_TRIANGLES: u32 = 0x03;

const INDEX_FORMAT_U8: u32 = 0;
const INDEX_FORMAT_U16: u32 = 1;
const INDEX_FORMAT_U32: u32 = 2;


pub struct FresFile<T> {
    file: T,
}

struct Header {
    name_offset: u64,
    model_array_offset: u64,
    model_dict_offset: u64,
    buffer_data_offset: u64,
    byte_order: ByteOrder,
}

impl<T: Read + Seek> FresFile<T> {
    pub fn new(file: T) -> FresFile<T> {
        FresFile { file }
    }

    pub fn unwrap(self) -> T {
        self.file
    }

    pub fn read_res_file(&mut self) -> io::Result<ResFile> {
        let header = self.read_header()?;
        let name = self.file.read_len_str_at(header.name_offset)?;

        let model_count = self.read_dict_count(header.model_dict_offset)?;
        let mut models = Vec::with_capacity(model_count);
        for i in 0 .. model_count {
            let offset = header.model_array_offset + i as u64 * FMDL_SIZE;
            models.push(self.read_model(offset, &header)?);
        }

        Ok(ResFile {
            name,
            byte_order: header.byte_order,
            models,
        })
    }

    fn read_header(&mut self) -> io::Result<Header> {
        self.file.seek(SeekFrom::Start(0))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FRES" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "not a BFRES file: bad magic",
            ));
        }
        let _padding: u32 = self.file.read_one()?;
        let _version: u32 = self.file.read_one()?;
        let bom: u16 = self.file.read_one()?;
        let byte_order = match bom {
            0xFEFF => ByteOrder::Little,
            0xFFFE => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "big-endian (Wii U) containers are not supported",
                ));
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad byte order mark {:#06x}", bom),
                ));
            }
        };
        let _alignment: u8 = self.file.read_one()?;
        let _target_addr_size: u8 = self.file.read_one()?;
        let _file_name_offset: u32 = self.file.read_one()?;
        let _flags: u16 = self.file.read_one()?;
        let _block_offset: u16 = self.file.read_one()?;
        let _relocation_table_offset: u32 = self.file.read_one()?;
        let _file_size: u32 = self.file.read_one()?;

        let name_offset: u64 = self.file.read_one()?;
        let model_array_offset: u64 = self.file.read_one()?;
        let model_dict_offset: u64 = self.file.read_one()?;
        // Animation section offsets (skeletal, material, bone visibility,
        // shape, scene), unused by the converter.
        let _anim_offsets: [u64; 10] = self.file.read_one()?;
        let _memory_pool_offset: u64 = self.file.read_one()?;
        let buffer_info_offset: u64 = self.file.read_one()?;

        let buffer_data_offset = if buffer_info_offset != 0 {
            self.file.seek(SeekFrom::Start(buffer_info_offset))?;
            let _flags: u32 = self.file.read_one()?;
            let _size: u32 = self.file.read_one()?;
            self.file.read_one()?
        } else {
            0
        };

        Ok(Header {
            name_offset,
            model_array_offset,
            model_dict_offset,
            buffer_data_offset,
            byte_order,
        })
    }

    /// Dictionaries carry an entry count alongside their radix tree; the
    /// tree itself is a lookup accelerator and is not needed for linear
    /// reads, so only the count is consumed.
    fn read_dict_count(&mut self, offset: u64) -> io::Result<usize> {
        if offset == 0 {
            return Ok(0);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"_DIC" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad dictionary magic",
            ));
        }
        let count: u32 = self.file.read_one()?;
        Ok(count as usize)
    }

    fn read_model(&mut self, offset: u64, header: &Header) -> io::Result<Model> {
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FMDL" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad model magic",
            ));
        }
        let _reserved: u32 = self.file.read_one()?;
        let name_offset: u64 = self.file.read_one()?;
        let _path_offset: u64 = self.file.read_one()?;
        let skeleton_offset: u64 = self.file.read_one()?;
        let vertex_buffer_array_offset: u64 = self.file.read_one()?;
        let shape_array_offset: u64 = self.file.read_one()?;
        let _shape_dict_offset: u64 = self.file.read_one()?;
        let material_array_offset: u64 = self.file.read_one()?;
        let _material_dict_offset: u64 = self.file.read_one()?;
        let _user_data_array_offset: u64 = self.file.read_one()?;
        let _user_data_dict_offset: u64 = self.file.read_one()?;
        let _user_pointer: u64 = self.file.read_one()?;
        let vertex_buffer_count: u16 = self.file.read_one()?;
        let shape_count: u16 = self.file.read_one()?;
        let material_count: u16 = self.file.read_one()?;

        let name = self.file.read_len_str_at(name_offset)?;

        if skeleton_offset == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("model {} has no skeleton", name),
            ));
        }
        let skeleton = self.read_skeleton(skeleton_offset)?;

        let mut vertex_buffers = Vec::with_capacity(vertex_buffer_count as usize);
        for i in 0 .. vertex_buffer_count {
            let offset = vertex_buffer_array_offset + i as u64 * FVTX_SIZE;
            vertex_buffers.push(self.read_vertex_buffer(offset, header)?);
        }

        let mut shapes = Vec::with_capacity(shape_count as usize);
        for i in 0 .. shape_count {
            let offset = shape_array_offset + i as u64 * FSHP_SIZE;
            shapes.push(self.read_shape(offset, header)?);
        }

        let mut materials = Vec::with_capacity(material_count as usize);
        for i in 0 .. material_count {
            let offset = material_array_offset + i as u64 * FMAT_SIZE;
            materials.push(self.read_material(offset)?);
        }

        Ok(Model { name, skeleton, vertex_buffers, shapes, materials })
    }

    fn read_skeleton(&mut self, offset: u64) -> io::Result<Skeleton> {
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FSKL" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad skeleton magic",
            ));
        }
        let _flags: u32 = self.file.read_one()?;
        let _bone_dict_offset: u64 = self.file.read_one()?;
        let bone_array_offset: u64 = self.file.read_one()?;
        let matrix_to_bone_list_offset: u64 = self.file.read_one()?;
        let _inverse_model_matrices_offset: u64 = self.file.read_one()?;
        let _user_pointer: u64 = self.file.read_one()?;
        let bone_count: u16 = self.file.read_one()?;
        let smooth_matrix_count: u16 = self.file.read_one()?;
        let rigid_matrix_count: u16 = self.file.read_one()?;

        let mut bones = Vec::with_capacity(bone_count as usize);
        for i in 0 .. bone_count {
            let offset = bone_array_offset + i as u64 * BONE_SIZE;
            bones.push(self.read_bone(offset)?);
        }

        // The transform resolver walks parent chains by index; reject
        // references outside the bone list here so it never has to.
        for bone in &bones {
            if bone.parent_index >= 0 && bone.parent_index as usize >= bones.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bone {} has out-of-range parent index {}",
                        bone.name, bone.parent_index),
                ));
            }
        }

        let matrix_count = smooth_matrix_count as usize + rigid_matrix_count as usize;
        let matrix_to_bone_list = if matrix_to_bone_list_offset != 0 {
            self.file.read_many_at(matrix_to_bone_list_offset, matrix_count)?
        } else {
            Vec::new()
        };

        Ok(Skeleton { bones, matrix_to_bone_list })
    }

    fn read_bone(&mut self, offset: u64) -> io::Result<Bone> {
        self.file.seek(SeekFrom::Start(offset))?;
        let name_offset: u64 = self.file.read_one()?;
        let _user_data_array_offset: u64 = self.file.read_one()?;
        let _user_data_dict_offset: u64 = self.file.read_one()?;
        let _reserved: u64 = self.file.read_one()?;
        let _index: u16 = self.file.read_one()?;
        let parent_index: i16 = self.file.read_one()?;
        let smooth_matrix_index: i16 = self.file.read_one()?;
        let rigid_matrix_index: i16 = self.file.read_one()?;
        let _billboard_index: i16 = self.file.read_one()?;
        let _user_data_count: u16 = self.file.read_one()?;
        let flags: u32 = self.file.read_one()?;
        let scale: [f32; 3] = self.file.read_one()?;
        let rotation: [f32; 4] = self.file.read_one()?;
        let position: [f32; 3] = self.file.read_one()?;

        let rotation_mode = if flags & BONE_FLAG_ROTATION_EULER != 0 {
            RotationMode::EulerXyz
        } else {
            RotationMode::Quaternion
        };

        Ok(Bone {
            name: self.file.read_len_str_at(name_offset)?,
            parent_index,
            smooth_matrix_index,
            rigid_matrix_index,
            rotation_mode,
            scale,
            rotation,
            position,
        })
    }

    fn read_vertex_buffer(&mut self, offset: u64, header: &Header) -> io::Result<VertexBuffer> {
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FVTX" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad vertex buffer magic",
            ));
        }
        let _reserved: u32 = self.file.read_one()?;
        let attrib_array_offset: u64 = self.file.read_one()?;
        let _attrib_dict_offset: u64 = self.file.read_one()?;
        let _memory_pool_offset: u64 = self.file.read_one()?;
        let _runtime_buffer_ptr: u64 = self.file.read_one()?;
        let _user_pointer: u64 = self.file.read_one()?;
        let buffer_size_array_offset: u64 = self.file.read_one()?;
        let buffer_stride_array_offset: u64 = self.file.read_one()?;
        let buffer_data_offset: u32 = self.file.read_one()?;
        let attrib_count: u8 = self.file.read_one()?;
        let buffer_count: u8 = self.file.read_one()?;
        let _index: u16 = self.file.read_one()?;
        let vertex_count: u32 = self.file.read_one()?;

        let mut attribs = Vec::with_capacity(attrib_count as usize);
        for i in 0 .. attrib_count {
            let offset = attrib_array_offset + i as u64 * ATTRIB_SIZE;
            attribs.push(self.read_attrib(offset)?);
        }

        let mut sizes = Vec::with_capacity(buffer_count as usize);
        let mut strides = Vec::with_capacity(buffer_count as usize);
        for i in 0 .. buffer_count as u64 {
            let size: u32 = self.file
                .read_one_at(buffer_size_array_offset + i * BUFFER_INFO_ENTRY_SIZE)?;
            sizes.push(size);
            let stride: u32 = self.file
                .read_one_at(buffer_stride_array_offset + i * BUFFER_INFO_ENTRY_SIZE)?;
            strides.push(stride);
        }

        let mut buffers = Vec::with_capacity(buffer_count as usize);
        let mut data_offset = header.buffer_data_offset + buffer_data_offset as u64;
        for i in 0 .. buffer_count as usize {
            self.file.seek(SeekFrom::Start(data_offset))?;
            let mut data = vec![0; sizes[i] as usize];
            self.file.read_exact(&mut data)?;
            buffers.push(DataBuffer { stride: strides[i] as u16, data });
            data_offset += sizes[i] as u64;
        }

        Ok(VertexBuffer { vertex_count, attribs, buffers })
    }

    fn read_attrib(&mut self, offset: u64) -> io::Result<VertexAttrib> {
        self.file.seek(SeekFrom::Start(offset))?;
        let name_offset: u64 = self.file.read_one()?;
        let format_code: u32 = self.file.read_one()?;
        let attrib_offset: u16 = self.file.read_one()?;
        let buffer_index: u16 = self.file.read_one()?;
        Ok(VertexAttrib {
            name: self.file.read_len_str_at(name_offset)?,
            format: AttribFormat::from_code(format_code)?,
            offset: attrib_offset,
            buffer_index,
        })
    }

    fn read_shape(&mut self, offset: u64, header: &Header) -> io::Result<Shape> {
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FSHP" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad shape magic",
            ));
        }
        let _flags: u32 = self.file.read_one()?;
        let name_offset: u64 = self.file.read_one()?;
        let _vertex_buffer_ptr: u64 = self.file.read_one()?;
        let mesh_array_offset: u64 = self.file.read_one()?;
        let skin_bone_index_array_offset: u64 = self.file.read_one()?;
        let _key_shape_array_offset: u64 = self.file.read_one()?;
        let _key_shape_dict_offset: u64 = self.file.read_one()?;
        let _bounding_box_array_offset: u64 = self.file.read_one()?;
        let _bounding_sphere_array_offset: u64 = self.file.read_one()?;
        let _user_pointer: u64 = self.file.read_one()?;
        let _index: u16 = self.file.read_one()?;
        let material_index: u16 = self.file.read_one()?;
        let bone_index: u16 = self.file.read_one()?;
        let vertex_buffer_index: u16 = self.file.read_one()?;
        let skin_bone_index_count: u16 = self.file.read_one()?;
        let vertex_skin_count: u8 = self.file.read_one()?;
        let mesh_count: u8 = self.file.read_one()?;

        let name = self.file.read_len_str_at(name_offset)?;

        let skin_bone_indices = if skin_bone_index_array_offset != 0 {
            self.file.read_many_at(
                skin_bone_index_array_offset,
                skin_bone_index_count as usize,
            )?
        } else {
            Vec::new()
        };

        let mut meshes = Vec::with_capacity(mesh_count as usize);
        for i in 0 .. mesh_count {
            let offset = mesh_array_offset + i as u64 * MESH_SIZE;
            meshes.push(self.read_mesh(offset, header)?);
        }

        Ok(Shape {
            name,
            material_index,
            bone_index,
            vertex_buffer_index,
            vertex_skin_count,
            skin_bone_indices,
            meshes,
        })
    }

    fn read_mesh(&mut self, offset: u64, header: &Header) -> io::Result<Mesh> {
        self.file.seek(SeekFrom::Start(offset))?;
        let _submesh_array_offset: u64 = self.file.read_one()?;
        let _memory_pool_offset: u64 = self.file.read_one()?;
        let _runtime_buffer_ptr: u64 = self.file.read_one()?;
        let _index_buffer_info_offset: u64 = self.file.read_one()?;
        let buffer_data_offset: u32 = self.file.read_one()?;
        let prim_type: u32 = self.file.read_one()?;
        let index_format: u32 = self.file.read_one()?;
        let index_count: u32 = self.file.read_one()?;
        let _first_vertex: u32 = self.file.read_one()?;

        if prim_type != PRIM_TYPE_TRIANGLES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported primitive type {}", prim_type),
            ));
        }

        let data_offset = header.buffer_data_offset + buffer_data_offset as u64;
        self.file.seek(SeekFrom::Start(data_offset))?;
        let n = index_count as usize;
        let indices = match index_format {
            INDEX_FORMAT_U8 =>
                self.file.read_many::<u8>(n)?.into_iter().map(|i| i as u32).collect(),
            INDEX_FORMAT_U16 =>
                self.file.read_many::<u16>(n)?.into_iter().map(|i| i as u32).collect(),
            INDEX_FORMAT_U32 =>
                self.file.read_many::<u32>(n)?,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported index format {}", index_format),
                ));
            }
        };

        Ok(Mesh { indices })
    }

    fn read_material(&mut self, offset: u64) -> io::Result<Material> {
        self.file.seek(SeekFrom::Start(offset))?;
        let magic: [u8; 4] = self.file.read_one()?;
        if &magic != b"FMAT" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad material magic",
            ));
        }
        let _flags: u32 = self.file.read_one()?;
        let name_offset: u64 = self.file.read_one()?;
        Ok(Material {
            name: self.file.read_len_str_at(name_offset)?,
        })
    }
}

const BONE_FLAG_ROTATION_EULER: u32 = 0x1000;


#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use super::*;

    fn format(code: u32) -> AttribFormat {
        AttribFormat::from_code(code).unwrap()
    }

    #[test]
    fn test_decode_float32x3() {
        let f = format(0x0518);
        assert_eq!(f.byte_size(), 12);
        let mut bytes = Vec::new();
        for v in &[1.5f32, -2.0, 0.25] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(f.decode(&bytes), [1.5, -2.0, 0.25, 0.]);
    }

    #[test]
    fn test_decode_unorm8x4() {
        let f = format(0x010B);
        assert_eq!(f.decode(&[0, 255, 51, 255]), [0., 1., 0.2, 1.]);
    }

    #[test]
    fn test_decode_snorm16x4() {
        let f = format(0x0215);
        let bytes = [
            0x00, 0x00,             // 0
            0xFF, 0x7F,             // 32767 -> 1.0
            0x01, 0x80,             // -32767 -> -1.0
            0x00, 0x80,             // -32768 clamps to -1.0
        ];
        let v = f.decode(&bytes);
        assert_eq!(v[0], 0.);
        assert_eq!(v[1], 1.);
        assert_eq!(v[2], -1.);
        assert_eq!(v[3], -1.);
    }

    #[test]
    fn test_decode_half4() {
        let f = format(0x0515);
        let one = half::f16::from_f32(1.0).to_bits().to_le_bytes();
        let half_ = half::f16::from_f32(0.5).to_bits().to_le_bytes();
        let bytes = [one[0], one[1], half_[0], half_[1], 0, 0, 0, 0];
        assert_eq!(f.decode(&bytes), [1.0, 0.5, 0., 0.]);
    }

    #[test]
    fn test_decode_uint8_blend_indices() {
        let f = format(0x030B);
        assert_eq!(f.decode(&[3, 7, 0, 200]), [3., 7., 0., 200.]);
    }

    #[test]
    fn test_decode_snorm_10_10_10_2() {
        let f = format(0x020E);
        // x = 511 (max), y = -511, z = 0, w = 1
        let x = 511u32;
        let y = (-511i32 as u32) & 0x3FF;
        let packed = x | (y << 10) | (1 << 30);
        let v = f.decode(&packed.to_le_bytes());
        assert!((v[0] - 1.0).abs() < 1e-6);
        assert!((v[1] + 1.0).abs() < 1e-6);
        assert_eq!(v[2], 0.);
        assert_eq!(v[3], 1.);
    }

    #[test]
    fn test_unknown_format_code() {
        assert!(AttribFormat::from_code(0x0701).is_err());
        assert!(AttribFormat::from_code(0x05FF).is_err());
    }

    #[test]
    fn test_attrib_data_respects_stride_and_offset() {
        let buffer = VertexBuffer {
            vertex_count: 2,
            attribs: Vec::new(),
            buffers: vec![DataBuffer {
                stride: 8,
                data: vec![
                    0, 0, 10, 20, 0, 0, 0, 0,
                    0, 0, 30, 40, 0, 0, 0, 0,
                ],
            }],
        };
        let attrib = VertexAttrib {
            name: "_u0".to_owned(),
            format: format(0x0309),
            offset: 2,
            buffer_index: 0,
        };
        let data = buffer.attrib_data(&attrib, ByteOrder::Little).unwrap();
        assert_eq!(data, vec![[10., 20., 0., 0.], [30., 40., 0., 0.]]);
    }

    #[test]
    fn test_attrib_data_out_of_range() {
        let buffer = VertexBuffer {
            vertex_count: 3,
            attribs: Vec::new(),
            buffers: vec![DataBuffer { stride: 4, data: vec![0; 8] }],
        };
        let attrib = VertexAttrib {
            name: "_p0".to_owned(),
            format: format(0x0514),
            offset: 0,
            buffer_index: 0,
        };
        assert!(buffer.attrib_data(&attrib, ByteOrder::Little).is_err());
    }

    #[test]
    fn test_bad_magic() {
        let mut f = FresFile::new(Cursor::new(b"NOPE\0\0\0\0\0\0\0\0\0\0\0\0".to_vec()));
        assert!(f.read_res_file().is_err());
    }
}

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use byteorder::{WriteBytesExt, LE};

const CAST_MAGIC: u32 = 0x7473_6163;
const CAST_VERSION: u32 = 1;

/// Node header: identifier, byte size, hash, property count, child count.
const NODE_HEADER_SIZE: usize = 24;
/// Property header: type tag, name length, array length.
const PROPERTY_HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeId {
    Root,
    Model,
    Skeleton,
    Bone,
    Mesh,
    Material,
}

impl NodeId {
    /// The four-character tag stored in the file.
    pub fn tag(self) -> u32 {
        let bytes: &[u8; 4] = match self {
            NodeId::Root => b"root",
            NodeId::Model => b"modl",
            NodeId::Skeleton => b"skel",
            NodeId::Bone => b"bone",
            NodeId::Mesh => b"mesh",
            NodeId::Material => b"matl",
        };
        u32::from_le_bytes(*bytes)
    }
}

#[derive(Clone, Debug)]
pub enum PropertyValue {
    Byte(u8),
    Short(u16),
    Int(u32),
    Long(u64),
    Float(f32),
    String(String),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    ByteArray(Vec<u8>),
    ShortArray(Vec<u16>),
    IntArray(Vec<u32>),
    FloatArray(Vec<f32>),
    Vec2Array(Vec<[f32; 2]>),
    Vec3Array(Vec<[f32; 3]>),
    Vec4Array(Vec<[f32; 4]>),
}

impl PropertyValue {
    fn type_tag(&self) -> u16 {
        match self {
            PropertyValue::Byte(_) | PropertyValue::ByteArray(_) => b'b' as u16,
            PropertyValue::Short(_) | PropertyValue::ShortArray(_) => b'h' as u16,
            PropertyValue::Int(_) | PropertyValue::IntArray(_) => b'i' as u16,
            PropertyValue::Long(_) => b'l' as u16,
            PropertyValue::Float(_) | PropertyValue::FloatArray(_) => b'f' as u16,
            PropertyValue::String(_) => b's' as u16,
            PropertyValue::Vec2Array(_) => u16::from_le_bytes(*b"2v"),
            PropertyValue::Vec3(_) | PropertyValue::Vec3Array(_) => u16::from_le_bytes(*b"3v"),
            PropertyValue::Vec4(_) | PropertyValue::Vec4Array(_) => u16::from_le_bytes(*b"4v"),
        }
    }

    fn array_length(&self) -> u32 {
        match self {
            PropertyValue::ByteArray(v) => v.len() as u32,
            PropertyValue::ShortArray(v) => v.len() as u32,
            PropertyValue::IntArray(v) => v.len() as u32,
            PropertyValue::FloatArray(v) => v.len() as u32,
            PropertyValue::Vec2Array(v) => v.len() as u32,
            PropertyValue::Vec3Array(v) => v.len() as u32,
            PropertyValue::Vec4Array(v) => v.len() as u32,
            _ => 1,
        }
    }

    fn payload_size(&self) -> usize {
        match self {
            PropertyValue::Byte(_) => 1,
            PropertyValue::Short(_) => 2,
            PropertyValue::Int(_) => 4,
            PropertyValue::Long(_) => 8,
            PropertyValue::Float(_) => 4,
            PropertyValue::String(s) => s.len() + 1,
            PropertyValue::Vec3(_) => 12,
            PropertyValue::Vec4(_) => 16,
            PropertyValue::ByteArray(v) => v.len(),
            PropertyValue::ShortArray(v) => v.len() * 2,
            PropertyValue::IntArray(v) => v.len() * 4,
            PropertyValue::FloatArray(v) => v.len() * 4,
            PropertyValue::Vec2Array(v) => v.len() * 8,
            PropertyValue::Vec3Array(v) => v.len() * 12,
            PropertyValue::Vec4Array(v) => v.len() * 16,
        }
    }

    fn write_payload<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            PropertyValue::Byte(v) => w.write_u8(*v),
            PropertyValue::Short(v) => w.write_u16::<LE>(*v),
            PropertyValue::Int(v) => w.write_u32::<LE>(*v),
            PropertyValue::Long(v) => w.write_u64::<LE>(*v),
            PropertyValue::Float(v) => w.write_f32::<LE>(*v),
            PropertyValue::String(s) => {
                w.write_all(s.as_bytes())?;
                w.write_u8(0)
            }
            PropertyValue::Vec3(v) => write_floats(w, v),
            PropertyValue::Vec4(v) => write_floats(w, v),
            PropertyValue::ByteArray(v) => w.write_all(v),
            PropertyValue::ShortArray(v) => {
                for &x in v {
                    w.write_u16::<LE>(x)?;
                }
                Ok(())
            }
            PropertyValue::IntArray(v) => {
                for &x in v {
                    w.write_u32::<LE>(x)?;
                }
                Ok(())
            }
            PropertyValue::FloatArray(v) => write_floats(w, v),
            PropertyValue::Vec2Array(v) => {
                for x in v {
                    write_floats(w, x)?;
                }
                Ok(())
            }
            PropertyValue::Vec3Array(v) => {
                for x in v {
                    write_floats(w, x)?;
                }
                Ok(())
            }
            PropertyValue::Vec4Array(v) => {
                for x in v {
                    write_floats(w, x)?;
                }
                Ok(())
            }
        }
    }
}

fn write_floats<W: Write>(w: &mut W, v: &[f32]) -> io::Result<()> {
    for &x in v {
        w.write_f32::<LE>(x)?;
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct CastProperty {
    pub name: String,
    pub value: PropertyValue,
}

impl CastProperty {
    fn byte_size(&self) -> usize {
        PROPERTY_HEADER_SIZE + self.name.len() + self.value.payload_size()
    }

    fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.value.type_tag())?;
        w.write_u16::<LE>(self.name.len() as u16)?;
        w.write_u32::<LE>(self.value.array_length())?;
        w.write_all(self.name.as_bytes())?;
        self.value.write_payload(w)
    }
}

/// A node of the output scene tree. Identity for cross-referencing (a mesh
/// naming its material) is the content hash, never a pointer or index.
#[derive(Clone, Debug)]
pub struct CastNode {
    pub identifier: NodeId,
    pub hash: u64,
    pub properties: Vec<CastProperty>,
    pub children: Vec<CastNode>,
}

impl CastNode {
    pub fn new(identifier: NodeId) -> CastNode {
        CastNode {
            identifier,
            hash: 0,
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    /// A node whose hash is derived from its name at construction time.
    pub fn hashed(identifier: NodeId, name: &str) -> CastNode {
        CastNode {
            identifier,
            hash: fnv1a64(name.as_bytes()),
            properties: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn add_value(&mut self, name: &str, value: PropertyValue) {
        self.properties.push(CastProperty {
            name: name.to_owned(),
            value,
        });
    }

    pub fn add_string(&mut self, name: &str, value: &str) {
        self.add_value(name, PropertyValue::String(value.to_owned()));
    }

    pub fn push_child(&mut self, child: CastNode) {
        self.children.push(child);
    }

    pub fn byte_size(&self) -> usize {
        NODE_HEADER_SIZE
            + self.properties.iter().map(|p| p.byte_size()).sum::<usize>()
            + self.children.iter().map(|c| c.byte_size()).sum::<usize>()
    }

    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.identifier.tag())?;
        w.write_u32::<LE>(self.byte_size() as u32)?;
        w.write_u64::<LE>(self.hash)?;
        w.write_u32::<LE>(self.properties.len() as u32)?;
        w.write_u32::<LE>(self.children.len() as u32)?;
        for p in &self.properties {
            p.write(w)?;
        }
        for c in &self.children {
            c.write(w)?;
        }
        Ok(())
    }
}

/// Serialize a single-root scene to a file.
pub fn write_file(path: &Path, root: &CastNode) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LE>(CAST_MAGIC)?;
    w.write_u32::<LE>(CAST_VERSION)?;
    w.write_u32::<LE>(1)?;
    w.write_u32::<LE>(0)?;
    root.write(&mut w)?;
    w.flush()
}

pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

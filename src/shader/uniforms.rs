//! CPU-side uniform state of a linked program.
//!
//! Block members are stored in a std140 byte image that is uploaded to the
//! device before every draw. Sampler slots store the texture unit they read.

use super::reflect::{BlockMember, GlslType};
use super::UniformError;
use bytemuck::bytes_of;
use std::fmt;

/// A value written into a uniform slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
    /// Texture unit index read by a sampler slot.
    TextureUnit(u32),
}

/// Semantic type of a uniform slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Sampler,
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Int(_) => UniformKind::Int,
            UniformValue::UInt(_) => UniformKind::UInt,
            UniformValue::Vec2(_) => UniformKind::Vec2,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Vec4(_) => UniformKind::Vec4,
            UniformValue::Mat4(_) => UniformKind::Mat4,
            UniformValue::TextureUnit(_) => UniformKind::Sampler,
        }
    }
}

impl UniformKind {
    /// Maps a block member type, if writable.
    pub fn from_glsl(ty: &GlslType) -> Option<Self> {
        match ty {
            GlslType::Float => Some(UniformKind::Float),
            GlslType::Int => Some(UniformKind::Int),
            GlslType::UInt => Some(UniformKind::UInt),
            GlslType::Vec(2) => Some(UniformKind::Vec2),
            GlslType::Vec(3) => Some(UniformKind::Vec3),
            GlslType::Vec(4) => Some(UniformKind::Vec4),
            GlslType::Mat4 => Some(UniformKind::Mat4),
            _ => None,
        }
    }

    /// std140 (size, alignment) in bytes.
    fn std140(self) -> (usize, usize) {
        match self {
            UniformKind::Float | UniformKind::Int | UniformKind::UInt => (4, 4),
            UniformKind::Vec2 => (8, 8),
            UniformKind::Vec3 => (12, 16),
            UniformKind::Vec4 => (16, 16),
            UniformKind::Mat4 => (64, 16),
            UniformKind::Sampler => (0, 1),
        }
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniformKind::Float => "float",
            UniformKind::Int => "int",
            UniformKind::UInt => "uint",
            UniformKind::Vec2 => "vec2",
            UniformKind::Vec3 => "vec3",
            UniformKind::Vec4 => "vec4",
            UniformKind::Mat4 => "mat4",
            UniformKind::Sampler => "texture unit",
        };
        f.write_str(name)
    }
}

/// A named member placed in the block's byte image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformSlot {
    pub name: String,
    pub kind: UniformKind,
    pub offset: usize,
}

/// std140 image of a single uniform block.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformBlock {
    slots: Vec<UniformSlot>,
    data: Vec<u8>,
}

impl UniformBlock {
    /// Lays out `members` with std140 rules.
    ///
    /// Members of unsupported types (arrays, booleans, structs) are rejected
    /// with a message naming the member.
    pub fn layout(members: &[BlockMember]) -> Result<Self, String> {
        let mut slots = Vec::with_capacity(members.len());
        let mut cursor = 0usize;
        for member in members {
            let kind = match (UniformKind::from_glsl(&member.ty), member.array) {
                (Some(kind), None) => kind,
                _ => {
                    return Err(format!(
                        "uniform `{}` has unsupported block type {}{}",
                        member.name,
                        member.ty,
                        member.array.map(|n| format!("[{n}]")).unwrap_or_default()
                    ))
                }
            };
            let (size, align) = kind.std140();
            cursor = align_to(cursor, align);
            slots.push(UniformSlot {
                name: member.name.clone(),
                kind,
                offset: cursor,
            });
            cursor += size;
        }
        // Uniform buffer bindings are sized in 16-byte rows.
        let size = align_to(cursor.max(16), 16);
        Ok(Self {
            slots,
            data: vec![0; size],
        })
    }

    pub fn slots(&self) -> &[UniformSlot] {
        &self.slots
    }

    pub fn slot(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Writes `value` into the slot named `name`.
    pub fn write(&mut self, name: &str, value: UniformValue) -> Result<(), UniformError> {
        let slot = self
            .slot(name)
            .ok_or_else(|| UniformError::Unknown { name: name.to_string() })?;
        check_kind(name, slot.kind, value)?;
        let offset = slot.offset;
        let bytes: &[u8] = match &value {
            UniformValue::Float(v) => bytes_of(v),
            UniformValue::Int(v) => bytes_of(v),
            UniformValue::UInt(v) => bytes_of(v),
            UniformValue::Vec2(v) => bytes_of(v),
            UniformValue::Vec3(v) => bytes_of(v),
            UniformValue::Vec4(v) => bytes_of(v),
            UniformValue::Mat4(v) => bytes_of(v),
            UniformValue::TextureUnit(_) => &[],
        };
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Reads back the current value of a slot.
    pub fn read(&self, name: &str) -> Option<UniformValue> {
        let slot = self.slot(name)?;
        let word = |i: usize| &self.data[slot.offset + i * 4..slot.offset + i * 4 + 4];
        let at = |i: usize| -> f32 { bytemuck::pod_read_unaligned(word(i)) };
        let value = match slot.kind {
            UniformKind::Float => UniformValue::Float(at(0)),
            UniformKind::Int => UniformValue::Int(bytemuck::pod_read_unaligned(word(0))),
            UniformKind::UInt => UniformValue::UInt(bytemuck::pod_read_unaligned(word(0))),
            UniformKind::Vec2 => UniformValue::Vec2(std::array::from_fn(at)),
            UniformKind::Vec3 => UniformValue::Vec3(std::array::from_fn(at)),
            UniformKind::Vec4 => UniformValue::Vec4(std::array::from_fn(at)),
            UniformKind::Mat4 => UniformValue::Mat4(std::array::from_fn(|col| {
                std::array::from_fn(|row| at(col * 4 + row))
            })),
            UniformKind::Sampler => return None,
        };
        Some(value)
    }
}

/// Rejects writes whose semantic type differs from the slot's.
pub(crate) fn check_kind(name: &str, expected: UniformKind, value: UniformValue) -> Result<(), UniformError> {
    if value.kind() == expected {
        Ok(())
    } else {
        Err(UniformError::TypeMismatch {
            name: name.to_string(),
            expected,
            found: value.kind(),
        })
    }
}

fn align_to(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str, ty: GlslType) -> BlockMember {
        BlockMember {
            name: name.to_string(),
            ty,
            array: None,
        }
    }

    #[test]
    fn std140_offsets() {
        let block = UniformBlock::layout(&[
            member("time", GlslType::Float),
            member("tint", GlslType::Vec(3)),
            member("scale", GlslType::Vec(2)),
            member("frame", GlslType::Int),
            member("model", GlslType::Mat4),
        ])
        .expect("layout");
        let offsets: Vec<_> = block.slots().iter().map(|s| s.offset).collect();
        assert_eq!(offsets, [0, 16, 32, 40, 48]);
        assert_eq!(block.bytes().len(), 112);
    }

    #[test]
    fn single_float_block_is_one_row() {
        let block = UniformBlock::layout(&[member("time", GlslType::Float)]).expect("layout");
        assert_eq!(block.bytes().len(), 16);
    }

    #[test]
    fn write_then_read() {
        let mut block = UniformBlock::layout(&[member("time", GlslType::Float), member("tint", GlslType::Vec(4))])
            .expect("layout");
        block.write("time", UniformValue::Float(1.5)).expect("write");
        block.write("tint", UniformValue::Vec4([0.1, 0.2, 0.3, 0.4])).expect("write");
        assert_eq!(block.read("time"), Some(UniformValue::Float(1.5)));
        assert_eq!(block.read("tint"), Some(UniformValue::Vec4([0.1, 0.2, 0.3, 0.4])));
        assert_eq!(&block.bytes()[0..4], &1.5_f32.to_ne_bytes());
    }

    #[test]
    fn mismatched_type_is_rejected_without_writing() {
        let mut block = UniformBlock::layout(&[member("time", GlslType::Float)]).expect("layout");
        let err = block.write("time", UniformValue::Int(3)).expect_err("mismatch");
        assert_eq!(
            err,
            UniformError::TypeMismatch {
                name: "time".into(),
                expected: UniformKind::Float,
                found: UniformKind::Int
            }
        );
        assert_eq!(block.read("time"), Some(UniformValue::Float(0.0)));
    }

    #[test]
    fn unknown_name_is_reported() {
        let mut block = UniformBlock::layout(&[member("time", GlslType::Float)]).expect("layout");
        assert_eq!(
            block.write("speed", UniformValue::Float(1.0)),
            Err(UniformError::Unknown { name: "speed".into() })
        );
    }

    #[test]
    fn arrays_are_unsupported() {
        let mut weights = member("weights", GlslType::Float);
        weights.array = Some(4);
        let err = UniformBlock::layout(&[weights]).expect_err("arrays unsupported");
        assert!(err.contains("weights"));
    }
}

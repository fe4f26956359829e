//! Vertex records and their attribute layouts.
//!
//! Every vertex type describes itself as an ordered list of
//! `(location, components, offset)` triples. The locations must line up with
//! the `layout(location = N) in ...` declarations of the vertex stage that
//! reads the buffer.

use bytemuck::{Pod, Zeroable};

/// One attribute of a vertex record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSlot {
    /// Shader input location (`layout(location = N)`).
    pub location: u32,
    /// Number of `f32` components (1 to 4).
    pub components: u32,
    /// Byte offset from the start of the record.
    pub offset: u64,
}

/// Fixed attribute layout of a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexLayout {
    /// Size of one record in bytes.
    pub stride: u64,
    pub attributes: &'static [AttributeSlot],
}

impl VertexLayout {
    /// Finds the attribute feeding `location`, if any.
    pub fn attribute(&self, location: u32) -> Option<&AttributeSlot> {
        self.attributes.iter().find(|a| a.location == location)
    }

    /// Converts the layout into wgpu attribute descriptors.
    pub fn wgpu_attributes(&self) -> Vec<wgpu::VertexAttribute> {
        self.attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                offset: a.offset,
                shader_location: a.location,
                format: float_format(a.components),
            })
            .collect()
    }
}

fn float_format(components: u32) -> wgpu::VertexFormat {
    match components {
        1 => wgpu::VertexFormat::Float32,
        2 => wgpu::VertexFormat::Float32x2,
        3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

/// A plain-old-data vertex record with a fixed layout.
pub trait Vertex: Pod {
    const LAYOUT: VertexLayout;
}

const F32: u64 = std::mem::size_of::<f32>() as u64;

/// Position only.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

impl Vertex for PositionVertex {
    const LAYOUT: VertexLayout = VertexLayout {
        stride: 3 * F32,
        attributes: &[AttributeSlot { location: 0, components: 3, offset: 0 }],
    };
}

/// Position plus RGBA color.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct ColorVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex for ColorVertex {
    const LAYOUT: VertexLayout = VertexLayout {
        stride: 7 * F32,
        attributes: &[
            AttributeSlot { location: 0, components: 3, offset: 0 },
            AttributeSlot { location: 1, components: 4, offset: 3 * F32 },
        ],
    };
}

/// Position, RGBA color and texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
    pub tex_coords: [f32; 2],
}

impl Vertex for TexturedVertex {
    const LAYOUT: VertexLayout = VertexLayout {
        stride: 9 * F32,
        attributes: &[
            AttributeSlot { location: 0, components: 3, offset: 0 },
            AttributeSlot { location: 1, components: 4, offset: 3 * F32 },
            AttributeSlot { location: 2, components: 2, offset: 7 * F32 },
        ],
    };
}

/// Indexed triangle list borrowed by a draw.
#[derive(Debug, Clone, Copy)]
pub struct Geometry<'a, V: Vertex> {
    pub vertices: &'a [V],
    pub indices: &'a [u16],
}

impl<'a, V: Vertex> Geometry<'a, V> {
    pub fn vertex_bytes(&self) -> &'a [u8] {
        bytemuck::cast_slice(self.vertices)
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

pub const TRIANGLE: Geometry<'static, PositionVertex> = Geometry {
    vertices: &[
        PositionVertex { position: [-0.5, -0.5, 0.0] },
        PositionVertex { position: [0.5, -0.5, 0.0] },
        PositionVertex { position: [0.0, 0.5, 0.0] },
    ],
    indices: &[0, 1, 2],
};

/// Square made of two triangles.
pub const SQUARE: Geometry<'static, PositionVertex> = Geometry {
    vertices: &[
        PositionVertex { position: [-0.5, -0.5, 0.0] }, // bottom left
        PositionVertex { position: [0.5, -0.5, 0.0] },  // bottom right
        PositionVertex { position: [0.5, 0.5, 0.0] },   // top right
        PositionVertex { position: [-0.5, 0.5, 0.0] },  // top left
    ],
    indices: &[0, 1, 2, 0, 2, 3],
};

pub const COLOR_SQUARE: Geometry<'static, ColorVertex> = Geometry {
    vertices: &[
        ColorVertex { position: [-0.5, -0.5, 0.0], color: [1.0, 0.0, 0.0, 1.0] },
        ColorVertex { position: [0.5, -0.5, 0.0], color: [0.0, 1.0, 0.0, 1.0] },
        ColorVertex { position: [0.5, 0.5, 0.0], color: [0.0, 0.0, 1.0, 1.0] },
        ColorVertex { position: [-0.5, 0.5, 0.0], color: [0.5, 0.5, 0.5, 1.0] },
    ],
    indices: &[0, 1, 2, 0, 2, 3],
};

pub const TEXTURED_SQUARE: Geometry<'static, TexturedVertex> = Geometry {
    vertices: &[
        TexturedVertex {
            position: [-0.5, -0.5, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
            tex_coords: [0.0, 0.0],
        },
        TexturedVertex {
            position: [0.5, -0.5, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
            tex_coords: [0.0, 1.0],
        },
        TexturedVertex {
            position: [0.5, 0.5, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
            tex_coords: [1.0, 1.0],
        },
        TexturedVertex {
            position: [-0.5, 0.5, 0.0],
            color: [0.5, 0.5, 0.5, 1.0],
            tex_coords: [1.0, 0.0],
        },
    ],
    indices: &[0, 1, 2, 0, 2, 3],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_layout_matches_record<V: Vertex>() {
        let layout = V::LAYOUT;
        assert_eq!(layout.stride as usize, std::mem::size_of::<V>());
        let mut end = 0;
        for slot in layout.attributes {
            assert_eq!(slot.offset, end, "attribute {} is not packed", slot.location);
            end = slot.offset + u64::from(slot.components) * F32;
        }
        assert_eq!(end, layout.stride);
    }

    #[test]
    fn layouts_match_record_sizes() {
        assert_layout_matches_record::<PositionVertex>();
        assert_layout_matches_record::<ColorVertex>();
        assert_layout_matches_record::<TexturedVertex>();
    }

    #[test]
    fn textured_layout_offsets() {
        let layout = TexturedVertex::LAYOUT;
        assert_eq!(layout.attribute(1).map(|a| a.offset), Some(12));
        assert_eq!(layout.attribute(2).map(|a| a.offset), Some(28));
        assert!(layout.attribute(3).is_none());
    }

    #[test]
    fn square_indices_stay_in_bounds() {
        for index in SQUARE.indices {
            assert!((*index as usize) < SQUARE.vertices.len());
        }
        assert_eq!(TEXTURED_SQUARE.index_count(), 6);
        assert_eq!(COLOR_SQUARE.vertex_bytes().len(), 4 * 28);
    }

    #[test]
    fn wgpu_attributes_use_float_formats() {
        let attrs = TexturedVertex::LAYOUT.wgpu_attributes();
        assert_eq!(attrs[0].format, wgpu::VertexFormat::Float32x3);
        assert_eq!(attrs[1].format, wgpu::VertexFormat::Float32x4);
        assert_eq!(attrs[2].format, wgpu::VertexFormat::Float32x2);
    }
}

//! Interface reflection for compiled stages.
//!
//! The link step needs each stage's declared interface by name: inputs and
//! outputs with their locations, the uniform block and the texture/sampler
//! bindings. All of it is read from the validated naga module, so the
//! preprocessor has already run. Only the `#version` check looks at text.

use naga::{AddressSpace, ArraySize, Binding, ImageClass, ImageDimension, ScalarKind, TypeInner, VectorSize};
use std::fmt;

/// GLSL types the pipeline knows how to reason about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlslType {
    Float,
    Int,
    UInt,
    Bool,
    Vec(u8),
    IVec(u8),
    UVec(u8),
    Mat4,
    Texture2D,
    Sampler,
    Other(String),
}

impl GlslType {
    fn from_naga(module: &naga::Module, ty: naga::Handle<naga::Type>) -> Self {
        let size = |s: VectorSize| match s {
            VectorSize::Bi => 2,
            VectorSize::Tri => 3,
            VectorSize::Quad => 4,
        };
        match &module.types[ty].inner {
            TypeInner::Scalar(scalar) => match scalar.kind {
                ScalarKind::Float => GlslType::Float,
                ScalarKind::Sint => GlslType::Int,
                ScalarKind::Uint => GlslType::UInt,
                ScalarKind::Bool => GlslType::Bool,
                other => GlslType::Other(format!("{other:?}")),
            },
            TypeInner::Vector { size: n, scalar } => match scalar.kind {
                ScalarKind::Float => GlslType::Vec(size(*n)),
                ScalarKind::Sint => GlslType::IVec(size(*n)),
                ScalarKind::Uint => GlslType::UVec(size(*n)),
                other => GlslType::Other(format!("{other:?}{}", size(*n))),
            },
            TypeInner::Matrix {
                columns: VectorSize::Quad,
                rows: VectorSize::Quad,
                scalar,
            } if scalar.kind == ScalarKind::Float => GlslType::Mat4,
            TypeInner::Image {
                dim: ImageDimension::D2,
                arrayed: false,
                class: ImageClass::Sampled { multi: false, .. },
            } => GlslType::Texture2D,
            TypeInner::Sampler { comparison: false } => GlslType::Sampler,
            other => GlslType::Other(module.types[ty].name.clone().unwrap_or_else(|| format!("{other:?}"))),
        }
    }

    /// Number of float components when used as a vertex input.
    pub fn float_components(&self) -> Option<u32> {
        match self {
            GlslType::Float => Some(1),
            GlslType::Vec(n) => Some(u32::from(*n)),
            _ => None,
        }
    }
}

impl fmt::Display for GlslType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlslType::Float => f.write_str("float"),
            GlslType::Int => f.write_str("int"),
            GlslType::UInt => f.write_str("uint"),
            GlslType::Bool => f.write_str("bool"),
            GlslType::Vec(n) => write!(f, "vec{n}"),
            GlslType::IVec(n) => write!(f, "ivec{n}"),
            GlslType::UVec(n) => write!(f, "uvec{n}"),
            GlslType::Mat4 => f.write_str("mat4"),
            GlslType::Texture2D => f.write_str("texture2D"),
            GlslType::Sampler => f.write_str("sampler"),
            GlslType::Other(name) => f.write_str(name),
        }
    }
}

/// The `#version` directive of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDirective {
    pub number: u32,
    pub profile: Option<String>,
}

/// A user-defined stage input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceVariable {
    pub name: String,
    pub ty: GlslType,
    pub location: u32,
}

/// One member of a uniform block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMember {
    pub name: String,
    pub ty: GlslType,
    /// Array length when declared as `name[N]`.
    pub array: Option<u32>,
}

/// A `uniform Name { ... } instance;` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformBlockDecl {
    pub block_name: String,
    pub instance: Option<String>,
    pub set: u32,
    pub binding: u32,
    pub members: Vec<BlockMember>,
}

/// An opaque `uniform texture2D` / `uniform sampler` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueUniform {
    pub name: String,
    pub ty: GlslType,
    pub set: u32,
    pub binding: u32,
}

/// Everything a stage declares at top level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageInterface {
    pub inputs: Vec<InterfaceVariable>,
    pub outputs: Vec<InterfaceVariable>,
    pub blocks: Vec<UniformBlockDecl>,
    pub opaque: Vec<OpaqueUniform>,
    /// Non-opaque uniforms declared outside a block.
    pub loose_uniforms: Vec<InterfaceVariable>,
}

/// Collects the interface of the module's entry point and its resources.
pub fn reflect(module: &naga::Module) -> StageInterface {
    let mut interface = StageInterface::default();

    if let Some(entry) = module.entry_points.first() {
        for argument in &entry.function.arguments {
            if let Some(variable) = located(module, argument.name.as_deref(), argument.ty, argument.binding.as_ref()) {
                interface.inputs.push(variable);
            }
        }
        if let Some(result) = &entry.function.result {
            match &module.types[result.ty].inner {
                TypeInner::Struct { members, .. } => {
                    for member in members {
                        if let Some(variable) = located(module, member.name.as_deref(), member.ty, member.binding.as_ref())
                        {
                            interface.outputs.push(variable);
                        }
                    }
                }
                _ => {
                    if let Some(variable) = located(module, None, result.ty, result.binding.as_ref()) {
                        interface.outputs.push(variable);
                    }
                }
            }
        }
    }

    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let name = global.name.clone().unwrap_or_default();
        match global.space {
            AddressSpace::Uniform => match &module.types[global.ty].inner {
                TypeInner::Struct { members, .. } => interface.blocks.push(UniformBlockDecl {
                    block_name: module.types[global.ty].name.clone().unwrap_or_else(|| name.clone()),
                    instance: global.name.clone(),
                    set: binding.group,
                    binding: binding.binding,
                    members: members.iter().map(|m| block_member(module, m)).collect(),
                }),
                _ => interface.loose_uniforms.push(InterfaceVariable {
                    name,
                    ty: GlslType::from_naga(module, global.ty),
                    location: binding.binding,
                }),
            },
            AddressSpace::Handle => interface.opaque.push(OpaqueUniform {
                name,
                ty: GlslType::from_naga(module, global.ty),
                set: binding.group,
                binding: binding.binding,
            }),
            _ => {}
        }
    }
    interface
}

/// A user varying; built-ins have no location and are skipped.
fn located(
    module: &naga::Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
) -> Option<InterfaceVariable> {
    match binding? {
        Binding::Location { location, .. } => Some(InterfaceVariable {
            name: name.unwrap_or_default().to_string(),
            ty: GlslType::from_naga(module, ty),
            location: *location,
        }),
        Binding::BuiltIn(_) => None,
    }
}

fn block_member(module: &naga::Module, member: &naga::StructMember) -> BlockMember {
    let (ty, array) = match &module.types[member.ty].inner {
        TypeInner::Array {
            base,
            size: ArraySize::Constant(len),
            ..
        } => (GlslType::from_naga(module, *base), Some(len.get())),
        _ => (GlslType::from_naga(module, member.ty), None),
    };
    BlockMember {
        name: member.name.clone().unwrap_or_default(),
        ty,
        array,
    }
}

/// Returns the first directive of the source if it is `#version`.
///
/// Only blank lines and comments may precede the directive.
pub fn leading_version(source: &str) -> Option<VersionDirective> {
    let stripped = strip_comments(source);
    let first = stripped.lines().map(str::trim).find(|l| !l.is_empty())?;
    let rest = first.strip_prefix('#')?.trim_start().strip_prefix("version")?;
    let mut words = rest.split_whitespace();
    let number = words.next()?.parse().ok()?;
    let profile = words.next().map(str::to_string);
    Some(VersionDirective { number, profile })
}

/// Replaces comments with whitespace while keeping line breaks.
fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' {
            match chars.peek() {
                Some('/') => {
                    for next in chars.by_ref() {
                        if next == '\n' {
                            out.push('\n');
                            break;
                        }
                    }
                    continue;
                }
                Some('*') => {
                    chars.next();
                    let mut prev = '\0';
                    for next in chars.by_ref() {
                        if next == '\n' {
                            out.push('\n');
                        }
                        if prev == '*' && next == '/' {
                            break;
                        }
                        prev = next;
                    }
                    out.push(' ');
                    continue;
                }
                _ => {}
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use naga::front::glsl::{Frontend, Options};
    use naga::ShaderStage;

    fn parse(stage: ShaderStage, source: &str) -> StageInterface {
        let module = Frontend::default()
            .parse(&Options::from(stage), source)
            .expect("source parses");
        reflect(&module)
    }

    const VERTEX: &str = r"
// leading comment
#version 450

layout(location = 0) in vec3 aPos;
layout(location = 1) in vec4 aColor; /* trailing */
layout(location = 0) out vec4 vColor;

layout(std140, set = 0, binding = 0) uniform Globals {
    float time;
    vec2 offset;
    mat4 transform;
} globals;

vec4 shade(vec4 c) {
    if (c.a > 0.5) { return c; }
    return vec4(0.0);
}

void main() {
    vColor = shade(aColor) * globals.time;
    gl_Position = globals.transform * vec4(aPos.xy + globals.offset, aPos.z, 1.0);
}
";

    #[test]
    fn reads_io_without_builtins() {
        let iface = parse(ShaderStage::Vertex, VERTEX);
        assert_eq!(iface.inputs.len(), 2);
        assert_eq!(iface.inputs[1].name, "aColor");
        assert_eq!(iface.inputs[1].ty, GlslType::Vec(4));
        assert_eq!(iface.inputs[1].location, 1);
        let outputs: Vec<_> = iface.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(outputs, ["vColor"]);
    }

    #[test]
    fn reads_uniform_block() {
        let iface = parse(ShaderStage::Vertex, VERTEX);
        assert_eq!(iface.blocks.len(), 1);
        let block = &iface.blocks[0];
        assert_eq!(block.block_name, "Globals");
        assert_eq!(block.instance.as_deref(), Some("globals"));
        assert_eq!((block.set, block.binding), (0, 0));
        let names: Vec<_> = block.members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["time", "offset", "transform"]);
        assert_eq!(block.members[2].ty, GlslType::Mat4);
    }

    #[test]
    fn reads_textures_and_samplers() {
        let source = r"#version 450
layout(location = 0) in vec2 vTexCoord;
layout(location = 0) out vec4 FragColor;
layout(set = 1, binding = 0) uniform texture2D imageTexture1;
layout(set = 1, binding = 1) uniform sampler imageSampler1;
void main() { FragColor = texture(sampler2D(imageTexture1, imageSampler1), vTexCoord); }
";
        let iface = parse(ShaderStage::Fragment, source);
        assert_eq!(iface.opaque.len(), 2);
        assert_eq!(iface.opaque[0].ty, GlslType::Texture2D);
        assert_eq!((iface.opaque[1].set, iface.opaque[1].binding), (1, 1));
        assert_eq!(iface.outputs[0].name, "FragColor");
    }

    #[test]
    fn preprocessor_decides_the_declared_type() {
        let source = r"#version 450
#define OUT_NAME vColor
layout(location = 0) in vec3 aPos;
#if 0
layout(location = 0) out vec4 OUT_NAME;
#else
layout(location = 0) out vec3 OUT_NAME;
#endif
void main() {
    OUT_NAME = aPos;
    gl_Position = vec4(aPos, 1.0);
}
";
        let iface = parse(ShaderStage::Vertex, source);
        assert_eq!(iface.outputs.len(), 1);
        assert_eq!(iface.outputs[0].name, "vColor");
        assert_eq!(iface.outputs[0].ty, GlslType::Vec(3));
    }

    #[test]
    fn flat_int_output() {
        let iface = parse(
            ShaderStage::Vertex,
            "#version 450\nlayout(location = 3) flat out int vId;\nvoid main() { vId = 1; gl_Position = vec4(0.0); }\n",
        );
        assert_eq!(iface.outputs[0].ty, GlslType::Int);
        assert_eq!(iface.outputs[0].location, 3);
    }

    #[test]
    fn leading_version_must_come_first() {
        assert_eq!(leading_version(VERTEX).map(|v| v.number), Some(450));
        assert_eq!(leading_version("#version 460 core\n").and_then(|v| v.profile), Some("core".into()));
        assert!(leading_version("void main() {}\n#version 450\n").is_none());
        assert!(leading_version("").is_none());
    }

    #[test]
    fn block_member_arrays() {
        let iface = parse(
            ShaderStage::Fragment,
            r"#version 450
layout(location = 0) out vec4 FragColor;
layout(std140, set = 0, binding = 0) uniform B { vec4 weights[4]; } b;
void main() { FragColor = b.weights[1]; }
",
        );
        assert_eq!(iface.blocks[0].members[0].array, Some(4));
        assert_eq!(iface.blocks[0].members[0].ty, GlslType::Vec(4));
    }
}

//! Linking two compiled stages into a usable program.

use super::reflect::{GlslType, InterfaceVariable, OpaqueUniform, UniformBlockDecl};
use super::stage::CompiledStage;
use super::uniforms::{check_kind, UniformBlock, UniformKind, UniformValue};
use super::{CompileError, ShaderSource, Stage, UniformError};
use crate::texture::MAX_TEXTURE_UNITS;
use crate::vertex::VertexLayout;
use tracing::{debug, info};

/// Descriptor set holding the uniform block.
pub const UNIFORM_SET: u32 = 0;
/// Binding of the uniform block inside [`UNIFORM_SET`].
pub const UNIFORM_BINDING: u32 = 0;
/// Descriptor set holding texture/sampler pairs.
pub const TEXTURE_SET: u32 = 1;

/// A texture slot: `texture2D` at binding `2k` paired with a `sampler` at
/// binding `2k + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplerSlot {
    /// Name of the `texture2D` uniform; this is the name uniform writes use.
    pub name: String,
    pub sampler_name: String,
    /// Slot index `k`.
    pub slot: u32,
    /// Texture unit the slot currently reads.
    pub unit: u32,
    /// Stages that declare the pair.
    pub visibility: StageVisibility,
}

impl SamplerSlot {
    pub fn texture_binding(&self) -> u32 {
        self.slot * 2
    }

    pub fn sampler_binding(&self) -> u32 {
        self.slot * 2 + 1
    }
}

/// Which stages declare a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageVisibility {
    pub vertex: bool,
    pub fragment: bool,
}

impl StageVisibility {
    fn of(stage: Stage) -> Self {
        Self {
            vertex: stage == Stage::Vertex,
            fragment: stage == Stage::Fragment,
        }
    }

    fn union(self, other: Self) -> Self {
        Self {
            vertex: self.vertex || other.vertex,
            fragment: self.fragment || other.fragment,
        }
    }
}

/// A linked vertex + fragment program.
///
/// A `Program` value only exists fully linked; the sole mutation after
/// linking is writing uniform values.
#[derive(Debug, Clone)]
pub struct Program {
    label: String,
    vertex: CompiledStage,
    fragment: CompiledStage,
    uniforms: Option<UniformBlock>,
    visibility: StageVisibility,
    samplers: Vec<SamplerSlot>,
}

/// Compiles both stages and links them.
pub fn compile_and_link(
    label: &str,
    vertex: &ShaderSource,
    fragment: &ShaderSource,
) -> Result<Program, CompileError> {
    let vertex = CompiledStage::compile(Stage::Vertex, vertex)?;
    let fragment = CompiledStage::compile(Stage::Fragment, fragment)?;
    Program::link(label, vertex, fragment)
}

fn link_error(diagnostic: impl Into<String>) -> CompileError {
    CompileError::Link {
        diagnostic: diagnostic.into(),
    }
}

impl Program {
    /// Links `vertex` and `fragment`.
    ///
    /// Every fragment input must be written by a vertex output with the same
    /// name, type and location. Both stages must agree on the uniform block,
    /// and textures must follow the slot binding convention.
    pub fn link(label: &str, vertex: CompiledStage, fragment: CompiledStage) -> Result<Self, CompileError> {
        if vertex.stage() != Stage::Vertex {
            return Err(link_error(format!("`{}` is a {} stage, expected vertex", vertex.label(), vertex.stage())));
        }
        if fragment.stage() != Stage::Fragment {
            return Err(link_error(format!(
                "`{}` is a {} stage, expected fragment",
                fragment.label(),
                fragment.stage()
            )));
        }

        link_varyings(&vertex, &fragment)?;
        for stage in [&vertex, &fragment] {
            if let Some(loose) = stage.interface().loose_uniforms.first() {
                return Err(link_error(format!(
                    "{} stage: uniform `{}` must be declared inside the uniform block",
                    stage.stage(),
                    loose.name
                )));
            }
        }

        let (uniforms, visibility) = link_uniform_block(&vertex, &fragment)?;
        let samplers = link_samplers(&vertex, &fragment)?;

        if let Some(block) = &uniforms {
            if let Some(clash) = samplers.iter().find(|s| block.slot(&s.name).is_some()) {
                return Err(link_error(format!("uniform name `{}` is declared twice", clash.name)));
            }
        }

        info!(
            "Linked program `{}` ({} uniforms, {} texture slots)",
            label,
            uniforms.as_ref().map_or(0, |u| u.slots().len()),
            samplers.len()
        );

        Ok(Self {
            label: label.to_string(),
            vertex,
            fragment,
            uniforms,
            visibility,
            samplers,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex(&self) -> &CompiledStage {
        &self.vertex
    }

    pub fn fragment(&self) -> &CompiledStage {
        &self.fragment
    }

    /// Vertex stage inputs, in declaration order.
    pub fn attributes(&self) -> &[InterfaceVariable] {
        &self.vertex.interface().inputs
    }

    pub fn samplers(&self) -> &[SamplerSlot] {
        &self.samplers
    }

    pub fn uniform_visibility(&self) -> StageVisibility {
        self.visibility
    }

    /// std140 image of the uniform block, if the program declares one.
    pub fn uniform_bytes(&self) -> Option<&[u8]> {
        self.uniforms.as_ref().map(UniformBlock::bytes)
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.samplers.iter().any(|s| s.name == name)
            || self.uniforms.as_ref().is_some_and(|u| u.slot(name).is_some())
    }

    /// Current value of a uniform.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        if let Some(sampler) = self.samplers.iter().find(|s| s.name == name) {
            return Some(UniformValue::TextureUnit(sampler.unit));
        }
        self.uniforms.as_ref()?.read(name)
    }

    /// Writes one uniform.
    ///
    /// Fails with [`UniformError::Unknown`] when the program has no slot named
    /// `name`; no other uniform is touched in that case.
    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> Result<(), UniformError> {
        self.validate(name, value)?;
        if let Some(sampler) = self.samplers.iter_mut().find(|s| s.name == name) {
            if let UniformValue::TextureUnit(unit) = value {
                sampler.unit = unit;
            }
            return Ok(());
        }
        match &mut self.uniforms {
            Some(block) => block.write(name, value),
            None => Err(UniformError::Unknown { name: name.to_string() }),
        }
    }

    /// Applies a batch of writes atomically.
    ///
    /// Every write is checked before any is applied, so a type mismatch leaves
    /// the program exactly as it was. Names the program does not declare are
    /// skipped and returned.
    pub fn apply(&mut self, writes: &[(&str, UniformValue)]) -> Result<Vec<String>, UniformError> {
        let mut unknown = Vec::new();
        for (name, value) in writes {
            match self.validate(name, *value) {
                Ok(()) => {}
                Err(UniformError::Unknown { name }) => unknown.push(name),
                Err(e) => return Err(e),
            }
        }
        for (name, value) in writes {
            if unknown.iter().any(|u| u == name) {
                continue;
            }
            self.set_uniform(name, *value)?;
        }
        Ok(unknown)
    }

    fn validate(&self, name: &str, value: UniformValue) -> Result<(), UniformError> {
        if self.samplers.iter().any(|s| s.name == name) {
            check_kind(name, UniformKind::Sampler, value)?;
            if let UniformValue::TextureUnit(unit) = value {
                if unit as usize >= MAX_TEXTURE_UNITS {
                    return Err(UniformError::UnitOutOfRange {
                        name: name.to_string(),
                        unit,
                    });
                }
            }
            return Ok(());
        }
        let slot = self
            .uniforms
            .as_ref()
            .and_then(|u| u.slot(name))
            .ok_or_else(|| UniformError::Unknown { name: name.to_string() })?;
        check_kind(name, slot.kind, value)
    }

    /// Checks that `layout` feeds every vertex input with a matching
    /// component count.
    pub fn check_layout(&self, layout: &VertexLayout) -> Result<(), String> {
        for input in self.attributes() {
            let location = input.location;
            let Some(attribute) = layout.attribute(location) else {
                return Err(format!(
                    "vertex input `{}` (location {location}) has no attribute in the buffer layout",
                    input.name
                ));
            };
            match input.ty.float_components() {
                Some(n) if n == attribute.components => {}
                _ => {
                    return Err(format!(
                        "vertex input `{}` is {} but location {location} supplies {} floats",
                        input.name, input.ty, attribute.components
                    ))
                }
            }
        }
        Ok(())
    }
}

fn link_varyings(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<(), CompileError> {
    let outputs = &vertex.interface().outputs;
    for input in &fragment.interface().inputs {
        let Some(output) = outputs.iter().find(|o| o.name == input.name) else {
            return Err(link_error(format!(
                "fragment input `{}` is not written by vertex stage `{}`",
                input.name,
                vertex.label()
            )));
        };
        if output.ty != input.ty {
            return Err(link_error(format!(
                "varying `{}` is {} in the vertex stage but {} in the fragment stage",
                input.name, output.ty, input.ty
            )));
        }
        if output.location != input.location {
            return Err(link_error(format!(
                "varying `{}` has location {} in the vertex stage but {} in the fragment stage",
                input.name, output.location, input.location
            )));
        }
    }
    Ok(())
}

fn single_block<'a>(stage: &'a CompiledStage) -> Result<Option<&'a UniformBlockDecl>, CompileError> {
    let blocks = &stage.interface().blocks;
    if blocks.len() > 1 {
        return Err(link_error(format!(
            "{} stage declares {} uniform blocks; only one is supported",
            stage.stage(),
            blocks.len()
        )));
    }
    let Some(block) = blocks.first() else {
        return Ok(None);
    };
    if block.set != UNIFORM_SET || block.binding != UNIFORM_BINDING {
        return Err(link_error(format!(
            "uniform block `{}` must use set = {UNIFORM_SET}, binding = {UNIFORM_BINDING}",
            block.block_name
        )));
    }
    Ok(Some(block))
}

fn link_uniform_block(
    vertex: &CompiledStage,
    fragment: &CompiledStage,
) -> Result<(Option<UniformBlock>, StageVisibility), CompileError> {
    let vs = single_block(vertex)?;
    let fs = single_block(fragment)?;
    let visibility = StageVisibility {
        vertex: vs.is_some(),
        fragment: fs.is_some(),
    };
    let decl = match (vs, fs) {
        (Some(a), Some(b)) => {
            if a.block_name != b.block_name || a.members != b.members {
                return Err(link_error(format!(
                    "uniform block `{}` differs between the vertex and fragment stages",
                    a.block_name
                )));
            }
            a
        }
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return Ok((None, visibility)),
    };
    for (i, member) in decl.members.iter().enumerate() {
        if decl.members[..i].iter().any(|m| m.name == member.name) {
            return Err(link_error(format!("uniform `{}` is declared twice", member.name)));
        }
    }
    let block = UniformBlock::layout(&decl.members).map_err(link_error)?;
    debug!("Uniform block `{}`: {} bytes", decl.block_name, block.bytes().len());
    Ok((Some(block), visibility))
}

fn link_samplers(vertex: &CompiledStage, fragment: &CompiledStage) -> Result<Vec<SamplerSlot>, CompileError> {
    let mut declared: Vec<(&OpaqueUniform, StageVisibility)> = Vec::new();
    for stage in [vertex, fragment] {
        for opaque in &stage.interface().opaque {
            if opaque.set != TEXTURE_SET {
                return Err(link_error(format!(
                    "{} `{}` must use set = {TEXTURE_SET}, found set = {}",
                    opaque.ty, opaque.name, opaque.set
                )));
            }
            let seen = StageVisibility::of(stage.stage());
            match declared.iter_mut().find(|(d, _)| d.name == opaque.name) {
                Some((existing, _)) if existing.binding != opaque.binding || existing.ty != opaque.ty => {
                    return Err(link_error(format!(
                        "`{}` is declared differently in the two stages",
                        opaque.name
                    )))
                }
                Some((_, visibility)) => *visibility = visibility.union(seen),
                None => declared.push((opaque, seen)),
            }
        }
    }

    let mut slots = Vec::new();
    for (texture, visibility) in declared.iter().filter(|(o, _)| o.ty == GlslType::Texture2D) {
        let binding = texture.binding;
        if binding % 2 != 0 {
            return Err(link_error(format!(
                "texture2D `{}` must use an even binding, found {binding}",
                texture.name
            )));
        }
        let slot = binding / 2;
        if slot as usize >= MAX_TEXTURE_UNITS {
            return Err(link_error(format!("texture2D `{}` uses slot {slot}, past the unit limit", texture.name)));
        }
        if slots.iter().any(|s: &SamplerSlot| s.slot == slot) {
            return Err(link_error(format!("binding {binding} is used by two textures")));
        }
        let Some((sampler, sampler_visibility)) = declared
            .iter()
            .find(|(o, _)| o.ty == GlslType::Sampler && o.binding == binding + 1)
        else {
            return Err(link_error(format!(
                "texture2D `{}` has no sampler at binding {}",
                texture.name,
                binding + 1
            )));
        };
        slots.push(SamplerSlot {
            name: texture.name.clone(),
            sampler_name: sampler.name.clone(),
            slot,
            unit: 0,
            visibility: visibility.union(*sampler_visibility),
        });
    }
    for (sampler, _) in declared.iter().filter(|(o, _)| o.ty == GlslType::Sampler) {
        if !slots.iter().any(|s| s.sampler_name == sampler.name) {
            return Err(link_error(format!(
                "sampler `{}` at binding {} has no texture2D at binding {}",
                sampler.name,
                sampler.binding,
                sampler.binding.saturating_sub(1)
            )));
        }
    }
    slots.sort_by_key(|s| s.slot);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vertex::{ColorVertex, PositionVertex, TexturedVertex, Vertex};

    const COLOR_VS: &str = r"#version 450
layout(location = 0) in vec3 aPos;
layout(location = 1) in vec4 aColor;
layout(location = 0) out vec4 vColor;
layout(std140, set = 0, binding = 0) uniform Globals {
    float time;
    vec4 tint;
} globals;
void main() {
    vColor = aColor * globals.tint;
    gl_Position = vec4(aPos.x + 0.1 * sin(globals.time), aPos.yz, 1.0);
}
";

    const COLOR_FS: &str = r"#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 FragColor;
layout(std140, set = 0, binding = 0) uniform Globals {
    float time;
    vec4 tint;
} globals;
void main() {
    FragColor = vColor * abs(sin(globals.time));
}
";

    const TEXTURE_FS: &str = r"#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 FragColor;
layout(set = 1, binding = 0) uniform texture2D imageTexture1;
layout(set = 1, binding = 1) uniform sampler imageSampler1;
layout(set = 1, binding = 2) uniform texture2D imageTexture2;
layout(set = 1, binding = 3) uniform sampler imageSampler2;
void main() {
    vec2 uv = vColor.xy;
    vec4 a = texture(sampler2D(imageTexture1, imageSampler1), uv);
    vec4 b = texture(sampler2D(imageTexture2, imageSampler2), uv);
    FragColor = mix(a, b, 0.2) * vColor;
}
";

    fn src(label: &str, code: &str) -> ShaderSource {
        ShaderSource::inline(label, code)
    }

    fn color_program() -> Program {
        compile_and_link("color", &src("color.vert", COLOR_VS), &src("color.frag", COLOR_FS)).expect("links")
    }

    #[test]
    fn links_matching_stages() {
        let program = color_program();
        assert_eq!(program.attributes().len(), 2);
        assert_eq!(
            program.uniform_visibility(),
            StageVisibility {
                vertex: true,
                fragment: true
            }
        );
        assert_eq!(program.uniform_bytes().map(<[u8]>::len), Some(32));
        assert_eq!(program.uniform("time"), Some(UniformValue::Float(0.0)));
    }

    #[test]
    fn mismatched_varying_name_fails_to_link() {
        let fs = COLOR_FS.replace("vColor", "vColour");
        let err = compile_and_link("bad", &src("color.vert", COLOR_VS), &src("colour.frag", &fs))
            .expect_err("varying names differ");
        match err {
            CompileError::Link { diagnostic } => assert!(diagnostic.contains("vColour")),
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn mismatched_varying_type_fails_to_link() {
        let fs = COLOR_FS
            .replace("in vec4 vColor", "in vec3 vColor")
            .replace("FragColor = vColor *", "FragColor = vec4(vColor, 1.0) *");
        let err = compile_and_link("bad", &src("color.vert", COLOR_VS), &src("vec3.frag", &fs));
        assert!(matches!(err, Err(CompileError::Link { .. })));
    }

    #[test]
    fn differing_uniform_blocks_fail_to_link() {
        let fs = COLOR_FS.replace("vec4 tint;", "vec3 tint;");
        let err = compile_and_link("bad", &src("color.vert", COLOR_VS), &src("block.frag", &fs));
        assert!(matches!(err, Err(CompileError::Link { .. })));
    }

    #[test]
    fn unknown_uniform_leaves_others_untouched() {
        let mut program = color_program();
        program.set_uniform("time", UniformValue::Float(2.0)).expect("time exists");
        program
            .set_uniform("tint", UniformValue::Vec4([1.0, 0.5, 0.25, 1.0]))
            .expect("tint exists");
        let before = program.uniform_bytes().map(<[u8]>::to_vec);

        let err = program.set_uniform("imageTexture1", UniformValue::TextureUnit(0));
        assert_eq!(
            err,
            Err(UniformError::Unknown {
                name: "imageTexture1".into()
            })
        );
        assert_eq!(program.uniform_bytes().map(<[u8]>::to_vec), before);
        assert_eq!(program.uniform("time"), Some(UniformValue::Float(2.0)));
    }

    #[test]
    fn type_mismatch_is_a_contract_violation() {
        let mut program = color_program();
        let err = program.set_uniform("time", UniformValue::Vec2([1.0, 2.0])).expect_err("mismatch");
        assert!(matches!(err, UniformError::TypeMismatch { .. }));
    }

    #[test]
    fn batch_is_atomic() {
        let mut program = color_program();
        program.set_uniform("time", UniformValue::Float(1.0)).expect("time");
        let result = program.apply(&[
            ("time", UniformValue::Float(5.0)),
            ("tint", UniformValue::Float(1.0)),
        ]);
        assert!(matches!(result, Err(UniformError::TypeMismatch { .. })));
        assert_eq!(program.uniform("time"), Some(UniformValue::Float(1.0)));

        let unknown = program
            .apply(&[("time", UniformValue::Float(5.0)), ("speed", UniformValue::Float(2.0))])
            .expect("unknown names are skipped");
        assert_eq!(unknown, ["speed"]);
        assert_eq!(program.uniform("time"), Some(UniformValue::Float(5.0)));
    }

    #[test]
    fn texture_slots_are_paired() {
        let mut program =
            compile_and_link("tex", &src("color.vert", COLOR_VS), &src("tex.frag", TEXTURE_FS)).expect("links");
        let names: Vec<_> = program.samplers().iter().map(|s| (s.name.as_str(), s.slot)).collect();
        assert_eq!(names, [("imageTexture1", 0), ("imageTexture2", 1)]);
        assert_eq!(program.samplers()[1].texture_binding(), 2);
        assert_eq!(program.samplers()[1].sampler_binding(), 3);

        program
            .set_uniform("imageTexture2", UniformValue::TextureUnit(1))
            .expect("sampler exists");
        assert_eq!(program.uniform("imageTexture2"), Some(UniformValue::TextureUnit(1)));
        assert!(matches!(
            program.set_uniform("imageTexture2", UniformValue::Float(1.0)),
            Err(UniformError::TypeMismatch { .. })
        ));
        assert!(matches!(
            program.set_uniform("imageTexture2", UniformValue::TextureUnit(99)),
            Err(UniformError::UnitOutOfRange { .. })
        ));
        // Fragment-only textures with a vertex-only uniform block.
        assert_eq!(
            program.uniform_visibility(),
            StageVisibility {
                vertex: true,
                fragment: false
            }
        );
    }

    #[test]
    fn unpaired_texture_fails_to_link() {
        let fs = TEXTURE_FS
            .replace("layout(set = 1, binding = 3) uniform sampler imageSampler2;\n", "")
            .replace("sampler2D(imageTexture2, imageSampler2)", "sampler2D(imageTexture2, imageSampler1)");
        let err = compile_and_link("tex", &src("color.vert", COLOR_VS), &src("unpaired.frag", &fs));
        match err {
            Err(CompileError::Link { diagnostic }) => assert!(diagnostic.contains("imageTexture2")),
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn wrong_stage_order_fails_to_link() {
        let vs = CompiledStage::compile(Stage::Vertex, &src("color.vert", COLOR_VS)).expect("vs");
        let fs = CompiledStage::compile(Stage::Fragment, &src("color.frag", COLOR_FS)).expect("fs");
        assert!(matches!(Program::link("swapped", fs, vs), Err(CompileError::Link { .. })));
    }

    #[test]
    fn layout_check_matches_inputs() {
        let program = color_program();
        assert!(program.check_layout(&ColorVertex::LAYOUT).is_ok());
        assert!(program.check_layout(&TexturedVertex::LAYOUT).is_ok());
        let err = program.check_layout(&PositionVertex::LAYOUT).expect_err("no color attribute");
        assert!(err.contains("aColor"));
    }

    #[test]
    fn varying_type_chosen_by_preprocessor_is_checked() {
        let vs = r"#version 450
layout(location = 0) in vec3 aPos;
#if 0
layout(location = 0) out vec4 vColor;
#else
layout(location = 0) out vec3 vColor;
#endif
void main() {
    vColor = aPos;
    gl_Position = vec4(aPos, 1.0);
}
";
        let fs = r"#version 450
layout(location = 0) in vec4 vColor;
layout(location = 0) out vec4 FragColor;
void main() { FragColor = vColor; }
";
        let err = compile_and_link("pp", &src("pp.vert", vs), &src("pp.frag", fs)).expect_err("vec3 vs vec4");
        match err {
            CompileError::Link { diagnostic } => {
                assert!(diagnostic.contains("vColor"));
                assert!(diagnostic.contains("vec3"));
            }
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn macro_named_output_links() {
        let vs = r"#version 450
#define OUT_NAME vColor
layout(location = 0) in vec3 aPos;
layout(location = 1) in vec4 aColor;
layout(location = 0) out vec4 OUT_NAME;
void main() {
    OUT_NAME = aColor;
    gl_Position = vec4(aPos, 1.0);
}
";
        let program = compile_and_link("macro", &src("macro.vert", vs), &src("color.frag", COLOR_FS));
        assert!(program.is_ok(), "{:?}", program.err());
    }

    #[test]
    fn texture_slot_visibility_follows_declaring_stage() {
        let vs = r"#version 450
layout(location = 0) in vec3 aPos;
layout(location = 1) in vec4 aColor;
layout(location = 0) out vec4 vColor;
layout(set = 1, binding = 0) uniform texture2D heightMap;
layout(set = 1, binding = 1) uniform sampler heightSampler;
void main() {
    float h = textureLod(sampler2D(heightMap, heightSampler), aPos.xy, 0.0).r;
    vColor = aColor;
    gl_Position = vec4(aPos.xy, h, 1.0);
}
";
        let program =
            compile_and_link("height", &src("height.vert", vs), &src("color.frag", COLOR_FS)).expect("links");
        assert_eq!(
            program.samplers()[0].visibility,
            StageVisibility {
                vertex: true,
                fragment: false
            }
        );

        let program =
            compile_and_link("tex", &src("color.vert", COLOR_VS), &src("tex.frag", TEXTURE_FS)).expect("links");
        assert!(program
            .samplers()
            .iter()
            .all(|s| s.visibility == StageVisibility { vertex: false, fragment: true }));
    }
}

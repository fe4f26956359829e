//! Single-stage compilation: GLSL source → validated naga module → WGSL.

use super::reflect::{self, StageInterface};
use super::{CompileError, ShaderSource, Stage};
use naga::front::glsl::{Frontend, Options};
use naga::valid::{Capabilities, ValidationFlags, Validator};
use tracing::debug;

/// GLSL versions naga's front end accepts.
const SUPPORTED_VERSIONS: &[u32] = &[440, 450, 460];

/// A stage that parsed and validated successfully.
#[derive(Debug, Clone)]
pub struct CompiledStage {
    stage: Stage,
    label: String,
    interface: StageInterface,
    wgsl: String,
}

impl CompiledStage {
    /// Compiles `source` as `stage`.
    ///
    /// The source must open with a `#version` directive naming a supported
    /// core-profile version; anything else is rejected before parsing.
    pub fn compile(stage: Stage, source: &ShaderSource) -> Result<Self, CompileError> {
        let fail = |diagnostic: String| CompileError::StageCompile { stage, diagnostic };
        let code = source.code();

        let version = reflect::leading_version(code)
            .ok_or_else(|| fail(format!("{}: missing leading #version directive", source.label())))?;
        if !SUPPORTED_VERSIONS.contains(&version.number) {
            return Err(fail(format!(
                "{}: unsupported #version {} (expected one of {:?})",
                source.label(),
                version.number,
                SUPPORTED_VERSIONS
            )));
        }
        if let Some(profile) = version.profile.as_deref().filter(|p| *p != "core") {
            return Err(fail(format!("{}: unsupported profile `{profile}`", source.label())));
        }

        let mut frontend = Frontend::default();
        let options = Options::from(stage.naga());
        let module = frontend
            .parse(&options, code)
            .map_err(|e| fail(format!("{}:\n{}", source.label(), e.emit_to_string(code))))?;

        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let info = validator
            .validate(&module)
            .map_err(|e| fail(format!("{}:\n{}", source.label(), e.emit_to_string(code))))?;

        let wgsl = naga::back::wgsl::write_string(&module, &info, naga::back::wgsl::WriterFlags::empty())
            .map_err(|e| fail(format!("{}: WGSL generation error: {e:?}", source.label())))?;

        let interface = reflect::reflect(&module);
        debug!(
            "Compiled {} stage {} ({} inputs, {} outputs)",
            stage,
            source.label(),
            interface.inputs.len(),
            interface.outputs.len()
        );

        Ok(Self {
            stage,
            label: source.label(),
            interface,
            wgsl,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn interface(&self) -> &StageInterface {
        &self.interface
    }

    /// WGSL translation handed to the device.
    pub fn wgsl(&self) -> &str {
        &self.wgsl
    }

    /// Entry point name in the WGSL translation.
    pub fn entry_point(&self) -> &'static str {
        "main"
    }
}

//! Program accumulator: the single mutation surface of a compilation.
//!
//! Ordering contract: within a phase, calls render in the order they were
//! added. A block's call is added only after every upstream call it pulled,
//! so insertion order is already a valid producer-before-consumer order.
//! `priority` (recursion depth at first insertion) is kept on each call for
//! diagnostics and is never used to reorder.

use std::collections::{BTreeMap, HashSet};

use anyhow::{Result, bail};
use serde::Serialize;

use super::{
    errors::CompileError,
    types::{BlockIndex, GlslType, Phase},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    Uniform,
}

impl ExternalKind {
    pub fn keyword(self) -> &'static str {
        match self {
            ExternalKind::Uniform => "uniform",
        }
    }
}

/// Program-wide declaration, shared by both phases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct External {
    pub kind: ExternalKind,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: GlslType,
    pub value: Option<String>,
}

/// One emitted call statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Call {
    pub phase: Phase,
    pub origin: BlockIndex,
    pub name: String,
    pub args: Vec<String>,
    pub priority: u32,
    #[serde(skip)]
    pub body: String,
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    included: HashSet<(BlockIndex, Phase)>,
    variables: BTreeMap<Phase, Vec<(String, GlslType)>>,
    calls: Vec<Call>,
    externals: Vec<External>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
            && self.variables.is_empty()
            && self.calls.is_empty()
            && self.externals.is_empty()
    }

    /// Record `(block, phase)` as included. Returns true if it already was.
    pub fn include(&mut self, block: BlockIndex, phase: Phase) -> bool {
        !self.included.insert((block, phase))
    }

    pub fn is_included(&self, block: BlockIndex, phase: Phase) -> bool {
        self.included.contains(&(block, phase))
    }

    /// Declare a variable in `phase`'s scope. Repeating a declaration at the
    /// same type is a no-op.
    pub fn variable(&mut self, phase: Phase, name: &str, ty: GlslType) -> Result<()> {
        let scope = self.variables.entry(phase).or_default();
        match scope.iter().find(|(n, _)| n == name) {
            Some((_, declared)) if *declared != ty => bail!(CompileError::TypeMismatch {
                scope: format!("{phase} scope"),
                name: name.to_string(),
                declared: *declared,
                requested: ty,
            }),
            Some(_) => Ok(()),
            None => {
                scope.push((name.to_string(), ty));
                Ok(())
            }
        }
    }

    pub fn add(
        &mut self,
        phase: Phase,
        origin: BlockIndex,
        name: String,
        args: Vec<String>,
        body: String,
        priority: u32,
    ) {
        self.calls.push(Call {
            phase,
            origin,
            name,
            args,
            priority,
            body,
        });
    }

    /// Register a program-wide declaration, once per name.
    pub fn external(
        &mut self,
        kind: ExternalKind,
        name: &str,
        ty: GlslType,
        value: Option<String>,
    ) -> Result<()> {
        match self.externals.iter().find(|e| e.name == name) {
            Some(existing) if existing.ty != ty || existing.kind != kind => {
                bail!(CompileError::TypeMismatch {
                    scope: "program externals".to_string(),
                    name: name.to_string(),
                    declared: existing.ty,
                    requested: ty,
                })
            }
            Some(_) => Ok(()),
            None => {
                self.externals.push(External {
                    kind,
                    name: name.to_string(),
                    ty,
                    value,
                });
                Ok(())
            }
        }
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn calls_in(&self, phase: Phase) -> impl Iterator<Item = &Call> {
        self.calls.iter().filter(move |c| c.phase == phase)
    }

    pub fn variables(&self, phase: Phase) -> &[(String, GlslType)] {
        self.variables.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn externals(&self) -> &[External] {
        &self.externals
    }

    /// Render both phases into linked source text.
    pub fn compile(&self) -> CompiledProgram {
        CompiledProgram {
            vertex: self.render_phase(Phase::Vertex),
            fragment: self.render_phase(Phase::Fragment),
            uniforms: self.externals.clone(),
            calls: self.calls.clone(),
        }
    }

    fn render_phase(&self, phase: Phase) -> String {
        let mut out = String::new();

        for external in &self.externals {
            out.push_str(&format!(
                "{} {} {};\n",
                external.kind.keyword(),
                external.ty,
                external.name
            ));
        }
        if !self.externals.is_empty() {
            out.push('\n');
        }

        for call in self.calls_in(phase) {
            out.push_str(call.body.trim_end());
            out.push_str("\n\n");
        }

        out.push_str("void main() {\n");
        for (name, ty) in self.variables(phase) {
            out.push_str(&format!("    {ty} {name};\n"));
        }
        for call in self.calls_in(phase) {
            out.push_str(&format!("    {}({});\n", call.name, call.args.join(", ")));
        }
        out.push_str("}\n");
        out
    }
}

/// Final output of a material compilation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CompiledProgram {
    pub vertex: String,
    pub fragment: String,
    pub uniforms: Vec<External>,
    pub calls: Vec<Call>,
}

impl CompiledProgram {
    pub fn source(&self, phase: Phase) -> &str {
        match phase {
            Phase::Vertex => &self.vertex,
            Phase::Fragment => &self.fragment,
        }
    }

    pub fn calls_in(&self, phase: Phase) -> impl Iterator<Item = &Call> {
        self.calls.iter().filter(move |c| c.phase == phase)
    }

    /// Position of `origin`'s call within `phase`, if it was emitted.
    pub fn position(&self, phase: Phase, origin: BlockIndex) -> Option<usize> {
        self.calls_in(phase).position(|c| c.origin == origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_is_check_and_set() {
        let mut program = Program::new();
        assert!(!program.include(BlockIndex(1), Phase::Vertex));
        assert!(program.include(BlockIndex(1), Phase::Vertex));
        assert!(!program.include(BlockIndex(1), Phase::Fragment));
        assert!(program.is_included(BlockIndex(1), Phase::Fragment));
    }

    #[test]
    fn variables_are_idempotent_and_tag_checked() {
        let mut program = Program::new();
        program.variable(Phase::Vertex, "v_a_1_0", GlslType::Vec3).unwrap();
        program.variable(Phase::Vertex, "v_a_1_0", GlslType::Vec3).unwrap();
        program.variable(Phase::Fragment, "v_a_1_0", GlslType::Float).unwrap();
        assert_eq!(program.variables(Phase::Vertex).len(), 1);

        let err = program
            .variable(Phase::Vertex, "v_a_1_0", GlslType::Vec4)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CompileError>(),
            Some(CompileError::TypeMismatch { declared: GlslType::Vec3, requested: GlslType::Vec4, .. })
        ));
    }

    #[test]
    fn externals_dedupe_by_name() {
        let mut program = Program::new();
        program
            .external(ExternalKind::Uniform, "time", GlslType::Float, Some("0.0".into()))
            .unwrap();
        program
            .external(ExternalKind::Uniform, "time", GlslType::Float, None)
            .unwrap();
        assert_eq!(program.externals().len(), 1);
        assert_eq!(program.externals()[0].value.as_deref(), Some("0.0"));

        assert!(
            program
                .external(ExternalKind::Uniform, "time", GlslType::Int, None)
                .is_err()
        );
    }

    #[test]
    fn renders_externals_functions_and_main_in_call_order() {
        let mut program = Program::new();
        program
            .external(ExternalKind::Uniform, "gain", GlslType::Float, None)
            .unwrap();
        program.variable(Phase::Fragment, "v_x_1_0", GlslType::Float).unwrap();
        program.add(
            Phase::Fragment,
            BlockIndex(1),
            "sg_fragment_a_1".into(),
            vec!["v_x_1_0".into()],
            "void sg_fragment_a_1(out float x) { x = gain; }".into(),
            1,
        );
        program.add(
            Phase::Fragment,
            BlockIndex(2),
            "sg_fragment_b_2".into(),
            vec!["v_x_1_0".into()],
            "void sg_fragment_b_2(in float x) { }\n".into(),
            0,
        );

        let compiled = program.compile();
        assert_eq!(
            compiled.fragment,
            "uniform float gain;\n\n\
             void sg_fragment_a_1(out float x) { x = gain; }\n\n\
             void sg_fragment_b_2(in float x) { }\n\n\
             void main() {\n    float v_x_1_0;\n    sg_fragment_a_1(v_x_1_0);\n    sg_fragment_b_2(v_x_1_0);\n}\n"
        );
        assert_eq!(compiled.vertex, "uniform float gain;\n\nvoid main() {\n}\n");
        assert_eq!(compiled.position(Phase::Fragment, BlockIndex(2)), Some(1));
    }
}

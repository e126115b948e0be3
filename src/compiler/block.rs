//! Blocks: the compilation wrappers around graph nodes.
//!
//! A block owns exactly one [`Node`] and comes in two flavours:
//! - `Snippet`: one fragment, inserted into whichever phase pulls on it.
//! - `Material`: a vertex/fragment pair sharing one outlet namespace; the
//!   sink that drives a whole compilation.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::graph::{Node, Outlet, ShaderGraph};

use super::{
    emit::{CompileContext, compile_call},
    errors::CompileError,
    outlets::{OutletSpec, make_outlets},
    program::{CompiledProgram, Program},
    signature::Fragment,
    types::{BlockIndex, Phase},
};

/// Hands out block construction indices for one editing/compilation session.
#[derive(Debug)]
pub struct BlockContext {
    next_index: u32,
}

impl BlockContext {
    pub fn new() -> Self {
        Self { next_index: 1 }
    }

    fn next(&mut self) -> BlockIndex {
        let index = BlockIndex(self.next_index);
        self.next_index += 1;
        index
    }
}

impl Default for BlockContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub enum BlockKind {
    Snippet(Fragment),
    Material { vertex: Fragment, fragment: Fragment },
}

#[derive(Clone, Debug)]
pub struct Block {
    index: BlockIndex,
    node: Node,
    kind: BlockKind,
    pub(crate) children: Vec<BlockIndex>,
    pub(crate) parent: Option<BlockIndex>,
    properties: BTreeMap<String, serde_json::Value>,
}

impl Block {
    /// Wrap a single fragment.
    pub fn snippet(cx: &mut BlockContext, code: &str) -> Result<Self> {
        Self::new(cx, BlockKind::Snippet(Fragment::parse(code)?))
    }

    /// Wrap a paired vertex/fragment material.
    pub fn material(cx: &mut BlockContext, vertex: &str, fragment: &str) -> Result<Self> {
        Self::material_named(cx, "material", vertex, fragment)
    }

    /// Same as [`Block::material`] with `name` as the call base name.
    pub fn material_named(
        cx: &mut BlockContext,
        name: &str,
        vertex: &str,
        fragment: &str,
    ) -> Result<Self> {
        Self::new(
            cx,
            BlockKind::Material {
                vertex: Fragment::named(name, vertex)?,
                fragment: Fragment::named(name, fragment)?,
            },
        )
    }

    pub fn new(cx: &mut BlockContext, kind: BlockKind) -> Result<Self> {
        let mut block = Self {
            index: cx.next(),
            node: Node::new(),
            kind,
            children: Vec::new(),
            parent: None,
            properties: BTreeMap::new(),
        };
        block.refresh()?;
        Ok(block)
    }

    /// Bind the node to this block, then seed its outlets.
    fn refresh(&mut self) -> Result<()> {
        self.node.bind_owner(self.index)?;
        let outlets = self.outlets()?;
        self.node.set_outlets(outlets);
        Ok(())
    }

    pub fn index(&self) -> BlockIndex {
        self.index
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn is_material(&self) -> bool {
        matches!(self.kind, BlockKind::Material { .. })
    }

    pub fn children(&self) -> &[BlockIndex] {
        &self.children
    }

    pub fn parent(&self) -> Option<BlockIndex> {
        self.parent
    }

    pub fn properties(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut BTreeMap<String, serde_json::Value> {
        &mut self.properties
    }

    /// Outlets derived from the wrapped fragment(s).
    ///
    /// A material merges both phases by name, vertex first; the two phases
    /// must agree on every outlet they share.
    pub fn outlets(&self) -> Result<Vec<OutletSpec>> {
        match &self.kind {
            BlockKind::Snippet(fragment) => Ok(make_outlets(fragment.signature())),
            BlockKind::Material { vertex, fragment } => {
                let mut merged = make_outlets(vertex.signature());
                for outlet in make_outlets(fragment.signature()) {
                    match merged.iter().find(|o| o.name == outlet.name) {
                        Some(existing) => {
                            if existing.ty != outlet.ty
                                || existing.direction != outlet.direction
                                || existing.category != outlet.category
                            {
                                bail!(CompileError::OutletConflict { name: outlet.name });
                            }
                        }
                        None => merged.push(outlet),
                    }
                }
                Ok(merged)
            }
        }
    }

    /// Emit this block's call for `phase`.
    pub fn insert<'g>(
        &'g self,
        cx: &mut CompileContext<'g>,
        phase: Phase,
        priority: u32,
    ) -> Result<()> {
        let fragment = match &self.kind {
            BlockKind::Snippet(fragment) => fragment,
            BlockKind::Material { vertex, .. } if phase == Phase::Vertex => vertex,
            BlockKind::Material { fragment, .. } => fragment,
        };
        compile_call(cx, phase, &self.node, fragment, priority)
    }

    /// Make sure this block's code is in the program for `phase`, and return
    /// the variable that holds `outlet`.
    pub fn fetch<'g>(
        &'g self,
        cx: &mut CompileContext<'g>,
        phase: Phase,
        outlet: &Outlet,
        priority: u32,
    ) -> Result<String> {
        cx.ensure_inserted(self, phase, priority)?;

        // The vertex stage of a material always runs, pulled or not.
        if self.is_material() && phase == Phase::Fragment {
            cx.ensure_inserted(self, Phase::Vertex, 0)?;
        }

        Ok(outlet.id().to_string())
    }

    /// Compile the whole graph reachable from this material.
    pub fn compile(&self, graph: &ShaderGraph) -> Result<CompiledProgram> {
        self.check_sink()?;
        let mut program = Program::new();
        self.compile_into(graph, &mut program)?;
        Ok(program.compile())
    }

    /// Same as [`Block::compile`] minus finalisation, on a caller-owned
    /// program. `program` is left untouched when this fails.
    pub fn compile_into(&self, graph: &ShaderGraph, program: &mut Program) -> Result<()> {
        self.check_sink()?;

        let mut cx = CompileContext::new(graph, program.clone());
        for phase in Phase::ALL {
            cx.ensure_inserted(self, phase, 0)?;
        }
        *program = cx.finish();

        tracing::info!(
            material = %self.index,
            reachable = graph.upstream_reachable(self.index).len(),
            blocks = graph.len(),
            "material compiled"
        );
        Ok(())
    }

    /// Only a material without outputs can root a compilation.
    fn check_sink(&self) -> Result<()> {
        if !self.is_material() {
            bail!(CompileError::NotAMaterial(self.index));
        }
        let outputs = self.node.output_count();
        if outputs > 0 {
            bail!(CompileError::InvalidGraph {
                block: self.index,
                outputs,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::{Direction, OutletCategory};

    #[test]
    fn construction_indices_are_monotonic_per_context() {
        let mut cx = BlockContext::new();
        let a = Block::snippet(&mut cx, "void main(out float v) { v = 1.0; }").unwrap();
        let b = Block::snippet(&mut cx, "void main(out float v) { v = 2.0; }").unwrap();
        assert_eq!(a.index(), BlockIndex(1));
        assert_eq!(b.index(), BlockIndex(2));

        let mut fresh = BlockContext::new();
        let c = Block::snippet(&mut fresh, "void main(out float v) { v = 3.0; }").unwrap();
        assert_eq!(c.index(), BlockIndex(1));
    }

    #[test]
    fn node_is_bound_and_seeded_on_construction() {
        let mut cx = BlockContext::new();
        let _ = cx.next();
        let block = Block::snippet(
            &mut cx,
            "uniform float gain;\nvoid main(in float xIn, out float xOut) { xOut = xIn * gain; }",
        )
        .unwrap();

        assert_eq!(block.node().owner(), Some(BlockIndex(2)));
        let ids: Vec<&str> = block.node().outlets().iter().map(|o| o.id()).collect();
        assert_eq!(ids, vec!["v_x_2_0", "v_x_2_1", "v_gain_2_2"]);
        assert_eq!(block.node().output_count(), 1);
    }

    #[test]
    fn material_merges_shared_outlets() {
        let mut cx = BlockContext::new();
        let block = Block::material(
            &mut cx,
            "uniform mat4 mvp;\nvoid main(in vec3 positionIn) { gl_Position = mvp * vec4(positionIn, 1.0); }",
            "uniform mat4 mvp;\nuniform vec4 color;\nvoid main(in vec3 positionIn) { gl_FragColor = color; }",
        )
        .unwrap();

        let names: Vec<&str> = block.node().outlets().iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["positionIn", "mvp", "color"]);
        let color = block.node().get("color").unwrap();
        assert_eq!(color.category, OutletCategory::Uniform);
        assert_eq!(color.direction, Direction::In);
        assert_eq!(block.node().output_count(), 0);
    }

    #[test]
    fn material_rejects_disagreeing_phases() {
        let mut cx = BlockContext::new();
        let err = Block::material(
            &mut cx,
            "void main(in vec3 tintIn) { }",
            "void main(in vec4 tintIn) { }",
        )
        .unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>(),
            Some(&CompileError::OutletConflict {
                name: "tintIn".into()
            })
        );
    }

    #[test]
    fn snippet_cannot_be_compiled() {
        let mut cx = BlockContext::new();
        let mut graph = ShaderGraph::new();
        let index = graph.add(Block::snippet(&mut cx, "void main(out float v) { v = 1.0; }").unwrap());
        let err = graph.compile(index).unwrap_err();
        assert_eq!(
            err.downcast_ref::<CompileError>(),
            Some(&CompileError::NotAMaterial(index))
        );
    }

    #[test]
    fn property_bag_round_trips_values() {
        let mut cx = BlockContext::new();
        let mut block = Block::snippet(&mut cx, "void main() { }").unwrap();
        block
            .properties_mut()
            .insert("label".into(), serde_json::json!("Noise"));
        assert_eq!(block.properties()["label"], "Noise");
    }
}

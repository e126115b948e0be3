//! Call emission: the pull-based recursion that turns a block's fragment
//! into one call statement, compiling every upstream block it depends on.

use anyhow::{Result, anyhow, bail};

use crate::graph::{Node, OutletRef, ShaderGraph};

use super::{
    block::Block,
    errors::CompileError,
    program::{ExternalKind, Program},
    signature::Fragment,
    types::{BlockIndex, Direction, Phase},
};

/// State of one compilation: the graph being read, the program being
/// written and the `(block, phase)` insertions currently in progress.
pub struct CompileContext<'g> {
    graph: &'g ShaderGraph,
    program: Program,
    active: Vec<(BlockIndex, Phase)>,
}

impl<'g> CompileContext<'g> {
    pub fn new(graph: &'g ShaderGraph, program: Program) -> Self {
        Self {
            graph,
            program,
            active: Vec::new(),
        }
    }

    pub fn graph(&self) -> &'g ShaderGraph {
        self.graph
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    pub fn finish(self) -> Program {
        self.program
    }

    /// Insert `block` for `phase` unless the program already has it.
    ///
    /// Re-entering a pair that is still being inserted means the upstream
    /// links loop back on themselves.
    pub fn ensure_inserted(&mut self, block: &'g Block, phase: Phase, priority: u32) -> Result<()> {
        let key = (block.index(), phase);
        if self.active.contains(&key) {
            bail!(CompileError::CycleDetected {
                block: block.index(),
                phase,
            });
        }
        if self.program.include(block.index(), phase) {
            tracing::trace!(block = %block.index(), %phase, "already included");
            return Ok(());
        }

        self.active.push(key);
        let result = block.insert(self, phase, priority);
        self.active.pop();
        result
    }

    /// Fetch the variable produced by an upstream outlet, compiling its
    /// owner on demand.
    fn pull(&mut self, upstream: &OutletRef, phase: Phase, priority: u32) -> Result<String> {
        let (owner, outlet) = self.graph.resolve(upstream)?;
        owner.fetch(self, phase, outlet, priority)
    }
}

/// Call name unique across a compilation: phase, fragment name and the
/// owning block's construction index.
pub fn call_name(phase: Phase, fragment: &str, owner: BlockIndex) -> String {
    format!("sg_{phase}_{fragment}_{}", owner.0)
}

/// Emit one call of `fragment` for `node` into the program.
pub fn compile_call(
    cx: &mut CompileContext<'_>,
    phase: Phase,
    node: &Node,
    fragment: &Fragment,
    priority: u32,
) -> Result<()> {
    let owner = node
        .owner()
        .ok_or_else(|| anyhow!("node of fragment `{}` has no owning block", fragment.name()))?;
    let signature = fragment.signature();
    let mut args: Vec<String> = Vec::with_capacity(signature.parameters.len());

    for param in &signature.parameters {
        let outlet = node.get(&param.name)?;
        let variable = match param.direction {
            Direction::In => {
                let Some(upstream) = &outlet.upstream else {
                    bail!(CompileError::MissingConnection {
                        block: owner,
                        parameter: param.name.clone(),
                        outlet: outlet.name.clone(),
                    });
                };
                cx.pull(upstream, phase, priority + 1)?
            }
            Direction::Out => outlet.id().to_string(),
        };
        cx.program.variable(phase, &variable, param.ty)?;
        args.push(variable);
    }

    let mut replaced: Vec<String> = Vec::new();
    for uniform in &signature.uniforms {
        let outlet = node.get(&uniform.name)?;
        match &outlet.upstream {
            Some(upstream) => {
                let variable = cx.pull(upstream, phase, priority + 1)?;
                cx.program.variable(phase, &variable, uniform.ty)?;
                args.push(variable);
                replaced.push(uniform.name.clone());
            }
            None => cx.program.external(
                ExternalKind::Uniform,
                &uniform.name,
                uniform.ty,
                uniform.value.clone(),
            )?,
        }
    }

    let name = call_name(phase, fragment.name(), owner);
    let body = fragment.compile(&name, &replaced);
    tracing::debug!(%phase, call = %name, priority, args = args.len(), "emitting call");
    cx.program.add(phase, owner, name, args, body, priority);
    Ok(())
}

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, bail};

use crate::compiler::{
    block::Block,
    errors::CompileError,
    outlets::OutletSpec,
    program::CompiledProgram,
    types::{BlockIndex, Direction, GlslType, OutletCategory},
};

/// Where an input outlet takes its value from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutletRef {
    pub block: BlockIndex,
    pub outlet: String,
}

impl OutletRef {
    pub fn new(block: BlockIndex, outlet: impl Into<String>) -> Self {
        Self {
            block,
            outlet: outlet.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Outlet {
    pub name: String,
    pub ty: GlslType,
    pub direction: Direction,
    pub upstream: Option<OutletRef>,
    pub required: bool,
    pub hint: String,
    pub category: OutletCategory,
    pub value: Option<String>,
    id: String,
}

impl Outlet {
    /// Variable name holding this outlet's value in generated code.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Graph vertex wrapped by exactly one Block.
#[derive(Clone, Debug, Default)]
pub struct Node {
    outlets: Vec<Outlet>,
    owner: Option<BlockIndex>,
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&Outlet> {
        match self.outlets.iter().find(|o| o.name == name) {
            Some(outlet) => Ok(outlet),
            None => bail!(CompileError::UnknownOutlet {
                block: self.owner,
                outlet: name.to_string(),
            }),
        }
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Outlet> {
        let owner = self.owner;
        match self.outlets.iter_mut().find(|o| o.name == name) {
            Some(outlet) => Ok(outlet),
            None => bail!(CompileError::UnknownOutlet {
                block: owner,
                outlet: name.to_string(),
            }),
        }
    }

    pub fn outlets(&self) -> &[Outlet] {
        &self.outlets
    }

    /// Number of OUT outlets; zero means the node is a sink.
    pub fn output_count(&self) -> usize {
        self.outlets
            .iter()
            .filter(|o| o.direction == Direction::Out)
            .count()
    }

    pub fn owner(&self) -> Option<BlockIndex> {
        self.owner
    }

    /// Set the owning block. Happens once, when the block is constructed.
    pub fn bind_owner(&mut self, owner: BlockIndex) -> Result<()> {
        if let Some(existing) = self.owner {
            bail!(CompileError::OwnerAlreadyBound(existing));
        }
        self.owner = Some(owner);
        Ok(())
    }

    /// Replace the outlet set. Outlet ids embed the owner index, so the owner
    /// must be bound first for ids to be unique across blocks.
    pub fn set_outlets(&mut self, specs: Vec<OutletSpec>) {
        let owner = self.owner.map_or(0, |o| o.0);
        self.outlets = specs
            .into_iter()
            .enumerate()
            .map(|(slot, spec)| Outlet {
                id: format!("v_{}_{owner}_{slot}", spec.hint),
                name: spec.name,
                ty: spec.ty,
                direction: spec.direction,
                upstream: None,
                required: spec.required,
                hint: spec.hint,
                category: spec.category,
                value: spec.value,
            })
            .collect();
    }
}

/// Arena of blocks keyed by construction index.
#[derive(Debug, Default)]
pub struct ShaderGraph {
    blocks: BTreeMap<BlockIndex, Block>,
}

impl ShaderGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, block: Block) -> BlockIndex {
        let index = block.index();
        self.blocks.insert(index, block);
        index
    }

    pub fn block(&self, index: BlockIndex) -> Result<&Block> {
        match self.blocks.get(&index) {
            Some(block) => Ok(block),
            None => bail!(CompileError::UnknownBlock(index)),
        }
    }

    pub fn block_mut(&mut self, index: BlockIndex) -> Result<&mut Block> {
        match self.blocks.get_mut(&index) {
            Some(block) => Ok(block),
            None => bail!(CompileError::UnknownBlock(index)),
        }
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Wire `from` (an OUT outlet) into `to` (an IN outlet), replacing any
    /// existing upstream of `to`.
    pub fn connect(&mut self, from: (BlockIndex, &str), to: (BlockIndex, &str)) -> Result<()> {
        let invalid = |reason| CompileError::InvalidConnection {
            from: format!("{}.{}", from.0, from.1),
            to: format!("{}.{}", to.0, to.1),
            reason,
        };

        let source = self.block(from.0)?.node().get(from.1)?;
        if source.direction != Direction::Out {
            bail!(invalid("source outlet is not an output"));
        }

        let target = self.block_mut(to.0)?.node_mut().get_mut(to.1)?;
        if target.direction != Direction::In {
            bail!(invalid("target outlet is not an input"));
        }
        target.upstream = Some(OutletRef::new(from.0, from.1));
        Ok(())
    }

    /// Remove the upstream of `to`, returning what it was connected from.
    pub fn disconnect(&mut self, to: (BlockIndex, &str)) -> Result<Option<OutletRef>> {
        let target = self.block_mut(to.0)?.node_mut().get_mut(to.1)?;
        Ok(target.upstream.take())
    }

    /// Move `child` under `parent` in the grouping tree.
    pub fn adopt(&mut self, parent: BlockIndex, child: BlockIndex) -> Result<()> {
        self.block(child)?;
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                bail!("block {child} can't be grouped under its own descendant {parent}");
            }
            cursor = self.block(current)?.parent();
        }

        if let Some(old) = self.block(child)?.parent() {
            self.block_mut(old)?.children.retain(|c| *c != child);
        }
        self.block_mut(parent)?.children.push(child);
        self.block_mut(child)?.parent = Some(parent);
        Ok(())
    }

    /// Compile the material block at `material` into program text.
    pub fn compile(&self, material: BlockIndex) -> Result<CompiledProgram> {
        self.block(material)?.compile(self)
    }

    /// Resolve an upstream reference to the block owning it and the outlet.
    pub fn resolve(&self, upstream: &OutletRef) -> Result<(&Block, &Outlet)> {
        let node = self.block(upstream.block)?.node();
        let outlet = node.get(&upstream.outlet)?;
        let owner = match node.owner() {
            Some(owner) => owner,
            None => bail!(CompileError::UnknownBlock(upstream.block)),
        };
        Ok((self.block(owner)?, outlet))
    }

    /// Blocks reachable from `start` by following upstream links, `start` included.
    pub fn upstream_reachable(&self, start: BlockIndex) -> HashSet<BlockIndex> {
        let mut incoming: HashMap<BlockIndex, Vec<BlockIndex>> = HashMap::new();
        for block in self.blocks.values() {
            for outlet in block.node().outlets() {
                if let Some(upstream) = &outlet.upstream {
                    incoming.entry(block.index()).or_default().push(upstream.block);
                }
            }
        }

        let mut visited: HashSet<BlockIndex> = HashSet::new();
        let mut stack: Vec<BlockIndex> = vec![start];
        while let Some(n) = stack.pop() {
            if !visited.insert(n) {
                continue;
            }
            if let Some(prevs) = incoming.get(&n) {
                stack.extend(prevs.iter().copied());
            }
        }
        visited
    }
}

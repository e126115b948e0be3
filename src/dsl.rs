//! JSON description of a block graph, as saved by an editor.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::compiler::{Block, BlockContext, BlockIndex, BlockKind, CompiledProgram, Fragment};
use crate::graph::ShaderGraph;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphDSL {
    pub version: String,
    pub metadata: Metadata,
    pub blocks: Vec<BlockDef>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Id of the material to compile; optional when there is only one.
    #[serde(default)]
    pub material: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Metadata {
    pub name: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BlockDef {
    pub id: String,
    #[serde(flatten)]
    pub source: BlockSource,
    /// Base name for generated calls. Defaults to the entry function name
    /// for snippets and to `material` for materials.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BlockSource {
    Snippet { code: String },
    Material { vertex: String, fragment: String },
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Connection {
    #[serde(default)]
    pub id: Option<String>,
    pub from: Endpoint,
    pub to: Endpoint,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Endpoint {
    #[serde(rename = "blockId")]
    pub block_id: String,
    pub outlet: String,
}

/// A graph instantiated from its description.
#[derive(Debug)]
pub struct BuiltGraph {
    pub graph: ShaderGraph,
    pub ids: HashMap<String, BlockIndex>,
    pub material: BlockIndex,
}

impl BuiltGraph {
    pub fn compile(&self) -> Result<CompiledProgram> {
        self.graph.compile(self.material)
    }
}

pub fn load_graph_from_path(path: impl AsRef<std::path::Path>) -> Result<GraphDSL> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph json at {}", path.display()))?;
    parse_graph(&text).with_context(|| format!("in {}", path.display()))
}

pub fn parse_graph(text: &str) -> Result<GraphDSL> {
    serde_json::from_str(text).context("failed to parse graph json")
}

pub fn find_block(ids: &HashMap<String, BlockIndex>, block_id: &str) -> Result<BlockIndex> {
    ids.get(block_id)
        .copied()
        .ok_or_else(|| anyhow!("block not found: {block_id}"))
}

impl GraphDSL {
    /// Instantiate every block in document order, then wire groups and
    /// connections.
    pub fn build(&self, cx: &mut BlockContext) -> Result<BuiltGraph> {
        let mut graph = ShaderGraph::new();
        let mut ids: HashMap<String, BlockIndex> = HashMap::new();

        for def in &self.blocks {
            if ids.contains_key(&def.id) {
                bail!("duplicate block id: {}", def.id);
            }
            let mut block = def
                .instantiate(cx)
                .with_context(|| format!("failed to build block `{}`", def.id))?;
            block.properties_mut().extend(def.properties.clone());
            ids.insert(def.id.clone(), graph.add(block));
        }

        for def in &self.blocks {
            if let Some(parent) = &def.parent {
                graph.adopt(find_block(&ids, parent)?, find_block(&ids, &def.id)?)?;
            }
        }

        for (i, c) in self.connections.iter().enumerate() {
            let label = c.id.clone().unwrap_or_else(|| format!("#{i}"));
            let from = find_block(&ids, &c.from.block_id)?;
            let to = find_block(&ids, &c.to.block_id)?;
            graph
                .connect((from, &c.from.outlet), (to, &c.to.outlet))
                .with_context(|| format!("invalid connection {label}"))?;
        }

        let material = self.material_block(&graph, &ids)?;
        tracing::debug!(
            graph = %self.metadata.name,
            blocks = graph.len(),
            connections = self.connections.len(),
            "graph built"
        );

        Ok(BuiltGraph {
            graph,
            ids,
            material,
        })
    }

    fn material_block(
        &self,
        graph: &ShaderGraph,
        ids: &HashMap<String, BlockIndex>,
    ) -> Result<BlockIndex> {
        if let Some(id) = &self.material {
            let index = find_block(ids, id)?;
            if !graph.block(index)?.is_material() {
                bail!("block `{id}` is not a material");
            }
            return Ok(index);
        }

        let materials: Vec<&BlockDef> = self
            .blocks
            .iter()
            .filter(|b| matches!(b.source, BlockSource::Material { .. }))
            .collect();
        if materials.len() != 1 {
            bail!(
                "expected exactly 1 material block (or an explicit `material`), got {}",
                materials.len()
            );
        }
        find_block(ids, &materials[0].id)
    }
}

impl BlockDef {
    fn instantiate(&self, cx: &mut BlockContext) -> Result<Block> {
        match &self.source {
            BlockSource::Snippet { code } => {
                let fragment = match &self.name {
                    Some(name) => Fragment::named(name, code)?,
                    None => Fragment::parse(code)?,
                };
                Block::new(cx, BlockKind::Snippet(fragment))
            }
            BlockSource::Material { vertex, fragment } => Block::material_named(
                cx,
                self.name.as_deref().unwrap_or("material"),
                vertex,
                fragment,
            ),
        }
    }
}

/// Build `dsl` in a fresh context and compile its material.
pub fn compile_graph(dsl: &GraphDSL) -> Result<CompiledProgram> {
    let mut cx = BlockContext::new();
    dsl.build(&mut cx)?.compile()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_json(material: &str) -> String {
        format!(
            r#"{{
  "version": "1.0",
  "metadata": {{ "name": "test" }},
  "blocks": [
    {{ "id": "c", "type": "snippet", "name": "constant", "code": "void main(out vec4 colorOut) {{ colorOut = vec4(1.0); }}", "properties": {{ "x": 10 }} }},
    {{ "id": "m", "type": "material", "vertex": "void main() {{ gl_Position = vec4(0.0); }}", "fragment": "void main(in vec4 colorIn) {{ gl_FragColor = colorIn; }}" }}
  ],
  "connections": [
    {{ "from": {{ "blockId": "c", "outlet": "colorOut" }}, "to": {{ "blockId": "m", "outlet": "colorIn" }} }}
  ]{material}
}}"#
        )
    }

    #[test]
    fn builds_blocks_in_document_order() {
        let dsl = parse_graph(&graph_json("")).unwrap();
        let mut cx = BlockContext::new();
        let built = dsl.build(&mut cx).unwrap();

        assert_eq!(built.ids["c"], BlockIndex(1));
        assert_eq!(built.ids["m"], BlockIndex(2));
        assert_eq!(built.material, BlockIndex(2));
        assert_eq!(
            built.graph.block(BlockIndex(1)).unwrap().properties()["x"],
            serde_json::json!(10)
        );

        let program = built.compile().unwrap();
        assert!(program.fragment.contains("sg_fragment_constant_1(v_color_1_0);"));
        assert!(program.fragment.contains("sg_fragment_material_2(v_color_1_0);"));
    }

    #[test]
    fn material_name_sets_call_base_name() {
        let mut dsl = parse_graph(&graph_json("")).unwrap();
        dsl.blocks[1].name = Some("unlit".into());
        let program = compile_graph(&dsl).unwrap();
        assert!(program.vertex.contains("    sg_vertex_unlit_2();\n"));
        assert!(program.fragment.contains("    sg_fragment_unlit_2(v_color_1_0);\n"));
        assert!(!program.fragment.contains("material"));
    }

    #[test]
    fn explicit_material_must_be_a_material() {
        let dsl = parse_graph(&graph_json(r#", "material": "c""#)).unwrap();
        let err = dsl.build(&mut BlockContext::new()).unwrap_err();
        assert!(err.to_string().contains("is not a material"));
    }

    #[test]
    fn unknown_connection_endpoint_fails() {
        let mut dsl = parse_graph(&graph_json("")).unwrap();
        dsl.connections[0].from.block_id = "ghost".into();
        let err = dsl.build(&mut BlockContext::new()).unwrap_err();
        assert!(err.to_string().contains("block not found: ghost"));
    }

    #[test]
    fn duplicate_ids_fail() {
        let mut dsl = parse_graph(&graph_json("")).unwrap();
        let dup = dsl.blocks[0].clone();
        dsl.blocks.push(dup);
        let err = dsl.build(&mut BlockContext::new()).unwrap_err();
        assert!(err.to_string().contains("duplicate block id: c"));
    }
}

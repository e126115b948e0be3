use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use shader_graph::{compiler::BlockContext, dsl, logging};

#[derive(Debug, Default, Clone)]
struct Cli {
    graph_json: Option<PathBuf>,
    material: Option<String>,
    output_dir: Option<PathBuf>,
    json: bool,
    log_level: Option<String>,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--json" => {
                cli.json = true;
                i += 1;
            }
            "--graph-json" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph-json"));
                };
                cli.graph_json = Some(PathBuf::from(v));
                i += 2;
            }
            "--material" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --material"));
                };
                cli.material = Some(v.clone());
                i += 2;
            }
            "--outputdir" | "--output-dir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --output-dir"));
                };
                cli.output_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--log-level" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --log-level"));
                };
                cli.log_level = Some(v.clone());
                i += 2;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --graph-json <graph.json>, --material <id>, --output-dir <dir>, --json, --log-level <filter>)"
                ));
            }
        }
    }
    if cli.json && cli.output_dir.is_some() {
        return Err(anyhow!("--json and --output-dir can't be combined"));
    }
    Ok(cli)
}

fn write_program(output_dir: &Path, name: &str, vertex: &str, fragment: &str) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    for (ext, text) in [("vert", vertex), ("frag", fragment)] {
        let path = output_dir.join(format!("{name}.{ext}"));
        std::fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
        println!("[compile] saved: {}", path.display());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let path = cli
        .graph_json
        .ok_or_else(|| anyhow!("--graph-json <graph.json> is required"))?;

    let mut graph = dsl::load_graph_from_path(&path)?;
    if cli.material.is_some() {
        graph.material = cli.material;
    }

    let built = graph.build(&mut BlockContext::new())?;
    let program = built
        .compile()
        .with_context(|| format!("failed to compile {}", path.display()))?;

    if let Some(output_dir) = cli.output_dir {
        let name = shader_graph::compiler::signature::sanitize_ident(&graph.metadata.name);
        write_program(&output_dir, &name, &program.vertex, &program.fragment)?;
    } else if cli.json {
        println!("{}", serde_json::to_string_pretty(&program)?);
    } else {
        println!("// vertex\n{}\n// fragment\n{}", program.vertex, program.fragment);
    }
    Ok(())
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_cli(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let level = cli.log_level.clone().unwrap_or_else(|| "warn".to_string());
    if let Err(e) = logging::init(&level) {
        eprintln!("[startup] {e:#}");
    }

    if let Err(e) = run(cli) {
        tracing::error!("{e:#}");
        eprintln!("[compile] failed: {e:#}");
        std::process::exit(1);
    }
}

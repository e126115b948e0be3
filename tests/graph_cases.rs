use std::path::PathBuf;

use shader_graph::{
    compiler::{BlockIndex, CompileError, CompiledProgram, Phase},
    dsl,
};

#[derive(Clone, Debug)]
struct Case {
    name: &'static str,
    vertex_calls: &'static [&'static str],
    fragment_calls: &'static [&'static str],
    uniforms: &'static [&'static str],
}

const CASES: &[Case] = &[
    Case {
        name: "tinted-gradient",
        vertex_calls: &["sg_vertex_material_5"],
        fragment_calls: &[
            "sg_fragment_uv_1",
            "sg_fragment_gradient_2",
            "sg_fragment_amount_4",
            "sg_fragment_tint_3",
            "sg_fragment_material_5",
        ],
        uniforms: &["top", "bottom"],
    },
    Case {
        name: "vertex-wave",
        vertex_calls: &["sg_vertex_time_1", "sg_vertex_wave_2", "sg_vertex_material_4"],
        fragment_calls: &["sg_fragment_time_1", "sg_fragment_wave_2", "sg_fragment_material_4"],
        uniforms: &["seconds", "deep"],
    },
];

fn cases_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("cases")
}

fn compile_case(name: &str) -> anyhow::Result<CompiledProgram> {
    let path = cases_root().join(name).join("graph.json");
    assert!(path.exists(), "case {name}: missing graph json at {}", path.display());
    let graph = dsl::load_graph_from_path(&path)?;
    dsl::compile_graph(&graph)
}

fn call_names(program: &CompiledProgram, phase: Phase) -> Vec<&str> {
    program.calls_in(phase).map(|c| c.name.as_str()).collect()
}

#[test]
fn graph_cases_compile_to_expected_calls() {
    for case in CASES {
        let program = compile_case(case.name)
            .unwrap_or_else(|e| panic!("case {}: compile failed: {e:#}", case.name));

        assert_eq!(
            call_names(&program, Phase::Vertex),
            case.vertex_calls,
            "case {}: vertex calls",
            case.name
        );
        assert_eq!(
            call_names(&program, Phase::Fragment),
            case.fragment_calls,
            "case {}: fragment calls",
            case.name
        );
        let uniforms: Vec<&str> = program.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(uniforms, case.uniforms, "case {}: uniforms", case.name);

        for phase in Phase::ALL {
            let source = program.source(phase);
            assert!(
                source.ends_with("}\n") && source.contains("void main() {\n"),
                "case {}: malformed {phase} source:\n{source}",
                case.name
            );
            for call in program.calls_in(phase) {
                assert!(
                    source.contains(&format!(" {}(", call.name)),
                    "case {}: body of {} missing from {phase} source",
                    case.name,
                    call.name
                );
            }
        }
    }
}

#[test]
fn graph_cases_are_deterministic() {
    for case in CASES {
        let first = compile_case(case.name).unwrap();
        let second = compile_case(case.name).unwrap();
        assert_eq!(first, second, "case {}: output differs between runs", case.name);
    }
}

#[test]
fn tinted_gradient_wires_outputs_into_consumers() {
    let program = compile_case("tinted-gradient").unwrap();
    let text = &program.fragment;

    assert!(text.starts_with("uniform vec3 top;\nuniform vec3 bottom;\n\n"));
    assert!(text.contains("vec3 sg_fragment_tint_3_boost(vec3 c) {"));
    assert!(!text.contains("brighten"));
    assert!(text.contains(
        "    sg_fragment_tint_3(v_color_2_1, v_amount_4_0, v_color_3_2);\n    sg_fragment_material_5(v_color_3_2);\n"
    ));

    let defaults: Vec<Option<&str>> = program.uniforms.iter().map(|u| u.value.as_deref()).collect();
    assert_eq!(defaults, vec![Some("vec3(0.2, 0.4, 0.9)"), Some("vec3(1.0)")]);
}

#[test]
fn vertex_wave_compiles_the_explicit_material_only() {
    let program = compile_case("vertex-wave").unwrap();
    assert!(program.calls.iter().all(|c| c.origin != BlockIndex(3)));
    assert!(program.vertex.contains("    float v_offset_2_1;\n"));
    assert!(program.fragment.contains("    float v_offset_2_1;\n"));
}

#[test]
fn missing_input_case_reports_the_unconnected_parameter() {
    let err = compile_case("missing-input").unwrap_err();
    assert_eq!(
        err.downcast_ref::<CompileError>(),
        Some(&CompileError::MissingConnection {
            block: BlockIndex(1),
            parameter: "uvIn".into(),
            outlet: "uvIn".into(),
        })
    );
}

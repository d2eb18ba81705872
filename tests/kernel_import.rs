//! Kernel files on disk through the full pipeline.

use std::io::Write;

use loopguard::kernel::KernelFile;
use loopguard::{AnalysisConfig, AnalysisPipeline, NodeId};
use tempfile::NamedTempFile;

/// for i in 0..n { A[i] = 0 }, A holding 8 elements
const FILL: &str = r#"{
    "arrays": [ { "name": "A", "ty": "IntArray", "dims": [8] } ],
    "nodes": [
        { "node": "var", "name": "n", "ty": "Int" },
        { "node": "var", "name": "i", "ty": "Int" },
        { "node": "array_access", "array": 0, "indices": [1] },
        { "node": "literal", "value": { "Int": 0 } },
        { "node": "assign", "target": 2, "value": 3 },
        { "node": "for", "info": 0, "body": 4 }
    ],
    "loops": [
        { "induction": "i", "range": { "form": "symbolic", "stop": 0 } }
    ],
    "regions": [5],
    "constants": [ { "name": "n", "value": { "Int": 8 }, "ty": "Int" } ]
}"#;

fn write_temp(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();
    file
}

#[test]
fn test_symbolic_loop_from_file() {
    let file = write_temp(FILL);
    let kernel = KernelFile::from_file(file.path()).unwrap().into_kernel().unwrap();

    let outcomes = AnalysisPipeline::new(AnalysisConfig::default()).analyze_kernel(&kernel);
    assert_eq!(outcomes.len(), 1);
    let report = outcomes[0].report.as_ref().unwrap();
    assert_eq!(report.requires_runtime_check(NodeId(2)), Some(false));
    let range = report.loops[0].range.unwrap();
    assert_eq!((range.start, range.stop, range.step), (0, 8, 1));
    assert_eq!(report.profile.iterations, Some(8));
}

#[test]
fn test_larger_instantiation_restores_check() {
    let text = FILL.replace(
        r#""regions": [5],"#,
        r#""regions": [5], "instantiations": [ { "n": 16 } ],"#,
    );
    let file = write_temp(&text);
    let kernel = KernelFile::from_file(file.path()).unwrap().into_kernel().unwrap();

    let outcomes = AnalysisPipeline::new(AnalysisConfig::default()).analyze_kernel(&kernel);
    let report = outcomes[0].report.as_ref().unwrap();
    assert_eq!(report.retries, 1);
    assert_eq!(report.requires_runtime_check(NodeId(2)), Some(true));
}

#[test]
fn test_config_file_drives_pipeline() {
    let config_file = write_temp(r#"{ "bound_check": false, "concurrent": false }"#);
    let config = AnalysisConfig::from_file(config_file.path()).unwrap();
    assert_eq!(config.retry_limit, 5);

    let kernel = KernelFile::from_json(FILL).unwrap().into_kernel().unwrap();
    let outcomes = AnalysisPipeline::new(config).analyze_kernel(&kernel);
    let report = outcomes[0].report.as_ref().unwrap();
    assert_eq!(report.requires_runtime_check(NodeId(2)), Some(true));
}

#[test]
fn test_malformed_kernel_is_rejected() {
    let file = write_temp(r#"{ "nodes": [ { "node": "var" } ], "regions": [] }"#);
    assert!(KernelFile::from_file(file.path()).is_err());

    let dangling = FILL.replace(r#""indices": [1]"#, r#""indices": [42]"#);
    assert!(KernelFile::from_json(&dangling).unwrap().into_kernel().is_err());
}

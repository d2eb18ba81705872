//! End-to-end checks of the analysis pipeline on small hand-built loops.

use std::collections::HashMap;
use std::sync::Arc;

use loopguard::array::{ArrayBinding, ArrayInfo, ArrayStorage};
use loopguard::ast::{ArrayId, BinOpKind};
use loopguard::loop_info::LoopInfo;
use loopguard::{AnalysisConfig, AnalysisPipeline, Ast, DataType, NodeId, StaticOracle};

fn int_array(ast: &mut Ast, name: &str, n: i64) -> ArrayId {
    let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[n]).unwrap());
    ast.add_array(ArrayBinding::new(name, info))
}

fn no_constants() -> HashMap<String, i64> {
    HashMap::new()
}

struct Shift {
    ast: Ast,
    root: NodeId,
    write: NodeId,
    read: NodeId,
    next: NodeId,
}

/// for i in 0..10 { A[i] = B[i + 1] }
fn shift_kernel() -> Shift {
    let mut ast = Ast::new();
    let a = int_array(&mut ast, "A", 10);
    let b = int_array(&mut ast, "B", 10);
    let i = ast.var("i", DataType::Int);
    let one = ast.int(1);
    let next = ast.binop(BinOpKind::Add, i, one);
    let read = ast.access(b, vec![next]);
    let write = ast.access(a, vec![i]);
    let stmt = ast.assign(write, read);
    let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), stmt);
    Shift {
        ast,
        root,
        write,
        read,
        next,
    }
}

#[test]
fn test_off_by_one_read_keeps_its_check() {
    let k = shift_kernel();
    let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
    let report = pipeline.analyze_loop(&k.ast, k.root, &no_constants(), &[]).unwrap();

    assert_eq!(report.requires_runtime_check(k.write), Some(false));
    assert_eq!(report.requires_runtime_check(k.read), Some(true));
    assert_eq!(report.requires_runtime_check(k.next), Some(false));
    assert_eq!(report.minimum_index, 0);
}

#[test]
fn test_disabled_bound_check_keeps_every_check() {
    let k = shift_kernel();
    let config = AnalysisConfig {
        bound_check: false,
        ..AnalysisConfig::default()
    };
    let report = AnalysisPipeline::new(config)
        .analyze_loop(&k.ast, k.root, &no_constants(), &[])
        .unwrap();
    assert!(report.accesses.iter().all(|c| c.requires_runtime_check));
    assert!(report.overflow_checks.iter().all(|c| c.requires_runtime_check));
}

#[test]
fn test_oracle_verdict_decides_parallel_depth() {
    let k = shift_kernel();
    let dependent = AnalysisPipeline::new(AnalysisConfig::default())
        .with_oracle(Box::new(StaticOracle::dependent()));
    let report = dependent.analyze_loop(&k.ast, k.root, &no_constants(), &[]).unwrap();
    let deps = report.dependences.as_ref().unwrap();
    assert!(!deps.loops[0].safe_to_parallelize);
    assert_eq!(report.parallel_depth, 0);

    let independent = AnalysisPipeline::new(AnalysisConfig::default())
        .with_oracle(Box::new(StaticOracle::independent()));
    let report = independent.analyze_loop(&k.ast, k.root, &no_constants(), &[]).unwrap();
    assert_eq!(report.parallel_depth, 1);
}

#[test]
fn test_dependence_check_can_be_disabled() {
    let k = shift_kernel();
    let config = AnalysisConfig {
        check_dependencies: false,
        ..AnalysisConfig::default()
    };
    let report = AnalysisPipeline::new(config)
        .analyze_loop(&k.ast, k.root, &no_constants(), &[])
        .unwrap();
    assert!(report.dependences.is_none());
    assert_eq!(report.parallel_depth, 0);
}

/// for i in 0..100000 { A[0] = i * i }, with `i` typed as `ty`
fn square_kernel(ty: DataType) -> (Ast, NodeId, NodeId) {
    let mut ast = Ast::new();
    let a = int_array(&mut ast, "A", 1);
    let i = ast.var("i", ty);
    let zero = ast.int(0);
    let square = ast.binop(BinOpKind::Mul, i, i);
    let target = ast.access(a, vec![zero]);
    let stmt = ast.assign(target, square);
    let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, 100_000, 1), stmt);
    (ast, root, square)
}

#[test]
fn test_int_square_may_overflow() {
    let (ast, root, square) = square_kernel(DataType::Int);
    let report = AnalysisPipeline::new(AnalysisConfig::default())
        .analyze_loop(&ast, root, &no_constants(), &[])
        .unwrap();
    assert_eq!(report.requires_runtime_check(square), Some(true));
}

#[test]
fn test_long_square_fits() {
    let (ast, root, square) = square_kernel(DataType::Long);
    let report = AnalysisPipeline::new(AnalysisConfig::default())
        .analyze_loop(&ast, root, &no_constants(), &[])
        .unwrap();
    assert_eq!(report.requires_runtime_check(square), Some(false));
}

/// for i in 0..4 { A[IDX[i]] = 1 } where IDX holds `contents`
fn gather_kernel(contents: Vec<i64>) -> (Ast, NodeId, NodeId) {
    let mut ast = Ast::new();
    let a = int_array(&mut ast, "A", 4);
    let info = Arc::new(ArrayInfo::new(DataType::IntArray, &[4]).unwrap());
    let idx = ast.add_array(
        ArrayBinding::new("IDX", info)
            .with_storage(Arc::new(ArrayStorage::new(contents)))
            .read_only(),
    );
    let i = ast.var("i", DataType::Int);
    let one = ast.int(1);
    let slot = ast.access(idx, vec![i]);
    let target = ast.access(a, vec![slot]);
    let stmt = ast.assign(target, one);
    let (_, root) = ast.for_loop(LoopInfo::simple("i", 0, 4, 1), stmt);
    (ast, root, target)
}

#[test]
fn test_indirect_index_bounded_by_contents() {
    let (ast, root, target) = gather_kernel(vec![0, 3, 1, 2]);
    let pipeline = AnalysisPipeline::new(AnalysisConfig::default());
    let report = pipeline.analyze_loop(&ast, root, &no_constants(), &[]).unwrap();
    assert_eq!(report.requires_runtime_check(target), Some(false));
    assert_eq!(report.scanned_arrays.len(), 1);
    assert_eq!(report.scanned_arrays[0].name, "IDX");

    let (ast, root, target) = gather_kernel(vec![0, 4, 1, 2]);
    let report = pipeline.analyze_loop(&ast, root, &no_constants(), &[]).unwrap();
    assert_eq!(report.requires_runtime_check(target), Some(true));
}

#[test]
fn test_indirect_index_without_scanning() {
    let (ast, root, target) = gather_kernel(vec![0, 3, 1, 2]);
    let config = AnalysisConfig {
        scan_array_min_max: false,
        ..AnalysisConfig::default()
    };
    let report = AnalysisPipeline::new(config)
        .analyze_loop(&ast, root, &no_constants(), &[])
        .unwrap();
    assert_eq!(report.requires_runtime_check(target), Some(true));
    assert!(report.scanned_arrays.is_empty());
}

#[test]
fn test_sequential_and_concurrent_regions_agree() {
    let k = shift_kernel();
    let concurrent = AnalysisPipeline::new(AnalysisConfig::default());
    let sequential = AnalysisPipeline::new(AnalysisConfig {
        concurrent: false,
        ..AnalysisConfig::default()
    });
    let roots = [k.root, k.root];
    let a = concurrent.analyze_regions(&k.ast, &roots, &no_constants(), &[]);
    let b = sequential.analyze_regions(&k.ast, &roots, &no_constants(), &[]);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn test_two_statement_update_with_dependent_oracle() {
    // for i in 0..10 { C[i] = C[i] + 1; C[i] = C[i] * 2 }
    let mut ast = Ast::new();
    let c = int_array(&mut ast, "C", 10);
    let i = ast.var("i", DataType::Int);
    let one = ast.int(1);
    let two = ast.int(2);

    let r1 = ast.access(c, vec![i]);
    let inc = ast.binop(BinOpKind::Add, r1, one);
    let w1 = ast.access(c, vec![i]);
    let s1 = ast.assign(w1, inc);

    let r2 = ast.access(c, vec![i]);
    let dbl = ast.binop(BinOpKind::Mul, r2, two);
    let w2 = ast.access(c, vec![i]);
    let s2 = ast.assign(w2, dbl);

    let body = ast.block(vec![s1, s2]);
    let (loop_id, root) = ast.for_loop(LoopInfo::simple("i", 0, 10, 1), body);

    let report = AnalysisPipeline::new(AnalysisConfig::default())
        .with_oracle(Box::new(StaticOracle::dependent()))
        .analyze_loop(&ast, root, &no_constants(), &[])
        .unwrap();
    let deps = report.dependences.as_ref().unwrap();
    assert!(!deps.is_safe(loop_id));
    assert_eq!(deps.verdict(loop_id).unwrap().reason, "loop carries a dependence");
    assert!(report.accesses.iter().all(|a| !a.requires_runtime_check));
}

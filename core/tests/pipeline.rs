use std::cell::RefCell;

use kiln_core::ir::{
    Attribute, Linkage, Module, Op, Operand, StackMap, VerificationError, parse_module, verify_module,
};
use kiln_core::pipeline::{
    Collaborators, OptimizationError, PanicStrategy, PassConfig, Phase, PhaseObserver, Pipeline, VerifyStage,
    optimize,
};
use kiln_core::transform::{self, LoweringError};

fn module(text: &str) -> Module {
    parse_module(text, "test.kir").unwrap()
}

const PANICKY: &str = "module panicky
declare @runtime._panic(ptr) -> void
declare @runtime.runtimePanic(ptr) -> void
define @main(i64) -> i64 {
bb0:
  %0 : i1 = icmp slt $0, 0:i64
  condbr %0, bb1, bb2
bb1:
  call @runtime._panic(null)
  br bb2
bb2:
  call @runtime.runtimePanic(null)
  ret $0
}
";

fn trap_precedes_every_failure_call(m: &Module) -> bool {
    let failures: Vec<_> = ["runtime._panic", "runtime.runtimePanic"]
        .iter()
        .filter_map(|n| m.named_function(n))
        .collect();
    m.functions.iter().all(|f| {
        f.blocks.iter().all(|b| {
            b.insts.iter().enumerate().all(|(i, inst)| match inst.op.direct_callee() {
                Some(c) if failures.contains(&c) => i > 0 && b.insts[i - 1].op == Op::Trap,
                _ => true,
            })
        })
    })
}

#[test]
fn trap_strategy_puts_a_trap_before_each_failure_call() {
    let mut m = module(PANICKY);
    let config = PassConfig::new().with_panic_strategy(PanicStrategy::Trap);
    optimize(&mut m, &config).unwrap();
    assert!(trap_precedes_every_failure_call(&m));
    assert_eq!(m.count_insts(|i| i.op == Op::Trap), 2);
    verify_module(&m).unwrap();
}

#[test]
fn failure_function_used_as_a_value_is_a_precondition_violation() {
    let mut m = module(
        "module bad
declare @runtime._panic(ptr) -> void
global @handler : ptr = null internal
define @main() -> void {
bb0:
  store @handler, @runtime._panic
  call @runtime._panic(null)
  ret
}
",
    );
    let before = m.clone();
    let config = PassConfig::new().with_panic_strategy(PanicStrategy::Trap);
    let err = optimize(&mut m, &config).unwrap_err();
    assert!(matches!(err, OptimizationError::Precondition(_)));
    assert_eq!(m, before);
}

#[test]
fn size_level_two_trap_end_to_end() {
    let mut m = module(
        "module e2e
declare @runtime._panic(ptr) -> void
define @main() -> void {
bb0:
  call @runtime._panic(null)
  ret
}
",
    );
    let config = PassConfig::new()
        .with_opt_level(1)
        .with_size_level(2)
        .with_panic_strategy(PanicStrategy::Trap)
        .with_verify_ir(true);
    let report = optimize(&mut m, &config).unwrap();

    let main = m.function(m.named_function("main").unwrap());
    assert!(main.has_attr(Attribute::OptSize));
    assert!(trap_precedes_every_failure_call(&m));
    assert!(!m.has_high_level_constructs());
    verify_module(&m).unwrap();
    assert!(report.executed().any(|p| p == Phase::TagOptSize));
}

#[test]
fn nil_checks_through_a_cast_and_directly_are_lowered() {
    let mut m = module(
        "module nil
declare @runtime.isnil(ptr) -> i1 readnone
define @check(ptr, ptr) -> i1 {
bb0:
  %0 : ptr = bitcast $0
  %1 : i1 = call @runtime.isnil(%0)
  %2 : i1 = call @runtime.isnil($1)
  %3 : i1 = and %1, %2
  ret %3
}
",
    );
    optimize(&mut m, &PassConfig::new().with_opt_level(1)).unwrap();

    if let Some(helper) = m.named_function("runtime.isnil") {
        assert!(m.uses_of_func(helper).is_empty());
    }
    let check = m.function(m.named_function("check").unwrap());
    let compared: Vec<Operand> = check
        .insts()
        .filter_map(|i| match &i.op {
            Op::ICmp { lhs, rhs, .. } if *rhs == Operand::null() => Some(lhs.clone()),
            _ => None,
        })
        .collect();
    assert!(compared.contains(&Operand::Arg(0)));
    assert!(compared.contains(&Operand::Arg(1)));
    verify_module(&m).unwrap();
}

#[test]
fn nil_checks_stay_calls_without_optimization() {
    let mut m = module(
        "module nil
declare @runtime.isnil(ptr) -> i1 readnone
define @check(ptr) -> i1 {
bb0:
  %0 : i1 = call @runtime.isnil($0)
  ret %0
}
",
    );
    optimize(&mut m, &PassConfig::new()).unwrap();
    let helper = m.named_function("runtime.isnil").unwrap();
    assert_eq!(m.uses_of_func(helper).len(), 1);
}

#[test]
fn collection_bundle_is_idempotent() {
    let mut m = module(
        "module bundle
declare @consume(ptr) -> void
define @f(ptr) -> i8 {
bb0:
  %0 : ptr = map.make
  map.update %0, 1:i64, 2:i64
  %1 : ptr = string.tobytes $0
  %2 : i8 = load %1
  %3 : ptr = alloc 8:i64
  store %3, %2
  %4 : i8 = load %3
  %5 : ptr = alloc 8:i64
  call @consume(%5)
  ret %4
}
",
    );
    let constructs = |m: &Module| {
        m.count_insts(|i| {
            matches!(i.op, Op::MapMake | Op::MapUpdate { .. } | Op::StringToBytes { .. } | Op::Alloc { .. })
        })
    };
    let mut counts = Vec::new();
    for _ in 0..2 {
        transform::optimize_maps(&mut m);
        transform::optimize_string_to_bytes(&mut m);
        transform::optimize_allocs(&mut m);
        verify_module(&m).unwrap();
        counts.push(constructs(&m));
    }
    // only the escaping allocation is left
    assert_eq!(counts, vec![1, 1]);
}

const HIGH_LEVEL: &str = "module zoo
type Dog { speak = @Dog.speak }
declare @sink(i64) -> void
define @Dog.speak(i64) -> i64 {
bb0:
  ret 1:i64
}
define @double(i64, ptr) -> i64 {
bb0:
  %0 : i64 = mul $0, 2:i64
  ret %0
}
define @worker(i64) -> void {
bb0:
  yield
  call @sink($0)
  ret
}
define @main(i64) -> i64 {
bb0:
  %0 : iface = iface.make Dog, $0
  %1 : i64 = iface.invoke %0, speak()
  %2 : funcval = func.make @double, null
  %3 : i64 = func.call %2(%1)
  spawn @worker(%3)
  %4 : i64 = iface.invoke %0, speak()
  %5 : i64 = add %3, %4
  ret %5
}
";

#[test]
fn unoptimized_run_still_lowers_every_high_level_construct() {
    let mut m = module(HIGH_LEVEL);
    assert!(m.has_high_level_constructs());
    optimize(&mut m, &PassConfig::new()).unwrap();
    assert!(!m.has_high_level_constructs());
    assert_eq!(m.count_insts(|i| matches!(i.op, Op::FrameSize { .. })), 0);
    verify_module(&m).unwrap();
}

#[test]
fn optimized_run_lowers_tasks_and_registers_gc_roots() {
    let mut m = module(HIGH_LEVEL);
    let report = optimize(&mut m, &PassConfig::new().with_opt_level(2).with_verify_ir(true)).unwrap();
    assert!(!m.has_high_level_constructs());

    let worker = m.function(m.named_function("worker").unwrap());
    assert!(worker.frame_size.is_some());
    let spawn_task = m.named_function("runtime.spawnTask").unwrap();
    assert_eq!(m.uses_of_func(spawn_task).len(), 1);
    assert!(m.functions.iter().any(|f| f.stack_map.is_some()));
    assert!(report.executed().any(|p| p == Phase::VerifyGc));
    verify_module(&m).unwrap();
}

const FRAMED: &str = "module framed
declare @consume(ptr, ptr) -> void
define @runtime.gcPushFrame(ptr) -> void {
bb0:
  ret
}
define @runtime.gcPopFrame(ptr) -> void {
bb0:
  ret
}
define @main() -> void {
bb0:
  %0 : ptr = alloc 16:i64
  %1 : ptr = alloc 16:i64
  call @consume(%0, %1)
  call @consume(%1, %0)
  ret
}
";

#[test]
fn gc_frame_functions_survive_linkage_finalization() {
    let mut m = module(FRAMED);
    optimize(&mut m, &PassConfig::new().with_opt_level(1)).unwrap();

    for name in ["runtime.gcPushFrame", "runtime.gcPopFrame"] {
        let id = m.named_function(name).unwrap();
        let f = m.function(id);
        assert!(!f.is_declaration(), "{} lost its definition", name);
        assert_eq!(f.linkage, Linkage::External);
        assert_eq!(m.uses_of_func(id).len(), 1);
    }
    let main = m.function(m.named_function("main").unwrap());
    assert_eq!(main.stack_map, Some(StackMap { slots: 2 }));
    verify_module(&m).unwrap();
}

#[test]
fn lowering_errors_propagate_unchanged() {
    let mut m = module(
        "module blocking
define @sleeper() -> void {
bb0:
  yield
  ret
}
define @main() -> void {
bb0:
  call @sleeper()
  ret
}
",
    );
    let err = optimize(&mut m, &PassConfig::new()).unwrap_err();
    assert_eq!(
        err,
        OptimizationError::Lowering(LoweringError::BlockingCall {
            caller: "main".to_string(),
            callee: "sleeper".to_string()
        })
    );
}

const INLINE: &str = "module inline
define internal @add1(i64) -> i64 {
bb0:
  %0 : i64 = add $0, 1:i64
  ret %0
}
define @main(i64) -> i64 {
bb0:
  %0 : i64 = call @add1($0)
  ret %0
}
";

#[test]
fn inliner_needs_a_nonzero_threshold() {
    let calls = |m: &Module| m.count_insts(|i| i.op.direct_callee().is_some());

    let mut m = module(INLINE);
    optimize(&mut m, &PassConfig::new().with_opt_level(2)).unwrap();
    assert_eq!(calls(&m), 1);

    let mut m = module(INLINE);
    optimize(&mut m, &PassConfig::new().with_opt_level(2).with_inliner_threshold(225)).unwrap();
    assert_eq!(calls(&m), 0);
    assert!(m.named_function("add1").is_none());
    verify_module(&m).unwrap();

    let mut m = module(INLINE);
    optimize(&mut m, &PassConfig::new().with_inliner_threshold(225)).unwrap();
    assert_eq!(calls(&m), 1);
}

/// Fails verification at a chosen call and records which passes ran.
struct Recorder {
    fail_verify_at: usize,
    verifies: RefCell<usize>,
    calls: RefCell<Vec<&'static str>>,
}

impl Recorder {
    fn failing_at(n: usize) -> Self {
        Recorder { fail_verify_at: n, verifies: RefCell::new(0), calls: RefCell::new(Vec::new()) }
    }
}

impl Collaborators for Recorder {
    fn verify(&self, module: &Module) -> Result<(), VerificationError> {
        self.calls.borrow_mut().push("verify");
        *self.verifies.borrow_mut() += 1;
        if *self.verifies.borrow() == self.fail_verify_at {
            return Err(VerificationError { diagnostics: Vec::new() });
        }
        verify_module(module)
    }

    fn lower_tasks(&self, module: &mut Module) -> Result<usize, LoweringError> {
        self.calls.borrow_mut().push("lower_tasks");
        transform::lower_tasks(module)
    }

    fn finalize_linkage(&self, module: &mut Module) -> usize {
        self.calls.borrow_mut().push("finalize_linkage");
        transform::finalize_linkage(module)
    }

    fn add_globals_bitmap(&self, module: &mut Module) -> bool {
        self.calls.borrow_mut().push("add_globals_bitmap");
        transform::add_globals_bitmap(module)
    }
}

#[derive(Default)]
struct Phases(Vec<Phase>);

impl PhaseObserver for Phases {
    fn phase_started(&mut self, phase: Phase) {
        self.0.push(phase);
    }

    fn phase_finished(&mut self, _phase: Phase, _changed: bool) {}
}

#[test]
fn failing_input_gate_stops_before_any_mutation() {
    let mut m = module(INLINE);
    let before = m.clone();
    let recorder = Recorder::failing_at(1);
    let config = PassConfig::new().with_opt_level(2).with_verify_ir(true);
    let err = Pipeline::new(config).with_collaborators(&recorder).run(&mut m).unwrap_err();
    assert!(matches!(err, OptimizationError::Verification { stage: VerifyStage::Input, .. }));
    assert_eq!(*recorder.calls.borrow(), vec!["verify"]);
    assert_eq!(m, before);
}

#[test]
fn failing_lowering_gate_skips_later_phases() {
    let mut m = module(INLINE);
    let recorder = Recorder::failing_at(1);
    let mut phases = Phases::default();
    let config = PassConfig::new().with_opt_level(1).with_size_level(2);
    let err = Pipeline::new(config)
        .with_collaborators(&recorder)
        .with_observer(&mut phases)
        .run(&mut m)
        .unwrap_err();

    assert_eq!(err.to_string(), "optimizations caused a verification failure");
    assert_eq!(*recorder.calls.borrow(), vec!["lower_tasks", "verify"]);
    assert_eq!(phases.0.last(), Some(&Phase::VerifyLowered));
    assert!(m.functions.iter().all(|f| !f.has_attr(Attribute::OptSize)));
}

#[test]
fn gc_gate_reports_its_own_stage() {
    let mut m = module(
        "module gc
global @root : ptr = null
define @main() -> void {
bb0:
  ret
}
",
    );
    // the lowering gate passes, the GC gate fails
    let recorder = Recorder::failing_at(2);
    let err = Pipeline::new(PassConfig::new()).with_collaborators(&recorder).run(&mut m).unwrap_err();
    assert_eq!(err.to_string(), "GC pass caused a verification failure");
    assert!(recorder.calls.borrow().contains(&"add_globals_bitmap"));
}

//! The interpreter and compiled code agree on every input.

use otter_ic_interp::{InterpreterError, Outcome, interpret};
use otter_ic_ir::{
    Int32OperandId, IntPtrOperandId, ObjOperandId, StubData, StubProgram, StubWriter,
    ValueTagOperandId, ValueType,
};
use otter_ic_jit::{ExitStatus, JitCompiler, JitConfig};
use otter_ic_object::{IcContext, Value};
use proptest::prelude::*;

fn finish(writer: StubWriter) -> (StubProgram, StubData) {
    writer.finish().expect("program should finish")
}

/// Run `program` through both backends and compare the outcome classes and
/// returned bits.
fn assert_equivalent(
    jit: &mut JitCompiler,
    program: &StubProgram,
    data: &StubData,
    ctx: &mut IcContext,
    inputs: &[Value],
) -> Result<(), TestCaseError> {
    let interpreted = interpret(program, data, inputs, ctx).expect("interpreter should accept");
    let compiled = jit.compile(program, data).expect("stub should compile");
    // SAFETY: the compiler is alive and every input lives in `ctx`.
    let (status, value) =
        unsafe { compiled.execute(ctx, inputs, data) }.expect("compiled stub should run");
    match interpreted {
        Outcome::Return(expected) => {
            prop_assert_eq!(status, ExitStatus::Return, "inputs {:?}", inputs);
            prop_assert_eq!(value.to_bits(), expected.to_bits(), "inputs {:?}", inputs);
        }
        Outcome::Bailout => prop_assert_eq!(status, ExitStatus::Bailout, "inputs {:?}", inputs),
        Outcome::Exception => prop_assert_eq!(status, ExitStatus::Exception, "inputs {:?}", inputs),
        Outcome::UnsupportedOp => prop_assert!(false, "unexpected unsupported op"),
    }
    Ok(())
}

fn special_double() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0),
        Just(-0.0),
        Just(f64::NAN),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        Just(0.5),
        Just(-0.5),
        Just(1.5),
        Just(2.5),
        Just(255.5),
        Just(2_147_483_647.0),
        Just(2_147_483_648.0),
        Just(-2_147_483_648.0),
        Just(-2_147_483_649.0),
        Just(4_294_967_296.0),
        Just(9_223_372_036_854_775_808.0),
        Just(-9_223_372_036_854_775_808.0),
        Just(f64::MAX),
        Just(f64::MIN_POSITIVE),
    ]
}

fn any_primitive() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i32>().prop_map(Value::int32),
        any::<f64>().prop_map(Value::double),
        special_double().prop_map(Value::double),
        (-1_000_000i64..1_000_000).prop_map(|i| Value::double(i as f64)),
        Just(Value::undefined()),
        Just(Value::null()),
        any::<bool>().prop_map(Value::boolean),
    ]
}

fn int32_index_stub() -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<Int32OperandId>();
    writer.guard_to_int32_index(writer.input(0), index);
    writer.load_int32_result(index);
    writer.return_from_ic();
    finish(writer)
}

fn mod_uint32_stub() -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    let n = writer.new_operand::<Int32OperandId>();
    writer.guard_to_int32_mod_uint32(writer.input(0), n);
    writer.load_int32_result(n);
    writer.return_from_ic();
    finish(writer)
}

fn uint8_clamped_stub() -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    let n = writer.new_operand::<Int32OperandId>();
    writer.guard_to_uint8_clamped(writer.input(0), n);
    writer.load_int32_result(n);
    writer.return_from_ic();
    finish(writer)
}

fn intptr_index_stub(support_oob: bool) -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_is_number(writer.input(0));
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), support_oob, index);
    writer.load_int_ptr_result(index);
    writer.return_from_ic();
    finish(writer)
}

fn tag_not_equal_stub() -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(2);
    let lhs = writer.new_operand::<ValueTagOperandId>();
    let rhs = writer.new_operand::<ValueTagOperandId>();
    writer.load_value_tag(writer.input(0), lhs);
    writer.load_value_tag(writer.input(1), rhs);
    writer.guard_tag_not_equal(lhs, rhs);
    writer.load_boolean_result(true);
    writer.return_from_ic();
    finish(writer)
}

fn non_double_type_stub(ty: ValueType) -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    writer.guard_non_double_type(writer.input(0), ty);
    writer.load_undefined_result();
    writer.return_from_ic();
    finish(writer)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_int32_index_agrees(input in any_primitive()) {
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = int32_index_stub();
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[input])?;
    }

    #[test]
    fn prop_mod_uint32_agrees(input in any_primitive()) {
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = mod_uint32_stub();
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[input])?;
    }

    #[test]
    fn prop_uint8_clamped_agrees(input in any_primitive()) {
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = uint8_clamped_stub();
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[input])?;
    }

    #[test]
    fn prop_intptr_index_agrees(input in any_primitive(), support_oob in any::<bool>()) {
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = intptr_index_stub(support_oob);
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[input])?;
    }

    #[test]
    fn prop_tag_comparison_agrees(lhs in any_primitive(), rhs in any_primitive()) {
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = tag_not_equal_stub();
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[lhs, rhs])?;
    }

    #[test]
    fn prop_non_double_type_agrees(input in any_primitive(), pick in 0usize..4) {
        let ty = [ValueType::Int32, ValueType::Boolean, ValueType::Undefined, ValueType::Null][pick];
        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        let mut ctx = IcContext::new();
        let (program, data) = non_double_type_stub(ty);
        assert_equivalent(&mut jit, &program, &data, &mut ctx, &[input])?;
    }

    #[test]
    fn prop_dense_element_load_agrees(
        elements in proptest::collection::vec(any_primitive(), 0..6),
        holes in proptest::collection::vec(any::<bool>(), 6),
        index in -2i32..8,
    ) {
        let elements: Vec<Value> = elements
            .into_iter()
            .zip(holes)
            .map(|(value, hole)| if hole { Value::hole() } else { value })
            .collect();
        let mut ctx = IcContext::new();
        let array = ctx.heap_mut().new_array(elements);

        let mut writer = StubWriter::new(2);
        let obj = writer.new_operand::<ObjOperandId>();
        let n = writer.new_operand::<Int32OperandId>();
        writer.guard_to_object(writer.input(0), obj);
        writer.guard_to_int32(writer.input(1), n);
        writer.load_dense_element_result(obj, n);
        writer.return_from_ic();
        let (program, data) = finish(writer);

        let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
        assert_equivalent(
            &mut jit,
            &program,
            &data,
            &mut ctx,
            &[Value::object(array), Value::int32(index)],
        )?;
    }
}

#[test]
fn test_runtime_returns_same_results_in_both_tiers() {
    use otter_ic_exec::{IcRuntime, IcStub, RuntimeOptions, StubTier};

    let (program, data) = uint8_clamped_stub();
    let mut runtime = IcRuntime::new(RuntimeOptions {
        hot_threshold: 3,
        ..RuntimeOptions::default()
    });
    let mut stub = IcStub::new(program, data);
    let mut ctx = IcContext::new();
    let inputs = [
        Value::double(2.5),
        Value::int32(-4),
        Value::double(f64::NAN),
        Value::double(300.0),
        Value::double(3.5),
        Value::int32(17),
    ];
    let expected = [2, 0, 0, 255, 4, 17];
    for (i, (input, want)) in inputs.iter().zip(expected).enumerate() {
        let outcome = runtime
            .execute(&mut stub, &[*input], &mut ctx)
            .expect("run should succeed");
        assert_eq!(outcome, Outcome::Return(Value::int32(want)), "run {i}");
    }
    assert_eq!(stub.tier(), StubTier::Compiled);
    let stats = runtime.stats();
    assert_eq!(stats.interpreted_runs, 3);
    assert_eq!(stats.compiled_runs, 3);
}

#[test]
fn test_unguarded_number_read_is_malformed_in_both_backends() {
    let (program, data) = intptr_index_stub_unguarded();
    let mut jit = JitCompiler::new(JitConfig::default()).expect("jit initialization should succeed");
    let compiled = jit.compile(&program, &data).expect("stub should compile");
    let mut ctx = IcContext::new();
    let string = ctx.heap_mut().new_string("7");
    for input in [Value::undefined(), Value::boolean(true), Value::string(string)] {
        let interpreted = interpret(&program, &data, &[input], &mut ctx);
        assert!(
            matches!(interpreted, Err(InterpreterError::Malformed(_))),
            "{input:?}: {interpreted:?}"
        );
        // SAFETY: the compiler is alive and every input lives in `ctx`.
        let (status, _) =
            unsafe { compiled.execute(&mut ctx, &[input], &data) }.expect("compiled stub should run");
        assert_eq!(status, ExitStatus::Malformed, "{input:?}");
    }
}

fn intptr_index_stub_unguarded() -> (StubProgram, StubData) {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), true, index);
    writer.load_int_ptr_result(index);
    writer.return_from_ic();
    finish(writer)
}

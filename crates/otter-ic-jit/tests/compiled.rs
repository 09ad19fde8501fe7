//! Compiled stubs run against a live heap.

use otter_ic_ir::{
    GuardClassKind, Int32OperandId, IntPtrOperandId, ObjOperandId, StringOperandId, StubData,
    StubFieldType, StubProgram, StubWriter,
};
use otter_ic_jit::{CompiledStub, ExitStatus, JitCompiler, JitConfig, StubFieldPolicy};
use otter_ic_object::number::{clamp_double_to_uint8, number_truncates_to_intptr};
use otter_ic_object::object::JsObject;
use otter_ic_object::regexp::RegExpFlags;
use otter_ic_object::shape::{ARRAY_CLASS, PLAIN_OBJECT_CLASS};
use otter_ic_object::{IcContext, RuntimeError, Value};
use proptest::prelude::*;

struct Harness {
    /// Owns the code `stub` points into.
    _jit: JitCompiler,
    stub: CompiledStub,
    data: StubData,
}

impl Harness {
    fn new(writer: StubWriter, config: JitConfig) -> Self {
        let (program, data): (StubProgram, StubData) =
            writer.finish().expect("program should finish");
        let mut jit = JitCompiler::new(config).expect("jit initialization should succeed");
        let stub = jit.compile(&program, &data).expect("stub should compile");
        Self {
            _jit: jit,
            stub,
            data,
        }
    }

    fn run(&self, ctx: &mut IcContext, inputs: &[Value]) -> (ExitStatus, Value) {
        // SAFETY: `self._jit` owns the code and every input lives in `ctx`.
        unsafe { self.stub.execute(ctx, inputs, &self.data) }.expect("stub should run")
    }
}

fn slot_reader(shape_word: u64, config: JitConfig) -> Harness {
    let mut writer = StubWriter::new(1);
    let obj = writer.new_operand::<ObjOperandId>();
    let shape_field = writer.add_field(StubFieldType::Shape, shape_word);
    let offset = writer.add_int32_field(JsObject::fixed_slot_offset(1));
    writer.guard_to_object(writer.input(0), obj);
    writer.guard_shape(obj, shape_field);
    writer.load_fixed_slot_result(obj, offset);
    writer.return_from_ic();
    Harness::new(writer, config)
}

#[test]
fn test_slot_load_under_both_field_policies() {
    let mut ctx = IcContext::new();
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let object = ctx.heap_mut().new_object(shape);
    object.set_fixed_slot(1, Value::double(-0.0));

    for policy in [StubFieldPolicy::Constant, StubFieldPolicy::Address] {
        let harness = slot_reader(shape.to_word(), JitConfig::default().with_field_policy(policy));
        let (status, value) = harness.run(&mut ctx, &[Value::object(object)]);
        assert_eq!(status, ExitStatus::Return);
        assert_eq!(value.to_bits(), (-0.0f64).to_bits());
    }
}

#[test]
fn test_address_policy_reads_patched_data() {
    let mut ctx = IcContext::new();
    let first = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let second = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let object = ctx.heap_mut().new_object(second);
    object.set_fixed_slot(1, Value::int32(9));

    let config = JitConfig::default().with_field_policy(StubFieldPolicy::Address);
    let harness = slot_reader(first.to_word(), config.clone());
    assert_eq!(
        harness.run(&mut ctx, &[Value::object(object)]).0,
        ExitStatus::Bailout
    );

    // Same layout, different shape word: the compiled code picks it up.
    let mut writer = StubWriter::new(1);
    writer.add_field(StubFieldType::Shape, second.to_word());
    writer.add_int32_field(JsObject::fixed_slot_offset(1));
    writer.return_from_ic();
    let (_, patched) = writer.finish().expect("program should finish");
    // SAFETY: the object lives in `ctx`; `patched` has the compiled layout.
    let result = unsafe { harness.stub.execute(&mut ctx, &[Value::object(object)], &patched) };
    assert_eq!(
        result.expect("stub should run"),
        (ExitStatus::Return, Value::int32(9))
    );
}

#[test]
fn test_spectre_mitigation_does_not_change_results() {
    let mut ctx = IcContext::new();
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let object = ctx.heap_mut().new_object(shape);
    object.set_fixed_slot(1, Value::int32(5));
    for enabled in [true, false] {
        let harness = slot_reader(
            shape.to_word(),
            JitConfig::default().with_spectre_mitigations(enabled),
        );
        assert_eq!(
            harness.run(&mut ctx, &[Value::object(object)]),
            (ExitStatus::Return, Value::int32(5))
        );
        assert_eq!(
            harness.run(&mut ctx, &[Value::undefined()]),
            (ExitStatus::Bailout, Value::undefined())
        );
    }
}

#[test]
fn test_is_number_accepts_nan_and_negative_zero() {
    let mut writer = StubWriter::new(1);
    writer.guard_is_number(writer.input(0));
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());
    let mut ctx = IcContext::new();

    for input in [Value::double(f64::NAN), Value::double(-0.0), Value::int32(3)] {
        assert_eq!(
            harness.run(&mut ctx, &[input]),
            (ExitStatus::Return, Value::undefined())
        );
    }
    for input in [Value::null(), Value::undefined(), Value::boolean(true)] {
        assert_eq!(harness.run(&mut ctx, &[input]).0, ExitStatus::Bailout);
    }
}

#[test]
fn test_intptr_index_oob_sentinel() {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), true, index);
    writer.load_int_ptr_result(index);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());
    let mut ctx = IcContext::new();

    assert_eq!(
        harness.run(&mut ctx, &[Value::double(3.5)]),
        (ExitStatus::Return, Value::int32(-1))
    );
    assert_eq!(
        harness.run(&mut ctx, &[Value::int32(12)]),
        (ExitStatus::Return, Value::int32(12))
    );
    assert_eq!(
        harness.run(&mut ctx, &[Value::double(8589934592.0)]),
        (ExitStatus::Return, Value::double(8589934592.0))
    );
}

#[test]
fn test_unguarded_number_read_exits_malformed() {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), false, index);
    writer.load_int_ptr_result(index);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());
    let mut ctx = IcContext::new();

    for input in [Value::undefined(), Value::null(), Value::boolean(false)] {
        assert_eq!(harness.run(&mut ctx, &[input]).0, ExitStatus::Malformed, "{input:?}");
    }
    assert_eq!(harness.run(&mut ctx, &[Value::double(0.5)]).0, ExitStatus::Bailout);
}

#[test]
fn test_dense_element_load() {
    let mut writer = StubWriter::new(2);
    let obj = writer.new_operand::<ObjOperandId>();
    let index = writer.new_operand::<Int32OperandId>();
    writer.guard_to_object(writer.input(0), obj);
    writer.guard_class(obj, GuardClassKind::Array);
    writer.guard_to_int32(writer.input(1), index);
    writer.load_dense_element_result(obj, index);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());

    let mut ctx = IcContext::new();
    let array = ctx
        .heap_mut()
        .new_array(vec![Value::int32(10), Value::hole(), Value::double(0.5)]);
    let mut run = |index: i32| harness.run(&mut ctx, &[Value::object(array), Value::int32(index)]);
    assert_eq!(run(0), (ExitStatus::Return, Value::int32(10)));
    assert_eq!(run(2), (ExitStatus::Return, Value::double(0.5)));
    assert_eq!(run(1).0, ExitStatus::Bailout);
    assert_eq!(run(3).0, ExitStatus::Bailout);
    assert_eq!(run(-1).0, ExitStatus::Bailout);
}

#[test]
fn test_has_class_result() {
    let mut ctx = IcContext::new();
    let mut writer = StubWriter::new(1);
    let obj = writer.new_operand::<ObjOperandId>();
    let class = writer.add_field(StubFieldType::Class, ARRAY_CLASS.as_ptr() as u64);
    writer.guard_to_object(writer.input(0), obj);
    writer.has_class_result(obj, class);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());

    let array = ctx.heap_mut().new_array(Vec::new());
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 0, 0);
    let plain = ctx.heap_mut().new_object(shape);
    assert_eq!(
        harness.run(&mut ctx, &[Value::object(array)]),
        (ExitStatus::Return, Value::boolean(true))
    );
    assert_eq!(
        harness.run(&mut ctx, &[Value::object(plain)]),
        (ExitStatus::Return, Value::boolean(false))
    );
}

#[test]
fn test_regexp_call_out_and_flags() {
    let mut ctx = IcContext::new();
    let mut writer = StubWriter::new(3);
    let re = writer.new_operand::<ObjOperandId>();
    let input = writer.new_operand::<StringOperandId>();
    let last_index = writer.new_operand::<Int32OperandId>();
    writer.guard_to_object(writer.input(0), re);
    writer.guard_class(re, GuardClassKind::RegExp);
    writer.guard_to_string(writer.input(1), input);
    writer.guard_to_int32(writer.input(2), last_index);
    writer.call_reg_exp_tester_result(re, input, last_index);
    writer.return_from_ic();
    let tester = Harness::new(writer, JitConfig::default());
    assert!(tester.stub.summary().calls_helpers);

    let regexp = ctx
        .heap_mut()
        .new_regexp("o+", "g")
        .expect("pattern should compile");
    let s = ctx.heap_mut().new_string("foo bar");
    let inputs = |i: i32| [Value::object(regexp), Value::string(s), Value::int32(i)];
    assert_eq!(
        tester.run(&mut ctx, &inputs(0)),
        (ExitStatus::Return, Value::int32(3))
    );
    assert_eq!(
        tester.run(&mut ctx, &inputs(4)),
        (ExitStatus::Return, Value::int32(-1))
    );
    assert_eq!(tester.run(&mut ctx, &inputs(-2)).0, ExitStatus::Exception);
    assert_eq!(
        ctx.take_pending_exception(),
        Some(RuntimeError::InvalidLastIndex(-2))
    );

    let mut writer = StubWriter::new(1);
    let re = writer.new_operand::<ObjOperandId>();
    writer.guard_to_object(writer.input(0), re);
    writer.reg_exp_flag_result(re, (RegExpFlags::GLOBAL | RegExpFlags::STICKY) as i32);
    writer.return_from_ic();
    let flags = Harness::new(writer, JitConfig::default());
    assert_eq!(
        flags.run(&mut ctx, &[Value::object(regexp)]),
        (ExitStatus::Return, Value::boolean(true))
    );
}

#[test]
fn test_substring_exception_is_not_a_bailout() {
    let mut writer = StubWriter::new(3);
    let s = writer.new_operand::<StringOperandId>();
    let begin = writer.new_operand::<Int32OperandId>();
    let length = writer.new_operand::<Int32OperandId>();
    writer.guard_to_string(writer.input(0), s);
    writer.guard_to_int32(writer.input(1), begin);
    writer.guard_to_int32(writer.input(2), length);
    writer.call_substring_kernel_result(s, begin, length);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default());

    let mut ctx = IcContext::new();
    let string = ctx.heap_mut().new_string("inline");
    let (status, value) = harness.run(
        &mut ctx,
        &[Value::string(string), Value::int32(2), Value::int32(4)],
    );
    assert_eq!(status, ExitStatus::Return);
    assert_eq!(
        value.as_string().expect("result should be a string").to_rust_string(),
        "line"
    );

    let (status, _) = harness.run(
        &mut ctx,
        &[Value::string(string), Value::int32(4), Value::int32(4)],
    );
    assert_eq!(status, ExitStatus::Exception);
    assert!(ctx.pending_exception().is_some());
}

#[test]
fn test_tight_register_file_spills() {
    let mut ctx = IcContext::new();
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let object = ctx.heap_mut().new_object(shape);
    object.set_fixed_slot(1, Value::int32(77));

    let mut writer = StubWriter::new(3);
    let obj = writer.new_operand::<ObjOperandId>();
    let a = writer.new_operand::<Int32OperandId>();
    let b = writer.new_operand::<Int32OperandId>();
    let shape_field = writer.add_field(StubFieldType::Shape, shape.to_word());
    let offset = writer.add_int32_field(JsObject::fixed_slot_offset(1));
    writer.guard_to_int32(writer.input(1), a);
    writer.guard_to_int32(writer.input(2), b);
    writer.guard_to_object(writer.input(0), obj);
    writer.guard_shape(obj, shape_field);
    writer.load_fixed_slot_result(obj, offset);
    writer.return_from_ic();
    let harness = Harness::new(writer, JitConfig::default().with_general_registers(3));

    assert_eq!(
        harness.run(
            &mut ctx,
            &[Value::object(object), Value::int32(1), Value::int32(2)]
        ),
        (ExitStatus::Return, Value::int32(77))
    );
    assert_eq!(
        harness
            .run(
                &mut ctx,
                &[Value::object(object), Value::int32(1), Value::null()]
            )
            .0,
        ExitStatus::Bailout
    );
}

fn int32_conversion(emit: fn(&mut StubWriter, Int32OperandId)) -> Harness {
    let mut writer = StubWriter::new(1);
    let n = writer.new_operand::<Int32OperandId>();
    emit(&mut writer, n);
    writer.load_int32_result(n);
    writer.return_from_ic();
    Harness::new(writer, JitConfig::default())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_uint8_clamp_matches_reference(d in any::<f64>()) {
        let harness = int32_conversion(|w, n| {
            let input = w.input(0);
            w.guard_to_uint8_clamped(input, n);
        });
        let mut ctx = IcContext::new();
        let result = harness.run(&mut ctx, &[Value::double(d)]);
        prop_assert_eq!(result, (ExitStatus::Return, Value::int32(clamp_double_to_uint8(d))));
    }

    #[test]
    fn prop_mod_uint32_matches_reference(d in -1e19f64..1e19) {
        let harness = int32_conversion(|w, n| {
            let input = w.input(0);
            w.guard_to_int32_mod_uint32(input, n);
        });
        let mut ctx = IcContext::new();
        let result = harness.run(&mut ctx, &[Value::double(d)]);
        match number_truncates_to_intptr(d) {
            Some(i) => prop_assert_eq!(result, (ExitStatus::Return, Value::int32(i as i32))),
            None => prop_assert_eq!(result.0, ExitStatus::Bailout),
        }
    }
}

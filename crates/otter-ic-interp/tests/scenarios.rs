//! End-to-end interpreter runs over realistic stubs.

use otter_ic_interp::{Interpreter, Outcome, OperandValue, interpret};
use otter_ic_ir::{
    GuardClassKind, Int32OperandId, IntPtrOperandId, ObjOperandId, StringOperandId,
    StubFieldType, StubWriter, TypedOperandId, ValueType,
};
use otter_ic_object::object::JsObject;
use otter_ic_object::regexp::RegExpFlags;
use otter_ic_object::shape::{ARRAY_CLASS, PLAIN_OBJECT_CLASS};
use otter_ic_object::{IcContext, RuntimeError, Value};

fn fixed_slot_reader(ctx: &mut IcContext) -> (otter_ic_ir::StubProgram, otter_ic_ir::StubData, ObjOperandId, otter_ic_object::ShapeRef) {
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let mut writer = StubWriter::new(1);
    let obj = writer.new_operand::<ObjOperandId>();
    let shape_field = writer.add_field(StubFieldType::Shape, shape.to_word());
    let offset_field = writer.add_int32_field(JsObject::fixed_slot_offset(1));
    writer.guard_to_object(writer.input(0), obj);
    writer.guard_shape(obj, shape_field);
    writer.load_fixed_slot_result(obj, offset_field);
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    (program, data, obj, shape)
}

#[test]
fn test_shape_guarded_slot_load_returns_slot() {
    let mut ctx = IcContext::new();
    let (program, data, _, shape) = fixed_slot_reader(&mut ctx);
    let object = ctx.heap_mut().new_object(shape);
    object.set_fixed_slot(1, Value::int32(42));

    let outcome = interpret(&program, &data, &[Value::object(object)], &mut ctx);
    assert_eq!(outcome, Ok(Outcome::Return(Value::int32(42))));
}

#[test]
fn test_shape_mismatch_bails_after_narrowing() {
    let mut ctx = IcContext::new();
    let (program, data, obj, _) = fixed_slot_reader(&mut ctx);
    let other_shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 2, 2);
    let object = ctx.heap_mut().new_object(other_shape);
    object.set_fixed_slot(1, Value::int32(42));

    let mut interp = Interpreter::new(&program, &data, &mut ctx);
    assert_eq!(interp.run(&[Value::object(object)]), Ok(Outcome::Bailout));
    assert_eq!(interp.operand(obj.0), Some(&OperandValue::Object(object)));
}

#[test]
fn test_non_object_input_bails() {
    let mut ctx = IcContext::new();
    let (program, data, obj, _) = fixed_slot_reader(&mut ctx);
    let mut interp = Interpreter::new(&program, &data, &mut ctx);
    assert_eq!(interp.run(&[Value::int32(1)]), Ok(Outcome::Bailout));
    assert_eq!(interp.operand(obj.0), Some(&OperandValue::Uninitialized));
}

#[test]
fn test_is_number_accepts_nan() {
    let mut writer = StubWriter::new(1);
    writer.guard_is_number(writer.input(0));
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    let mut ctx = IcContext::new();

    for input in [Value::double(f64::NAN), Value::double(-0.0), Value::int32(3)] {
        assert_eq!(
            interpret(&program, &data, &[input], &mut ctx),
            Ok(Outcome::Return(Value::undefined()))
        );
    }
    assert_eq!(
        interpret(&program, &data, &[Value::null()], &mut ctx),
        Ok(Outcome::Bailout)
    );
}

#[test]
fn test_intptr_index_substitutes_oob_sentinel() {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), true, index);
    writer.load_int_ptr_result(index);
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    let mut ctx = IcContext::new();

    let mut interp = Interpreter::new(&program, &data, &mut ctx);
    assert_eq!(
        interp.run(&[Value::double(3.5)]),
        Ok(Outcome::Return(Value::int32(-1)))
    );
    assert_eq!(interp.operand(index.0), Some(&OperandValue::IntPtr(-1)));
    assert_eq!(
        interp.run(&[Value::double(8589934592.0)]),
        Ok(Outcome::Return(Value::double(8589934592.0)))
    );
}

#[test]
fn test_intptr_index_without_oob_bails() {
    let mut writer = StubWriter::new(1);
    let index = writer.new_operand::<IntPtrOperandId>();
    writer.guard_number_to_int_ptr_index(writer.input(0).into(), false, index);
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    let mut ctx = IcContext::new();
    assert_eq!(
        interpret(&program, &data, &[Value::double(3.5)], &mut ctx),
        Ok(Outcome::Bailout)
    );
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
    let (program, data) = writer.finish().unwrap();

    let mut ctx = IcContext::new();
    let array = ctx
        .heap_mut()
        .new_array(vec![Value::int32(10), Value::hole(), Value::double(0.5)]);
    let run = |ctx: &mut IcContext, index: i32| {
        interpret(&program, &data, &[Value::object(array), Value::int32(index)], ctx)
    };
    assert_eq!(run(&mut ctx, 0), Ok(Outcome::Return(Value::int32(10))));
    assert_eq!(run(&mut ctx, 2), Ok(Outcome::Return(Value::double(0.5))));
    assert_eq!(run(&mut ctx, 1), Ok(Outcome::Bailout));
    assert_eq!(run(&mut ctx, 3), Ok(Outcome::Bailout));
    assert_eq!(run(&mut ctx, -1), Ok(Outcome::Bailout));
}

#[test]
fn test_class_guards() {
    let mut ctx = IcContext::new();
    let mut writer = StubWriter::new(1);
    let obj = writer.new_operand::<ObjOperandId>();
    let class = writer.add_field(StubFieldType::Class, ARRAY_CLASS.as_ptr() as u64);
    writer.guard_to_object(writer.input(0), obj);
    writer.has_class_result(obj, class);
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();

    let array = ctx.heap_mut().new_array(Vec::new());
    let shape = ctx.heap_mut().new_shape(&PLAIN_OBJECT_CLASS, None, 0, 0);
    let plain = ctx.heap_mut().new_object(shape);
    assert_eq!(
        interpret(&program, &data, &[Value::object(array)], &mut ctx),
        Ok(Outcome::Return(Value::boolean(true)))
    );
    assert_eq!(
        interpret(&program, &data, &[Value::object(plain)], &mut ctx),
        Ok(Outcome::Return(Value::boolean(false)))
    );
}

#[test]
fn test_regexp_tester_and_flags() {
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
    let (program, data) = writer.finish().unwrap();

    let regexp = ctx.heap_mut().new_regexp("o+", "g").unwrap();
    let s = ctx.heap_mut().new_string("foo bar");
    let inputs = |i: i32| [Value::object(regexp), Value::string(s), Value::int32(i)];
    assert_eq!(
        interpret(&program, &data, &inputs(0), &mut ctx),
        Ok(Outcome::Return(Value::int32(3)))
    );
    assert_eq!(
        interpret(&program, &data, &inputs(4), &mut ctx),
        Ok(Outcome::Return(Value::int32(-1)))
    );
    assert_eq!(
        interpret(&program, &data, &inputs(-2), &mut ctx),
        Ok(Outcome::Exception)
    );
    assert_eq!(
        ctx.take_pending_exception(),
        Some(RuntimeError::InvalidLastIndex(-2))
    );

    let mut writer = StubWriter::new(1);
    let re = writer.new_operand::<ObjOperandId>();
    writer.guard_to_object(writer.input(0), re);
    writer.reg_exp_flag_result(re, (RegExpFlags::GLOBAL | RegExpFlags::STICKY) as i32);
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    assert_eq!(
        interpret(&program, &data, &[Value::object(regexp)], &mut ctx),
        Ok(Outcome::Return(Value::boolean(true)))
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
    let (program, data) = writer.finish().unwrap();

    let mut ctx = IcContext::new();
    let string = ctx.heap_mut().new_string("inline");
    let outcome = interpret(
        &program,
        &data,
        &[Value::string(string), Value::int32(2), Value::int32(4)],
        &mut ctx,
    )
    .unwrap();
    let Outcome::Return(value) = outcome else {
        panic!("expected return, got {outcome:?}");
    };
    assert_eq!(value.as_string().unwrap().to_rust_string(), "line");

    let outcome = interpret(
        &program,
        &data,
        &[Value::string(string), Value::int32(4), Value::int32(4)],
        &mut ctx,
    );
    assert_eq!(outcome, Ok(Outcome::Exception));
    assert!(ctx.pending_exception().is_some());
}

#[test]
fn test_typed_result_boxes_payload() {
    let mut writer = StubWriter::new(1);
    let b = writer.new_operand::<otter_ic_ir::BooleanOperandId>();
    writer.guard_to_boolean(writer.input(0), b);
    writer.load_typed_result(TypedOperandId::new(b.0, ValueType::Boolean));
    writer.return_from_ic();
    let (program, data) = writer.finish().unwrap();
    let mut ctx = IcContext::new();
    assert_eq!(
        interpret(&program, &data, &[Value::boolean(false)], &mut ctx),
        Ok(Outcome::Return(Value::boolean(false)))
    );
}

mod index_conversions {
    use super::*;
    use otter_ic_object::number::number_equals_int32;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_int32_index_follows_exact_conversion(d in any::<f64>()) {
            let mut writer = StubWriter::new(1);
            let index = writer.new_operand::<Int32OperandId>();
            let input = writer.input(0);
            writer.guard_to_int32_index(input, index);
            writer.load_int32_result(index);
            writer.return_from_ic();
            let (program, data) = writer.finish().unwrap();
            let mut ctx = IcContext::new();

            let outcome = interpret(&program, &data, &[Value::double(d)], &mut ctx);
            let expected = match number_equals_int32(d) {
                Some(i) => Outcome::Return(Value::int32(i)),
                None => Outcome::Bailout,
            };
            prop_assert_eq!(outcome, Ok(expected));
        }
    }
}

use vtcall::{
    BindError, CallError, Config, ConventionPolicy, NestedHandlePolicy, Value, ValueType,
    convert_ref,
    runtime::{marshal::MarshalError, vtable},
    schema::Descriptor,
};
use vtcall_test::*;

fn int(v: Option<Value>) -> i64 {
    match v {
        Some(Value::Int(i)) => i,
        other => panic!("expected an int, got {other:?}"),
    }
}

#[test]
fn multiply() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    let res = handle.call("multiply", &[3i32.into(), 4i32.into()]).unwrap();
    assert_eq!(res, Some(Value::Int(12)));
}

#[test]
fn name_returns_owned_string() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    assert_eq!(handle.call("name", &[]), Ok(Some(Value::Str("ok".into()))));
}

#[test]
fn slot_resolves_through_the_table() {
    let calc = Calculator::new(0);
    let word = size_of::<usize>();
    let entry = unsafe { vtable::resolve_slot(calc.addr(), 0, word) };
    assert_eq!(entry, Ok(multiply_entry()));
}

#[test]
fn reserved_slot_is_skipped() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    assert!(handle.slot(2).is_none());
    assert!(handle.method("reserved").is_none());
    assert_eq!(handle.slot(3).unwrap().name(), "add_offset");
}

#[test]
fn state_changes_are_visible() {
    let calc = Calculator::new(10);
    let handle = calc.bind().unwrap();
    assert_eq!(int(handle.call("add_offset", &[5i32.into()]).unwrap()), 15);
    assert_eq!(handle.call("set_offset", &[(-3i32).into()]), Ok(None));
    assert_eq!(int(handle.call("add_offset", &[5i32.into()]).unwrap()), 2);
}

#[test]
fn narrow_values() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    assert_eq!(
        handle.call("is_positive", &[5i32.into()]),
        Ok(Some(Value::Bool(true)))
    );
    assert_eq!(
        handle.call("is_positive", &[(-5i32).into()]),
        Ok(Some(Value::Bool(false)))
    );
    assert_eq!(handle.call("negate", &[5i8.into()]), Ok(Some(Value::Int(-5))));
    assert_eq!(
        handle.call("negate", &[(-100i8).into()]),
        Ok(Some(Value::Int(100)))
    );
}

#[test]
fn many_arguments() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    let args = (1..=6i32).map(Value::from).collect::<Vec<_>>();
    assert_eq!(int(handle.call("sum6", &args).unwrap()), 21);
}

#[test]
fn nested_handles() {
    let calc = Calculator::new(1);
    let handle = calc.bind().unwrap();
    let child = handle.call("child", &[]).unwrap().unwrap();
    let child = child.as_handle().unwrap();
    assert_eq!(child.record_name(), "Calculator");
    assert_eq!(int(child.call("add_offset", &[0i32.into()]).unwrap()), 2);

    let again = handle.call("child", &[]).unwrap().unwrap();
    assert_eq!(again.as_handle(), Some(child));

    let grandchild = child.call("child", &[]).unwrap().unwrap();
    let grandchild = grandchild.as_handle().unwrap();
    assert_eq!(int(grandchild.call("add_offset", &[0i32.into()]).unwrap()), 3);
}

#[test]
fn null_child_is_null() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    assert_eq!(handle.call("orphan", &[]), Ok(Some(Value::Null)));
}

#[test]
fn string_arguments() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    let greeter = handle.call("greeter", &[]).unwrap().unwrap();
    let greeter = greeter.as_handle().unwrap();
    assert_eq!(greeter.record_name(), "Greeter");
    assert_eq!(
        greeter.call("greet", &["world".into()]),
        Ok(Some(Value::Str("hello, world".into())))
    );
    assert_eq!(
        greeter.call("count_bytes", &["héllo".into()]),
        Ok(Some(Value::UInt(6)))
    );
    assert_eq!(
        greeter.call("greet", &["a\0b".into()]),
        Err(CallError::Marshal(MarshalError::InteriorNul))
    );
    let owner = greeter.call("owner", &[]).unwrap().unwrap();
    assert_eq!(owner.as_handle(), Some(&handle));
}

#[test]
fn string_round_trip_through_native() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    let greeter = handle.call("greeter", &[]).unwrap().unwrap();
    let greeter = greeter.as_handle().unwrap();
    for s in ["", "ok", "with spaces", "ünïcödé", "x".repeat(4096).as_str()] {
        assert_eq!(
            greeter.call("echo", &[s.into()]),
            Ok(Some(Value::Str(s.to_string())))
        );
    }
}

#[test]
fn string_bound_is_enforced() {
    let calc = Calculator::new(0);
    let binder = vtcall::Binder::new(Config {
        max_string_len: 8,
        ..fixture_config()
    });
    let handle = calc.bind_with(&binder).unwrap();
    let greeter = handle.call("greeter", &[]).unwrap().unwrap();
    let greeter = greeter.as_handle().unwrap();
    assert_eq!(
        greeter.call("echo", &["short".into()]),
        Ok(Some(Value::Str("short".into())))
    );
    assert_eq!(
        greeter.call("echo", &["far too long".into()]),
        Err(CallError::Marshal(MarshalError::Unterminated { max_len: 8 }))
    );
}

#[test]
fn zero_reference() {
    let mut out = None;
    let descriptor = fixture_schema().descriptor("Calculator");
    let res = unsafe { convert_ref(0, &descriptor, &mut out) };
    assert_eq!(res, Err(BindError::InvalidAddress));
    assert!(out.is_none());
}

#[test]
fn convert_ref_fills_the_output() {
    let calc = Calculator::new(0);
    let mut out = None;
    let descriptor = Descriptor::new(fixture_schema(), ValueType::handle("Calculator"));
    let binder = fixture_binder();
    unsafe { binder.convert_ref(calc.addr(), &descriptor, &mut out) }.unwrap();
    let handle = out.unwrap();
    assert_eq!(handle.reference().addr(), calc.addr());
    assert_eq!(int(handle.call("multiply", &[6i32.into(), 7i32.into()]).unwrap()), 42);
}

#[test]
fn binding_twice_is_independent() {
    let calc = Calculator::new(0);
    let a = calc.bind().unwrap();
    let b = calc.bind().unwrap();
    let args = [Value::from(9i32), Value::from(9i32)];
    assert_eq!(a.call("multiply", &args), b.call("multiply", &args));
    drop(a);
    assert_eq!(int(b.call("multiply", &args).unwrap()), 81);
}

#[test]
fn handles_are_shared_across_threads() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    std::thread::scope(|s| {
        for i in 0..4i32 {
            let handle = handle.clone();
            s.spawn(move || {
                for j in 0..100i32 {
                    let res = handle.call("multiply", &[i.into(), j.into()]).unwrap();
                    assert_eq!(res, Some(Value::Int((i * j) as i64)));
                }
            });
        }
    });
}

#[test]
fn call_errors_do_not_disable_the_handle() {
    let calc = Calculator::new(0);
    let handle = calc.bind().unwrap();
    assert!(matches!(
        handle.call("multiply", &[1i32.into()]),
        Err(CallError::ArgumentCount { .. })
    ));
    assert_eq!(int(handle.call("multiply", &[2i32.into(), 2i32.into()]).unwrap()), 4);
}

#[test]
fn zero_value_policy_still_binds_good_children() {
    let calc = Calculator::new(4);
    let binder = vtcall::Binder::new(Config {
        conventions: ConventionPolicy::Uniform,
        nested_handles: NestedHandlePolicy::ZeroValue,
        ..Config::default()
    });
    let handle = calc.bind_with(&binder).unwrap();
    let child = handle.call("child", &[]).unwrap().unwrap();
    assert_eq!(
        int(child.as_handle().unwrap().call("add_offset", &[0i32.into()]).unwrap()),
        5
    );
}

// Call bridge in both directions: arity, argument binding, errors, panics
use std::cell::RefCell;
use std::rc::Rc;

use crate::{Lua, LuaError, LuaFunction, LuaValue, Variadic};

fn lua_with_add() -> Lua {
    let lua = Lua::new().unwrap();
    let add = lua
        .create_function(|_, (a, b): (i64, i64)| Ok(a + b))
        .unwrap();
    lua.set_global("add", add).unwrap();
    lua
}

#[test]
fn test_script_results_in_order() {
    let lua = Lua::new().unwrap();
    let results = lua.eval("return 1, 'two', 3.5, false, nil", ()).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0], LuaValue::integer(1));
    assert_eq!(results[1].as_str(), Some("two"));
    assert_eq!(results[2], LuaValue::float(3.5));
    assert_eq!(results[3], LuaValue::Boolean(false));
    assert!(results[4].is_nil());
    assert!(lua.eval("return", ()).unwrap().is_empty());
}

#[test]
fn test_eval_passes_arguments() {
    let lua = Lua::new().unwrap();
    let results = lua.eval("local a, b = ... return b, a", (1, "x")).unwrap();
    assert_eq!(results[0].as_str(), Some("x"));
    assert_eq!(results[1].as_integer(), Some(1));
}

#[test]
fn test_host_function_receives_arguments_in_order() {
    let lua = Lua::new().unwrap();
    let describe = lua
        .create_function(|_, (name, count, ratio): (String, u32, f64)| {
            Ok(format!("{name}:{count}:{ratio}"))
        })
        .unwrap();
    lua.set_global("describe", describe).unwrap();
    let results = lua.eval("return describe('n', 3, 2)", ()).unwrap();
    assert_eq!(results[0].as_str(), Some("n:3:2"));
}

#[test]
fn test_arity_mismatch_is_a_script_error() {
    let lua = lua_with_add();
    let results = lua
        .eval(
            r#"
            local ok_few, err_few = pcall(add, 1)
            local ok_many, err_many = pcall(add, 1, 2, 3)
            return ok_few, err_few, ok_many, err_many
        "#,
            (),
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(
        results[1].as_str(),
        Some("wrong number of arguments: expected 2, got 1")
    );
    assert_eq!(results[2], LuaValue::Boolean(false));
    assert_eq!(
        results[3].as_str(),
        Some("wrong number of arguments: expected 2, got 3")
    );
    assert_eq!(lua.eval("return add(2, 3)", ()).unwrap()[0].as_integer(), Some(5));
}

#[test]
fn test_bad_argument_reports_position() {
    let lua = lua_with_add();
    let results = lua.eval("return pcall(add, 1, 'x')", ()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(
        results[1].as_str(),
        Some("bad argument #2 (integer expected, got string)")
    );
    let results = lua.eval("return pcall(add, 1.5, 2)", ()).unwrap();
    assert_eq!(
        results[1].as_str(),
        Some("bad argument #1 (integer expected, got number)")
    );
}

#[test]
fn test_host_error_visible_to_script() {
    let lua = Lua::new().unwrap();
    let fail = lua
        .create_function(|_, reason: String| -> crate::LuaResult<()> {
            Err(LuaError::external(format!("refused: {reason}")))
        })
        .unwrap();
    lua.set_global("fail", fail).unwrap();
    let results = lua.eval("return pcall(fail, 'busy')", ()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(results[1].as_str(), Some("refused: busy"));
}

#[test]
fn test_panic_becomes_script_error() {
    let lua = Lua::new().unwrap();
    let explode = lua
        .create_function(|_, ()| -> crate::LuaResult<()> { panic!("kaboom") })
        .unwrap();
    lua.set_global("explode", explode).unwrap();
    let results = lua.eval("return pcall(explode)", ()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(results[1].as_str(), Some("host function panicked: kaboom"));
    // the interpreter stays usable
    assert_eq!(lua.eval("return 1 + 1", ()).unwrap()[0].as_integer(), Some(2));
}

#[test]
fn test_runtime_error_carries_traceback() {
    let lua = Lua::new().unwrap();
    let err = lua
        .eval("local function inner() error('bad thing') end inner()", ())
        .unwrap_err();
    match err {
        LuaError::Runtime(message) => {
            assert!(message.contains("bad thing"), "{message}");
            assert!(message.contains("stack traceback"), "{message}");
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn test_non_string_error_object() {
    let lua = Lua::new().unwrap();
    let err = lua.eval("error({})", ()).unwrap_err();
    assert!(err.to_string().contains("(error object is a table value)"), "{err}");
}

#[test]
fn test_syntax_error() {
    let lua = Lua::new().unwrap();
    let err = lua.load("return +", "broken").unwrap_err();
    assert!(matches!(err, LuaError::Syntax(_)));
    assert!(err.is_vm_error());
}

#[test]
fn test_error_handler_sees_every_vm_error() {
    let lua = Lua::new().unwrap();
    let seen = Rc::new(RefCell::new(Vec::<String>::new()));
    let sink = seen.clone();
    lua.set_error_handler(move |message| sink.borrow_mut().push(message.to_string()));

    assert!(lua.eval("error('first')", ()).is_err());
    assert!(lua.load("x = = 1", "second").is_err());
    assert_eq!(seen.borrow().len(), 2);
    assert!(seen.borrow()[0].contains("first"));

    lua.clear_error_handler();
    assert!(lua.eval("error('third')", ()).is_err());
    assert_eq!(seen.borrow().len(), 2);
}

#[test]
fn test_call_variants() {
    let lua = Lua::new().unwrap();
    let pair: LuaFunction = lua
        .load("return function(x) return x, tostring(x) end", "pair")
        .unwrap()
        .call_as(())
        .unwrap();
    let (n, s): (i64, String) = pair.call_as(7).unwrap();
    assert_eq!((n, s.as_str()), (7, "7"));
    assert_eq!(pair.call1(8).unwrap().as_integer(), Some(8));

    let nothing: LuaFunction = lua.load("return", "nothing").unwrap();
    assert!(nothing.call1(()).unwrap().is_nil());
    assert!(matches!(
        nothing.call_as::<_, i64>(()),
        Err(LuaError::NoValue { expected: "integer" })
    ));
}

#[test]
fn test_variadic_arguments_and_results() {
    let lua = Lua::new().unwrap();
    let sum = lua
        .create_function(|_, values: Variadic<f64>| Ok(values.iter().sum::<f64>()))
        .unwrap();
    let split = lua
        .create_function(|_, text: String| {
            Ok(text.split(',').map(str::to_owned).collect::<Variadic<String>>())
        })
        .unwrap();
    lua.set_global("sum", sum).unwrap();
    lua.set_global("split", split).unwrap();
    let results = lua
        .eval("return sum(), sum(1, 2, 3.5), select('#', split('a,b,c'))", ())
        .unwrap();
    assert_eq!(results[0], LuaValue::float(0.0));
    assert_eq!(results[1], LuaValue::float(6.5));
    assert_eq!(results[2].as_integer(), Some(3));
}

#[test]
fn test_multiple_results_and_sequences() {
    let lua = Lua::new().unwrap();
    let divmod = lua
        .create_function(|_, (a, b): (i64, i64)| Ok((a / b, a % b)))
        .unwrap();
    let range = lua
        .create_function(|_, n: i64| Ok((1..=n).collect::<Vec<i64>>()))
        .unwrap();
    lua.set_global("divmod", divmod).unwrap();
    lua.set_global("range", range).unwrap();
    let results = lua
        .eval("local q, r = divmod(17, 5) local t = range(4) return q, r, #t, t[4]", ())
        .unwrap();
    let values: Vec<i64> = results.iter().filter_map(LuaValue::as_integer).collect();
    assert_eq!(values, vec![3, 2, 4, 4]);
}

#[test]
fn test_reentrant_calls() {
    let lua = Lua::new().unwrap();
    let apply = lua
        .create_function(|_, (f, x): (LuaFunction, i64)| f.call1(x))
        .unwrap();
    lua.set_global("apply", apply).unwrap();
    let results = lua
        .eval(
            r#"
            local function square(x) return x * x end
            local function nested(x) return apply(square, x) + 1 end
            return apply(nested, 4)
        "#,
            (),
        )
        .unwrap();
    assert_eq!(results[0].as_integer(), Some(17));

    // an error deep inside the nesting reaches the outer pcall
    let results = lua
        .eval(
            "return pcall(apply, function(x) error('inner ' .. x, 0) end, 9)",
            (),
        )
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert!(results[1].as_str().unwrap().contains("inner 9"));
    assert_eq!(lua.stack_top(), 0);
}

#[test]
fn test_foreign_handle_is_rejected() {
    let first = Lua::new().unwrap();
    let second = Lua::new().unwrap();
    let table = first.create_table().unwrap();
    assert!(matches!(
        second.set_global("t", &table),
        Err(LuaError::ForeignHandle)
    ));
    let function = first.create_function(|_, ()| Ok(())).unwrap();
    let err = second.globals().call_function("print", &function).unwrap_err();
    assert!(matches!(err, LuaError::ForeignHandle));
}

#[test]
fn test_handle_release_reuses_registry_slot() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    let id = table.ref_id();
    drop(table);
    let again = lua.create_table().unwrap();
    assert_eq!(again.ref_id(), id);
}

#[test]
#[should_panic(expected = "used after it was closed")]
fn test_use_after_close_panics() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    drop(lua);
    let _ = table.raw_len();
}

#[test]
fn test_drop_after_close_is_harmless() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    let function = lua.create_function(|_, ()| Ok(1)).unwrap();
    drop(lua);
    drop(function);
    drop(table);
}

// Value marshaling: primitives, numbers, strings and conversion failures
use std::ffi::c_void;

use crate::{FromLua, LightUserdata, Lua, LuaError, LuaNumber, LuaType, LuaValue};

#[test]
fn test_primitive_round_trip() {
    let lua = Lua::new().unwrap();
    let values = [
        LuaValue::Boolean(true),
        LuaValue::Boolean(false),
        LuaValue::integer(42),
        LuaValue::integer(i64::MIN),
        LuaValue::float(2.5),
        LuaValue::String("hello".to_string()),
        LuaValue::String(String::new()),
    ];
    for value in values {
        lua.set_global("v", &value).unwrap();
        let back = lua.get_global("v").unwrap();
        assert_eq!(back.type_of(), value.type_of());
        assert_eq!(back, value, "round trip of {value:?}");
    }
    lua.set_global("v", LuaValue::Nil).unwrap();
    assert!(lua.get_global("v").unwrap().is_nil());
}

#[test]
fn test_light_userdata_round_trip() {
    let lua = Lua::new().unwrap();
    let mut slot = 7i32;
    let pointer = LightUserdata(&mut slot as *mut i32 as *mut c_void);
    lua.set_global("p", pointer).unwrap();

    let back = lua.get_global("p").unwrap();
    assert_eq!(back.type_of(), LuaType::LightUserdata);
    assert_eq!(back, LuaValue::LightUserdata(pointer));
    assert_eq!(lua.eval("return type(p)", ()).unwrap()[0].as_str(), Some("userdata"));

    assert!(LightUserdata::type_check(&back));
    assert!(!LightUserdata::type_check(&LuaValue::integer(7)));
    assert_eq!(LightUserdata::from_lua(back).unwrap(), pointer);
    assert!(matches!(
        LightUserdata::from_lua(LuaValue::Boolean(true)),
        Err(LuaError::TypeMismatch { .. })
    ));
    assert_eq!(lua.get_global_as::<LightUserdata>("p").unwrap().0 as *mut i32, &mut slot as *mut i32);
}

#[test]
fn test_number_subtypes_survive() {
    let lua = Lua::new().unwrap();
    let results = lua.eval("return 3, 3.0, 7 // 2, 7 / 2", ()).unwrap();
    assert!(matches!(results[0], LuaValue::Number(LuaNumber::Integer(3))));
    assert!(matches!(results[1], LuaValue::Number(LuaNumber::Float(f)) if f == 3.0));
    assert_eq!(results[2].as_integer(), Some(3));
    assert_eq!(results[3].as_float(), Some(3.5));
}

#[test]
fn test_number_conversions() {
    assert_eq!(LuaNumber::Float(2.9).to_integer(), 2);
    assert_eq!(LuaNumber::Float(-2.9).to_integer(), -2);
    assert_eq!(LuaNumber::Integer(7).to_float(), 7.0);
    assert!(LuaNumber::Integer(7).is_integer());
    assert!(!LuaNumber::Float(7.0).is_integer());
    assert_eq!(LuaNumber::Float(4.0).as_exact_integer(), Some(4));
    assert_eq!(LuaNumber::Float(4.5).as_exact_integer(), None);
    assert_eq!(LuaNumber::Integer(2), LuaNumber::Float(2.0));
    assert_ne!(LuaNumber::Integer(2), LuaNumber::Float(2.5));
    assert_eq!(LuaNumber::Integer(-15).to_string(), "-15");
    assert_eq!(LuaNumber::Float(2.0).to_string(), "2.0");
    assert_eq!(LuaNumber::Float(0.25).to_string(), "0.25");
}

#[test]
fn test_integer_requires_integer_subtype() {
    let err = i64::from_lua(LuaValue::float(2.0)).unwrap_err();
    assert!(matches!(
        err,
        LuaError::TypeMismatch {
            expected: "integer",
            found: "number"
        }
    ));
    assert!(!i64::type_check(&LuaValue::float(2.0)));
    assert!(f64::type_check(&LuaValue::integer(2)));
    assert_eq!(f64::from_lua(LuaValue::integer(2)).unwrap(), 2.0);
}

#[test]
fn test_integer_out_of_range() {
    let err = u8::from_lua(LuaValue::integer(300)).unwrap_err();
    assert!(matches!(err, LuaError::ConversionFailure { to: "u8", .. }));
    let err = u32::from_lua(LuaValue::integer(-1)).unwrap_err();
    assert!(matches!(err, LuaError::ConversionFailure { .. }));
    assert_eq!(i16::from_lua(LuaValue::integer(-300)).unwrap(), -300);
}

#[test]
fn test_type_mismatch_messages() {
    let err = String::from_lua(LuaValue::Boolean(true)).unwrap_err();
    assert_eq!(err.to_string(), "string expected, got boolean");
    let err = bool::from_lua(LuaValue::Nil).unwrap_err();
    assert_eq!(err.to_string(), "boolean expected, got nil");
}

#[test]
fn test_option_maps_nil() {
    assert_eq!(Option::<i64>::from_lua(LuaValue::Nil).unwrap(), None);
    assert_eq!(Option::<i64>::from_lua(LuaValue::integer(5)).unwrap(), Some(5));
    assert!(Option::<i64>::from_lua(LuaValue::Boolean(true)).is_err());

    let lua = Lua::new().unwrap();
    lua.set_global("missing", None::<i64>).unwrap();
    assert!(lua.get_global("missing").unwrap().is_nil());
}

#[test]
fn test_invalid_utf8_is_replaced() {
    let lua = Lua::new().unwrap();
    let value = lua.eval(r#"return "ok\xff""#, ()).unwrap().remove(0);
    assert_eq!(value.as_str(), Some("ok\u{fffd}"));
}

#[test]
fn test_strings_with_embedded_nul() {
    let lua = Lua::new().unwrap();
    lua.set_global("s", "a\0b").unwrap();
    let len: i64 = lua.eval("return #s", ()).unwrap().remove(0).as_integer().unwrap();
    assert_eq!(len, 3);
    assert_eq!(lua.get_global_as::<String>("s").unwrap(), "a\0b");
}

#[test]
fn test_type_tags() {
    let lua = Lua::new().unwrap();
    let results = lua
        .eval("return nil, true, 1, 's', {}, print, coroutine.create(print)", ())
        .unwrap();
    let types: Vec<LuaType> = results.iter().map(LuaValue::type_of).collect();
    assert_eq!(
        types,
        vec![
            LuaType::Nil,
            LuaType::Boolean,
            LuaType::Number,
            LuaType::String,
            LuaType::Table,
            LuaType::Function,
            LuaType::Thread,
        ]
    );
    assert_eq!(results[4].type_name(), "table");
    assert!(!results[0].is_truthy());
    assert!(results[2].is_truthy());
}

#[test]
fn test_vec_becomes_sequence() {
    let lua = Lua::new().unwrap();
    lua.set_global("seq", vec![10, 20, 30]).unwrap();
    let sum = lua
        .eval("local s = 0 for i, v in ipairs(seq) do s = s + i * v end return s", ())
        .unwrap()
        .remove(0);
    assert_eq!(sum.as_integer(), Some(10 + 40 + 90));
    let back: Vec<i64> = lua.get_global_as("seq").unwrap();
    assert_eq!(back, vec![10, 20, 30]);
}

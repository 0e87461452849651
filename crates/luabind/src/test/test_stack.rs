// Stack cursor mechanics and the net-zero contract of public operations
use mlua_sys as ffi;

use crate::lua_value::LuaType;
use crate::lua_vm::stack::Stack;
use crate::{Lua, LuaValue};

#[test]
fn test_guard_restores_height() {
    let lua = Lua::new().unwrap();
    let stack = Stack::new(lua.state());
    assert_eq!(stack.top(), 0);
    {
        let _guard = stack.guard();
        stack.push_nil();
        stack.push_nil();
        assert_eq!(stack.top(), 2);
    }
    assert_eq!(stack.top(), 0);
}

#[test]
fn test_copy_move_remove() {
    let lua = Lua::new().unwrap();
    let state = lua.state();
    let stack = Stack::new(state);
    let _guard = stack.guard();
    unsafe {
        ffi::lua_pushinteger(state, 1);
        ffi::lua_pushinteger(state, 2);
        ffi::lua_pushinteger(state, 3);
    }
    assert_eq!(stack.absolute(-1), 3);
    assert_eq!(stack.absolute(-3), 1);

    stack.push_copy(1);
    assert_eq!(stack.top(), 4);
    assert_eq!(unsafe { ffi::lua_tointeger(state, -1) }, 1);

    // [1, 2, 3, 1] -> [1, 3, 1, 2]
    stack.move_to_top(2);
    assert_eq!(unsafe { ffi::lua_tointeger(state, -1) }, 2);
    assert_eq!(unsafe { ffi::lua_tointeger(state, 2) }, 3);

    // [1, 3, 1, 2] -> [1, 1, 2]
    stack.remove(2);
    assert_eq!(stack.top(), 3);
    assert_eq!(unsafe { ffi::lua_tointeger(state, 2) }, 1);
    assert_eq!(unsafe { ffi::lua_tointeger(state, 3) }, 2);
}

#[test]
fn test_type_at_and_raw_index() {
    let lua = Lua::new().unwrap();
    let state = lua.state();
    let stack = Stack::new(state);
    let _guard = stack.guard();
    unsafe {
        ffi::lua_createtable(state, 2, 0);
        ffi::lua_pushboolean(state, 1);
    }
    assert_eq!(stack.type_at(1), LuaType::Table);
    assert_eq!(stack.type_at(-1), LuaType::Boolean);

    stack.raw_set_index(1, 1);
    assert_eq!(stack.top(), 1);
    assert_eq!(stack.raw_get_index(1, 1), LuaType::Boolean);
    assert_eq!(stack.raw_get_index(1, 2), LuaType::Nil);
    assert_eq!(stack.top(), 3);
}

#[test]
fn test_public_operations_are_balanced() {
    let lua = Lua::new().unwrap();
    let table = lua.create_table().unwrap();
    table.set("a", 1).unwrap();
    table.raw_set(1, "x").unwrap();
    let _ = table.get("a").unwrap();
    let _ = table.pairs().unwrap();
    let _ = table.to_vec::<LuaValue>().unwrap();
    let _ = table.len().unwrap();
    lua.set_global("t", &table).unwrap();
    let _ = lua.eval("return 1, 2, 3", ()).unwrap();
    assert!(lua.eval("error('x')", ()).is_err());
    assert!(lua.load("return +", "broken").is_err());
    assert_eq!(lua.stack_top(), 0);
}

#[test]
fn test_failed_metamethod_leaves_stack_balanced() {
    let lua = Lua::new().unwrap();
    lua.exec(
        r#"
        guarded = setmetatable({}, {
            __index = function() error("no reads") end,
            __newindex = function() error("no writes") end,
        })
    "#,
    )
    .unwrap();
    let guarded = lua.get_global_as::<crate::LuaTable>("guarded").unwrap();
    assert!(guarded.get("x").is_err());
    assert!(guarded.set("x", 1).is_err());
    assert_eq!(lua.stack_top(), 0);
}

// Lua bindings
// Embeds the reference Lua 5.4 VM and marshals values, calls and custom
// types between Rust and scripts.

#[cfg(test)]
mod test;

pub mod lua_value;
pub mod lua_vm;

// lets `#[derive(LuaCustomType)]` expand to `::luabind::...` inside this crate too
extern crate self as luabind;

pub use lua_value::{
    CustomType, CustomTypeBuilder, Field, FieldSet, FromLua, FromLuaMulti, Instance, InstanceRef,
    InstanceRefMut, IntoLua, IntoLuaMulti, LightUserdata, LuaFunction, LuaNumber, LuaTable,
    LuaThread, LuaType, LuaUserdata, LuaValue, ThreadStatus, Variadic,
};
pub use lua_vm::{Context, GcMode, Lua, LuaError, LuaOptions, LuaResult, RefId, Stdlib};
pub use luabind_derive::LuaCustomType;

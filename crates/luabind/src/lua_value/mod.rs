// Host-side view of VM values.
//
// Primitives (nil, booleans, numbers, strings, light userdata) are copied
// out of the VM. Everything else is a registry-pinned handle that keeps
// the underlying object alive while the handle exists.
mod custom_type;
mod field;
mod lua_convert;
mod lua_function;
mod lua_table;
mod lua_thread;
mod lua_userdata;
pub(crate) mod type_registry;
mod userdata_builder;

use std::ffi::c_void;
use std::fmt;
use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::lua_vm::lua_ref::LuaRef;
use crate::lua_vm::stack::Stack;
use crate::lua_vm::{Context, LuaResult};

pub use custom_type::{CustomType, FieldSet};
pub use field::Field;
pub use lua_convert::{FromLua, FromLuaMulti, IntoLua, IntoLuaMulti, Variadic};
pub use lua_function::LuaFunction;
pub use lua_table::LuaTable;
pub use lua_thread::{LuaThread, ThreadStatus};
pub use lua_userdata::{Instance, InstanceRef, InstanceRefMut, LuaUserdata};
pub use userdata_builder::CustomTypeBuilder;

/// Basic VM type tags. `None` marks an empty stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl LuaType {
    pub(crate) fn from_raw(tag: c_int) -> Self {
        match tag {
            ffi::LUA_TNIL => LuaType::Nil,
            ffi::LUA_TBOOLEAN => LuaType::Boolean,
            ffi::LUA_TLIGHTUSERDATA => LuaType::LightUserdata,
            ffi::LUA_TNUMBER => LuaType::Number,
            ffi::LUA_TSTRING => LuaType::String,
            ffi::LUA_TTABLE => LuaType::Table,
            ffi::LUA_TFUNCTION => LuaType::Function,
            ffi::LUA_TUSERDATA => LuaType::Userdata,
            ffi::LUA_TTHREAD => LuaType::Thread,
            _ => LuaType::None,
        }
    }

    /// The name the VM uses for this type in messages.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A number with its VM subtype preserved.
#[derive(Debug, Clone, Copy)]
pub enum LuaNumber {
    Integer(i64),
    Float(f64),
}

impl LuaNumber {
    pub fn is_integer(self) -> bool {
        matches!(self, LuaNumber::Integer(_))
    }

    /// Integer view; floats truncate toward zero (saturating at the bounds).
    pub fn to_integer(self) -> i64 {
        match self {
            LuaNumber::Integer(i) => i,
            LuaNumber::Float(f) => f as i64,
        }
    }

    pub fn to_float(self) -> f64 {
        match self {
            LuaNumber::Integer(i) => i as f64,
            LuaNumber::Float(f) => f,
        }
    }

    /// The integer this number denotes exactly, if any (`2.0` yields `2`).
    pub fn as_exact_integer(self) -> Option<i64> {
        match self {
            LuaNumber::Integer(i) => Some(i),
            LuaNumber::Float(f) => float_to_exact_integer(f),
        }
    }
}

fn float_to_exact_integer(f: f64) -> Option<i64> {
    // -2^63 is exact; 2^63 is out of range.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for LuaNumber {
    fn eq(&self, other: &Self) -> bool {
        match (*self, *other) {
            (LuaNumber::Integer(a), LuaNumber::Integer(b)) => a == b,
            (LuaNumber::Float(a), LuaNumber::Float(b)) => a == b,
            (LuaNumber::Integer(i), LuaNumber::Float(f))
            | (LuaNumber::Float(f), LuaNumber::Integer(i)) => float_to_exact_integer(f) == Some(i),
        }
    }
}

impl fmt::Display for LuaNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuaNumber::Integer(i) => {
                let mut buffer = itoa::Buffer::new();
                f.write_str(buffer.format(*i))
            }
            LuaNumber::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            LuaNumber::Float(x) => write!(f, "{x}"),
        }
    }
}

/// An opaque host pointer stored in the VM without ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LightUserdata(pub *mut c_void);

/// A VM value as seen from the host.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LuaValue {
    #[default]
    Nil,
    Boolean(bool),
    Number(LuaNumber),
    /// Copied out of the VM; invalid UTF-8 is replaced.
    String(String),
    LightUserdata(LightUserdata),
    Table(LuaTable),
    Function(LuaFunction),
    Userdata(LuaUserdata),
    Thread(LuaThread),
}

impl LuaValue {
    pub fn integer(i: i64) -> Self {
        LuaValue::Number(LuaNumber::Integer(i))
    }

    pub fn float(f: f64) -> Self {
        LuaValue::Number(LuaNumber::Float(f))
    }

    pub fn type_of(&self) -> LuaType {
        match self {
            LuaValue::Nil => LuaType::Nil,
            LuaValue::Boolean(_) => LuaType::Boolean,
            LuaValue::Number(_) => LuaType::Number,
            LuaValue::String(_) => LuaType::String,
            LuaValue::LightUserdata(_) => LuaType::LightUserdata,
            LuaValue::Table(_) => LuaType::Table,
            LuaValue::Function(_) => LuaType::Function,
            LuaValue::Userdata(_) => LuaType::Userdata,
            LuaValue::Thread(_) => LuaType::Thread,
        }
    }

    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_of().name()
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, LuaValue::Nil)
    }

    /// Truthiness as the VM defines it: only `nil` and `false` are false.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, LuaValue::Nil | LuaValue::Boolean(false))
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            LuaValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<LuaNumber> {
        match self {
            LuaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Only numbers with the integer subtype.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            LuaValue::Number(LuaNumber::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        self.as_number().map(LuaNumber::to_float)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LuaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&LuaTable> {
        match self {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&LuaFunction> {
        match self {
            LuaValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_userdata(&self) -> Option<&LuaUserdata> {
        match self {
            LuaValue::Userdata(u) => Some(u),
            _ => None,
        }
    }

    /// Copy (or pin) the value at `idx` without popping it.
    pub(crate) fn read(ctx: &Context, state: *mut ffi::lua_State, idx: c_int) -> LuaValue {
        unsafe {
            match Stack::new(state).type_at(idx) {
                LuaType::Boolean => LuaValue::Boolean(ffi::lua_toboolean(state, idx) != 0),
                LuaType::Number => {
                    if ffi::lua_isinteger(state, idx) != 0 {
                        LuaValue::integer(ffi::lua_tointeger(state, idx))
                    } else {
                        LuaValue::float(ffi::lua_tonumber(state, idx))
                    }
                }
                LuaType::String => LuaValue::String(read_string(state, idx)),
                LuaType::LightUserdata => {
                    LuaValue::LightUserdata(LightUserdata(ffi::lua_touserdata(state, idx)))
                }
                LuaType::Table => LuaValue::Table(LuaTable(LuaRef::pin(ctx, state, idx))),
                LuaType::Function => LuaValue::Function(LuaFunction(LuaRef::pin(ctx, state, idx))),
                LuaType::Userdata => LuaValue::Userdata(LuaUserdata(LuaRef::pin(ctx, state, idx))),
                LuaType::Thread => LuaValue::Thread(LuaThread(LuaRef::pin(ctx, state, idx))),
                LuaType::Nil | LuaType::None => LuaValue::Nil,
            }
        }
    }

    /// Push onto `state`. The caller reserves the slot.
    pub(crate) fn push(&self, ctx: &Context, state: *mut ffi::lua_State) -> LuaResult<()> {
        unsafe {
            match self {
                LuaValue::Nil => ffi::lua_pushnil(state),
                LuaValue::Boolean(b) => ffi::lua_pushboolean(state, *b as c_int),
                LuaValue::Number(LuaNumber::Integer(i)) => ffi::lua_pushinteger(state, *i),
                LuaValue::Number(LuaNumber::Float(f)) => ffi::lua_pushnumber(state, *f),
                LuaValue::String(s) => push_str(state, s),
                LuaValue::LightUserdata(p) => ffi::lua_pushlightuserdata(state, p.0),
                LuaValue::Table(t) => t.0.push_into(ctx, state)?,
                LuaValue::Function(f) => f.0.push_into(ctx, state)?,
                LuaValue::Userdata(u) => u.0.push_into(ctx, state)?,
                LuaValue::Thread(t) => t.0.push_into(ctx, state)?,
            }
        }
        Ok(())
    }
}

#[inline]
pub(crate) unsafe fn push_str(state: *mut ffi::lua_State, s: &str) {
    unsafe { ffi::lua_pushlstring(state, s.as_ptr().cast(), s.len()) };
}

/// Copy the string (or number, converted in place) at `idx`.
pub(crate) unsafe fn read_string(state: *mut ffi::lua_State, idx: c_int) -> String {
    let mut len = 0usize;
    let ptr = unsafe { ffi::lua_tolstring(state, idx, &mut len) };
    if ptr.is_null() {
        return String::new();
    }
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
    String::from_utf8_lossy(bytes).into_owned()
}

/// Describe an error object the way the standalone interpreter does.
pub(crate) unsafe fn error_message(state: *mut ffi::lua_State, idx: c_int) -> String {
    match unsafe { ffi::lua_type(state, idx) } {
        ffi::LUA_TSTRING | ffi::LUA_TNUMBER => unsafe { read_string(state, idx) },
        tag => format!("(error object is a {} value)", LuaType::from_raw(tag).name()),
    }
}

//! Registry-pinned handles (the `luaL_ref`/`luaL_unref` mechanism).
//!
//! Every reference-typed value that crosses into the host is pinned in the
//! VM registry for as long as its handle lives. Cloning a handle pins the
//! value again under a fresh id, dropping one releases exactly its own id.
use std::fmt;
use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::lua_vm::stack::{Stack, protected_equals};
use crate::lua_vm::{Context, LuaError, LuaResult};

/// A reference ID in the registry, as returned by `luaL_ref`.
pub type RefId = c_int;

pub(crate) struct LuaRef {
    ref_id: RefId,
    ctx: Context,
}

impl LuaRef {
    /// Pin a copy of the value at `idx`. The stack is left unchanged.
    pub(crate) fn pin(ctx: &Context, state: *mut ffi::lua_State, idx: c_int) -> Self {
        Stack::new(state).push_copy(idx);
        Self::pop(ctx, state)
    }

    /// Pin the value on top of the stack and pop it.
    pub(crate) fn pop(ctx: &Context, state: *mut ffi::lua_State) -> Self {
        let ref_id = unsafe { ffi::luaL_ref(state, ffi::LUA_REGISTRYINDEX) };
        debug_assert!(ref_id > 0, "pinned a nil value");
        LuaRef {
            ref_id,
            ctx: ctx.clone(),
        }
    }

    /// Push the pinned value onto `state`, which must belong to the same VM.
    #[inline]
    pub(crate) fn push(&self, state: *mut ffi::lua_State) {
        Stack::new(state).raw_get_index(ffi::LUA_REGISTRYINDEX, self.ref_id.into());
    }

    /// Push onto a stack owned by `ctx`, refusing handles from other interpreters.
    pub(crate) fn push_into(&self, ctx: &Context, state: *mut ffi::lua_State) -> LuaResult<()> {
        if !self.ctx.same_interpreter(ctx) {
            return Err(LuaError::ForeignHandle);
        }
        self.push(state);
        Ok(())
    }

    #[inline]
    pub(crate) fn ref_id(&self) -> RefId {
        self.ref_id
    }

    #[inline]
    pub(crate) fn context(&self) -> &Context {
        &self.ctx
    }

    /// Compare two pinned values with the VM's `==`, which may run `__eq`.
    /// Handles from different interpreters are never equal.
    pub(crate) fn vm_equals(&self, other: &LuaRef) -> LuaResult<bool> {
        if !self.ctx.same_interpreter(&other.ctx) {
            return Ok(false);
        }
        if self.ref_id == other.ref_id {
            return Ok(true);
        }
        let state = self.ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(3)?;
        self.push(state);
        other.push(state);
        if let Err(status) = stack.protect(2, 1, protected_equals) {
            return Err(self.ctx.pop_error(state, status));
        }
        Ok(unsafe { ffi::lua_toboolean(state, -1) } != 0)
    }
}

impl Clone for LuaRef {
    fn clone(&self) -> Self {
        let state = self.ctx.state();
        self.push(state);
        LuaRef::pop(&self.ctx, state)
    }
}

impl Drop for LuaRef {
    fn drop(&mut self) {
        // After the interpreter closes the registry is gone with it.
        if let Some(state) = self.ctx.state_if_open() {
            unsafe { ffi::luaL_unref(state, ffi::LUA_REGISTRYINDEX, self.ref_id) };
        }
    }
}

impl PartialEq for LuaRef {
    fn eq(&self, other: &Self) -> bool {
        self.vm_equals(other).unwrap_or(false)
    }
}

impl fmt::Debug for LuaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LuaRef({})", self.ref_id)
    }
}

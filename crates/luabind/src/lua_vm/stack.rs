//! Thin cursor over the VM's value stack.
//!
//! Every higher layer pushes and pops through this cursor so that each
//! operation leaves the stack at the height it found it. Indices follow the
//! VM convention: positive indices count from the bottom (1-based), negative
//! ones from the top (-1 is the top slot).
use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::lua_value::LuaType;
use crate::lua_vm::{LuaError, LuaResult};

/// Stack operations on one VM thread.
#[derive(Clone, Copy)]
pub(crate) struct Stack {
    state: *mut ffi::lua_State,
}

impl Stack {
    pub(crate) fn new(state: *mut ffi::lua_State) -> Self {
        debug_assert!(!state.is_null());
        Stack { state }
    }

    /// Number of values currently on the stack.
    #[inline]
    pub(crate) fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.state) }
    }

    /// Convert a relative index into an absolute one. Pseudo-indices pass through.
    #[inline]
    pub(crate) fn absolute(&self, idx: c_int) -> c_int {
        self.check_index(idx);
        unsafe { ffi::lua_absindex(self.state, idx) }
    }

    /// Make room for `extra` more slots.
    pub(crate) fn ensure(&self, extra: usize) -> LuaResult<()> {
        let extra = c_int::try_from(extra).map_err(|_| stack_overflow())?;
        if unsafe { ffi::lua_checkstack(self.state, extra) } == 0 {
            return Err(stack_overflow());
        }
        Ok(())
    }

    /// Push a copy of the value at `idx`.
    #[inline]
    pub(crate) fn push_copy(&self, idx: c_int) {
        self.check_index(idx);
        unsafe { ffi::lua_pushvalue(self.state, idx) }
    }

    #[inline]
    pub(crate) fn push_nil(&self) {
        unsafe { ffi::lua_pushnil(self.state) }
    }

    /// Pop `n` values from the top.
    #[inline]
    pub(crate) fn pop(&self, n: c_int) {
        debug_assert!(n <= self.top(), "popping {n} values from a stack of {}", self.top());
        unsafe { ffi::lua_pop(self.state, n) }
    }

    /// Rotate the values between `idx` and the top by `n` positions.
    #[inline]
    pub(crate) fn rotate(&self, idx: c_int, n: c_int) {
        unsafe { ffi::lua_rotate(self.state, idx, n) }
    }

    /// Move the top value down to `idx`, shifting the values above it up.
    #[inline]
    pub(crate) fn insert(&self, idx: c_int) {
        self.rotate(idx, 1);
    }

    /// Move the value at `idx` to the top.
    #[inline]
    pub(crate) fn move_to_top(&self, idx: c_int) {
        self.check_index(idx);
        self.rotate(idx, -1);
    }

    /// Remove the value at `idx`, shifting the values above it down.
    #[inline]
    pub(crate) fn remove(&self, idx: c_int) {
        self.move_to_top(idx);
        self.pop(1);
    }

    #[inline]
    pub(crate) fn type_at(&self, idx: c_int) -> LuaType {
        self.check_index(idx);
        LuaType::from_raw(unsafe { ffi::lua_type(self.state, idx) })
    }

    /// Push `t[n]` without metamethods; returns the pushed value's type.
    #[inline]
    pub(crate) fn raw_get_index(&self, table_idx: c_int, n: i64) -> LuaType {
        self.check_index(table_idx);
        LuaType::from_raw(unsafe { ffi::lua_rawgeti(self.state, table_idx, n) })
    }

    /// `t[n] = top` without metamethods, popping the value.
    #[inline]
    pub(crate) fn raw_set_index(&self, table_idx: c_int, n: i64) {
        self.check_index(table_idx);
        unsafe { ffi::lua_rawseti(self.state, table_idx, n) }
    }

    /// Slots above the top are never read; pseudo-indices are exempt.
    #[inline]
    fn check_index(&self, idx: c_int) {
        if idx > ffi::LUA_REGISTRYINDEX {
            debug_assert!(
                idx != 0 && idx.unsigned_abs() as c_int <= self.top(),
                "stack index {idx} out of range (top is {})",
                self.top()
            );
        }
    }

    /// Record the current height; the guard restores it when dropped.
    pub(crate) fn guard(&self) -> StackGuard {
        StackGuard {
            state: self.state,
            top: self.top(),
        }
    }

    /// Run `func` in protected mode with the `nargs` values on top of the
    /// stack as its arguments. On success `nresults` values replace them;
    /// on failure the status is returned and the error object is on top.
    pub(crate) fn protect(
        &self,
        nargs: c_int,
        nresults: c_int,
        func: ffi::lua_CFunction,
    ) -> Result<(), c_int> {
        unsafe {
            ffi::lua_pushcfunction(self.state, func);
            self.insert(-(nargs + 1));
            match ffi::lua_pcall(self.state, nargs, nresults, 0) {
                ffi::LUA_OK => Ok(()),
                status => Err(status),
            }
        }
    }
}

/// Restores the recorded stack height on drop.
///
/// Early returns through `?` may leave partially pushed values behind; the
/// guard discards them. Popping below the recorded height is a bookkeeping
/// bug and trips a debug assertion.
pub(crate) struct StackGuard {
    state: *mut ffi::lua_State,
    top: c_int,
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        let current = unsafe { ffi::lua_gettop(self.state) };
        debug_assert!(
            current >= self.top,
            "stack underflow: expected at least {} values, found {current}",
            self.top
        );
        if current > self.top {
            unsafe { ffi::lua_settop(self.state, self.top) }
        }
    }
}

fn stack_overflow() -> LuaError {
    LuaError::Memory("stack overflow".to_string())
}

// Primitives run through `Stack::protect` so that metamethod errors unwind
// inside the VM instead of across host frames.

pub(crate) unsafe extern "C-unwind" fn protected_get(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_gettable(state, 1) };
    1
}

pub(crate) unsafe extern "C-unwind" fn protected_set(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_settable(state, 1) };
    0
}

pub(crate) unsafe extern "C-unwind" fn protected_equals(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        let equal = ffi::lua_compare(state, 1, 2, ffi::LUA_OPEQ);
        ffi::lua_pushboolean(state, equal);
    }
    1
}

pub(crate) unsafe extern "C-unwind" fn protected_len(state: *mut ffi::lua_State) -> c_int {
    unsafe { ffi::lua_len(state, 1) };
    1
}

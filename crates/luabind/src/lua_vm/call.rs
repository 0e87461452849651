// Crossing the host/VM boundary in both directions.
//
// Host -> VM: the callee runs under `lua_pcall` with a message handler that
// appends a traceback, so script errors surface as `LuaError` values.
//
// VM -> host: every host function is one C closure (`call_trampoline`)
// whose single upvalue points at a boxed `Trampoline`. The boxes are owned
// by the interpreter and freed only after the VM is closed. Host errors and
// panics are converted into script errors; all Rust values are dropped
// before `lua_error` transfers control.
use std::any::Any;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Weak;

use mlua_sys as ffi;

use crate::lua_value::{FromLuaMulti, IntoLuaMulti, LuaFunction, LuaValue, push_str};
use crate::lua_vm::lua_ref::LuaRef;
use crate::lua_vm::stack::Stack;
use crate::lua_vm::{Context, LuaError, LuaResult, Shared};

/// Type-erased host function body: reads its arguments from the given
/// state and returns how many results it pushed.
pub(crate) type Callback = Box<dyn Fn(&Context, *mut ffi::lua_State) -> LuaResult<c_int>>;

pub(crate) struct Trampoline {
    shared: Weak<Shared>,
    callback: Callback,
}

impl Context {
    /// Wrap a typed host closure as a VM function.
    ///
    /// Arguments are checked for exact arity first, then converted one by
    /// one; any failure (or an `Err` from `func`) is raised as a script error.
    pub fn create_function<A, R, F>(&self, func: F) -> LuaResult<LuaFunction>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Context, A) -> LuaResult<R> + 'static,
    {
        self.create_callback(Box::new(move |ctx, state| {
            let args = collect_args(ctx, state);
            check_arity(A::ARITY, args.len())?;
            let args = A::from_lua_multi(args)?;
            let results = func(ctx, args)?.into_lua_multi(ctx)?;
            push_results(ctx, state, results)
        }))
    }

    pub(crate) fn create_callback(&self, callback: Callback) -> LuaResult<LuaFunction> {
        let trampoline = Box::new(Trampoline {
            shared: self.downgrade(),
            callback,
        });
        let upvalue = &*trampoline as *const Trampoline as *mut c_void;
        self.shared.trampolines.borrow_mut().push(trampoline);

        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(1)?;
        unsafe {
            ffi::lua_pushlightuserdata(state, upvalue);
            ffi::lua_pushcclosure(state, call_trampoline, 1);
        }
        Ok(LuaFunction(LuaRef::pop(self, state)))
    }

    /// Protected call of a pinned function; returns every result.
    pub(crate) fn call_pinned(&self, function: &LuaRef, args: Vec<LuaValue>) -> LuaResult<Vec<LuaValue>> {
        self.check_reentry()?;
        let nargs = c_int::try_from(args.len()).map_err(|_| LuaError::ArityMismatch {
            expected: c_int::MAX as usize,
            got: args.len(),
        })?;

        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(args.len() + 2)?;
        unsafe { ffi::lua_pushcfunction(state, traceback_handler) };
        let handler = stack.absolute(-1);
        function.push_into(self, state)?;
        for arg in &args {
            arg.push(self, state)?;
        }
        drop(args);

        let status = unsafe { ffi::lua_pcall(state, nargs, ffi::LUA_MULTRET, handler) };
        stack.remove(handler);
        if status != ffi::LUA_OK {
            return Err(self.pop_error(state, status));
        }

        let top = stack.top();
        Ok((handler..=top)
            .map(|idx| LuaValue::read(self, state, idx))
            .collect())
    }
}

unsafe extern "C-unwind" fn call_trampoline(state: *mut ffi::lua_State) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let trampoline =
            unsafe { &*(ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const Trampoline) };
        let Some(shared) = trampoline.shared.upgrade() else {
            return Ok(0);
        };
        let ctx = Context { shared };
        let _scope = ctx.enter(state);
        (trampoline.callback)(&ctx, state)
    }));

    let message = match outcome {
        Ok(Ok(count)) => return count,
        Ok(Err(error)) => error.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    unsafe { raise_error(state, message) }
}

/// Raise `message` as a script error. Nothing owned may be alive in the
/// caller's frames: `lua_error` does not unwind them.
pub(crate) unsafe fn raise_error(state: *mut ffi::lua_State, message: String) -> ! {
    unsafe {
        ffi::lua_checkstack(state, 1);
        push_str(state, &message);
    }
    drop(message);
    unsafe { ffi::lua_error(state) }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("host function panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("host function panicked: {message}")
    } else {
        "host function panicked".to_string()
    }
}

/// Message handler: turn the error into a string with a stack traceback.
pub(crate) unsafe extern "C-unwind" fn traceback_handler(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        let mut message = ffi::lua_tostring(state, 1);
        if message.is_null() {
            if ffi::luaL_callmeta(state, 1, c"__tostring".as_ptr()) != 0
                && ffi::lua_type(state, -1) == ffi::LUA_TSTRING
            {
                return 1;
            }
            message = ffi::lua_pushfstring(
                state,
                c"(error object is a %s value)".as_ptr(),
                ffi::luaL_typename(state, 1),
            );
        }
        ffi::luaL_traceback(state, state, message, 1);
    }
    1
}

pub(crate) fn collect_args(ctx: &Context, state: *mut ffi::lua_State) -> Vec<LuaValue> {
    let top = unsafe { ffi::lua_gettop(state) };
    (1..=top).map(|idx| LuaValue::read(ctx, state, idx)).collect()
}

pub(crate) fn check_arity(expected: Option<usize>, got: usize) -> LuaResult<()> {
    match expected {
        Some(expected) if expected != got => Err(LuaError::ArityMismatch { expected, got }),
        _ => Ok(()),
    }
}

pub(crate) fn push_results(
    ctx: &Context,
    state: *mut ffi::lua_State,
    results: Vec<LuaValue>,
) -> LuaResult<c_int> {
    Stack::new(state).ensure(results.len())?;
    for value in &results {
        value.push(ctx, state)?;
    }
    Ok(results.len() as c_int)
}

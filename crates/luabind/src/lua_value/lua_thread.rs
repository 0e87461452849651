use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::lua_value::{IntoLuaMulti, LuaValue};
use crate::lua_vm::lua_ref::{LuaRef, RefId};
use crate::lua_vm::stack::Stack;
use crate::lua_vm::{Context, LuaError, LuaResult};

/// Coroutine state as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Not started yet, or suspended in a yield.
    Resumable,
    /// Currently running, or resumed another coroutine.
    Running,
    Finished,
    /// Stopped by an error.
    Error,
}

/// Handle to a VM coroutine.
#[derive(Clone, Debug, PartialEq)]
pub struct LuaThread(pub(crate) LuaRef);

impl LuaThread {
    pub fn status(&self) -> ThreadStatus {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        unsafe { thread_status(ffi::lua_tothread(state, -1)) }
    }

    /// Resume the coroutine with `args` and collect what it yields or returns.
    pub fn resume<A: IntoLuaMulti>(&self, args: A) -> LuaResult<Vec<LuaValue>> {
        let ctx = self.0.context();
        ctx.check_reentry()?;
        let args = args.into_lua_multi(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(1)?;
        self.0.push(state);
        let thread = unsafe { ffi::lua_tothread(state, -1) };

        match unsafe { thread_status(thread) } {
            ThreadStatus::Resumable => {}
            ThreadStatus::Running => {
                return Err(LuaError::Runtime("cannot resume non-suspended coroutine".to_string()));
            }
            ThreadStatus::Finished | ThreadStatus::Error => {
                return Err(LuaError::Runtime("cannot resume dead coroutine".to_string()));
            }
        }

        let thread_stack = Stack::new(thread);
        thread_stack.ensure(args.len() + 1)?;
        for arg in &args {
            arg.push(ctx, thread)?;
        }
        let nargs = args.len() as c_int;
        drop(args);

        let mut nresults: c_int = 0;
        let status = unsafe { ffi::lua_resume(thread, state, nargs, &mut nresults) };
        match status {
            ffi::LUA_OK | ffi::LUA_YIELD => {
                let top = thread_stack.top();
                let results = ((top - nresults + 1)..=top)
                    .map(|idx| LuaValue::read(ctx, thread, idx))
                    .collect();
                thread_stack.pop(nresults);
                Ok(results)
            }
            status => Err(ctx.pop_error(thread, status)),
        }
    }

    #[inline]
    pub fn context(&self) -> &Context {
        self.0.context()
    }

    #[inline]
    pub fn ref_id(&self) -> RefId {
        self.0.ref_id()
    }
}

unsafe fn thread_status(thread: *mut ffi::lua_State) -> ThreadStatus {
    unsafe {
        match ffi::lua_status(thread) {
            ffi::LUA_YIELD => ThreadStatus::Resumable,
            ffi::LUA_OK => {
                let mut ar: ffi::lua_Debug = std::mem::zeroed();
                if ffi::lua_getstack(thread, 0, &mut ar) > 0 {
                    ThreadStatus::Running
                } else if ffi::lua_gettop(thread) == 0 {
                    ThreadStatus::Finished
                } else {
                    ThreadStatus::Resumable
                }
            }
            _ => ThreadStatus::Error,
        }
    }
}

use crate::lua_value::{FromLuaMulti, IntoLuaMulti, LuaValue};
use crate::lua_vm::lua_ref::{LuaRef, RefId};
use crate::lua_vm::{Context, LuaError, LuaResult};

/// Handle to a callable VM value (script closure or host function).
#[derive(Clone, Debug, PartialEq)]
pub struct LuaFunction(pub(crate) LuaRef);

impl LuaFunction {
    /// Call in protected mode and collect every result in order.
    ///
    /// Script errors come back as `LuaError::Runtime` with a traceback
    /// appended; the interpreter's error handler (if any) sees the message
    /// first.
    pub fn call<A: IntoLuaMulti>(&self, args: A) -> LuaResult<Vec<LuaValue>> {
        let ctx = self.0.context();
        let args = args.into_lua_multi(ctx)?;
        ctx.call_pinned(&self.0, args)
    }

    /// First result, or nil when the function returned nothing.
    pub fn call1<A: IntoLuaMulti>(&self, args: A) -> LuaResult<LuaValue> {
        Ok(self.call(args)?.into_iter().next().unwrap_or_default())
    }

    /// Convert the results to `R`. Surplus results are ignored; missing
    /// ones fail with `NoValue`.
    pub fn call_as<A: IntoLuaMulti, R: FromLuaMulti>(&self, args: A) -> LuaResult<R> {
        let results = self.call(args)?;
        R::from_lua_multi(results).map_err(|error| match error {
            LuaError::BadArgument { cause, .. } => *cause,
            other => other,
        })
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

//! Builder for the metatable of a registered custom type.
//!
//! [`CustomTypeBuilder`] is returned by `Context::register_type` and adds
//! fields, static functions, constructors and methods to the type table
//! scripts see under the type's name.
//!
//! # Example
//!
//! ```ignore
//! let note = lua
//!     .register_type::<Note>()?
//!     .constructor("new", |_, name: String| Ok(Note::new(name)))
//!     .method("getName", |_, note: &Note, ()| note.name.get())
//!     .method("setName", |_, note: &Note, name: String| note.name.set(name))
//!     .equatable()
//!     .build()?;
//! lua.set_global("Note", note)?;
//! ```
//!
//! Every step returns the builder; the first failure is kept and reported
//! by [`build`](CustomTypeBuilder::build).

use std::ffi::{CString, c_void};
use std::fmt::Display;
use std::marker::PhantomData;

use mlua_sys as ffi;

use super::custom_type::field_descriptor;
use super::lua_userdata::{finalize_instance, index_instance, newindex_instance};
use super::type_registry::FieldDescriptor;
use crate::lua_value::{
    CustomType, Field, FieldSet, FromLua, FromLuaMulti, Instance, IntoLua, IntoLuaMulti, LuaTable,
    LuaValue,
};
use crate::lua_vm::lua_ref::LuaRef;
use crate::lua_vm::stack::Stack;
use crate::lua_vm::{
    Callback, Context, LuaError, LuaResult, check_arity, collect_args, push_results,
};

/// Chained configuration of a custom type's metatable.
pub struct CustomTypeBuilder<T: CustomType> {
    table: LuaTable,
    error: Option<LuaError>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: CustomType> CustomTypeBuilder<T> {
    pub(crate) fn register(ctx: &Context) -> LuaResult<Self> {
        let first_registration = ctx.types().entry::<T>().is_none();
        if first_registration {
            // the name may also be taken by a metatable the host never registered
            let taken = {
                let name = CString::new(T::type_name()).unwrap_or_default();
                let state = ctx.state();
                let stack = Stack::new(state);
                let _guard = stack.guard();
                stack.ensure(1)?;
                unsafe { ffi::lua_getfield(state, ffi::LUA_REGISTRYINDEX, name.as_ptr()) != ffi::LUA_TNIL }
            };
            if taken {
                return Err(LuaError::TypeNameConflict(T::type_name().into()));
            }
            ctx.types_mut().register::<T>()?;
        }
        let c_name = ctx
            .types()
            .c_name::<T>()
            .ok_or(LuaError::UnregisteredType(T::type_name()))?;

        let table = {
            let state = ctx.state();
            let stack = Stack::new(state);
            let _guard = stack.guard();
            stack.ensure(3)?;
            if unsafe { ffi::luaL_newmetatable(state, c_name.as_ptr()) } != 0 {
                unsafe {
                    ffi::lua_pushcfunction(state, index_instance);
                    ffi::lua_setfield(state, -2, c"__index".as_ptr());
                    ffi::lua_pushcfunction(state, newindex_instance);
                    ffi::lua_setfield(state, -2, c"__newindex".as_ptr());
                    ffi::lua_pushlightuserdata(state, ctx.shared_ptr() as *mut c_void);
                    ffi::lua_pushcclosure(state, finalize_instance::<T>, 1);
                    ffi::lua_setfield(state, -2, c"__gc".as_ptr());
                    ffi::lua_newtable(state);
                    ffi::lua_setfield(state, -2, c"__fields".as_ptr());
                    // the type table is its own metatable
                    ffi::lua_pushvalue(state, -1);
                    ffi::lua_setmetatable(state, -2);
                }
            }
            LuaTable(LuaRef::pin(ctx, state, -1))
        };

        let mut builder = CustomTypeBuilder {
            table,
            error: None,
            _marker: PhantomData,
        };
        if first_registration {
            let mut fields = FieldSet::new();
            T::declare_fields(&mut fields);
            for descriptor in fields.into_descriptors() {
                builder = builder.install_field(descriptor);
            }
            if let Some(eq) = T::eq_hook() {
                builder = builder.install_eq(eq);
            }
            if let Some(display) = T::display_hook() {
                builder = builder.install_display(display);
            }
        }
        match builder.error.take() {
            Some(error) => Err(error),
            None => Ok(builder),
        }
    }

    fn record(mut self, result: LuaResult<()>) -> Self {
        if let Err(error) = result {
            self.error.get_or_insert(error);
        }
        self
    }

    fn install_field(self, descriptor: FieldDescriptor<T>) -> Self {
        let key = descriptor.key.clone();
        self.table.context().types_mut().add_field::<T>(descriptor);
        let result = self
            .table
            .raw_get_as::<_, LuaTable>("__fields")
            .and_then(|fields| fields.raw_set(key.as_str(), true));
        self.record(result)
    }

    fn install_eq(self, eq: fn(&T, &T) -> bool) -> Self {
        let result = self
            .table
            .context()
            .create_function(move |_, (lhs, rhs): (LuaValue, LuaValue)| {
                let (Ok(lhs), Ok(rhs)) = (Instance::<T>::from_lua(lhs), Instance::<T>::from_lua(rhs)) else {
                    return Ok(false);
                };
                let left = lhs.borrow()?;
                let right = rhs.borrow()?;
                Ok(eq(&left, &right))
            })
            .and_then(|function| self.table.raw_set("__eq", function));
        self.record(result)
    }

    fn install_display(self, display: fn(&T) -> String) -> Self {
        self.function("__tostring", move |_, this: Instance<T>| {
            let text = display(&*this.borrow()?);
            Ok(text)
        })
    }

    /// Expose the `Field` returned by `accessor` under `key` on instances
    /// created from now on.
    pub fn field<U, F>(self, key: &str, accessor: F) -> Self
    where
        U: FromLua + IntoLua + Clone + 'static,
        F: Fn(&T) -> &Field<U> + 'static,
    {
        self.install_field(field_descriptor(key, accessor))
    }

    /// A plain function on the type table (`Type.name(...)`). Metamethods
    /// such as `__add` or `__len` can be installed the same way.
    pub fn function<A, R, F>(self, name: &str, func: F) -> Self
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Context, A) -> LuaResult<R> + 'static,
    {
        let result = self
            .table
            .context()
            .create_function(func)
            .and_then(|function| self.table.raw_set(name, function));
        self.record(result)
    }

    /// A function that builds a new instance from its arguments.
    pub fn constructor<A, F>(self, name: &str, func: F) -> Self
    where
        A: FromLuaMulti,
        F: Fn(&Context, A) -> LuaResult<T> + 'static,
    {
        self.function(name, move |ctx, args: A| ctx.create_instance(func(ctx, args)?))
    }

    /// A method called as `instance:name(...)`. The receiver is argument 1
    /// and must be an instance of `T`.
    pub fn method<A, R, F>(self, name: &str, func: F) -> Self
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Context, &T, A) -> LuaResult<R> + 'static,
    {
        let callback: Callback = Box::new(move |ctx, state| {
            let mut args = collect_args(ctx, state);
            check_arity(A::ARITY.map(|n| n + 1), args.len())?;
            let this = receiver::<T>(&mut args)?;
            let args = A::from_lua_multi_at(args, 2)?;
            let results = {
                let value = this.borrow()?;
                func(ctx, &value, args)?
            };
            push_results(ctx, state, results.into_lua_multi(ctx)?)
        });
        self.install_callback(name, callback)
    }

    /// Like [`method`](Self::method) with exclusive access to the value.
    pub fn method_mut<A, R, F>(self, name: &str, func: F) -> Self
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Context, &mut T, A) -> LuaResult<R> + 'static,
    {
        let callback: Callback = Box::new(move |ctx, state| {
            let mut args = collect_args(ctx, state);
            check_arity(A::ARITY.map(|n| n + 1), args.len())?;
            let this = receiver::<T>(&mut args)?;
            let args = A::from_lua_multi_at(args, 2)?;
            let results = {
                let mut value = this.borrow_mut()?;
                func(ctx, &mut value, args)?
            };
            push_results(ctx, state, results.into_lua_multi(ctx)?)
        });
        self.install_callback(name, callback)
    }

    fn install_callback(self, name: &str, callback: Callback) -> Self {
        let result = self
            .table
            .context()
            .create_callback(callback)
            .and_then(|function| self.table.raw_set(name, function));
        self.record(result)
    }

    /// The type table being configured.
    pub fn table(&self) -> &LuaTable {
        &self.table
    }

    /// Finish, returning the type table or the first error recorded.
    pub fn build(self) -> LuaResult<LuaTable> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.table),
        }
    }
}

impl<T: CustomType + PartialEq> CustomTypeBuilder<T> {
    /// Compare instances with `PartialEq` in scripts (`a == b`).
    pub fn equatable(self) -> Self {
        self.install_eq(|lhs, rhs| lhs == rhs)
    }
}

impl<T: CustomType + Display> CustomTypeBuilder<T> {
    /// `tostring(instance)` uses `Display`.
    pub fn display(self) -> Self {
        self.install_display(|this| this.to_string())
    }
}

fn receiver<T: CustomType>(args: &mut Vec<LuaValue>) -> LuaResult<Instance<T>> {
    if args.is_empty() {
        return Err(LuaError::bad_argument(
            1,
            LuaError::NoValue {
                expected: T::type_name(),
            },
        ));
    }
    Instance::from_lua(args.remove(0)).map_err(|error| LuaError::bad_argument(1, error))
}

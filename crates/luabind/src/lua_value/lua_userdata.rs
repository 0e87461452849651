use std::cell::{Ref, RefCell, RefMut};
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use mlua_sys as ffi;

use crate::lua_value::lua_convert::mismatch;
use crate::lua_value::{CustomType, FromLua, IntoLua, LuaTable, LuaValue};
use crate::lua_vm::lua_ref::{LuaRef, RefId};
use crate::lua_vm::stack::Stack;
use crate::lua_vm::{
    Context, FinalizerScope, LuaError, LuaResult, Shared, panic_message, raise_error,
};

/// Alignment the VM guarantees for userdata blocks (`LUAI_MAXALIGN`).
const VM_ALIGN: usize = 8;

type Slot<T> = RefCell<Option<T>>;

fn block_size<T>() -> usize {
    mem::size_of::<Slot<T>>() + mem::align_of::<Slot<T>>().saturating_sub(VM_ALIGN)
}

/// The slot inside a block allocated with `block_size::<T>()`.
unsafe fn slot_at<T>(raw: *mut c_void) -> *mut Slot<T> {
    let align = mem::align_of::<Slot<T>>();
    let addr = raw as usize;
    let padding = addr.wrapping_neg() & (align - 1);
    unsafe { raw.cast::<u8>().add(padding).cast() }
}

/// Handle to a full userdata.
#[derive(Clone, Debug, PartialEq)]
pub struct LuaUserdata(pub(crate) LuaRef);

impl LuaUserdata {
    /// Whether this is an instance of the registered type `T`.
    pub fn is<T: CustomType>(&self) -> bool {
        let ctx = self.0.context();
        let Some(c_name) = ctx.types().c_name::<T>() else {
            return false;
        };
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        unsafe {
            !ffi::luaL_testudata(state, -1, c_name.as_ptr()).is_null()
                && ffi::lua_rawlen(state, -1) == block_size::<T>()
        }
    }

    pub fn downcast<T: CustomType>(self) -> LuaResult<Instance<T>> {
        if self.is::<T>() {
            Ok(Instance::new_unchecked(self))
        } else {
            Err(LuaError::TypeMismatch {
                expected: T::type_name(),
                found: "userdata",
            })
        }
    }

    pub fn metatable(&self) -> Option<LuaTable> {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        if unsafe { ffi::lua_getmetatable(state, -1) } == 0 {
            return None;
        }
        Some(LuaTable(LuaRef::pin(ctx, state, -1)))
    }

    /// `__name` from the metatable, if any.
    pub fn type_name(&self) -> LuaResult<Option<String>> {
        match self.metatable() {
            Some(metatable) => metatable.raw_get_as("__name"),
            None => Ok(None),
        }
    }

    /// The per-instance field storage of a custom-type instance.
    pub fn storage(&self) -> Option<LuaTable> {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        if unsafe { ffi::lua_getiuservalue(state, -1, 1) } != ffi::LUA_TTABLE {
            return None;
        }
        Some(LuaTable(LuaRef::pin(ctx, state, -1)))
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

/// Typed handle to an instance of a registered custom type.
///
/// The value lives inside the VM block and is accessed through
/// `borrow`/`borrow_mut`; conflicting borrows fail with
/// `InstanceBorrowed`, which is also what a script sees when it calls a
/// method on an instance the host is mutating.
pub struct Instance<T: CustomType> {
    userdata: LuaUserdata,
    _marker: PhantomData<*const T>,
}

impl<T: CustomType> Instance<T> {
    pub(crate) fn new_unchecked(userdata: LuaUserdata) -> Self {
        Instance {
            userdata,
            _marker: PhantomData,
        }
    }

    /// Allocate a block for `value` on top of `state` (no metatable yet).
    pub(crate) unsafe fn push_block(state: *mut ffi::lua_State, value: T) {
        unsafe {
            let raw = ffi::lua_newuserdatauv(state, block_size::<T>(), 1);
            ptr::write(slot_at::<T>(raw), RefCell::new(Some(value)));
        }
    }

    fn slot(&self) -> &Slot<T> {
        let ctx = self.userdata.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.userdata.0.push(state);
        // Full userdata never move; the handle keeps the block alive.
        unsafe { &*slot_at::<T>(ffi::lua_touserdata(state, -1)) }
    }

    pub fn borrow(&self) -> LuaResult<InstanceRef<'_, T>> {
        let guard = self
            .slot()
            .try_borrow()
            .map_err(|_| LuaError::InstanceBorrowed(T::type_name()))?;
        let inner = Ref::filter_map(guard, Option::as_ref)
            .map_err(|_| LuaError::InstanceFinalized(T::type_name()))?;
        let ctx = self.context();
        ctx.borrow_acquired();
        Ok(InstanceRef { inner, ctx })
    }

    pub fn borrow_mut(&self) -> LuaResult<InstanceRefMut<'_, T>> {
        let guard = self
            .slot()
            .try_borrow_mut()
            .map_err(|_| LuaError::InstanceBorrowed(T::type_name()))?;
        let inner = RefMut::filter_map(guard, Option::as_mut)
            .map_err(|_| LuaError::InstanceFinalized(T::type_name()))?;
        let ctx = self.context();
        ctx.borrow_acquired();
        Ok(InstanceRefMut { inner, ctx })
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> LuaResult<R> {
        let value = self.borrow()?;
        Ok(f(&value))
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> LuaResult<R> {
        let mut value = self.borrow_mut()?;
        Ok(f(&mut value))
    }

    /// Bind every declared field of the value to this instance's storage.
    pub(crate) fn bind_fields(&self) -> LuaResult<()> {
        let fields = self.context().types().fields::<T>();
        if fields.is_empty() {
            return Ok(());
        }
        let storage = self
            .userdata
            .storage()
            .ok_or(LuaError::UnregisteredType(T::type_name()))?;
        let value = self.borrow()?;
        for field in &fields {
            (field.bind)(&value, &storage, field.key.as_str())?;
        }
        Ok(())
    }

    #[inline]
    pub fn userdata(&self) -> &LuaUserdata {
        &self.userdata
    }

    pub fn into_userdata(self) -> LuaUserdata {
        self.userdata
    }

    #[inline]
    pub fn context(&self) -> &Context {
        self.userdata.context()
    }
}

impl<T: CustomType> Clone for Instance<T> {
    fn clone(&self) -> Self {
        Instance::new_unchecked(self.userdata.clone())
    }
}

/// VM equality: runs `__eq` when the type is equatable.
impl<T: CustomType> PartialEq for Instance<T> {
    fn eq(&self, other: &Self) -> bool {
        self.userdata == other.userdata
    }
}

impl<T: CustomType> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>({})", T::type_name(), self.userdata.ref_id())
    }
}

impl<T: CustomType> FromLua for Instance<T> {
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::Userdata(ud) if ud.is::<T>())
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Userdata(ud) => ud.downcast(),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        T::type_name()
    }
}

impl<T: CustomType> IntoLua for Instance<T> {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::Userdata(self.userdata))
    }
}

impl<T: CustomType> IntoLua for &Instance<T> {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::Userdata(self.userdata.clone()))
    }
}

/// Shared borrow of an instance's value.
pub struct InstanceRef<'a, T> {
    inner: Ref<'a, T>,
    ctx: &'a Context,
}

impl<T> Deref for InstanceRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> Drop for InstanceRef<'_, T> {
    fn drop(&mut self) {
        self.ctx.borrow_released();
    }
}

/// Exclusive borrow of an instance's value.
pub struct InstanceRefMut<'a, T> {
    inner: RefMut<'a, T>,
    ctx: &'a Context,
}

impl<T> Deref for InstanceRefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for InstanceRefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Drop for InstanceRefMut<'_, T> {
    fn drop(&mut self) {
        self.ctx.borrow_released();
    }
}

// ---- metamethods --------------------------------------------------------

/// `__gc`: run the deinitialize hook, then drop the value. Upvalue 1 is the
/// interpreter's shared state.
pub(crate) unsafe extern "C-unwind" fn finalize_instance<T: CustomType>(
    state: *mut ffi::lua_State,
) -> c_int {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        let raw = ffi::lua_touserdata(state, 1);
        if raw.is_null() || ffi::lua_rawlen(state, 1) != block_size::<T>() {
            return;
        }
        let shared = &*(ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const Shared);
        let _scope = FinalizerScope::enter(shared);
        let slot = &*slot_at::<T>(raw);
        // A value still borrowed by the host is leaked rather than dropped.
        let taken = match slot.try_borrow_mut() {
            Ok(mut value) => value.take(),
            Err(_) => None,
        };
        if let Some(mut value) = taken {
            value.deinitialize();
        }
    }));

    if let Err(payload) = outcome {
        let message = panic_message(payload.as_ref());
        drop(payload);
        // errors raised from `__gc` only become VM warnings
        unsafe {
            let shared = ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const Shared;
            if !shared.is_null() {
                let shared = &*shared;
                let _ = panic::catch_unwind(AssertUnwindSafe(|| shared.report_error(&message)));
            }
            raise_error(state, message)
        }
    }
    0
}

/// `__index`: per-instance storage first, then the metatable (methods).
pub(crate) unsafe extern "C-unwind" fn index_instance(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        if ffi::lua_type(state, 1) == ffi::LUA_TUSERDATA {
            if ffi::lua_getiuservalue(state, 1, 1) == ffi::LUA_TTABLE {
                ffi::lua_pushvalue(state, 2);
                if ffi::lua_rawget(state, -2) != ffi::LUA_TNIL {
                    return 1;
                }
                ffi::lua_pop(state, 1);
            }
            ffi::lua_pop(state, 1);
        }
        if ffi::lua_getmetatable(state, 1) == 0 {
            ffi::lua_pushnil(state);
            return 1;
        }
        ffi::lua_pushvalue(state, 2);
        ffi::lua_rawget(state, -2);
    }
    1
}

/// `__newindex`: declared fields go to per-instance storage; anything else
/// is an error. The type table itself stays freely assignable.
pub(crate) unsafe extern "C-unwind" fn newindex_instance(state: *mut ffi::lua_State) -> c_int {
    unsafe {
        if ffi::lua_type(state, 1) != ffi::LUA_TUSERDATA {
            ffi::lua_settop(state, 3);
            ffi::lua_rawset(state, 1);
            return 0;
        }
        let declared = ffi::lua_getmetatable(state, 1) != 0
            && ffi::lua_getfield(state, -1, c"__fields".as_ptr()) == ffi::LUA_TTABLE
            && {
                ffi::lua_pushvalue(state, 2);
                ffi::lua_rawget(state, -2) != ffi::LUA_TNIL
            };
        if declared && ffi::lua_getiuservalue(state, 1, 1) == ffi::LUA_TTABLE {
            ffi::lua_pushvalue(state, 2);
            ffi::lua_pushvalue(state, 3);
            ffi::lua_rawset(state, -3);
            return 0;
        }
        let key = ffi::luaL_tolstring(state, 2, ptr::null_mut());
        let target = ffi::luaL_tolstring(state, 1, ptr::null_mut());
        ffi::lua_pushfstring(state, c"cannot assign field '%s' of %s".as_ptr(), key, target);
        ffi::lua_error(state)
    }
}

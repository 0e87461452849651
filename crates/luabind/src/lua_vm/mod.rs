// Interpreter ownership and the shared state behind every handle.
//
// `Lua` owns the VM and closes it on drop. Every handle (tables, functions,
// instances) holds a `Context`, a cheap clone of the shared state, so the
// owner can be dropped while handles still exist: releasing such a handle
// is a no-op, using it is a fatal error.
mod call;
mod lua_error;
mod lua_options;
pub(crate) mod lua_ref;
pub(crate) mod stack;

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::ffi::CString;
use std::ops::Deref;
use std::os::raw::c_int;
use std::ptr;
use std::rc::{Rc, Weak};

use mlua_sys as ffi;

use crate::lua_value::type_registry::TypeRegistry;
use crate::lua_value::{
    CustomType, CustomTypeBuilder, FromLua, Instance, IntoLua, IntoLuaMulti, LuaFunction, LuaTable,
    LuaThread, LuaUserdata, LuaValue, error_message,
};
use call::Trampoline;
use lua_ref::LuaRef;
use stack::Stack;

pub use lua_error::LuaError;
pub use lua_options::{GcMode, LuaOptions, Stdlib};
pub use lua_ref::RefId;

pub(crate) use call::{
    Callback, check_arity, collect_args, panic_message, push_results, raise_error,
};

pub type LuaResult<T> = Result<T, LuaError>;

pub(crate) struct Shared {
    /// Main thread; null once the interpreter is closed.
    main: Cell<*mut ffi::lua_State>,
    /// Thread whose stack host operations use: the main thread, or the
    /// thread running the innermost host function.
    current: Cell<*mut ffi::lua_State>,
    trampolines: RefCell<Vec<Box<Trampoline>>>,
    types: RefCell<TypeRegistry>,
    error_handler: RefCell<Option<Rc<dyn Fn(&str)>>>,
    /// Depth of custom-type finalizers currently running.
    finalizing: Cell<usize>,
    /// Outstanding `InstanceRef`/`InstanceRefMut` guards.
    borrows: Cell<usize>,
}

impl Shared {
    /// Hand `message` to the installed error handler, if any.
    pub(crate) fn report_error(&self, message: &str) {
        // cloned out so the handler may re-enter the interpreter
        let handler = self.error_handler.borrow().clone();
        if let Some(handler) = handler {
            handler(message);
        }
    }
}

/// Access to a live interpreter.
///
/// Host functions receive a `&Context`; `Lua` dereferences to one. Cloning
/// is cheap and does not extend the interpreter's life.
#[derive(Clone)]
pub struct Context {
    pub(crate) shared: Rc<Shared>,
}

impl Context {
    fn from_state(state: *mut ffi::lua_State) -> Self {
        Context {
            shared: Rc::new(Shared {
                main: Cell::new(state),
                current: Cell::new(state),
                trampolines: RefCell::new(Vec::new()),
                types: RefCell::new(TypeRegistry::default()),
                error_handler: RefCell::new(None),
                finalizing: Cell::new(0),
                borrows: Cell::new(0),
            }),
        }
    }

    /// The stack host operations run on. Panics after close.
    #[inline]
    pub(crate) fn state(&self) -> *mut ffi::lua_State {
        let state = self.shared.current.get();
        assert!(!state.is_null(), "Lua interpreter used after it was closed");
        state
    }

    #[inline]
    pub(crate) fn state_if_open(&self) -> Option<*mut ffi::lua_State> {
        let state = self.shared.current.get();
        (!state.is_null()).then_some(state)
    }

    #[inline]
    pub(crate) fn same_interpreter(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn downgrade(&self) -> Weak<Shared> {
        Rc::downgrade(&self.shared)
    }

    pub(crate) fn shared_ptr(&self) -> *const Shared {
        Rc::as_ptr(&self.shared)
    }

    /// Route host operations to `state` until the scope ends.
    pub(crate) fn enter(&self, state: *mut ffi::lua_State) -> StateScope {
        let previous = self.shared.current.replace(state);
        StateScope {
            shared: self.shared.clone(),
            previous,
        }
    }

    pub(crate) fn types(&self) -> Ref<'_, TypeRegistry> {
        self.shared.types.borrow()
    }

    pub(crate) fn types_mut(&self) -> RefMut<'_, TypeRegistry> {
        self.shared.types.borrow_mut()
    }

    pub(crate) fn check_reentry(&self) -> LuaResult<()> {
        if self.shared.finalizing.get() > 0 {
            return Err(LuaError::FinalizerReentry);
        }
        Ok(())
    }

    pub(crate) fn borrow_acquired(&self) {
        self.shared.borrows.set(self.shared.borrows.get() + 1);
    }

    pub(crate) fn borrow_released(&self) {
        self.shared.borrows.set(self.shared.borrows.get() - 1);
    }

    /// Pop the error object left by a failed protected operation, report
    /// it to the error handler and classify it by status.
    pub(crate) fn pop_error(&self, state: *mut ffi::lua_State, status: c_int) -> LuaError {
        let message = unsafe { error_message(state, -1) };
        unsafe { ffi::lua_pop(state, 1) };
        self.report_error(&message);
        match status {
            ffi::LUA_ERRSYNTAX => LuaError::Syntax(message),
            ffi::LUA_ERRMEM => LuaError::Memory(message),
            ffi::LUA_ERRERR => LuaError::ErrorHandler(message),
            _ => LuaError::Runtime(message),
        }
    }

    fn report_error(&self, message: &str) {
        self.shared.report_error(message);
    }

    /// Called with the message of every VM error surfaced to the host.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&str) + 'static,
    {
        *self.shared.error_handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn clear_error_handler(&self) {
        self.shared.error_handler.borrow_mut().take();
    }

    /// Compile `source` without running it.
    pub fn load(&self, source: &str, chunk_name: &str) -> LuaResult<LuaFunction> {
        let chunk_name = CString::new(chunk_name).unwrap_or_default();
        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(1)?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                state,
                source.as_ptr().cast(),
                source.len(),
                chunk_name.as_ptr(),
                c"t".as_ptr(),
            )
        };
        if status != ffi::LUA_OK {
            return Err(self.pop_error(state, status));
        }
        Ok(LuaFunction(LuaRef::pop(self, state)))
    }

    /// Compile and run `source` with `args` available as `...`.
    pub fn eval<A: IntoLuaMulti>(&self, source: &str, args: A) -> LuaResult<Vec<LuaValue>> {
        self.load(source, source)?.call(args)
    }

    /// Compile and run `source`, discarding its results.
    pub fn exec(&self, source: &str) -> LuaResult<()> {
        self.eval(source, ()).map(|_| ())
    }

    pub fn globals(&self) -> LuaTable {
        let state = self.state();
        Stack::new(state).raw_get_index(ffi::LUA_REGISTRYINDEX, ffi::LUA_RIDX_GLOBALS);
        LuaTable(LuaRef::pop(self, state))
    }

    pub fn registry(&self) -> LuaTable {
        let state = self.state();
        Stack::new(state).push_copy(ffi::LUA_REGISTRYINDEX);
        LuaTable(LuaRef::pop(self, state))
    }

    pub fn get_global(&self, name: &str) -> LuaResult<LuaValue> {
        self.globals().get(name)
    }

    pub fn get_global_as<T: FromLua>(&self, name: &str) -> LuaResult<T> {
        self.globals().get_as(name)
    }

    pub fn get_global_instance<T: CustomType>(&self, name: &str) -> LuaResult<Instance<T>> {
        self.globals().get_instance(name)
    }

    pub fn set_global<V: IntoLua>(&self, name: &str, value: V) -> LuaResult<()> {
        self.globals().set(name, value)
    }

    pub fn create_table(&self) -> LuaResult<LuaTable> {
        self.create_table_with_capacity(0, 0)
    }

    pub fn create_table_with_capacity(&self, narr: usize, nrec: usize) -> LuaResult<LuaTable> {
        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(1)?;
        let narr = c_int::try_from(narr).unwrap_or(c_int::MAX);
        let nrec = c_int::try_from(nrec).unwrap_or(c_int::MAX);
        unsafe { ffi::lua_createtable(state, narr, nrec) };
        Ok(LuaTable(LuaRef::pop(self, state)))
    }

    /// `{[1] = a, [2] = b, ...}`
    pub fn create_sequence<T, I>(&self, items: I) -> LuaResult<LuaTable>
    where
        T: IntoLua,
        I: IntoIterator<Item = T>,
    {
        let items = items.into_iter();
        let table = self.create_table_with_capacity(items.size_hint().0, 0)?;
        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        table.0.push(state);
        for (index, item) in (1i64..).zip(items) {
            item.into_lua(self)?.push(self, state)?;
            stack.raw_set_index(-2, index);
        }
        Ok(table)
    }

    /// A table holding every `(key, value)` pair. Nil keys are rejected.
    pub fn create_table_from<K, V, I>(&self, entries: I) -> LuaResult<LuaTable>
    where
        K: IntoLua,
        V: IntoLua,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries.into_iter();
        let table = self.create_table_with_capacity(0, entries.size_hint().0)?;
        for (key, value) in entries {
            table.raw_set(key, value)?;
        }
        Ok(table)
    }

    /// A suspended coroutine that will run `function` when first resumed.
    pub fn create_thread(&self, function: &LuaFunction) -> LuaResult<LuaThread> {
        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        let thread = unsafe { ffi::lua_newthread(state) };
        function.0.push_into(self, state)?;
        unsafe { ffi::lua_xmove(state, thread, 1) };
        Ok(LuaThread(LuaRef::pop(self, state)))
    }

    /// Register `T` and return a builder over its metatable.
    ///
    /// The first registration creates the metatable (named by
    /// `T::type_name()`) and installs the fields `T` declares. Registering
    /// again returns a builder over the same table. A different type
    /// claiming the same name fails with `TypeNameConflict`.
    pub fn register_type<T: CustomType>(&self) -> LuaResult<CustomTypeBuilder<T>> {
        CustomTypeBuilder::register(self)
    }

    /// Create a new instance of a registered type with every declared field
    /// bound to the instance's storage.
    pub fn create_instance<T: CustomType>(&self, value: T) -> LuaResult<Instance<T>> {
        let (c_name, field_count) = {
            let types = self.types();
            let entry = types
                .entry::<T>()
                .ok_or(LuaError::UnregisteredType(T::type_name()))?;
            (entry.c_name().to_owned(), types.field_count::<T>())
        };

        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(3)?;
        unsafe {
            Instance::<T>::push_block(state, value);
            ffi::luaL_setmetatable(state, c_name.as_ptr());
            ffi::lua_createtable(state, 0, c_int::try_from(field_count).unwrap_or(0));
            ffi::lua_setiuservalue(state, -2, 1);
        }
        let instance = Instance::<T>::new_unchecked(LuaUserdata(LuaRef::pop(self, state)));
        instance.bind_fields()?;
        Ok(instance)
    }

    /// Open the given standard libraries in this interpreter.
    pub fn load_std_libs(&self, libs: &[Stdlib]) -> LuaResult<()> {
        let state = self.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        for lib in libs {
            match lib.opener() {
                Some((name, open)) => unsafe {
                    ffi::luaL_requiref(state, name.as_ptr(), open, 1);
                    ffi::lua_pop(state, 1);
                },
                None => unsafe { ffi::luaL_openlibs(state) },
            }
        }
        Ok(())
    }

    pub fn set_gc_mode(&self, mode: GcMode) {
        unsafe { ffi::lua_gc(self.state(), mode.raw(), 0, 0) };
    }

    /// Run a full collection cycle, including pending finalizers.
    pub fn collect_garbage(&self) {
        unsafe { ffi::lua_gc(self.state(), ffi::LUA_GCCOLLECT) };
    }

    /// Bytes currently allocated by the VM.
    pub fn used_memory(&self) -> usize {
        let state = self.state();
        let kbytes = unsafe { ffi::lua_gc(state, ffi::LUA_GCCOUNT) } as usize;
        let bytes = unsafe { ffi::lua_gc(state, ffi::LUA_GCCOUNTB) } as usize;
        kbytes * 1024 + bytes
    }

    /// Number of values on the current stack. Host operations never change it.
    pub fn stack_top(&self) -> i32 {
        Stack::new(self.state()).top()
    }
}

/// Restores the previously current thread on drop.
pub(crate) struct StateScope {
    shared: Rc<Shared>,
    previous: *mut ffi::lua_State,
}

impl Drop for StateScope {
    fn drop(&mut self) {
        // a closed interpreter stays closed
        if !self.shared.main.get().is_null() {
            self.shared.current.set(self.previous);
        }
    }
}

/// Marks a custom-type finalizer as running for its duration.
pub(crate) struct FinalizerScope<'a> {
    shared: &'a Shared,
}

impl<'a> FinalizerScope<'a> {
    pub(crate) fn enter(shared: &'a Shared) -> Self {
        shared.finalizing.set(shared.finalizing.get() + 1);
        FinalizerScope { shared }
    }
}

impl Drop for FinalizerScope<'_> {
    fn drop(&mut self) {
        self.shared.finalizing.set(self.shared.finalizing.get() - 1);
    }
}

/// An owned interpreter.
///
/// Dropping it closes the VM (running pending finalizers) and then frees
/// the host functions registered with it.
pub struct Lua {
    context: Context,
}

impl Lua {
    /// A fresh interpreter with every standard library open.
    pub fn new() -> LuaResult<Self> {
        Self::with_options(LuaOptions::default())
    }

    pub fn with_options(options: LuaOptions) -> LuaResult<Self> {
        let state = unsafe { ffi::luaL_newstate() };
        if state.is_null() {
            return Err(LuaError::Memory("cannot create interpreter state".to_string()));
        }
        let lua = Lua {
            context: Context::from_state(state),
        };
        lua.load_std_libs(&options.std_libs)?;
        lua.set_gc_mode(options.gc_mode);
        Ok(lua)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl Deref for Lua {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.context
    }
}

impl Drop for Lua {
    fn drop(&mut self) {
        let shared = &self.context.shared;
        let state = shared.main.get();
        if state.is_null() {
            return;
        }

        if shared.borrows.get() > 0 {
            // Borrow guards point into VM memory: leave the VM (and the
            // functions it may still call) allocated.
            shared.main.set(ptr::null_mut());
            shared.current.set(ptr::null_mut());
            std::mem::forget(shared.trampolines.take());
            if !std::thread::panicking() {
                panic!("Lua interpreter dropped while an instance is borrowed");
            }
            return;
        }

        shared.current.set(state);
        unsafe { ffi::lua_close(state) };
        shared.main.set(ptr::null_mut());
        shared.current.set(ptr::null_mut());

        // Trampolines must outlive the VM: finalizers may still call them.
        shared.trampolines.borrow_mut().clear();
        shared.types.borrow_mut().clear();
        shared.error_handler.borrow_mut().take();
    }
}

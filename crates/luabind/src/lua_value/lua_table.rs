use std::hash::Hash;

use ahash::AHashMap;
use mlua_sys as ffi;

use crate::lua_value::lua_convert::mismatch;
use crate::lua_value::{
    CustomType, FromLua, FromLuaMulti, Instance, IntoLua, IntoLuaMulti, LuaFunction, LuaValue,
};
use crate::lua_vm::lua_ref::{LuaRef, RefId};
use crate::lua_vm::stack::{Stack, protected_get, protected_len, protected_set};
use crate::lua_vm::{Context, LuaError, LuaResult};

/// Handle to a table living in the VM.
///
/// `get`/`set` honor `__index`/`__newindex`; the `raw_*` variants bypass
/// metamethods. Metamethod errors are reported as `LuaError::Runtime`.
#[derive(Clone, Debug, PartialEq)]
pub struct LuaTable(pub(crate) LuaRef);

impl LuaTable {
    /// `t[key]`, running `__index` if present.
    pub fn get<K: IntoLua>(&self, key: K) -> LuaResult<LuaValue> {
        let ctx = self.0.context();
        let key = key.into_lua(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(3)?;
        self.0.push(state);
        key.push(ctx, state)?;
        if let Err(status) = stack.protect(2, 1, protected_get) {
            return Err(ctx.pop_error(state, status));
        }
        Ok(LuaValue::read(ctx, state, -1))
    }

    /// `t[key]` converted to `T`.
    pub fn get_as<K: IntoLua, T: FromLua>(&self, key: K) -> LuaResult<T> {
        T::from_lua(self.get(key)?)
    }

    /// `t[key] = value`, running `__newindex` if present. A nil or NaN key
    /// is a runtime error.
    pub fn set<K: IntoLua, V: IntoLua>(&self, key: K, value: V) -> LuaResult<()> {
        let ctx = self.0.context();
        let key = key.into_lua(ctx)?;
        let value = value.into_lua(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(4)?;
        self.0.push(state);
        key.push(ctx, state)?;
        value.push(ctx, state)?;
        if let Err(status) = stack.protect(3, 0, protected_set) {
            return Err(ctx.pop_error(state, status));
        }
        Ok(())
    }

    pub fn raw_get<K: IntoLua>(&self, key: K) -> LuaResult<LuaValue> {
        let ctx = self.0.context();
        let key = key.into_lua(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        self.0.push(state);
        key.push(ctx, state)?;
        unsafe { ffi::lua_rawget(state, -2) };
        Ok(LuaValue::read(ctx, state, -1))
    }

    pub fn raw_get_as<K: IntoLua, T: FromLua>(&self, key: K) -> LuaResult<T> {
        T::from_lua(self.raw_get(key)?)
    }

    /// `t[key] = value` without metamethods.
    pub fn raw_set<K: IntoLua, V: IntoLua>(&self, key: K, value: V) -> LuaResult<()> {
        let ctx = self.0.context();
        let key = key.into_lua(ctx)?;
        match &key {
            LuaValue::Nil => return Err(LuaError::Runtime("index is nil".to_string())),
            LuaValue::Number(n) if n.to_float().is_nan() => {
                return Err(LuaError::Runtime("index is NaN".to_string()));
            }
            _ => {}
        }
        let value = value.into_lua(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(3)?;
        self.0.push(state);
        key.push(ctx, state)?;
        value.push(ctx, state)?;
        unsafe { ffi::lua_rawset(state, -3) };
        Ok(())
    }

    /// Typed read of a custom-type instance stored under `key`.
    pub fn get_instance<T: CustomType, K: IntoLua>(&self, key: K) -> LuaResult<Instance<T>> {
        Instance::from_lua(self.get(key)?)
    }

    /// Store a new instance of `T` under `key` and return a handle to it.
    pub fn set_instance<T: CustomType, K: IntoLua>(&self, key: K, value: T) -> LuaResult<Instance<T>> {
        let instance = self.0.context().create_instance(value)?;
        self.set(key, &instance)?;
        Ok(instance)
    }

    /// Register a host function under `name`.
    pub fn set_function<A, R, F>(&self, name: &str, func: F) -> LuaResult<()>
    where
        A: FromLuaMulti,
        R: IntoLuaMulti,
        F: Fn(&Context, A) -> LuaResult<R> + 'static,
    {
        let function = self.0.context().create_function(func)?;
        self.set(name, function)
    }

    /// Call the function stored under `name` with `args`.
    pub fn call_function<A: IntoLuaMulti>(&self, name: &str, args: A) -> LuaResult<Vec<LuaValue>> {
        let function: LuaFunction = self.get_as(name)?;
        function.call(args)
    }

    /// Raw length (`#t` without `__len`).
    pub fn raw_len(&self) -> usize {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        unsafe { ffi::lua_rawlen(state, -1) }
    }

    /// `#t`, honoring `__len`.
    pub fn len(&self) -> LuaResult<i64> {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        self.0.push(state);
        if let Err(status) = stack.protect(1, 1, protected_len) {
            return Err(ctx.pop_error(state, status));
        }
        match LuaValue::read(ctx, state, -1) {
            LuaValue::Number(n) => n
                .as_exact_integer()
                .ok_or(LuaError::ConversionFailure {
                    from: "number",
                    to: "length",
                }),
            other => Err(mismatch::<i64>(&other)),
        }
    }

    /// True when the table has no entries at all.
    pub fn is_empty(&self) -> bool {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        unsafe {
            ffi::lua_pushnil(state);
            ffi::lua_next(state, -2) == 0
        }
    }

    /// Append at `raw_len() + 1`.
    pub fn push<V: IntoLua>(&self, value: V) -> LuaResult<()> {
        let next = self.raw_len() as i64 + 1;
        self.raw_set(next, value)
    }

    /// All keys in traversal order. The order is unspecified.
    pub fn keys(&self) -> LuaResult<Vec<LuaValue>> {
        Ok(self.pairs()?.into_iter().map(|(key, _)| key).collect())
    }

    /// All `(key, value)` pairs in traversal order.
    ///
    /// Handles are pinned only after the walk ends; the registry must not
    /// change while it is walked.
    pub fn pairs(&self) -> LuaResult<Vec<(LuaValue, LuaValue)>> {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(5)?;
        self.0.push(state);
        let table = stack.absolute(-1);
        unsafe { ffi::lua_newtable(state) };
        let scratch = stack.absolute(-1);

        let mut count = 0i64;
        stack.push_nil();
        while unsafe { ffi::lua_next(state, table) } != 0 {
            count += 1;
            stack.raw_set_index(scratch, 2 * count);
            // the key stays behind for the next step
            stack.push_copy(-1);
            stack.raw_set_index(scratch, 2 * count - 1);
        }

        let mut pairs = Vec::with_capacity(count as usize);
        for entry in 1..=count {
            stack.raw_get_index(scratch, 2 * entry - 1);
            let key = LuaValue::read(ctx, state, -1);
            stack.pop(1);
            stack.raw_get_index(scratch, 2 * entry);
            let value = LuaValue::read(ctx, state, -1);
            stack.pop(1);
            pairs.push((key, value));
        }
        Ok(pairs)
    }

    /// The sequence `t[1..=n]` as a vector.
    ///
    /// Only positive integer keys take part; zero, negative and
    /// non-integer keys are ignored. The positive keys must be exactly
    /// `1..=n`, otherwise the first missing index is reported as
    /// `SparseTable`. An empty table gives an empty vector.
    pub fn to_vec<T: FromLua>(&self) -> LuaResult<Vec<T>> {
        let mut indexed: Vec<(i64, LuaValue)> = self
            .pairs()?
            .into_iter()
            .filter_map(|(key, value)| {
                key.as_number()
                    .and_then(|n| n.as_exact_integer())
                    .filter(|index| *index >= 1)
                    .map(|index| (index, value))
            })
            .collect();
        indexed.sort_unstable_by_key(|(index, _)| *index);

        for (expected, (index, _)) in (1i64..).zip(indexed.iter()) {
            if *index != expected {
                return Err(LuaError::SparseTable { missing: expected });
            }
        }
        indexed.into_iter().map(|(_, value)| T::from_lua(value)).collect()
    }

    /// Entries whose key and value both convert; the rest are skipped.
    pub fn to_map<K, V>(&self) -> LuaResult<AHashMap<K, V>>
    where
        K: FromLua + Eq + Hash,
        V: FromLua,
    {
        let mut map = AHashMap::new();
        for (key, value) in self.pairs()? {
            if !K::type_check(&key) || !V::type_check(&value) {
                continue;
            }
            if let (Ok(key), Ok(value)) = (K::from_lua(key), V::from_lua(value)) {
                map.insert(key, value);
            }
        }
        Ok(map)
    }

    /// Entries whose value converts to `V`, keyed by the raw key.
    pub fn to_pairs<V: FromLua>(&self) -> LuaResult<Vec<(LuaValue, V)>> {
        Ok(self
            .pairs()?
            .into_iter()
            .filter(|(_, value)| V::type_check(value))
            .filter_map(|(key, value)| V::from_lua(value).ok().map(|value| (key, value)))
            .collect())
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

    /// Replace (or with `None`, remove) this table's metatable.
    pub fn set_metatable(&self, metatable: Option<&LuaTable>) -> LuaResult<()> {
        let ctx = self.0.context();
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        self.0.push(state);
        match metatable {
            Some(mt) => mt.0.push_into(ctx, state)?,
            None => stack.push_nil(),
        }
        unsafe { ffi::lua_setmetatable(state, -2) };
        Ok(())
    }

    /// Install this table as the metatable of `value`.
    ///
    /// For tables and full userdata this affects that object only; for
    /// other types the VM keeps one metatable per type.
    pub fn become_metatable_for<V: IntoLua>(&self, value: V) -> LuaResult<()> {
        let ctx = self.0.context();
        let value = value.into_lua(ctx)?;
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        stack.ensure(2)?;
        value.push(ctx, state)?;
        self.0.push(state);
        unsafe { ffi::lua_setmetatable(state, -2) };
        Ok(())
    }

    #[inline]
    pub fn context(&self) -> &Context {
        self.0.context()
    }

    #[inline]
    pub fn ref_id(&self) -> RefId {
        self.0.ref_id()
    }

    /// Identity comparison without `__eq`.
    pub fn raw_equals(&self, other: &LuaTable) -> bool {
        let ctx = self.0.context();
        if !ctx.same_interpreter(other.0.context()) {
            return false;
        }
        let state = ctx.state();
        let stack = Stack::new(state);
        let _guard = stack.guard();
        self.0.push(state);
        other.0.push(state);
        unsafe { ffi::lua_rawequal(state, -1, -2) != 0 }
    }
}

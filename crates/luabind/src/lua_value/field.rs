use std::cell::RefCell;
use std::fmt;

use crate::lua_value::{FromLua, IntoLua, LuaTable, LuaValue};
use crate::lua_vm::LuaResult;

/// A host-side field that can be redirected into a VM table.
///
/// An unbound field holds its value in host memory. Binding it to
/// `(table, key)` writes the current value there once; from then on every
/// read and write goes through the table, so the host and scripts see the
/// same value. Binding is one-way: a bound field never unbinds, and binding
/// it again is a no-op.
pub struct Field<T> {
    state: RefCell<FieldState<T>>,
}

enum FieldState<T> {
    Unbound(T),
    Bound { table: LuaTable, key: LuaValue },
}

impl<T> Field<T> {
    pub fn new(value: T) -> Self {
        Field {
            state: RefCell::new(FieldState::Unbound(value)),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(&*self.state.borrow(), FieldState::Bound { .. })
    }

    /// The table and key this field reads through, once bound.
    pub fn binding(&self) -> Option<(LuaTable, LuaValue)> {
        match &*self.state.borrow() {
            FieldState::Bound { table, key } => Some((table.clone(), key.clone())),
            FieldState::Unbound(_) => None,
        }
    }
}

impl<T: FromLua + IntoLua + Clone> Field<T> {
    /// Current value. Bound fields read `table[key]`; a value of the wrong
    /// type there yields `TypeMismatch`.
    pub fn get(&self) -> LuaResult<T> {
        match &*self.state.borrow() {
            FieldState::Unbound(value) => Ok(value.clone()),
            FieldState::Bound { table, key } => table.get_as(key),
        }
    }

    pub fn set(&self, value: T) -> LuaResult<()> {
        {
            let state = self.state.borrow();
            if let FieldState::Bound { table, key } = &*state {
                return table.set(key, value);
            }
        }
        *self.state.borrow_mut() = FieldState::Unbound(value);
        Ok(())
    }

    /// Redirect this field to `table[key]`, writing the current value there.
    pub fn bind<K: IntoLua>(&self, table: &LuaTable, key: K) -> LuaResult<()> {
        let current = match &*self.state.borrow() {
            FieldState::Bound { .. } => return Ok(()),
            FieldState::Unbound(value) => value.clone(),
        };
        let key = key.into_lua(table.context())?;
        table.set(&key, current)?;
        *self.state.borrow_mut() = FieldState::Bound {
            table: table.clone(),
            key,
        };
        Ok(())
    }
}

impl<T: Default> Default for Field<T> {
    fn default() -> Self {
        Field::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.borrow() {
            FieldState::Unbound(value) => f.debug_tuple("Field").field(value).finish(),
            FieldState::Bound { key, .. } => f.debug_struct("Field").field("bound_to", key).finish(),
        }
    }
}

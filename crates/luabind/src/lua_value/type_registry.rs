// Host-side bookkeeping for registered custom types: the VM-visible name of
// each Rust type and the fields bound into every new instance.
use std::any::{Any, TypeId};
use std::ffi::{CStr, CString};
use std::rc::Rc;

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::lua_value::{CustomType, LuaTable};
use crate::lua_vm::{LuaError, LuaResult};

/// Binds one field of a freshly created instance to its storage table.
pub(crate) type FieldBinder<T> = Rc<dyn Fn(&T, &LuaTable, &str) -> LuaResult<()>>;

pub(crate) struct FieldDescriptor<T> {
    pub(crate) key: SmolStr,
    pub(crate) bind: FieldBinder<T>,
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        FieldDescriptor {
            key: self.key.clone(),
            bind: Rc::clone(&self.bind),
        }
    }
}

pub(crate) struct TypeEntry {
    c_name: CString,
    /// `Vec<FieldDescriptor<T>>` for the entry's `T`.
    fields: Box<dyn Any>,
}

impl TypeEntry {
    pub(crate) fn c_name(&self) -> &CStr {
        &self.c_name
    }
}

#[derive(Default)]
pub(crate) struct TypeRegistry {
    by_type: AHashMap<TypeId, TypeEntry>,
    by_name: AHashMap<SmolStr, TypeId>,
}

impl TypeRegistry {
    /// Record `T` under its type name. Returns `false` if it was already
    /// registered.
    pub(crate) fn register<T: CustomType>(&mut self) -> LuaResult<bool> {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Ok(false);
        }

        let name = SmolStr::new(T::type_name());
        if self.by_name.contains_key(&name) {
            return Err(LuaError::TypeNameConflict(name));
        }
        let c_name = CString::new(name.as_str())
            .map_err(|_| LuaError::external(format!("type name '{name}' contains a NUL byte")))?;

        self.by_name.insert(name, type_id);
        self.by_type.insert(
            type_id,
            TypeEntry {
                c_name,
                fields: Box::new(Vec::<FieldDescriptor<T>>::new()),
            },
        );
        Ok(true)
    }

    pub(crate) fn entry<T: CustomType>(&self) -> Option<&TypeEntry> {
        self.by_type.get(&TypeId::of::<T>())
    }

    /// Metatable name for `T`, if registered.
    pub(crate) fn c_name<T: CustomType>(&self) -> Option<CString> {
        self.entry::<T>().map(|entry| entry.c_name.clone())
    }

    /// Add a field, replacing any earlier one under the same key.
    pub(crate) fn add_field<T: CustomType>(&mut self, descriptor: FieldDescriptor<T>) {
        let Some(fields) = self
            .by_type
            .get_mut(&TypeId::of::<T>())
            .and_then(|entry| entry.fields.downcast_mut::<Vec<FieldDescriptor<T>>>())
        else {
            return;
        };
        match fields.iter_mut().find(|field| field.key == descriptor.key) {
            Some(existing) => *existing = descriptor,
            None => fields.push(descriptor),
        }
    }

    pub(crate) fn fields<T: CustomType>(&self) -> Vec<FieldDescriptor<T>> {
        self.entry::<T>()
            .and_then(|entry| entry.fields.downcast_ref::<Vec<FieldDescriptor<T>>>())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn field_count<T: CustomType>(&self) -> usize {
        self.entry::<T>()
            .and_then(|entry| entry.fields.downcast_ref::<Vec<FieldDescriptor<T>>>())
            .map_or(0, Vec::len)
    }

    pub(crate) fn clear(&mut self) {
        self.by_type.clear();
        self.by_name.clear();
    }
}

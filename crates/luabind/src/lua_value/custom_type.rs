use std::rc::Rc;

use smol_str::SmolStr;

use crate::lua_value::type_registry::FieldDescriptor;
use crate::lua_value::{Field, FromLua, IntoLua, LuaTable};

/// A host type whose values can live inside the VM as instances.
///
/// Instances are full userdata carrying the value itself, a per-instance
/// storage table for its fields, and the type's metatable (registered
/// under [`type_name`](Self::type_name)). Usually derived with
/// `#[derive(LuaCustomType)]`.
///
/// ```ignore
/// struct Note {
///     name: Field<String>,
/// }
///
/// impl CustomType for Note {
///     fn type_name() -> &'static str {
///         "Note"
///     }
///
///     fn declare_fields(fields: &mut FieldSet<Self>) {
///         fields.field("name", |note: &Note| &note.name);
///     }
/// }
/// ```
pub trait CustomType: Sized + 'static {
    /// Name of the metatable in the registry and of the type in messages.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Fields bound to the storage of every new instance.
    fn declare_fields(fields: &mut FieldSet<Self>) {
        let _ = fields;
    }

    /// Equality used for `__eq` when the type opts in.
    fn eq_hook() -> Option<fn(&Self, &Self) -> bool> {
        None
    }

    /// Text used for `tostring` when the type opts in.
    fn display_hook() -> Option<fn(&Self) -> String> {
        None
    }

    /// Runs once when the VM collects the instance, right before the value
    /// is dropped. Must not call back into the VM.
    fn deinitialize(&mut self) {}
}

/// Collects the fields a custom type exposes.
pub struct FieldSet<T> {
    fields: Vec<FieldDescriptor<T>>,
}

impl<T: CustomType> FieldSet<T> {
    pub(crate) fn new() -> Self {
        FieldSet { fields: Vec::new() }
    }

    /// Expose the `Field` returned by `accessor` under `key`.
    pub fn field<U, F>(&mut self, key: &str, accessor: F) -> &mut Self
    where
        U: FromLua + IntoLua + Clone + 'static,
        F: Fn(&T) -> &Field<U> + 'static,
    {
        self.fields.push(field_descriptor(key, accessor));
        self
    }

    pub(crate) fn into_descriptors(self) -> Vec<FieldDescriptor<T>> {
        self.fields
    }
}

pub(crate) fn field_descriptor<T, U, F>(key: &str, accessor: F) -> FieldDescriptor<T>
where
    T: CustomType,
    U: FromLua + IntoLua + Clone + 'static,
    F: Fn(&T) -> &Field<U> + 'static,
{
    FieldDescriptor {
        key: SmolStr::new(key),
        bind: Rc::new(move |value: &T, storage: &LuaTable, key: &str| accessor(value).bind(storage, key)),
    }
}

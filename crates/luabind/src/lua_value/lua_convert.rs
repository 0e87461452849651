//! `FromLua` / `IntoLua`: bidirectional conversion between Rust types and `LuaValue`.
//!
//! A conversion from the VM is two steps: a type predicate (`type_check`)
//! and the conversion itself. A value that fails the predicate yields
//! `TypeMismatch`; one that passes but does not fit the Rust type (an
//! integer out of range) yields `ConversionFailure`.
//!
//! # Built-in impls
//! - `bool`, `i8`..`i64`, `u8`..`u64`, `f32`, `f64`, `LuaNumber`
//! - `String`, `&str` (into only)
//! - `Option<T>`, `Vec<T>` (sequence tables), `HashMap<K, V, S>`
//! - handles (`LuaTable`, `LuaFunction`, `LuaUserdata`, `LuaThread`) and
//!   `LuaValue` itself
//!
//! `FromLuaMulti` / `IntoLuaMulti` cover argument lists and multiple
//! results: `()`, any single convertible value, tuples up to eight
//! elements, and `Variadic<T>`.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use crate::lua_value::{
    LightUserdata, LuaFunction, LuaNumber, LuaTable, LuaThread, LuaUserdata, LuaValue,
};
use crate::lua_vm::{Context, LuaError, LuaResult};

/// Convert a `LuaValue` into a Rust type.
pub trait FromLua: Sized {
    /// Whether `value` satisfies this type's predicate.
    fn type_check(value: &LuaValue) -> bool;

    /// Convert, failing with `TypeMismatch` or `ConversionFailure`.
    fn from_lua(value: LuaValue) -> LuaResult<Self>;

    /// Type name used in mismatch messages.
    fn expected_type() -> &'static str;
}

/// Convert a Rust value into a `LuaValue` owned by `ctx`'s interpreter.
pub trait IntoLua {
    fn into_lua(self, ctx: &Context) -> LuaResult<LuaValue>;
}

/// Bind an argument list (or a result list) to a Rust type.
pub trait FromLuaMulti: Sized {
    /// Exact number of values expected; `None` accepts any count.
    const ARITY: Option<usize>;

    /// Convert, reporting failures against 1-based positions starting at
    /// `first_position`.
    fn from_lua_multi_at(values: Vec<LuaValue>, first_position: usize) -> LuaResult<Self>;

    fn from_lua_multi(values: Vec<LuaValue>) -> LuaResult<Self> {
        Self::from_lua_multi_at(values, 1)
    }
}

/// Produce zero or more values (call arguments or function results).
pub trait IntoLuaMulti {
    fn into_lua_multi(self, ctx: &Context) -> LuaResult<Vec<LuaValue>>;
}

/// Any number of values of one type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variadic<T>(pub Vec<T>);

impl<T> std::ops::Deref for Variadic<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Vec<T> {
        &self.0
    }
}

impl<T> FromIterator<T> for Variadic<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Variadic(iter.into_iter().collect())
    }
}

pub(crate) fn mismatch<T: FromLua>(value: &LuaValue) -> LuaError {
    LuaError::TypeMismatch {
        expected: T::expected_type(),
        found: value.type_name(),
    }
}

// ==================== Identity: LuaValue ====================

impl FromLua for LuaValue {
    #[inline]
    fn type_check(_value: &LuaValue) -> bool {
        true
    }

    #[inline]
    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        Ok(value)
    }

    fn expected_type() -> &'static str {
        "value"
    }
}

impl IntoLua for LuaValue {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(self)
    }
}

impl IntoLua for &LuaValue {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(self.clone())
    }
}

// ==================== bool ====================

impl FromLua for bool {
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::Boolean(_))
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Boolean(b) => Ok(b),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        "boolean"
    }
}

impl IntoLua for bool {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::Boolean(self))
    }
}

// ==================== Integers ====================

// Only the integer subtype passes the predicate; `2.0` is a float.
macro_rules! impl_lua_integer {
    ($($ty:ty),*) => {
        $(
            impl FromLua for $ty {
                fn type_check(value: &LuaValue) -> bool {
                    value.as_integer().is_some()
                }

                #[allow(clippy::useless_conversion)]
                fn from_lua(value: LuaValue) -> LuaResult<Self> {
                    match value {
                        LuaValue::Number(LuaNumber::Integer(i)) => <$ty>::try_from(i).map_err(|_| {
                            LuaError::ConversionFailure {
                                from: "integer",
                                to: stringify!($ty),
                            }
                        }),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                fn expected_type() -> &'static str {
                    "integer"
                }
            }

            impl IntoLua for $ty {
                #[allow(clippy::useless_conversion)]
                fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
                    i64::try_from(self)
                        .map(LuaValue::integer)
                        .map_err(|_| LuaError::ConversionFailure {
                            from: stringify!($ty),
                            to: "integer",
                        })
                }
            }
        )*
    };
}

impl_lua_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ==================== Floats ====================

macro_rules! impl_lua_float {
    ($($ty:ty),*) => {
        $(
            impl FromLua for $ty {
                fn type_check(value: &LuaValue) -> bool {
                    matches!(value, LuaValue::Number(_))
                }

                fn from_lua(value: LuaValue) -> LuaResult<Self> {
                    match value {
                        LuaValue::Number(n) => Ok(n.to_float() as $ty),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                fn expected_type() -> &'static str {
                    "number"
                }
            }

            impl IntoLua for $ty {
                #[inline]
                fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
                    Ok(LuaValue::float(self as f64))
                }
            }
        )*
    };
}

impl_lua_float!(f32, f64);

impl FromLua for LuaNumber {
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::Number(_))
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Number(n) => Ok(n),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        "number"
    }
}

impl IntoLua for LuaNumber {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::Number(self))
    }
}

// ==================== Strings ====================

impl FromLua for String {
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::String(_))
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::String(s) => Ok(s),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        "string"
    }
}

impl IntoLua for String {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::String(self))
    }
}

impl IntoLua for &str {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::String(self.to_owned()))
    }
}

impl IntoLua for &String {
    #[inline]
    fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
        Ok(LuaValue::String(self.clone()))
    }
}

// ==================== Handles ====================

macro_rules! impl_lua_handle {
    ($($ty:ident => $variant:ident, $name:literal);* $(;)?) => {
        $(
            impl FromLua for $ty {
                fn type_check(value: &LuaValue) -> bool {
                    matches!(value, LuaValue::$variant(_))
                }

                fn from_lua(value: LuaValue) -> LuaResult<Self> {
                    match value {
                        LuaValue::$variant(handle) => Ok(handle),
                        other => Err(mismatch::<Self>(&other)),
                    }
                }

                fn expected_type() -> &'static str {
                    $name
                }
            }

            impl IntoLua for $ty {
                #[inline]
                fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
                    Ok(LuaValue::$variant(self))
                }
            }

            impl IntoLua for &$ty {
                #[inline]
                fn into_lua(self, _ctx: &Context) -> LuaResult<LuaValue> {
                    Ok(LuaValue::$variant(self.clone()))
                }
            }
        )*
    };
}

impl_lua_handle! {
    LuaTable => Table, "table";
    LuaFunction => Function, "function";
    LuaUserdata => Userdata, "userdata";
    LuaThread => Thread, "thread";
    LightUserdata => LightUserdata, "light userdata";
}

// ==================== Option<T> ====================

impl<T: FromLua> FromLua for Option<T> {
    fn type_check(value: &LuaValue) -> bool {
        value.is_nil() || T::type_check(value)
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Nil => Ok(None),
            other => T::from_lua(other).map(Some),
        }
    }

    fn expected_type() -> &'static str {
        T::expected_type()
    }
}

impl<T: IntoLua> IntoLua for Option<T> {
    fn into_lua(self, ctx: &Context) -> LuaResult<LuaValue> {
        match self {
            Some(value) => value.into_lua(ctx),
            None => Ok(LuaValue::Nil),
        }
    }
}

// ==================== Collections ====================

impl<T: FromLua> FromLua for Vec<T> {
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::Table(_))
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Table(table) => table.to_vec(),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        "table"
    }
}

/// Becomes a sequence table `{[1] = .., [2] = ..}`.
impl<T: IntoLua> IntoLua for Vec<T> {
    fn into_lua(self, ctx: &Context) -> LuaResult<LuaValue> {
        ctx.create_sequence(self).map(LuaValue::Table)
    }
}

impl<K, V, S> FromLua for HashMap<K, V, S>
where
    K: FromLua + Eq + Hash,
    V: FromLua,
    S: BuildHasher + Default,
{
    fn type_check(value: &LuaValue) -> bool {
        matches!(value, LuaValue::Table(_))
    }

    fn from_lua(value: LuaValue) -> LuaResult<Self> {
        match value {
            LuaValue::Table(table) => Ok(table.to_map::<K, V>()?.into_iter().collect()),
            other => Err(mismatch::<Self>(&other)),
        }
    }

    fn expected_type() -> &'static str {
        "table"
    }
}

impl<K: IntoLua, V: IntoLua, S> IntoLua for HashMap<K, V, S> {
    fn into_lua(self, ctx: &Context) -> LuaResult<LuaValue> {
        ctx.create_table_from(self).map(LuaValue::Table)
    }
}

// ==================== Multiple values ====================

fn take_arg<T: FromLua>(value: Option<LuaValue>, position: usize) -> LuaResult<T> {
    match value {
        Some(value) => T::from_lua(value).map_err(|e| LuaError::bad_argument(position, e)),
        None => Err(LuaError::bad_argument(
            position,
            LuaError::NoValue {
                expected: T::expected_type(),
            },
        )),
    }
}

impl FromLuaMulti for () {
    const ARITY: Option<usize> = Some(0);

    fn from_lua_multi_at(_values: Vec<LuaValue>, _first_position: usize) -> LuaResult<Self> {
        Ok(())
    }
}

impl IntoLuaMulti for () {
    #[inline]
    fn into_lua_multi(self, _ctx: &Context) -> LuaResult<Vec<LuaValue>> {
        Ok(Vec::new())
    }
}

impl<T: FromLua> FromLuaMulti for T {
    const ARITY: Option<usize> = Some(1);

    fn from_lua_multi_at(values: Vec<LuaValue>, first_position: usize) -> LuaResult<Self> {
        take_arg(values.into_iter().next(), first_position)
    }
}

impl<T: IntoLua> IntoLuaMulti for T {
    #[inline]
    fn into_lua_multi(self, ctx: &Context) -> LuaResult<Vec<LuaValue>> {
        Ok(vec![self.into_lua(ctx)?])
    }
}

impl<T: FromLua> FromLuaMulti for Variadic<T> {
    const ARITY: Option<usize> = None;

    fn from_lua_multi_at(values: Vec<LuaValue>, first_position: usize) -> LuaResult<Self> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, value)| take_arg(Some(value), first_position + i))
            .collect()
    }
}

impl<T: IntoLua> IntoLuaMulti for Variadic<T> {
    fn into_lua_multi(self, ctx: &Context) -> LuaResult<Vec<LuaValue>> {
        self.0.into_iter().map(|value| value.into_lua(ctx)).collect()
    }
}

macro_rules! impl_lua_tuple {
    ($count:expr => $($name:ident),+) => {
        impl<$($name: FromLua),+> FromLuaMulti for ($($name,)+) {
            const ARITY: Option<usize> = Some($count);

            #[allow(unused_assignments)]
            fn from_lua_multi_at(values: Vec<LuaValue>, first_position: usize) -> LuaResult<Self> {
                let mut values = values.into_iter();
                let mut position = first_position;
                Ok(($(
                    {
                        let value = take_arg::<$name>(values.next(), position)?;
                        position += 1;
                        value
                    },
                )+))
            }
        }

        impl<$($name: IntoLua),+> IntoLuaMulti for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_lua_multi(self, ctx: &Context) -> LuaResult<Vec<LuaValue>> {
                let ($($name,)+) = self;
                Ok(vec![$($name.into_lua(ctx)?),+])
            }
        }
    };
}

impl_lua_tuple!(1 => A);
impl_lua_tuple!(2 => A, B);
impl_lua_tuple!(3 => A, B, C);
impl_lua_tuple!(4 => A, B, C, D);
impl_lua_tuple!(5 => A, B, C, D, E);
impl_lua_tuple!(6 => A, B, C, D, E, F);
impl_lua_tuple!(7 => A, B, C, D, E, F, G);
impl_lua_tuple!(8 => A, B, C, D, E, F, G, H);

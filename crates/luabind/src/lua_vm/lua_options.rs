use std::os::raw::c_int;

use mlua_sys as ffi;

/// Standard libraries that can be opened in a fresh interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stdlib {
    Io,
    Os,
    Math,
    String,
    Table,
    Basic,
    Package,
    Utf8,
    Coroutine,
    Debug,

    All,
}

impl Stdlib {
    /// Module name and opener, or `None` for `All`.
    pub(crate) fn opener(self) -> Option<(&'static std::ffi::CStr, ffi::lua_CFunction)> {
        let entry: (&'static std::ffi::CStr, ffi::lua_CFunction) = match self {
            Stdlib::Basic => (c"_G", ffi::luaopen_base),
            Stdlib::Package => (c"package", ffi::luaopen_package),
            Stdlib::Coroutine => (c"coroutine", ffi::luaopen_coroutine),
            Stdlib::Table => (c"table", ffi::luaopen_table),
            Stdlib::Io => (c"io", ffi::luaopen_io),
            Stdlib::Os => (c"os", ffi::luaopen_os),
            Stdlib::String => (c"string", ffi::luaopen_string),
            Stdlib::Utf8 => (c"utf8", ffi::luaopen_utf8),
            Stdlib::Math => (c"math", ffi::luaopen_math),
            Stdlib::Debug => (c"debug", ffi::luaopen_debug),
            Stdlib::All => return None,
        };
        Some(entry)
    }
}

/// Collector strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMode {
    #[default]
    Incremental,
    Generational,
}

impl GcMode {
    pub(crate) fn raw(self) -> c_int {
        match self {
            GcMode::Incremental => ffi::LUA_GCINC,
            GcMode::Generational => ffi::LUA_GCGEN,
        }
    }
}

/// Interpreter construction options.
#[derive(Debug, Clone)]
pub struct LuaOptions {
    /// Libraries opened at startup. Empty leaves the global table bare.
    pub std_libs: Vec<Stdlib>,
    pub gc_mode: GcMode,
}

impl Default for LuaOptions {
    fn default() -> Self {
        Self {
            std_libs: vec![Stdlib::All],
            gc_mode: GcMode::Incremental,
        }
    }
}

impl LuaOptions {
    /// No standard libraries at all.
    pub fn bare() -> Self {
        Self {
            std_libs: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_std_libs(mut self, libs: &[Stdlib]) -> Self {
        self.std_libs = libs.to_vec();
        self
    }

    pub fn with_gc_mode(mut self, gc_mode: GcMode) -> Self {
        self.gc_mode = gc_mode;
        self
    }
}

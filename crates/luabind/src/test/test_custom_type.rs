// Custom types: registration, constructors, methods, fields and equality
use std::fmt;

use crate::{CustomType, Field, FieldSet, Instance, Lua, LuaError, LuaTable, LuaValue};

struct Note {
    name: Field<String>,
}

impl Note {
    fn new(name: &str) -> Self {
        Note {
            name: Field::new(name.to_string()),
        }
    }
}

impl CustomType for Note {
    fn type_name() -> &'static str {
        "Note"
    }

    fn declare_fields(fields: &mut FieldSet<Self>) {
        fields.field("name", |note: &Note| &note.name);
    }
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.name.get().ok() == other.name.get().ok()
    }
}

struct Counter {
    count: i64,
}

impl CustomType for Counter {
    fn type_name() -> &'static str {
        "Counter"
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.count)
    }
}

fn lua_with_note() -> Lua {
    let lua = Lua::new().unwrap();
    let note = lua
        .register_type::<Note>()
        .unwrap()
        .constructor("new", |_, name: String| Ok(Note::new(&name)))
        .method("getName", |_, note: &Note, ()| note.name.get())
        .method("setName", |_, note: &Note, name: String| note.name.set(name))
        .equatable()
        .build()
        .unwrap();
    lua.set_global("Note", note).unwrap();
    lua
}

fn lua_with_counter() -> Lua {
    let lua = Lua::new().unwrap();
    let counter = lua
        .register_type::<Counter>()
        .unwrap()
        .constructor("new", |_, start: i64| Ok(Counter { count: start }))
        .method_mut("increment", |_, counter: &mut Counter, by: i64| {
            counter.count += by;
            Ok(counter.count)
        })
        .method("get", |_, counter: &Counter, ()| Ok(counter.count))
        .function("zero", |ctx, ()| ctx.create_instance(Counter { count: 0 }))
        .display()
        .build()
        .unwrap();
    lua.set_global("Counter", counter).unwrap();
    lua
}

#[test]
fn test_note_field_round_trip() {
    let lua = lua_with_note();
    lua.exec(r#"n = Note.new("A")"#).unwrap();

    let n: Instance<Note> = lua.get_global_instance("n").unwrap();
    assert_eq!(n.borrow().unwrap().name.get().unwrap(), "A");

    n.borrow().unwrap().name.set("B".to_string()).unwrap();
    let results = lua.eval("return n.name, n:getName()", ()).unwrap();
    assert_eq!(results[0].as_str(), Some("B"));
    assert_eq!(results[1].as_str(), Some("B"));

    lua.exec(r#"n.name = "C""#).unwrap();
    assert_eq!(n.with(|note| note.name.get()).unwrap().unwrap(), "C");

    lua.exec(r#"n:setName("D")"#).unwrap();
    assert_eq!(n.borrow().unwrap().name.get().unwrap(), "D");
}

#[test]
fn test_instances_have_separate_storage() {
    let lua = lua_with_note();
    let results = lua
        .eval(
            r#"
            local a, b = Note.new("a"), Note.new("b")
            a.name = "changed"
            return a.name, b.name
        "#,
            (),
        )
        .unwrap();
    assert_eq!(results[0].as_str(), Some("changed"));
    assert_eq!(results[1].as_str(), Some("b"));
}

#[test]
fn test_host_created_instance() {
    let lua = lua_with_note();
    let globals = lua.globals();
    let note = globals.set_instance("hosted", Note::new("from host")).unwrap();
    assert_eq!(
        lua.eval("return hosted:getName()", ()).unwrap()[0].as_str(),
        Some("from host")
    );
    assert!(note.borrow().unwrap().name.is_bound());
    let storage = note.userdata().storage().unwrap();
    assert_eq!(storage.get_as::<_, String>("name").unwrap(), "from host");
    assert_eq!(note.userdata().type_name().unwrap().as_deref(), Some("Note"));
}

#[test]
fn test_equality_follows_host_eq() {
    let lua = lua_with_note();
    let results = lua
        .eval(
            r#"
            local a1, a2, b = Note.new("A"), Note.new("A"), Note.new("B")
            return a1 == a2, a1 == b, a1 == a1, rawequal(a1, a2)
        "#,
            (),
        )
        .unwrap();
    assert_eq!(
        results,
        vec![
            LuaValue::Boolean(true),
            LuaValue::Boolean(false),
            LuaValue::Boolean(true),
            LuaValue::Boolean(false),
        ]
    );

    // equality tracks the current value
    let results = lua
        .eval(
            r#"
            local a, b = Note.new("x"), Note.new("y")
            local before = a == b
            b.name = "x"
            return before, a == b
        "#,
            (),
        )
        .unwrap();
    assert_eq!(results, vec![LuaValue::Boolean(false), LuaValue::Boolean(true)]);

    let first = lua.create_instance(Note::new("same")).unwrap();
    let second = lua.create_instance(Note::new("same")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_undeclared_field_assignment_fails() {
    let lua = lua_with_note();
    let results = lua
        .eval("local n = Note.new('x') return pcall(function() n.other = 1 end)", ())
        .unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert!(
        results[1].as_str().unwrap().contains("cannot assign field 'other'"),
        "{:?}",
        results[1]
    );
    // the type table itself accepts new entries
    lua.exec("function Note.describe(n) return 'note ' .. n.name end").unwrap();
    assert_eq!(
        lua.eval("return Note.new('q'):describe()", ()).unwrap()[0].as_str(),
        Some("note q")
    );
}

#[test]
fn test_receiver_type_is_checked() {
    let lua = lua_with_note();
    let results = lua.eval("return pcall(Note.getName, {})", ()).unwrap();
    assert_eq!(results[0], LuaValue::Boolean(false));
    assert_eq!(
        results[1].as_str(),
        Some("bad argument #1 (Note expected, got table)")
    );
    let results = lua.eval("return pcall(Note.getName)", ()).unwrap();
    assert_eq!(
        results[1].as_str(),
        Some("wrong number of arguments: expected 1, got 0")
    );
    let results = lua.eval("return pcall(Note.setName, Note.new('x'), 5)", ()).unwrap();
    assert_eq!(
        results[1].as_str(),
        Some("bad argument #2 (string expected, got number)")
    );
}

#[test]
fn test_userdata_of_another_type_is_rejected() {
    let lua = lua_with_note();
    let counter = lua
        .register_type::<Counter>()
        .unwrap()
        .constructor("new", |_, start: i64| Ok(Counter { count: start }))
        .build()
        .unwrap();
    lua.set_global("Counter", counter).unwrap();
    let results = lua.eval("return pcall(Note.getName, Counter.new(1))", ()).unwrap();
    assert_eq!(
        results[1].as_str(),
        Some("bad argument #1 (Note expected, got userdata)")
    );
    let value = lua.eval("return Counter.new(1)", ()).unwrap().remove(0);
    let userdata = value.as_userdata().unwrap();
    assert!(userdata.is::<Counter>());
    assert!(!userdata.is::<Note>());
}

#[test]
fn test_method_mut_display_and_functions() {
    let lua = lua_with_counter();
    let results = lua
        .eval(
            r#"
            local c = Counter.new(1)
            c:increment(2)
            local z = Counter.zero()
            return c:get(), tostring(c), z:get()
        "#,
            (),
        )
        .unwrap();
    assert_eq!(results[0].as_integer(), Some(3));
    assert_eq!(results[1].as_str(), Some("Counter(3)"));
    assert_eq!(results[2].as_integer(), Some(0));
}

#[test]
fn test_host_borrow_conflicts() {
    let lua = lua_with_counter();
    lua.exec("c = Counter.new(5)").unwrap();
    let c: Instance<Counter> = lua.get_global_instance("c").unwrap();
    {
        let guard = c.borrow_mut().unwrap();
        assert!(matches!(c.borrow(), Err(LuaError::InstanceBorrowed("Counter"))));
        let results = lua.eval("return pcall(c.get, c)", ()).unwrap();
        assert_eq!(results[0], LuaValue::Boolean(false));
        assert_eq!(
            results[1].as_str(),
            Some("instance of 'Counter' is already borrowed")
        );
        drop(guard);
    }
    c.with_mut(|counter| counter.count = 10).unwrap();
    assert_eq!(lua.eval("return c:get()", ()).unwrap()[0].as_integer(), Some(10));
}

#[test]
fn test_registration_is_idempotent() {
    let lua = lua_with_note();
    let again = lua.register_type::<Note>().unwrap().build().unwrap();
    let existing: LuaTable = lua.get_global_as("Note").unwrap();
    assert!(again.raw_equals(&existing));
    // fields are not registered twice
    lua.exec("n = Note.new('once')").unwrap();
    assert_eq!(lua.eval("return n:getName()", ()).unwrap()[0].as_str(), Some("once"));
}

struct Impostor;

impl CustomType for Impostor {
    fn type_name() -> &'static str {
        "Note"
    }
}

struct FileLookalike;

impl CustomType for FileLookalike {
    fn type_name() -> &'static str {
        "FILE*"
    }
}

#[test]
fn test_type_name_conflicts() {
    let lua = lua_with_note();
    assert!(matches!(
        lua.register_type::<Impostor>(),
        Err(LuaError::TypeNameConflict(name)) if name.as_str() == "Note"
    ));
    // names taken by the standard library count too
    assert!(matches!(
        lua.register_type::<FileLookalike>(),
        Err(LuaError::TypeNameConflict(_))
    ));
}

#[test]
fn test_unregistered_type() {
    let lua = Lua::new().unwrap();
    assert!(matches!(
        lua.create_instance(Counter { count: 1 }),
        Err(LuaError::UnregisteredType("Counter"))
    ));
}

#[test]
fn test_builder_field_on_type_without_declarations() {
    struct Tagged {
        tag: Field<String>,
    }
    impl CustomType for Tagged {}

    let lua = Lua::new().unwrap();
    let tagged = lua
        .register_type::<Tagged>()
        .unwrap()
        .field("tag", |t: &Tagged| &t.tag)
        .build()
        .unwrap();
    lua.set_global("Tagged", tagged).unwrap();
    let instance = lua
        .create_instance(Tagged {
            tag: Field::new("t1".to_string()),
        })
        .unwrap();
    lua.set_global("x", &instance).unwrap();
    lua.exec("x.tag = x.tag .. '!'").unwrap();
    assert_eq!(instance.borrow().unwrap().tag.get().unwrap(), "t1!");
    assert!(Tagged::type_name().ends_with("Tagged"));
}

use std::cell::Cell;
use std::rc::Rc;

use mlua::{Function, Lua, MultiValue, Value};

/// Global facilities unbound before a manifest runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facility {
    Ffi,
    Require,
    DoFile,
    Load,
    LoadFile,
    LoadString,
    Package,
    Os,
    Io,
    Debug,
}

impl Facility {
    pub const DENIED: [Facility; 10] = [
        Facility::Ffi,
        Facility::Require,
        Facility::DoFile,
        Facility::Load,
        Facility::LoadFile,
        Facility::LoadString,
        Facility::Package,
        Facility::Os,
        Facility::Io,
        Facility::Debug,
    ];

    pub fn global_name(self) -> &'static str {
        match self {
            Facility::Ffi => "ffi",
            Facility::Require => "require",
            Facility::DoFile => "dofile",
            Facility::Load => "load",
            Facility::LoadFile => "loadfile",
            Facility::LoadString => "loadstring",
            Facility::Package => "package",
            Facility::Os => "os",
            Facility::Io => "io",
            Facility::Debug => "debug",
        }
    }

    pub fn from_global_name(name: &str) -> Option<Facility> {
        Self::DENIED
            .into_iter()
            .find(|facility| facility.global_name() == name)
    }
}

/// Fresh VM with the standard safe libraries minus every denied facility.
pub fn restricted_state() -> mlua::Result<Lua> {
    let lua = Lua::new();

    {
        let globals = lua.globals();
        for facility in Facility::DENIED {
            globals.raw_set(facility.global_name(), Value::Nil)?;
        }
    }

    Ok(lua)
}

const PROTECTED_CALLS: [&str; 2] = ["pcall", "xpcall"];

/// Wrap `pcall`/`xpcall` so that once `expired` is set their caught error is
/// raised again instead of being handed back to the script.
pub fn rethrow_after_expiry(lua: &Lua, expired: Rc<Cell<bool>>) -> mlua::Result<()> {
    let globals = lua.globals();

    for name in PROTECTED_CALLS {
        let inner: Function = globals.raw_get(name)?;
        let expired = Rc::clone(&expired);
        let wrapper = lua.create_function(move |_, args: MultiValue| {
            let results: MultiValue = inner.call(args)?;
            if expired.get() {
                return Err(mlua::Error::runtime(
                    "manifest execution deadline exceeded",
                ));
            }
            Ok(results)
        })?;
        globals.raw_set(name, wrapper)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_globals_are_unbound() {
        let lua = restricted_state().unwrap();
        let globals = lua.globals();

        for facility in Facility::DENIED {
            let value: Value = globals.raw_get(facility.global_name()).unwrap();
            assert!(value.is_nil(), "{} still reachable", facility.global_name());
        }
    }

    #[test]
    fn looks_up_facilities_by_global_name() {
        assert_eq!(Facility::from_global_name("io"), Some(Facility::Io));
        assert_eq!(Facility::from_global_name("require"), Some(Facility::Require));
        assert_eq!(Facility::from_global_name("client_script"), None);
    }

    #[test]
    fn protected_calls_behave_normally_before_expiry() {
        let lua = restricted_state().unwrap();
        rethrow_after_expiry(&lua, Rc::new(Cell::new(false))).unwrap();

        let (ok, message): (bool, String) = lua
            .load(r#"local ok, err = pcall(error, "caught", 0) return ok, err"#)
            .eval()
            .unwrap();

        assert!(!ok);
        assert_eq!(message, "caught");
    }

    #[test]
    fn protected_calls_rethrow_after_expiry() {
        let lua = restricted_state().unwrap();
        let expired = Rc::new(Cell::new(true));
        rethrow_after_expiry(&lua, expired).unwrap();

        for source in [
            r#"pcall(error, "caught")"#,
            r#"xpcall(error, function(e) return e end, "caught")"#,
        ] {
            assert!(lua.load(source).exec().is_err(), "{source}");
        }
    }

    #[test]
    fn pure_libraries_stay_available() {
        let lua = restricted_state().unwrap();
        let joined: String = lua
            .load(r#"return string.upper("a") .. table.concat({ "b", "c" }) .. math.floor(1.5)"#)
            .eval()
            .unwrap();

        assert_eq!(joined, "ABC1");
    }
}

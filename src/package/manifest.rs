//! Manifest interpreter.
//!
//! A resource manifest is a Lua chunk written in declaration style:
//!
//! ```lua
//! description "Vehicle spawner"
//! client_scripts { "client.lua", "menu.lua" }
//! dependency_url "https://example.test/base.git"
//! ```
//!
//! Each chunk runs in its own restricted VM. Undefined globals resolve to
//! recorder functions for the duration of the run, so every declaration ends
//! up in the returned [`Manifest`].

use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mlua::{ChunkMode, Function, HookTriggers, Lua, Table, Value, VmState};

use crate::error::ManifestError;
use crate::model::config::AppConfig;
use crate::model::resource::Manifest;
use crate::package::sandbox::{self, Facility};

pub const DEFAULT_FILE_NAME: &str = "__resource.lua";

/// Global through which every declaration is recorded.
pub const RECORD_FN: &str = "AddMetaData";

const PLURAL_MARKER: char = 's';
const LEGACY_SUFFIX: &str = "_extra";
const HOOK_INTERVAL: u32 = 1000;

type Sink = Rc<RefCell<Manifest>>;

#[derive(Debug, Clone)]
pub struct ManifestLoader {
    file_name: String,
    timeout: Option<Duration>,
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_NAME, None)
    }
}

impl ManifestLoader {
    pub fn new(file_name: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            file_name: file_name.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.manifest.file_name.clone(), config.manifest_timeout())
    }

    /// Load and run the manifest in `resource_dir`, returning what it declared.
    pub fn interpret(&self, resource_dir: &Path) -> Result<Manifest, ManifestError> {
        let path = resource_dir.join(&self.file_name);
        let source = match fs::read(&path) {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound { path });
            }
            Err(source) => return Err(ManifestError::Io { path, source }),
        };

        let lua = sandbox::restricted_state().map_err(|err| runtime_error(&path, err))?;
        let sink: Sink = Rc::new(RefCell::new(Manifest::new()));
        install_recorder(&lua, &sink).map_err(|err| runtime_error(&path, err))?;

        let chunk = lua
            .load(source.as_slice())
            .set_name(format!("@{}", path.display()))
            .set_mode(ChunkMode::Text)
            .into_function()
            .map_err(|err| match err {
                mlua::Error::SyntaxError { message, .. } => ManifestError::Parse {
                    path: path.clone(),
                    message,
                },
                other => runtime_error(&path, other),
            })?;

        let expired = Rc::new(Cell::new(false));
        if let Some(limit) = self.timeout {
            install_deadline(&lua, limit, Rc::clone(&expired))
                .map_err(|err| runtime_error(&path, err))?;
        }

        let outcome = run_with_shim(&lua, &sink, &chunk);
        if self.timeout.is_some() {
            lua.remove_hook();
        }

        // An overrun counts even if the script caught the hook's error.
        if expired.get() {
            return Err(ManifestError::Deadline {
                path,
                limit: self.timeout.unwrap_or_default(),
            });
        }

        outcome
            .map(|()| sink.take())
            .map_err(|err| runtime_error(&path, err))
    }
}

fn runtime_error(path: &Path, err: mlua::Error) -> ManifestError {
    ManifestError::Runtime {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn install_recorder(lua: &Lua, sink: &Sink) -> mlua::Result<()> {
    let sink = Rc::clone(sink);
    let record = lua.create_function(move |lua, (key, value): (Value, Value)| {
        if let (Some(key), Some(value)) = (coerce(lua, key)?, coerce(lua, value)?) {
            sink.borrow_mut().record(key, value);
        }
        Ok(())
    })?;

    lua.globals().raw_set(RECORD_FN, record)
}

fn install_deadline(lua: &Lua, limit: Duration, expired: Rc<Cell<bool>>) -> mlua::Result<()> {
    sandbox::rethrow_after_expiry(lua, Rc::clone(&expired))?;

    let deadline = Instant::now() + limit;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_, _| {
            if Instant::now() >= deadline {
                expired.set(true);
                return Err(mlua::Error::runtime("manifest execution deadline exceeded"));
            }
            Ok(VmState::Continue)
        },
    );

    Ok(())
}

/// Execute `chunk` with the declaration shim on the globals table.
fn run_with_shim(lua: &Lua, sink: &Sink, chunk: &Function) -> mlua::Result<()> {
    let _shim = DeclarationShim::install(lua, sink)?;
    chunk.call::<()>(())
}

/// Metatable on `_G` that turns undefined globals into recorders.
/// Dropping it restores a plain globals table.
struct DeclarationShim {
    globals: Table,
}

impl DeclarationShim {
    fn install(lua: &Lua, sink: &Sink) -> mlua::Result<Self> {
        let sink = Rc::clone(sink);
        let index = lua.create_function(move |lua, (table, key): (Table, Value)| {
            let raw: Value = table.raw_get(key.clone())?;
            if !raw.is_nil() {
                return Ok(raw);
            }

            let Value::String(name) = key else {
                return Ok(Value::Nil);
            };
            let name = String::from(name.to_string_lossy());

            if Facility::from_global_name(&name).is_some() {
                return Err(mlua::Error::runtime(format!(
                    "`{name}` is not available in resource manifests"
                )));
            }

            field_recorder(lua, name, Rc::clone(&sink)).map(Value::Function)
        })?;

        let metatable = lua.create_table()?;
        metatable.raw_set("__index", index)?;

        let globals = lua.globals();
        globals.set_metatable(Some(metatable));

        Ok(Self { globals })
    }
}

impl Drop for DeclarationShim {
    fn drop(&mut self) {
        let _ = self.globals.set_metatable(None);
    }
}

/// `field value` records one entry; `field { a, b }` records one per element
/// under the singular key. The returned function accepts a legacy trailing
/// string recorded under `<field>_extra`.
fn field_recorder(lua: &Lua, key: String, sink: Sink) -> mlua::Result<Function> {
    lua.create_function(move |lua, value: Value| {
        record_field(lua, &sink, &key, value)?;

        let extra_key = format!("{key}{LEGACY_SUFFIX}");
        let sink = Rc::clone(&sink);
        lua.create_function(move |_, legacy: Value| {
            if let Value::String(text) = legacy {
                sink.borrow_mut()
                    .record(extra_key.clone(), String::from(text.to_string_lossy()));
            }
            Ok(())
        })
    })
}

fn record_field(lua: &Lua, sink: &Sink, key: &str, value: Value) -> mlua::Result<()> {
    match value {
        Value::Table(entries) => {
            let key = key.strip_suffix(PLURAL_MARKER).unwrap_or(key);
            for entry in entries.sequence_values::<Value>() {
                if let Some(text) = coerce(lua, entry?)? {
                    sink.borrow_mut().record(key, text);
                }
            }
        }
        scalar => {
            if let Some(text) = coerce(lua, scalar)? {
                sink.borrow_mut().record(key, text);
            }
        }
    }

    Ok(())
}

/// Strings and numbers become their Lua string form; anything else is ignored.
fn coerce(lua: &Lua, value: Value) -> mlua::Result<Option<String>> {
    match value {
        Value::String(_) | Value::Integer(_) | Value::Number(_) => Ok(lua
            .coerce_string(value)?
            .map(|text| String::from(text.to_string_lossy()))),
        _ => Ok(None),
    }
}

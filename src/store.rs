//! Persistence of memorized settings across restarts.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

pub const KEY_EXPOSURE: &str = "exposure";
pub const KEY_MODE: &str = "mode";

pub fn delay_key(channel: crate::regs::Channel) -> String {
    format!("{}_gate_delay", channel)
}

pub trait ParameterStore: Send {
    /// `Ok(None)` if the key was never saved.
    fn load(&self, key: &str) -> Result<Option<toml::Value>>;
    fn save(&mut self, key: &str, value: toml::Value) -> Result<()>;
}

/// Load `key`, falling back to `default` if it is absent or unreadable.
pub fn load_or_default<T, S>(store: &S, key: &str, default: T) -> T
    where T: DeserializeOwned, S: ParameterStore + ?Sized
{
    match store.load(key) {
        Ok(Some(value)) => match value.try_into() {
            Ok(value) => value,
            Err(error) => {
                log::warn!("ignoring persisted {}: {}", key, error);
                default
            }
        },
        Ok(None) => default,
        Err(error) => {
            log::warn!("could not load persisted {}: {}", key, error);
            default
        }
    }
}

pub fn save_value<T, S>(store: &mut S, key: &str, value: &T) -> Result<()>
    where T: Serialize, S: ParameterStore + ?Sized
{
    let value = toml::Value::try_from(value)
        .map_err(|error| Error::Store(format!("cannot encode {}: {}", key, error)))?;
    store.save(key, value)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, toml::Value>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
}

impl ParameterStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<toml::Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: toml::Value) -> Result<()> {
        self.values.insert(key.to_owned(), value);
        Ok(())
    }
}

/// All keys of one device in a single TOML document, rewritten on every save.
#[derive(Debug)]
pub struct TomlFileStore {
    path: PathBuf,
    table: toml::Table,
}

impl TomlFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<TomlFileStore> {
        let path = path.as_ref().to_owned();
        let table = match fs::read_to_string(&path) {
            Ok(text) => text.parse::<toml::Table>()
                .map_err(|error| Error::Store(format!("{}: {}", path.display(), error)))?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => toml::Table::new(),
            Err(error) => return Err(error.into()),
        };
        Ok(TomlFileStore { path, table })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterStore for TomlFileStore {
    fn load(&self, key: &str) -> Result<Option<toml::Value>> {
        Ok(self.table.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: toml::Value) -> Result<()> {
        self.table.insert(key.to_owned(), value);
        let text = toml::to_string(&self.table)
            .map_err(|error| Error::Store(error.to_string()))?;
        fs::write(&self.path, text)?;
        log::trace!("saved {} to {}", key, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::Channel;

    #[test]
    fn defaults_when_absent_or_mistyped() {
        let mut store = MemoryStore::new();
        assert_eq!(-1.0, load_or_default(&store, KEY_EXPOSURE, -1.0));
        store.save(KEY_MODE, toml::Value::String("fast".to_owned())).unwrap();
        assert_eq!(0, load_or_default(&store, KEY_MODE, 0i64));
    }

    #[test]
    fn memory_round_trip() {
        let mut store = MemoryStore::new();
        save_value(&mut store, KEY_EXPOSURE, &120.0).unwrap();
        save_value(&mut store, KEY_MODE, &3i64).unwrap();
        assert_eq!(120.0, load_or_default(&store, KEY_EXPOSURE, -1.0));
        assert_eq!(3, load_or_default(&store, KEY_MODE, 0i64));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gategen.toml");
        {
            let mut store = TomlFileStore::open(&path).unwrap();
            assert_eq!(None, store.load(KEY_EXPOSURE).unwrap());
            save_value(&mut store, KEY_EXPOSURE, &50.0).unwrap();
            save_value(&mut store, &delay_key(Channel::Detector), &2.5).unwrap();
        }
        let store = TomlFileStore::open(&path).unwrap();
        assert_eq!(50.0, load_or_default(&store, KEY_EXPOSURE, -1.0));
        assert_eq!(2.5, load_or_default(&store, "detector_gate_delay", 8.0));
    }

    #[test]
    fn integer_exposure_in_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gategen.toml");
        fs::write(&path, "exposure = 40\nmode = 1\n").unwrap();
        let store = TomlFileStore::open(&path).unwrap();
        assert_eq!(40.0, load_or_default(&store, KEY_EXPOSURE, -1.0));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gategen.toml");
        fs::write(&path, "exposure = = 1").unwrap();
        assert!(matches!(TomlFileStore::open(&path), Err(Error::Store(_))));
    }
}

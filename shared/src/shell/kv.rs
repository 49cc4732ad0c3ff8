use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

use crux_kv::error::KeyValueError;
use crux_kv::value::Value;
use crux_kv::{KeyValueOperation, KeyValueResponse, KeyValueResult};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::UnixTimeMs;

/// Largest value either store accepts.
pub const MAX_VALUE_BYTES: usize = 64 * 1024 * 1024;
/// Keys returned per `ListKeys` page.
pub const LIST_PAGE_SIZE: usize = 100;

pub trait KvStore {
    fn execute(&self, operation: KeyValueOperation) -> KeyValueResult;
}

fn finish(result: Result<KeyValueResponse, KeyValueError>) -> KeyValueResult {
    match result {
        Ok(response) => KeyValueResult::Ok { response },
        Err(error) => KeyValueResult::Err { error },
    }
}

fn check_size(value: &[u8]) -> Result<(), KeyValueError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(KeyValueError::Other {
            message: format!("value of {} bytes exceeds {MAX_VALUE_BYTES}", value.len()),
        });
    }
    Ok(())
}

fn value(bytes: Option<Vec<u8>>) -> Value {
    bytes.map_or(Value::None, Value::Bytes)
}

/// Draft slot and offline queue in a single SQLite table.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!(path = %path.display(), journal_mode = %mode, "opened local store");
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY NOT NULL,
                value      BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )?;
        Ok(Self { conn })
    }

    fn read(&self, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
    }

    fn run(&self, operation: KeyValueOperation) -> Result<KeyValueResponse, KeyValueError> {
        let response = match operation {
            KeyValueOperation::Get { key } => KeyValueResponse::Get {
                value: value(self.read(&key).map_err(|e| storage_error(&e))?),
            },
            KeyValueOperation::Set { key, value: bytes } => {
                check_size(&bytes)?;
                let previous = self.read(&key).map_err(|e| storage_error(&e))?;
                #[allow(clippy::cast_possible_wrap)]
                let now = UnixTimeMs::now().as_millis() as i64;
                self.conn
                    .execute(
                        "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                        params![key, bytes, now],
                    )
                    .map_err(|e| storage_error(&e))?;
                KeyValueResponse::Set {
                    previous: value(previous),
                }
            }
            KeyValueOperation::Delete { key } => {
                let previous = self.read(&key).map_err(|e| storage_error(&e))?;
                let removed = self
                    .conn
                    .execute("DELETE FROM kv WHERE key = ?1", params![key])
                    .map_err(|e| storage_error(&e))?;
                debug!(removed, "kv delete");
                KeyValueResponse::Delete {
                    previous: value(previous),
                }
            }
            KeyValueOperation::Exists { key } => KeyValueResponse::Exists {
                is_present: self.read(&key).map_err(|e| storage_error(&e))?.is_some(),
            },
            KeyValueOperation::ListKeys { prefix, cursor } => {
                let mut stmt = self
                    .conn
                    .prepare("SELECT key FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
                    .map_err(|e| storage_error(&e))?;
                let keys = stmt
                    .query_map(params![prefix], |row| row.get::<_, String>(0))
                    .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
                    .map_err(|e| storage_error(&e))?;
                page(keys, cursor)?
            }
        };
        Ok(response)
    }
}

fn page(keys: Vec<String>, cursor: u64) -> Result<KeyValueResponse, KeyValueError> {
    let start = usize::try_from(cursor).map_err(|_| KeyValueError::CursorNotFound)?;
    if start > keys.len() {
        return Err(KeyValueError::CursorNotFound);
    }
    let end = (start + LIST_PAGE_SIZE).min(keys.len());
    let next_cursor = if end == keys.len() { 0 } else { end as u64 };
    Ok(KeyValueResponse::ListKeys {
        keys: keys[start..end].to_vec(),
        next_cursor,
    })
}

fn storage_error(error: &rusqlite::Error) -> KeyValueError {
    match error {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DiskFull => {
            KeyValueError::Io {
                message: "device storage is full".into(),
            }
        }
        other => KeyValueError::Io {
            message: other.to_string(),
        },
    }
}

impl KvStore for SqliteKvStore {
    fn execute(&self, operation: KeyValueOperation) -> KeyValueResult {
        finish(self.run(operation))
    }
}

/// Process-local store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryKvStore {
    values: RefCell<BTreeMap<String, Vec<u8>>>,
}

impl KvStore for MemoryKvStore {
    fn execute(&self, operation: KeyValueOperation) -> KeyValueResult {
        let mut values = self.values.borrow_mut();
        finish(match operation {
            KeyValueOperation::Get { key } => Ok(KeyValueResponse::Get {
                value: value(values.get(&key).cloned()),
            }),
            KeyValueOperation::Set { key, value: bytes } => check_size(&bytes).map(|()| {
                KeyValueResponse::Set {
                    previous: value(values.insert(key, bytes)),
                }
            }),
            KeyValueOperation::Delete { key } => Ok(KeyValueResponse::Delete {
                previous: value(values.remove(&key)),
            }),
            KeyValueOperation::Exists { key } => Ok(KeyValueResponse::Exists {
                is_present: values.contains_key(&key),
            }),
            KeyValueOperation::ListKeys { prefix, cursor } => page(
                values
                    .keys()
                    .filter(|k| k.starts_with(&prefix))
                    .cloned()
                    .collect(),
                cursor,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(store: &dyn KvStore, key: &str) -> Option<Vec<u8>> {
        match store.execute(KeyValueOperation::Get { key: key.into() }) {
            KeyValueResult::Ok {
                response: KeyValueResponse::Get { value },
            } => match value {
                Value::Bytes(bytes) => Some(bytes),
                Value::None => None,
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    fn set(store: &dyn KvStore, key: &str, bytes: &[u8]) -> KeyValueResult {
        store.execute(KeyValueOperation::Set {
            key: key.into(),
            value: bytes.to_vec(),
        })
    }

    fn exercise(store: &dyn KvStore) {
        assert_eq!(get(store, "draft:current"), None);
        set(store, "draft:current", &[1, 2, 3]);
        assert_eq!(
            set(store, "draft:current", &[4]),
            KeyValueResult::Ok {
                response: KeyValueResponse::Set {
                    previous: Value::Bytes(vec![1, 2, 3])
                }
            }
        );
        assert_eq!(get(store, "draft:current"), Some(vec![4]));
        assert_eq!(
            store.execute(KeyValueOperation::Delete {
                key: "draft:current".into()
            }),
            KeyValueResult::Ok {
                response: KeyValueResponse::Delete {
                    previous: Value::Bytes(vec![4])
                }
            }
        );
        assert_eq!(get(store, "draft:current"), None);

        set(store, "queue:complaints", b"q");
        set(store, "queue:quarantine", b"bad");
        assert_eq!(
            store.execute(KeyValueOperation::ListKeys {
                prefix: "queue:".into(),
                cursor: 0
            }),
            KeyValueResult::Ok {
                response: KeyValueResponse::ListKeys {
                    keys: vec!["queue:complaints".into(), "queue:quarantine".into()],
                    next_cursor: 0
                }
            }
        );
        assert_eq!(
            store.execute(KeyValueOperation::Exists {
                key: "queue:quarantine".into()
            }),
            KeyValueResult::Ok {
                response: KeyValueResponse::Exists { is_present: true }
            }
        );
    }

    #[test]
    fn memory_store_behaves() {
        exercise(&MemoryKvStore::default());
    }

    #[test]
    fn sqlite_store_behaves() {
        exercise(&SqliteKvStore::in_memory().unwrap());
    }

    #[test]
    fn sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteKvStore::open(&path).unwrap();
            set(&store, "queue:complaints", b"queued");
        }
        let store = SqliteKvStore::open(&path).unwrap();
        assert_eq!(get(&store, "queue:complaints"), Some(b"queued".to_vec()));
    }

    #[test]
    fn deleting_a_missing_key_is_fine() {
        let store = SqliteKvStore::in_memory().unwrap();
        assert_eq!(
            store.execute(KeyValueOperation::Delete { key: "nope".into() }),
            KeyValueResult::Ok {
                response: KeyValueResponse::Delete {
                    previous: Value::None
                }
            }
        );
    }

    #[test]
    fn unknown_cursor_is_an_error() {
        let store = MemoryKvStore::default();
        assert!(matches!(
            store.execute(KeyValueOperation::ListKeys {
                prefix: String::new(),
                cursor: 7
            }),
            KeyValueResult::Err {
                error: KeyValueError::CursorNotFound
            }
        ));
    }
}

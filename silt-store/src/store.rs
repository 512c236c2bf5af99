use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use redb::{Database, ReadableTable, ReadableTableMetadata};
use tracing::{debug, trace};

use silt_base::{err, ErrorKind, Result};

use crate::codec::{decode, Encoder};
use crate::slot::SLOT_LEN;
use crate::tables::{DICTS, INTS, LISTS, ROOT, STRINGS};
use crate::value::Value;

/// Open-time knobs. The backing file grows on demand, so the one sizing
/// parameter the engine takes up front is its page cache budget.
#[derive(Clone, Debug, Default)]
pub struct Options {
    cache_size: Option<usize>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<Store> {
        let path = path.as_ref().to_path_buf();
        let mut builder = redb::Builder::new();
        if let Some(bytes) = self.cache_size {
            builder.set_cache_size(bytes);
        }
        let db = builder.create(&path)?;
        // Make sure every table exists up front so snapshots never observe a
        // missing one.
        let txn = db.begin_write()?;
        {
            txn.open_table(ROOT)?;
            txn.open_table(INTS)?;
            txn.open_table(STRINGS)?;
            txn.open_table(LISTS)?;
            txn.open_table(DICTS)?;
        }
        txn.commit()?;
        debug!(target: "silt", "opened store at {}", path.display());
        Ok(Store {
            inner: Rc::new(StoreInner {
                db,
                path,
                write: RefCell::new(WriteState::default()),
                ids: RefCell::new(HashMap::new()),
            }),
        })
    }
}

#[derive(Default)]
struct WriteState {
    depth: u32,
    txn: Option<redb::WriteTransaction>,
    poisoned: bool,
}

pub(crate) struct StoreInner {
    pub(crate) db: Database,
    pub(crate) path: PathBuf,
    write: RefCell<WriteState>,
    // Write-scoped map from host-object identity to the id already allocated
    // for it, so one object stores once and self-reference terminates.
    ids: RefCell<HashMap<usize, u32>>,
}

/// Handle to one on-disk store. Clones share the same environment; handle
/// equality and hashing key off that shared identity. The environment closes
/// when the last clone drops.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.inner.path)
            .finish()
    }
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Store> {
        Options::new().open(path)
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub(crate) fn ptr_id(&self) -> usize {
        Rc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn is_same(&self, other: &Store) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn begin_read(&self) -> Result<redb::ReadTransaction> {
        Ok(self.inner.db.begin_read()?)
    }

    pub(crate) fn identity_of(&self, identity: usize) -> Option<u32> {
        self.inner.ids.borrow().get(&identity).copied()
    }

    pub(crate) fn record_identity(&self, identity: usize, id: u32) {
        self.inner.ids.borrow_mut().insert(identity, id);
    }

    fn enter_write(&self) -> Result<()> {
        let mut state = self.inner.write.borrow_mut();
        state.depth += 1;
        if state.depth == 1 {
            state.poisoned = false;
            self.inner.ids.borrow_mut().clear();
            match self.inner.db.begin_write() {
                Ok(txn) => state.txn = Some(txn),
                Err(e) => {
                    state.depth = 0;
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn exit_write(&self, ok: bool) -> Result<()> {
        let mut state = self.inner.write.borrow_mut();
        if !ok {
            state.poisoned = true;
        }
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }
        let txn = state.txn.take();
        let poisoned = state.poisoned;
        state.poisoned = false;
        drop(state);
        self.inner.ids.borrow_mut().clear();
        let Some(txn) = txn else {
            return Ok(());
        };
        if poisoned {
            txn.abort()?;
            if ok {
                return Err(err(
                    ErrorKind::StorageIo,
                    "transaction poisoned by an earlier failure",
                ));
            }
            Ok(())
        } else {
            trace!(target: "silt", "committing write transaction");
            txn.commit()?;
            Ok(())
        }
    }

    /// Runs one logical write inside the outermost write transaction,
    /// entering and leaving the scope around it. Recoverable misses leave
    /// the scope healthy; anything else poisons it so no partial state can
    /// commit.
    pub(crate) fn with_write<R>(
        &self,
        f: impl FnOnce(&redb::WriteTransaction) -> Result<R>,
    ) -> Result<R> {
        self.enter_write()?;
        let result = {
            let state = self.inner.write.borrow();
            match state.txn.as_ref() {
                Some(txn) => f(txn),
                None => Err(err(ErrorKind::StorageIo, "write scope lost its transaction")),
            }
        };
        let ok = match &result {
            Ok(_) => true,
            Err(e) => e.kind().is_recoverable(),
        };
        self.exit_write(ok)?;
        result
    }

    pub fn set(&self, key: &Value, value: &Value) -> Result<()> {
        self.with_write(|txn| {
            let enc = Encoder::writing(self, txn);
            let mut key_slot = Vec::with_capacity(SLOT_LEN);
            enc.encode(&mut key_slot, key)?;
            let mut value_slot = Vec::with_capacity(SLOT_LEN);
            enc.encode(&mut value_slot, value)?;
            let mut root = txn.open_table(ROOT)?;
            root.insert(key_slot.as_slice(), value_slot.as_slice())?;
            Ok(())
        })
    }

    pub fn get(&self, key: &Value) -> Result<Value> {
        let mut key_slot = Vec::with_capacity(SLOT_LEN);
        Encoder::reading(self).encode(&mut key_slot, key)?;
        let txn = self.begin_read()?;
        let root = txn.open_table(ROOT)?;
        let value_slot = root
            .get(key_slot.as_slice())?
            .ok_or_else(|| err(ErrorKind::KeyNotFound, "no such key"))?
            .value()
            .to_vec();
        decode(self, &txn, &value_slot)
    }

    pub fn delete(&self, key: &Value) -> Result<()> {
        let mut key_slot = Vec::with_capacity(SLOT_LEN);
        Encoder::reading(self).encode(&mut key_slot, key)?;
        self.with_write(|txn| {
            let mut root = txn.open_table(ROOT)?;
            if root.remove(key_slot.as_slice())?.is_none() {
                return Err(err(ErrorKind::KeyNotFound, "no such key"));
            }
            Ok(())
        })
    }

    pub fn len(&self) -> Result<usize> {
        let txn = self.begin_read()?;
        let root = txn.open_table(ROOT)?;
        Ok(root.len()? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Decoded top-level keys in slot byte order.
    pub fn keys(&self) -> Result<Vec<Value>> {
        let txn = self.begin_read()?;
        let root = txn.open_table(ROOT)?;
        let mut keys = Vec::new();
        for item in root.iter()? {
            let (key_slot, _) = item?;
            keys.push(decode(self, &txn, key_slot.value())?);
        }
        Ok(keys)
    }

    /// Groups several top-level operations into the one outermost write
    /// transaction. Dropping the guard without `commit` aborts.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.enter_write()?;
        Ok(Transaction {
            store: self,
            done: false,
        })
    }
}

pub struct Transaction<'a> {
    store: &'a Store,
    done: bool,
}

impl Transaction<'_> {
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        self.store.exit_write(true)
    }

    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.store.exit_write(false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.store.exit_write(false);
        }
    }
}

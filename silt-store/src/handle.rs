use std::hash::{Hash, Hasher};
use std::rc::Rc;

use redb::{ReadableTable, ReadTransaction};

use silt_base::{err, ErrorKind, Result};

use crate::codec::{decode, Encoder};
use crate::slot::{Slot, SLOT_LEN, TAG_DICT, TAG_LIST, TAG_TUPLE};
use crate::store::Store;
use crate::tables::{self, DICTS, LISTS};
use crate::value::Value;

/// Read-through proxy surface shared by the three compound handles.
///
/// A handle is a `(store, key)` fingerprint; everything else is fetched on
/// demand in short snapshot transactions. Two handles that observe the same
/// rows are equal and hash identically, so stored compounds keep their
/// reference identity across persistence.
pub trait Handle {
    /// Materialises one level: scalars decode fully, nested compounds decode
    /// to further handles.
    fn eager(&self) -> Result<Value>;

    fn store(&self) -> &Store;
}

/// Slot-prefix shortcut for membership scans: a same-store handle matches an
/// element by raw slot bytes, with no decoding. A handle from another store
/// can match nothing here.
enum Probe<'a> {
    Raw(Slot),
    Decoded(&'a Value),
    Never,
}

fn probe_for<'a>(store: &Store, item: &'a Value) -> Probe<'a> {
    match item.handle_slot() {
        Some((owner, slot)) if owner == store.ptr_id() => Probe::Raw(slot),
        Some(_) => Probe::Never,
        None => Probe::Decoded(item),
    }
}

// ---------------- tuples ----------------

/// Lazy handle to an immutable tuple record, addressed by content digest.
#[derive(Clone, Debug)]
pub struct TupleRef {
    pub(crate) store: Store,
    pub(crate) digest: [u8; 8],
}

fn tuple_record(txn: &ReadTransaction, digest: &[u8; 8]) -> Result<Vec<u8>> {
    let table = txn.open_table(LISTS)?;
    let record = table
        .get(digest.as_slice())?
        .ok_or_else(|| err(ErrorKind::CorruptRecord, "tuple record missing"))?;
    Ok(record.value().to_vec())
}

fn tuple_record_len(record: &[u8]) -> Result<usize> {
    if record.len() < 4 {
        return Err(err(ErrorKind::CorruptRecord, "tuple record too short"));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&record[..4]);
    let len = u32::from_le_bytes(len) as usize;
    if record.len() != 4 + len * SLOT_LEN {
        return Err(err(
            ErrorKind::CorruptRecord,
            "tuple record length disagrees with its slots",
        ));
    }
    Ok(len)
}

fn tuple_slot_at(record: &[u8], i: usize) -> &[u8] {
    &record[4 + i * SLOT_LEN..4 + (i + 1) * SLOT_LEN]
}

impl TupleRef {
    pub(crate) fn slot(&self) -> Slot {
        Slot::new(TAG_TUPLE, self.digest)
    }

    pub fn len(&self) -> Result<usize> {
        let txn = self.store.begin_read()?;
        tuple_record_len(&tuple_record(&txn, &self.digest)?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Positional access at `0 ≤ i < len`.
    pub fn get(&self, i: usize) -> Result<Value> {
        let txn = self.store.begin_read()?;
        let record = tuple_record(&txn, &self.digest)?;
        let len = tuple_record_len(&record)?;
        if i >= len {
            return Err(err(
                ErrorKind::IndexOutOfRange,
                format!("index {i} out of range for tuple of length {len}"),
            ));
        }
        decode(&self.store, &txn, tuple_slot_at(&record, i))
    }

    fn elements(&self) -> Result<Vec<Value>> {
        let txn = self.store.begin_read()?;
        let record = tuple_record(&txn, &self.digest)?;
        let len = tuple_record_len(&record)?;
        let mut elems = Vec::with_capacity(len);
        for i in 0..len {
            elems.push(decode(&self.store, &txn, tuple_slot_at(&record, i))?);
        }
        Ok(elems)
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Value>> {
        Ok(self.elements()?.into_iter())
    }

    /// Index of the first element equal to `item`.
    pub fn index(&self, item: &Value) -> Result<Option<usize>> {
        let txn = self.store.begin_read()?;
        let record = tuple_record(&txn, &self.digest)?;
        let len = tuple_record_len(&record)?;
        let probe = probe_for(&self.store, item);
        for i in 0..len {
            let raw = tuple_slot_at(&record, i);
            match &probe {
                Probe::Raw(slot) => {
                    if raw == slot.as_bytes() {
                        return Ok(Some(i));
                    }
                }
                Probe::Decoded(item) => {
                    if decode(&self.store, &txn, raw)? == **item {
                        return Ok(Some(i));
                    }
                }
                Probe::Never => return Ok(None),
            }
        }
        Ok(None)
    }

    pub fn contains(&self, item: &Value) -> Result<bool> {
        Ok(self.index(item)?.is_some())
    }

    pub fn count(&self, item: &Value) -> Result<usize> {
        let txn = self.store.begin_read()?;
        let record = tuple_record(&txn, &self.digest)?;
        let len = tuple_record_len(&record)?;
        let probe = probe_for(&self.store, item);
        let mut count = 0;
        for i in 0..len {
            let raw = tuple_slot_at(&record, i);
            let hit = match &probe {
                Probe::Raw(slot) => raw == slot.as_bytes(),
                Probe::Decoded(item) => decode(&self.store, &txn, raw)? == **item,
                Probe::Never => return Ok(0),
            };
            if hit {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn concat(&self, other: &Value) -> Result<Value> {
        let mut elems = self.elements()?;
        match other.eager()? {
            Value::Tuple(tail) => elems.extend(tail.iter().cloned()),
            _ => {
                return Err(err(
                    ErrorKind::UnsupportedType,
                    "can only concatenate a tuple to a tuple",
                ))
            }
        }
        Ok(Value::tuple(elems))
    }

    pub fn repeat(&self, n: usize) -> Result<Value> {
        let elems = self.elements()?;
        let mut out = Vec::with_capacity(elems.len() * n);
        for _ in 0..n {
            out.extend(elems.iter().cloned());
        }
        Ok(Value::tuple(out))
    }
}

impl Handle for TupleRef {
    fn eager(&self) -> Result<Value> {
        Ok(Value::Tuple(Rc::from(self.elements()?)))
    }

    fn store(&self) -> &Store {
        &self.store
    }
}

impl PartialEq for TupleRef {
    fn eq(&self, other: &TupleRef) -> bool {
        self.store.is_same(&other.store) && self.digest == other.digest
    }
}

impl Eq for TupleRef {}

impl Hash for TupleRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store.ptr_id().hash(state);
        self.slot().0.hash(state);
    }
}

// ---------------- lists ----------------

/// Lazy handle to a mutable list, addressed by its allocated id. Mutations
/// go through the store's write scope and are visible to every handle on the
/// same rows.
#[derive(Clone, Debug)]
pub struct ListRef {
    pub(crate) store: Store,
    pub(crate) id: u32,
}

fn list_len(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: u32,
) -> Result<usize> {
    let row = table
        .get(tables::list_len_key(id).as_slice())?
        .ok_or_else(|| err(ErrorKind::CorruptRecord, "list length row missing"))?;
    let bytes = row.value();
    if bytes.len() != 4 {
        return Err(err(ErrorKind::CorruptRecord, "malformed list length row"));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(len) as usize)
}

fn list_row(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: u32,
    i: usize,
) -> Result<Vec<u8>> {
    let row = table
        .get(tables::list_row_key(id, i as u32).as_slice())?
        .ok_or_else(|| err(ErrorKind::CorruptRecord, "list element row missing"))?;
    Ok(row.value().to_vec())
}

/// Conventional negative-index normalisation: `i < 0` counts from the end,
/// and anything outside `0..len` after that is out of range.
fn normalize(i: i64, len: usize) -> Result<usize> {
    let n = if i < 0 { i + len as i64 } else { i };
    if n < 0 || n as usize >= len {
        return Err(err(
            ErrorKind::IndexOutOfRange,
            format!("index {i} out of range for length {len}"),
        ));
    }
    Ok(n as usize)
}

impl ListRef {
    pub(crate) fn slot(&self) -> Slot {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&self.id.to_le_bytes());
        Slot::new(TAG_LIST, payload)
    }

    pub fn len(&self) -> Result<usize> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(LISTS)?;
        list_len(&table, self.id)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, i: i64) -> Result<Value> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(LISTS)?;
        let len = list_len(&table, self.id)?;
        let i = normalize(i, len)?;
        let slot = list_row(&table, self.id, i)?;
        drop(table);
        decode(&self.store, &txn, &slot)
    }

    pub fn set(&self, i: i64, v: &Value) -> Result<()> {
        self.store.with_write(|txn| {
            let len = {
                let table = txn.open_table(LISTS)?;
                list_len(&table, self.id)?
            };
            // Bounds-check before encoding so a miss writes nothing.
            let i = normalize(i, len)?;
            let mut slot = Vec::with_capacity(SLOT_LEN);
            Encoder::writing(&self.store, txn).encode(&mut slot, v)?;
            let mut table = txn.open_table(LISTS)?;
            table.insert(
                tables::list_row_key(self.id, i as u32).as_slice(),
                slot.as_slice(),
            )?;
            Ok(())
        })
    }

    pub fn append(&self, v: &Value) -> Result<()> {
        self.store.with_write(|txn| {
            let mut slot = Vec::with_capacity(SLOT_LEN);
            Encoder::writing(&self.store, txn).encode(&mut slot, v)?;
            let mut table = txn.open_table(LISTS)?;
            let len = list_len(&table, self.id)?;
            table.insert(
                tables::list_row_key(self.id, len as u32).as_slice(),
                slot.as_slice(),
            )?;
            table.insert(
                tables::list_len_key(self.id).as_slice(),
                (len as u32 + 1).to_le_bytes().as_slice(),
            )?;
            Ok(())
        })
    }

    /// Removes the element at `i`, shifting every higher row down one.
    pub fn remove(&self, i: i64) -> Result<()> {
        self.store.with_write(|txn| {
            let mut table = txn.open_table(LISTS)?;
            let len = list_len(&table, self.id)?;
            let i = normalize(i, len)?;
            for j in i..len - 1 {
                let next = list_row(&table, self.id, j + 1)?;
                table.insert(
                    tables::list_row_key(self.id, j as u32).as_slice(),
                    next.as_slice(),
                )?;
            }
            table.remove(tables::list_row_key(self.id, (len - 1) as u32).as_slice())?;
            table.insert(
                tables::list_len_key(self.id).as_slice(),
                (len as u32 - 1).to_le_bytes().as_slice(),
            )?;
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<()> {
        self.store.with_write(|txn| {
            let mut table = txn.open_table(LISTS)?;
            let len = list_len(&table, self.id)?;
            for i in 0..len {
                table.remove(tables::list_row_key(self.id, i as u32).as_slice())?;
            }
            table.insert(
                tables::list_len_key(self.id).as_slice(),
                0u32.to_le_bytes().as_slice(),
            )?;
            Ok(())
        })
    }

    fn elements(&self) -> Result<Vec<Value>> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(LISTS)?;
        let len = list_len(&table, self.id)?;
        let mut elems = Vec::with_capacity(len);
        for i in 0..len {
            let slot = list_row(&table, self.id, i)?;
            elems.push(decode(&self.store, &txn, &slot)?);
        }
        Ok(elems)
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = Value>> {
        Ok(self.elements()?.into_iter())
    }

    pub fn index(&self, item: &Value) -> Result<Option<usize>> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(LISTS)?;
        let len = list_len(&table, self.id)?;
        let probe = probe_for(&self.store, item);
        for i in 0..len {
            let raw = list_row(&table, self.id, i)?;
            match &probe {
                Probe::Raw(slot) => {
                    if raw == slot.as_bytes() {
                        return Ok(Some(i));
                    }
                }
                Probe::Decoded(item) => {
                    if decode(&self.store, &txn, &raw)? == **item {
                        return Ok(Some(i));
                    }
                }
                Probe::Never => return Ok(None),
            }
        }
        Ok(None)
    }

    pub fn contains(&self, item: &Value) -> Result<bool> {
        Ok(self.index(item)?.is_some())
    }

    pub fn count(&self, item: &Value) -> Result<usize> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(LISTS)?;
        let len = list_len(&table, self.id)?;
        let probe = probe_for(&self.store, item);
        let mut count = 0;
        for i in 0..len {
            let raw = list_row(&table, self.id, i)?;
            let hit = match &probe {
                Probe::Raw(slot) => raw == slot.as_bytes(),
                Probe::Decoded(item) => decode(&self.store, &txn, &raw)? == **item,
                Probe::Never => return Ok(0),
            };
            if hit {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn concat(&self, other: &Value) -> Result<Value> {
        let mut elems = self.elements()?;
        match other.eager()? {
            Value::List(tail) => elems.extend(tail.borrow().iter().cloned()),
            _ => {
                return Err(err(
                    ErrorKind::UnsupportedType,
                    "can only concatenate a list to a list",
                ))
            }
        }
        Ok(Value::list(elems))
    }

    pub fn repeat(&self, n: usize) -> Result<Value> {
        let elems = self.elements()?;
        let mut out = Vec::with_capacity(elems.len() * n);
        for _ in 0..n {
            out.extend(elems.iter().cloned());
        }
        Ok(Value::list(out))
    }
}

impl Handle for ListRef {
    fn eager(&self) -> Result<Value> {
        Ok(Value::list(self.elements()?))
    }

    fn store(&self) -> &Store {
        &self.store
    }
}

impl PartialEq for ListRef {
    fn eq(&self, other: &ListRef) -> bool {
        self.store.is_same(&other.store) && self.id == other.id
    }
}

impl Eq for ListRef {}

impl Hash for ListRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store.ptr_id().hash(state);
        self.slot().0.hash(state);
    }
}

// ---------------- dicts ----------------

/// Lazy handle to a mutable dict, addressed by its allocated id. Entries
/// live under `id ‖ encoded-key`; the bare id holds the entry count.
#[derive(Clone, Debug)]
pub struct DictRef {
    pub(crate) store: Store,
    pub(crate) id: u32,
}

fn dict_len(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: u32,
) -> Result<usize> {
    let cell = table
        .get(&id.to_le_bytes()[..])?
        .ok_or_else(|| err(ErrorKind::CorruptRecord, "dict length cell missing"))?;
    let bytes = cell.value();
    if bytes.len() != 4 {
        return Err(err(ErrorKind::CorruptRecord, "malformed dict length cell"));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(bytes);
    Ok(u32::from_le_bytes(len) as usize)
}

impl DictRef {
    pub(crate) fn slot(&self) -> Slot {
        let mut payload = [0u8; 8];
        payload[..4].copy_from_slice(&self.id.to_le_bytes());
        Slot::new(TAG_DICT, payload)
    }

    pub fn len(&self) -> Result<usize> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(DICTS)?;
        dict_len(&table, self.id)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Entry key for a lookup, or None when the key cannot name anything
    /// stored: a fresh in-memory mutable compound has no allocated identity,
    /// so no entry can match it.
    fn lookup_key(&self, k: &Value) -> Result<Option<Vec<u8>>> {
        let mut entry_key = Vec::with_capacity(4 + SLOT_LEN);
        entry_key.extend_from_slice(&self.id.to_le_bytes());
        match Encoder::reading(&self.store).encode(&mut entry_key, k) {
            Ok(()) => Ok(Some(entry_key)),
            Err(e) if e.kind() == ErrorKind::MutableWithoutWrite => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, k: &Value) -> Result<Value> {
        let entry_key = self
            .lookup_key(k)?
            .ok_or_else(|| err(ErrorKind::KeyNotFound, "no such key"))?;
        let txn = self.store.begin_read()?;
        let table = txn.open_table(DICTS)?;
        let slot = table
            .get(entry_key.as_slice())?
            .ok_or_else(|| err(ErrorKind::KeyNotFound, "no such key"))?
            .value()
            .to_vec();
        drop(table);
        decode(&self.store, &txn, &slot)
    }

    pub fn set(&self, k: &Value, v: &Value) -> Result<()> {
        self.store.with_write(|txn| {
            let enc = Encoder::writing(&self.store, txn);
            let mut entry_key = Vec::with_capacity(4 + SLOT_LEN);
            entry_key.extend_from_slice(&self.id.to_le_bytes());
            enc.encode(&mut entry_key, k)?;
            let mut entry_val = Vec::with_capacity(SLOT_LEN);
            enc.encode(&mut entry_val, v)?;
            let mut table = txn.open_table(DICTS)?;
            let len = dict_len(&table, self.id)?;
            let fresh = table
                .insert(entry_key.as_slice(), entry_val.as_slice())?
                .is_none();
            if fresh {
                table.insert(
                    &self.id.to_le_bytes()[..],
                    (len as u32 + 1).to_le_bytes().as_slice(),
                )?;
            }
            Ok(())
        })
    }

    pub fn remove(&self, k: &Value) -> Result<()> {
        let entry_key = self
            .lookup_key(k)?
            .ok_or_else(|| err(ErrorKind::KeyNotFound, "no such key"))?;
        self.store.with_write(|txn| {
            let mut table = txn.open_table(DICTS)?;
            let len = dict_len(&table, self.id)?;
            if table.remove(entry_key.as_slice())?.is_none() {
                return Err(err(ErrorKind::KeyNotFound, "no such key"));
            }
            let len = (len as u32)
                .checked_sub(1)
                .ok_or_else(|| err(ErrorKind::CorruptRecord, "dict length cell underflow"))?;
            table.insert(&self.id.to_le_bytes()[..], len.to_le_bytes().as_slice())?;
            Ok(())
        })
    }

    pub fn contains(&self, k: &Value) -> Result<bool> {
        match self.get(k) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::KeyNotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Decoded entries in encoded-key byte order, from a cursor over the id
    /// prefix.
    pub fn entries(&self) -> Result<Vec<(Value, Value)>> {
        let txn = self.store.begin_read()?;
        let table = txn.open_table(DICTS)?;
        let prefix = self.id.to_le_bytes();
        let mut entries = Vec::new();
        for item in table.range(&prefix[..]..)? {
            let (key, value) = item?;
            let key = key.value();
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == 4 {
                // The length cell shares the prefix; it is not an entry.
                continue;
            }
            entries.push((
                decode(&self.store, &txn, &key[4..])?,
                decode(&self.store, &txn, value.value())?,
            ));
        }
        Ok(entries)
    }

    pub fn iter(&self) -> Result<impl Iterator<Item = (Value, Value)>> {
        Ok(self.entries()?.into_iter())
    }

    pub fn keys(&self) -> Result<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|(_, v)| v).collect())
    }
}

impl Handle for DictRef {
    fn eager(&self) -> Result<Value> {
        Ok(Value::dict(self.entries()?))
    }

    fn store(&self) -> &Store {
        &self.store
    }
}

impl PartialEq for DictRef {
    fn eq(&self, other: &DictRef) -> bool {
        self.store.is_same(&other.store) && self.id == other.id
    }
}

impl Eq for DictRef {}

impl Hash for DictRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store.ptr_id().hash(state);
        self.slot().0.hash(state);
    }
}

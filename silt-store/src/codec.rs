use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use ordered_float::OrderedFloat;
use redb::ReadableTable;

use silt_base::{err, Error, ErrorKind, Result};

use crate::handle::{DictRef, Handle, ListRef, TupleRef};
use crate::slot::{
    Slot, SINGLETON_EMPTY_TUPLE, SINGLETON_FALSE, SINGLETON_NULL, SINGLETON_TRUE, SLOT_LEN,
    TAG_BIG_INT, TAG_DICT, TAG_FLOAT, TAG_INT, TAG_LIST, TAG_LONG_STR, TAG_SHORT_STR,
    TAG_SINGLETON, TAG_TUPLE,
};
use crate::store::Store;
use crate::tables::{self, DICTS, INTS, LISTS, STRINGS};
use crate::value::Value;

/// Encodes values into 9-byte slots, writing side-table records as needed.
///
/// A reading encoder computes content digests without touching the file and
/// refuses in-memory mutable compounds, which cannot be named without an
/// allocation. Same-store handles re-emit their existing slot in either
/// mode; a handle bound to a different store is dereferenced and re-encoded
/// as a deep copy.
pub(crate) struct Encoder<'a> {
    store: &'a Store,
    txn: Option<&'a redb::WriteTransaction>,
}

impl<'a> Encoder<'a> {
    pub(crate) fn writing(store: &'a Store, txn: &'a redb::WriteTransaction) -> Self {
        Encoder {
            store,
            txn: Some(txn),
        }
    }

    pub(crate) fn reading(store: &'a Store) -> Self {
        Encoder { store, txn: None }
    }

    /// Appends exactly nine bytes to `out`.
    pub(crate) fn encode(&self, out: &mut Vec<u8>, v: &Value) -> Result<()> {
        match v {
            Value::Null => self.put(out, Slot::from_u64(TAG_SINGLETON, SINGLETON_NULL)),
            Value::Bool(true) => self.put(out, Slot::from_u64(TAG_SINGLETON, SINGLETON_TRUE)),
            Value::Bool(false) => self.put(out, Slot::from_u64(TAG_SINGLETON, SINGLETON_FALSE)),
            Value::Int(i) => self.put(out, Slot::new(TAG_INT, i.to_le_bytes())),
            Value::Big(b) => self.encode_big(out, b),
            Value::Float(f) => self.put(out, Slot::new(TAG_FLOAT, f.into_inner().to_le_bytes())),
            Value::Str(s) => self.encode_str(out, s),
            Value::Tuple(elems) if elems.is_empty() => {
                self.put(out, Slot::from_u64(TAG_SINGLETON, SINGLETON_EMPTY_TUPLE))
            }
            Value::Tuple(elems) => self.encode_tuple(out, elems),
            Value::List(elems) => self.encode_list(out, elems),
            Value::Dict(pairs) => self.encode_dict(out, pairs),
            Value::TupleRef(h) => self.encode_tuple_ref(out, h),
            Value::ListRef(h) => self.encode_list_ref(out, h),
            Value::DictRef(h) => self.encode_dict_ref(out, h),
        }
    }

    fn put(&self, out: &mut Vec<u8>, slot: Slot) -> Result<()> {
        out.extend_from_slice(slot.as_bytes());
        Ok(())
    }

    fn encode_big(&self, out: &mut Vec<u8>, b: &BigInt) -> Result<()> {
        if let Some(i) = b.to_i64() {
            return self.put(out, Slot::new(TAG_INT, i.to_le_bytes()));
        }
        // Minimal two's-complement little-endian bytes, content-addressed.
        let bytes = b.to_signed_bytes_le();
        let digest = self.intern(INTS, &bytes)?;
        self.put(out, Slot::new(TAG_BIG_INT, digest))
    }

    fn encode_str(&self, out: &mut Vec<u8>, s: &str) -> Result<()> {
        let bytes = s.as_bytes();
        if bytes.len() <= 8 {
            let mut payload = [0u8; 8];
            payload[..bytes.len()].copy_from_slice(bytes);
            return self.put(out, Slot::new(TAG_SHORT_STR, payload));
        }
        let digest = self.intern(STRINGS, bytes)?;
        self.put(out, Slot::new(TAG_LONG_STR, digest))
    }

    fn encode_tuple(&self, out: &mut Vec<u8>, elems: &[Value]) -> Result<()> {
        let mut record = Vec::with_capacity(4 + SLOT_LEN * elems.len());
        record.extend_from_slice(&(elems.len() as u32).to_le_bytes());
        for elem in elems {
            self.encode(&mut record, elem)?;
        }
        let digest = self.intern(LISTS, &record)?;
        self.put(out, Slot::new(TAG_TUPLE, digest))
    }

    fn encode_list(&self, out: &mut Vec<u8>, elems: &Rc<RefCell<Vec<Value>>>) -> Result<()> {
        let txn = self.txn.ok_or_else(|| {
            err(
                ErrorKind::MutableWithoutWrite,
                "cannot encode a list without a write transaction",
            )
        })?;
        let identity = Rc::as_ptr(elems) as usize;
        if let Some(id) = self.store.identity_of(identity) {
            return self.put(out, list_slot(id));
        }
        let id = tables::alloc_list_id(txn)?;
        // Name the object before descending so self-reference terminates.
        self.store.record_identity(identity, id);
        let elems = elems.borrow();
        let mut rows = Vec::with_capacity(elems.len());
        for elem in elems.iter() {
            let mut slot = Vec::with_capacity(SLOT_LEN);
            self.encode(&mut slot, elem)?;
            rows.push(slot);
        }
        drop(elems);
        let mut table = txn.open_table(LISTS)?;
        for (i, slot) in rows.iter().enumerate() {
            table.insert(tables::list_row_key(id, i as u32).as_slice(), slot.as_slice())?;
        }
        table.insert(
            tables::list_len_key(id).as_slice(),
            (rows.len() as u32).to_le_bytes().as_slice(),
        )?;
        drop(table);
        self.put(out, list_slot(id))
    }

    fn encode_dict(
        &self,
        out: &mut Vec<u8>,
        pairs: &Rc<RefCell<Vec<(Value, Value)>>>,
    ) -> Result<()> {
        let txn = self.txn.ok_or_else(|| {
            err(
                ErrorKind::MutableWithoutWrite,
                "cannot encode a dict without a write transaction",
            )
        })?;
        let identity = Rc::as_ptr(pairs) as usize;
        if let Some(id) = self.store.identity_of(identity) {
            return self.put(out, dict_slot(id));
        }
        let id = tables::alloc_dict_id(txn)?;
        self.store.record_identity(identity, id);
        let pairs = pairs.borrow();
        let mut entries = Vec::with_capacity(pairs.len());
        for (k, v) in pairs.iter() {
            let mut entry_key = Vec::with_capacity(4 + SLOT_LEN);
            entry_key.extend_from_slice(&id.to_le_bytes());
            self.encode(&mut entry_key, k)?;
            let mut entry_val = Vec::with_capacity(SLOT_LEN);
            self.encode(&mut entry_val, v)?;
            entries.push((entry_key, entry_val));
        }
        drop(pairs);
        let mut table = txn.open_table(DICTS)?;
        let mut count: u32 = 0;
        for (entry_key, entry_val) in &entries {
            if table
                .insert(entry_key.as_slice(), entry_val.as_slice())?
                .is_none()
            {
                count += 1;
            }
        }
        table.insert(&id.to_le_bytes()[..], count.to_le_bytes().as_slice())?;
        drop(table);
        self.put(out, dict_slot(id))
    }

    fn encode_tuple_ref(&self, out: &mut Vec<u8>, h: &TupleRef) -> Result<()> {
        if self.store.is_same(&h.store) {
            return self.put(out, h.slot());
        }
        // A foreign tuple is content-addressed on both sides, so copying it
        // works in either mode: reading just recomputes the digest.
        let v = h.eager()?;
        self.encode(out, &v)
    }

    fn encode_list_ref(&self, out: &mut Vec<u8>, h: &ListRef) -> Result<()> {
        if self.store.is_same(&h.store) {
            return self.put(out, h.slot());
        }
        if self.txn.is_none() {
            return Err(err(
                ErrorKind::MutableWithoutWrite,
                "cannot copy a foreign list without a write transaction",
            ));
        }
        let v = h.eager()?;
        self.encode(out, &v)
    }

    fn encode_dict_ref(&self, out: &mut Vec<u8>, h: &DictRef) -> Result<()> {
        if self.store.is_same(&h.store) {
            return self.put(out, h.slot());
        }
        if self.txn.is_none() {
            return Err(err(
                ErrorKind::MutableWithoutWrite,
                "cannot copy a foreign dict without a write transaction",
            ));
        }
        let v = h.eager()?;
        self.encode(out, &v)
    }

    fn intern(
        &self,
        def: redb::TableDefinition<'static, &'static [u8], &'static [u8]>,
        bytes: &[u8],
    ) -> Result<[u8; 8]> {
        match self.txn {
            Some(txn) => {
                let mut table = txn.open_table(def)?;
                tables::intern(&mut table, bytes)
            }
            None => Ok(tables::digest(bytes)),
        }
    }
}

fn list_slot(id: u32) -> Slot {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&id.to_le_bytes());
    Slot::new(TAG_LIST, payload)
}

fn dict_slot(id: u32) -> Slot {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&id.to_le_bytes());
    Slot::new(TAG_DICT, payload)
}

/// Decodes one slot within the caller's snapshot. Scalars materialise fully;
/// compounds come back as lazy handles bound to this store.
pub(crate) fn decode(store: &Store, txn: &redb::ReadTransaction, bytes: &[u8]) -> Result<Value> {
    let slot = Slot::parse(bytes)?;
    match slot.tag() {
        TAG_SINGLETON => match slot.payload_u64() {
            SINGLETON_NULL => Ok(Value::Null),
            SINGLETON_TRUE => Ok(Value::Bool(true)),
            SINGLETON_FALSE => Ok(Value::Bool(false)),
            SINGLETON_EMPTY_TUPLE => Ok(Value::Tuple(Rc::from(Vec::new()))),
            i => Err(err(
                ErrorKind::CorruptRecord,
                format!("singleton index {i} out of range"),
            )),
        },
        TAG_INT => Ok(Value::Int(i64::from_le_bytes(slot.payload()))),
        TAG_BIG_INT => {
            let table = txn.open_table(INTS)?;
            let record = table.get(slot.payload().as_slice())?.ok_or_else(|| {
                err(ErrorKind::CorruptRecord, "big-integer record missing")
            })?;
            Ok(Value::Big(BigInt::from_signed_bytes_le(record.value())))
        }
        TAG_FLOAT => Ok(Value::Float(OrderedFloat(f64::from_le_bytes(
            slot.payload(),
        )))),
        TAG_SHORT_STR => {
            let payload = slot.payload();
            let end = memchr::memchr(0, &payload).unwrap_or(payload.len());
            let s = std::str::from_utf8(&payload[..end])
                .map_err(|e| Error::new(ErrorKind::CorruptRecord, e))?;
            Ok(Value::Str(s.to_owned()))
        }
        TAG_LONG_STR => {
            let table = txn.open_table(STRINGS)?;
            let record = table.get(slot.payload().as_slice())?.ok_or_else(|| {
                err(ErrorKind::CorruptRecord, "string record missing")
            })?;
            let s = String::from_utf8(record.value().to_vec())
                .map_err(|e| Error::new(ErrorKind::CorruptRecord, e))?;
            Ok(Value::Str(s))
        }
        TAG_TUPLE => Ok(Value::TupleRef(TupleRef {
            store: store.clone(),
            digest: slot.payload(),
        })),
        TAG_LIST => Ok(Value::ListRef(ListRef {
            store: store.clone(),
            id: slot.compound_id(),
        })),
        TAG_DICT => Ok(Value::DictRef(DictRef {
            store: store.clone(),
            id: slot.compound_id(),
        })),
        t => Err(err(ErrorKind::CorruptTag, format!("unknown type tag {t}"))),
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use num_bigint::BigInt;
use redb::{ReadableTable, ReadableTableMetadata};
use test_log::test;

use silt_base::{ErrorKind, Result};

use crate::codec::Encoder;
use crate::slot::SLOT_LEN;
use crate::{tables, Handle, Store, Value};


pub(crate) fn tmp() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("m.silt")).expect("open store");
    (dir, store)
}

pub(crate) fn table_len(
    store: &Store,
    def: redb::TableDefinition<&'static [u8], &'static [u8]>,
) -> usize {
    let txn = store.begin_read().expect("read txn");
    let table = txn.open_table(def).expect("open table");
    table.len().expect("table len") as usize
}

fn scalars() -> Vec<Value> {
    vec![
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::Int(0),
        Value::Int(42),
        Value::Int(-42),
        Value::Int(i64::MAX),
        Value::Int(i64::MIN),
        Value::Big(BigInt::from(1) << 100),
        Value::Big(-(BigInt::from(1) << 100u32)),
        Value::from(0.0),
        Value::from(-1.5),
        Value::from(1.0 / 3.0),
        Value::from(f64::NAN),
        Value::from(""),
        Value::from("ok"),
        Value::from("12345678"),
        Value::from("héllo"),
        Value::from("Wer lesen kann ist klar im Vorteil."),
        Value::tuple(vec![]),
    ]
}

#[test]
fn test_scalar_roundtrip() -> Result<()> {
    let (_dir, m) = tmp();
    for (i, v) in scalars().iter().enumerate() {
        let key = Value::Int(i as i64);
        m.set(&key, v)?;
        assert_eq!(m.get(&key)?, *v, "value {i} did not survive a round trip");
    }
    Ok(())
}

#[test]
fn test_every_slot_is_nine_bytes() -> Result<()> {
    let (_dir, m) = tmp();
    let mut buf = Vec::new();
    for (i, v) in scalars().iter().enumerate() {
        Encoder::reading(&m).encode(&mut buf, v)?;
        assert_eq!(buf.len(), (i + 1) * SLOT_LEN);
    }
    Ok(())
}

#[test]
fn test_encoding_is_deterministic() -> Result<()> {
    let (_dir, m) = tmp();
    for v in scalars() {
        let mut a = Vec::new();
        Encoder::reading(&m).encode(&mut a, &v)?;
        let mut b = Vec::new();
        Encoder::reading(&m).encode(&mut b, &v)?;
        assert_eq!(a, b);
    }
    Ok(())
}

#[test]
fn test_tuple_roundtrip_eager() -> Result<()> {
    let (_dir, m) = tmp();
    let t = Value::tuple(scalars());
    m.set(&Value::Int(0), &t)?;
    let h = m.get(&Value::Int(0))?;
    assert_eq!(h.eager()?, t);
    Ok(())
}

#[test]
fn test_dict_set_updates_length() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(
        &Value::Int(0),
        &Value::dict(vec![(Value::from("a"), Value::Int(1))]),
    )?;
    let d = m.get(&Value::Int(0))?;
    let d = d.as_dict_ref().expect("dict handle");
    assert_eq!(d.len()?, 1);
    d.set(&Value::from("b"), &Value::Int(2))?;
    assert_eq!(d.len()?, 2);
    d.set(&Value::from("a"), &Value::Int(3))?;
    assert_eq!(d.len()?, 2);
    assert_eq!(d.get(&Value::from("a"))?, Value::Int(3));
    d.remove(&Value::from("b"))?;
    assert_eq!(d.len()?, 1);
    Ok(())
}

#[test]
fn test_string_tag_boundary() -> Result<()> {
    let (_dir, m) = tmp();
    let mut short = Vec::new();
    Encoder::reading(&m).encode(&mut short, &Value::from("12345678"))?;
    assert_eq!(short[0], 4);
    let mut long = Vec::new();
    Encoder::reading(&m).encode(&mut long, &Value::from("123456789"))?;
    assert_eq!(long[0], 5);
    Ok(())
}

#[test]
fn test_singletons_are_distinct_from_look_alikes() -> Result<()> {
    let (_dir, m) = tmp();
    let look_alikes = [
        (Value::Bool(true), Value::Int(1)),
        (Value::Bool(false), Value::Int(0)),
        (Value::Null, Value::Int(0)),
        (Value::Int(0), Value::from(0.0)),
    ];
    for (a, b) in &look_alikes {
        let mut ea = Vec::new();
        Encoder::reading(&m).encode(&mut ea, a)?;
        let mut eb = Vec::new();
        Encoder::reading(&m).encode(&mut eb, b)?;
        assert_ne!(ea, eb, "{a} and {b} must not share an encoding");
        assert_ne!(a, b);
    }
    Ok(())
}

#[test]
fn test_mutable_key_without_write() {
    let (_dir, m) = tmp();
    let e = m.get(&Value::list(vec![Value::Int(1)])).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MutableWithoutWrite);
    let e = m.get(&Value::dict(vec![])).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MutableWithoutWrite);
}

#[test]
fn test_interning_stores_once() -> Result<()> {
    let (_dir, m) = tmp();
    let s = Value::from("a string long enough to leave the slot");
    m.set(&Value::from("k1"), &s)?;
    m.set(&Value::from("k2"), &s)?;
    assert_eq!(table_len(&m, tables::STRINGS), 1);

    let b = Value::Big(BigInt::from(1) << 100);
    m.set(&Value::from("b1"), &b)?;
    m.set(&Value::from("b2"), &b)?;
    assert_eq!(table_len(&m, tables::INTS), 1);

    let t = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
    m.set(&Value::from("t1"), &t)?;
    m.set(&Value::from("t2"), &t)?;
    assert_eq!(table_len(&m, tables::LISTS), 1);
    Ok(())
}

#[test]
fn test_identity_map_shares_one_list() -> Result<()> {
    let (_dir, m) = tmp();
    let l = Value::list(vec![Value::Int(1), Value::Int(2)]);
    m.set(&Value::from("t"), &Value::tuple(vec![l.clone(), l]))?;
    let t = m.get(&Value::from("t"))?;
    let t = t.as_tuple_ref().expect("tuple handle");
    let first = t.get(0)?;
    let second = t.get(1)?;
    assert_eq!(first, second, "one object must store as one id");
    // One tuple record, one length row, two element rows.
    assert_eq!(table_len(&m, tables::LISTS), 4);
    Ok(())
}

#[test]
fn test_self_referential_list() -> Result<()> {
    let (_dir, m) = tmp();
    let cell = Rc::new(RefCell::new(vec![Value::Int(1)]));
    cell.borrow_mut().push(Value::List(cell.clone()));
    m.set(&Value::from("l"), &Value::List(cell))?;

    let l = m.get(&Value::from("l"))?;
    let l = l.as_list_ref().expect("list handle");
    assert_eq!(l.len()?, 2);
    assert_eq!(l.get(0)?, Value::Int(1));
    let inner = l.get(1)?;
    assert_eq!(inner.as_list_ref().expect("nested list handle"), l);
    Ok(())
}

#[test]
fn test_list_negative_indexing() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(
        &Value::Int(0),
        &Value::list(vec![Value::Int(10), Value::Int(20), Value::Int(30)]),
    )?;
    let l = m.get(&Value::Int(0))?;
    let l = l.as_list_ref().expect("list handle");
    assert_eq!(l.get(-1)?, Value::Int(30));
    assert_eq!(l.get(-3)?, Value::Int(10));
    assert_eq!(l.get(2)?, Value::Int(30));
    assert_eq!(l.get(-4).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
    assert_eq!(l.get(3).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
    Ok(())
}

#[test]
fn test_append_grows_and_preserves() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(&Value::Int(0), &Value::list(vec![Value::Int(1), Value::Int(2)]))?;
    let l = m.get(&Value::Int(0))?;
    let l = l.as_list_ref().expect("list handle");
    l.append(&Value::from("three"))?;
    assert_eq!(l.len()?, 3);
    assert_eq!(l.get(0)?, Value::Int(1));
    assert_eq!(l.get(1)?, Value::Int(2));
    assert_eq!(l.get(2)?, Value::from("three"));
    Ok(())
}

#[test]
fn test_clear_removes_every_row() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(&Value::Int(0), &Value::list(vec![Value::Int(1), Value::Int(2)]))?;
    let l = m.get(&Value::Int(0))?;
    let l = l.as_list_ref().expect("list handle");
    let id = l.id;
    l.clear()?;
    assert_eq!(l.len()?, 0);
    let txn = m.begin_read()?;
    let table = txn.open_table(tables::LISTS)?;
    for i in 0..2u32 {
        assert!(table.get(tables::list_row_key(id, i).as_slice())?.is_none());
    }
    Ok(())
}

#[test]
fn test_remove_shifts_down() -> Result<()> {
    let (_dir, m) = tmp();
    let elems: Vec<Value> = (1..=4).map(Value::Int).collect();
    m.set(&Value::Int(0), &Value::list(elems))?;
    let l = m.get(&Value::Int(0))?;
    let l = l.as_list_ref().expect("list handle");
    l.remove(1)?;
    assert_eq!(
        l.eager()?,
        Value::list(vec![Value::Int(1), Value::Int(3), Value::Int(4)])
    );
    Ok(())
}

#[test]
fn test_tuple_membership() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(
        &Value::Int(0),
        &Value::tuple(vec![Value::Int(1), Value::from("x"), Value::Int(1)]),
    )?;
    let t = m.get(&Value::Int(0))?;
    let t = t.as_tuple_ref().expect("tuple handle");
    assert_eq!(t.index(&Value::Int(1))?, Some(0));
    assert_eq!(t.count(&Value::Int(1))?, 2);
    assert!(t.contains(&Value::from("x"))?);
    assert_eq!(t.index(&Value::from("y"))?, None);
    Ok(())
}

#[test]
fn test_membership_shortcut_on_handles() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(&Value::Int(1), &Value::tuple(vec![Value::from("deep")]))?;
    let inner = m.get(&Value::Int(1))?;
    m.set(
        &Value::Int(0),
        &Value::list(vec![Value::Int(7), inner.clone()]),
    )?;
    let l = m.get(&Value::Int(0))?;
    let l = l.as_list_ref().expect("list handle");
    assert_eq!(l.index(&inner)?, Some(1));
    assert_eq!(l.count(&inner)?, 1);
    Ok(())
}

#[test]
fn test_handle_compares_to_itself() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(&Value::Int(0), &Value::tuple(vec![Value::Int(1)]))?;
    let a = m.get(&Value::Int(0))?;
    let b = m.get(&Value::Int(0))?;
    assert_eq!(a, b);
    assert_eq!(a.partial_cmp(&b), Some(std::cmp::Ordering::Equal));
    assert!(a <= b);
    assert!(a >= b);
    assert!(!(a < b));
    assert!(!(a > b));
    Ok(())
}

#[test]
fn test_transaction_groups_writes() -> Result<()> {
    let (_dir, m) = tmp();
    let txn = m.transaction()?;
    m.set(&Value::from("a"), &Value::Int(1))?;
    m.set(&Value::from("b"), &Value::Int(2))?;
    txn.commit()?;
    assert_eq!(m.len()?, 2);
    Ok(())
}

#[test]
fn test_transaction_aborts_on_drop() -> Result<()> {
    let (_dir, m) = tmp();
    {
        let _txn = m.transaction()?;
        m.set(&Value::from("a"), &Value::Int(1))?;
    }
    assert_eq!(m.len()?, 0);
    assert_eq!(
        m.get(&Value::from("a")).unwrap_err().kind(),
        ErrorKind::KeyNotFound
    );
    Ok(())
}

#[test]
fn test_reopen_reads_back() -> Result<()> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("m.silt");
    {
        let m = Store::open(&path)?;
        m.set(&Value::from("k"), &Value::Int(42))?;
    }
    let m = Store::open(&path)?;
    assert_eq!(m.get(&Value::from("k"))?, Value::Int(42));
    Ok(())
}

#[test]
fn test_keys_lists_every_entry() -> Result<()> {
    let (_dir, m) = tmp();
    m.set(&Value::Int(1), &Value::Null)?;
    m.set(&Value::from("a"), &Value::Null)?;
    let keys = m.keys()?;
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&Value::Int(1)));
    assert!(keys.contains(&Value::from("a")));
    Ok(())
}

#[test]
fn test_corrupt_tag_surfaces() -> Result<()> {
    let (_dir, m) = tmp();
    {
        let txn = m.inner.db.begin_write()?;
        {
            let mut root = txn.open_table(tables::ROOT)?;
            let key = [1u8, 7, 0, 0, 0, 0, 0, 0, 0];
            let bogus = [42u8, 0, 0, 0, 0, 0, 0, 0, 0];
            root.insert(&key[..], &bogus[..])?;
        }
        txn.commit()?;
    }
    let e = m.get(&Value::Int(7)).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::CorruptTag);
    Ok(())
}

#[test]
fn test_delete_missing_key() {
    let (_dir, m) = tmp();
    let e = m.delete(&Value::from("missing")).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::KeyNotFound);
}

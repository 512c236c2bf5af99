use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::ToPrimitive;
use ordered_float::OrderedFloat;

use silt_base::Result;

use crate::handle::{DictRef, Handle, ListRef, TupleRef};
use crate::slot::Slot;

/// Any value the store can hold, as a tagged sum over the wire variants.
///
/// Tuples are deeply immutable. Lists and dicts are mutable and carry
/// reference identity in their `Rc`: two clones of one `Value::List` are the
/// same object, and a write that sees them twice stores them once. The
/// `*Ref` variants are lazy read-through handles bound to data already on
/// disk.
///
/// The store is single-writer and single-threaded by design, hence `Rc`.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Big(BigInt),
    Float(OrderedFloat<f64>),
    Str(String),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Rc<RefCell<Vec<(Value, Value)>>>),
    TupleRef(TupleRef),
    ListRef(ListRef),
    DictRef(DictRef),
}

impl Value {
    pub fn tuple(elems: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(elems))
    }

    pub fn list(elems: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(elems)))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    /// Dereferences a handle one level; non-handles clone through unchanged.
    pub fn eager(&self) -> Result<Value> {
        match self {
            Value::TupleRef(h) => h.eager(),
            Value::ListRef(h) => h.eager(),
            Value::DictRef(h) => h.eager(),
            v => Ok(v.clone()),
        }
    }

    pub fn as_tuple_ref(&self) -> Option<&TupleRef> {
        match self {
            Value::TupleRef(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_list_ref(&self) -> Option<&ListRef> {
        match self {
            Value::ListRef(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_dict_ref(&self) -> Option<&DictRef> {
        match self {
            Value::DictRef(h) => Some(h),
            _ => None,
        }
    }

    /// The `(store identity, encoded slot)` fingerprint of a handle.
    pub(crate) fn handle_slot(&self) -> Option<(usize, Slot)> {
        match self {
            Value::TupleRef(h) => Some((h.store.ptr_id(), h.slot())),
            Value::ListRef(h) => Some((h.store.ptr_id(), h.slot())),
            Value::DictRef(h) => Some((h.store.ptr_id(), h.slot())),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(OrderedFloat(v))
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Value {
        Value::Big(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Str(v)
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

// Dicts compare as unordered collections of pairs.
fn dict_eq(a: &[(Value, Value)], b: &[(Value, Value)]) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
        && b.iter()
            .all(|(k, v)| a.iter().any(|(k2, v2)| k == k2 && v == v2))
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        // Handles compare by fingerprint: same store, same slot. A handle
        // against anything else dereferences; a dereference that fails makes
        // the comparison false rather than wedging equality on IO.
        match (self.handle_slot(), other.handle_slot()) {
            (Some(a), Some(b)) => return a == b,
            (None, None) => {}
            _ => {
                return match (self.eager(), other.eager()) {
                    (Ok(a), Ok(b)) => a == b,
                    _ => false,
                }
            }
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // A big integer that fits in 64 bits is the same wire value as
            // the small form, so the two kinds compare numerically.
            (Value::Int(a), Value::Big(b)) | (Value::Big(b), Value::Int(a)) => {
                b.to_i64() == Some(*a)
            }
            (Value::Big(a), Value::Big(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Dict(a), Value::Dict(b)) => {
                Rc::ptr_eq(a, b) || dict_eq(&a.borrow(), &b.borrow())
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

fn seq_cmp(a: &[Value], b: &[Value]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.partial_cmp(y)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(a.len().cmp(&b.len()))
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        // Two handles naming the same rows are equal without deserializing.
        // Two distinct handles are never `==`, so an `Equal` answer from
        // their contents would contradict equality; report them unordered
        // instead.
        let mut equal_means_unordered = false;
        if let (Some(a), Some(b)) = (self.handle_slot(), other.handle_slot()) {
            if a == b {
                return Some(Ordering::Equal);
            }
            equal_means_unordered = true;
        }
        let a = self.eager().ok()?;
        let b = other.eager().ok()?;
        let ord = match (&a, &b) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(x), Value::Bool(y)) => x.partial_cmp(y),
            (Value::Int(x), Value::Int(y)) => x.partial_cmp(y),
            (Value::Int(x), Value::Big(y)) => BigInt::from(*x).partial_cmp(y),
            (Value::Big(x), Value::Int(y)) => x.partial_cmp(&BigInt::from(*y)),
            (Value::Big(x), Value::Big(y)) => x.partial_cmp(y),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
            (Value::Str(x), Value::Str(y)) => x.partial_cmp(y),
            (Value::Tuple(x), Value::Tuple(y)) => seq_cmp(x, y),
            (Value::List(x), Value::List(y)) => {
                if Rc::ptr_eq(x, y) {
                    Some(Ordering::Equal)
                } else {
                    seq_cmp(&x.borrow(), &y.borrow())
                }
            }
            // Everything else, dicts and cross-kind pairs included, is
            // unordered. Note this keeps 1 and 1.0 unordered as well: they
            // are distinct wire values, so ordering them Equal would
            // contradict equality.
            _ => None,
        };
        if equal_means_unordered && ord == Some(Ordering::Equal) {
            return None;
        }
        ord
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: char,
    elems: &[Value],
    close: char,
) -> fmt::Result {
    write!(f, "{open}")?;
    for (i, e) in elems.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{e}")?;
    }
    write!(f, "{close}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Big(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::Tuple(elems) => write_seq(f, '(', elems, ')'),
            Value::List(elems) => write_seq(f, '[', &elems.borrow(), ']'),
            Value::Dict(pairs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in pairs.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::TupleRef(h) => match h.eager() {
                Ok(v) => write!(f, "{v}"),
                Err(_) => write!(f, "<tuple ?>"),
            },
            Value::ListRef(h) => match h.eager() {
                Ok(v) => write!(f, "{v}"),
                Err(_) => write!(f, "<list ?>"),
            },
            Value::DictRef(h) => match h.eager() {
                Ok(v) => write!(f, "{v}"),
                Err(_) => write!(f, "<dict ?>"),
            },
        }
    }
}

// Top level client crate: one import surface over the workspace for library
// users, and the home of the `silt` command-line tool.

pub use silt_base::{err, Error, ErrorKind, Result};
pub use silt_store::{DictRef, Handle, ListRef, Options, Store, Transaction, TupleRef, Value};

// We want a few things here:
// 1. A way to create a new error with a backtrace
// 2. A way to centralize setting a breakpoint to trap any error in the system fairly soon
//    after it's created (or at least when it's propagated from a library we use back to us)
// 3. Same but for logging / emitting error messages into the tracing/logging system
// 4. A kind the caller can match on, since a missing key is an answer while a corrupt
//    record or a digest collision is a halt

use std::borrow::Cow;

use backtrace_error::DynBacktraceError;
use tracing::{debug, error};

#[cfg(test)]
use test_log::test;

/// Classifies every error the store surfaces. Only `KeyNotFound` and
/// `IndexOutOfRange` are recoverable; everything else aborts the in-flight
/// transaction and propagates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `get` or `delete` on a missing top-level or dict key.
    KeyNotFound,
    /// Positional access outside `0..len` after normalisation.
    IndexOutOfRange,
    /// A runtime kind the codec does not know how to encode.
    UnsupportedType,
    /// A mutable compound reached the codec with no write transaction open.
    MutableWithoutWrite,
    /// A stored slot carried a tag outside the wire table.
    CorruptTag,
    /// A stored slot or record violated the format invariants.
    CorruptRecord,
    /// A content-addressed insert observed differing bytes under one digest.
    HashCollision,
    /// The engine reported the backing device out of space.
    StorageFull,
    /// Any other failure surfaced from the KV engine.
    StorageIo,
}

impl ErrorKind {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorKind::KeyNotFound | ErrorKind::IndexOutOfRange)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    #[allow(dead_code)]
    inner: DynBacktraceError,
}

pub type Result<T> = std::result::Result<T, Error>;

struct SimpleErr(Cow<'static, str>);
impl std::fmt::Debug for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::fmt::Display for SimpleErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for SimpleErr {}

impl Error {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(kind: ErrorKind, err: E) -> Error {
        if kind.is_recoverable() {
            debug!(target: "silt", "{:?}: {:?}", kind, err);
        } else {
            error!(target: "silt", "{:?}: {:?}", kind, err);
        }
        let inner = DynBacktraceError::from(err);
        Error { kind, inner }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub fn err(kind: ErrorKind, msg: impl Into<Cow<'static, str>>) -> Error {
    Error::new(kind, SimpleErr(msg.into()))
}

// The KV engine's error family maps in here so that `?` works throughout the
// store. Everything is StorageIo except a genuinely full backing device.

fn storage_kind(e: &redb::StorageError) -> ErrorKind {
    match e {
        redb::StorageError::Io(io) if io.kind() == std::io::ErrorKind::StorageFull => {
            ErrorKind::StorageFull
        }
        _ => ErrorKind::StorageIo,
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Error {
        Error::new(storage_kind(&e), e)
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Error {
        let kind = match &e {
            redb::DatabaseError::Storage(s) => storage_kind(s),
            _ => ErrorKind::StorageIo,
        };
        Error::new(kind, e)
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Error {
        let kind = match &e {
            redb::TransactionError::Storage(s) => storage_kind(s),
            _ => ErrorKind::StorageIo,
        };
        Error::new(kind, e)
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Error {
        let kind = match &e {
            redb::TableError::Storage(s) => storage_kind(s),
            _ => ErrorKind::StorageIo,
        };
        Error::new(kind, e)
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Error {
        let kind = match &e {
            redb::CommitError::Storage(s) => storage_kind(s),
            _ => ErrorKind::StorageIo,
        };
        Error::new(kind, e)
    }
}

#[test]
fn test_error() {
    let miss = err(ErrorKind::KeyNotFound, "test error");
    assert!(miss.kind().is_recoverable());
    let bad = err(ErrorKind::CorruptRecord, "test error");
    assert!(!bad.kind().is_recoverable());
}

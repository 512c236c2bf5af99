use silt_base::{err, ErrorKind, Result};

// Wire tag constants. These are normative: a file written by one build must
// read identically on any other host of the same endianness (every multi-byte
// field on the wire is little-endian).
pub(crate) const TAG_SINGLETON: u8 = 0;
pub(crate) const TAG_INT: u8 = 1;
pub(crate) const TAG_BIG_INT: u8 = 2;
pub(crate) const TAG_FLOAT: u8 = 3;
pub(crate) const TAG_SHORT_STR: u8 = 4;
pub(crate) const TAG_LONG_STR: u8 = 5;
pub(crate) const TAG_TUPLE: u8 = 7;
pub(crate) const TAG_LIST: u8 = 9;
pub(crate) const TAG_DICT: u8 = 11;

// Singleton table indices. The table is identical on every instance, so the
// index alone names the value. Index 3 is the empty tuple, which therefore
// never produces a tuple record.
pub(crate) const SINGLETON_NULL: u64 = 0;
pub(crate) const SINGLETON_TRUE: u64 = 1;
pub(crate) const SINGLETON_FALSE: u64 = 2;
pub(crate) const SINGLETON_EMPTY_TUPLE: u64 = 3;

pub(crate) const SLOT_LEN: usize = 9;

/// One encoded value: a tag byte followed by an 8-byte payload. Every field
/// of every compound is one slot, so positional access never has to parse
/// siblings.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct Slot(pub(crate) [u8; SLOT_LEN]);

impl Slot {
    pub(crate) fn new(tag: u8, payload: [u8; 8]) -> Self {
        let mut bytes = [0u8; SLOT_LEN];
        bytes[0] = tag;
        bytes[1..].copy_from_slice(&payload);
        Slot(bytes)
    }

    pub(crate) fn from_u64(tag: u8, payload: u64) -> Self {
        Slot::new(tag, payload.to_le_bytes())
    }

    pub(crate) fn parse(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SLOT_LEN] = bytes.try_into().map_err(|_| {
            err(
                ErrorKind::CorruptRecord,
                format!("slot must be {} bytes, got {}", SLOT_LEN, bytes.len()),
            )
        })?;
        Ok(Slot(bytes))
    }

    pub(crate) fn tag(&self) -> u8 {
        self.0[0]
    }

    pub(crate) fn payload(&self) -> [u8; 8] {
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&self.0[1..]);
        payload
    }

    pub(crate) fn payload_u64(&self) -> u64 {
        u64::from_le_bytes(self.payload())
    }

    /// The allocated id in the low four payload bytes of a list or dict slot.
    pub(crate) fn compound_id(&self) -> u32 {
        let mut id = [0u8; 4];
        id.copy_from_slice(&self.0[1..5]);
        u32::from_le_bytes(id)
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

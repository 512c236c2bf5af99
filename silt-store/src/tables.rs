use rand::Rng;
use redb::{ReadableTable, Table, TableDefinition, WriteTransaction};
use silt_base::{err, ErrorKind, Result};

// Five named tables inside the one backing file. `root` maps encoded key
// slots to encoded value slots; the other four are the side tables the
// compound tags point into. `ints`, `strings` and tuple records in `lists`
// are content-addressed under an 8-byte digest; list rows and dict entries
// are identity-addressed under an allocated 4-byte id.
pub(crate) const ROOT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("root");
pub(crate) const INTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ints");
pub(crate) const STRINGS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("strings");
pub(crate) const LISTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("lists");
pub(crate) const DICTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("dicts");

/// Index value that marks a list's length row. No element row can use it.
pub(crate) const LIST_LEN_INDEX: u32 = u32::MAX;

pub(crate) fn digest(bytes: &[u8]) -> [u8; 8] {
    rapidhash::rapidhash(bytes).to_le_bytes()
}

/// Content-addressed no-overwrite insert: identical bytes store once. A
/// digest already mapped to different bytes is fatal.
pub(crate) fn intern(
    table: &mut Table<&'static [u8], &'static [u8]>,
    bytes: &[u8],
) -> Result<[u8; 8]> {
    let key = digest(bytes);
    let existing = table.get(key.as_slice())?.map(|rec| rec.value() == bytes);
    match existing {
        Some(true) => {}
        Some(false) => {
            return Err(err(
                ErrorKind::HashCollision,
                "content digest maps to differing record bytes",
            ))
        }
        None => {
            table.insert(key.as_slice(), bytes)?;
        }
    }
    Ok(key)
}

/// Draws random 4-byte list ids until one reads absent. A list's one
/// guaranteed row is its length row, so that is the occupancy probe; the
/// 8-byte probe key also keeps a fresh id clear of any tuple digest. The
/// probe runs inside the surrounding write transaction, so ids taken earlier
/// in the same transaction are seen as occupied.
pub(crate) fn alloc_list_id(txn: &WriteTransaction) -> Result<u32> {
    let table = txn.open_table(LISTS)?;
    let mut rng = rand::thread_rng();
    loop {
        let id: u32 = rng.gen();
        if table.get(list_len_key(id).as_slice())?.is_none() {
            return Ok(id);
        }
    }
}

/// Same for dict ids; a dict's guaranteed row is the length cell at the bare
/// 4-byte id.
pub(crate) fn alloc_dict_id(txn: &WriteTransaction) -> Result<u32> {
    let table = txn.open_table(DICTS)?;
    let mut rng = rand::thread_rng();
    loop {
        let id: u32 = rng.gen();
        if table.get(&id.to_le_bytes()[..])?.is_none() {
            return Ok(id);
        }
    }
}

pub(crate) fn list_row_key(id: u32, index: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&id.to_le_bytes());
    key[4..].copy_from_slice(&index.to_le_bytes());
    key
}

pub(crate) fn list_len_key(id: u32) -> [u8; 8] {
    list_row_key(id, LIST_LEN_INDEX)
}

// A persistent, file-backed associative container for structured data that
// exceeds RAM. Callers use it like an in-memory dictionary; the bytes live in
// one on-disk file behind an embedded transactional KV engine.
//
// Every value encodes to a uniform 9-byte slot: one tag byte, eight payload
// bytes, little-endian throughout:
//
// - tag 0: singleton index (null, true, false, empty tuple)
// - tag 1: i64, inline
// - tag 2: big integer, content digest into `ints`
// - tag 3: f64, inline
// - tag 4: string of <= 8 bytes, inline, zero-padded
// - tag 5: longer string, content digest into `strings`
// - tag 7: tuple, content digest into `lists` (4-byte length, then slots)
// - tag 9: list, allocated 4-byte id; rows at `id ‖ index`, length row at
//          `id ‖ 0xffffffff`
// - tag 11: dict, allocated 4-byte id; entries at `id ‖ key-slot`, entry
//           count at the bare id
//
// The fixed slot width is what makes the format compose: a tuple record is a
// plain concatenation of slots, element i of anything is at a position or
// key computable from i alone, and nothing ever parses its siblings.
//
// Immutable compounds are content-addressed, so identical content stores
// once. Mutable compounds are identity-addressed: a write-scoped identity
// map records each host object's allocated id before its children are
// descended, which makes shared references store once and self-referential
// structures terminate.
//
// Reads come back lazy: a compound decodes to a handle carrying (store, key)
// and fetches elements on demand, so touching one element of a deeply
// nested structure never materialises the whole thing.

mod codec;
mod handle;
mod slot;
mod store;
mod tables;
mod value;

#[cfg(test)]
mod test;

pub use handle::{DictRef, Handle, ListRef, TupleRef};
pub use store::{Options, Store, Transaction};
pub use value::Value;

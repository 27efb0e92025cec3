//! The rocksdb-backed store of the GSP node, plus the journaling
//! transaction used for block processing.

pub(crate) mod schema;

use rocksdb::{DBCompressionType, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Store {
    db: Arc<DB>,
}

impl Store {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_compression_type(DBCompressionType::Lz4);
        let db = Arc::new(DB::open(&options, path).map_err(|e| e.to_string())?);
        Ok(Self { db })
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Option<Vec<u8>> {
        self.db.get(key.as_ref()).expect("get should be OK")
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) {
        self.db.put(key, value).expect("put should be OK")
    }

    pub fn delete<K: AsRef<[u8]>>(&self, key: K) {
        self.db.delete(key).expect("delete should be OK")
    }

    /// Iterates all entries whose key starts with the given prefix.
    pub fn prefix_iterator<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a {
        self.db
            .iterator(IteratorMode::From(prefix, Direction::Forward))
            .map(|item| item.expect("store iterator should be OK"))
            .take_while(move |(key, _)| key.starts_with(prefix))
    }
}

pub(crate) fn serialize_to_vec<T: ?Sized + Serialize>(value: &T, field_name: &str) -> Vec<u8> {
    bincode::serialize(value)
        .unwrap_or_else(|e| panic!("serialization of {} failed: {}", field_name, e))
}

pub(crate) fn deserialize_from<'a, T>(slice: &'a [u8], field_name: &str) -> T
where
    T: serde::Deserialize<'a>,
{
    bincode::deserialize(slice)
        .unwrap_or_else(|e| panic!("deserialization of {} failed: {}", field_name, e))
}

/// Pre-images of every key a block transaction touched, in touch order.
/// Applying them in reverse returns the store to the byte-identical state
/// from before the block.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UndoRecord {
    pub entries: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl UndoRecord {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Write access to the store scoped to one block. Records the pre-image of
/// every key on first touch; the collected [`UndoRecord`] reverts the
/// whole block.
pub struct BlockTransaction<'a> {
    store: &'a Store,
    touched: HashSet<Vec<u8>>,
    undo: UndoRecord,
}

impl<'a> BlockTransaction<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            touched: HashSet::new(),
            undo: UndoRecord::default(),
        }
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    fn journal(&mut self, key: &[u8]) {
        if self.touched.insert(key.to_vec()) {
            self.undo
                .entries
                .push((key.to_vec(), self.store.get(key)));
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.store.get(key)
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.journal(key);
        self.store.put(key, value);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.journal(key);
        self.store.delete(key);
    }

    pub fn prefix_iterator<'b>(
        &'b self,
        prefix: &'b [u8],
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'b {
        self.store.prefix_iterator(prefix)
    }

    pub fn into_undo(self) -> UndoRecord {
        self.undo
    }
}

/// Restores the pre-images recorded for a block, newest touch first.
pub fn apply_undo(store: &Store, undo: &UndoRecord) {
    for (key, value) in undo.entries.iter().rev() {
        match value {
            Some(value) => store.put(key, value),
            None => store.delete(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::new(dir.path()).expect("open store");
        (dir, store)
    }

    #[test]
    fn put_get_delete() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get(b"key"), None);
        store.put(b"key", b"value");
        assert_eq!(store.get(b"key"), Some(b"value".to_vec()));
        store.delete(b"key");
        assert_eq!(store.get(b"key"), None);
    }

    #[test]
    fn prefix_iteration_stays_in_prefix() {
        let (_dir, store) = temp_store();
        store.put([0u8, 1], b"a");
        store.put([0u8, 2], b"b");
        store.put([1u8, 0], b"c");

        let entries: Vec<_> = store.prefix_iterator(&[0u8]).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(&*entries[0].1, b"a");
        assert_eq!(&*entries[1].1, b"b");
    }

    #[test]
    fn undo_restores_bit_identical_state() {
        let (_dir, store) = temp_store();
        store.put(b"kept", b"before");
        store.put(b"deleted", b"gone");

        let mut txn = BlockTransaction::new(&store);
        txn.put(b"kept", b"after");
        txn.put(b"kept", b"after again");
        txn.delete(b"deleted");
        txn.put(b"created", b"new");
        let undo = txn.into_undo();

        assert_eq!(store.get(b"kept"), Some(b"after again".to_vec()));
        assert_eq!(store.get(b"deleted"), None);
        assert_eq!(store.get(b"created"), Some(b"new".to_vec()));

        apply_undo(&store, &undo);
        assert_eq!(store.get(b"kept"), Some(b"before".to_vec()));
        assert_eq!(store.get(b"deleted"), Some(b"gone".to_vec()));
        assert_eq!(store.get(b"created"), None);
    }

    #[test]
    fn undo_record_round_trips_through_bincode() {
        let undo = UndoRecord {
            entries: vec![
                (b"a".to_vec(), Some(b"1".to_vec())),
                (b"b".to_vec(), None),
            ],
        };
        let bytes = serialize_to_vec(&undo, "undo");
        let decoded: UndoRecord = deserialize_from(&bytes, "undo");
        assert_eq!(decoded, undo);
    }
}

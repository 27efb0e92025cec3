//! Key space of the GSP store.
//!
//! +--------------+----------------------+---------------------+
//! | KeyPrefix::  | Key::                | Value::             |
//! +--------------+----------------------+---------------------+
//! | 0            | ChannelId            | ChannelRow          |
//! | 16           | name (utf-8)         | StatsRow            |
//! | 32           | height (u64 BE)      | UndoRow             |
//! | 240          | -                    | TipRow              |
//! +--------------+----------------------+---------------------+

pub(crate) const CHANNEL_PREFIX: u8 = 0;
pub(crate) const STATS_PREFIX: u8 = 16;
pub(crate) const UNDO_PREFIX: u8 = 32;
pub(crate) const TIP_PREFIX: u8 = 240;

pub(crate) fn channel_key(id: &arena_types::Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(CHANNEL_PREFIX);
    key.extend_from_slice(id.as_ref());
    key
}

pub(crate) fn stats_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len());
    key.push(STATS_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

pub(crate) fn undo_key(height: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(UNDO_PREFIX);
    key.extend_from_slice(&height.to_be_bytes());
    key
}

pub(crate) fn tip_key() -> Vec<u8> {
    vec![TIP_PREFIX]
}

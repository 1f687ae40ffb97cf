//! Builders for container bytes, and an in-memory [Vfs] which counts how often it is opened.
use std::collections::HashMap;
use std::io::{Cursor, Error as IoError, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::*;

pub fn standard_block(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = tag.to_vec();
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn compact_block(tag: &[u8; 2], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 6) as u32).to_le_bytes().to_vec();
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    out
}

pub fn minimal_block(payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 2) as u16).to_le_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

/// Payload of a columnar directory listing.
pub fn columnar_listing(homes: &[u8], offsets: &[u32]) -> Vec<u8> {
    assert_eq!(homes.len(), offsets.len());
    let mut out = (homes.len() as u16).to_le_bytes().to_vec();
    out.extend_from_slice(homes);
    for o in offsets {
        out.extend_from_slice(&o.to_le_bytes());
    }
    out
}

pub fn index_container(records: &[Vec<u8>]) -> Vec<u8> {
    records.concat()
}

fn room_table(rooms: &[(u8, Vec<u8>)], first_room_at: usize) -> Vec<u8> {
    let mut table = vec![rooms.len() as u8];
    let mut offset = first_room_at;
    for (room, data) in rooms {
        table.push(*room);
        table.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += data.len();
    }
    table
}

/// A standard data container: an outer `LECF` block holding a `LOFF` room table, then each room's data region.
pub fn standard_container(rooms: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let loff_len = 8 + 1 + rooms.len() * 5;
    let table = room_table(rooms, 8 + loff_len);
    let mut body = standard_block(b"LOFF", &table);
    for (_, data) in rooms {
        body.extend_from_slice(data);
    }
    standard_block(b"LECF", &body)
}

/// The compact equivalent of [standard_container].
pub fn compact_container(rooms: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let fo_len = 6 + 1 + rooms.len() * 5;
    let table = room_table(rooms, 6 + fo_len);
    let mut body = compact_block(b"FO", &table);
    for (_, data) in rooms {
        body.extend_from_slice(data);
    }
    compact_block(b"LE", &body)
}

pub fn xor(data: &[u8], key: u8) -> Vec<u8> {
    data.iter().map(|b| b ^ key).collect()
}

/// A VFS wrapping a `HashMap` for testing.
pub struct MemoryVfs {
    files: Mutex<HashMap<String, Vec<u8>>>,
    opens: AtomicUsize,
}

impl MemoryVfs {
    pub fn new() -> MemoryVfs {
        MemoryVfs {
            files: Mutex::new(Default::default()),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) -> Option<Vec<u8>> {
        self.files.lock().unwrap().insert(key.to_string(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().remove(key)
    }

    /// How many times a container was successfully opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Vfs for Arc<MemoryVfs> {
    type Reader = Cursor<Vec<u8>>;

    fn open(&self, key: &str) -> Result<Self::Reader, IoError> {
        let ret = self
            .files
            .lock()
            .unwrap()
            .get(key)
            .ok_or_else(|| IoError::new(ErrorKind::NotFound, "Entry not found".to_string()))?
            .clone();
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Cursor::new(ret))
    }
}

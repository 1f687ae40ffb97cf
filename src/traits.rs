//! The seams between the cache and the engine hosting it.
//!
//! - A [Vfs] turns container names into seekable readers.
//! - A [RoomNaming] says which container names might hold a given room.
//! - A [LivenessOracle] says which resources the engine is actively using, so the cache never evicts them.
use std::io::{Cursor, Error, Read, Seek};

use crate::ResourceCategory;

/// "open" a "file" and return a [VfsReader] over it.
pub trait Vfs: 'static {
    type Reader: VfsReader;

    /// Open a container. An error of kind [std::io::ErrorKind::NotFound] means "try the next candidate".
    fn open(&self, key: &str) -> Result<Self::Reader, Error>;
}

/// A reader returned from the VFS.
///
/// Readers should handle closing in their drop implementations.
pub trait VfsReader: Read + Seek + 'static {
    /// Return the total size of the underlying container.
    fn get_size(&self) -> Result<u64, Error>;
}

impl VfsReader for Cursor<Vec<u8>> {
    fn get_size(&self) -> Result<u64, Error> {
        Ok(self.get_ref().len() as u64)
    }
}

/// One container name to try, with the byte every read from it is XORed against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub xor_key: u8,
}

impl Candidate {
    pub fn new(name: impl Into<String>, xor_key: u8) -> Candidate {
        Candidate {
            name: name.into(),
            xor_key,
        }
    }
}

/// Resolve the containers that might hold a room.
///
/// `disk` is the container number the directory recorded for the room. Candidates are tried in order; an empty list
/// means the room can't be resolved at all.
pub trait RoomNaming {
    fn candidates(&self, room: usize, disk: u8) -> Vec<Candidate>;
}

impl<F: Fn(usize, u8) -> Vec<Candidate>> RoomNaming for F {
    fn candidates(&self, room: usize, disk: u8) -> Vec<Candidate> {
        self(room, disk)
    }
}

/// Host knowledge about which resources are in active use.
///
/// Registered per category with [crate::ResourceCache::set_oracle]. Categories without an oracle are treated as never
/// in use.
pub trait LivenessOracle {
    fn is_in_use(&self, category: ResourceCategory, id: usize) -> bool;
}

impl<F: Fn(ResourceCategory, usize) -> bool> LivenessOracle for F {
    fn is_in_use(&self, category: ResourceCategory, id: usize) -> bool {
        self(category, id)
    }
}

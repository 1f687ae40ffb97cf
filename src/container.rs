//! Tracking which container file is open and which room's data region reads are relative to.
use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};

use ahash::RandomState;
use log::{debug, trace};

use crate::*;

/// Room number of the index container.
pub const INDEX_ROOM: usize = 0;

/// Where the room offset table starts in a data container: right after the outer block's header.
const STANDARD_TABLE_POS: u64 = 8;
const COMPACT_TABLE_POS: u64 = 6;
const ROOM_TABLE_ENTRY_LEN: usize = 5;

/// An open container, decoding its obfuscation on every read.
pub struct ContainerReader<R> {
    inner: R,
    name: String,
    xor_key: u8,
    size: u64,
}

impl<R: VfsReader> ContainerReader<R> {
    fn new(inner: R, candidate: &Candidate) -> Result<ContainerReader<R>> {
        let size = inner.get_size()?;
        Ok(ContainerReader {
            inner,
            name: candidate.name.clone(),
            xor_key: candidate.xor_key,
            size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Fail unless `len` bytes starting at `pos` lie inside the container.
    pub fn check_extent(&self, pos: u64, len: u64) -> Result<()> {
        if pos.checked_add(len).map_or(true, |end| end > self.size) {
            return Err(CacheError::malformed(
                pos,
                format!(
                    "read of {} bytes runs past the end of {} ({} bytes)",
                    len, self.name, self.size
                ),
            ));
        }
        Ok(())
    }

    /// Fill `buf` from absolute position `pos`. Reading past the end of the container is corruption, not EOF.
    pub fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> Result<()> {
        self.check_extent(pos, buf.len() as u64)?;

        self.inner.seek(SeekFrom::Start(pos))?;
        self.inner.read_exact(buf)?;
        if self.xor_key != 0 {
            for b in buf.iter_mut() {
                *b ^= self.xor_key;
            }
        }
        Ok(())
    }

    pub fn read_vec(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        self.check_extent(pos, len as u64)?;
        let mut out = vec![0; len];
        self.read_at(pos, &mut out)?;
        Ok(out)
    }
}

/// Keeps the container holding the active room open.
///
/// At most one container is open at a time. Data containers start with a table mapping every room they hold to the
/// offset of its data region, so moving between rooms of the same container doesn't reopen anything.
pub struct ContainerLocator<VfsImpl: Vfs, NamingImpl: RoomNaming> {
    vfs: VfsImpl,
    naming: NamingImpl,
    format: ContainerFormat,
    open: Option<ContainerReader<VfsImpl::Reader>>,
    active_room: Option<usize>,
    /// Rooms held by the open container, mapped to their data region offsets.
    room_offsets: HashMap<usize, u32, RandomState>,
    data_base: u64,
}

impl<VfsImpl: Vfs, NamingImpl: RoomNaming> ContainerLocator<VfsImpl, NamingImpl> {
    pub fn new(
        vfs: VfsImpl,
        naming: NamingImpl,
        format: ContainerFormat,
    ) -> ContainerLocator<VfsImpl, NamingImpl> {
        ContainerLocator {
            vfs,
            naming,
            format,
            open: None,
            active_room: None,
            room_offsets: Default::default(),
            data_base: 0,
        }
    }

    pub fn format(&self) -> ContainerFormat {
        self.format
    }

    pub fn active_room(&self) -> Option<usize> {
        self.active_room
    }

    /// Absolute offset of the active room's data region.
    pub fn data_base(&self) -> u64 {
        self.data_base
    }

    pub fn container_name(&self) -> Option<&str> {
        self.open.as_ref().map(|c| c.name())
    }

    pub fn room_offsets(&self) -> &HashMap<usize, u32, RandomState> {
        &self.room_offsets
    }

    pub fn vfs(&self) -> &VfsImpl {
        &self.vfs
    }

    /// Close the open container, if any, and forget its room table.
    pub fn close(&mut self) {
        if let Some(c) = self.open.take() {
            debug!("Closing {}", c.name());
        }
        self.active_room = None;
        self.room_offsets.clear();
        self.data_base = 0;
    }

    /// Make `room`'s data region the target of subsequent reads. `disk` is the container number the directory gave
    /// for the room.
    ///
    /// Entering the active room again does nothing. A [CacheError::NotFound] leaves no container open; the caller
    /// can ask for other media and call this again.
    pub fn enter_room(&mut self, room: usize, disk: u8) -> Result<()> {
        if self.active_room == Some(room) {
            return Ok(());
        }

        if room != INDEX_ROOM && self.open.is_some() {
            if let Some(&base) = self.room_offsets.get(&room) {
                trace!("Room {} is also in {}", room, self.container_name().unwrap_or(""));
                self.active_room = Some(room);
                self.data_base = base as u64;
                return Ok(());
            }
        }

        debug!("Opening room {} (disk {})", room, disk);
        self.close();

        let candidates = self.naming.candidates(room, disk);
        let mut opened = None;
        for c in candidates.iter() {
            match self.vfs.open(&c.name) {
                Ok(r) => {
                    opened = Some(ContainerReader::new(r, c)?);
                    break;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    trace!("{} not found", c.name);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let reader = opened.ok_or_else(|| CacheError::NotFound {
            room,
            candidates: candidates.into_iter().map(|c| c.name).collect(),
        })?;
        debug!("Opened {} for room {}", reader.name(), room);
        self.open = Some(reader);

        let base = if room == INDEX_ROOM {
            0
        } else {
            self.read_room_offsets()?;
            match self.format {
                ContainerFormat::Minimal => 0,
                _ => *self.room_offsets.get(&room).ok_or_else(|| CacheError::RoomNotInContainer {
                    room,
                    container: self.container_name().unwrap_or("").to_string(),
                })?,
            }
        };

        self.active_room = Some(room);
        self.data_base = base as u64;
        Ok(())
    }

    fn reader(&mut self) -> &mut ContainerReader<VfsImpl::Reader> {
        self.open
            .as_mut()
            .expect("A room must be entered before reading")
    }

    /// Parse the open container's room table.
    fn read_room_offsets(&mut self) -> Result<()> {
        let format = self.format;
        let table_pos = match format {
            ContainerFormat::Standard => STANDARD_TABLE_POS,
            ContainerFormat::Compact => COMPACT_TABLE_POS,
            ContainerFormat::Minimal => return Ok(()),
        };

        let header_len = format.header_len();
        let reader = self.reader();
        let head = reader.read_vec(table_pos, header_len)?;
        let header = BlockHeader::parse(format, &head).expect("Read a full header");
        if !header.has_tag(Tag::new(b"LOFF")) {
            return Err(CacheError::malformed(
                table_pos,
                format!("{} has no room offset table", reader.name()),
            ));
        }

        let length = header.length as usize;
        if length <= header_len {
            return Err(CacheError::malformed(table_pos, "empty room offset table"));
        }
        let body = reader.read_vec(table_pos + header_len as u64, length - header_len)?;
        let count = body[0] as usize;
        if 1 + count * ROOM_TABLE_ENTRY_LEN > body.len() {
            return Err(CacheError::malformed(
                table_pos,
                format!("room offset table lists {} rooms in {} bytes", count, body.len()),
            ));
        }

        for entry in body[1..1 + count * ROOM_TABLE_ENTRY_LEN].chunks(ROOM_TABLE_ENTRY_LEN) {
            let offset = u32::from_le_bytes([entry[1], entry[2], entry[3], entry[4]]);
            self.room_offsets.insert(entry[0] as usize, offset);
        }
        trace!("Room table lists {} rooms", count);
        Ok(())
    }

    /// Read from the active room's data region.
    pub fn read_in_room(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let pos = self.data_base + offset;
        self.reader().read_at(pos, buf)
    }

    /// Fail unless `len` bytes at `offset` in the active room's data region lie inside the open container.
    pub fn check_in_room(&self, offset: u64, len: u64) -> Result<()> {
        let pos = self.data_base + offset;
        self.open
            .as_ref()
            .expect("A room must be entered before reading")
            .check_extent(pos, len)
    }

    pub fn read_vec_in_room(&mut self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let pos = self.data_base + offset;
        self.reader().read_vec(pos, len)
    }

    /// The whole open container.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let reader = self.reader();
        let size = reader.size() as usize;
        reader.read_vec(0, size)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::*;

    fn naming(room: usize, disk: u8) -> Vec<Candidate> {
        if room == 0 {
            vec![Candidate::new("index", 0)]
        } else {
            vec![
                Candidate::new(format!("missing.{}", disk), 0),
                Candidate::new(format!("disk.{}", disk), 0x69),
            ]
        }
    }

    fn locator(
        format: ContainerFormat,
    ) -> (
        Arc<MemoryVfs>,
        ContainerLocator<Arc<MemoryVfs>, fn(usize, u8) -> Vec<Candidate>>,
    ) {
        let vfs = Arc::new(MemoryVfs::new());
        (
            vfs.clone(),
            ContainerLocator::new(vfs, naming as fn(usize, u8) -> Vec<Candidate>, format),
        )
    }

    #[test]
    fn test_enter_room_is_idempotent() {
        let (vfs, mut loc) = locator(ContainerFormat::Standard);
        vfs.insert("disk.1", xor(&standard_container(&[(3, vec![1, 2, 3])]), 0x69));

        loc.enter_room(3, 1).unwrap();
        let opens = vfs.opens();
        let table = loc.room_offsets().clone();
        loc.enter_room(3, 1).unwrap();

        assert_eq!(vfs.opens(), opens);
        assert_eq!(loc.room_offsets(), &table);
        assert_eq!(loc.active_room(), Some(3));

        let mut buf = [0; 3];
        loc.read_in_room(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
    }

    #[test]
    fn test_rooms_sharing_a_container() {
        let (vfs, mut loc) = locator(ContainerFormat::Standard);
        vfs.insert(
            "disk.1",
            xor(&standard_container(&[(1, vec![10; 4]), (2, vec![20; 4])]), 0x69),
        );
        vfs.insert("disk.2", xor(&standard_container(&[(5, vec![50; 4])]), 0x69));

        loc.enter_room(1, 1).unwrap();
        let opens = vfs.opens();
        loc.enter_room(2, 1).unwrap();
        assert_eq!(vfs.opens(), opens);
        assert_eq!(loc.read_vec_in_room(0, 1).unwrap(), vec![20]);

        // A room elsewhere closes this container and forgets its table.
        loc.enter_room(5, 2).unwrap();
        assert_eq!(loc.container_name(), Some("disk.2"));
        assert!(!loc.room_offsets().contains_key(&1));
        assert_eq!(loc.read_vec_in_room(0, 1).unwrap(), vec![50]);
    }

    #[test]
    fn test_missing_container() {
        let (_, mut loc) = locator(ContainerFormat::Standard);
        match loc.enter_room(4, 9) {
            Err(CacheError::NotFound { room, candidates }) => {
                assert_eq!(room, 4);
                assert_eq!(candidates, vec!["missing.9".to_string(), "disk.9".to_string()]);
            }
            other => panic!("Expected NotFound, got {:?}", other.map(|_| ())),
        }
        assert!(loc.container_name().is_none());
        assert!(loc.active_room().is_none());
    }

    #[test]
    fn test_room_not_in_container() {
        let (vfs, mut loc) = locator(ContainerFormat::Standard);
        vfs.insert("disk.1", xor(&standard_container(&[(1, vec![0])]), 0x69));
        assert!(matches!(
            loc.enter_room(2, 1),
            Err(CacheError::RoomNotInContainer { room: 2, .. })
        ));
    }

    #[test]
    fn test_compact_room_table() {
        let (vfs, mut loc) = locator(ContainerFormat::Compact);
        vfs.insert(
            "disk.1",
            xor(&compact_container(&[(7, vec![7; 2]), (8, vec![8; 2])]), 0x69),
        );
        loc.enter_room(8, 1).unwrap();
        assert_eq!(loc.read_vec_in_room(0, 2).unwrap(), vec![8, 8]);
        assert_eq!(loc.room_offsets().len(), 2);
    }

    #[test]
    fn test_index_room_reads_whole_file() {
        let (vfs, mut loc) = locator(ContainerFormat::Standard);
        vfs.insert("index", vec![1, 2, 3, 4]);
        loc.enter_room(INDEX_ROOM, 0).unwrap();
        assert_eq!(loc.data_base(), 0);
        assert_eq!(loc.read_all().unwrap(), vec![1, 2, 3, 4]);
        assert!(matches!(
            loc.read_vec_in_room(2, 4),
            Err(CacheError::MalformedContainer { offset: 2, .. })
        ));
        assert!(loc.check_in_room(0, 4).is_ok());
        assert!(loc.check_in_room(1, u64::MAX).is_err());
        // A huge claimed length fails before anything is allocated.
        assert!(matches!(
            loc.read_vec_in_room(0, usize::MAX),
            Err(CacheError::MalformedContainer { offset: 0, .. })
        ));
    }
}

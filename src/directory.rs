//! Parsing of the bootstrap index container.
//!
//! The index is a flat sequence of records, each a standard block header (4-byte tag, 4-byte big-endian length)
//! followed by a payload. Unlike room containers, the payloads are fixed-width record arrays rather than nested
//! blocks, so they are read by direct arithmetic instead of through the block scanner.
//!
//! A listing record describes one resource category: its element count, then for every element the room it lives in
//! and its offset inside that room. How those two columns are laid out depends on the [DirectoryLayout].
use std::collections::HashMap;
use std::convert::TryInto;

use ahash::RandomState;
use log::{debug, trace};

use crate::*;

/// Offset value marking a resource that has no data on disk.
const ABSENT_OFFSET: u32 = 0xFFFF_FFFF;
const ABSENT_OFFSET_MINIMAL: u16 = 0xFFFF;
const RECORD_HEADER_LEN: usize = 8;
const AUDIO_NAME_LEN: usize = 9;

/// How listing records lay out their per-element columns.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DirectoryLayout {
    /// One-byte count, a room byte column, then 2-byte offsets. Rooms list their own index instead of a disk.
    Minimal,
    /// Two-byte count, then `(room, 4-byte offset)` pairs.
    Interleaved,
    /// Two-byte count, a room byte column, then a 4-byte offset column.
    Columnar,
    /// As [DirectoryLayout::Columnar], followed by a column of explicit 4-byte sizes.
    ColumnarSized,
}

/// Where a resource lives on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Location {
    /// Owning room. For the room category itself this is the disk number holding the room.
    pub home: u8,
    /// Offset of the resource's block inside its room's data region.
    pub offset: u32,
    /// Authoritative payload length, for categories whose block length can't be trusted.
    pub explicit_size: Option<u32>,
}

/// Every element of one category, as the directory describes it. `None` entries have no data on disk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CategoryListing {
    pub category: ResourceCategory,
    /// Tag the category's resources carry in their containers.
    pub tag: Tag,
    pub entries: Vec<Option<Location>>,
}

/// One entry of the global object table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ObjectEntry {
    pub owner: u8,
    pub state: u8,
    pub class_data: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ArrayKind {
    Bit,
    Int,
}

/// An array the game expects to exist before any script runs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ArrayDefinition {
    pub id: u16,
    pub dim_a: u16,
    pub dim_b: u16,
    pub kind: ArrayKind,
}

/// Everything learned from the index container.
#[derive(Debug, Default)]
pub struct DirectoryResult {
    pub listings: HashMap<ResourceCategory, CategoryListing, RandomState>,
    pub objects: Vec<ObjectEntry>,
    pub arrays: Vec<ArrayDefinition>,
    pub audio_names: Vec<String>,
}

/// Bounds-checked little helper for walking record payloads.
struct RecordReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// Absolute offset of `data[0]`, for error reporting.
    base: usize,
}

impl<'a> RecordReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(CacheError::malformed(
                (self.base + self.pos) as u64,
                format!("directory record needs {} more bytes", n),
            ));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("length checked")))
    }

    fn u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("length checked")))
    }
}

/// What a record tag means.
enum RecordKind {
    Listing(ResourceCategory, Tag),
    Objects,
    Arrays,
    AudioNames,
    Skip,
}

fn record_kind(tag: Tag) -> Result<RecordKind> {
    use ResourceCategory::*;

    let kind = match &tag.0 {
        b"DCHR" | b"DIRF" => RecordKind::Listing(Charset, Tag::new(b"CHAR")),
        b"DROO" => RecordKind::Listing(Room, Tag::new(b"ROOM")),
        b"DIRR" => RecordKind::Listing(Room, Tag::new(b"RMDA")),
        b"DRSC" => RecordKind::Listing(RoomScripts, Tag::new(b"RMSC")),
        b"DSCR" | b"DIRS" => RecordKind::Listing(Script, Tag::new(b"SCRP")),
        b"DCOS" | b"DIRC" => RecordKind::Listing(Costume, Tag::new(b"COST")),
        b"DSOU" | b"DIRN" => RecordKind::Listing(Sound, Tag::new(b"SOUN")),
        b"DOBJ" => RecordKind::Objects,
        b"AARY" => RecordKind::Arrays,
        b"ANAM" => RecordKind::AudioNames,
        b"RNAM" | b"DIRM" | b"DIRI" | b"MAXS" | b"DLFL" => RecordKind::Skip,
        _ => return Err(CacheError::UnknownDirectoryBlock(tag)),
    };
    Ok(kind)
}

fn read_listing(
    reader: &mut RecordReader<'_>,
    layout: DirectoryLayout,
    category: ResourceCategory,
) -> Result<Vec<Option<Location>>> {
    let count = match layout {
        DirectoryLayout::Minimal => reader.u8()? as usize,
        _ => reader.u16_le()? as usize,
    };

    let to_location = |home: u8, offset: u32, explicit_size: Option<u32>| {
        if offset == ABSENT_OFFSET {
            None
        } else {
            Some(Location {
                home,
                offset,
                explicit_size,
            })
        }
    };

    let entries = match layout {
        DirectoryLayout::Minimal => {
            let homes = reader.take(count)?;
            let mut out = Vec::with_capacity(count);
            for (i, home) in homes.iter().enumerate() {
                let raw = reader.u16_le()?;
                let offset = if raw == ABSENT_OFFSET_MINIMAL {
                    ABSENT_OFFSET
                } else {
                    raw as u32
                };
                // Rooms in this generation are each their own file.
                let home = if category == ResourceCategory::Room {
                    i as u8
                } else {
                    *home
                };
                out.push(to_location(home, offset, None));
            }
            out
        }
        DirectoryLayout::Interleaved => {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                let home = reader.u8()?;
                let offset = reader.u32_le()?;
                out.push(to_location(home, offset, None));
            }
            out
        }
        DirectoryLayout::Columnar | DirectoryLayout::ColumnarSized => {
            let homes = reader.take(count)?;
            let mut offsets = Vec::with_capacity(count);
            for _ in 0..count {
                offsets.push(reader.u32_le()?);
            }
            let mut sizes = vec![None; count];
            if layout == DirectoryLayout::ColumnarSized {
                for s in sizes.iter_mut() {
                    *s = Some(reader.u32_le()?);
                }
            }
            homes
                .iter()
                .zip(offsets)
                .zip(sizes)
                .map(|((home, offset), size)| to_location(*home, offset, size))
                .collect()
        }
    };

    Ok(entries)
}

fn read_objects(reader: &mut RecordReader<'_>) -> Result<Vec<ObjectEntry>> {
    let count = reader.u16_le()? as usize;
    let packed = reader.take(count)?;
    let mut out = Vec::with_capacity(count);
    for b in packed {
        out.push(ObjectEntry {
            owner: b & 0x0F,
            state: b >> 4,
            class_data: 0,
        });
    }
    for o in out.iter_mut() {
        o.class_data = reader.u32_le()?;
    }
    Ok(out)
}

fn read_arrays(reader: &mut RecordReader<'_>) -> Result<Vec<ArrayDefinition>> {
    let mut out = vec![];
    loop {
        let id = reader.u16_le()?;
        if id == 0 {
            return Ok(out);
        }
        let dim_a = reader.u16_le()?;
        let dim_b = reader.u16_le()?;
        let kind = if reader.u16_le()? == 1 {
            ArrayKind::Bit
        } else {
            ArrayKind::Int
        };
        out.push(ArrayDefinition {
            id,
            dim_a,
            dim_b,
            kind,
        });
    }
}

fn read_audio_names(reader: &mut RecordReader<'_>) -> Result<Vec<String>> {
    let count = reader.u16_le()? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let raw = reader.take(AUDIO_NAME_LEN)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        out.push(String::from_utf8_lossy(&raw[..end]).into_owned());
    }
    Ok(out)
}

/// Parse a whole index container.
///
/// Fails with [CacheError::DirectoryMismatch] when two records describe the same category with different counts, and
/// with [CacheError::UnknownDirectoryBlock] on any tag this format doesn't define.
pub fn load_directory(data: &[u8], layout: DirectoryLayout) -> Result<DirectoryResult> {
    let mut result = DirectoryResult::default();
    let mut pos = 0;

    while pos < data.len() {
        if data.len() - pos < RECORD_HEADER_LEN {
            return Err(CacheError::malformed(pos as u64, "truncated directory record"));
        }
        let tag = Tag::from_slice(&data[pos..]);
        let length = u32::from_be_bytes(data[pos + 4..pos + 8].try_into().expect("length checked")) as usize;
        if length < RECORD_HEADER_LEN || length > data.len() - pos {
            return Err(CacheError::malformed(
                pos as u64,
                format!("directory record {} has bad length {}", tag, length),
            ));
        }

        let kind = record_kind(tag)?;
        let mut reader = RecordReader {
            data: &data[pos + RECORD_HEADER_LEN..pos + length],
            pos: 0,
            base: pos + RECORD_HEADER_LEN,
        };
        trace!("Directory record {} ({} bytes) at {}", tag, length, pos);

        match kind {
            RecordKind::Listing(category, resource_tag) => {
                let entries = read_listing(&mut reader, layout, category)?;
                if let Some(previous) = result.listings.get(&category) {
                    if previous.entries.len() != entries.len() {
                        return Err(CacheError::DirectoryMismatch {
                            category,
                            expected: previous.entries.len(),
                            found: entries.len(),
                        });
                    }
                }
                debug!("Directory lists {} {}s", entries.len(), category);
                result.listings.insert(
                    category,
                    CategoryListing {
                        category,
                        tag: resource_tag,
                        entries,
                    },
                );
            }
            RecordKind::Objects => result.objects = read_objects(&mut reader)?,
            RecordKind::Arrays => result.arrays = read_arrays(&mut reader)?,
            RecordKind::AudioNames => result.audio_names = read_audio_names(&mut reader)?,
            RecordKind::Skip => {}
        }

        pos += length;
    }

    Ok(result)
}

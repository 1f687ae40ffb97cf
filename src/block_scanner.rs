//! Linear scanning over tagged block streams.
//!
//! A container is a sequence of blocks, each made of a small header and a payload. Three historical header layouts
//! exist, selected per container by [ContainerFormat] rather than by sniffing:
//!
//! - [ContainerFormat::Standard]: 4-byte tag, then a 4-byte big-endian length covering header and payload.
//! - [ContainerFormat::Compact]: 4-byte little-endian length, then a 2-byte legacy tag.
//! - [ContainerFormat::Minimal]: a bare 2-byte little-endian length with no tag at all.
//!
//! Scanning never rewinds: every function advances a caller-owned cursor past the blocks it has looked at. Nested
//! lookups run the same scan over a narrower slice.
use std::convert::TryInto;

use crate::*;

/// The block header layout used by a container.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ContainerFormat {
    Standard,
    Compact,
    Minimal,
}

impl ContainerFormat {
    pub fn header_len(self) -> usize {
        match self {
            ContainerFormat::Standard => 8,
            ContainerFormat::Compact => 6,
            ContainerFormat::Minimal => 2,
        }
    }
}

/// The tag part of a decoded block header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HeaderTag {
    Full(Tag),
    Legacy(LegacyTag),
    Untagged,
}

/// A decoded block header: its tag and the total length of the block, header included.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockHeader {
    pub tag: HeaderTag,
    pub length: u32,
}

impl BlockHeader {
    /// Decode a header from the start of `bytes`, which must hold at least [ContainerFormat::header_len] bytes.
    pub fn parse(format: ContainerFormat, bytes: &[u8]) -> Option<BlockHeader> {
        if bytes.len() < format.header_len() {
            return None;
        }

        let header = match format {
            ContainerFormat::Standard => BlockHeader {
                tag: HeaderTag::Full(Tag::from_slice(bytes)),
                length: u32::from_be_bytes(bytes[4..8].try_into().ok()?),
            },
            ContainerFormat::Compact => BlockHeader {
                tag: HeaderTag::Legacy(LegacyTag([bytes[4], bytes[5]])),
                length: u32::from_le_bytes(bytes[0..4].try_into().ok()?),
            },
            ContainerFormat::Minimal => BlockHeader {
                tag: HeaderTag::Untagged,
                length: u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            },
        };
        Some(header)
    }

    /// Whether this header carries `tag`, comparing through [Tag::legacy] for compact headers. Untagged headers match
    /// nothing.
    pub fn has_tag(&self, tag: Tag) -> bool {
        match self.tag {
            HeaderTag::Full(t) => t == tag,
            HeaderTag::Legacy(l) => tag.legacy() == Some(l),
            HeaderTag::Untagged => false,
        }
    }

    fn matches(&self, wanted: &Wanted) -> bool {
        match (&self.tag, wanted) {
            (HeaderTag::Full(t), Wanted::Full(w)) => t == w,
            (HeaderTag::Legacy(t), Wanted::Legacy(w)) => t == w,
            (_, Wanted::Any) => true,
            _ => false,
        }
    }
}

/// A located block. All offsets are relative to the slice that was scanned.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BlockRef {
    pub offset: usize,
    pub payload_start: usize,
    /// Total length, header included.
    pub length: usize,
}

impl BlockRef {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn bytes<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.end()]
    }

    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.payload_start..self.end()]
    }
}

enum Wanted {
    Full(Tag),
    Legacy(LegacyTag),
    Any,
}

/// Decode and bounds-check the block at `pos`, treating a non-positive length as corruption.
fn block_at(format: ContainerFormat, data: &[u8], pos: usize) -> Result<(BlockHeader, BlockRef)> {
    let header = BlockHeader::parse(format, &data[pos..])
        .ok_or_else(|| CacheError::malformed(pos as u64, "truncated block header"))?;

    // Lengths are signed on disk; anything that isn't strictly positive would loop forever.
    if header.length as i32 <= 0 {
        return Err(CacheError::malformed(
            pos as u64,
            format!("illegal block length {}", header.length as i32),
        ));
    }

    let length = header.length as usize;
    if length < format.header_len() || pos + length > data.len() {
        return Err(CacheError::malformed(
            pos as u64,
            format!(
                "block length {} does not fit in {} remaining bytes",
                length,
                data.len() - pos
            ),
        ));
    }

    Ok((
        header,
        BlockRef {
            offset: pos,
            payload_start: pos + format.header_len(),
            length,
        },
    ))
}

fn scan(
    format: ContainerFormat,
    wanted: Wanted,
    data: &[u8],
    cursor: &mut usize,
) -> Result<Option<BlockRef>> {
    while *cursor < data.len() {
        let (header, block) = block_at(format, data, *cursor)?;
        *cursor = block.end();
        if header.matches(&wanted) {
            return Ok(Some(block));
        }
    }

    Ok(None)
}

/// Find the first block tagged `tag` at or after `cursor`, leaving `cursor` just past it.
///
/// For compact containers the tag is translated through [Tag::legacy]; tags without a short form are reported as
/// not found immediately and the cursor does not move. Minimal containers carry no tags, so there this is the same
/// as [next_block].
pub fn find_block(
    format: ContainerFormat,
    tag: Tag,
    data: &[u8],
    cursor: &mut usize,
) -> Result<Option<BlockRef>> {
    let wanted = match format {
        ContainerFormat::Standard => Wanted::Full(tag),
        ContainerFormat::Compact => match tag.legacy() {
            Some(l) => Wanted::Legacy(l),
            None => return Ok(None),
        },
        ContainerFormat::Minimal => Wanted::Any,
    };
    scan(format, wanted, data, cursor)
}

/// Return whatever block starts at `cursor`, leaving `cursor` just past it.
pub fn next_block(
    format: ContainerFormat,
    data: &[u8],
    cursor: &mut usize,
) -> Result<Option<BlockRef>> {
    scan(format, Wanted::Any, data, cursor)
}

/// Find the first child of `parent` tagged `tag`. `data` is the slice `parent` was located in.
pub fn find_nested(
    format: ContainerFormat,
    tag: Tag,
    data: &[u8],
    parent: &BlockRef,
) -> Result<Option<BlockRef>> {
    let mut cursor = parent.payload_start;
    find_block(format, tag, &data[..parent.end()], &mut cursor)
}

/// Walks the children of one block, finding successive matches.
///
/// The block passed to [BlockIter::new] is the parent; iteration starts right after its header and stops at the
/// length its header declares.
pub struct BlockIter<'a> {
    format: ContainerFormat,
    data: &'a [u8],
    cursor: usize,
}

impl<'a> BlockIter<'a> {
    pub fn new(format: ContainerFormat, block: &'a [u8]) -> Result<BlockIter<'a>> {
        let (_, parent) = block_at(format, block, 0)?;
        Ok(BlockIter {
            format,
            data: &block[..parent.end()],
            cursor: parent.payload_start,
        })
    }

    /// The next child tagged `tag`, as a slice covering the whole child block.
    pub fn find_next(&mut self, tag: Tag) -> Result<Option<&'a [u8]>> {
        let data = self.data;
        Ok(find_block(self.format, tag, data, &mut self.cursor)?.map(|b| b.bytes(data)))
    }
}

/// Payload size of a block slice, or 0 if the header cannot be read.
pub fn block_data_size(format: ContainerFormat, block: &[u8]) -> usize {
    BlockHeader::parse(format, block)
        .map(|h| (h.length as usize).saturating_sub(format.header_len()))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn test_standard_find_and_nested() {
        let inner = [
            standard_block(b"RMHD", &[1, 2, 3, 4]),
            standard_block(b"CYCL", &[9]),
        ]
        .concat();
        let data = [
            standard_block(b"LSCR", &[0; 10]),
            standard_block(b"ROOM", &inner),
        ]
        .concat();

        let mut cursor = 0;
        let room = find_block(ContainerFormat::Standard, Tag::new(b"ROOM"), &data, &mut cursor)
            .unwrap()
            .expect("Should find the room");
        assert_eq!(room.offset, 18);
        assert_eq!(cursor, data.len());

        let cycl = find_nested(ContainerFormat::Standard, Tag::new(b"CYCL"), &data, &room)
            .unwrap()
            .expect("Should find nested block");
        assert_eq!(cycl.payload(&data), &[9]);

        // Nothing after the room, and the scan does not rewind.
        assert!(
            find_block(ContainerFormat::Standard, Tag::new(b"LSCR"), &data, &mut cursor)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_standard_zero_length_is_fatal() {
        let mut data = standard_block(b"SCRP", &[0; 4]);
        data[4..8].copy_from_slice(&0u32.to_be_bytes());
        let mut cursor = 0;
        let res = find_block(ContainerFormat::Standard, Tag::new(b"COST"), &data, &mut cursor);
        assert!(matches!(res, Err(CacheError::MalformedContainer { offset: 0, .. })));
    }

    #[test]
    fn test_compact_unmapped_tag_consumes_nothing() {
        let data = compact_block(b"HD", &[0; 4]);
        let mut cursor = 0;
        let res = find_block(ContainerFormat::Compact, Tag::new(b"SCRP"), &data, &mut cursor).unwrap();
        assert!(res.is_none());
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_compact_uses_legacy_tags() {
        let data = [compact_block(b"BX", &[1]), compact_block(b"HD", &[7, 7])].concat();
        let mut cursor = 0;
        let hd = find_block(ContainerFormat::Compact, Tag::new(b"RMHD"), &data, &mut cursor)
            .unwrap()
            .unwrap();
        assert_eq!(hd.offset, 7);
        assert_eq!(hd.payload(&data), &[7, 7]);
    }

    #[test]
    fn test_compact_finds_zplanes() {
        let data = [compact_block(b"HD", &[0; 4]), compact_block(b"ZP", &[1, 2])].concat();
        let mut cursor = 0;
        let zp = find_block(ContainerFormat::Compact, Tag::new(b"ZP00"), &data, &mut cursor)
            .unwrap()
            .expect("Should find the z-plane");
        assert_eq!(zp.offset, 10);
        assert_eq!(zp.payload(&data), &[1, 2]);
    }

    #[test]
    fn test_minimal_walks_in_order() {
        let data = [minimal_block(&[1, 2]), minimal_block(&[3])].concat();
        let mut cursor = 0;
        let first = next_block(ContainerFormat::Minimal, &data, &mut cursor).unwrap().unwrap();
        let second = find_block(ContainerFormat::Minimal, Tag::NONE, &data, &mut cursor)
            .unwrap()
            .unwrap();
        assert_eq!(first.payload(&data), &[1, 2]);
        assert_eq!(second.payload(&data), &[3]);
        assert!(next_block(ContainerFormat::Minimal, &data, &mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_overrunning_block_is_malformed() {
        let mut data = standard_block(b"SCRP", &[0; 4]);
        data.truncate(10);
        let mut cursor = 0;
        assert!(next_block(ContainerFormat::Standard, &data, &mut cursor).is_err());
    }

    #[test]
    fn test_block_iter_finds_successive_children() {
        let room = standard_block(
            b"ROOM",
            &[
                standard_block(b"OBCD", &[1]),
                standard_block(b"BOXD", &[]),
                standard_block(b"OBCD", &[2]),
            ]
            .concat(),
        );
        let mut iter = BlockIter::new(ContainerFormat::Standard, &room).unwrap();
        let a = iter.find_next(Tag::new(b"OBCD")).unwrap().unwrap();
        let b = iter.find_next(Tag::new(b"OBCD")).unwrap().unwrap();
        assert_eq!(a[8], 1);
        assert_eq!(b[8], 2);
        assert!(iter.find_next(Tag::new(b"OBCD")).unwrap().is_none());
        assert_eq!(block_data_size(ContainerFormat::Standard, a), 1);
    }
}

//! Four-byte block tags, and the two-byte legacy tags that compact containers use in their place.
use std::fmt;

/// A four-byte block tag, stored in on-disk byte order (`b"SCRP"` is written `S`, `C`, `R`, `P`).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tag(pub [u8; 4]);

/// A two-byte tag from the compact encoding, also in on-disk byte order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct LegacyTag(pub [u8; 2]);

impl Tag {
    pub const fn new(bytes: &[u8; 4]) -> Tag {
        Tag(*bytes)
    }

    /// Build a tag from the first four bytes of a slice.
    ///
    /// Callers must have checked that at least four bytes are available.
    pub(crate) fn from_slice(bytes: &[u8]) -> Tag {
        Tag([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Placeholder tag for categories that never live in a container.
    pub const NONE: Tag = Tag::new(b"NONE");

    /// The compact-encoding equivalent of this tag, if compact containers have one.
    ///
    /// Only blocks that appear inside rooms were ever given short names, so most tags map to nothing and can never
    /// be found in a compact container.
    pub fn legacy(self) -> Option<LegacyTag> {
        let short = match &self.0 {
            b"RMHD" => b"HD",
            b"IM00" => b"BM",
            b"EXCD" => b"EX",
            b"ENCD" => b"EN",
            b"SCAL" => b"SA",
            b"LSCR" => b"LS",
            b"OBCD" => b"OC",
            b"OBIM" => b"OI",
            b"SMAP" => b"BM",
            b"CLUT" => b"PA",
            b"BOXD" => b"BX",
            b"CYCL" => b"CC",
            b"EPAL" => b"SP",
            b"TILE" => b"TL",
            b"ZP00" => b"ZP",
            b"LECF" => b"LE",
            b"LOFF" => b"FO",
            _ => return None,
        };
        Some(LegacyTag(*short))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            if b.is_ascii_graphic() || *b == b' ' {
                write!(f, "{}", *b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for LegacyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.0[0] as char, self.0[1] as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_mapping() {
        assert_eq!(Tag::new(b"RMHD").legacy(), Some(LegacyTag(*b"HD")));
        // Two different tags share the bitmap short name.
        assert_eq!(Tag::new(b"SMAP").legacy(), Tag::new(b"IM00").legacy());
        assert_eq!(Tag::new(b"SCRP").legacy(), None);
        assert_eq!(Tag::new(b"EPAL").legacy(), Some(LegacyTag(*b"SP")));
        assert_eq!(Tag::new(b"TILE").legacy(), Some(LegacyTag(*b"TL")));
        assert_eq!(Tag::new(b"ZP00").legacy(), Some(LegacyTag(*b"ZP")));
    }

    #[test]
    fn test_display_escapes_binary() {
        assert_eq!(Tag::new(b"SOU ").to_string(), "SOU ");
        assert_eq!(Tag([0, b'A', b'B', 0xff]).to_string(), "\\x00AB\\xff");
    }
}

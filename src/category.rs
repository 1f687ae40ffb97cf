//! The closed set of resource categories the cache knows about.
use std::fmt;

use crate::Tag;

/// A kind of resource. Every category owns its own id space `[0, count)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum ResourceCategory {
    Room,
    RoomScripts,
    Script,
    Costume,
    Sound,
    Charset,
    ObjectName,
    Inventory,
    Verb,
    Image,
    Talkie,
    ActorName,
    String,
    FlObject,
    Temp,
    ScaleTable,
    Matrix,
}

/// How a category's slots find their bytes on disk.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResidencyMode {
    /// No per-room mapping; slots are filled by the caller or loaded relative to the current room.
    Global,
    /// Located by a room id plus an offset into that room's data region.
    RoomResident,
    /// Like [ResidencyMode::RoomResident], but the directory also stores the authoritative payload size.
    RoomResidentSized,
}

impl ResidencyMode {
    /// Whether slots of this mode can be thrown away and later reloaded from a container.
    pub fn is_reloadable(self) -> bool {
        !matches!(self, ResidencyMode::Global)
    }
}

impl ResourceCategory {
    /// Every category, in table scan order.
    pub const ALL: [ResourceCategory; 17] = [
        ResourceCategory::Room,
        ResourceCategory::RoomScripts,
        ResourceCategory::Script,
        ResourceCategory::Costume,
        ResourceCategory::Sound,
        ResourceCategory::Charset,
        ResourceCategory::ObjectName,
        ResourceCategory::Inventory,
        ResourceCategory::Verb,
        ResourceCategory::Image,
        ResourceCategory::Talkie,
        ResourceCategory::ActorName,
        ResourceCategory::String,
        ResourceCategory::FlObject,
        ResourceCategory::Temp,
        ResourceCategory::ScaleTable,
        ResourceCategory::Matrix,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position of this category in [ResourceCategory::ALL].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        use ResourceCategory::*;

        match self {
            Room => "room",
            RoomScripts => "room script",
            Script => "script",
            Costume => "costume",
            Sound => "sound",
            Charset => "charset",
            ObjectName => "object name",
            Inventory => "inventory",
            Verb => "verb",
            Image => "image",
            Talkie => "talkie",
            ActorName => "actor name",
            String => "string",
            FlObject => "flobject",
            Temp => "temp",
            ScaleTable => "scale table",
            Matrix => "boxes",
        }
    }

    /// The block tag a resource of this category starts with in a standard container.
    pub fn default_tag(self) -> Tag {
        use ResourceCategory::*;

        match self {
            Room => Tag::new(b"ROOM"),
            RoomScripts => Tag::new(b"RMSC"),
            Script => Tag::new(b"SCRP"),
            Costume => Tag::new(b"COST"),
            Sound => Tag::new(b"SOUN"),
            Charset => Tag::new(b"CHAR"),
            Image => Tag::new(b"AWIZ"),
            Talkie => Tag::new(b"TLKE"),
            _ => Tag::NONE,
        }
    }

    pub fn default_mode(self) -> ResidencyMode {
        use ResourceCategory::*;

        match self {
            Room | RoomScripts | Script | Costume | Charset | Image | Talkie => {
                ResidencyMode::RoomResident
            }
            Sound => ResidencyMode::RoomResidentSized,
            _ => ResidencyMode::Global,
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_scan_order() {
        for (i, c) in ResourceCategory::ALL.iter().enumerate() {
            assert_eq!(c.index(), i);
        }
    }

    #[test]
    fn test_global_categories_have_no_tag() {
        for c in ResourceCategory::ALL.iter() {
            if c.default_mode() == ResidencyMode::Global {
                assert_eq!(c.default_tag(), Tag::NONE, "{}", c);
            }
        }
    }
}

//! The stock container naming schemes.
use crate::*;

/// XOR key of standard and compact disk containers.
pub const DISK_XOR_KEY: u8 = 0x69;

/// Names containers the way the common releases of each container generation do.
///
/// - Standard: `{base}.{disk:03}`, falling back to `{base}.la{disk}`; the index is disk 0.
/// - Compact: the index is `000.lfl`, data lives in `disk{disk:02}.lec`.
/// - Minimal: every room is its own `{room:02}.lfl`.
#[derive(Clone, Debug)]
pub struct DiskNaming {
    base_name: String,
    format: ContainerFormat,
    minimal_xor_key: u8,
}

impl DiskNaming {
    pub fn new(base_name: impl Into<String>, format: ContainerFormat) -> DiskNaming {
        DiskNaming {
            base_name: base_name.into(),
            format,
            minimal_xor_key: 0,
        }
    }

    /// Set the key for minimal containers, which some releases obfuscate with `0xFF`.
    pub fn with_minimal_xor_key(mut self, key: u8) -> DiskNaming {
        self.minimal_xor_key = key;
        self
    }
}

impl RoomNaming for DiskNaming {
    fn candidates(&self, room: usize, disk: u8) -> Vec<Candidate> {
        match self.format {
            ContainerFormat::Standard => {
                let disk = if room == 0 { 0 } else { disk };
                vec![
                    Candidate::new(format!("{}.{:03}", self.base_name, disk), DISK_XOR_KEY),
                    Candidate::new(format!("{}.la{}", self.base_name, disk), 0),
                ]
            }
            ContainerFormat::Compact => {
                if room == 0 {
                    vec![Candidate::new("000.lfl", 0)]
                } else {
                    vec![Candidate::new(format!("disk{:02}.lec", disk), DISK_XOR_KEY)]
                }
            }
            ContainerFormat::Minimal => vec![Candidate::new(
                format!("{:02}.lfl", room),
                self.minimal_xor_key,
            )],
        }
    }
}

//! An on-demand, budgeted cache for game resources packed into tagged block containers.
//!
//! Resources (rooms, scripts, costumes, sounds and the like) live in data containers, one or more rooms per
//! container, and are located through a directory read once from an index container at startup. The engine asks for
//! a resource by category and number; the cache opens whichever container holds it, reads exactly that block, and
//! keeps it resident until memory pressure makes it the stalest evictable resource.
//!
//! The pieces, bottom up:
//!
//! - [ContainerFormat] and the scanning functions in this crate walk the three historical block header layouts.
//! - [load_directory] parses the index into per-category [CategoryListing]s.
//! - [ContainerLocator] keeps the container for the active room open, reading through a [Vfs] and resolving container
//!   names with a [RoomNaming] such as [DiskNaming].
//! - [ResourceTable] holds every slot, and [Budget] decides what to evict when a load would go over the watermarks.
//! - [ResourceCache] ties it together.
//!
//! To use this crate, implement [Vfs] (or use [FilesystemVfs]), pick a [RoomNaming], then construct a [ResourceCache]
//! with your chosen [CacheConfig].
mod block_scanner;
mod category;
mod container;
mod directory;
mod error;
mod eviction;
mod filesystem_vfs;
mod naming;
mod resource_cache;
mod resource_table;
mod tag;
mod traits;

#[cfg(test)]
mod test_support;

pub use block_scanner::*;
pub use category::*;
pub use container::*;
pub use directory::*;
pub use error::*;
pub use eviction::*;
pub use filesystem_vfs::*;
pub use naming::*;
pub use resource_cache::*;
pub use resource_table::*;
pub use tag::*;
pub use traits::*;

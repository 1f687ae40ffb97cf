//! The [ResourceCache] drives a [ContainerLocator] over a [Vfs], keeping a budgeted set of resources resident.
//!
//! Resources are addressed by `(category, id)`. The directory, read once at startup from the index container, tells
//! the cache which room each resource lives in and where inside that room's data region its block starts. Asking for
//! a resource which isn't resident opens the right container, reads the block, and first evicts stale resources if
//! the new allocation would take the heap over budget.
//!
//! Anything the engine can't afford to lose may be locked with [ResourceCache::lock], at which point it is only
//! removed by [ResourceCache::force_discard]. Resources the engine is actively using are protected through
//! [LivenessOracle]s instead, since that state changes far more often than anyone would want to lock and unlock.
use std::collections::HashMap;

use ahash::RandomState;
use log::{debug, trace, warn};

use crate::*;

pub const DEFAULT_LOW_WATERMARK: u64 = 400_000;
pub const DEFAULT_HIGH_WATERMARK: u64 = 550_000;

#[derive(Clone, Debug, derive_builder::Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct CacheConfig {
    /// Once eviction starts, it continues until the heap plus the pending allocation fits in this many bytes.
    #[builder(default = "DEFAULT_LOW_WATERMARK")]
    pub low_watermark: u64,
    /// Eviction starts when the heap plus the pending allocation reaches this many bytes.
    #[builder(default = "DEFAULT_HIGH_WATERMARK")]
    pub high_watermark: u64,
    /// Block layout of the room containers.
    #[builder(default = "ContainerFormat::Standard")]
    pub format: ContainerFormat,
    /// Record layout of the index container.
    #[builder(default = "DirectoryLayout::Columnar")]
    pub directory_layout: DirectoryLayout,
}

impl CacheConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let low = self.low_watermark.unwrap_or(DEFAULT_LOW_WATERMARK);
        let high = self.high_watermark.unwrap_or(DEFAULT_HIGH_WATERMARK);
        if low > high {
            return Err(format!(
                "low watermark {} is above high watermark {}",
                low, high
            ));
        }
        Ok(())
    }
}

/// What [ResourceCache::ensure_loaded] found.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LoadOutcome {
    /// Read from its container just now.
    Loaded,
    /// Was already resident; it has been marked as used.
    AlreadyResident,
    /// The resource exists but has no bytes. An empty buffer is now resident.
    ZeroLength,
    /// The directory has no data for this resource.
    Missing,
}

type OracleMap = HashMap<ResourceCategory, Box<dyn LivenessOracle>, RandomState>;

pub struct ResourceCache<VfsImpl: Vfs, NamingImpl: RoomNaming> {
    config: CacheConfig,
    table: ResourceTable,
    budget: Budget,
    locator: ContainerLocator<VfsImpl, NamingImpl>,
    oracles: OracleMap,
    /// The room the engine is in; global resources load relative to it.
    current_room: usize,
    objects: Vec<ObjectEntry>,
    arrays: Vec<ArrayDefinition>,
    audio_names: Vec<String>,
}

/// Rooms and their scripts are live while the engine is in that room; everything else asks the registered oracle.
fn is_live(
    oracles: &OracleMap,
    current_room: usize,
    category: ResourceCategory,
    id: usize,
) -> bool {
    if matches!(
        category,
        ResourceCategory::Room | ResourceCategory::RoomScripts
    ) && id == current_room
    {
        return true;
    }

    oracles
        .get(&category)
        .map(|o| o.is_in_use(category, id))
        .unwrap_or(false)
}

impl<VfsImpl: Vfs, NamingImpl: RoomNaming> ResourceCache<VfsImpl, NamingImpl> {
    pub fn new(
        vfs: VfsImpl,
        naming: NamingImpl,
        config: CacheConfig,
    ) -> ResourceCache<VfsImpl, NamingImpl> {
        ResourceCache {
            table: ResourceTable::new(),
            budget: Budget::new(config.low_watermark, config.high_watermark),
            locator: ContainerLocator::new(vfs, naming, config.format),
            oracles: Default::default(),
            current_room: 0,
            objects: vec![],
            arrays: vec![],
            audio_names: vec![],
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn locator(&self) -> &ContainerLocator<VfsImpl, NamingImpl> {
        &self.locator
    }

    /// Allocate `count` empty slots for `category`. Each category may only be declared once.
    pub fn declare(
        &mut self,
        category: ResourceCategory,
        count: usize,
        tag: Tag,
        mode: ResidencyMode,
    ) -> Result<()> {
        self.table.declare(category, count, tag, mode)
    }

    /// Register the liveness oracle for `category`, replacing any previous one.
    pub fn set_oracle(&mut self, category: ResourceCategory, oracle: impl LivenessOracle + 'static) {
        self.oracles.insert(category, Box::new(oracle));
    }

    pub fn set_current_room(&mut self, room: usize) {
        self.current_room = room;
    }

    pub fn current_room(&self) -> usize {
        self.current_room
    }

    /// Whether the engine is using this resource, which rules it out as an eviction victim.
    pub fn is_in_use(&self, category: ResourceCategory, id: usize) -> bool {
        self.table.validate(category, id);
        is_live(&self.oracles, self.current_room, category, id)
    }

    /// Read the index container and apply it to the table.
    pub fn load_directory(&mut self) -> Result<()> {
        debug!("Reading index file");
        self.locator.close();
        self.locator.enter_room(INDEX_ROOM, 0)?;
        let data = self.locator.read_all();
        self.locator.close();

        let directory = load_directory(&data?, self.config.directory_layout)?;
        self.apply_directory(directory)
    }

    /// Record every location from an already parsed directory.
    ///
    /// Categories which haven't been declared are declared with their listing's tag and their default residency
    /// mode. Declared categories must have exactly as many slots as the directory lists.
    pub fn apply_directory(&mut self, directory: DirectoryResult) -> Result<()> {
        let DirectoryResult {
            mut listings,
            objects,
            arrays,
            audio_names,
        } = directory;

        for category in ResourceCategory::ALL.iter().copied() {
            let listing = match listings.remove(&category) {
                Some(l) => l,
                None => continue,
            };

            let count = listing.entries.len();
            if self.table.is_declared(category) {
                let declared = self.table.count(category);
                if declared != count {
                    return Err(CacheError::DirectoryMismatch {
                        category,
                        expected: declared,
                        found: count,
                    });
                }
            } else {
                self.table
                    .declare(category, count, listing.tag, category.default_mode())?;
            }

            for (id, location) in listing.entries.into_iter().enumerate() {
                self.table.set_location(category, id, location);
            }
        }

        self.objects = objects;
        self.arrays = arrays;
        self.audio_names = audio_names;
        Ok(())
    }

    /// The container number holding `room`, as the room listing recorded it.
    fn disk_for_room(&self, room: usize) -> u8 {
        if room == INDEX_ROOM {
            return 0;
        }

        match self
            .table
            .try_slot(ResourceCategory::Room, room)
            .and_then(|s| s.location())
        {
            Some(l) => l.home,
            None => {
                warn!("No disk recorded for room {}", room);
                0
            }
        }
    }

    /// Make room for `size` more bytes, evicting whatever the budget requires.
    fn reserve(&mut self, size: u64) -> ReserveReport {
        let oracles = &self.oracles;
        let current_room = self.current_room;
        self.budget
            .reserve(&mut self.table, size, |c, i| is_live(oracles, current_room, c, i))
    }

    /// Total length of the block at `offset` in the active room, header included.
    #[allow(clippy::too_many_arguments)]
    fn block_length(
        &mut self,
        category: ResourceCategory,
        id: usize,
        room: usize,
        offset: u64,
        tag: Tag,
        mode: ResidencyMode,
        explicit_size: Option<u32>,
    ) -> Result<usize> {
        if mode == ResidencyMode::RoomResidentSized {
            if let Some(size) = explicit_size {
                self.locator.check_in_room(offset, size as u64)?;
                return Ok(size as usize);
            }
        }

        let format = self.locator.format();
        let mut head = vec![0; format.header_len()];
        self.locator.read_in_room(offset, &mut head)?;
        let header = BlockHeader::parse(format, &head).expect("Read a full header");

        if format == ContainerFormat::Standard && tag != Tag::NONE && !header.has_tag(tag) {
            return Err(CacheError::CorruptIndex {
                category,
                id,
                room,
                offset,
                expected: tag,
                found: Tag::from_slice(&head),
            });
        }

        let length = header.length as usize;
        if length != 0 && length < format.header_len() {
            return Err(CacheError::malformed(
                self.locator.data_base() + offset,
                format!("{} {} has block length {}", category, id, length),
            ));
        }
        self.locator.check_in_room(offset, length as u64)?;
        Ok(length)
    }

    /// Make sure a resource is resident, reading it from its container if it isn't.
    ///
    /// # Panics
    ///
    /// If `(category, id)` is out of range.
    pub fn ensure_loaded(&mut self, category: ResourceCategory, id: usize) -> Result<LoadOutcome> {
        let slot = self.table.slot(category, id);
        if slot.is_resident() {
            self.table.touch(category, id);
            return Ok(LoadOutcome::AlreadyResident);
        }

        let location = match slot.location() {
            Some(l) => l,
            None => {
                trace!("{} {} has no data on disk", category, id);
                return Ok(LoadOutcome::Missing);
            }
        };
        let (tag, mode) = {
            let t = self.table.category(category).expect("Validated");
            (t.tag, t.mode)
        };

        // Rooms are found by their own id; everything else lives at an offset inside its room. Room 0 means "the room
        // the engine is in".
        let (room, offset) = if category == ResourceCategory::Room {
            (id, 0)
        } else if mode == ResidencyMode::Global || location.home == 0 {
            (self.current_room, location.offset as u64)
        } else {
            (location.home as usize, location.offset as u64)
        };

        debug!("Loading {} {} from room {} at {}", category, id, room, offset);
        let disk = self.disk_for_room(room);
        self.locator.enter_room(room, disk)?;

        let length = self.block_length(
            category,
            id,
            room,
            offset,
            tag,
            mode,
            location.explicit_size,
        )?;
        if length == 0 {
            self.table.mark_loaded(category, id, vec![]);
            self.budget.loaded();
            return Ok(LoadOutcome::ZeroLength);
        }

        self.reserve(length as u64);
        let bytes = self.locator.read_vec_in_room(offset, length)?;
        self.table.mark_loaded(category, id, bytes);
        self.budget.loaded();
        Ok(LoadOutcome::Loaded)
    }

    /// Get a resource's bytes, loading it first if it can be loaded. Marks the resource as used.
    ///
    /// The slice is only valid until the next call which may evict; that is what the borrow enforces.
    pub fn get_address(
        &mut self,
        category: ResourceCategory,
        id: usize,
    ) -> Result<Option<&[u8]>> {
        if !self.prepare_address(category, id)? {
            return Ok(None);
        }
        Ok(self.table.slot(category, id).buffer())
    }

    /// As [ResourceCache::get_address], for callers about to change the bytes in place. Marks the resource modified.
    pub fn get_address_mut(
        &mut self,
        category: ResourceCategory,
        id: usize,
    ) -> Result<Option<&mut [u8]>> {
        if !self.prepare_address(category, id)? {
            return Ok(None);
        }
        self.table.set_modified(category, id);
        Ok(self.table.buffer_mut(category, id))
    }

    /// Load (for reloadable categories) and touch a resource, reporting whether it is now resident.
    fn prepare_address(&mut self, category: ResourceCategory, id: usize) -> Result<bool> {
        let reloadable = self
            .table
            .category(category)
            .map(|t| t.mode.is_reloadable())
            .unwrap_or(false);
        if reloadable && !self.table.slot(category, id).is_resident() {
            self.ensure_loaded(category, id)?;
        }

        if !self.table.slot(category, id).is_resident() {
            trace!("{} {} is not resident", category, id);
            return Ok(false);
        }
        self.table.touch(category, id);
        Ok(true)
    }

    /// Replace a resource's contents with caller-supplied bytes, e.g. for strings and object names which never live
    /// in a container.
    pub fn install(&mut self, category: ResourceCategory, id: usize, bytes: Vec<u8>) {
        self.table.discard(category, id);
        self.reserve(bytes.len() as u64);
        self.table.mark_loaded(category, id, bytes);
        self.budget.loaded();
    }

    pub fn lock(&mut self, category: ResourceCategory, id: usize) {
        self.table.set_lock(category, id, true);
    }

    pub fn unlock(&mut self, category: ResourceCategory, id: usize) {
        self.table.set_lock(category, id, false);
    }

    pub fn is_locked(&self, category: ResourceCategory, id: usize) -> bool {
        self.table.is_locked(category, id)
    }

    pub fn mark_modified(&mut self, category: ResourceCategory, id: usize) {
        self.table.set_modified(category, id);
    }

    pub fn is_modified(&self, category: ResourceCategory, id: usize) -> bool {
        self.table.slot(category, id).is_modified()
    }

    pub fn is_loaded(&self, category: ResourceCategory, id: usize) -> bool {
        self.table.slot(category, id).is_resident()
    }

    /// Size of a resident resource, or 0.
    pub fn resource_size(&self, category: ResourceCategory, id: usize) -> usize {
        self.table.slot(category, id).size()
    }

    /// Drop a resource whether or not it is locked. Returns whether anything was resident.
    pub fn force_discard(&mut self, category: ResourceCategory, id: usize) -> bool {
        self.table.discard(category, id).is_some()
    }

    pub fn statistics(&self) -> CacheStatistics {
        self.table.statistics()
    }

    /// Advance the per-frame aging counter. Returns whether this frame aged the table.
    pub fn tick(&mut self) -> bool {
        self.budget.tick(&mut self.table)
    }

    /// Close whatever container is open.
    pub fn close_room(&mut self) {
        self.locator.close();
    }

    /// Release every resident resource.
    pub fn free_all(&mut self) {
        self.table.free_all();
    }

    /// Find the first child of `block` tagged `tag` in this cache's container format, returning the child's payload.
    ///
    /// Minimal containers carry no tags, so nothing can be found in them by tag and this always returns `Ok(None)`.
    pub fn find_resource_data<'a>(&self, tag: Tag, block: &'a [u8]) -> Result<Option<&'a [u8]>> {
        let format = self.locator.format();
        if format == ContainerFormat::Minimal {
            return Ok(None);
        }
        let mut iter = BlockIter::new(format, block)?;
        Ok(iter
            .find_next(tag)?
            .map(|child| &child[format.header_len()..]))
    }

    /// Payload size of a block in this cache's container format.
    pub fn resource_data_size(&self, block: &[u8]) -> usize {
        block_data_size(self.locator.format(), block)
    }

    /// The global object table from the directory.
    pub fn objects(&self) -> &[ObjectEntry] {
        &self.objects
    }

    pub fn arrays(&self) -> &[ArrayDefinition] {
        &self.arrays
    }

    pub fn audio_names(&self) -> &[String] {
        &self.audio_names
    }
}

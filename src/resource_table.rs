//! The per-category slot arrays and their primitive state transitions.
//!
//! The table knows nothing about containers. It owns every resident buffer and keeps `allocated_bytes` equal to the
//! sum of their lengths across every transition.
use log::trace;

use crate::*;

/// Mask of the usage counter inside [UsageFlags].
const USAGE_MASK: u8 = 0x7F;
const LOCK_BIT: u8 = 0x80;

/// Highest value the usage counter can reach.
pub const USAGE_MAX: u8 = 127;

/// A 7-bit usage counter plus a lock bit, packed into one byte.
///
/// A counter of 0 means not resident, 1 means just used, and anything higher counts aging passes since the last use.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct UsageFlags(u8);

impl UsageFlags {
    pub fn counter(self) -> u8 {
        self.0 & USAGE_MASK
    }

    pub fn is_locked(self) -> bool {
        self.0 & LOCK_BIT != 0
    }

    pub(crate) fn set_counter(&mut self, counter: u8) {
        debug_assert!(counter <= USAGE_MAX);
        self.0 = (self.0 & LOCK_BIT) | (counter & USAGE_MASK);
    }

    pub(crate) fn set_locked(&mut self, locked: bool) {
        if locked {
            self.0 |= LOCK_BIT;
        } else {
            self.0 &= !LOCK_BIT;
        }
    }
}

/// Bookkeeping for one `(category, id)`.
#[derive(Debug, Default)]
pub struct Slot {
    buffer: Option<Vec<u8>>,
    flags: UsageFlags,
    modified: bool,
    location: Option<Location>,
}

impl Slot {
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    pub fn is_resident(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn flags(&self) -> UsageFlags {
        self.flags
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    pub fn size(&self) -> usize {
        self.buffer.as_ref().map(|b| b.len()).unwrap_or(0)
    }

    pub(crate) fn flags_mut(&mut self) -> &mut UsageFlags {
        &mut self.flags
    }
}

/// The slots of one declared category.
#[derive(Debug)]
pub struct CategoryTable {
    pub tag: Tag,
    pub mode: ResidencyMode,
    slots: Vec<Slot>,
}

impl CategoryTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Totals over the whole table.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheStatistics {
    pub allocated_bytes: u64,
    pub locked_bytes: u64,
    pub locked_count: usize,
}

#[derive(Debug)]
pub struct ResourceTable {
    categories: Vec<Option<CategoryTable>>,
    allocated_bytes: u64,
}

impl Default for ResourceTable {
    fn default() -> ResourceTable {
        ResourceTable::new()
    }
}

impl ResourceTable {
    pub fn new() -> ResourceTable {
        ResourceTable {
            categories: (0..ResourceCategory::COUNT).map(|_| None).collect(),
            allocated_bytes: 0,
        }
    }

    /// Allocate `count` empty slots for `category`.
    pub fn declare(
        &mut self,
        category: ResourceCategory,
        count: usize,
        tag: Tag,
        mode: ResidencyMode,
    ) -> Result<()> {
        let entry = &mut self.categories[category.index()];
        if entry.is_some() {
            return Err(CacheError::DuplicateDeclaration(category));
        }

        trace!("Declaring {} {}s ({}, {:?})", count, category, tag, mode);
        *entry = Some(CategoryTable {
            tag,
            mode,
            slots: (0..count).map(|_| Slot::default()).collect(),
        });
        Ok(())
    }

    pub fn category(&self, category: ResourceCategory) -> Option<&CategoryTable> {
        self.categories[category.index()].as_ref()
    }

    pub fn is_declared(&self, category: ResourceCategory) -> bool {
        self.category(category).is_some()
    }

    /// Number of slots in `category`, or 0 if it was never declared.
    pub fn count(&self, category: ResourceCategory) -> usize {
        self.category(category).map(|c| c.len()).unwrap_or(0)
    }

    /// Checked access which doesn't panic.
    pub fn try_slot(&self, category: ResourceCategory, id: usize) -> Option<&Slot> {
        self.category(category)?.slots.get(id)
    }

    /// Bounds-check `(category, id)`.
    ///
    /// # Panics
    ///
    /// If the category is undeclared or `id` is out of range; callers passing such ids have a bug.
    pub fn validate(&self, category: ResourceCategory, id: usize) {
        let count = match self.category(category) {
            Some(c) => c.len(),
            None => panic!("Illegal resource: {} was never declared", category),
        };
        if id >= count {
            panic!("Illegal resource: {} {} is out of range 0..{}", category, id, count);
        }
    }

    pub fn slot(&self, category: ResourceCategory, id: usize) -> &Slot {
        self.validate(category, id);
        &self.categories[category.index()]
            .as_ref()
            .expect("Validated")
            .slots[id]
    }

    pub(crate) fn slot_mut(&mut self, category: ResourceCategory, id: usize) -> &mut Slot {
        self.validate(category, id);
        &mut self.categories[category.index()]
            .as_mut()
            .expect("Validated")
            .slots[id]
    }

    pub(crate) fn set_location(
        &mut self,
        category: ResourceCategory,
        id: usize,
        location: Option<Location>,
    ) {
        self.slot_mut(category, id).location = location;
    }

    /// Install `buffer` as the slot's contents, marking it freshly used and clearing its lock and modified bits.
    ///
    /// Any previous buffer is released first.
    pub fn mark_loaded(&mut self, category: ResourceCategory, id: usize, buffer: Vec<u8>) {
        let size = buffer.len() as u64;
        let slot = self.slot_mut(category, id);
        let old = slot.buffer.replace(buffer).map(|b| b.len() as u64).unwrap_or(0);
        slot.flags = UsageFlags::default();
        slot.flags.set_counter(1);
        slot.modified = false;
        self.allocated_bytes = self.allocated_bytes - old + size;
    }

    /// Release the slot's buffer, returning it.
    ///
    /// # Panics
    ///
    /// If the slot is locked. Use [ResourceTable::discard] to drop locked slots.
    pub fn mark_evicted(&mut self, category: ResourceCategory, id: usize) -> Option<Vec<u8>> {
        let slot = self.slot_mut(category, id);
        assert!(
            !slot.flags.is_locked(),
            "Attempted to evict locked {} {}",
            category,
            id
        );
        self.release(category, id)
    }

    /// Release the slot's buffer regardless of its lock.
    pub fn discard(&mut self, category: ResourceCategory, id: usize) -> Option<Vec<u8>> {
        self.slot_mut(category, id).flags.set_locked(false);
        self.release(category, id)
    }

    fn release(&mut self, category: ResourceCategory, id: usize) -> Option<Vec<u8>> {
        let slot = self.slot_mut(category, id);
        let old = slot.buffer.take();
        slot.flags.set_counter(0);
        slot.modified = false;
        if let Some(b) = old.as_ref() {
            trace!("Releasing {} {} ({} bytes)", category, id, b.len());
            self.allocated_bytes -= b.len() as u64;
        }
        old
    }

    /// Mark the slot as just used, without changing residency.
    pub fn touch(&mut self, category: ResourceCategory, id: usize) {
        self.slot_mut(category, id).flags.set_counter(1);
    }

    pub fn set_lock(&mut self, category: ResourceCategory, id: usize, locked: bool) {
        self.slot_mut(category, id).flags.set_locked(locked);
    }

    pub fn is_locked(&self, category: ResourceCategory, id: usize) -> bool {
        self.slot(category, id).flags.is_locked()
    }

    pub fn set_modified(&mut self, category: ResourceCategory, id: usize) {
        self.slot_mut(category, id).modified = true;
    }

    pub(crate) fn buffer_mut(&mut self, category: ResourceCategory, id: usize) -> Option<&mut [u8]> {
        self.slot_mut(category, id).buffer.as_deref_mut()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Visit every declared slot in scan order: categories in [ResourceCategory::ALL] order, then ascending id.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceCategory, usize, &Slot)> {
        ResourceCategory::ALL.iter().flat_map(move |c| {
            self.category(*c)
                .into_iter()
                .flat_map(move |t| t.slots.iter().enumerate().map(move |(i, s)| (*c, i, s)))
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ResourceCategory, ResidencyMode, &mut Slot)> {
        self.categories
            .iter_mut()
            .zip(ResourceCategory::ALL.iter())
            .filter_map(|(t, c)| t.as_mut().map(|t| (*c, t)))
            .flat_map(|(c, t)| {
                let mode = t.mode;
                t.slots.iter_mut().map(move |s| (c, mode, s))
            })
    }

    pub fn statistics(&self) -> CacheStatistics {
        let mut stats = CacheStatistics {
            allocated_bytes: self.allocated_bytes,
            ..Default::default()
        };
        for (_, _, slot) in self.iter() {
            if slot.flags.is_locked() && slot.is_resident() {
                stats.locked_bytes += slot.size() as u64;
                stats.locked_count += 1;
            }
        }
        stats
    }

    /// Release every resident buffer, keeping the declarations.
    pub fn free_all(&mut self) {
        let resident = self
            .iter()
            .filter(|(_, _, s)| s.is_resident())
            .map(|(c, i, _)| (c, i))
            .collect::<Vec<_>>();
        for (c, i) in resident {
            self.discard(c, i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResourceTable {
        let mut t = ResourceTable::new();
        t.declare(
            ResourceCategory::Script,
            3,
            Tag::new(b"SCRP"),
            ResidencyMode::RoomResident,
        )
        .unwrap();
        t.declare(
            ResourceCategory::Costume,
            2,
            Tag::new(b"COST"),
            ResidencyMode::RoomResident,
        )
        .unwrap();
        t
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut t = table();
        let res = t.declare(
            ResourceCategory::Script,
            1,
            Tag::new(b"SCRP"),
            ResidencyMode::RoomResident,
        );
        assert!(matches!(
            res,
            Err(CacheError::DuplicateDeclaration(ResourceCategory::Script))
        ));
    }

    #[test]
    fn test_accounting() {
        let mut t = table();
        t.mark_loaded(ResourceCategory::Script, 0, vec![0; 10]);
        t.mark_loaded(ResourceCategory::Costume, 1, vec![0; 5]);
        assert_eq!(t.allocated_bytes(), 15);

        // Replacing a buffer swaps its size in the total.
        t.mark_loaded(ResourceCategory::Script, 0, vec![0; 4]);
        assert_eq!(t.allocated_bytes(), 9);

        assert_eq!(t.mark_evicted(ResourceCategory::Costume, 1).unwrap().len(), 5);
        assert_eq!(t.allocated_bytes(), 4);
        assert!(t.mark_evicted(ResourceCategory::Costume, 1).is_none());
        assert_eq!(t.allocated_bytes(), 4);
    }

    #[test]
    fn test_flag_transitions() {
        let mut t = table();
        t.mark_loaded(ResourceCategory::Script, 1, vec![1]);
        t.set_modified(ResourceCategory::Script, 1);
        t.set_lock(ResourceCategory::Script, 1, true);
        t.slot_mut(ResourceCategory::Script, 1).flags_mut().set_counter(9);

        let flags = t.slot(ResourceCategory::Script, 1).flags();
        assert!(flags.is_locked());
        assert_eq!(flags.counter(), 9);

        t.touch(ResourceCategory::Script, 1);
        assert_eq!(t.slot(ResourceCategory::Script, 1).flags().counter(), 1);
        assert!(t.is_locked(ResourceCategory::Script, 1));

        // Reloading clears lock and modified.
        t.mark_loaded(ResourceCategory::Script, 1, vec![2]);
        let slot = t.slot(ResourceCategory::Script, 1);
        assert!(!slot.flags().is_locked());
        assert!(!slot.is_modified());
        assert_eq!(slot.flags().counter(), 1);
    }

    #[test]
    #[should_panic(expected = "locked")]
    fn test_evicting_locked_slot_panics() {
        let mut t = table();
        t.mark_loaded(ResourceCategory::Script, 2, vec![1]);
        t.set_lock(ResourceCategory::Script, 2, true);
        t.mark_evicted(ResourceCategory::Script, 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_out_of_range_panics() {
        table().validate(ResourceCategory::Script, 3);
    }

    #[test]
    #[should_panic(expected = "never declared")]
    fn test_undeclared_panics() {
        table().touch(ResourceCategory::Sound, 0);
    }

    #[test]
    fn test_statistics_and_free_all() {
        let mut t = table();
        t.mark_loaded(ResourceCategory::Script, 0, vec![0; 10]);
        t.mark_loaded(ResourceCategory::Script, 2, vec![0; 20]);
        t.set_lock(ResourceCategory::Script, 2, true);
        // Locked but not resident doesn't count.
        t.set_lock(ResourceCategory::Costume, 0, true);

        assert_eq!(
            t.statistics(),
            CacheStatistics {
                allocated_bytes: 30,
                locked_bytes: 20,
                locked_count: 1,
            }
        );

        t.free_all();
        assert_eq!(t.allocated_bytes(), 0);
        assert!(t.iter().all(|(_, _, s)| !s.is_resident()));
        assert!(t.try_slot(ResourceCategory::Script, 7).is_none());
    }
}

//! Slot table of the reflection probe cache: which source texture lives in which slot, the
//! content hash it was convolved from, and LRU ages. No GPU state.

/// Identity of a host probe texture. `generation` changes whenever the host recreates the texture
/// under the same handle, so cached slots keyed on the old identity miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureIdentity {
    pub handle: u64,
    pub generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub slot: u32,
    /// The slot's contents are missing or stale and must be convolved this frame.
    pub needs_update: bool,
}

#[derive(Clone, Debug, Default)]
struct Slot {
    texture: Option<TextureIdentity>,
    hash: Option<u64>,
    /// Frames since last use; 0 means fetched this frame.
    count_lru: u32,
    /// A convolution into this slot has been recorded this frame.
    pending: bool,
    /// Fetched this frame; eligible for relighting.
    prepared: bool,
}

pub struct TextureCache {
    slots: Vec<Slot>,
    relight_cursor: usize,
}

impl TextureCache {
    pub fn new(capacity: u32) -> Self {
        Self { slots: vec![Slot::default(); capacity.max(1) as usize], relight_cursor: 0 }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn new_frame(&mut self) {
        for slot in &mut self.slots {
            if slot.texture.is_some() {
                slot.count_lru = slot.count_lru.saturating_add(1);
            }
            slot.pending = false;
            slot.prepared = false;
        }
    }

    /// Find or allocate the slot for `texture`. Eviction takes an empty slot first, otherwise the
    /// least recently used slot not already used this frame. `None` when every slot is in use.
    pub fn reserve(&mut self, texture: TextureIdentity, hash: u64) -> Option<Reservation> {
        if let Some(index) = self.slots.iter().position(|s| s.texture == Some(texture)) {
            let slot = &mut self.slots[index];
            slot.count_lru = 0;
            slot.prepared = true;
            let needs_update = slot.hash != Some(hash) && !slot.pending;
            if needs_update {
                slot.pending = true;
            }
            return Some(Reservation { slot: index as u32, needs_update });
        }

        let index = match self.slots.iter().position(|s| s.texture.is_none()) {
            Some(empty) => empty,
            None => {
                let (oldest, slot) = self
                    .slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.count_lru > 0)
                    .max_by_key(|(i, s)| (s.count_lru, std::cmp::Reverse(*i)))?;
                log::debug!(
                    "probe cache: evicting texture {:?} from slot {} (idle {} frames)",
                    slot.texture,
                    oldest,
                    slot.count_lru
                );
                oldest
            }
        };
        self.slots[index] = Slot { texture: Some(texture), hash: None, count_lru: 0, pending: true, prepared: true };
        Some(Reservation { slot: index as u32, needs_update: true })
    }

    /// Record the hash the slot now holds, after its convolution was recorded.
    pub fn set_slot_hash(&mut self, slot: u32, hash: u64) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            s.hash = Some(hash);
        }
    }

    /// Forget a slot whose source could not be convolved.
    pub fn release(&mut self, slot: u32) {
        if let Some(s) = self.slots.get_mut(slot as usize) {
            *s = Slot::default();
        }
    }

    pub fn slot_texture(&self, slot: u32) -> Option<TextureIdentity> {
        self.slots.get(slot as usize).and_then(|s| s.texture)
    }

    pub fn slot_hash(&self, slot: u32) -> Option<u64> {
        self.slots.get(slot as usize).and_then(|s| s.hash)
    }

    /// Any slot convolved this frame.
    pub fn updated_this_frame(&self) -> bool {
        self.slots.iter().any(|s| s.pending)
    }

    /// Next slot fetched this frame and not yet convolved, in round-robin order across calls.
    pub fn next_relight(&mut self) -> Option<(u32, TextureIdentity)> {
        let n = self.slots.len();
        for offset in 0..n {
            let index = (self.relight_cursor + offset) % n;
            let slot = &mut self.slots[index];
            let Some(texture) = slot.texture else {
                continue;
            };
            if slot.prepared && !slot.pending {
                slot.pending = true;
                self.relight_cursor = (index + 1) % n;
                return Some((index as u32, texture));
            }
        }
        None
    }

    /// Drop this frame's prepared flags so no source outlives the frame it was fetched in.
    pub fn clear_prepared(&mut self) {
        for slot in &mut self.slots {
            slot.prepared = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(handle: u64) -> TextureIdentity {
        TextureIdentity { handle, generation: 0 }
    }

    #[test]
    fn unchanged_hash_skips_reconvolution() {
        let mut cache = TextureCache::new(4);
        cache.new_frame();
        let first = cache.reserve(id(1), 42).unwrap();
        assert!(first.needs_update);
        cache.set_slot_hash(first.slot, 42);

        cache.new_frame();
        let second = cache.reserve(id(1), 42).unwrap();
        assert_eq!(second, Reservation { slot: first.slot, needs_update: false });
    }

    #[test]
    fn changed_hash_reconvolves_once_per_frame() {
        let mut cache = TextureCache::new(4);
        cache.new_frame();
        let r = cache.reserve(id(1), 1).unwrap();
        cache.set_slot_hash(r.slot, 1);

        cache.new_frame();
        assert!(cache.reserve(id(1), 2).unwrap().needs_update);
        // A second fetch in the same frame must not schedule another write to the slot.
        assert!(!cache.reserve(id(1), 2).unwrap().needs_update);
    }

    #[test]
    fn capacity_sixteen_drops_exactly_one_of_seventeen() {
        let mut cache = TextureCache::new(16);
        cache.new_frame();
        let results: Vec<_> = (0..17).map(|i| cache.reserve(id(i), i)).collect();
        let slots: std::collections::HashSet<u32> = results.iter().flatten().map(|r| r.slot).collect();
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 1);
        assert_eq!(slots.len(), 16);
        assert!(slots.iter().all(|&s| s < 16));
    }

    #[test]
    fn lru_slot_is_evicted() {
        let mut cache = TextureCache::new(2);
        cache.new_frame();
        let a = cache.reserve(id(1), 1).unwrap();
        let b = cache.reserve(id(2), 2).unwrap();

        // Frame 2 touches only texture 2, so texture 1 ages further.
        cache.new_frame();
        cache.reserve(id(2), 2).unwrap();
        cache.new_frame();
        let c = cache.reserve(id(3), 3).unwrap();
        assert_eq!(c.slot, a.slot);
        assert!(c.needs_update);
        assert_eq!(cache.slot_texture(b.slot), Some(id(2)));
        assert_eq!(cache.slot_texture(a.slot), Some(id(3)));
    }

    #[test]
    fn new_generation_is_a_new_texture() {
        let mut cache = TextureCache::new(4);
        cache.new_frame();
        let r = cache.reserve(id(5), 9).unwrap();
        cache.set_slot_hash(r.slot, 9);
        cache.new_frame();
        let recreated = cache.reserve(TextureIdentity { handle: 5, generation: 1 }, 9).unwrap();
        assert!(recreated.needs_update);
        assert_ne!(recreated.slot, r.slot);
    }

    #[test]
    fn released_slot_is_reused() {
        let mut cache = TextureCache::new(1);
        cache.new_frame();
        let r = cache.reserve(id(1), 1).unwrap();
        cache.release(r.slot);
        assert_eq!(cache.slot_texture(r.slot), None);
        assert_eq!(cache.reserve(id(2), 2).unwrap().slot, r.slot);
    }

    #[test]
    fn relight_cycles_through_prepared_slots() {
        let mut cache = TextureCache::new(4);
        cache.new_frame();
        for i in 0..3 {
            let r = cache.reserve(id(i), i).unwrap();
            cache.set_slot_hash(r.slot, i);
        }

        let mut relit = Vec::new();
        for _ in 0..4 {
            cache.new_frame();
            for i in 0..3 {
                assert!(!cache.reserve(id(i), i).unwrap().needs_update);
            }
            assert!(!cache.updated_this_frame());
            relit.push(cache.next_relight().map(|(slot, _)| slot));
            cache.clear_prepared();
            assert_eq!(cache.next_relight(), None);
        }
        assert_eq!(relit, vec![Some(0), Some(1), Some(2), Some(0)]);
    }

    #[test]
    fn relight_skips_slots_not_fetched_this_frame() {
        let mut cache = TextureCache::new(4);
        cache.new_frame();
        for i in 0..2 {
            let r = cache.reserve(id(i), i).unwrap();
            cache.set_slot_hash(r.slot, i);
        }
        cache.new_frame();
        cache.reserve(id(1), 1).unwrap();
        assert_eq!(cache.next_relight(), Some((1, id(1))));
        assert_eq!(cache.next_relight(), None);
    }
}

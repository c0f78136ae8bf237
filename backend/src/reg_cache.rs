use bitflags::bitflags;

use crate::code_buffer::CodeBuffer;
use crate::HostEmitter;
use mirjit_core::inst::{NUM_GUEST_FPRS, NUM_GUEST_GPRS};

/// Total host registers per class the cache can see.
const NUM_HOST_REGS: usize = 32;

/// Host registers handed out for guest mappings, per class. The rest
/// are reserved (scratch, state pointer, temps).
const FPR_POOL: &[u8] = &[
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20,
    21, 22, 23,
];
const GPR_POOL: &[u8] = &[5, 6, 7, 12, 13, 14, 15, 16, 17, 18, 19, 20];

/// Temporary host registers, outside the allocatable pool.
const FPR_TEMPS: &[u8] = &[28, 29, 30, 31];
const GPR_TEMPS: &[u8] = &[30, 31];

bitflags! {
    /// Mapping hints for [`RegCache::map_reg`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u8 {
        /// The routine will write the register.
        const DIRTY = 1 << 0;
        /// The routine fully overwrites the value; skip the load.
        /// Only meaningful together with `DIRTY`.
        const NOINIT = 1 << 1;
    }
}

/// Register class a cache instance manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegClass {
    Gpr,
    Fpr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapState {
    Unmapped,
    Clean,
    Dirty,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: MapState,
    host: Option<u8>,
    lock: u8,
    last_use: u64,
}

impl Entry {
    const UNMAPPED: Entry = Entry {
        state: MapState::Unmapped,
        host: None,
        lock: 0,
        last_use: 0,
    };
}

/// Tracks guest→host register residency for one register class.
///
/// Protocol, per compiler routine: acquire every spill lock the
/// instruction needs, then map, then release all locks before the
/// next instruction compiles. Locked entries are never evicted, and
/// at most one guest register maps to a given host register.
pub struct RegCache {
    class: RegClass,
    entries: Vec<Entry>,
    host_to_guest: [Option<u16>; NUM_HOST_REGS],
    pool: &'static [u8],
    temp_pool: &'static [u8],
    active_temps: Vec<u8>,
    tick: u64,
}

impl RegCache {
    pub fn new(class: RegClass) -> Self {
        let (count, pool, temp_pool) = match class {
            RegClass::Gpr => (NUM_GUEST_GPRS, GPR_POOL, GPR_TEMPS),
            RegClass::Fpr => (NUM_GUEST_FPRS, FPR_POOL, FPR_TEMPS),
        };
        Self {
            class,
            entries: vec![Entry::UNMAPPED; count],
            host_to_guest: [None; NUM_HOST_REGS],
            pool,
            temp_pool,
            active_temps: Vec::new(),
            tick: 0,
        }
    }

    // -- Spill locks --

    /// Mark a guest register temporarily non-evictable. Must be
    /// balanced by `release_spill_lock` (or the bulk release) before
    /// the next instruction compiles.
    pub fn spill_lock(&mut self, r: u8) {
        self.entries[r as usize].lock += 1;
    }

    pub fn release_spill_lock(&mut self, r: u8) {
        let e = &mut self.entries[r as usize];
        debug_assert!(e.lock > 0, "release of unheld spill lock on r{r}");
        e.lock = e.lock.saturating_sub(1);
    }

    /// Drop every lock and discard temporaries. Bulk variant for
    /// routines that map irregular register sets.
    pub fn release_all_locks_and_discard_temps(&mut self) {
        for e in &mut self.entries {
            e.lock = 0;
        }
        self.discard_temps();
    }

    pub fn no_locks_held(&self) -> bool {
        self.entries.iter().all(|e| e.lock == 0)
    }

    // -- Mapping --

    /// Ensure `r` is resident in a host register and return it.
    ///
    /// `NOINIT` skips the fill from guest state; `DIRTY` marks the
    /// register for write-back on eviction or flush.
    pub fn map_reg<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        r: u8,
        flags: MapFlags,
    ) -> u8 {
        debug_assert!(
            !flags.contains(MapFlags::NOINIT) || flags.contains(MapFlags::DIRTY),
            "NOINIT mapping of r{r} must also be DIRTY"
        );
        self.tick += 1;
        let idx = r as usize;

        if let Some(host) = self.entries[idx].host {
            self.entries[idx].last_use = self.tick;
            if flags.contains(MapFlags::DIRTY) {
                self.entries[idx].state = MapState::Dirty;
            }
            return host;
        }

        let host = self.alloc_host(em, buf);
        self.host_to_guest[host as usize] = Some(r as u16);
        if !flags.contains(MapFlags::NOINIT) {
            self.fill(em, buf, host, r);
        }
        let e = &mut self.entries[idx];
        e.host = Some(host);
        e.last_use = self.tick;
        e.state = if flags.contains(MapFlags::DIRTY) {
            MapState::Dirty
        } else {
            MapState::Clean
        };
        host
    }

    /// Host register currently holding `r`. The register must have
    /// been mapped by the current routine.
    #[inline]
    pub fn host(&self, r: u8) -> u8 {
        self.entries[r as usize]
            .host
            .unwrap_or_else(|| panic!("r{r} used while unmapped"))
    }

    /// Current mapping, if any. Introspection for tests and tooling.
    pub fn mapping(&self, r: u8) -> Option<u8> {
        self.entries[r as usize].host
    }

    pub fn is_dirty(&self, r: u8) -> bool {
        self.entries[r as usize].state == MapState::Dirty
    }

    // -- Grouped mappings --

    /// Map `dest` as written and `src` as read, 1 register each.
    pub fn map_dirty_in<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        dest: u8,
        src: u8,
    ) {
        self.spill_lock(dest);
        self.spill_lock(src);
        self.map_reg(em, buf, src, MapFlags::empty());
        self.map_reg(em, buf, dest, Self::dest_flags(dest == src));
        self.release_spill_lock(dest);
        self.release_spill_lock(src);
    }

    /// Map `dest` as written and two single sources as read.
    pub fn map_dirty_in_in<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        dest: u8,
        src1: u8,
        src2: u8,
    ) {
        for r in [dest, src1, src2] {
            self.spill_lock(r);
        }
        self.map_reg(em, buf, src1, MapFlags::empty());
        self.map_reg(em, buf, src2, MapFlags::empty());
        self.map_reg(em, buf, dest, Self::dest_flags(dest == src1 || dest == src2));
        for r in [dest, src1, src2] {
            self.release_spill_lock(r);
        }
    }

    /// Map a 4-lane destination group as written and a 4-lane source
    /// group as read. Locks every lane before any mapping so group
    /// overlap cannot make the eviction choices unsafe.
    pub fn map4_dirty_in<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        dest: u8,
        src: u8,
    ) {
        for i in 0..4 {
            self.spill_lock(dest + i);
            self.spill_lock(src + i);
        }
        for i in 0..4 {
            self.map_reg(em, buf, src + i, MapFlags::empty());
        }
        let flags = Self::dest_flags(dest == src);
        for i in 0..4 {
            self.map_reg(em, buf, dest + i, flags);
        }
        for i in 0..4 {
            self.release_spill_lock(dest + i);
            self.release_spill_lock(src + i);
        }
    }

    /// Map a 4-lane destination group as written and two 4-lane
    /// source groups as read.
    pub fn map4_dirty_in_in<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        dest: u8,
        src1: u8,
        src2: u8,
    ) {
        for i in 0..4 {
            self.spill_lock(dest + i);
            self.spill_lock(src1 + i);
            self.spill_lock(src2 + i);
        }
        for i in 0..4 {
            self.map_reg(em, buf, src1 + i, MapFlags::empty());
            self.map_reg(em, buf, src2 + i, MapFlags::empty());
        }
        let flags = Self::dest_flags(dest == src1 || dest == src2);
        for i in 0..4 {
            self.map_reg(em, buf, dest + i, flags);
        }
        for i in 0..4 {
            self.release_spill_lock(dest + i);
            self.release_spill_lock(src1 + i);
            self.release_spill_lock(src2 + i);
        }
    }

    /// `map4_dirty_in`, plus one temporary host register for in-place
    /// permutations that need scratch space. The temporary stays
    /// reserved until `discard_temps`.
    pub fn map4_dirty_in_temp<E: HostEmitter>(
        &mut self,
        em: &mut E,
        buf: &mut CodeBuffer,
        dest: u8,
        src: u8,
    ) -> u8 {
        self.map4_dirty_in(em, buf, dest, src);
        self.alloc_temp()
    }

    /// Reserve a temporary host register outside the allocatable pool.
    pub fn alloc_temp(&mut self) -> u8 {
        let host = self
            .temp_pool
            .iter()
            .copied()
            .find(|t| !self.active_temps.contains(t))
            .expect("no temporary host register available");
        self.active_temps.push(host);
        host
    }

    /// Release all temporaries. Called after each instruction.
    pub fn discard_temps(&mut self) {
        self.active_temps.clear();
    }

    // -- Flush --

    /// Write back every dirty register and drop all mappings. Used at
    /// block boundaries and before any interpreter fallback.
    pub fn flush_all<E: HostEmitter>(&mut self, em: &mut E, buf: &mut CodeBuffer) {
        debug_assert!(self.no_locks_held(), "flush with spill locks held");
        for r in 0..self.entries.len() {
            let Some(host) = self.entries[r].host else {
                continue;
            };
            if self.entries[r].state == MapState::Dirty {
                self.spill(em, buf, host, r as u8);
            }
            self.host_to_guest[host as usize] = None;
            self.entries[r] = Entry::UNMAPPED;
        }
        self.discard_temps();
    }

    // -- Internal --

    fn dest_flags(overlaps_source: bool) -> MapFlags {
        // A destination overlapping a source must still be loaded;
        // otherwise the old value is never read and the fill is
        // wasted work.
        if overlaps_source {
            MapFlags::DIRTY
        } else {
            MapFlags::DIRTY | MapFlags::NOINIT
        }
    }

    /// Pick a host register, evicting the least-recently-used
    /// unlocked occupant if the pool is full.
    fn alloc_host<E: HostEmitter>(&mut self, em: &mut E, buf: &mut CodeBuffer) -> u8 {
        if let Some(&host) = self.pool.iter().find(|&&h| {
            self.host_to_guest[h as usize].is_none() && !self.active_temps.contains(&h)
        }) {
            return host;
        }

        let victim = self
            .pool
            .iter()
            .copied()
            .filter(|&h| {
                self.host_to_guest[h as usize]
                    .is_some_and(|g| self.entries[g as usize].lock == 0)
            })
            .min_by_key(|&h| {
                let g = self.host_to_guest[h as usize].unwrap();
                self.entries[g as usize].last_use
            })
            .expect("all host registers spill-locked");

        let guest = self.host_to_guest[victim as usize].unwrap() as usize;
        if self.entries[guest].state == MapState::Dirty {
            self.spill(em, buf, victim, guest as u8);
        }
        self.entries[guest] = Entry::UNMAPPED;
        self.host_to_guest[victim as usize] = None;
        victim
    }

    fn fill<E: HostEmitter>(&self, em: &mut E, buf: &mut CodeBuffer, host: u8, r: u8) {
        match self.class {
            RegClass::Gpr => em.load_gpr(buf, host, r as u16),
            RegClass::Fpr => em.load_fpr(buf, host, r as u16),
        }
    }

    fn spill<E: HostEmitter>(&self, em: &mut E, buf: &mut CodeBuffer, host: u8, r: u8) {
        match self.class {
            RegClass::Gpr => em.store_gpr(buf, host, r as u16),
            RegClass::Fpr => em.store_fpr(buf, host, r as u16),
        }
    }
}

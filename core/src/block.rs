use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::inst::IrInst;

bitflags! {
    /// Compile flags attached to an IR block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        /// Block was compiled eagerly, before first execution.
        const PRELOAD = 1 << 0;
    }
}

/// An ordered IR instruction sequence bound to a guest address range.
///
/// Owned by the block cache once compiled; immutable afterwards except
/// for explicit invalidation.
#[derive(Debug)]
pub struct IrBlock {
    pub start_addr: u32,
    /// Guest bytes covered by this block.
    pub guest_size: u32,
    pub insts: Vec<IrInst>,
    pub flags: BlockFlags,

    /// Offset into the code buffer where host code starts.
    pub native_offset: usize,
    /// Size of generated host code in bytes.
    pub native_size: usize,

    /// Cleared when the guest writes into `[start_addr, start_addr +
    /// guest_size)`; the next lookup must miss and recompile.
    pub valid: bool,
}

impl IrBlock {
    pub fn new(start_addr: u32, guest_size: u32, insts: Vec<IrInst>, flags: BlockFlags) -> Self {
        Self {
            start_addr,
            guest_size,
            insts,
            flags,
            native_offset: 0,
            native_size: 0,
            valid: true,
        }
    }

    /// Whether a guest write at `addr` overlaps this block's source
    /// range.
    pub fn overlaps(&self, start: u32, size: u32) -> bool {
        let self_end = self.start_addr.wrapping_add(self.guest_size);
        let write_end = start.wrapping_add(size);
        start < self_end && self.start_addr < write_end
    }

    /// Whether this block holds generated host code.
    pub fn is_compiled(&self) -> bool {
        self.native_size != 0
    }
}

/// Aggregate block cache statistics, recomputed on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockCacheStats {
    pub num_blocks: usize,
    /// Host bytes owned by valid blocks.
    pub code_bytes_used: usize,
    /// Host bytes stranded in invalidated blocks.
    pub code_bytes_wasted: usize,
    /// Total code buffer capacity.
    pub code_bytes_capacity: usize,
    /// Wasted / (used + wasted); 0.0 when nothing is compiled.
    pub fragmentation: f32,
}

/// Cache of compiled IR blocks with stable block numbers.
///
/// Block numbers index into `blocks` and stay valid across
/// invalidation; invalidated blocks are only dropped on a full clear.
#[derive(Debug, Default)]
pub struct IrBlockCache {
    blocks: Vec<IrBlock>,
    by_addr: FxHashMap<u32, usize>,
}

impl IrBlockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block, returning its block number.
    pub fn insert(&mut self, block: IrBlock) -> usize {
        let num = self.blocks.len();
        self.by_addr.insert(block.start_addr, num);
        self.blocks.push(block);
        num
    }

    /// Find a valid block starting exactly at `addr`.
    pub fn find(&self, addr: u32) -> Option<usize> {
        let &num = self.by_addr.get(&addr)?;
        self.blocks[num].valid.then_some(num)
    }

    pub fn get(&self, num: usize) -> Option<&IrBlock> {
        self.blocks.get(num)
    }

    pub fn get_mut(&mut self, num: usize) -> Option<&mut IrBlock> {
        self.blocks.get_mut(num)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[IrBlock] {
        &self.blocks
    }

    /// Invalidate every block whose guest range overlaps
    /// `[start, start + size)`. Returns the number invalidated.
    ///
    /// Blocks are invalidated, never patched; subsequent lookups miss
    /// and trigger recompilation.
    pub fn invalidate_range(&mut self, start: u32, size: u32) -> usize {
        let mut count = 0;
        for num in 0..self.blocks.len() {
            let block = &mut self.blocks[num];
            if block.valid && block.overlaps(start, size) {
                block.valid = false;
                self.by_addr.remove(&block.start_addr);
                count += 1;
            }
        }
        count
    }

    /// Drop all blocks. The owning driver resets the code buffer
    /// alongside this.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.by_addr.clear();
    }
}

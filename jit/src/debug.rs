//! Read-only block cache introspection for profiling and fault
//! diagnosis tooling. Statistics are recomputed on demand, never
//! persisted.

use mirjit_backend::CodeBuffer;
use mirjit_core::{BlockCacheStats, IrBlockCache};

/// Borrowed view over the JIT driver's compiled blocks.
pub struct BlockCacheDebugView<'a> {
    blocks: &'a IrBlockCache,
    code: &'a CodeBuffer,
}

impl<'a> BlockCacheDebugView<'a> {
    pub(crate) fn new(blocks: &'a IrBlockCache, code: &'a CodeBuffer) -> Self {
        Self { blocks, code }
    }

    /// Total number of blocks, including invalidated ones.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Block number for the block starting exactly at `addr`.
    ///
    /// With `real_blocks_only`, invalidated and never-compiled
    /// blocks are skipped, matching what profilers want; without it,
    /// any block record at that address is returned.
    pub fn block_num_from_start_address(
        &self,
        addr: u32,
        real_blocks_only: bool,
    ) -> Option<usize> {
        if real_blocks_only {
            let num = self.blocks.find(addr)?;
            self.blocks.get(num)?.is_compiled().then_some(num)
        } else {
            self.blocks
                .blocks()
                .iter()
                .position(|b| b.start_addr == addr)
        }
    }

    /// Host byte range `(offset, size)` of a block, for disassembly
    /// tooling.
    pub fn block_code_range(&self, block_num: usize) -> Option<(usize, usize)> {
        let block = self.blocks.get(block_num)?;
        block
            .is_compiled()
            .then_some((block.native_offset, block.native_size))
    }

    /// Guest start address of a block.
    pub fn block_start_addr(&self, block_num: usize) -> Option<u32> {
        self.blocks.get(block_num).map(|b| b.start_addr)
    }

    /// Aggregate statistics for capacity-planning displays.
    pub fn compute_stats(&self) -> BlockCacheStats {
        let mut used = 0usize;
        let mut wasted = 0usize;
        for block in self.blocks.blocks() {
            if !block.is_compiled() {
                continue;
            }
            if block.valid {
                used += block.native_size;
            } else {
                wasted += block.native_size;
            }
        }
        let total = used + wasted;
        BlockCacheStats {
            num_blocks: self.blocks.len(),
            code_bytes_used: used,
            code_bytes_wasted: wasted,
            code_bytes_capacity: self.code.capacity(),
            fragmentation: if total == 0 {
                0.0
            } else {
                wasted as f32 / total as f32
            },
        }
    }
}

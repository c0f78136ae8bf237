//! Native JIT driver — compile-on-demand lifecycle over the backend.
//!
//! Owns the block cache and the backend, exposes the fixed entry
//! hooks to the execution driver, and resolves arbitrary host code
//! addresses for crash reports and profilers.

pub mod debug;

pub use debug::BlockCacheDebugView;

use thiserror::Error;
use tracing::{debug, warn};

use mirjit_backend::{BackendError, HostEmitter, NativeBackend, NativeHooks};
use mirjit_core::{BlockFlags, IrBlock, IrBlockCache, IrInst};

/// Default size of the managed code region.
const DEFAULT_CODE_SIZE: usize = 16 * 1024 * 1024;

/// Compilation failures. Always per-block: the caller falls back to
/// interpretation for the failed block and continues.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("front end produced no IR for {addr:#010x}")]
    Frontend { addr: u32 },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// IR sequence handed over by the front-end decoder.
#[derive(Debug)]
pub struct TranslatedSeq {
    pub insts: Vec<IrInst>,
    /// Guest bytes consumed by the sequence.
    pub guest_size: u32,
}

/// Front-end decoder seam: turns guest machine code into IR. External
/// to the JIT core; invoked only on block cache misses.
pub trait IrFrontend {
    fn translate(&mut self, addr: u32) -> Option<TranslatedSeq>;
}

/// Compile-on-demand driver over one native backend.
pub struct NativeJit<E: HostEmitter> {
    backend: NativeBackend<E>,
    blocks: IrBlockCache,
}

impl<E: HostEmitter> NativeJit<E> {
    pub fn new(emitter: E) -> Result<Self, JitError> {
        Self::with_code_size(emitter, DEFAULT_CODE_SIZE)
    }

    pub fn with_code_size(emitter: E, code_size: usize) -> Result<Self, JitError> {
        let mut backend = NativeBackend::new(emitter, code_size)?;
        backend.generate_fixed_code();
        Ok(Self {
            backend,
            blocks: IrBlockCache::new(),
        })
    }

    pub fn backend(&self) -> &NativeBackend<E> {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut NativeBackend<E> {
        &mut self.backend
    }

    /// Compile the block starting at `addr`, or return the existing
    /// block number if a valid one is cached.
    ///
    /// `preload` marks eager compilation ahead of first execution;
    /// it is recorded on the block and does not change code
    /// generation.
    pub fn compile_block(
        &mut self,
        frontend: &mut impl IrFrontend,
        addr: u32,
        preload: bool,
    ) -> Result<usize, JitError> {
        if let Some(num) = self.blocks.find(addr) {
            return Ok(num);
        }

        let seq = frontend
            .translate(addr)
            .ok_or(JitError::Frontend { addr })?;
        let flags = if preload {
            BlockFlags::PRELOAD
        } else {
            BlockFlags::empty()
        };
        let mut block = IrBlock::new(addr, seq.guest_size, seq.insts, flags);

        let block_num = self.blocks.len();
        if let Err(err) = self.backend.compile_block(&mut block, block_num) {
            warn!(addr = format_args!("{addr:#010x}"), %err,
                "block compilation failed, falling back to interpreter");
            return Err(err.into());
        }
        Ok(self.blocks.insert(block))
    }

    /// Block number for a valid compiled block starting at `addr`.
    pub fn find_block(&self, addr: u32) -> Option<usize> {
        self.blocks.find(addr)
    }

    // -- Cache control --

    /// Invalidate every block overlapping a guest write. Invalidated
    /// blocks are never patched; the next lookup misses and
    /// recompiles.
    pub fn invalidate_range(&mut self, start: u32, size: u32) {
        let count = self.blocks.invalidate_range(start, size);
        if count > 0 {
            debug!(start = format_args!("{start:#010x}"), size, count,
                "invalidated blocks");
        }
    }

    /// Drop every compiled block and rewind the code buffer to the
    /// end of the fixed code. Hooks survive; block numbers do not.
    pub fn clear_cache(&mut self) {
        debug!(blocks = self.blocks.len(), "clearing block cache");
        self.blocks.clear();
        self.backend.reset_to_fixed_code();
    }

    // -- Entry hooks --

    /// Fixed entry addresses, valid until the next cache-wide clear.
    pub fn hooks(&self) -> NativeHooks {
        self.backend.hooks()
    }

    pub fn dispatcher(&self) -> *const u8 {
        self.backend.hooks().dispatcher
    }

    pub fn crash_handler(&self) -> *const u8 {
        self.backend.hooks().crash_handler
    }

    pub fn is_at_dispatch_fetch(&self, ptr: *const u8) -> bool {
        std::ptr::eq(ptr, self.backend.hooks().dispatch_fetch)
    }

    // -- Code pointer classification --

    pub fn code_in_range(&self, ptr: *const u8) -> bool {
        self.backend.code_in_range(ptr)
    }

    /// Human-readable description of a host code address: a hook
    /// name, a block/offset pair, or `None` when the address is not
    /// managed code. Crash tooling falls back to raw display on
    /// `None`.
    pub fn describe_code_ptr(&self, ptr: *const u8) -> Option<String> {
        if let Some(name) = self.backend.describe_hook(ptr) {
            return Some(name.to_string());
        }
        let offset = self.backend.offset_from_code_ptr(ptr)?;
        for (num, block) in self.blocks.blocks().iter().enumerate() {
            if block.is_compiled()
                && offset >= block.native_offset
                && offset < block.native_offset + block.native_size
            {
                return Some(format!(
                    "block {num} +{:#x} (pc={:#010x})",
                    offset - block.native_offset,
                    block.start_addr,
                ));
            }
        }
        None
    }

    /// Read-only introspection over the compiled blocks.
    pub fn block_cache_debug(&self) -> BlockCacheDebugView<'_> {
        BlockCacheDebugView::new(&self.blocks, self.backend.code_buffer())
    }
}

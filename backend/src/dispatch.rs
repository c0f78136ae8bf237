use bitflags::bitflags;
use tracing::{debug, trace};

use crate::code_buffer::CodeBuffer;
use crate::reg_cache::{RegCache, RegClass};
use crate::{BackendError, FixedCodeOffsets, HostEmitter, NativeHooks};
use mirjit_core::{IrBlock, IrCategory, IrInst, IrOp};

/// Refuse to compile a block with less than this much buffer left.
const MIN_CODE_BUF_REMAINING: usize = 4096;

bitflags! {
    /// Per-category disable mask for the compiler routines.
    ///
    /// A disabled category delegates every instruction to the generic
    /// interpreted path — the mechanism for isolating a miscompiling
    /// pattern without losing correctness. All categories default to
    /// enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DisabledRoutines: u32 {
        const ARITH      = 1 << 0;
        const MEMORY     = 1 << 1;
        const EXIT       = 1 << 2;
        const SYSTEM     = 1 << 3;
        const VEC_ASSIGN = 1 << 4;
        const VEC_ARITH  = 1 << 5;
        const VEC_HORIZ  = 1 << 6;
        const VEC_PACK   = 1 << 7;
        const VEC_CLAMP  = 1 << 8;
    }
}

impl DisabledRoutines {
    fn for_category(cat: IrCategory) -> Self {
        match cat {
            IrCategory::Arith => Self::ARITH,
            IrCategory::Memory => Self::MEMORY,
            IrCategory::Exit => Self::EXIT,
            IrCategory::System => Self::SYSTEM,
            IrCategory::VecAssign => Self::VEC_ASSIGN,
            IrCategory::VecArith => Self::VEC_ARITH,
            IrCategory::VecHoriz => Self::VEC_HORIZ,
            IrCategory::VecPack => Self::VEC_PACK,
            IrCategory::VecClamp => Self::VEC_CLAMP,
        }
    }
}

/// Aggregate backend counters. Cheap to keep, read by tooling.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugStats {
    pub blocks_compiled: u64,
    pub insts_compiled: u64,
    pub generic_fallbacks: u64,
}

/// One host backend: dispatch table, register caches, code buffer,
/// and the fixed entry code shared by all compiled blocks.
pub struct NativeBackend<E: HostEmitter> {
    pub(crate) emitter: E,
    pub(crate) code: CodeBuffer,
    pub(crate) gpr: RegCache,
    pub(crate) fpr: RegCache,
    disabled: DisabledRoutines,
    stats: DebugStats,
    fixed: Option<FixedCodeOffsets>,
    /// Compile in per-instruction instrumentation. Off by default;
    /// never assumed present in the hot path.
    debug_stats_enabled: bool,
}

impl<E: HostEmitter> NativeBackend<E> {
    pub fn new(emitter: E, code_size: usize) -> Result<Self, BackendError> {
        Ok(Self {
            emitter,
            code: CodeBuffer::new(code_size)?,
            gpr: RegCache::new(RegClass::Gpr),
            fpr: RegCache::new(RegClass::Fpr),
            disabled: DisabledRoutines::empty(),
            stats: DebugStats::default(),
            fixed: None,
            debug_stats_enabled: false,
        })
    }

    /// Generate the dispatcher entry, fetch-dispatch entry, and crash
    /// handler. Must run once before any block compiles; runs again
    /// only after a full reset.
    pub fn generate_fixed_code(&mut self) {
        debug_assert!(self.fixed.is_none(), "fixed code generated twice");
        let fixed = self.emitter.emit_fixed_code(&mut self.code);
        self.code.sync_icache(0, fixed.end);
        self.fixed = Some(fixed);
    }

    pub fn fixed_code(&self) -> Option<&FixedCodeOffsets> {
        self.fixed.as_ref()
    }

    /// Fixed entry addresses, valid until the next full reset.
    pub fn hooks(&self) -> NativeHooks {
        let fixed = self.fixed.expect("fixed code not generated");
        NativeHooks {
            dispatcher: self.code.ptr_at(fixed.dispatcher),
            dispatch_fetch: self.code.ptr_at(fixed.dispatch_fetch),
            crash_handler: self.code.ptr_at(fixed.crash_handler),
        }
    }

    pub fn set_disabled(&mut self, disabled: DisabledRoutines) {
        self.disabled = disabled;
    }

    pub fn set_debug_stats_enabled(&mut self, enabled: bool) {
        self.debug_stats_enabled = enabled;
    }

    pub fn stats(&self) -> &DebugStats {
        &self.stats
    }

    pub fn code_buffer(&self) -> &CodeBuffer {
        &self.code
    }

    pub fn emitter(&self) -> &E {
        &self.emitter
    }

    pub fn emitter_mut(&mut self) -> &mut E {
        &mut self.emitter
    }

    /// Register cache introspection for tests and tooling.
    pub fn fpr_cache(&self) -> &RegCache {
        &self.fpr
    }

    pub fn gpr_cache(&self) -> &RegCache {
        &self.gpr
    }

    /// Rewind the code buffer to the end of the fixed code,
    /// discarding every compiled block. Hooks stay valid.
    pub fn reset_to_fixed_code(&mut self) {
        let end = self.fixed.expect("fixed code not generated").end;
        self.code.truncate(end);
    }

    // -- Code range queries --

    pub fn code_in_range(&self, ptr: *const u8) -> bool {
        self.code.contains(ptr)
    }

    pub fn offset_from_code_ptr(&self, ptr: *const u8) -> Option<usize> {
        self.code.offset_of(ptr)
    }

    /// Symbolic name when `ptr` falls inside the fixed entry code.
    pub fn describe_hook(&self, ptr: *const u8) -> Option<&'static str> {
        let offset = self.code.offset_of(ptr)?;
        let fixed = self.fixed?;
        if offset >= fixed.end {
            return None;
        }
        if offset >= fixed.crash_handler {
            Some("crashHandler")
        } else if offset >= fixed.dispatch_fetch {
            Some("dispatchFetch")
        } else {
            Some("dispatcher")
        }
    }

    // -- Block compilation --

    /// Compile a block's IR sequence into the code buffer, recording
    /// the resulting byte range on the block.
    pub fn compile_block(
        &mut self,
        block: &mut IrBlock,
        block_num: usize,
    ) -> Result<(), BackendError> {
        debug_assert!(self.fixed.is_some(), "fixed code not generated");
        if self.code.remaining() < MIN_CODE_BUF_REMAINING {
            return Err(BackendError::CodeBufferFull {
                remaining: self.code.remaining(),
            });
        }

        let start = self.code.offset();
        let insts = std::mem::take(&mut block.insts);
        for &inst in &insts {
            self.compile_inst(inst);
        }
        block.insts = insts;

        // Register caches hold nothing across blocks.
        let Self { emitter, code, gpr, fpr, .. } = self;
        gpr.flush_all(emitter, code);
        fpr.flush_all(emitter, code);

        // Fall through to the dispatcher at the end of the range.
        let end_pc = block.start_addr.wrapping_add(block.guest_size);
        self.emitter.exit_to_const(&mut self.code, end_pc);

        block.native_offset = start;
        block.native_size = self.code.offset() - start;
        self.code.sync_icache(start, block.native_size);

        self.stats.blocks_compiled += 1;
        debug!(
            block_num,
            start_addr = format_args!("{:#010x}", block.start_addr),
            native_offset = start,
            native_size = block.native_size,
            "compiled block"
        );
        Ok(())
    }

    /// Route one instruction to the routine for its opcode category,
    /// honoring the disable mask first.
    pub fn compile_inst(&mut self, inst: IrInst) {
        if self.debug_stats_enabled {
            trace!(op = ?inst.op, dest = inst.dest, src1 = inst.src1,
                src2 = inst.src2, constant = inst.constant, "compile inst");
            self.stats.insts_compiled += 1;
        }

        let cat = inst.op.category();
        if self.disabled.contains(DisabledRoutines::for_category(cat)) {
            self.comp_generic(inst);
        } else {
            match cat {
                IrCategory::Arith => self.comp_arith(inst),
                IrCategory::Memory => self.comp_memory(inst),
                IrCategory::Exit => self.comp_exit(inst),
                IrCategory::System => self.comp_generic(inst),
                IrCategory::VecAssign => self.comp_vec_assign(inst),
                IrCategory::VecArith => self.comp_vec_arith(inst),
                IrCategory::VecHoriz => self.comp_vec_horiz(inst),
                IrCategory::VecPack => self.comp_vec_pack(inst),
                IrCategory::VecClamp => self.comp_vec_clamp(inst),
            }
        }

        self.gpr.discard_temps();
        self.fpr.discard_temps();
        debug_assert!(
            self.gpr.no_locks_held() && self.fpr.no_locks_held(),
            "spill locks leaked past {:?}",
            inst.op
        );
    }

    /// Generic path: flush both register caches, then hand the
    /// instruction to the base interpreter. Always correct, never
    /// fast — the escape valve for disabled routines and opcodes
    /// without a native sequence.
    pub fn comp_generic(&mut self, inst: IrInst) {
        let Self { emitter, code, gpr, fpr, .. } = self;
        gpr.flush_all(emitter, code);
        fpr.flush_all(emitter, code);
        emitter.interpret_fallback(code, inst);
        self.stats.generic_fallbacks += 1;
    }

    /// Invalid/unreachable opcode in a routine's switch: a defect,
    /// fatal in debug, best-effort generic fallback in release.
    pub(crate) fn invalid_op(&mut self, inst: IrInst) {
        debug_assert!(false, "invalid IR inst {:?} in routine", inst.op);
        self.comp_generic(inst);
    }
}

// Memory ops have no native sequence yet; the generic path carries
// them.
impl<E: HostEmitter> NativeBackend<E> {
    fn comp_memory(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Load32 | IrOp::Store32 => self.comp_generic(inst),
            _ => self.invalid_op(inst),
        }
    }
}

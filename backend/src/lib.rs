//! Native backend — turns IR instructions into host machine code.
//!
//! The backend owns the opcode-category dispatch, the register cache
//! protocol, and the managed code buffer. The concrete host encoder
//! sits behind the [`HostEmitter`] trait: the compiler routines emit
//! by intent (move, add, shift), never by raw byte layout.

pub mod code_buffer;
pub mod comp_scalar;
pub mod comp_vec;
pub mod dispatch;
pub mod reg_cache;

pub use code_buffer::CodeBuffer;
pub use dispatch::{DebugStats, DisabledRoutines, NativeBackend};
pub use reg_cache::{MapFlags, RegCache, RegClass};

use mirjit_core::IrInst;
use thiserror::Error;

/// Errors surfaced by the backend. Per-instruction fallback to the
/// interpreted path is not an error; these are the block-level and
/// resource-level failures.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("code buffer exhausted ({remaining} bytes remaining)")]
    CodeBufferFull { remaining: usize },
    #[error("code buffer mapping failed: {0}")]
    Map(#[from] std::io::Error),
}

/// First host integer scratch register, reserved for bit-pattern
/// manipulation sequences. Never handed out by the register cache.
pub const SCRATCH1: u8 = 28;
/// Second host integer scratch register.
pub const SCRATCH2: u8 = 29;

/// Offsets of the fixed entry code within the code buffer, generated
/// once at backend initialization.
#[derive(Debug, Clone, Copy)]
pub struct FixedCodeOffsets {
    pub dispatcher: usize,
    pub dispatch_fetch: usize,
    pub crash_handler: usize,
    /// End of the fixed code; block compilation starts here.
    pub end: usize,
}

/// Fixed entry addresses shared by all compiled blocks.
///
/// Created at backend initialization, never mutated after, torn down
/// only on a full backend reset.
#[derive(Debug, Clone, Copy)]
pub struct NativeHooks {
    pub dispatcher: *const u8,
    pub dispatch_fetch: *const u8,
    pub crash_handler: *const u8,
}

/// Host instruction emitter, called by intent.
///
/// The register cache and compiler routines hand this trait host
/// register numbers and let the implementation pick encodings. Guest
/// state lives at fixed slots relative to the state pointer; the
/// `slot` arguments are guest register numbers within the class.
pub trait HostEmitter {
    /// Whether the host has a fused and-not operation (used to pick
    /// between `andn` and `not` + `and` sequences).
    fn has_fused_andn(&self) -> bool;

    // -- Guest state spill/fill --

    fn load_fpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16);
    fn store_fpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16);
    fn load_gpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16);
    fn store_gpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16);

    // -- Float register ops (32-bit lanes) --

    fn fmv(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8);
    /// Move raw bits from an integer register into a float register.
    fn fmv_from_gpr(&mut self, buf: &mut CodeBuffer, fdst: u8, rsrc: u8);
    /// Move a float register's raw bit pattern into an integer
    /// register (sign-extended on 64-bit hosts).
    fn fmv_to_gpr(&mut self, buf: &mut CodeBuffer, rdst: u8, fsrc: u8);
    /// Set a float register to positive zero.
    fn fzero(&mut self, buf: &mut CodeBuffer, dst: u8);
    fn fadd(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8);
    fn fsub(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8);
    fn fmul(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8);
    fn fdiv(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8);
    fn fneg(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8);
    fn fabs(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8);
    /// Fused multiply-add: `dst = a * b + acc`.
    fn fmadd(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8, acc: u8);

    // -- Integer ops (on scratch and allocated GPRs) --

    fn load_imm(&mut self, buf: &mut CodeBuffer, rd: u8, val: u32);
    fn mv(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8);
    fn add(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);
    fn sub(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);
    fn and(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);
    fn or(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);
    fn xor(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);
    fn addi(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, imm: i32);
    fn andi(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, imm: i32);
    /// 64-bit logical shift right.
    fn srli(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32);
    /// 64-bit shift left.
    fn slli(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32);
    /// 32-bit logical shift right, result sign-extended.
    fn srli32(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32);
    /// 32-bit arithmetic shift right, result sign-extended.
    fn srai32(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32);
    fn not(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8);
    /// Fused `rd = a & !b`. Only called when `has_fused_andn()`.
    fn andn(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8);

    // -- Control --

    /// Store `pc` into guest state and return to the dispatcher.
    fn exit_to_const(&mut self, buf: &mut CodeBuffer, pc: u32);
    /// Call the base interpreter for one IR instruction. Register
    /// caches are flushed before this is emitted.
    fn interpret_fallback(&mut self, buf: &mut CodeBuffer, inst: IrInst);

    // -- Fixed code --

    /// Emit the dispatcher entry, fetch-dispatch entry, and crash
    /// handler. Called once, before any block compiles.
    fn emit_fixed_code(&mut self, buf: &mut CodeBuffer) -> FixedCodeOffsets;
}

//! IR model for the native JIT — instruction encoding, opcode
//! categories, and the compiled-block cache.
//!
//! The IR itself is produced by the front-end decoder; this crate
//! only defines the shape the backend dispatches on.

pub mod block;
pub mod inst;

pub use block::{BlockCacheStats, BlockFlags, IrBlock, IrBlockCache};
pub use inst::{IrCategory, IrInst, IrOp, Vec4Init};

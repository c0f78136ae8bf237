//! Scalar and control compiler routines. Structurally the same
//! engineering as the vector side, with none of the lane hazards.

use crate::dispatch::NativeBackend;
use crate::reg_cache::MapFlags;
use crate::HostEmitter;
use mirjit_core::{IrInst, IrOp};

impl<E: HostEmitter> NativeBackend<E> {
    pub(crate) fn comp_arith(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Nop => {}

            IrOp::Mov => {
                let Self { emitter: em, code: buf, gpr, .. } = self;
                gpr.map_dirty_in(em, buf, inst.dest, inst.src1);
                em.mv(buf, gpr.host(inst.dest), gpr.host(inst.src1));
            }

            IrOp::SetConst => {
                let Self { emitter: em, code: buf, gpr, .. } = self;
                gpr.spill_lock(inst.dest);
                gpr.map_reg(em, buf, inst.dest, MapFlags::DIRTY | MapFlags::NOINIT);
                gpr.release_spill_lock(inst.dest);
                em.load_imm(buf, gpr.host(inst.dest), inst.constant);
            }

            IrOp::Add | IrOp::Sub | IrOp::And | IrOp::Or | IrOp::Xor => {
                let Self { emitter: em, code: buf, gpr, .. } = self;
                gpr.map_dirty_in_in(em, buf, inst.dest, inst.src1, inst.src2);
                let (d, a, b) = (
                    gpr.host(inst.dest),
                    gpr.host(inst.src1),
                    gpr.host(inst.src2),
                );
                match inst.op {
                    IrOp::Add => em.add(buf, d, a, b),
                    IrOp::Sub => em.sub(buf, d, a, b),
                    IrOp::And => em.and(buf, d, a, b),
                    IrOp::Or => em.or(buf, d, a, b),
                    _ => em.xor(buf, d, a, b),
                }
            }

            IrOp::AddConst => {
                let Self { emitter: em, code: buf, gpr, .. } = self;
                gpr.map_dirty_in(em, buf, inst.dest, inst.src1);
                em.addi(buf, gpr.host(inst.dest), gpr.host(inst.src1), inst.constant as i32);
            }

            _ => self.invalid_op(inst),
        }
    }

    pub(crate) fn comp_exit(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::ExitToConst => {
                // Guest state must be coherent before control leaves
                // the block.
                let Self { emitter: em, code: buf, gpr, fpr, .. } = self;
                gpr.flush_all(em, buf);
                fpr.flush_all(em, buf);
                em.exit_to_const(buf, inst.constant);
            }

            _ => self.invalid_op(inst),
        }
    }
}

//! Vector-lane compiler routines.
//!
//! Lanes of a vector register are consecutive guest float registers,
//! so every routine here negotiates 4-lane groups through the
//! register cache and has to respect source/destination overlap.
//! Guest pack/unpack semantics are bit-exact reproductions of the
//! hardware's fixed-point encodings, manipulated as raw bit patterns
//! rather than numeric conversions.

use crate::code_buffer::CodeBuffer;
use crate::dispatch::NativeBackend;
use crate::reg_cache::MapFlags;
use crate::{HostEmitter, SCRATCH1, SCRATCH2};
use mirjit_core::{IrInst, IrOp, Vec4Init};

const NOT_FOUND: usize = 4;

fn find_index(arr: &[usize; 4], val: usize, start: usize) -> usize {
    arr[start..]
        .iter()
        .position(|&v| v == val)
        .map_or(NOT_FOUND, |p| p + start)
}

/// Realize one move chain over destination lanes: each lane receives
/// the previous lane's content; a true cycle closes through `temp`.
fn move_chained<E: HostEmitter>(
    em: &mut E,
    buf: &mut CodeBuffer,
    regs: &[u8; 4],
    temp: u8,
    state: &mut [usize; 4],
    lanes: &[usize],
    rotate: bool,
) {
    let first_state = state[lanes[0]];
    if rotate {
        em.fmv(buf, temp, regs[lanes[0]]);
    }
    for i in 1..lanes.len() {
        em.fmv(buf, regs[lanes[i - 1]], regs[lanes[i]]);
        state[lanes[i - 1]] = state[lanes[i]];
    }
    if rotate {
        let last = *lanes.last().unwrap();
        em.fmv(buf, regs[last], temp);
        state[last] = first_state;
    }
}

impl<E: HostEmitter> NativeBackend<E> {
    pub(crate) fn comp_vec_assign(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Vec4Init => {
                let Some(init) = Vec4Init::from_u8(inst.src1) else {
                    return self.invalid_op(inst);
                };
                let Self { emitter: em, code: buf, fpr, .. } = self;
                for i in 0..4 {
                    fpr.spill_lock(inst.dest + i);
                }
                for i in 0..4 {
                    fpr.map_reg(em, buf, inst.dest + i, MapFlags::DIRTY | MapFlags::NOINIT);
                }
                for i in 0..4 {
                    fpr.release_spill_lock(inst.dest + i);
                }

                match init {
                    Vec4Init::AllZero => {
                        for i in 0..4 {
                            em.fzero(buf, fpr.host(inst.dest + i));
                        }
                    }
                    Vec4Init::AllOne | Vec4Init::AllMinusOne => {
                        let bits = if init == Vec4Init::AllOne {
                            1.0f32.to_bits()
                        } else {
                            (-1.0f32).to_bits()
                        };
                        em.load_imm(buf, SCRATCH1, bits);
                        em.fmv_from_gpr(buf, fpr.host(inst.dest), SCRATCH1);
                        for i in 1..4 {
                            em.fmv(buf, fpr.host(inst.dest + i), fpr.host(inst.dest));
                        }
                    }
                    _ => {
                        let one = init.one_lane().unwrap();
                        em.load_imm(buf, SCRATCH1, 1.0f32.to_bits());
                        for i in 0..4 {
                            if i == one {
                                em.fmv_from_gpr(buf, fpr.host(inst.dest + i as u8), SCRATCH1);
                            } else {
                                em.fzero(buf, fpr.host(inst.dest + i as u8));
                            }
                        }
                    }
                }
            }

            IrOp::Vec4Shuffle => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                if inst.dest == inst.src1 {
                    // In-place permutation: decompose into move
                    // chains over the 4 lane positions, closing a
                    // true cycle with one temp rotation. Never worse
                    // than 6 moves total.
                    let temp = fpr.map4_dirty_in_temp(em, buf, inst.dest, inst.src1);
                    let regs = [
                        fpr.host(inst.dest),
                        fpr.host(inst.dest + 1),
                        fpr.host(inst.dest + 2),
                        fpr.host(inst.dest + 3),
                    ];

                    let mut state = [0usize, 1, 2, 3];
                    let goal = [
                        (inst.src2 as usize) & 3,
                        (inst.src2 as usize >> 2) & 3,
                        (inst.src2 as usize >> 4) & 3,
                        (inst.src2 as usize >> 6) & 3,
                    ];

                    for i in 0..4 {
                        // Lane already holds its goal content.
                        if goal[i] == state[i] {
                            continue;
                        }

                        let needed_by = find_index(&goal, state[i], i + 1);
                        let found_in = find_index(&state, goal[i], 0);
                        debug_assert!(found_in != NOT_FOUND);

                        if needed_by == NOT_FOUND || needed_by == found_in {
                            move_chained(
                                em, buf, &regs, temp, &mut state,
                                &[i, found_in],
                                needed_by == found_in,
                            );
                            continue;
                        }

                        // Move the next thing into place first and
                        // maybe avoid the temp entirely.
                        let depth2 = find_index(&goal, state[needed_by], i + 1);
                        if depth2 == NOT_FOUND || depth2 == found_in {
                            move_chained(
                                em, buf, &regs, temp, &mut state,
                                &[needed_by, i, found_in],
                                depth2 == found_in,
                            );
                            continue;
                        }

                        // Only 4 lanes, so the chain bottoms out here.
                        let depth3 = find_index(&goal, state[depth2], i + 1);
                        move_chained(
                            em, buf, &regs, temp, &mut state,
                            &[depth2, needed_by, i, found_in],
                            depth3 == found_in,
                        );
                    }
                } else {
                    // Disjoint groups: no hazard, fill lanes directly.
                    fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                    for i in 0..4 {
                        let lane = (inst.src2 >> (i * 2)) & 3;
                        em.fmv(buf, fpr.host(inst.dest + i), fpr.host(inst.src1 + lane));
                    }
                }
            }

            IrOp::Vec4Blend => {
                // Both sources are read before any lane is written,
                // so the mask order introduces no hazard.
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in_in(em, buf, inst.dest, inst.src1, inst.src2);
                for i in 0..4 {
                    let which = (inst.constant >> i) & 1;
                    let src = if which != 0 { inst.src2 } else { inst.src1 };
                    em.fmv(buf, fpr.host(inst.dest + i), fpr.host(src + i));
                }
            }

            IrOp::Vec4Mov => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                for i in 0..4 {
                    em.fmv(buf, fpr.host(inst.dest + i), fpr.host(inst.src1 + i));
                }
            }

            _ => self.invalid_op(inst),
        }
    }

    pub(crate) fn comp_vec_arith(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Vec4Add | IrOp::Vec4Sub | IrOp::Vec4Mul | IrOp::Vec4Div => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in_in(em, buf, inst.dest, inst.src1, inst.src2);
                for i in 0..4 {
                    let (d, a, b) = (
                        fpr.host(inst.dest + i),
                        fpr.host(inst.src1 + i),
                        fpr.host(inst.src2 + i),
                    );
                    match inst.op {
                        IrOp::Vec4Add => em.fadd(buf, d, a, b),
                        IrOp::Vec4Sub => em.fsub(buf, d, a, b),
                        IrOp::Vec4Mul => em.fmul(buf, d, a, b),
                        _ => em.fdiv(buf, d, a, b),
                    }
                }
            }

            IrOp::Vec4Scale => {
                // Lock the scalar before the group map can spill it.
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.spill_lock(inst.src2);
                fpr.map_reg(em, buf, inst.src2, MapFlags::empty());
                fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                fpr.release_spill_lock(inst.src2);
                for i in 0..4 {
                    em.fmul(
                        buf,
                        fpr.host(inst.dest + i),
                        fpr.host(inst.src1 + i),
                        fpr.host(inst.src2),
                    );
                }
            }

            IrOp::Vec4Neg | IrOp::Vec4Abs => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                for i in 0..4 {
                    let (d, s) = (fpr.host(inst.dest + i), fpr.host(inst.src1 + i));
                    if inst.op == IrOp::Vec4Neg {
                        em.fneg(buf, d, s);
                    } else {
                        em.fabs(buf, d, s);
                    }
                }
            }

            _ => self.invalid_op(inst),
        }
    }

    pub(crate) fn comp_vec_horiz(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Vec4Dot => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.spill_lock(inst.dest);
                for i in 0..4 {
                    fpr.spill_lock(inst.src1 + i);
                    fpr.spill_lock(inst.src2 + i);
                }
                for i in 0..4 {
                    fpr.map_reg(em, buf, inst.src1 + i, MapFlags::empty());
                    fpr.map_reg(em, buf, inst.src2 + i, MapFlags::empty());
                }
                fpr.map_reg(em, buf, inst.dest, MapFlags::DIRTY | MapFlags::NOINIT);
                for i in 0..4 {
                    fpr.release_spill_lock(inst.src1 + i);
                    fpr.release_spill_lock(inst.src2 + i);
                }
                fpr.release_spill_lock(inst.dest);

                let aliased = (inst.dest >= inst.src1 && inst.dest < inst.src1 + 4)
                    || (inst.dest >= inst.src2 && inst.dest < inst.src2 + 4);
                if aliased {
                    // The destination doubles as a source lane, so
                    // that lane's product must land first. Summation
                    // order changes; dots that need exactness are
                    // expected to be alignment-free anyway.
                    for i in 0..4 {
                        if inst.dest == inst.src1 + i || inst.dest == inst.src2 + i {
                            em.fmul(
                                buf,
                                fpr.host(inst.dest),
                                fpr.host(inst.src1 + i),
                                fpr.host(inst.src2 + i),
                            );
                        }
                    }
                    for i in 0..4 {
                        if inst.dest != inst.src1 + i && inst.dest != inst.src2 + i {
                            em.fmadd(
                                buf,
                                fpr.host(inst.dest),
                                fpr.host(inst.src1 + i),
                                fpr.host(inst.src2 + i),
                                fpr.host(inst.dest),
                            );
                        }
                    }
                } else {
                    em.fmul(buf, fpr.host(inst.dest), fpr.host(inst.src1), fpr.host(inst.src2));
                    for i in 1..4 {
                        em.fmadd(
                            buf,
                            fpr.host(inst.dest),
                            fpr.host(inst.src1 + i),
                            fpr.host(inst.src2 + i),
                            fpr.host(inst.dest),
                        );
                    }
                }
            }

            _ => self.invalid_op(inst),
        }
    }

    pub(crate) fn comp_vec_pack(&mut self, inst: IrInst) {
        match inst.op {
            // No native sequence for these yet; the generic path
            // keeps them correct.
            IrOp::Vec2Unpack16To31
            | IrOp::Vec2Unpack16To32
            | IrOp::Vec4Pack32To8
            | IrOp::Vec2Pack31To16 => self.comp_generic(inst),

            IrOp::Vec4Unpack8To32 => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.spill_lock(inst.src1);
                for i in 0..4 {
                    fpr.spill_lock(inst.dest + i);
                }
                fpr.map_reg(em, buf, inst.src1, MapFlags::empty());
                for i in 0..4 {
                    fpr.map_reg(em, buf, inst.dest + i, MapFlags::DIRTY | MapFlags::NOINIT);
                }
                fpr.release_all_locks_and_discard_temps();

                // Read the packed word once, before any lane write
                // can clobber an aliasing source.
                em.fmv_to_gpr(buf, SCRATCH2, fpr.host(inst.src1));
                for i in 0..4 {
                    // Shift walls mask the byte into the top of the
                    // 32-bit lane.
                    if i != 0 {
                        em.srli(buf, SCRATCH1, SCRATCH2, i as u32 * 8);
                        em.slli(buf, SCRATCH1, SCRATCH1, 24);
                    } else {
                        em.slli(buf, SCRATCH1, SCRATCH2, 24);
                    }
                    em.fmv_from_gpr(buf, fpr.host(inst.dest + i), SCRATCH1);
                }
            }

            IrOp::Vec4DuplicateUpperBitsAndShift1 => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                for i in 0..4 {
                    em.fmv_to_gpr(buf, SCRATCH1, fpr.host(inst.src1 + i));
                    em.srli32(buf, SCRATCH2, SCRATCH1, 8);
                    em.or(buf, SCRATCH1, SCRATCH1, SCRATCH2);
                    em.srli32(buf, SCRATCH2, SCRATCH1, 16);
                    em.or(buf, SCRATCH1, SCRATCH1, SCRATCH2);
                    em.srli32(buf, SCRATCH1, SCRATCH1, 1);
                    em.fmv_from_gpr(buf, fpr.host(inst.dest + i), SCRATCH1);
                }
            }

            IrOp::Vec4Pack31To8 => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.spill_lock(inst.dest);
                for i in 0..4 {
                    fpr.spill_lock(inst.src1 + i);
                }
                for i in 0..4 {
                    fpr.map_reg(em, buf, inst.src1 + i, MapFlags::empty());
                }
                fpr.map_reg(em, buf, inst.dest, MapFlags::DIRTY | MapFlags::NOINIT);
                fpr.release_all_locks_and_discard_temps();

                // Take bits 23..30 of each lane — the top 8 bits of
                // the guest's 31-bit fixed-point encoding — and OR
                // them into one word, low lane first.
                for i in 0..4 {
                    em.fmv_to_gpr(buf, SCRATCH1, fpr.host(inst.src1 + i));
                    em.srli(buf, SCRATCH1, SCRATCH1, 23);
                    if i == 0 {
                        em.andi(buf, SCRATCH2, SCRATCH1, 0xFF);
                    } else {
                        em.andi(buf, SCRATCH1, SCRATCH1, 0xFF);
                        em.slli(buf, SCRATCH1, SCRATCH1, 8 * i as u32);
                        em.or(buf, SCRATCH2, SCRATCH2, SCRATCH1);
                    }
                }
                em.fmv_from_gpr(buf, fpr.host(inst.dest), SCRATCH2);
            }

            IrOp::Vec2Pack32To16 => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map_dirty_in_in(em, buf, inst.dest, inst.src1, inst.src1 + 1);
                em.fmv_to_gpr(buf, SCRATCH1, fpr.host(inst.src1));
                em.fmv_to_gpr(buf, SCRATCH2, fpr.host(inst.src1 + 1));
                // The bit move sign-extended, so wall off the upper
                // half before isolating the top 16 bits of lane 0.
                em.slli(buf, SCRATCH1, SCRATCH1, 32);
                em.srli(buf, SCRATCH1, SCRATCH1, 48);
                // (lane1 & 0xFFFF0000) | lane0_top16; upper 32 bits
                // fall away on the move back.
                em.srli(buf, SCRATCH2, SCRATCH2, 16);
                em.slli(buf, SCRATCH2, SCRATCH2, 16);
                em.or(buf, SCRATCH1, SCRATCH1, SCRATCH2);
                em.fmv_from_gpr(buf, fpr.host(inst.dest), SCRATCH1);
            }

            _ => self.invalid_op(inst),
        }
    }

    pub(crate) fn comp_vec_clamp(&mut self, inst: IrInst) {
        match inst.op {
            IrOp::Vec4ClampToZero => {
                let Self { emitter: em, code: buf, fpr, .. } = self;
                fpr.map4_dirty_in(em, buf, inst.dest, inst.src1);
                for i in 0..4 {
                    // Branchless: arithmetic shift spreads the sign
                    // bit into a mask, and-not clears negative lanes.
                    em.fmv_to_gpr(buf, SCRATCH1, fpr.host(inst.src1 + i));
                    em.srai32(buf, SCRATCH2, SCRATCH1, 31);
                    if em.has_fused_andn() {
                        em.andn(buf, SCRATCH1, SCRATCH1, SCRATCH2);
                    } else {
                        em.not(buf, SCRATCH2, SCRATCH2);
                        em.and(buf, SCRATCH1, SCRATCH1, SCRATCH2);
                    }
                    em.fmv_from_gpr(buf, fpr.host(inst.dest + i), SCRATCH1);
                }
            }

            IrOp::Vec2ClampToZero => self.comp_generic(inst),

            _ => self.invalid_op(inst),
        }
    }
}

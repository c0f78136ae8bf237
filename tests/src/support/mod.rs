//! Test support: a recording host emitter and a simulator that
//! executes the recorded emission intents over a model register file,
//! so routine output can be checked semantically without a real
//! encoder.

use mirjit_backend::{
    BackendError, CodeBuffer, FixedCodeOffsets, HostEmitter, NativeBackend,
};
use mirjit_core::inst::{NUM_GUEST_FPRS, NUM_GUEST_GPRS};
use mirjit_core::{BlockFlags, IrBlock, IrInst};

/// One recorded emission intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HostOp {
    LoadFpr { host: u8, slot: u16 },
    StoreFpr { host: u8, slot: u16 },
    LoadGpr { host: u8, slot: u16 },
    StoreGpr { host: u8, slot: u16 },
    Fmv { dst: u8, src: u8 },
    FmvFromGpr { fdst: u8, rsrc: u8 },
    FmvToGpr { rdst: u8, fsrc: u8 },
    FZero { dst: u8 },
    Fadd { dst: u8, a: u8, b: u8 },
    Fsub { dst: u8, a: u8, b: u8 },
    Fmul { dst: u8, a: u8, b: u8 },
    Fdiv { dst: u8, a: u8, b: u8 },
    Fneg { dst: u8, src: u8 },
    Fabs { dst: u8, src: u8 },
    Fmadd { dst: u8, a: u8, b: u8, acc: u8 },
    LoadImm { rd: u8, val: u32 },
    Mv { rd: u8, rs: u8 },
    Add { rd: u8, a: u8, b: u8 },
    Sub { rd: u8, a: u8, b: u8 },
    And { rd: u8, a: u8, b: u8 },
    Or { rd: u8, a: u8, b: u8 },
    Xor { rd: u8, a: u8, b: u8 },
    Addi { rd: u8, rs: u8, imm: i32 },
    Andi { rd: u8, rs: u8, imm: i32 },
    Srli { rd: u8, rs: u8, sh: u32 },
    Slli { rd: u8, rs: u8, sh: u32 },
    Srli32 { rd: u8, rs: u8, sh: u32 },
    Srai32 { rd: u8, rs: u8, sh: u32 },
    Not { rd: u8, rs: u8 },
    Andn { rd: u8, a: u8, b: u8 },
    ExitToConst { pc: u32 },
    Interpret { inst: IrInst },
}

/// Emitter that records intents and writes fixed-width placeholder
/// encodings, so offsets and sizes behave like a real encoder's.
pub struct RecordingEmitter {
    pub ops: Vec<HostOp>,
    fused_andn: bool,
}

impl RecordingEmitter {
    pub fn new(fused_andn: bool) -> Self {
        Self {
            ops: Vec::new(),
            fused_andn,
        }
    }

    fn rec(&mut self, buf: &mut CodeBuffer, op: HostOp) {
        self.ops.push(op);
        buf.emit_u32(self.ops.len() as u32);
    }
}

impl HostEmitter for RecordingEmitter {
    fn has_fused_andn(&self) -> bool {
        self.fused_andn
    }

    fn load_fpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16) {
        self.rec(buf, HostOp::LoadFpr { host, slot });
    }
    fn store_fpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16) {
        self.rec(buf, HostOp::StoreFpr { host, slot });
    }
    fn load_gpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16) {
        self.rec(buf, HostOp::LoadGpr { host, slot });
    }
    fn store_gpr(&mut self, buf: &mut CodeBuffer, host: u8, slot: u16) {
        self.rec(buf, HostOp::StoreGpr { host, slot });
    }

    fn fmv(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8) {
        self.rec(buf, HostOp::Fmv { dst, src });
    }
    fn fmv_from_gpr(&mut self, buf: &mut CodeBuffer, fdst: u8, rsrc: u8) {
        self.rec(buf, HostOp::FmvFromGpr { fdst, rsrc });
    }
    fn fmv_to_gpr(&mut self, buf: &mut CodeBuffer, rdst: u8, fsrc: u8) {
        self.rec(buf, HostOp::FmvToGpr { rdst, fsrc });
    }
    fn fzero(&mut self, buf: &mut CodeBuffer, dst: u8) {
        self.rec(buf, HostOp::FZero { dst });
    }
    fn fadd(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Fadd { dst, a, b });
    }
    fn fsub(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Fsub { dst, a, b });
    }
    fn fmul(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Fmul { dst, a, b });
    }
    fn fdiv(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Fdiv { dst, a, b });
    }
    fn fneg(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8) {
        self.rec(buf, HostOp::Fneg { dst, src });
    }
    fn fabs(&mut self, buf: &mut CodeBuffer, dst: u8, src: u8) {
        self.rec(buf, HostOp::Fabs { dst, src });
    }
    fn fmadd(&mut self, buf: &mut CodeBuffer, dst: u8, a: u8, b: u8, acc: u8) {
        self.rec(buf, HostOp::Fmadd { dst, a, b, acc });
    }

    fn load_imm(&mut self, buf: &mut CodeBuffer, rd: u8, val: u32) {
        self.rec(buf, HostOp::LoadImm { rd, val });
    }
    fn mv(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8) {
        self.rec(buf, HostOp::Mv { rd, rs });
    }
    fn add(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Add { rd, a, b });
    }
    fn sub(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Sub { rd, a, b });
    }
    fn and(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::And { rd, a, b });
    }
    fn or(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Or { rd, a, b });
    }
    fn xor(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Xor { rd, a, b });
    }
    fn addi(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, imm: i32) {
        self.rec(buf, HostOp::Addi { rd, rs, imm });
    }
    fn andi(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, imm: i32) {
        self.rec(buf, HostOp::Andi { rd, rs, imm });
    }
    fn srli(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32) {
        self.rec(buf, HostOp::Srli { rd, rs, sh });
    }
    fn slli(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32) {
        self.rec(buf, HostOp::Slli { rd, rs, sh });
    }
    fn srli32(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32) {
        self.rec(buf, HostOp::Srli32 { rd, rs, sh });
    }
    fn srai32(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8, sh: u32) {
        self.rec(buf, HostOp::Srai32 { rd, rs, sh });
    }
    fn not(&mut self, buf: &mut CodeBuffer, rd: u8, rs: u8) {
        self.rec(buf, HostOp::Not { rd, rs });
    }
    fn andn(&mut self, buf: &mut CodeBuffer, rd: u8, a: u8, b: u8) {
        self.rec(buf, HostOp::Andn { rd, a, b });
    }

    fn exit_to_const(&mut self, buf: &mut CodeBuffer, pc: u32) {
        self.rec(buf, HostOp::ExitToConst { pc });
    }
    fn interpret_fallback(&mut self, buf: &mut CodeBuffer, inst: IrInst) {
        self.rec(buf, HostOp::Interpret { inst });
    }

    fn emit_fixed_code(&mut self, buf: &mut CodeBuffer) -> FixedCodeOffsets {
        let dispatcher = buf.offset();
        buf.emit_bytes(&[0u8; 8]);
        let dispatch_fetch = buf.offset();
        buf.emit_bytes(&[0u8; 8]);
        let crash_handler = buf.offset();
        buf.emit_bytes(&[0u8; 8]);
        FixedCodeOffsets {
            dispatcher,
            dispatch_fetch,
            crash_handler,
            end: buf.offset(),
        }
    }
}

/// Executes recorded intents over a model of the host register file
/// and guest state.
pub struct LaneSim {
    /// Host float registers, as raw 32-bit lane patterns.
    pub f: [u32; 32],
    /// Host integer registers, 64-bit.
    pub x: [u64; 32],
    pub guest_f: [u32; NUM_GUEST_FPRS],
    pub guest_r: [u32; NUM_GUEST_GPRS],
    pub exits: Vec<u32>,
    pub fallbacks: Vec<IrInst>,
}

impl LaneSim {
    pub fn new() -> Self {
        Self {
            f: [0; 32],
            x: [0; 32],
            guest_f: [0; NUM_GUEST_FPRS],
            guest_r: [0; NUM_GUEST_GPRS],
            exits: Vec::new(),
            fallbacks: Vec::new(),
        }
    }

    pub fn run(&mut self, ops: &[HostOp]) {
        for &op in ops {
            self.step(op);
        }
    }

    fn fop2(&mut self, dst: u8, a: u8, b: u8, f: fn(f32, f32) -> f32) {
        let r = f(
            f32::from_bits(self.f[a as usize]),
            f32::from_bits(self.f[b as usize]),
        );
        self.f[dst as usize] = r.to_bits();
    }

    fn step(&mut self, op: HostOp) {
        use HostOp::*;
        match op {
            LoadFpr { host, slot } => self.f[host as usize] = self.guest_f[slot as usize],
            StoreFpr { host, slot } => self.guest_f[slot as usize] = self.f[host as usize],
            LoadGpr { host, slot } => {
                self.x[host as usize] = self.guest_r[slot as usize] as i32 as i64 as u64
            }
            StoreGpr { host, slot } => {
                self.guest_r[slot as usize] = self.x[host as usize] as u32
            }
            Fmv { dst, src } => self.f[dst as usize] = self.f[src as usize],
            FmvFromGpr { fdst, rsrc } => self.f[fdst as usize] = self.x[rsrc as usize] as u32,
            FmvToGpr { rdst, fsrc } => {
                self.x[rdst as usize] = self.f[fsrc as usize] as i32 as i64 as u64
            }
            FZero { dst } => self.f[dst as usize] = 0,
            Fadd { dst, a, b } => self.fop2(dst, a, b, |x, y| x + y),
            Fsub { dst, a, b } => self.fop2(dst, a, b, |x, y| x - y),
            Fmul { dst, a, b } => self.fop2(dst, a, b, |x, y| x * y),
            Fdiv { dst, a, b } => self.fop2(dst, a, b, |x, y| x / y),
            Fneg { dst, src } => {
                self.f[dst as usize] = (-f32::from_bits(self.f[src as usize])).to_bits()
            }
            Fabs { dst, src } => {
                self.f[dst as usize] = f32::from_bits(self.f[src as usize]).abs().to_bits()
            }
            Fmadd { dst, a, b, acc } => {
                let r = f32::from_bits(self.f[a as usize]).mul_add(
                    f32::from_bits(self.f[b as usize]),
                    f32::from_bits(self.f[acc as usize]),
                );
                self.f[dst as usize] = r.to_bits();
            }
            LoadImm { rd, val } => self.x[rd as usize] = val as i32 as i64 as u64,
            Mv { rd, rs } => self.x[rd as usize] = self.x[rs as usize],
            Add { rd, a, b } => {
                self.x[rd as usize] = self.x[a as usize].wrapping_add(self.x[b as usize])
            }
            Sub { rd, a, b } => {
                self.x[rd as usize] = self.x[a as usize].wrapping_sub(self.x[b as usize])
            }
            And { rd, a, b } => self.x[rd as usize] = self.x[a as usize] & self.x[b as usize],
            Or { rd, a, b } => self.x[rd as usize] = self.x[a as usize] | self.x[b as usize],
            Xor { rd, a, b } => self.x[rd as usize] = self.x[a as usize] ^ self.x[b as usize],
            Addi { rd, rs, imm } => {
                self.x[rd as usize] = self.x[rs as usize].wrapping_add(imm as i64 as u64)
            }
            Andi { rd, rs, imm } => {
                self.x[rd as usize] = self.x[rs as usize] & (imm as i64 as u64)
            }
            Srli { rd, rs, sh } => self.x[rd as usize] = self.x[rs as usize] >> sh,
            Slli { rd, rs, sh } => self.x[rd as usize] = self.x[rs as usize] << sh,
            Srli32 { rd, rs, sh } => {
                let r = (self.x[rs as usize] as u32) >> sh;
                self.x[rd as usize] = r as i32 as i64 as u64;
            }
            Srai32 { rd, rs, sh } => {
                let r = (self.x[rs as usize] as u32 as i32) >> sh;
                self.x[rd as usize] = r as i64 as u64;
            }
            Not { rd, rs } => self.x[rd as usize] = !self.x[rs as usize],
            Andn { rd, a, b } => {
                self.x[rd as usize] = self.x[a as usize] & !self.x[b as usize]
            }
            ExitToConst { pc } => self.exits.push(pc),
            Interpret { inst } => self.fallbacks.push(inst),
        }
    }
}

/// Backend over a recording emitter, ready for block compilation.
pub fn test_backend(fused_andn: bool) -> NativeBackend<RecordingEmitter> {
    let mut backend = NativeBackend::new(RecordingEmitter::new(fused_andn), 1 << 20)
        .expect("code buffer");
    backend.generate_fixed_code();
    backend
}

/// Compile a single-instruction block and return the recorded intent
/// stream (including the cache flush and block exit).
pub fn compile_insts(
    backend: &mut NativeBackend<RecordingEmitter>,
    insts: &[IrInst],
) -> Vec<HostOp> {
    let start = backend.emitter().ops.len();
    let mut block = IrBlock::new(0x0880_0000, insts.len() as u32 * 4, insts.to_vec(),
        BlockFlags::empty());
    backend
        .compile_block(&mut block, 0)
        .expect("block compiles");
    backend.emitter().ops[start..].to_vec()
}

/// Compile and simulate over pre-set guest float state, returning the
/// final simulator.
pub fn run_insts(insts: &[IrInst], init_f: &[(u8, f32)]) -> LaneSim {
    let raw: Vec<(u8, u32)> = init_f.iter().map(|&(r, v)| (r, v.to_bits())).collect();
    run_insts_raw(insts, &raw)
}

/// As `run_insts`, but with raw lane bit patterns (pack/unpack and
/// clamp operate on encodings no `f32` literal can spell).
pub fn run_insts_raw(insts: &[IrInst], init_f: &[(u8, u32)]) -> LaneSim {
    let mut backend = test_backend(false);
    let ops = compile_insts(&mut backend, insts);
    let mut sim = LaneSim::new();
    for &(r, bits) in init_f {
        sim.guest_f[r as usize] = bits;
    }
    sim.run(&ops);
    sim
}

pub fn err_is_buffer_full(err: &BackendError) -> bool {
    matches!(err, BackendError::CodeBufferFull { .. })
}

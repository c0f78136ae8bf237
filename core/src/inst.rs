/// Number of guest general-purpose registers visible to the IR.
pub const NUM_GUEST_GPRS: usize = 32;

/// Number of guest float registers visible to the IR. The scalar FPU
/// registers come first, followed by the vector unit's lanes, numbered
/// consecutively with 4 lanes per vector register.
pub const NUM_GUEST_FPRS: usize = 160;

/// IR opcodes consumed by the native backends.
///
/// The set is fixed by the front end; the backend only dispatches on
/// it. Vector ops operate on 4-lane (or 2-lane) register groups whose
/// lanes are consecutive float register numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IrOp {
    Nop = 0,

    // -- GPR arithmetic/logic --
    Mov,
    SetConst,
    Add,
    Sub,
    And,
    Or,
    Xor,
    AddConst,

    // -- Memory (generic path for now) --
    Load32,
    Store32,

    // -- Control --
    ExitToConst,
    Interpret,

    // -- Vector assign --
    Vec4Init,
    Vec4Shuffle,
    Vec4Blend,
    Vec4Mov,

    // -- Vector arithmetic --
    Vec4Add,
    Vec4Sub,
    Vec4Mul,
    Vec4Div,
    Vec4Scale,
    Vec4Neg,
    Vec4Abs,

    // -- Vector horizontal --
    Vec4Dot,

    // -- Vector pack/unpack --
    Vec2Unpack16To31,
    Vec2Unpack16To32,
    Vec4Unpack8To32,
    Vec4DuplicateUpperBitsAndShift1,
    Vec4Pack31To8,
    Vec4Pack32To8,
    Vec2Pack31To16,
    Vec2Pack32To16,

    // -- Vector clamp --
    Vec4ClampToZero,
    Vec2ClampToZero,
}

/// Opcode categories, one per backend compiler routine.
///
/// The dispatcher routes each instruction to the routine matching its
/// category, after consulting the per-category disable mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IrCategory {
    Arith,
    Memory,
    Exit,
    System,
    VecAssign,
    VecArith,
    VecHoriz,
    VecPack,
    VecClamp,
}

impl IrOp {
    /// Category of this opcode, used for dispatch and for the
    /// per-routine disable hatch.
    pub fn category(self) -> IrCategory {
        use IrOp::*;
        match self {
            Nop | Mov | SetConst | Add | Sub | And | Or | Xor | AddConst => {
                IrCategory::Arith
            }
            Load32 | Store32 => IrCategory::Memory,
            ExitToConst => IrCategory::Exit,
            Interpret => IrCategory::System,
            Vec4Init | Vec4Shuffle | Vec4Blend | Vec4Mov => {
                IrCategory::VecAssign
            }
            Vec4Add | Vec4Sub | Vec4Mul | Vec4Div | Vec4Scale | Vec4Neg
            | Vec4Abs => IrCategory::VecArith,
            Vec4Dot => IrCategory::VecHoriz,
            Vec2Unpack16To31 | Vec2Unpack16To32 | Vec4Unpack8To32
            | Vec4DuplicateUpperBitsAndShift1 | Vec4Pack31To8
            | Vec4Pack32To8 | Vec2Pack31To16 | Vec2Pack32To16 => {
                IrCategory::VecPack
            }
            Vec4ClampToZero | Vec2ClampToZero => IrCategory::VecClamp,
        }
    }
}

/// One IR instruction: opcode, destination, up to two sources, and an
/// auxiliary constant. Operands are guest register numbers within the
/// class the opcode implies. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrInst {
    pub op: IrOp,
    pub dest: u8,
    pub src1: u8,
    pub src2: u8,
    pub constant: u32,
}

impl IrInst {
    pub fn new(op: IrOp, dest: u8, src1: u8, src2: u8) -> Self {
        Self {
            op,
            dest,
            src1,
            src2,
            constant: 0,
        }
    }

    pub fn with_constant(op: IrOp, dest: u8, src1: u8, src2: u8, constant: u32) -> Self {
        Self {
            op,
            dest,
            src1,
            src2,
            constant,
        }
    }
}

/// Vector init selectors carried in `src1` of `Vec4Init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Vec4Init {
    AllZero = 0,
    AllOne,
    AllMinusOne,
    Set1000,
    Set0100,
    Set0010,
    Set0001,
}

impl Vec4Init {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Vec4Init::AllZero,
            1 => Vec4Init::AllOne,
            2 => Vec4Init::AllMinusOne,
            3 => Vec4Init::Set1000,
            4 => Vec4Init::Set0100,
            5 => Vec4Init::Set0010,
            6 => Vec4Init::Set0001,
            _ => return None,
        })
    }

    /// Lane index that receives 1.0 for the single-lane selectors.
    pub fn one_lane(self) -> Option<usize> {
        match self {
            Vec4Init::Set1000 => Some(0),
            Vec4Init::Set0100 => Some(1),
            Vec4Init::Set0010 => Some(2),
            Vec4Init::Set0001 => Some(3),
            _ => None,
        }
    }
}

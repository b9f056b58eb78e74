mod chunk;

pub use chunk::*;

/// Index of a 32 bit register in the vm register file.
pub type Reg = u32;

/// Index of an input slot in a bundle's input table.
pub type Slot = u32;

/// Every instruction is encoded as `[opcode, a, b, c, d]`.
pub const INSTRUCTION_WORDS: usize = 5;

macro_rules! define_ops {
    ($(
        $(#[$meta:meta])*
        $name:ident = $code:literal $(( $($field:ident : $ty:ty),* ))?
    ),* $(,)?) => {
        /// A single vm instruction.
        ///
        /// Operands follow the `inputs..., output` convention: register sources come first,
        /// the destination register comes last. Memory operations address input slots in
        /// 32 bit words.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        pub enum VMOp {
            $(
                $(#[$meta])*
                $name $(( $($ty),* ))?,
            )*
        }

        impl VMOp {
            pub fn opcode(&self) -> u32 {
                match self {
                    $(VMOp::$name { .. } => $code,)*
                }
            }

            pub fn mnemonic(&self) -> &'static str {
                match self {
                    $(VMOp::$name { .. } => stringify!($name),)*
                }
            }

            pub fn encode(&self) -> [u32; INSTRUCTION_WORDS] {
                match *self {
                    $(
                        VMOp::$name $(( $($field),* ))? => {
                            let operands: &[u32] = &[$($($field as u32),*)?];
                            let mut words = [0; INSTRUCTION_WORDS];
                            words[0] = $code;
                            words[1..1 + operands.len()].copy_from_slice(operands);
                            words
                        }
                    )*
                }
            }

            /// Decode an instruction, returns `None` for unknown opcodes.
            pub fn decode(words: [u32; INSTRUCTION_WORDS]) -> Option<Self> {
                #[allow(unused_mut, unused_variables)]
                let mut operands = words[1..].iter().copied();
                match words[0] {
                    $(
                        $code => Some(VMOp::$name $(( $({
                            let $field = operands.next()?;
                            $field as $ty
                        }),* ))?),
                    )*
                    _ => None,
                }
            }
        }
    };
}

define_ops! {
    // registers & memory
    LitI = 0 (value: i32, dst: Reg),
    Mov = 1 (src: Reg, dst: Reg),
    LoadInput = 2 (slot: Slot, offset: u32, dst: Reg),
    StoreInput = 3 (slot: Slot, offset: u32, src: Reg),
    /// `dst = regs[regs[ptr] + offset]`
    LoadPtr = 4 (ptr: Reg, offset: u32, dst: Reg),
    /// `regs[regs[ptr] + offset] = src`
    StorePtr = 5 (ptr: Reg, offset: u32, src: Reg),
    /// `dst = input[slot][regs[ptr] + offset]`
    LoadInputPtr = 6 (slot: Slot, ptr: Reg, offset: u32, dst: Reg),
    /// `input[slot][regs[ptr] + offset] = src`
    StoreInputPtr = 7 (slot: Slot, ptr: Reg, offset: u32, src: Reg),
    /// Host call: the result is written at `base`, arguments follow it.
    Call = 8 (id: u32, base: Reg),

    // integer arithmetic
    AddI = 10 (a: Reg, b: Reg, dst: Reg),
    SubI = 11 (a: Reg, b: Reg, dst: Reg),
    MulI = 12 (a: Reg, b: Reg, dst: Reg),
    DivI = 13 (a: Reg, b: Reg, dst: Reg),
    ModI = 14 (a: Reg, b: Reg, dst: Reg),
    /// `dst = a + b * c`
    MadI = 15 (a: Reg, b: Reg, c: Reg, dst: Reg),
    MinI = 16 (a: Reg, b: Reg, dst: Reg),
    MaxI = 17 (a: Reg, b: Reg, dst: Reg),
    DivU = 18 (a: Reg, b: Reg, dst: Reg),
    ModU = 19 (a: Reg, b: Reg, dst: Reg),

    // float arithmetic
    AddF = 20 (a: Reg, b: Reg, dst: Reg),
    SubF = 21 (a: Reg, b: Reg, dst: Reg),
    MulF = 22 (a: Reg, b: Reg, dst: Reg),
    DivF = 23 (a: Reg, b: Reg, dst: Reg),
    ModF = 24 (a: Reg, b: Reg, dst: Reg),
    MinF = 25 (a: Reg, b: Reg, dst: Reg),
    MaxF = 26 (a: Reg, b: Reg, dst: Reg),

    // relational, always produce 0 or 1
    LtU = 30 (a: Reg, b: Reg, dst: Reg),
    GeU = 31 (a: Reg, b: Reg, dst: Reg),
    LtI = 32 (a: Reg, b: Reg, dst: Reg),
    GeI = 33 (a: Reg, b: Reg, dst: Reg),
    EqI = 34 (a: Reg, b: Reg, dst: Reg),
    NeI = 35 (a: Reg, b: Reg, dst: Reg),
    NotI = 36 (a: Reg, dst: Reg),
    LtF = 37 (a: Reg, b: Reg, dst: Reg),
    GeF = 38 (a: Reg, b: Reg, dst: Reg),
    EqF = 39 (a: Reg, b: Reg, dst: Reg),
    NeF = 40 (a: Reg, b: Reg, dst: Reg),

    // logical
    OrL = 41 (a: Reg, b: Reg, dst: Reg),
    AndL = 42 (a: Reg, b: Reg, dst: Reg),

    // intrinsics
    FracF = 50 (a: Reg, dst: Reg),
    FloorF = 51 (a: Reg, dst: Reg),
    CeilF = 52 (a: Reg, dst: Reg),
    SinF = 53 (a: Reg, dst: Reg),
    CosF = 54 (a: Reg, dst: Reg),
    AbsF = 55 (a: Reg, dst: Reg),
    SqrtF = 56 (a: Reg, dst: Reg),
    NegF = 57 (a: Reg, dst: Reg),
    NegI = 58 (a: Reg, dst: Reg),

    // casts
    U32ToF32 = 60 (a: Reg, dst: Reg),
    I32ToF32 = 61 (a: Reg, dst: Reg),
    F32ToI32 = 62 (a: Reg, dst: Reg),
    F32ToU32 = 63 (a: Reg, dst: Reg),

    // flow control
    /// Jump to an absolute instruction index.
    Jump = 70 (target: u32),
    /// Skip the next instruction when `cond` is non zero; the next instruction is expected to be a `Jump`.
    JumpIf = 71 (cond: Reg),
    Ret = 72,
}

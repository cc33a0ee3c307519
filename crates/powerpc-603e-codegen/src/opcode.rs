//! The host-instruction opcode space the translator can emit, naming every variant the
//! original recompiler's `GENX86_OPCODE` enum did. Not every variant is reachable from the
//! current translator (the Model 3 PowerPC core runs exclusively in 32-bit mode and this
//! workspace never emits the SSE2 double-precision paths `MOVDRX`/`MOVDXR`/`MOVQMX`/
//! `MOVQXM` use on the original's x87-free float path), but the names stay so the
//! dispatch tables in `translator.rs` read against the same vocabulary as the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenOp {
    Add,
    AddI,
    AddIm,
    AddMr,
    Adc,
    AdcI,
    AdcMr,
    And,
    AndI,
    AndIm,
    AndMr,
    Bsr,
    Bswap,
    Call,
    CallI,
    Cmp,
    CmpI,
    CmpIm,
    CmpMr,
    Idiv,
    Imul,
    Ja,
    Jae,
    Jb,
    Jg,
    Jl,
    Jmp,
    JmpI,
    JmpM,
    JmpR,
    Jns,
    Jnz,
    Jz,
    Mov,
    MovI,
    MovIm,
    MovMr,
    MovRm,
    MovR8M8,
    MovM8R8,
    MovsR8R32,
    MovsR16R32,
    MovzM8R32,
    MovzR8R32,
    MovzR16R32,
    Mul,
    Neg,
    Not,
    Or,
    OrI,
    OrIm,
    OrMr,
    Pop,
    Popad,
    Push,
    Pushad,
    PushI,
    Ret,
    RolCl,
    RolI,
    SetcR8,
    SetncR8,
    SetzR8,
    ShlCl,
    ShlI,
    ShrCl,
    ShrI,
    Sub,
    SubI,
    SubIm,
    SubMr,
    TestI,
    XchgR8R8,
    Xor,
    XorI,
    XorMr,
}

impl GenOp {
    /// `true` for instructions whose `dst_param`/`src_param` pair names two general
    /// registers rather than a register/immediate or register/memory-displacement pair.
    #[must_use]
    pub const fn is_register_pair(self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Adc
                | Self::And
                | Self::Cmp
                | Self::Mov
                | Self::Or
                | Self::Sub
                | Self::Xor
        )
    }
}

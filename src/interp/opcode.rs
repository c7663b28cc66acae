//! The closed JVM opcode enumeration the interpreter's dispatch table is
//! built over.

use std::fmt;

/// The textual mnemonic category of an opcode, used to pick the right
/// [`Transfer`](super::Transfer) hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeCategory {
    /// Pushes a literal/constant value.
    Constant,
    /// Reads a local variable onto the stack.
    Load,
    /// Writes the top of stack into a local variable.
    Store,
    /// A two-operand arithmetic/logic/bitwise operator.
    Binary,
    /// A one-operand arithmetic operator (negation).
    Unary,
    /// A narrowing/widening numeric conversion.
    Cast,
    /// A value comparison that produces an integer result.
    Compare,
    /// An unconditional or conditional control-flow jump.
    Jump,
    /// A multi-way branch (`tableswitch`/`lookupswitch`).
    Switch,
    /// A method invocation.
    Invoke,
    /// An object/array allocation.
    New,
    /// An instance/static field access.
    Field,
    /// An array element access or length query.
    Array,
    /// A `monitorenter`/`monitorexit`.
    Monitor,
    /// An `athrow`.
    Throw,
    /// A method return.
    Return,
    /// Stack-shuffling instructions (`pop`, `dup`, `swap`, ...).
    StackOp,
    /// Everything else (`nop`, `checkcast`, `instanceof`, `iinc`, `wide`).
    Misc,
}

macro_rules! opcodes {
    ($( $tag:literal => $name:ident ),+ $(,)?) => {
        /// A single JVM opcode, closed over the JVM opcode enumeration.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $( $name = $tag, )+
        }

        impl Opcode {
            /// Decodes a raw opcode byte.
            ///
            /// Returns `None` for bytes that do not correspond to any
            /// defined opcode.
            #[must_use]
            pub fn from_byte(byte: u8) -> Option<Self> {
                match byte {
                    $( $tag => Some(Self::$name), )+
                    _ => None,
                }
            }

            /// The raw opcode byte.
            #[must_use]
            pub fn as_byte(self) -> u8 {
                self as u8
            }
        }

        impl fmt::Display for Opcode {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = match self {
                    $( Self::$name => stringify!($name), )+
                };
                write!(f, "{}", name.to_lowercase())
            }
        }
    };
}

opcodes! {
    0 => Nop, 1 => AconstNull,
    2 => IconstM1, 3 => Iconst0, 4 => Iconst1, 5 => Iconst2, 6 => Iconst3, 7 => Iconst4, 8 => Iconst5,
    9 => Lconst0, 10 => Lconst1,
    11 => Fconst0, 12 => Fconst1, 13 => Fconst2,
    14 => Dconst0, 15 => Dconst1,
    16 => Bipush, 17 => Sipush,
    18 => Ldc, 19 => LdcW, 20 => Ldc2W,
    21 => Iload, 22 => Lload, 23 => Fload, 24 => Dload, 25 => Aload,
    26 => Iload0, 27 => Iload1, 28 => Iload2, 29 => Iload3,
    30 => Lload0, 31 => Lload1, 32 => Lload2, 33 => Lload3,
    34 => Fload0, 35 => Fload1, 36 => Fload2, 37 => Fload3,
    38 => Dload0, 39 => Dload1, 40 => Dload2, 41 => Dload3,
    42 => Aload0, 43 => Aload1, 44 => Aload2, 45 => Aload3,
    46 => Iaload, 47 => Laload, 48 => Faload, 49 => Daload, 50 => Aaload,
    51 => Baload, 52 => Caload, 53 => Saload,
    54 => Istore, 55 => Lstore, 56 => Fstore, 57 => Dstore, 58 => Astore,
    59 => Istore0, 60 => Istore1, 61 => Istore2, 62 => Istore3,
    63 => Lstore0, 64 => Lstore1, 65 => Lstore2, 66 => Lstore3,
    67 => Fstore0, 68 => Fstore1, 69 => Fstore2, 70 => Fstore3,
    71 => Dstore0, 72 => Dstore1, 73 => Dstore2, 74 => Dstore3,
    75 => Astore0, 76 => Astore1, 77 => Astore2, 78 => Astore3,
    79 => Iastore, 80 => Lastore, 81 => Fastore, 82 => Dastore, 83 => Aastore,
    84 => Bastore, 85 => Castore, 86 => Sastore,
    87 => Pop, 88 => Pop2, 89 => Dup, 90 => DupX1, 91 => DupX2,
    92 => Dup2, 93 => Dup2X1, 94 => Dup2X2, 95 => Swap,
    96 => Iadd, 97 => Ladd, 98 => Fadd, 99 => Dadd,
    100 => Isub, 101 => Lsub, 102 => Fsub, 103 => Dsub,
    104 => Imul, 105 => Lmul, 106 => Fmul, 107 => Dmul,
    108 => Idiv, 109 => Ldiv, 110 => Fdiv, 111 => Ddiv,
    112 => Irem, 113 => Lrem, 114 => Frem, 115 => Drem,
    116 => Ineg, 117 => Lneg, 118 => Fneg, 119 => Dneg,
    120 => Ishl, 121 => Lshl, 122 => Ishr, 123 => Lshr, 124 => Iushr, 125 => Lushr,
    126 => Iand, 127 => Land, 128 => Ior, 129 => Lor, 130 => Ixor, 131 => Lxor,
    132 => Iinc,
    133 => I2l, 134 => I2f, 135 => I2d, 136 => L2i, 137 => L2f, 138 => L2d,
    139 => F2i, 140 => F2l, 141 => F2d, 142 => D2i, 143 => D2l, 144 => D2f,
    145 => I2b, 146 => I2c, 147 => I2s,
    148 => Lcmp, 149 => Fcmpl, 150 => Fcmpg, 151 => Dcmpl, 152 => Dcmpg,
    153 => Ifeq, 154 => Ifne, 155 => Iflt, 156 => Ifge, 157 => Ifgt, 158 => Ifle,
    159 => IfIcmpeq, 160 => IfIcmpne, 161 => IfIcmplt, 162 => IfIcmpge, 163 => IfIcmpgt, 164 => IfIcmple,
    165 => IfAcmpeq, 166 => IfAcmpne,
    167 => Goto, 168 => Jsr, 169 => Ret,
    170 => Tableswitch, 171 => Lookupswitch,
    172 => Ireturn, 173 => Lreturn, 174 => Freturn, 175 => Dreturn, 176 => Areturn, 177 => Return,
    178 => Getstatic, 179 => Putstatic, 180 => Getfield, 181 => Putfield,
    182 => Invokevirtual, 183 => Invokespecial, 184 => Invokestatic, 185 => Invokeinterface, 186 => Invokedynamic,
    187 => New, 188 => Newarray, 189 => Anewarray, 190 => Arraylength,
    191 => Athrow, 192 => Checkcast, 193 => Instanceof,
    194 => Monitorenter, 195 => Monitorexit,
    196 => Wide, 197 => Multianewarray, 198 => Ifnull, 199 => Ifnonnull,
    200 => GotoW, 201 => JsrW, 202 => Breakpoint,
}

impl Opcode {
    /// The textual mnemonic category of this opcode.
    #[must_use]
    pub fn category(self) -> OpcodeCategory {
        use Opcode::*;
        use OpcodeCategory::*;
        match self {
            Nop | Checkcast | Instanceof | Iinc | Wide => Misc,
            AconstNull | IconstM1 | Iconst0 | Iconst1 | Iconst2 | Iconst3 | Iconst4 | Iconst5
            | Lconst0 | Lconst1 | Fconst0 | Fconst1 | Fconst2 | Dconst0 | Dconst1 | Bipush
            | Sipush | Ldc | LdcW | Ldc2W => Constant,
            Iload | Lload | Fload | Dload | Aload | Iload0 | Iload1 | Iload2 | Iload3 | Lload0
            | Lload1 | Lload2 | Lload3 | Fload0 | Fload1 | Fload2 | Fload3 | Dload0 | Dload1
            | Dload2 | Dload3 | Aload0 | Aload1 | Aload2 | Aload3 => Load,
            Istore | Lstore | Fstore | Dstore | Astore | Istore0 | Istore1 | Istore2 | Istore3
            | Lstore0 | Lstore1 | Lstore2 | Lstore3 | Fstore0 | Fstore1 | Fstore2 | Fstore3
            | Dstore0 | Dstore1 | Dstore2 | Dstore3 | Astore0 | Astore1 | Astore2 | Astore3 => {
                Store
            }
            Iaload | Laload | Faload | Daload | Aaload | Baload | Caload | Saload | Iastore
            | Lastore | Fastore | Dastore | Aastore | Bastore | Castore | Sastore | Arraylength => {
                Array
            }
            Pop | Pop2 | Dup | DupX1 | DupX2 | Dup2 | Dup2X1 | Dup2X2 | Swap => StackOp,
            Iadd | Ladd | Fadd | Dadd | Isub | Lsub | Fsub | Dsub | Imul | Lmul | Fmul | Dmul
            | Idiv | Ldiv | Fdiv | Ddiv | Irem | Lrem | Frem | Drem | Ishl | Lshl | Ishr | Lshr
            | Iushr | Lushr | Iand | Land | Ior | Lor | Ixor | Lxor => Binary,
            Ineg | Lneg | Fneg | Dneg => Unary,
            I2l | I2f | I2d | L2i | L2f | L2d | F2i | F2l | F2d | D2i | D2l | D2f | I2b | I2c
            | I2s => Cast,
            Lcmp | Fcmpl | Fcmpg | Dcmpl | Dcmpg => Compare,
            Ifeq | Ifne | Iflt | Ifge | Ifgt | Ifle | IfIcmpeq | IfIcmpne | IfIcmplt | IfIcmpge
            | IfIcmpgt | IfIcmple | IfAcmpeq | IfAcmpne | Goto | GotoW | Ifnull | Ifnonnull
            | Jsr | JsrW | Ret | Breakpoint => Jump,
            Tableswitch | Lookupswitch => Switch,
            Ireturn | Lreturn | Freturn | Dreturn | Areturn | Return => Return,
            Getstatic | Putstatic | Getfield | Putfield => Field,
            Invokevirtual | Invokespecial | Invokestatic | Invokeinterface | Invokedynamic => {
                Invoke
            }
            New | Newarray | Anewarray | Multianewarray => New,
            Athrow => Throw,
            Monitorenter | Monitorexit => Monitor,
        }
    }

    /// Whether this opcode ends straight-line execution at this bci
    /// (return, throw, or unconditional jump): successors flow only
    /// through explicit branch targets / exception edges, never fallthrough.
    #[must_use]
    pub fn is_block_terminator(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Ireturn
                | Lreturn
                | Freturn
                | Dreturn
                | Areturn
                | Return
                | Athrow
                | Goto
                | GotoW
                | Tableswitch
                | Lookupswitch
                | Ret
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_every_byte() {
        for byte in 0u16..=202 {
            let byte = byte as u8;
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.as_byte(), byte);
            }
        }
    }

    #[test]
    fn unknown_byte_is_none() {
        assert_eq!(Opcode::from_byte(203), None);
        assert_eq!(Opcode::from_byte(254), None);
    }

    #[test]
    fn categories_are_sane() {
        assert_eq!(Opcode::Ldc2W.category(), OpcodeCategory::Constant);
        assert_eq!(Opcode::Pop2.category(), OpcodeCategory::StackOp);
        assert_eq!(Opcode::Invokedynamic.category(), OpcodeCategory::Invoke);
        assert_eq!(Opcode::Lookupswitch.category(), OpcodeCategory::Switch);
        assert!(Opcode::Goto.is_block_terminator());
        assert!(!Opcode::Nop.is_block_terminator());
    }
}

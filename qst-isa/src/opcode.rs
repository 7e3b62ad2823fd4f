use bitflags::bitflags;

/// How an opcode exchanges its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackInteraction {
    /// Pushes its single inline operand onto the argument stack.
    Push,
    /// Takes all of its operands from the argument stack, none are encoded inline.
    Pop,
}

/// Register access performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn reads(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Parameter type of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Value of unspecified type. Only appears inside register tuples.
    Any,
    /// Unsigned 8-bit integer.
    Byte,
    /// Unsigned 16-bit integer.
    Word,
    /// Signed 32-bit integer.
    DWord,
    /// 32-bit IEEE-754 float.
    Float,
    /// Label of unspecified segment type.
    Label,
    /// Label of an instruction segment.
    ILabel,
    /// Label of a data segment.
    DLabel,
    /// Label of a string segment.
    SLabel,
    /// Null-terminated string.
    String,
    /// Count-prefixed list of instruction labels. Always the last parameter.
    ILabelVar,
    /// Reference to one register, or a run of registers whose length is given by another parameter.
    RegRef,
    /// Reference to a fixed tuple of consecutive registers, typed by the given sub-parameters.
    RegTupRef(&'static [Param]),
    /// Count-prefixed list of register references. Always the last parameter.
    RegRefVar,
    /// Raw memory address. Only appears inside register tuples.
    Pointer,
}

impl ParamType {
    /// True for every label kind, including instruction label lists.
    pub fn is_label(&self) -> bool {
        matches!(
            self,
            ParamType::Label
                | ParamType::ILabel
                | ParamType::DLabel
                | ParamType::SLabel
                | ParamType::ILabelVar
        )
    }

    pub fn is_register(&self) -> bool {
        matches!(
            self,
            ParamType::RegRef | ParamType::RegTupRef(_) | ParamType::RegRefVar
        )
    }

    pub fn is_vararg(&self) -> bool {
        matches!(self, ParamType::ILabelVar | ParamType::RegRefVar)
    }

    /// Human readable description used in diagnostics, e.g. "a 16-bit integer".
    pub fn describe(&self) -> &'static str {
        match self {
            ParamType::Any => "any value",
            ParamType::Byte => "an 8-bit integer",
            ParamType::Word => "a 16-bit integer",
            ParamType::DWord => "a 32-bit integer",
            ParamType::Float => "a float",
            ParamType::Label => "a label",
            ParamType::ILabel | ParamType::ILabelVar => "an instruction label",
            ParamType::DLabel => "a data label",
            ParamType::SLabel => "a string label",
            ParamType::String => "a string",
            ParamType::RegRef | ParamType::RegTupRef(_) | ParamType::RegRefVar => {
                "a register reference"
            }
            ParamType::Pointer => "a pointer",
        }
    }
}

/// A single opcode parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Param {
    pub ty: ParamType,
    /// Only set for register references.
    pub access: Option<Access>,
    pub doc: Option<&'static str>,
}

bitflags! {
    /// Control-flow behavior of an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u8 {
        const JUMP = 1 << 0;
        const CONDITIONAL = 1 << 1;
        const CALL = 1 << 2;
        const RETURN = 1 << 3;
    }
}

/// Static description of one opcode. Instances only exist in the generated table.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Opcode {
    /// 1-byte code, or a 2-byte code whose high byte is 0xF8 or 0xF9.
    pub code: u16,
    pub mnemonic: &'static str,
    pub doc: Option<&'static str>,
    /// Parameters, passed inline or via the stack depending on [`Opcode::stack`].
    pub params: &'static [Param],
    pub stack: Option<StackInteraction>,
    pub flags: OpcodeFlags,
    /// False for placeholders of codes whose behavior isn't known.
    pub known: bool,
}

impl Opcode {
    /// Encoded size of the opcode itself, 1 or 2 bytes.
    pub fn size(&self) -> usize {
        if self.code > 0xFF { 2 } else { 1 }
    }

    pub fn is_push(&self) -> bool {
        self.stack == Some(StackInteraction::Push)
    }

    pub fn is_pop(&self) -> bool {
        self.stack == Some(StackInteraction::Pop)
    }

    /// Whether the last parameter takes a variable number of arguments.
    pub fn has_varargs(&self) -> bool {
        self.params.last().is_some_and(|p| p.ty.is_vararg())
    }

    /// The arguments belonging to parameter `index`, given the inline argument list of an
    /// instruction. Arguments and parameters line up one to one except for a trailing vararg
    /// parameter, which owns every remaining argument.
    pub fn param_args<'a, T>(&self, args: &'a [T], index: usize) -> &'a [T] {
        let Some(param) = self.params.get(index) else {
            return &[];
        };
        if index >= args.len() {
            return &[];
        }
        if param.ty.is_vararg() {
            &args[index..]
        } else {
            &args[index..index + 1]
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic)
    }
}

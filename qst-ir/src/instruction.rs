use qst_isa::{Arg, Format, Opcode};

/// A single instruction with its inline arguments.
///
/// `Pop` instructions carry no arguments, their operands are pushed by the instructions
/// preceding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: &'static Opcode,
    pub args: Vec<Arg>,
    /// False for placeholders emitted when an instruction couldn't be decoded in lenient mode.
    pub valid: bool,
}

impl Instruction {
    pub fn new(opcode: &'static Opcode, args: Vec<Arg>) -> Self {
        Instruction {
            opcode,
            args,
            valid: true,
        }
    }

    /// Placeholder for an undecodable instruction. Only its opcode bytes are accounted for.
    pub fn stub(opcode: &'static Opcode) -> Self {
        Instruction {
            opcode,
            args: Vec::new(),
            valid: false,
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self, format: Format) -> usize {
        if self.valid {
            qst_isa::encoded_size(self.opcode, &self.args, format)
        } else {
            self.opcode.size()
        }
    }

    /// Arguments passed to parameter `index`. Empty for `Pop` instructions.
    pub fn param_args(&self, index: usize) -> &[Arg] {
        self.opcode.param_args(&self.args, index)
    }

    pub fn int_arg(&self, index: usize) -> Option<i32> {
        self.args.get(index).and_then(Arg::as_int)
    }
}

use std::fmt;

use crate::{Format, ParamType};

/// A decoded operand value.
///
/// The encoded width isn't stored: it follows from the parameter the argument is passed to and
/// the binary format, see [`Arg::encoded_size`].
#[derive(Debug, Clone)]
pub enum Arg {
    /// Integers, labels and register numbers.
    Int(i32),
    Float(f32),
    Str(String),
}

impl Arg {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Arg::Float(v) => Some(*v),
            Arg::Int(v) => Some(*v as f32),
            Arg::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Size of this argument when passed inline to a parameter of type `ty`. For vararg
    /// parameters this is the size of one element, the count prefix is not included.
    pub fn encoded_size(&self, ty: &ParamType, format: Format) -> usize {
        match ty {
            ParamType::Byte
            | ParamType::RegRef
            | ParamType::RegTupRef(_)
            | ParamType::RegRefVar => 1,
            ParamType::Word => 2,
            ParamType::DWord | ParamType::Float => 4,
            ParamType::Label
            | ParamType::ILabel
            | ParamType::DLabel
            | ParamType::SLabel
            | ParamType::ILabelVar => format.label_width(),
            ParamType::String => format.string_arg_size(self.as_str().unwrap_or_default()),
            ParamType::Any | ParamType::Pointer => 0,
        }
    }
}

// Floats compare by bit pattern so that decoded NaNs survive equality checks.
impl PartialEq for Arg {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Arg::Int(a), Arg::Int(b)) => a == b,
            (Arg::Float(a), Arg::Float(b)) => a.to_bits() == b.to_bits(),
            (Arg::Str(a), Arg::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Arg {}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v:?}"),
            Arg::Str(s) => write!(f, "{s:?}"),
        }
    }
}

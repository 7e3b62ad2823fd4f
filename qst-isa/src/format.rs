/// Binary variant of the quest script format.
///
/// The variants differ in the encoding of strings and, potentially, in the width of label
/// operands. Everything that reads or writes operands takes the format as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Console releases. Strings are single-byte.
    Legacy,
    /// Desktop release. Strings are UTF-16LE.
    Desktop,
    /// Online-only release. Strings are UTF-16LE.
    #[default]
    NetworkVariant,
}

/// Character encoding of strings in bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringEncoding {
    /// One byte per character, code points above 0xFF are not representable.
    Latin1,
    Utf16Le,
}

impl Format {
    pub fn string_encoding(self) -> StringEncoding {
        match self {
            Format::Legacy => StringEncoding::Latin1,
            Format::Desktop | Format::NetworkVariant => StringEncoding::Utf16Le,
        }
    }

    /// Width in bytes of a label operand.
    pub fn label_width(self) -> usize {
        match self {
            Format::Legacy | Format::Desktop | Format::NetworkVariant => 2,
        }
    }

    /// Number of code units `s` occupies in this format, without terminator.
    pub fn string_units(self, s: &str) -> usize {
        match self.string_encoding() {
            StringEncoding::Latin1 => s.chars().count(),
            StringEncoding::Utf16Le => s.encode_utf16().count(),
        }
    }

    /// Size of a null-terminated string operand.
    pub fn string_arg_size(self, s: &str) -> usize {
        match self.string_encoding() {
            StringEncoding::Latin1 => self.string_units(s) + 1,
            StringEncoding::Utf16Le => 2 * self.string_units(s) + 2,
        }
    }

    /// Size of a string segment holding `s`, padded to a multiple of 4 bytes.
    pub fn string_segment_size(self, s: &str) -> usize {
        let units = self.string_units(s) + 1;
        match self.string_encoding() {
            StringEncoding::Latin1 => 4 * units.div_ceil(4),
            StringEncoding::Utf16Le => 4 * units.div_ceil(2),
        }
    }

    /// Decode a string from `bytes`, stopping at the first null terminator or the end of the
    /// slice. Returns the string and whether a terminator was found.
    pub fn decode_string(self, bytes: &[u8]) -> (String, bool) {
        match self.string_encoding() {
            StringEncoding::Latin1 => {
                let end = bytes.iter().position(|&b| b == 0);
                let s = bytes[..end.unwrap_or(bytes.len())]
                    .iter()
                    .map(|&b| b as char)
                    .collect();
                (s, end.is_some())
            }
            StringEncoding::Utf16Le => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                let terminated = bytes.len() / 2 > units.len();
                (String::from_utf16_lossy(&units), terminated)
            }
        }
    }

    /// Append `s` to `out`, null-padded to exactly `size` bytes. Content that doesn't fit is cut
    /// off. Characters outside Latin-1 are written as `?` in the single-byte encoding.
    pub fn encode_string(self, s: &str, size: usize, out: &mut Vec<u8>) {
        let start = out.len();
        match self.string_encoding() {
            StringEncoding::Latin1 => {
                out.extend(s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
            }
            StringEncoding::Utf16Le => {
                for unit in s.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
        }
        out.resize(start + size, 0);
    }
}

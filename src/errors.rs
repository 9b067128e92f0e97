//! Error types.

/// An error that occurs while decoding a binary module.
#[derive(Clone, Debug)]
pub enum DecodeError {
    /// The magic number or version word did not match.
    BadHeader(u32),
    /// A section name was not recognized.
    UnknownSection(String),
    /// The stream ended inside a value.
    Truncated { at: usize },
    /// A section's declared size did not match the bytes consumed.
    SectionSize {
        name: String,
        declared: u32,
        consumed: usize,
    },
    /// An opcode byte that is neither a real opcode nor an opcode-table
    /// entry.
    BadOpcode(u8),
    /// A break or switch depth that points past the scope stack.
    BadBreakDepth(u32),
    /// A local index out of range for the containing function.
    BadLocalIndex(u32),
    /// An unknown value-type byte.
    BadType(u8),
    /// The module is structurally inconsistent (bad arity, dangling
    /// index, stack underflow).
    Malformed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DecodeError::BadHeader(word) => write!(f, "bad magic or version word {:#010x}", word),
            DecodeError::UnknownSection(name) => write!(f, "unfamiliar section: {}", name),
            DecodeError::Truncated { at } => write!(f, "input truncated at offset {}", at),
            DecodeError::SectionSize {
                name,
                declared,
                consumed,
            } => write!(
                f,
                "section `{}` declared {} bytes but {} were consumed",
                name, declared, consumed
            ),
            DecodeError::BadOpcode(code) => write!(f, "bad code {:#04x}", code),
            DecodeError::BadBreakDepth(depth) => write!(f, "bad break depth {}", depth),
            DecodeError::BadLocalIndex(index) => write!(f, "bad local index {}", index),
            DecodeError::BadType(byte) => write!(f, "bad type byte {:#04x}", byte),
            DecodeError::Malformed(msg) => write!(f, "malformed module: {}", msg),
        }
    }
}

impl std::error::Error for DecodeError {}

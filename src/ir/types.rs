//! Value types and literals.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Type {
    #[default]
    None,
    I32,
    I64,
    F32,
    F64,
}

impl Type {
    pub fn is_concrete(self) -> bool {
        self != Type::None
    }

    pub fn is_float(self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Type::None => "none",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// A 32-bit float held by bit pattern, so NaN payloads survive round-trips
/// and literals can key ordered maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ieee32(pub u32);

impl Ieee32 {
    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn value(self) -> f32 {
        f32::from_bits(self.0)
    }
}

impl From<f32> for Ieee32 {
    fn from(value: f32) -> Ieee32 {
        Ieee32(value.to_bits())
    }
}

/// A 64-bit float held by bit pattern; see [`Ieee32`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ieee64(pub u64);

impl Ieee64 {
    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn value(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for Ieee64 {
    fn from(value: f64) -> Ieee64 {
        Ieee64(value.to_bits())
    }
}

/// A typed scalar constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(Ieee32),
    F64(Ieee64),
}

impl Literal {
    pub fn ty(self) -> Type {
        match self {
            Literal::I32(_) => Type::I32,
            Literal::I64(_) => Type::I64,
            Literal::F32(_) => Type::F32,
            Literal::F64(_) => Type::F64,
        }
    }

    pub fn get_i32(self) -> i32 {
        match self {
            Literal::I32(v) => v,
            _ => panic!("literal is not an i32: {:?}", self),
        }
    }

    pub fn get_i64(self) -> i64 {
        match self {
            Literal::I64(v) => v,
            _ => panic!("literal is not an i64: {:?}", self),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Literal::I32(v) => write!(f, "i32.const {}", v),
            Literal::I64(v) => write!(f, "i64.const {}", v),
            Literal::F32(v) => write!(f, "f32.const bits:{:#010x}", v.bits()),
            Literal::F64(v) => write!(f, "f64.const bits:{:#018x}", v.bits()),
        }
    }
}

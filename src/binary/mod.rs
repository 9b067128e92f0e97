//! The version-11 binary format: wire constants and codec entry points.

mod buffer;
pub mod learn;
mod opcode_table;
mod reader;
mod writer;

pub use buffer::*;
pub use opcode_table::*;
pub use reader::read;
pub use writer::{write, write_compressed, write_with_toc, FuncRange};

use crate::ir::{BinaryOp, Type, UnaryOp};

pub const MAGIC: u32 = 0x6d73_6100; // "\0asm"
pub const VERSION: u32 = 11;

pub mod section {
    pub const MEMORY: &str = "memory";
    pub const TYPE: &str = "type";
    pub const IMPORT: &str = "import";
    pub const FUNCTION: &str = "function";
    pub const CODE: &str = "code";
    pub const EXPORT: &str = "export";
    pub const DATA: &str = "data";
    pub const TABLE: &str = "table";
    pub const NAME: &str = "name";
    pub const START: &str = "start";
    pub const OPCODE: &str = "opcode";
}

/// Opcode byte assignments. These are a constant of the codec; peers must
/// agree on them to interoperate.
pub mod op {
    pub const NOP: u8 = 0x00;
    pub const BLOCK: u8 = 0x01;
    pub const LOOP: u8 = 0x02;
    pub const IF: u8 = 0x03;
    pub const ELSE: u8 = 0x04;
    pub const SELECT: u8 = 0x05;
    pub const BR: u8 = 0x06;
    pub const BR_IF: u8 = 0x07;
    pub const TABLE_SWITCH: u8 = 0x08;
    pub const RETURN: u8 = 0x09;
    pub const UNREACHABLE: u8 = 0x0a;
    pub const END: u8 = 0x0f;

    pub const I32_CONST: u8 = 0x10;
    pub const I64_CONST: u8 = 0x11;
    pub const F64_CONST: u8 = 0x12;
    pub const F32_CONST: u8 = 0x13;
    pub const GET_LOCAL: u8 = 0x14;
    pub const SET_LOCAL: u8 = 0x15;
    pub const CALL_FUNCTION: u8 = 0x16;
    pub const CALL_INDIRECT: u8 = 0x17;
    pub const CALL_IMPORT: u8 = 0x18;

    pub const I32_LOAD_MEM_8S: u8 = 0x20;
    pub const I32_LOAD_MEM_8U: u8 = 0x21;
    pub const I32_LOAD_MEM_16S: u8 = 0x22;
    pub const I32_LOAD_MEM_16U: u8 = 0x23;
    pub const I64_LOAD_MEM_8S: u8 = 0x24;
    pub const I64_LOAD_MEM_8U: u8 = 0x25;
    pub const I64_LOAD_MEM_16S: u8 = 0x26;
    pub const I64_LOAD_MEM_16U: u8 = 0x27;
    pub const I64_LOAD_MEM_32S: u8 = 0x28;
    pub const I64_LOAD_MEM_32U: u8 = 0x29;
    pub const I32_LOAD_MEM: u8 = 0x2a;
    pub const I64_LOAD_MEM: u8 = 0x2b;
    pub const F32_LOAD_MEM: u8 = 0x2c;
    pub const F64_LOAD_MEM: u8 = 0x2d;
    pub const I32_STORE_MEM_8: u8 = 0x2e;
    pub const I32_STORE_MEM_16: u8 = 0x2f;
    pub const I64_STORE_MEM_8: u8 = 0x30;
    pub const I64_STORE_MEM_16: u8 = 0x31;
    pub const I64_STORE_MEM_32: u8 = 0x32;
    pub const I32_STORE_MEM: u8 = 0x33;
    pub const I64_STORE_MEM: u8 = 0x34;
    pub const F32_STORE_MEM: u8 = 0x35;
    pub const F64_STORE_MEM: u8 = 0x36;

    pub const GROW_MEMORY: u8 = 0x39;
    pub const CURRENT_MEMORY: u8 = 0x3b;

    pub const I32_ADD: u8 = 0x40;
    pub const I32_SUB: u8 = 0x41;
    pub const I32_MUL: u8 = 0x42;
    pub const I32_DIV_S: u8 = 0x43;
    pub const I32_DIV_U: u8 = 0x44;
    pub const I32_REM_S: u8 = 0x45;
    pub const I32_REM_U: u8 = 0x46;
    pub const I32_AND: u8 = 0x47;
    pub const I32_OR: u8 = 0x48;
    pub const I32_XOR: u8 = 0x49;
    pub const I32_SHL: u8 = 0x4a;
    pub const I32_SHR_U: u8 = 0x4b;
    pub const I32_SHR_S: u8 = 0x4c;
    pub const I32_EQ: u8 = 0x4d;
    pub const I32_NE: u8 = 0x4e;
    pub const I32_LT_S: u8 = 0x4f;
    pub const I32_LE_S: u8 = 0x50;
    pub const I32_LT_U: u8 = 0x51;
    pub const I32_LE_U: u8 = 0x52;
    pub const I32_GT_S: u8 = 0x53;
    pub const I32_GE_S: u8 = 0x54;
    pub const I32_GT_U: u8 = 0x55;
    pub const I32_GE_U: u8 = 0x56;
    pub const I32_CLZ: u8 = 0x57;
    pub const I32_CTZ: u8 = 0x58;
    pub const I32_POPCNT: u8 = 0x59;
    pub const I32_EQZ: u8 = 0x5a;
    pub const I64_ADD: u8 = 0x5b;
    pub const I64_SUB: u8 = 0x5c;
    pub const I64_MUL: u8 = 0x5d;
    pub const I64_DIV_S: u8 = 0x5e;
    pub const I64_DIV_U: u8 = 0x5f;
    pub const I64_REM_S: u8 = 0x60;
    pub const I64_REM_U: u8 = 0x61;
    pub const I64_AND: u8 = 0x62;
    pub const I64_OR: u8 = 0x63;
    pub const I64_XOR: u8 = 0x64;
    pub const I64_SHL: u8 = 0x65;
    pub const I64_SHR_U: u8 = 0x66;
    pub const I64_SHR_S: u8 = 0x67;
    pub const I64_EQ: u8 = 0x68;
    pub const I64_NE: u8 = 0x69;
    pub const I64_LT_S: u8 = 0x6a;
    pub const I64_LE_S: u8 = 0x6b;
    pub const I64_LT_U: u8 = 0x6c;
    pub const I64_LE_U: u8 = 0x6d;
    pub const I64_GT_S: u8 = 0x6e;
    pub const I64_GE_S: u8 = 0x6f;
    pub const I64_GT_U: u8 = 0x70;
    pub const I64_GE_U: u8 = 0x71;
    pub const I64_CLZ: u8 = 0x72;
    pub const I64_CTZ: u8 = 0x73;
    pub const I64_POPCNT: u8 = 0x74;
    pub const F32_ADD: u8 = 0x75;
    pub const F32_SUB: u8 = 0x76;
    pub const F32_MUL: u8 = 0x77;
    pub const F32_DIV: u8 = 0x78;
    pub const F32_MIN: u8 = 0x79;
    pub const F32_MAX: u8 = 0x7a;
    pub const F32_ABS: u8 = 0x7b;
    pub const F32_NEG: u8 = 0x7c;
    pub const F32_COPY_SIGN: u8 = 0x7d;
    pub const F32_CEIL: u8 = 0x7e;
    pub const F32_FLOOR: u8 = 0x7f;
    pub const F32_TRUNC: u8 = 0x80;
    pub const F32_NEAREST_INT: u8 = 0x81;
    pub const F32_SQRT: u8 = 0x82;
    pub const F32_EQ: u8 = 0x83;
    pub const F32_NE: u8 = 0x84;
    pub const F32_LT: u8 = 0x85;
    pub const F32_LE: u8 = 0x86;
    pub const F32_GT: u8 = 0x87;
    pub const F32_GE: u8 = 0x88;
    pub const F64_ADD: u8 = 0x89;
    pub const F64_SUB: u8 = 0x8a;
    pub const F64_MUL: u8 = 0x8b;
    pub const F64_DIV: u8 = 0x8c;
    pub const F64_MIN: u8 = 0x8d;
    pub const F64_MAX: u8 = 0x8e;
    pub const F64_ABS: u8 = 0x8f;
    pub const F64_NEG: u8 = 0x90;
    pub const F64_COPY_SIGN: u8 = 0x91;
    pub const F64_CEIL: u8 = 0x92;
    pub const F64_FLOOR: u8 = 0x93;
    pub const F64_TRUNC: u8 = 0x94;
    pub const F64_NEAREST_INT: u8 = 0x95;
    pub const F64_SQRT: u8 = 0x96;
    pub const F64_EQ: u8 = 0x97;
    pub const F64_NE: u8 = 0x98;
    pub const F64_LT: u8 = 0x99;
    pub const F64_LE: u8 = 0x9a;
    pub const F64_GT: u8 = 0x9b;
    pub const F64_GE: u8 = 0x9c;

    pub const I32_S_TRUNC_F32: u8 = 0x9d;
    pub const I32_S_TRUNC_F64: u8 = 0x9e;
    pub const I32_U_TRUNC_F32: u8 = 0x9f;
    pub const I32_U_TRUNC_F64: u8 = 0xa0;
    pub const I32_CONVERT_I64: u8 = 0xa1;
    pub const I64_S_TRUNC_F32: u8 = 0xa2;
    pub const I64_S_TRUNC_F64: u8 = 0xa3;
    pub const I64_U_TRUNC_F32: u8 = 0xa4;
    pub const I64_U_TRUNC_F64: u8 = 0xa5;
    pub const I64_S_TRUNC_I32: u8 = 0xa6;
    pub const I64_U_TRUNC_I32: u8 = 0xa7;
    pub const F32_S_CONVERT_I32: u8 = 0xa8;
    pub const F32_U_CONVERT_I32: u8 = 0xa9;
    pub const F32_S_CONVERT_I64: u8 = 0xaa;
    pub const F32_U_CONVERT_I64: u8 = 0xab;
    pub const F32_CONVERT_F64: u8 = 0xac;
    pub const F32_REINTERPRET_I32: u8 = 0xad;
    pub const F64_S_CONVERT_I32: u8 = 0xae;
    pub const F64_U_CONVERT_I32: u8 = 0xaf;
    pub const F64_S_CONVERT_I64: u8 = 0xb0;
    pub const F64_U_CONVERT_I64: u8 = 0xb1;
    pub const F64_CONVERT_F32: u8 = 0xb2;
    pub const F64_REINTERPRET_I64: u8 = 0xb3;
    pub const I32_REINTERPRET_F32: u8 = 0xb4;
    pub const I64_REINTERPRET_F64: u8 = 0xb5;
    pub const I32_ROT_R: u8 = 0xb6;
    pub const I32_ROT_L: u8 = 0xb7;
    pub const I64_ROT_R: u8 = 0xb8;
    pub const I64_ROT_L: u8 = 0xb9;
    pub const I64_EQZ: u8 = 0xba;
}

pub const TYPE_FORM_BASIC: u8 = 0x40;

pub fn type_code(ty: Type) -> u8 {
    match ty {
        Type::None => 0,
        Type::I32 => 1,
        Type::I64 => 2,
        Type::F32 => 3,
        Type::F64 => 4,
    }
}

pub fn type_from_code(byte: u8) -> Option<Type> {
    match byte {
        0 => Some(Type::None),
        1 => Some(Type::I32),
        2 => Some(Type::I64),
        3 => Some(Type::F32),
        4 => Some(Type::F64),
        _ => None,
    }
}

pub(crate) fn unary_code(op: UnaryOp, ty: Type) -> u8 {
    use UnaryOp::*;
    match (op, ty) {
        (Clz, Type::I32) => op::I32_CLZ,
        (Clz, _) => op::I64_CLZ,
        (Ctz, Type::I32) => op::I32_CTZ,
        (Ctz, _) => op::I64_CTZ,
        (Popcnt, Type::I32) => op::I32_POPCNT,
        (Popcnt, _) => op::I64_POPCNT,
        (EqZ, Type::I32) => op::I32_EQZ,
        (EqZ, _) => op::I64_EQZ,
        (Neg, Type::F32) => op::F32_NEG,
        (Neg, _) => op::F64_NEG,
        (Abs, Type::F32) => op::F32_ABS,
        (Abs, _) => op::F64_ABS,
        (Ceil, Type::F32) => op::F32_CEIL,
        (Ceil, _) => op::F64_CEIL,
        (Floor, Type::F32) => op::F32_FLOOR,
        (Floor, _) => op::F64_FLOOR,
        (Trunc, Type::F32) => op::F32_TRUNC,
        (Trunc, _) => op::F64_TRUNC,
        (Nearest, Type::F32) => op::F32_NEAREST_INT,
        (Nearest, _) => op::F64_NEAREST_INT,
        (Sqrt, Type::F32) => op::F32_SQRT,
        (Sqrt, _) => op::F64_SQRT,
        (ExtendSInt32, _) => op::I64_S_TRUNC_I32,
        (ExtendUInt32, _) => op::I64_U_TRUNC_I32,
        (WrapInt64, _) => op::I32_CONVERT_I64,
        (TruncSFloat32, Type::I32) => op::I32_S_TRUNC_F32,
        (TruncSFloat32, _) => op::I64_S_TRUNC_F32,
        (TruncUFloat32, Type::I32) => op::I32_U_TRUNC_F32,
        (TruncUFloat32, _) => op::I64_U_TRUNC_F32,
        (TruncSFloat64, Type::I32) => op::I32_S_TRUNC_F64,
        (TruncSFloat64, _) => op::I64_S_TRUNC_F64,
        (TruncUFloat64, Type::I32) => op::I32_U_TRUNC_F64,
        (TruncUFloat64, _) => op::I64_U_TRUNC_F64,
        (ConvertSInt32, Type::F32) => op::F32_S_CONVERT_I32,
        (ConvertSInt32, _) => op::F64_S_CONVERT_I32,
        (ConvertUInt32, Type::F32) => op::F32_U_CONVERT_I32,
        (ConvertUInt32, _) => op::F64_U_CONVERT_I32,
        (ConvertSInt64, Type::F32) => op::F32_S_CONVERT_I64,
        (ConvertSInt64, _) => op::F64_S_CONVERT_I64,
        (ConvertUInt64, Type::F32) => op::F32_U_CONVERT_I64,
        (ConvertUInt64, _) => op::F64_U_CONVERT_I64,
        (PromoteFloat32, _) => op::F64_CONVERT_F32,
        (DemoteFloat64, _) => op::F32_CONVERT_F64,
        (ReinterpretFloat, Type::I32) => op::I32_REINTERPRET_F32,
        (ReinterpretFloat, _) => op::I64_REINTERPRET_F64,
        (ReinterpretInt, Type::F32) => op::F32_REINTERPRET_I32,
        (ReinterpretInt, _) => op::F64_REINTERPRET_I64,
    }
}

pub(crate) fn unary_from_code(code: u8) -> Option<(UnaryOp, Type)> {
    use UnaryOp::*;
    Some(match code {
        op::I32_CLZ => (Clz, Type::I32),
        op::I64_CLZ => (Clz, Type::I64),
        op::I32_CTZ => (Ctz, Type::I32),
        op::I64_CTZ => (Ctz, Type::I64),
        op::I32_POPCNT => (Popcnt, Type::I32),
        op::I64_POPCNT => (Popcnt, Type::I64),
        op::I32_EQZ => (EqZ, Type::I32),
        op::I64_EQZ => (EqZ, Type::I64),
        op::F32_NEG => (Neg, Type::F32),
        op::F64_NEG => (Neg, Type::F64),
        op::F32_ABS => (Abs, Type::F32),
        op::F64_ABS => (Abs, Type::F64),
        op::F32_CEIL => (Ceil, Type::F32),
        op::F64_CEIL => (Ceil, Type::F64),
        op::F32_FLOOR => (Floor, Type::F32),
        op::F64_FLOOR => (Floor, Type::F64),
        op::F32_TRUNC => (Trunc, Type::F32),
        op::F64_TRUNC => (Trunc, Type::F64),
        op::F32_NEAREST_INT => (Nearest, Type::F32),
        op::F64_NEAREST_INT => (Nearest, Type::F64),
        op::F32_SQRT => (Sqrt, Type::F32),
        op::F64_SQRT => (Sqrt, Type::F64),
        op::I64_S_TRUNC_I32 => (ExtendSInt32, Type::I64),
        op::I64_U_TRUNC_I32 => (ExtendUInt32, Type::I64),
        op::I32_CONVERT_I64 => (WrapInt64, Type::I32),
        op::I32_S_TRUNC_F32 => (TruncSFloat32, Type::I32),
        op::I64_S_TRUNC_F32 => (TruncSFloat32, Type::I64),
        op::I32_U_TRUNC_F32 => (TruncUFloat32, Type::I32),
        op::I64_U_TRUNC_F32 => (TruncUFloat32, Type::I64),
        op::I32_S_TRUNC_F64 => (TruncSFloat64, Type::I32),
        op::I64_S_TRUNC_F64 => (TruncSFloat64, Type::I64),
        op::I32_U_TRUNC_F64 => (TruncUFloat64, Type::I32),
        op::I64_U_TRUNC_F64 => (TruncUFloat64, Type::I64),
        op::F32_S_CONVERT_I32 => (ConvertSInt32, Type::F32),
        op::F64_S_CONVERT_I32 => (ConvertSInt32, Type::F64),
        op::F32_U_CONVERT_I32 => (ConvertUInt32, Type::F32),
        op::F64_U_CONVERT_I32 => (ConvertUInt32, Type::F64),
        op::F32_S_CONVERT_I64 => (ConvertSInt64, Type::F32),
        op::F64_S_CONVERT_I64 => (ConvertSInt64, Type::F64),
        op::F32_U_CONVERT_I64 => (ConvertUInt64, Type::F32),
        op::F64_U_CONVERT_I64 => (ConvertUInt64, Type::F64),
        op::F64_CONVERT_F32 => (PromoteFloat32, Type::F64),
        op::F32_CONVERT_F64 => (DemoteFloat64, Type::F32),
        op::I32_REINTERPRET_F32 => (ReinterpretFloat, Type::I32),
        op::I64_REINTERPRET_F64 => (ReinterpretFloat, Type::I64),
        op::F32_REINTERPRET_I32 => (ReinterpretInt, Type::F32),
        op::F64_REINTERPRET_I64 => (ReinterpretInt, Type::F64),
        _ => return None,
    })
}

pub(crate) fn binary_code(op2: BinaryOp, ty: Type) -> u8 {
    use BinaryOp::*;
    macro_rules! typed {
        ($i32:ident, $i64:ident, $f32:ident, $f64:ident) => {
            match ty {
                Type::I32 => op::$i32,
                Type::I64 => op::$i64,
                Type::F32 => op::$f32,
                _ => op::$f64,
            }
        };
    }
    macro_rules! int_typed {
        ($i32:ident, $i64:ident) => {
            match ty {
                Type::I32 => op::$i32,
                _ => op::$i64,
            }
        };
    }
    macro_rules! float_typed {
        ($f32:ident, $f64:ident) => {
            match ty {
                Type::F32 => op::$f32,
                _ => op::$f64,
            }
        };
    }
    match op2 {
        Add => typed!(I32_ADD, I64_ADD, F32_ADD, F64_ADD),
        Sub => typed!(I32_SUB, I64_SUB, F32_SUB, F64_SUB),
        Mul => typed!(I32_MUL, I64_MUL, F32_MUL, F64_MUL),
        DivS => int_typed!(I32_DIV_S, I64_DIV_S),
        DivU => int_typed!(I32_DIV_U, I64_DIV_U),
        RemS => int_typed!(I32_REM_S, I64_REM_S),
        RemU => int_typed!(I32_REM_U, I64_REM_U),
        And => int_typed!(I32_AND, I64_AND),
        Or => int_typed!(I32_OR, I64_OR),
        Xor => int_typed!(I32_XOR, I64_XOR),
        Shl => int_typed!(I32_SHL, I64_SHL),
        ShrU => int_typed!(I32_SHR_U, I64_SHR_U),
        ShrS => int_typed!(I32_SHR_S, I64_SHR_S),
        RotL => int_typed!(I32_ROT_L, I64_ROT_L),
        RotR => int_typed!(I32_ROT_R, I64_ROT_R),
        Div => float_typed!(F32_DIV, F64_DIV),
        CopySign => float_typed!(F32_COPY_SIGN, F64_COPY_SIGN),
        Min => float_typed!(F32_MIN, F64_MIN),
        Max => float_typed!(F32_MAX, F64_MAX),
        Eq => typed!(I32_EQ, I64_EQ, F32_EQ, F64_EQ),
        Ne => typed!(I32_NE, I64_NE, F32_NE, F64_NE),
        LtS => int_typed!(I32_LT_S, I64_LT_S),
        LtU => int_typed!(I32_LT_U, I64_LT_U),
        LeS => int_typed!(I32_LE_S, I64_LE_S),
        LeU => int_typed!(I32_LE_U, I64_LE_U),
        GtS => int_typed!(I32_GT_S, I64_GT_S),
        GtU => int_typed!(I32_GT_U, I64_GT_U),
        GeS => int_typed!(I32_GE_S, I64_GE_S),
        GeU => int_typed!(I32_GE_U, I64_GE_U),
        Lt => float_typed!(F32_LT, F64_LT),
        Le => float_typed!(F32_LE, F64_LE),
        Gt => float_typed!(F32_GT, F64_GT),
        Ge => float_typed!(F32_GE, F64_GE),
    }
}

pub(crate) fn binary_from_code(code: u8) -> Option<(BinaryOp, Type)> {
    use BinaryOp::*;
    Some(match code {
        op::I32_ADD => (Add, Type::I32),
        op::I64_ADD => (Add, Type::I64),
        op::F32_ADD => (Add, Type::F32),
        op::F64_ADD => (Add, Type::F64),
        op::I32_SUB => (Sub, Type::I32),
        op::I64_SUB => (Sub, Type::I64),
        op::F32_SUB => (Sub, Type::F32),
        op::F64_SUB => (Sub, Type::F64),
        op::I32_MUL => (Mul, Type::I32),
        op::I64_MUL => (Mul, Type::I64),
        op::F32_MUL => (Mul, Type::F32),
        op::F64_MUL => (Mul, Type::F64),
        op::I32_DIV_S => (DivS, Type::I32),
        op::I64_DIV_S => (DivS, Type::I64),
        op::I32_DIV_U => (DivU, Type::I32),
        op::I64_DIV_U => (DivU, Type::I64),
        op::I32_REM_S => (RemS, Type::I32),
        op::I64_REM_S => (RemS, Type::I64),
        op::I32_REM_U => (RemU, Type::I32),
        op::I64_REM_U => (RemU, Type::I64),
        op::I32_AND => (And, Type::I32),
        op::I64_AND => (And, Type::I64),
        op::I32_OR => (Or, Type::I32),
        op::I64_OR => (Or, Type::I64),
        op::I32_XOR => (Xor, Type::I32),
        op::I64_XOR => (Xor, Type::I64),
        op::I32_SHL => (Shl, Type::I32),
        op::I64_SHL => (Shl, Type::I64),
        op::I32_SHR_U => (ShrU, Type::I32),
        op::I64_SHR_U => (ShrU, Type::I64),
        op::I32_SHR_S => (ShrS, Type::I32),
        op::I64_SHR_S => (ShrS, Type::I64),
        op::I32_ROT_L => (RotL, Type::I32),
        op::I64_ROT_L => (RotL, Type::I64),
        op::I32_ROT_R => (RotR, Type::I32),
        op::I64_ROT_R => (RotR, Type::I64),
        op::F32_DIV => (Div, Type::F32),
        op::F64_DIV => (Div, Type::F64),
        op::F32_COPY_SIGN => (CopySign, Type::F32),
        op::F64_COPY_SIGN => (CopySign, Type::F64),
        op::F32_MIN => (Min, Type::F32),
        op::F64_MIN => (Min, Type::F64),
        op::F32_MAX => (Max, Type::F32),
        op::F64_MAX => (Max, Type::F64),
        op::I32_EQ => (Eq, Type::I32),
        op::I64_EQ => (Eq, Type::I64),
        op::F32_EQ => (Eq, Type::F32),
        op::F64_EQ => (Eq, Type::F64),
        op::I32_NE => (Ne, Type::I32),
        op::I64_NE => (Ne, Type::I64),
        op::F32_NE => (Ne, Type::F32),
        op::F64_NE => (Ne, Type::F64),
        op::I32_LT_S => (LtS, Type::I32),
        op::I64_LT_S => (LtS, Type::I64),
        op::I32_LT_U => (LtU, Type::I32),
        op::I64_LT_U => (LtU, Type::I64),
        op::I32_LE_S => (LeS, Type::I32),
        op::I64_LE_S => (LeS, Type::I64),
        op::I32_LE_U => (LeU, Type::I32),
        op::I64_LE_U => (LeU, Type::I64),
        op::I32_GT_S => (GtS, Type::I32),
        op::I64_GT_S => (GtS, Type::I64),
        op::I32_GT_U => (GtU, Type::I32),
        op::I64_GT_U => (GtU, Type::I64),
        op::I32_GE_S => (GeS, Type::I32),
        op::I64_GE_S => (GeS, Type::I64),
        op::I32_GE_U => (GeU, Type::I32),
        op::I64_GE_U => (GeU, Type::I64),
        op::F32_LT => (Lt, Type::F32),
        op::F64_LT => (Lt, Type::F64),
        op::F32_LE => (Le, Type::F32),
        op::F64_LE => (Le, Type::F64),
        op::F32_GT => (Gt, Type::F32),
        op::F64_GT => (Gt, Type::F64),
        op::F32_GE => (Ge, Type::F32),
        op::F64_GE => (Ge, Type::F64),
        _ => return None,
    })
}

/// Load opcode for `(type, width, signedness)`.
pub(crate) fn load_code(ty: Type, bytes: u8, signed: bool) -> u8 {
    match (ty, bytes, signed) {
        (Type::I32, 1, true) => op::I32_LOAD_MEM_8S,
        (Type::I32, 1, false) => op::I32_LOAD_MEM_8U,
        (Type::I32, 2, true) => op::I32_LOAD_MEM_16S,
        (Type::I32, 2, false) => op::I32_LOAD_MEM_16U,
        (Type::I32, _, _) => op::I32_LOAD_MEM,
        (Type::I64, 1, true) => op::I64_LOAD_MEM_8S,
        (Type::I64, 1, false) => op::I64_LOAD_MEM_8U,
        (Type::I64, 2, true) => op::I64_LOAD_MEM_16S,
        (Type::I64, 2, false) => op::I64_LOAD_MEM_16U,
        (Type::I64, 4, true) => op::I64_LOAD_MEM_32S,
        (Type::I64, 4, false) => op::I64_LOAD_MEM_32U,
        (Type::I64, _, _) => op::I64_LOAD_MEM,
        (Type::F32, _, _) => op::F32_LOAD_MEM,
        _ => op::F64_LOAD_MEM,
    }
}

pub(crate) fn load_from_code(code: u8) -> Option<(Type, u8, bool)> {
    Some(match code {
        op::I32_LOAD_MEM_8S => (Type::I32, 1, true),
        op::I32_LOAD_MEM_8U => (Type::I32, 1, false),
        op::I32_LOAD_MEM_16S => (Type::I32, 2, true),
        op::I32_LOAD_MEM_16U => (Type::I32, 2, false),
        op::I32_LOAD_MEM => (Type::I32, 4, false),
        op::I64_LOAD_MEM_8S => (Type::I64, 1, true),
        op::I64_LOAD_MEM_8U => (Type::I64, 1, false),
        op::I64_LOAD_MEM_16S => (Type::I64, 2, true),
        op::I64_LOAD_MEM_16U => (Type::I64, 2, false),
        op::I64_LOAD_MEM_32S => (Type::I64, 4, true),
        op::I64_LOAD_MEM_32U => (Type::I64, 4, false),
        op::I64_LOAD_MEM => (Type::I64, 8, false),
        op::F32_LOAD_MEM => (Type::F32, 4, false),
        op::F64_LOAD_MEM => (Type::F64, 8, false),
        _ => return None,
    })
}

pub(crate) fn store_code(ty: Type, bytes: u8) -> u8 {
    match (ty, bytes) {
        (Type::I32, 1) => op::I32_STORE_MEM_8,
        (Type::I32, 2) => op::I32_STORE_MEM_16,
        (Type::I32, _) => op::I32_STORE_MEM,
        (Type::I64, 1) => op::I64_STORE_MEM_8,
        (Type::I64, 2) => op::I64_STORE_MEM_16,
        (Type::I64, 4) => op::I64_STORE_MEM_32,
        (Type::I64, _) => op::I64_STORE_MEM,
        (Type::F32, _) => op::F32_STORE_MEM,
        _ => op::F64_STORE_MEM,
    }
}

pub(crate) fn store_from_code(code: u8) -> Option<(Type, u8)> {
    Some(match code {
        op::I32_STORE_MEM_8 => (Type::I32, 1),
        op::I32_STORE_MEM_16 => (Type::I32, 2),
        op::I32_STORE_MEM => (Type::I32, 4),
        op::I64_STORE_MEM_8 => (Type::I64, 1),
        op::I64_STORE_MEM_16 => (Type::I64, 2),
        op::I64_STORE_MEM_32 => (Type::I64, 4),
        op::I64_STORE_MEM => (Type::I64, 8),
        op::F32_STORE_MEM => (Type::F32, 4),
        op::F64_STORE_MEM => (Type::F64, 8),
        _ => return None,
    })
}

//! Tagged wire values.

use std::cell::Cell;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::signature::{self, MAX_DEPTH};

/// One marshaled value, tagged with its wire type.
///
/// Containers carry enough type information to reproduce their
/// signature even when empty (see [`Value::Array`]).
///
/// Decoding rejects values nested deeper than [`MAX_DEPTH`] containers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[non_exhaustive]
pub enum Value {
    /// `y`
    Byte(u8),
    /// `b`
    Bool(bool),
    /// `n`
    Int16(i16),
    /// `q`
    Uint16(u16),
    /// `i`
    Int32(i32),
    /// `u`
    Uint32(u32),
    /// `x`
    Int64(i64),
    /// `t`
    Uint64(u64),
    /// `d`
    Double(f64),
    /// `s`
    String(String),
    /// `o`
    ObjectPath(String),
    /// `g`
    Signature(String),
    /// `h`: index into the message's file descriptor table.
    UnixFd(u32),
    /// `a…`: homogeneous sequence.
    Array {
        /// Signature of every item.
        element: String,
        /// The items, each matching `element`.
        items: Vec<Value>,
    },
    /// `(…)`
    Struct(Vec<Value>),
    /// `v`: one value together with its own signature.
    Variant(Box<Value>),
    /// `{kv}`: only valid as an array item.
    DictEntry(Box<Value>, Box<Value>),
}

impl Value {
    /// Returns the single complete type of this value.
    pub fn signature(&self) -> String {
        match self {
            Self::Array { element, .. } => format!("a{element}"),
            Self::Struct(fields) => format!("({})", signature_of(fields)),
            Self::DictEntry(k, v) => format!("{{{}{}}}", k.signature(), v.signature()),
            basic => String::from(basic.code()),
        }
    }

    /// Leading type code of this value.
    pub const fn code(&self) -> char {
        match self {
            Self::Byte(_) => 'y',
            Self::Bool(_) => 'b',
            Self::Int16(_) => 'n',
            Self::Uint16(_) => 'q',
            Self::Int32(_) => 'i',
            Self::Uint32(_) => 'u',
            Self::Int64(_) => 'x',
            Self::Uint64(_) => 't',
            Self::Double(_) => 'd',
            Self::String(_) => 's',
            Self::ObjectPath(_) => 'o',
            Self::Signature(_) => 'g',
            Self::UnixFd(_) => 'h',
            Self::Array { .. } => 'a',
            Self::Struct(_) => '(',
            Self::Variant(_) => 'v',
            Self::DictEntry(..) => '{',
        }
    }

    /// Builds an array, or `None` if an item does not match `element`.
    pub fn array(element: impl Into<String>, items: Vec<Self>) -> Option<Self> {
        let element = element.into();
        if !signature::is_single(&element, true) || items.iter().any(|v| v.signature() != element)
        {
            return None;
        }
        Some(Self::Array { element, items })
    }

    /// Builds an `as` array.
    pub fn strv<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Array {
            element: "s".to_owned(),
            items: items.into_iter().map(|s| Self::String(s.into())).collect(),
        }
    }

    /// Wraps `inner` in a variant.
    pub fn variant(inner: impl Into<Self>) -> Self {
        Self::Variant(Box::new(inner.into()))
    }

    /// Checks container invariants recursively.
    ///
    /// Array items must match the element signature, dict entries must
    /// have a basic key and only appear as array items, and strings
    /// typed as paths or signatures must be valid as such.
    /// Values nested deeper than [`MAX_DEPTH`] are not well formed.
    pub fn is_well_formed(&self) -> bool {
        self.well_formed(false, 0)
    }

    /// Checks one level, `depth` containers below the outermost value.
    fn well_formed(&self, in_array: bool, depth: u32) -> bool {
        if depth >= MAX_DEPTH {
            return false;
        }
        let depth = depth + 1;
        match self {
            Self::ObjectPath(p) => crate::names::object_path_is_valid(p),
            Self::Signature(s) => signature::is_valid(s),
            Self::Array { element, items } => {
                signature::is_single(element, true)
                    && items
                        .iter()
                        .all(|v| v.well_formed(true, depth) && v.signature() == *element)
            }
            Self::Struct(fields) => {
                !fields.is_empty() && fields.iter().all(|v| v.well_formed(false, depth))
            }
            Self::Variant(inner) => {
                !matches!(**inner, Self::DictEntry(..)) && inner.well_formed(false, depth)
            }
            Self::DictEntry(k, v) => {
                in_array
                    && signature::is_basic(k.code())
                    && k.well_formed(false, depth)
                    && v.well_formed(false, depth)
            }
            _ => true,
        }
    }

    /// Borrows the text of a string, object path or signature value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::ObjectPath(s) | Self::Signature(s) => Some(s),
            _ => None,
        }
    }
}

thread_local! {
    /// Containers entered by the decoder on this thread.
    static DECODE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Holds one level of [`DECODE_DEPTH`] until dropped.
struct DepthGuard;

impl DepthGuard {
    /// Enters one level, or returns `None` past [`MAX_DEPTH`].
    fn enter() -> Option<Self> {
        DECODE_DEPTH.with(|d| {
            let depth = d.get();
            (depth < MAX_DEPTH).then(|| {
                d.set(depth + 1);
                Self
            })
        })
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DECODE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Wire shape of [`Value`]; variants must stay in the same order.
#[derive(Deserialize)]
#[serde(rename = "Value")]
enum ValueRepr {
    /// `y`
    Byte(u8),
    /// `b`
    Bool(bool),
    /// `n`
    Int16(i16),
    /// `q`
    Uint16(u16),
    /// `i`
    Int32(i32),
    /// `u`
    Uint32(u32),
    /// `x`
    Int64(i64),
    /// `t`
    Uint64(u64),
    /// `d`
    Double(f64),
    /// `s`
    String(String),
    /// `o`
    ObjectPath(String),
    /// `g`
    Signature(String),
    /// `h`
    UnixFd(u32),
    /// `a…`
    Array {
        /// Item signature.
        element: String,
        /// Items.
        items: Vec<Value>,
    },
    /// `(…)`
    Struct(Vec<Value>),
    /// `v`
    Variant(Box<Value>),
    /// `{kv}`
    DictEntry(Box<Value>, Box<Value>),
}

impl From<ValueRepr> for Value {
    fn from(repr: ValueRepr) -> Self {
        match repr {
            ValueRepr::Byte(v) => Self::Byte(v),
            ValueRepr::Bool(v) => Self::Bool(v),
            ValueRepr::Int16(v) => Self::Int16(v),
            ValueRepr::Uint16(v) => Self::Uint16(v),
            ValueRepr::Int32(v) => Self::Int32(v),
            ValueRepr::Uint32(v) => Self::Uint32(v),
            ValueRepr::Int64(v) => Self::Int64(v),
            ValueRepr::Uint64(v) => Self::Uint64(v),
            ValueRepr::Double(v) => Self::Double(v),
            ValueRepr::String(v) => Self::String(v),
            ValueRepr::ObjectPath(v) => Self::ObjectPath(v),
            ValueRepr::Signature(v) => Self::Signature(v),
            ValueRepr::UnixFd(v) => Self::UnixFd(v),
            ValueRepr::Array { element, items } => Self::Array { element, items },
            ValueRepr::Struct(v) => Self::Struct(v),
            ValueRepr::Variant(v) => Self::Variant(v),
            ValueRepr::DictEntry(k, v) => Self::DictEntry(k, v),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let _level = DepthGuard::enter().ok_or_else(|| {
            <D::Error as de::Error>::custom(format_args!(
                "value nested deeper than {MAX_DEPTH} containers"
            ))
        })?;
        ValueRepr::deserialize(deserializer).map(Self::from)
    }
}

/// Concatenated signature of a value sequence.
pub fn signature_of(values: &[Value]) -> String {
    values.iter().map(Value::signature).collect()
}

/// Fixed-size scalar that can be read out of a message by copy.
pub trait Trivial: Copy + Sized {
    /// Wire type code.
    const CODE: char;

    /// Extracts `Self` from a value of the matching type.
    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! trivial {
    ($($ty:ty => $variant:ident, $code:literal;)*) => {
        $(
            impl Trivial for $ty {
                const CODE: char = $code;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(*v),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }
        )*
    };
}

trivial! {
    u8 => Byte, 'y';
    bool => Bool, 'b';
    i16 => Int16, 'n';
    u16 => Uint16, 'q';
    i32 => Int32, 'i';
    u32 => Uint32, 'u';
    i64 => Int64, 'x';
    u64 => Uint64, 't';
    f64 => Double, 'd';
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

//! Type signature grammar.
//!
//! A signature is a string of type codes. Basic codes stand alone, `a`
//! prefixes one complete element type, `(…)` groups one or more complete
//! types and `{kv}` (only directly inside an array) pairs a basic key
//! with one complete value type.

/// Longest signature accepted on the wire.
pub const MAX_SIGNATURE: usize = 255;

/// Maximum nesting of array types.
const MAX_ARRAY_DEPTH: u32 = 32;

/// Maximum nesting of struct and dict-entry types.
const MAX_STRUCT_DEPTH: u32 = 32;

/// Maximum container nesting of a single value, variants included.
pub const MAX_DEPTH: u32 = MAX_ARRAY_DEPTH + MAX_STRUCT_DEPTH;

/// Returns `true` for fixed-size scalar codes that are read by copy.
pub const fn is_trivial(code: char) -> bool {
    matches!(
        code,
        'y' | 'b' | 'n' | 'q' | 'i' | 'u' | 'x' | 't' | 'd' | 'h'
    )
}

/// Returns `true` for codes that may key a dict entry.
pub const fn is_basic(code: char) -> bool {
    is_trivial(code) || matches!(code, 's' | 'o' | 'g')
}

/// Length in bytes of the first complete type in `sig`, if any.
fn element_len(sig: &[u8], allow_dict_entry: bool, arrays: u32, structs: u32) -> Option<usize> {
    let c = char::from(*sig.first()?);
    if is_basic(c) || c == 'v' {
        return Some(1);
    }
    match c {
        'a' => {
            if arrays >= MAX_ARRAY_DEPTH {
                return None;
            }
            element_len(&sig[1..], true, arrays + 1, structs).map(|n| n + 1)
        }
        '(' => {
            if structs >= MAX_STRUCT_DEPTH {
                return None;
            }
            let mut pos = 1;
            while *sig.get(pos)? != b')' {
                pos += element_len(&sig[pos..], false, arrays, structs + 1)?;
            }
            // "()" is not a type.
            (pos > 1).then_some(pos + 1)
        }
        '{' if allow_dict_entry => {
            if structs >= MAX_STRUCT_DEPTH || !is_basic(char::from(*sig.get(1)?)) {
                return None;
            }
            let n = element_len(sig.get(2..)?, false, arrays, structs + 1)?;
            (sig.get(2 + n) == Some(&b'}')).then_some(n + 3)
        }
        _ => None,
    }
}

/// Returns `true` if `sig` is exactly one complete type.
///
/// `allow_dict_entry` admits a bare `{kv}`, which is otherwise only legal
/// as an array element.
pub fn is_single(sig: &str, allow_dict_entry: bool) -> bool {
    sig.len() <= MAX_SIGNATURE
        && element_len(sig.as_bytes(), allow_dict_entry, 0, 0) == Some(sig.len())
}

/// Returns `true` if `sig` is a (possibly empty) sequence of complete types.
pub fn is_valid(sig: &str) -> bool {
    split(sig).is_some()
}

/// Splits `sig` into its complete types, or `None` if it is malformed.
pub fn split(sig: &str) -> Option<Vec<&str>> {
    if sig.len() > MAX_SIGNATURE {
        return None;
    }
    let bytes = sig.as_bytes();
    let mut parts = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let n = element_len(&bytes[pos..], false, 0, 0)?;
        parts.push(&sig[pos..pos + n]);
        pos += n;
    }
    Some(parts)
}

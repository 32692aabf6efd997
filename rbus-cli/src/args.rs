//! Command-line text to bus values and back.
//!
//! Arguments follow the signature one complete type at a time. An
//! array takes its item count first, a variant its own signature first:
//! `as 2 foo bar`, `v u 7`.

use anyhow::{Context, Result, bail};
use rbus::{Value, signature};

/// Parses `args` against `sig`, consuming every argument.
pub(crate) fn parse(sig: &str, args: &[String]) -> Result<Vec<Value>> {
    let types = signature::split(sig).with_context(|| format!("invalid signature {sig:?}"))?;
    let mut rest = args.iter().map(String::as_str);
    let values = types
        .into_iter()
        .map(|ty| parse_one(ty, &mut rest))
        .collect::<Result<Vec<_>>>()?;
    if let Some(extra) = rest.next() {
        bail!("unexpected argument {extra:?} after signature {sig:?}");
    }
    Ok(values)
}

fn parse_one<'a>(ty: &str, args: &mut impl Iterator<Item = &'a str>) -> Result<Value> {
    let mut next = || args.next().with_context(|| format!("missing value for type {ty}"));
    let value = match ty {
        "y" => Value::Byte(next()?.parse()?),
        "b" => Value::Bool(parse_bool(next()?)?),
        "n" => Value::Int16(next()?.parse()?),
        "q" => Value::Uint16(next()?.parse()?),
        "i" => Value::Int32(next()?.parse()?),
        "u" => Value::Uint32(next()?.parse()?),
        "x" => Value::Int64(next()?.parse()?),
        "t" => Value::Uint64(next()?.parse()?),
        "d" => Value::Double(next()?.parse()?),
        "s" => Value::String(next()?.to_owned()),
        "o" => {
            let path = next()?;
            if !rbus::names::object_path_is_valid(path) {
                bail!("invalid object path {path:?}");
            }
            Value::ObjectPath(path.to_owned())
        }
        "g" => {
            let sig = next()?;
            if !signature::is_valid(sig) {
                bail!("invalid signature value {sig:?}");
            }
            Value::Signature(sig.to_owned())
        }
        "v" => {
            let inner = next()?.to_owned();
            if !signature::is_single(&inner, false) {
                bail!("variant needs a single complete type, got {inner:?}");
            }
            Value::variant(parse_one(&inner, args)?)
        }
        _ => match ty.strip_prefix('a') {
            Some(element) if !element.starts_with('{') => {
                let count: usize = next()?.parse().context("array item count")?;
                let items = (0..count)
                    .map(|_| parse_one(element, args))
                    .collect::<Result<Vec<_>>>()?;
                Value::array(element, items).context("array items do not match")?
            }
            _ => bail!("type {ty} cannot be given on the command line"),
        },
    };
    Ok(value)
}

fn parse_bool(s: &str) -> Result<bool> {
    match s {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("not a boolean: {s:?}"),
    }
}

/// Renders `value` in the argument syntax accepted by [`parse`].
pub(crate) fn format(value: &Value) -> String {
    match value {
        Value::Byte(v) => v.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Uint16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Uint32(v) | Value::UnixFd(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Uint64(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::String(s) | Value::ObjectPath(s) | Value::Signature(s) => format!("{s:?}"),
        Value::Array { items, .. } => {
            let mut out = items.len().to_string();
            for item in items {
                out.push(' ');
                out.push_str(&format(item));
            }
            out
        }
        Value::Struct(fields) => {
            let inner: Vec<String> = fields.iter().map(format).collect();
            format!("({})", inner.join(" "))
        }
        Value::Variant(inner) => format!("{} {}", inner.signature(), format(inner)),
        Value::DictEntry(k, v) => format!("{{{} {}}}", format(k), format(v)),
        other => format!("{other:?}"),
    }
}

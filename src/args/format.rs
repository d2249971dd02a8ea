//! Format-string driven argument decoding
//!
//! Supports the units `O S b h i I l k L K n f d s z p` plus `|` (rest are
//! optional) and `$` (rest are keyword-only). A trailing `:name` names the
//! function in error messages; `;message` replaces conversion messages.

use crate::error::{PyErr, PyResult};
use crate::object::{ExceptionKind, Object, Payload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSpec<'a> {
    pub units: &'a str,
    pub function_name: Option<&'a str>,
    pub message: Option<&'a str>,
}

/// Split `"units:name"` or `"units;message"`
pub fn split_format(format: &str) -> FormatSpec<'_> {
    match format.find([':', ';']) {
        Some(pos) if format.as_bytes()[pos] == b':' => FormatSpec {
            units: &format[..pos],
            function_name: Some(&format[pos + 1..]),
            message: None,
        },
        Some(pos) => FormatSpec {
            units: &format[..pos],
            function_name: None,
            message: Some(&format[pos + 1..]),
        },
        None => FormatSpec {
            units: format,
            function_name: None,
            message: None,
        },
    }
}

/// Decoded value of one format unit
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedArg {
    Object(Object),
    Int(i64),
    /// Unsigned units (`I k K`) keep the masked bit pattern
    UInt(u64),
    Float(f64),
    Str(Option<String>),
    Bool(bool),
    /// Optional argument not supplied
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntKind {
    UnsignedByte,
    Short,
    Int,
    Long,
    UnsignedIntMask,
    UnsignedLongMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Object,
    StrObject,
    Integer(IntKind),
    Float,
    Double,
    Str,
    StrOrNone,
    Predicate,
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    kind: UnitKind,
    optional: bool,
    keyword_only: bool,
}

fn compile(units: &str) -> PyResult<Vec<Unit>> {
    let mut compiled = Vec::new();
    let mut optional = false;
    let mut keyword_only = false;

    for c in units.chars() {
        let kind = match c {
            '|' => {
                optional = true;
                continue;
            }
            '$' => {
                keyword_only = true;
                continue;
            }
            'O' => UnitKind::Object,
            'S' => UnitKind::StrObject,
            'b' => UnitKind::Integer(IntKind::UnsignedByte),
            'h' => UnitKind::Integer(IntKind::Short),
            'i' => UnitKind::Integer(IntKind::Int),
            'l' | 'L' | 'n' => UnitKind::Integer(IntKind::Long),
            'I' => UnitKind::Integer(IntKind::UnsignedIntMask),
            'k' | 'K' => UnitKind::Integer(IntKind::UnsignedLongMask),
            'f' => UnitKind::Float,
            'd' => UnitKind::Double,
            's' => UnitKind::Str,
            'z' => UnitKind::StrOrNone,
            'p' => UnitKind::Predicate,
            other => {
                return Err(PyErr::system_error(format!(
                    "bad format string: unknown unit '{}'",
                    other
                )))
            }
        };
        if keyword_only && !optional {
            return Err(PyErr::system_error(
                "bad format string: '$' must follow '|'",
            ));
        }
        compiled.push(Unit {
            kind,
            optional,
            keyword_only,
        });
    }
    Ok(compiled)
}

struct Converter<'a> {
    function: &'a str,
    message: Option<&'a str>,
}

impl Converter<'_> {
    fn type_error(&self, position: usize, expected: &str, got: &Object) -> PyErr {
        match self.message {
            Some(message) => PyErr::type_error(message),
            None => PyErr::type_error(format!(
                "{}() argument {} must be {}, not {}",
                self.function,
                position,
                expected,
                got.class_name()
            )),
        }
    }

    fn integer(&self, kind: IntKind, position: usize, value: &Object) -> PyResult<ParsedArg> {
        let v = match value.payload() {
            Payload::Int(_) | Payload::Bool(_) => value.as_int().unwrap_or_default(),
            Payload::Float(_) => {
                return Err(PyErr::type_error("integer argument expected, got float"))
            }
            _ => return Err(self.type_error(position, "int", value)),
        };

        let range = |min: i128, max: i128, what: &str| -> PyResult<ParsedArg> {
            if v < min {
                Err(PyErr::overflow_error(format!("{} is less than minimum", what)))
            } else if v > max {
                Err(PyErr::overflow_error(format!("{} is greater than maximum", what)))
            } else {
                Ok(ParsedArg::Int(v as i64))
            }
        };

        match kind {
            IntKind::UnsignedByte => range(0, u8::MAX as i128, "unsigned byte integer"),
            IntKind::Short => range(i16::MIN as i128, i16::MAX as i128, "signed short integer"),
            IntKind::Int => range(i32::MIN as i128, i32::MAX as i128, "signed integer"),
            IntKind::Long => i64::try_from(v)
                .map(ParsedArg::Int)
                .map_err(|_| PyErr::overflow_error("Python int too large to convert to C long")),
            IntKind::UnsignedIntMask => Ok(ParsedArg::UInt((v as u128 & u32::MAX as u128) as u64)),
            IntKind::UnsignedLongMask => Ok(ParsedArg::UInt((v as u128 & u64::MAX as u128) as u64)),
        }
    }

    fn convert(&self, kind: UnitKind, position: usize, value: &Object) -> PyResult<ParsedArg> {
        match kind {
            UnitKind::Object => Ok(ParsedArg::Object(value.clone())),
            UnitKind::StrObject => match value.payload() {
                Payload::Str(_) => Ok(ParsedArg::Object(value.clone())),
                _ => Err(self.type_error(position, "str", value)),
            },
            UnitKind::Integer(int_kind) => self.integer(int_kind, position, value),
            UnitKind::Float | UnitKind::Double => {
                let v = match value.payload() {
                    Payload::Float(v) => *v,
                    Payload::Int(_) | Payload::Bool(_) => value.as_int().unwrap_or_default() as f64,
                    _ => return Err(self.type_error(position, "float", value)),
                };
                let v = if kind == UnitKind::Float { v as f32 as f64 } else { v };
                Ok(ParsedArg::Float(v))
            }
            UnitKind::Str | UnitKind::StrOrNone => match value.payload() {
                Payload::Str(s) if s.contains('\0') => Err(PyErr::new(
                    ExceptionKind::ValueError,
                    "embedded null character",
                )),
                Payload::Str(s) => Ok(ParsedArg::Str(Some(s.clone()))),
                Payload::None if kind == UnitKind::StrOrNone => Ok(ParsedArg::Str(None)),
                _ if kind == UnitKind::StrOrNone => Err(self.type_error(position, "str or None", value)),
                _ => Err(self.type_error(position, "str", value)),
            },
            UnitKind::Predicate => Ok(ParsedArg::Bool(value.is_truthy())),
        }
    }
}

/// Decode `args`/`kwargs` against `format`, one result per unit
///
/// `keywords` names each unit in order; an empty name makes the unit
/// positional-only.
pub fn parse_tuple_and_keywords(
    args: &[Object],
    kwargs: &[(String, Object)],
    format: &str,
    keywords: &[&str],
) -> PyResult<Vec<ParsedArg>> {
    let spec = split_format(format);
    let function = spec.function_name.unwrap_or("function");
    let units = compile(spec.units)?;

    if keywords.len() != units.len() {
        return Err(PyErr::system_error(format!(
            "keyword list has {} entries but format has {} units",
            keywords.len(),
            units.len()
        )));
    }

    let max_positional = units.iter().filter(|unit| !unit.keyword_only).count();
    if args.len() > max_positional {
        return Err(PyErr::type_error(format!(
            "{}() takes at most {} positional arguments ({} given)",
            function,
            max_positional,
            args.len()
        )));
    }

    for (name, _) in kwargs {
        if name.is_empty() || !keywords.contains(&name.as_str()) {
            return Err(PyErr::type_error(format!(
                "'{}' is an invalid keyword argument for {}()",
                name, function
            )));
        }
    }

    let converter = Converter {
        function,
        message: spec.message,
    };

    units
        .iter()
        .zip(keywords)
        .enumerate()
        .map(|(index, (unit, &keyword))| {
            let position = index + 1;
            let positional = args.get(index);
            let by_name = kwargs
                .iter()
                .find(|(name, _)| !keyword.is_empty() && name == keyword)
                .map(|(_, value)| value);

            let value = match (positional, by_name) {
                (Some(_), Some(_)) => {
                    return Err(PyErr::type_error(format!(
                        "argument for {}() given by name ('{}') and position ({})",
                        function, keyword, position
                    )))
                }
                (Some(value), None) | (None, Some(value)) => value,
                (None, None) if unit.optional => return Ok(ParsedArg::Missing),
                (None, None) if keyword.is_empty() => {
                    return Err(PyErr::type_error(format!(
                        "{}() missing required positional argument {}",
                        function, position
                    )))
                }
                (None, None) => {
                    return Err(PyErr::type_error(format!(
                        "{}() missing required argument '{}' (pos {})",
                        function, keyword, position
                    )))
                }
            };
            converter.convert(unit.kind, position, value)
        })
        .collect()
}

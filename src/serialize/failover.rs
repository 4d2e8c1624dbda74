//! Failover converter.
//!
//! Used only when no exact serializer applies to a (from, to) pair, e.g. an
//! `i32` literal compared against an `i64` column, or a key read back from
//! the engine as `i64` and assigned to a `u32` member.

use super::builtin::{DATETIME_FORMAT, DATE_FORMAT};
use crate::error::{Error, Result};
use crate::value::{Decimal, EnumRepr, EnumValue, Value, ValueType};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use uuid::Uuid;

/// Build an integer (or enum) value of the target type, range-checked.
pub(crate) fn integer_value(v: i128, ty: ValueType) -> Result<Value> {
    let overflow = || Error::Overflow {
        value: v.to_string(),
        target: ty.to_string(),
    };
    match ty {
        ValueType::I8 => i8::try_from(v).map(Value::I8).map_err(|_| overflow()),
        ValueType::I16 => i16::try_from(v).map(Value::I16).map_err(|_| overflow()),
        ValueType::I32 => i32::try_from(v).map(Value::I32).map_err(|_| overflow()),
        ValueType::I64 => i64::try_from(v).map(Value::I64).map_err(|_| overflow()),
        ValueType::I128 => Ok(Value::I128(v)),
        ValueType::U8 => u8::try_from(v).map(Value::U8).map_err(|_| overflow()),
        ValueType::U16 => u16::try_from(v).map(Value::U16).map_err(|_| overflow()),
        ValueType::U32 => u32::try_from(v).map(Value::U32).map_err(|_| overflow()),
        ValueType::U64 => u64::try_from(v).map(Value::U64).map_err(|_| overflow()),
        ValueType::U128 => u128::try_from(v).map(Value::U128).map_err(|_| overflow()),
        ValueType::Enum(repr) if repr.contains(v) => Ok(Value::Enum(EnumValue {
            repr,
            discriminant: v,
        })),
        _ => Err(overflow()),
    }
}

/// Numeric view of a convertible value.
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i128),
    BigUnsigned(u128),
    Float(f64),
    Dec(Decimal),
}

/// Generic conversion between convertible runtime types.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailoverConverter;

impl FailoverConverter {
    /// Whether a type supports the generic convert-to-primitive capability.
    #[must_use]
    pub const fn is_convertible(ty: ValueType) -> bool {
        matches!(
            ty,
            ValueType::Bool
                | ValueType::I8
                | ValueType::I16
                | ValueType::I32
                | ValueType::I64
                | ValueType::I128
                | ValueType::U8
                | ValueType::U16
                | ValueType::U32
                | ValueType::U64
                | ValueType::U128
                | ValueType::F32
                | ValueType::F64
                | ValueType::Decimal
                | ValueType::Text
                | ValueType::DateTime
                | ValueType::Enum(_)
        )
    }

    const fn underlying(ty: ValueType) -> ValueType {
        match ty {
            ValueType::Enum(repr) => repr.underlying(),
            other => other,
        }
    }

    fn check(from: ValueType, to: ValueType) -> Result<()> {
        let unsupported = |reason| Error::UnsupportedConversion {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };
        if from == ValueType::Any || to == ValueType::Any {
            return Err(unsupported("the universal object type has no conversion"));
        }
        if Self::underlying(from) == Self::underlying(to) {
            return Err(unsupported("both types share the same underlying type"));
        }
        if !Self::is_convertible(from) || !Self::is_convertible(to) {
            return Err(unsupported("type is not convertible"));
        }
        let date_time_pair = from == ValueType::DateTime || to == ValueType::DateTime;
        if date_time_pair && from != ValueType::Text && to != ValueType::Text {
            return Err(unsupported("date-time converts only to and from text"));
        }
        Ok(())
    }

    /// Whether `convert` accepts the pair at all.
    #[must_use]
    pub fn can_convert(&self, from: ValueType, to: ValueType) -> bool {
        Self::check(from, to).is_ok()
    }

    /// Convert a value to another runtime type.
    ///
    /// # Errors
    ///
    /// `UnsupportedConversion` for pairs rejected by [`Self::can_convert`],
    /// `Overflow` for out-of-range narrowing, `Format` for unparsable text.
    pub fn convert(&self, value: &Value, to: ValueType) -> Result<Value> {
        let Some(from) = value.value_type() else {
            if to == ValueType::Any {
                return Err(Error::UnsupportedConversion {
                    from: "null".into(),
                    to: to.to_string(),
                    reason: "the universal object type has no conversion",
                });
            }
            return Ok(Self::null_into(to));
        };
        Self::check(from, to)?;

        if let Value::Text(text) = value {
            return Self::parse_text(text, to);
        }
        if to == ValueType::Text {
            return Ok(Value::Text(Self::render_text(value)));
        }

        let numeric = match value {
            Value::Bool(b) => Numeric::Int(i128::from(*b)),
            Value::U128(v) => Numeric::BigUnsigned(*v),
            Value::F32(v) => Numeric::Float(f64::from(*v)),
            Value::F64(v) => Numeric::Float(*v),
            Value::Decimal(d) => Numeric::Dec(*d),
            other => Numeric::Int(other.as_i128().ok_or_else(|| Error::UnsupportedConversion {
                from: from.to_string(),
                to: to.to_string(),
                reason: "type is not convertible",
            })?),
        };
        Self::from_numeric(numeric, to)
    }

    /// Null converts to the target's default, or to null for reference-like targets.
    fn null_into(to: ValueType) -> Value {
        if to.is_reference_like() {
            return Value::Null;
        }
        match to {
            ValueType::Bool => Value::Bool(false),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::Decimal => Value::Decimal(Decimal::default()),
            ValueType::Date => Value::Date(NaiveDate::default()),
            ValueType::Time => Value::Time(NaiveTime::default()),
            ValueType::DateTime => Value::DateTime(NaiveDateTime::default()),
            ValueType::DateTimeOffset => {
                Value::DateTimeOffset(chrono::DateTime::<chrono::Utc>::default().fixed_offset())
            }
            ValueType::Duration => Value::Duration(TimeDelta::zero()),
            ValueType::Uuid => Value::Uuid(Uuid::nil()),
            ValueType::Enum(repr) => Value::Enum(EnumValue {
                repr,
                discriminant: 0,
            }),
            int => integer_value(0, int).unwrap_or(Value::Null),
        }
    }

    fn render_text(value: &Value) -> String {
        match value {
            Value::Bool(b) => b.to_string(),
            Value::F32(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Decimal(d) => d.to_string(),
            Value::U128(v) => v.to_string(),
            Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
            other => other.as_i128().map(|i| i.to_string()).unwrap_or_default(),
        }
    }

    fn parse_text(text: &str, to: ValueType) -> Result<Value> {
        let trimmed = text.trim();
        let format_err = || Error::Format {
            input: text.to_string(),
            target: to.to_string(),
        };
        match to {
            ValueType::Bool => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Ok(Value::Bool(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Ok(Value::Bool(false))
                } else {
                    Err(format_err())
                }
            }
            ValueType::F32 | ValueType::F64 => {
                let parsed: f64 = trimmed.parse().map_err(|_| format_err())?;
                Self::from_numeric(Numeric::Float(parsed), to)
            }
            ValueType::Decimal => trimmed.parse::<Decimal>().map(Value::Decimal),
            ValueType::DateTime => NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f"))
                .or_else(|_| {
                    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                        .map(|d| d.and_time(NaiveTime::default()))
                })
                .map(Value::DateTime)
                .map_err(|_| format_err()),
            ValueType::U128 => Self::parse_integer::<u128>(trimmed, to)
                .map(Value::U128),
            int => {
                let parsed = Self::parse_integer::<i128>(trimmed, int)?;
                integer_value(parsed, int)
            }
        }
    }

    fn parse_integer<T>(text: &str, to: ValueType) -> Result<T>
    where
        T: std::str::FromStr<Err = std::num::ParseIntError>,
    {
        text.parse::<T>().map_err(|e| match e.kind() {
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => {
                Error::Overflow {
                    value: text.to_string(),
                    target: to.to_string(),
                }
            }
            _ => Error::Format {
                input: text.to_string(),
                target: to.to_string(),
            },
        })
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn from_numeric(n: Numeric, to: ValueType) -> Result<Value> {
        let overflow = |shown: String| Error::Overflow {
            value: shown,
            target: to.to_string(),
        };
        match to {
            ValueType::Bool => Ok(Value::Bool(match n {
                Numeric::Int(i) => i != 0,
                Numeric::BigUnsigned(u) => u != 0,
                Numeric::Float(f) => f != 0.0,
                Numeric::Dec(d) => d.mantissa() != 0,
            })),
            ValueType::F32 | ValueType::F64 => {
                let wide = match n {
                    Numeric::Int(i) => i as f64,
                    Numeric::BigUnsigned(u) => u as f64,
                    Numeric::Float(f) => f,
                    Numeric::Dec(d) => d.to_f64(),
                };
                if to == ValueType::F64 {
                    return Ok(Value::F64(wide));
                }
                if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
                    return Err(overflow(wide.to_string()));
                }
                Ok(Value::F32(wide as f32))
            }
            ValueType::Decimal => match n {
                Numeric::Int(i) => Ok(Value::Decimal(Decimal::from_integer(i))),
                Numeric::BigUnsigned(u) => i128::try_from(u)
                    .map(|i| Value::Decimal(Decimal::from_integer(i)))
                    .map_err(|_| overflow(u.to_string())),
                Numeric::Float(f) => Decimal::from_f64(f).map(Value::Decimal),
                Numeric::Dec(d) => Ok(Value::Decimal(d)),
            },
            ValueType::U128 => match n {
                Numeric::BigUnsigned(u) => Ok(Value::U128(u)),
                Numeric::Int(i) => integer_value(i, to),
                Numeric::Float(f) => {
                    let r = f.round_ties_even();
                    if !r.is_finite() || r < 0.0 || r >= 2_f64.powi(128) {
                        return Err(overflow(f.to_string()));
                    }
                    Ok(Value::U128(r as u128))
                }
                Numeric::Dec(d) => integer_value(round_decimal(d), to),
            },
            int => match n {
                Numeric::Int(i) => integer_value(i, int),
                Numeric::BigUnsigned(u) => i128::try_from(u)
                    .map_err(|_| overflow(u.to_string()))
                    .and_then(|i| integer_value(i, int)),
                Numeric::Float(f) => {
                    let r = f.round_ties_even();
                    if !r.is_finite() || r < -(2_f64.powi(127)) || r >= 2_f64.powi(127) {
                        return Err(overflow(f.to_string()));
                    }
                    integer_value(r as i128, int).map_err(|_| overflow(f.to_string()))
                }
                Numeric::Dec(d) => integer_value(round_decimal(d), int),
            },
        }
    }
}

/// Round a decimal to an integer, ties to even.
fn round_decimal(d: Decimal) -> i128 {
    let Some(factor) = 10_i128.checked_pow(d.scale()) else {
        return 0;
    };
    let quotient = d.mantissa() / factor;
    let remainder = (d.mantissa() % factor).abs();
    let twice = remainder.saturating_mul(2);
    let away = twice > factor || (twice == factor && quotient % 2 != 0);
    if !away {
        quotient
    } else if d.mantissa() < 0 {
        quotient - 1
    } else {
        quotient + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONVERTIBLE: &[ValueType] = &[
        ValueType::Bool,
        ValueType::I8,
        ValueType::I16,
        ValueType::I32,
        ValueType::I64,
        ValueType::I128,
        ValueType::U8,
        ValueType::U16,
        ValueType::U32,
        ValueType::U64,
        ValueType::U128,
        ValueType::F32,
        ValueType::F64,
        ValueType::Decimal,
        ValueType::Text,
        ValueType::DateTime,
        ValueType::Enum(EnumRepr::I32),
    ];

    #[test]
    fn test_rejects_universal_object_type() {
        let conv = FailoverConverter;
        assert!(!conv.can_convert(ValueType::Any, ValueType::I32));
        assert!(!conv.can_convert(ValueType::Text, ValueType::Any));
        let err = conv.convert(&Value::I32(1), ValueType::Any).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { .. }));
    }

    #[test]
    fn test_null_into_universal_object_type_is_rejected() {
        let conv = FailoverConverter;
        let err = conv.convert(&Value::Null, ValueType::Any).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConversion { .. }));
        assert_eq!(conv.convert(&Value::Null, ValueType::Text).unwrap(), Value::Null);
        assert_eq!(conv.convert(&Value::Null, ValueType::I32).unwrap(), Value::I32(0));
    }

    #[test]
    fn test_rejects_same_underlying_type() {
        let conv = FailoverConverter;
        assert!(!conv.can_convert(ValueType::I32, ValueType::I32));
        assert!(!conv.can_convert(ValueType::Enum(EnumRepr::I32), ValueType::I32));
        assert!(!conv.can_convert(ValueType::U64, ValueType::Enum(EnumRepr::U64)));
    }

    #[test]
    fn test_rejects_non_convertible() {
        let conv = FailoverConverter;
        assert!(!conv.can_convert(ValueType::Uuid, ValueType::Text));
        assert!(!conv.can_convert(ValueType::I64, ValueType::Blob));
        assert!(!conv.can_convert(ValueType::DateTime, ValueType::I64));
        assert!(conv.can_convert(ValueType::DateTime, ValueType::Text));
    }

    #[test]
    fn test_null_to_default_or_null() {
        let conv = FailoverConverter;
        assert_eq!(conv.convert(&Value::Null, ValueType::I32).unwrap(), Value::I32(0));
        assert_eq!(conv.convert(&Value::Null, ValueType::Bool).unwrap(), Value::Bool(false));
        assert_eq!(conv.convert(&Value::Null, ValueType::Text).unwrap(), Value::Null);
        assert_eq!(conv.convert(&Value::Null, ValueType::Blob).unwrap(), Value::Null);
    }

    #[test]
    fn test_narrowing_overflow() {
        let conv = FailoverConverter;
        let err = conv.convert(&Value::I64(300), ValueType::U8).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
        let err = conv.convert(&Value::F64(f64::NAN), ValueType::I32).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
        let err = conv.convert(&Value::F64(1e300), ValueType::F32).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
        assert_eq!(conv.convert(&Value::I64(200), ValueType::U8).unwrap(), Value::U8(200));
    }

    #[test]
    fn test_malformed_text() {
        let conv = FailoverConverter;
        let err = conv.convert(&Value::Text("12x".into()), ValueType::I32).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        let err = conv.convert(&Value::Text("maybe".into()), ValueType::Bool).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        let err = conv
            .convert(&Value::Text("99999999999".into()), ValueType::I32)
            .unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
    }

    #[test]
    fn test_float_rounds_half_to_even() {
        let conv = FailoverConverter;
        assert_eq!(conv.convert(&Value::F64(2.5), ValueType::I32).unwrap(), Value::I32(2));
        assert_eq!(conv.convert(&Value::F64(3.5), ValueType::I32).unwrap(), Value::I32(4));
        assert_eq!(
            conv.convert(&Value::Decimal(Decimal::new(-25, 1).unwrap()), ValueType::I64).unwrap(),
            Value::I64(-2)
        );
        assert_eq!(
            conv.convert(&Value::Decimal(Decimal::new(-35, 1).unwrap()), ValueType::I64).unwrap(),
            Value::I64(-4)
        );
    }

    #[test]
    fn test_text_round_trips() {
        let conv = FailoverConverter;
        let dt = NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let text = conv.convert(&Value::DateTime(dt), ValueType::Text).unwrap();
        assert_eq!(conv.convert(&text, ValueType::DateTime).unwrap(), Value::DateTime(dt));
        assert_eq!(
            conv.convert(&Value::Text(" 42 ".into()), ValueType::Enum(EnumRepr::U8)).unwrap(),
            Value::Enum(EnumValue {
                repr: EnumRepr::U8,
                discriminant: 42
            })
        );
    }

    /// `can_convert` implies `convert` succeeds for in-range, non-null values.
    #[test]
    fn test_can_convert_implies_convert_for_representable_values() {
        let conv = FailoverConverter;
        let samples = |ty: ValueType| -> Vec<Value> {
            match ty {
                ValueType::Bool => vec![Value::Bool(true), Value::Bool(false)],
                ValueType::Text => vec![Value::Text("1".into())],
                ValueType::DateTime => vec![Value::DateTime(NaiveDateTime::default())],
                ValueType::F32 => vec![Value::F32(1.0), Value::F32(0.0)],
                ValueType::F64 => vec![Value::F64(1.0), Value::F64(0.0)],
                ValueType::Decimal => vec![Value::Decimal(Decimal::new(10, 1).unwrap())],
                int => vec![integer_value(0, int).unwrap(), integer_value(1, int).unwrap()],
            }
        };
        for from in CONVERTIBLE {
            for to in CONVERTIBLE {
                if !conv.can_convert(*from, *to) {
                    continue;
                }
                if *from == ValueType::Text && matches!(to, ValueType::DateTime | ValueType::Bool) {
                    continue;
                }
                for value in samples(*from) {
                    assert!(
                        conv.convert(&value, *to).is_ok(),
                        "{from} -> {to} failed for {value:?}"
                    );
                }
            }
        }
    }
}

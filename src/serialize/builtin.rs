//! Built-in serializer catalog.
//!
//! Every textual encoding here is fixed-format and round-trip exact. Wide
//! integers, decimals and durations are fixed-width so that lexical and
//! numeric ordering coincide.

use super::Serializer;
use super::failover::integer_value;
use crate::error::{Error, Result};
use crate::value::{Decimal, EnumRepr, EnumValue, SqlValue, StorageAffinity, Value, ValueType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::sync::Arc;
use uuid::Uuid;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M:%S%.9f";
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
pub const DATETIME_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9f%:z";

const TIME_PARSE: &str = "%H:%M:%S%.f";
const DATETIME_PARSE: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATETIME_OFFSET_PARSE: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// Digits in `u64::MAX`.
const U64_WIDTH: usize = 20;
/// Digits in `u128::MAX`.
const U128_WIDTH: usize = 39;
const I128_BIAS: u128 = 1 << 127;
const NANOS_PER_SECOND: i128 = 1_000_000_000;
/// Sign marker, 39 integer digits, a point and `Decimal::MAX_SCALE` fraction digits.
const DECIMAL_WIDTH: usize = 1 + U128_WIDTH + 1 + Decimal::MAX_SCALE as usize;

/// Every built-in serializer, one per type in [`ValueType::BUILTIN`].
#[must_use]
pub fn catalog() -> Vec<Arc<dyn Serializer>> {
    ValueType::BUILTIN
        .iter()
        .filter_map(|ty| serializer_for(*ty))
        .collect()
}

/// Built-in serializer for one runtime type.
#[must_use]
pub fn serializer_for(ty: ValueType) -> Option<Arc<dyn Serializer>> {
    Some(match ty {
        ValueType::Bool => Arc::new(BoolSerializer),
        ValueType::I8
        | ValueType::I16
        | ValueType::I32
        | ValueType::I64
        | ValueType::U8
        | ValueType::U16
        | ValueType::U32 => Arc::new(IntegerSerializer(ty)),
        ValueType::U64 | ValueType::U128 => Arc::new(PaddedUnsignedSerializer(ty)),
        ValueType::I128 => Arc::new(I128Serializer),
        ValueType::F32 | ValueType::F64 => Arc::new(FloatSerializer(ty)),
        ValueType::Decimal => Arc::new(DecimalSerializer),
        ValueType::Text => Arc::new(TextSerializer),
        ValueType::Blob => Arc::new(BlobSerializer),
        ValueType::Json => Arc::new(JsonSerializer),
        ValueType::Date => Arc::new(DateSerializer),
        ValueType::Time => Arc::new(TimeSerializer),
        ValueType::DateTime => Arc::new(DateTimeSerializer),
        ValueType::DateTimeOffset => Arc::new(DateTimeOffsetSerializer),
        ValueType::Duration => Arc::new(DurationSerializer),
        ValueType::Uuid => Arc::new(UuidSerializer),
        ValueType::Enum(repr) => Arc::new(EnumSerializer(repr)),
        ValueType::Any => return None,
    })
}

fn wrong_value(ty: ValueType, value: &Value) -> Error {
    Error::Serialization {
        type_name: ty.to_string(),
        message: format!(
            "value of type {} handed to {ty} serializer",
            value.value_type().map_or_else(|| "null".to_string(), |t| t.to_string())
        ),
    }
}

fn wrong_cell(ty: ValueType, cell: &SqlValue) -> Error {
    Error::Serialization {
        type_name: ty.to_string(),
        message: format!(
            "cannot read {ty} from a {} cell",
            cell.affinity().map_or("NULL", |a| a.sql_type())
        ),
    }
}

fn format_error(input: &str, ty: ValueType) -> Error {
    Error::Format {
        input: input.to_string(),
        target: ty.to_string(),
    }
}

fn text_cell(ty: ValueType, cell: &SqlValue) -> Result<&str> {
    match cell {
        SqlValue::Text(t) => Ok(t),
        other => Err(wrong_cell(ty, other)),
    }
}

fn integer_cell(ty: ValueType, cell: &SqlValue) -> Result<i64> {
    match cell {
        SqlValue::Integer(i) => Ok(*i),
        other => Err(wrong_cell(ty, other)),
    }
}

fn padded_digits(input: &str, ty: ValueType) -> Result<u128> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format_error(input, ty));
    }
    input.parse().map_err(|_| Error::Overflow {
        value: input.to_string(),
        target: ty.to_string(),
    })
}

/// Offset-binary, zero-padded decimal text (value + 2^127).
#[allow(clippy::cast_sign_loss)]
fn biased_text(value: i128) -> String {
    let biased = (value as u128) ^ I128_BIAS;
    let width = U128_WIDTH;
    format!("{biased:0width$}")
}

#[allow(clippy::cast_possible_wrap)]
fn unbiased(input: &str, ty: ValueType) -> Result<i128> {
    if input.len() != U128_WIDTH {
        return Err(format_error(input, ty));
    }
    Ok((padded_digits(input, ty)? ^ I128_BIAS) as i128)
}

struct BoolSerializer;

impl Serializer for BoolSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Bool
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Integer
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            other => Err(wrong_value(ValueType::Bool, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        Ok(Value::Bool(integer_cell(ValueType::Bool, cell)? != 0))
    }
}

/// Integer types that fit losslessly in a 64-bit signed storage cell.
struct IntegerSerializer(ValueType);

impl Serializer for IntegerSerializer {
    fn runtime_type(&self) -> ValueType {
        self.0
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Integer
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        if value.value_type() != Some(self.0) {
            return Err(wrong_value(self.0, value));
        }
        let wide = value.as_i128().ok_or_else(|| wrong_value(self.0, value))?;
        i64::try_from(wide)
            .map(SqlValue::Integer)
            .map_err(|_| Error::Overflow {
                value: wide.to_string(),
                target: "INTEGER".into(),
            })
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        integer_value(i128::from(integer_cell(self.0, cell)?), self.0)
    }
}

/// `u64`/`u128` as zero-padded fixed-width decimal text.
struct PaddedUnsignedSerializer(ValueType);

impl PaddedUnsignedSerializer {
    fn width(&self) -> usize {
        if self.0 == ValueType::U64 { U64_WIDTH } else { U128_WIDTH }
    }
}

impl Serializer for PaddedUnsignedSerializer {
    fn runtime_type(&self) -> ValueType {
        self.0
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        let width = self.width();
        match (self.0, value) {
            (ValueType::U64, Value::U64(v)) => Ok(SqlValue::Text(format!("{v:0width$}"))),
            (ValueType::U128, Value::U128(v)) => Ok(SqlValue::Text(format!("{v:0width$}"))),
            (ty, other) => Err(wrong_value(ty, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(self.0, cell)?;
        let parsed = padded_digits(text, self.0)?;
        match self.0 {
            ValueType::U64 => u64::try_from(parsed).map(Value::U64).map_err(|_| Error::Overflow {
                value: text.to_string(),
                target: "u64".into(),
            }),
            _ => Ok(Value::U128(parsed)),
        }
    }
}

/// `i128` as offset-binary, zero-padded decimal text.
struct I128Serializer;

impl Serializer for I128Serializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::I128
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::I128(v) => Ok(SqlValue::Text(biased_text(*v))),
            other => Err(wrong_value(ValueType::I128, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::I128, cell)?;
        unbiased(text, ValueType::I128).map(Value::I128)
    }
}

struct FloatSerializer(ValueType);

impl Serializer for FloatSerializer {
    fn runtime_type(&self) -> ValueType {
        self.0
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Float
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match (self.0, value) {
            (ValueType::F32, Value::F32(v)) => Ok(SqlValue::Real(f64::from(*v))),
            (ValueType::F64, Value::F64(v)) => Ok(SqlValue::Real(*v)),
            (ty, other) => Err(wrong_value(ty, other)),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        // A REAL column may hand back integral values as INTEGER cells.
        let wide = match cell {
            SqlValue::Real(f) => *f,
            SqlValue::Integer(i) => *i as f64,
            other => return Err(wrong_cell(self.0, other)),
        };
        Ok(if self.0 == ValueType::F32 {
            Value::F32(wide as f32)
        } else {
            Value::F64(wide)
        })
    }
}

/// Decimals as sortable fixed-width text: `P` or `N`, the zero-padded
/// integer part, a point, and the fraction right-padded to the maximum
/// scale. Negative values store the nines' complement of every digit.
struct DecimalSerializer;

impl DecimalSerializer {
    fn encode(d: Decimal) -> String {
        let magnitude = d.mantissa().unsigned_abs();
        let scale = d.scale() as usize;
        let factor = 10_u128.pow(d.scale());
        let (int_part, frac_part) = (magnitude / factor, magnitude % factor);
        let width = U128_WIDTH;
        let frac_width = Decimal::MAX_SCALE as usize;
        let frac = if scale == 0 {
            String::new()
        } else {
            format!("{frac_part:0scale$}")
        };
        let body = format!("{int_part:0width$}.{frac:0<frac_width$}");
        if d.mantissa() < 0 {
            format!("N{}", complement(&body))
        } else {
            format!("P{body}")
        }
    }

    fn decode(text: &str) -> Result<Decimal> {
        let ty = ValueType::Decimal;
        let overflow = || Error::Overflow {
            value: text.to_string(),
            target: ty.to_string(),
        };
        if text.len() != DECIMAL_WIDTH || !text.is_ascii() {
            return Err(format_error(text, ty));
        }
        let (sign, body) = text.split_at(1);
        let negative = match sign {
            "N" => true,
            "P" => false,
            _ => return Err(format_error(text, ty)),
        };
        let body = if negative { complement(body) } else { body.to_string() };
        let Some((int_digits, frac_digits)) = body.split_once('.') else {
            return Err(format_error(text, ty));
        };
        if int_digits.len() != U128_WIDTH || !frac_digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format_error(text, ty));
        }
        let int_part = padded_digits(int_digits, ty)?;
        let frac_digits = frac_digits.trim_end_matches('0');
        let frac_part: u128 = if frac_digits.is_empty() { 0 } else { padded_digits(frac_digits, ty)? };
        let scale = u32::try_from(frac_digits.len()).map_err(|_| overflow())?;
        let magnitude = 10_u128
            .checked_pow(scale)
            .and_then(|factor| int_part.checked_mul(factor))
            .and_then(|m| m.checked_add(frac_part))
            .ok_or_else(overflow)?;
        let mantissa = if negative {
            0_i128.checked_sub_unsigned(magnitude)
        } else {
            i128::try_from(magnitude).ok()
        };
        Decimal::new(mantissa.ok_or_else(overflow)?, scale)
    }
}

fn complement(digits: &str) -> String {
    digits
        .chars()
        .map(|c| match c.to_digit(10) {
            Some(d) => char::from_digit(9 - d, 10).unwrap_or(c),
            None => c,
        })
        .collect()
}

impl Serializer for DecimalSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Decimal
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Decimal(d) => Ok(SqlValue::Text(Self::encode(*d))),
            other => Err(wrong_value(ValueType::Decimal, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        Self::decode(text_cell(ValueType::Decimal, cell)?).map(Value::Decimal)
    }
}

struct TextSerializer;

impl Serializer for TextSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Text
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Text(t) => Ok(SqlValue::Text(t.clone())),
            other => Err(wrong_value(ValueType::Text, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        text_cell(ValueType::Text, cell).map(|t| Value::Text(t.to_string()))
    }
}

struct BlobSerializer;

impl Serializer for BlobSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Blob
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Blob
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Blob(b) => Ok(SqlValue::Blob(b.clone())),
            other => Err(wrong_value(ValueType::Blob, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        match cell {
            SqlValue::Blob(b) => Ok(Value::Blob(b.clone())),
            other => Err(wrong_cell(ValueType::Blob, other)),
        }
    }
}

struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Json
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Json(j) => Ok(SqlValue::Text(serde_json::to_string(j)?)),
            other => Err(wrong_value(ValueType::Json, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::Json, cell)?;
        serde_json::from_str(text)
            .map(Value::Json)
            .map_err(|_| format_error(text, ValueType::Json))
    }
}

struct DateSerializer;

impl Serializer for DateSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Date
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Date(d) => Ok(SqlValue::Text(d.format(DATE_FORMAT).to_string())),
            other => Err(wrong_value(ValueType::Date, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::Date, cell)?;
        NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|_| format_error(text, ValueType::Date))
    }
}

struct TimeSerializer;

impl Serializer for TimeSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Time
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Time(t) => Ok(SqlValue::Text(t.format(TIME_FORMAT).to_string())),
            other => Err(wrong_value(ValueType::Time, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::Time, cell)?;
        NaiveTime::parse_from_str(text, TIME_PARSE)
            .map(Value::Time)
            .map_err(|_| format_error(text, ValueType::Time))
    }
}

struct DateTimeSerializer;

impl Serializer for DateTimeSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::DateTime
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::DateTime(dt) => Ok(SqlValue::Text(dt.format(DATETIME_FORMAT).to_string())),
            other => Err(wrong_value(ValueType::DateTime, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::DateTime, cell)?;
        NaiveDateTime::parse_from_str(text, DATETIME_PARSE)
            .map(Value::DateTime)
            .map_err(|_| format_error(text, ValueType::DateTime))
    }
}

struct DateTimeOffsetSerializer;

impl Serializer for DateTimeOffsetSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::DateTimeOffset
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::DateTimeOffset(dt) => Ok(SqlValue::Text(
                dt.format(DATETIME_OFFSET_FORMAT).to_string(),
            )),
            other => Err(wrong_value(ValueType::DateTimeOffset, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::DateTimeOffset, cell)?;
        DateTime::parse_from_str(text, DATETIME_OFFSET_PARSE)
            .map(Value::DateTimeOffset)
            .map_err(|_| format_error(text, ValueType::DateTimeOffset))
    }
}

/// Durations as total nanoseconds in the offset-binary `i128` text form.
struct DurationSerializer;

impl Serializer for DurationSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Duration
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Duration(d) => {
                let nanos = i128::from(d.num_seconds()) * NANOS_PER_SECOND
                    + i128::from(d.subsec_nanos());
                Ok(SqlValue::Text(biased_text(nanos)))
            }
            other => Err(wrong_value(ValueType::Duration, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::Duration, cell)?;
        let nanos = unbiased(text, ValueType::Duration)?;
        let secs = i64::try_from(nanos.div_euclid(NANOS_PER_SECOND)).ok();
        let subsec = u32::try_from(nanos.rem_euclid(NANOS_PER_SECOND)).ok();
        secs.zip(subsec)
            .and_then(|(secs, subsec)| TimeDelta::new(secs, subsec))
            .map(Value::Duration)
            .ok_or_else(|| Error::Overflow {
                value: text.to_string(),
                target: ValueType::Duration.to_string(),
            })
    }
}

struct UuidSerializer;

impl Serializer for UuidSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Uuid
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Text
    }

    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        match value {
            Value::Uuid(u) => Ok(SqlValue::Text(u.hyphenated().to_string())),
            other => Err(wrong_value(ValueType::Uuid, other)),
        }
    }

    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let text = text_cell(ValueType::Uuid, cell)?;
        Uuid::parse_str(text)
            .map(Value::Uuid)
            .map_err(|_| format_error(text, ValueType::Uuid))
    }
}

/// Enumerations as their underlying integer.
///
/// `u64`-backed enums are bit-reinterpreted through the signed 64-bit cell.
struct EnumSerializer(EnumRepr);

impl Serializer for EnumSerializer {
    fn runtime_type(&self) -> ValueType {
        ValueType::Enum(self.0)
    }

    fn serialized_type(&self) -> StorageAffinity {
        StorageAffinity::Integer
    }

    #[allow(clippy::cast_possible_wrap)]
    fn serialize(&self, value: &Value) -> Result<SqlValue> {
        let ty = self.runtime_type();
        let Value::Enum(EnumValue { repr, discriminant }) = value else {
            return Err(wrong_value(ty, value));
        };
        if *repr != self.0 {
            return Err(wrong_value(ty, value));
        }
        let overflow = || Error::Overflow {
            value: discriminant.to_string(),
            target: ty.to_string(),
        };
        if !self.0.contains(*discriminant) {
            return Err(overflow());
        }
        let cell = if self.0 == EnumRepr::U64 {
            u64::try_from(*discriminant).map_err(|_| overflow())? as i64
        } else {
            i64::try_from(*discriminant).map_err(|_| overflow())?
        };
        Ok(SqlValue::Integer(cell))
    }

    #[allow(clippy::cast_sign_loss)]
    fn deserialize(&self, cell: &SqlValue) -> Result<Value> {
        let raw = integer_cell(self.runtime_type(), cell)?;
        let discriminant = if self.0 == EnumRepr::U64 {
            i128::from(raw as u64)
        } else {
            i128::from(raw)
        };
        integer_value(discriminant, self.runtime_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::SerializerRegistry;
    use chrono::{FixedOffset, TimeZone};

    fn round_trip(registry: &SerializerRegistry, value: &Value) -> Value {
        let ty = value.value_type().unwrap();
        let cell = registry.serialize(value).unwrap();
        assert_eq!(
            cell.affinity(),
            Some(registry.affinity_of(ty).unwrap()),
            "affinity of {value:?}"
        );
        registry.deserialize(&cell, ty).unwrap()
    }

    fn samples() -> Vec<Value> {
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let time = NaiveTime::from_hms_nano_opt(23, 59, 58, 123_456_789).unwrap();
        let offset = FixedOffset::east_opt(5 * 3600 + 1800).unwrap();
        vec![
            Value::Bool(true),
            Value::Bool(false),
            Value::I8(i8::MIN),
            Value::I16(-300),
            Value::I32(i32::MAX),
            Value::I64(i64::MIN),
            Value::I128(i128::MIN),
            Value::I128(-1),
            Value::I128(i128::MAX),
            Value::U8(u8::MAX),
            Value::U16(65_000),
            Value::U32(u32::MAX),
            Value::U64(u64::MAX),
            Value::U64(0),
            Value::U128(u128::MAX),
            Value::F32(1.1),
            Value::F64(-2.5e-300),
            Value::F64(f64::INFINITY),
            Value::Decimal(Decimal::new(-12_345, 3).unwrap()),
            Value::Text("héllo 'quoted'".into()),
            Value::Text(String::new()),
            Value::Blob(vec![0, 255, 7]),
            Value::Json(serde_json::json!({"a": [1, 2, {"b": null}]})),
            Value::Date(date),
            Value::Time(time),
            Value::DateTime(date.and_time(time)),
            Value::DateTimeOffset(offset.from_local_datetime(&date.and_time(time)).unwrap()),
            Value::Duration(TimeDelta::nanoseconds(-90_061_000_000_001)),
            Value::Uuid(Uuid::new_v4()),
            Value::Enum(EnumValue {
                repr: EnumRepr::U64,
                discriminant: i128::from(u64::MAX),
            }),
            Value::Enum(EnumValue {
                repr: EnumRepr::I8,
                discriminant: -3,
            }),
        ]
    }

    #[test]
    fn test_round_trip_law() {
        let registry = SerializerRegistry::with_builtins();
        for value in samples() {
            assert_eq!(round_trip(&registry, &value), value);
        }
    }

    #[test]
    fn test_nan_preserves_type() {
        let registry = SerializerRegistry::with_builtins();
        match round_trip(&registry, &Value::F64(f64::NAN)) {
            Value::F64(f) => assert!(f.is_nan()),
            other => panic!("expected F64, got {other:?}"),
        }
        assert!(matches!(round_trip(&registry, &Value::F32(f32::NAN)), Value::F32(f) if f.is_nan()));
    }

    #[test]
    fn test_padded_unsigned_sorts_lexically() {
        let registry = SerializerRegistry::with_builtins();
        let mut values = [u64::MAX, 9, 10, 0, 1 << 40];
        let mut texts: Vec<String> = values
            .iter()
            .map(|v| match registry.serialize(&Value::U64(*v)).unwrap() {
                SqlValue::Text(t) => t,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert!(texts.iter().all(|t| t.len() == 20));
        values.sort_unstable();
        texts.sort();
        let decoded: Vec<u64> = texts.iter().map(|t| t.parse().unwrap()).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_i128_sorts_lexically() {
        let registry = SerializerRegistry::with_builtins();
        let encode = |v: i128| match registry.serialize(&Value::I128(v)).unwrap() {
            SqlValue::Text(t) => t,
            other => panic!("unexpected {other:?}"),
        };
        assert!(encode(-5) < encode(-4));
        assert!(encode(-1) < encode(0));
        assert!(encode(0) < encode(i128::MAX));
        assert!(encode(i128::MIN) < encode(-1));
    }

    #[test]
    fn test_decimal_sorts_lexically() {
        let registry = SerializerRegistry::with_builtins();
        let mut values: Vec<Decimal> = ["9.00", "12.50", "-0.5", "-12", "0", "100", "-100.25", "0.001"]
            .iter()
            .map(|t| t.parse().unwrap())
            .collect();
        let mut texts: Vec<String> = values
            .iter()
            .map(|d| match registry.serialize(&Value::Decimal(*d)).unwrap() {
                SqlValue::Text(t) => t,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert!(texts.iter().all(|t| t.len() == DECIMAL_WIDTH));
        values.sort();
        texts.sort();
        let decoded: Vec<Decimal> = texts.iter().map(|t| DecimalSerializer::decode(t).unwrap()).collect();
        assert_eq!(decoded, values);
    }

    #[test]
    fn test_decimal_extremes_and_normalized_scale() {
        let registry = SerializerRegistry::with_builtins();
        for d in [
            Decimal::new(i128::MIN, 0).unwrap(),
            Decimal::new(i128::MAX, 0).unwrap(),
            Decimal::new(i128::MIN, Decimal::MAX_SCALE).unwrap(),
            Decimal::new(i128::MAX, Decimal::MAX_SCALE).unwrap(),
        ] {
            assert_eq!(round_trip(&registry, &Value::Decimal(d)), Value::Decimal(d));
        }
        let Value::Decimal(back) = round_trip(&registry, &Value::Decimal("1.50".parse().unwrap())) else {
            panic!("expected a decimal");
        };
        assert_eq!(back.scale(), 1);
        assert_eq!(back.to_string(), "1.5");
    }

    #[test]
    fn test_duration_full_range() {
        let registry = SerializerRegistry::with_builtins();
        for d in [TimeDelta::MAX, TimeDelta::MIN, TimeDelta::days(200 * 365 * 3)] {
            assert_eq!(round_trip(&registry, &Value::Duration(d)), Value::Duration(d));
        }
        let encode = |d: TimeDelta| match registry.serialize(&Value::Duration(d)).unwrap() {
            SqlValue::Text(t) => t,
            other => panic!("unexpected {other:?}"),
        };
        assert!(encode(TimeDelta::MIN) < encode(TimeDelta::nanoseconds(-1)));
        assert!(encode(TimeDelta::nanoseconds(-1)) < encode(TimeDelta::zero()));
        assert!(encode(TimeDelta::seconds(1)) < encode(TimeDelta::MAX));
    }

    #[test]
    fn test_u64_enum_is_bit_reinterpreted() {
        let registry = SerializerRegistry::with_builtins();
        let value = Value::Enum(EnumValue {
            repr: EnumRepr::U64,
            discriminant: i128::from(u64::MAX),
        });
        assert_eq!(registry.serialize(&value).unwrap(), SqlValue::Integer(-1));
    }

    #[test]
    fn test_enum_out_of_repr_range() {
        let registry = SerializerRegistry::with_builtins();
        let value = Value::Enum(EnumValue {
            repr: EnumRepr::U8,
            discriminant: 300,
        });
        assert!(matches!(registry.serialize(&value), Err(Error::Overflow { .. })));
        let cell = SqlValue::Integer(-1);
        assert!(registry.deserialize(&cell, ValueType::Enum(EnumRepr::U8)).is_err());
    }

    #[test]
    fn test_malformed_text_is_format_error() {
        let registry = SerializerRegistry::with_builtins();
        let cases = [
            (ValueType::Uuid, "not-a-uuid"),
            (ValueType::Date, "2024-13-01"),
            (ValueType::DateTime, "yesterday"),
            (ValueType::U64, "12a"),
            (ValueType::Decimal, "1..2"),
            (ValueType::Decimal, "1.50"),
            (ValueType::I128, "5"),
        ];
        for (ty, text) in cases {
            let err = registry.deserialize(&SqlValue::Text(text.into()), ty).unwrap_err();
            assert!(matches!(err, Error::Format { .. }), "{ty}: {err}");
        }
    }

    #[test]
    fn test_wrong_cell_affinity() {
        let registry = SerializerRegistry::with_builtins();
        let err = registry
            .deserialize(&SqlValue::Text("1".into()), ValueType::I32)
            .unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn test_integer_cell_out_of_range() {
        let registry = SerializerRegistry::with_builtins();
        let err = registry.deserialize(&SqlValue::Integer(70_000), ValueType::U16).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
    }

    #[test]
    fn test_fixed_width_time_text() {
        let registry = SerializerRegistry::with_builtins();
        let time = NaiveTime::from_hms_opt(7, 5, 3).unwrap();
        assert_eq!(
            registry.serialize(&Value::Time(time)).unwrap(),
            SqlValue::Text("07:05:03.000000000".into())
        );
    }
}

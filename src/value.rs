//! Runtime values, runtime type identities and storage cells.
//!
//! Three layers meet here:
//! - [`ValueType`] names a runtime type and keys the serializer registry
//! - [`Value`] carries a runtime value of one of those types
//! - [`SqlValue`] is what the engine stores, in one of four [`StorageAffinity`] classes

use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

// ── Storage ───────────────────────────────────────────────────

/// The engine's native storage classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageAffinity {
    Integer,
    Float,
    Text,
    Blob,
}

impl StorageAffinity {
    /// Column type keyword used in DDL.
    #[must_use]
    pub const fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Float => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

impl fmt::Display for StorageAffinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// A raw storage cell as bound to or read from the engine.
///
/// Equality and hashing compare floats by bit pattern, so cells can key maps.
#[derive(Debug, Clone)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    /// Affinity of the stored cell, `None` for NULL.
    #[must_use]
    pub const fn affinity(&self) -> Option<StorageAffinity> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(StorageAffinity::Integer),
            Self::Real(_) => Some(StorageAffinity::Float),
            Self::Text(_) => Some(StorageAffinity::Text),
            Self::Blob(_) => Some(StorageAffinity::Blob),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Real(a), Self::Real(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Blob(a), Self::Blob(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl std::hash::Hash for SqlValue {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Integer(v) => v.hash(state),
            Self::Real(v) => v.to_bits().hash(state),
            Self::Text(v) => v.hash(state),
            Self::Blob(v) => v.hash(state),
        }
    }
}

// ── Runtime types ─────────────────────────────────────────────

/// Underlying integer type of an enumerated runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnumRepr {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
}

impl EnumRepr {
    /// Integer runtime type sharing this representation.
    #[must_use]
    pub const fn underlying(&self) -> ValueType {
        match self {
            Self::I8 => ValueType::I8,
            Self::I16 => ValueType::I16,
            Self::I32 => ValueType::I32,
            Self::I64 => ValueType::I64,
            Self::U8 => ValueType::U8,
            Self::U16 => ValueType::U16,
            Self::U32 => ValueType::U32,
            Self::U64 => ValueType::U64,
        }
    }

    /// Inclusive discriminant range representable by this repr.
    #[must_use]
    pub const fn bounds(&self) -> (i128, i128) {
        match self {
            Self::I8 => (i8::MIN as i128, i8::MAX as i128),
            Self::I16 => (i16::MIN as i128, i16::MAX as i128),
            Self::I32 => (i32::MIN as i128, i32::MAX as i128),
            Self::I64 => (i64::MIN as i128, i64::MAX as i128),
            Self::U8 => (0, u8::MAX as i128),
            Self::U16 => (0, u16::MAX as i128),
            Self::U32 => (0, u32::MAX as i128),
            Self::U64 => (0, u64::MAX as i128),
        }
    }

    #[must_use]
    pub const fn contains(&self, discriminant: i128) -> bool {
        let (lo, hi) = self.bounds();
        discriminant >= lo && discriminant <= hi
    }
}

/// Identity of a runtime type; the key of the serializer registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// The universal object type. Only meaningful to the failover converter.
    Any,
    Bool,
    I8,
    I16,
    I32,
    I64,
    I128,
    U8,
    U16,
    U32,
    U64,
    U128,
    F32,
    F64,
    Decimal,
    Text,
    Blob,
    Json,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
    Duration,
    Uuid,
    Enum(EnumRepr),
}

impl ValueType {
    /// Every concrete runtime type covered by the built-in catalog.
    pub const BUILTIN: &'static [ValueType] = &[
        Self::Bool,
        Self::I8,
        Self::I16,
        Self::I32,
        Self::I64,
        Self::I128,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::U64,
        Self::U128,
        Self::F32,
        Self::F64,
        Self::Decimal,
        Self::Text,
        Self::Blob,
        Self::Json,
        Self::Date,
        Self::Time,
        Self::DateTime,
        Self::DateTimeOffset,
        Self::Duration,
        Self::Uuid,
        Self::Enum(EnumRepr::I8),
        Self::Enum(EnumRepr::I16),
        Self::Enum(EnumRepr::I32),
        Self::Enum(EnumRepr::I64),
        Self::Enum(EnumRepr::U8),
        Self::Enum(EnumRepr::U16),
        Self::Enum(EnumRepr::U32),
        Self::Enum(EnumRepr::U64),
    ];

    #[must_use]
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::I128
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
                | Self::U128
        )
    }

    #[must_use]
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Whether a null converts to null rather than to a default value.
    #[must_use]
    pub const fn is_reference_like(&self) -> bool {
        matches!(self, Self::Any | Self::Text | Self::Blob | Self::Json)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enum(repr) => write!(f, "enum({repr:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

// ── Decimal ───────────────────────────────────────────────────

/// Fixed-precision decimal: `mantissa * 10^-scale`.
///
/// The scale is kept for display, so `1.50` prints as written, but equality,
/// hashing and ordering are numeric: `1.50 == 1.5`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

impl Decimal {
    pub const MAX_SCALE: u32 = 28;

    /// # Errors
    ///
    /// Returns `Overflow` when `scale` exceeds [`Decimal::MAX_SCALE`].
    pub fn new(mantissa: i128, scale: u32) -> Result<Self> {
        if scale > Self::MAX_SCALE {
            return Err(Error::Overflow {
                value: format!("{mantissa}e-{scale}"),
                target: "Decimal".into(),
            });
        }
        Ok(Self { mantissa, scale })
    }

    #[must_use]
    pub const fn from_integer(value: i128) -> Self {
        Self {
            mantissa: value,
            scale: 0,
        }
    }

    #[must_use]
    pub const fn mantissa(&self) -> i128 {
        self.mantissa
    }

    #[must_use]
    pub const fn scale(&self) -> u32 {
        self.scale
    }

    /// Same value with trailing fractional zeros removed.
    #[must_use]
    pub const fn normalized(&self) -> Self {
        let mut mantissa = self.mantissa;
        let mut scale = self.scale;
        while scale > 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            scale -= 1;
        }
        Self { mantissa, scale }
    }

    /// Integer part, truncated toward zero.
    #[must_use]
    pub fn trunc(&self) -> i128 {
        self.mantissa / Self::factor(self.scale)
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> f64 {
        self.mantissa as f64 / 10_f64.powi(i32::try_from(self.scale).unwrap_or(i32::MAX))
    }

    /// Closest decimal to a finite float, using its shortest round-trip text.
    ///
    /// # Errors
    ///
    /// Returns `Overflow` for NaN, infinities or out-of-range magnitudes.
    pub fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::Overflow {
                value: value.to_string(),
                target: "Decimal".into(),
            });
        }
        format!("{value}").parse().map_err(|_| Error::Overflow {
            value: value.to_string(),
            target: "Decimal".into(),
        })
    }

    // 10^28 fits in i128, so every valid scale has a factor.
    const fn factor(scale: u32) -> i128 {
        10_i128.pow(scale)
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_int, b_int) = (self.trunc(), other.trunc());
        if a_int != b_int {
            return a_int.cmp(&b_int);
        }
        // Fractions are below 10^scale in magnitude, so widening to the
        // larger scale stays within 10^MAX_SCALE.
        let scale = self.scale.max(other.scale);
        let a_frac = (self.mantissa % Self::factor(self.scale)) * Self::factor(scale - self.scale);
        let b_frac = (other.mantissa % Self::factor(other.scale)) * Self::factor(scale - other.scale);
        a_frac.cmp(&b_frac)
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl Hash for Decimal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let normalized = self.normalized();
        normalized.mantissa.hash(state);
        normalized.scale.hash(state);
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.mantissa);
        }
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{digits}", "0".repeat(scale - digits.len() + 1))
        } else {
            digits
        };
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let format_err = || Error::Format {
            input: s.to_string(),
            target: "Decimal".into(),
        };
        let overflow = || Error::Overflow {
            value: s.to_string(),
            target: "Decimal".into(),
        };
        let trimmed = s.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format_err());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(format_err());
        }
        let scale = u32::try_from(frac_part.len()).map_err(|_| overflow())?;
        let digits = format!("{int_part}{frac_part}");
        let digits = digits.trim_start_matches('0');
        let magnitude: u128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| overflow())?
        };
        let mantissa = if negative {
            0_i128.checked_sub_unsigned(magnitude)
        } else {
            i128::try_from(magnitude).ok()
        };
        Self::new(mantissa.ok_or_else(overflow)?, scale).map_err(|_| overflow())
    }
}

// ── Enumerations ──────────────────────────────────────────────

/// An enumerated value carried by its underlying integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub repr: EnumRepr,
    pub discriminant: i128,
}

/// Rust enums persisted as their underlying integer value.
pub trait SqlEnum: Sized {
    const REPR: EnumRepr;

    fn to_discriminant(&self) -> i128;

    fn from_discriminant(discriminant: i128) -> Option<Self>;

    fn to_value(&self) -> Value {
        Value::Enum(EnumValue {
            repr: Self::REPR,
            discriminant: self.to_discriminant(),
        })
    }
}

// ── Runtime values ────────────────────────────────────────────

/// A runtime value of one of the [`ValueType`]s, or null.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    I128(i128),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    U128(u128),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    Text(String),
    Blob(Vec<u8>),
    Json(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Duration(TimeDelta),
    Uuid(Uuid),
    Enum(EnumValue),
}

impl Value {
    /// Runtime type of this value, `None` for null.
    #[must_use]
    pub const fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            Self::Null => return None,
            Self::Bool(_) => ValueType::Bool,
            Self::I8(_) => ValueType::I8,
            Self::I16(_) => ValueType::I16,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::I128(_) => ValueType::I128,
            Self::U8(_) => ValueType::U8,
            Self::U16(_) => ValueType::U16,
            Self::U32(_) => ValueType::U32,
            Self::U64(_) => ValueType::U64,
            Self::U128(_) => ValueType::U128,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Decimal(_) => ValueType::Decimal,
            Self::Text(_) => ValueType::Text,
            Self::Blob(_) => ValueType::Blob,
            Self::Json(_) => ValueType::Json,
            Self::Date(_) => ValueType::Date,
            Self::Time(_) => ValueType::Time,
            Self::DateTime(_) => ValueType::DateTime,
            Self::DateTimeOffset(_) => ValueType::DateTimeOffset,
            Self::Duration(_) => ValueType::Duration,
            Self::Uuid(_) => ValueType::Uuid,
            Self::Enum(e) => ValueType::Enum(e.repr),
        })
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload widened to i128, for integer and enum values.
    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        Some(match self {
            Self::I8(v) => i128::from(*v),
            Self::I16(v) => i128::from(*v),
            Self::I32(v) => i128::from(*v),
            Self::I64(v) => i128::from(*v),
            Self::I128(v) => *v,
            Self::U8(v) => i128::from(*v),
            Self::U16(v) => i128::from(*v),
            Self::U32(v) => i128::from(*v),
            Self::U64(v) => i128::from(*v),
            Self::U128(v) => i128::try_from(*v).ok()?,
            Self::Enum(e) => e.discriminant,
            _ => return None,
        })
    }

    /// Ordering between two values of the same runtime type.
    ///
    /// Values of different types, nulls, and NaN floats are unordered.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::U128(a), Self::U128(b)) => Some(a.cmp(b)),
            (Self::F32(a), Self::F32(b)) => a.partial_cmp(b),
            (Self::F64(a), Self::F64(b)) => a.partial_cmp(b),
            (Self::Decimal(a), Self::Decimal(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Blob(a), Self::Blob(b)) => Some(a.cmp(b)),
            (Self::Json(a), Self::Json(b)) => (a == b).then_some(Ordering::Equal),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Time(a), Self::Time(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (Self::DateTimeOffset(a), Self::DateTimeOffset(b)) => Some(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Some(a.cmp(b)),
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            (a, b) if a.value_type().is_some() && a.value_type() == b.value_type() => {
                Some(a.as_i128()?.cmp(&b.as_i128()?))
            }
            _ => None,
        }
    }

    /// Decode an enumerated value into a Rust enum.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` when the value is not an enum of `E`'s repr or
    /// names no variant of `E`.
    pub fn into_enum<E: SqlEnum>(self) -> Result<E> {
        match self {
            Self::Enum(EnumValue { repr, discriminant }) if repr == E::REPR => {
                E::from_discriminant(discriminant).ok_or_else(|| Error::Serialization {
                    type_name: std::any::type_name::<E>().to_string(),
                    message: format!("no variant with discriminant {discriminant}"),
                })
            }
            other => Err(mismatch(std::any::type_name::<E>(), &other)),
        }
    }
}

fn mismatch(expected: &str, actual: &Value) -> Error {
    Error::Serialization {
        type_name: expected.to_string(),
        message: format!(
            "expected {expected}, found {}",
            actual.value_type().map_or_else(|| "null".to_string(), |t| t.to_string())
        ),
    }
}

/// Extraction of a typed Rust value out of a [`Value`].
pub trait FromValue: Sized {
    /// # Errors
    ///
    /// Returns `Serialization` when the value has a different runtime type.
    fn from_value(value: Value) -> Result<Self>;
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

macro_rules! value_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Self::$variant(v)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        other => Err(mismatch(stringify!($ty), &other)),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    Bool => bool,
    I8 => i8,
    I16 => i16,
    I32 => i32,
    I64 => i64,
    I128 => i128,
    U8 => u8,
    U16 => u16,
    U32 => u32,
    U64 => u64,
    U128 => u128,
    F32 => f32,
    F64 => f64,
    Decimal => Decimal,
    Text => String,
    Blob => Vec<u8>,
    Json => serde_json::Value,
    Date => NaiveDate,
    Time => NaiveTime,
    DateTime => NaiveDateTime,
    DateTimeOffset => DateTime<FixedOffset>,
    Duration => TimeDelta,
    Uuid => Uuid,
    Enum => EnumValue,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTimeOffset(v.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

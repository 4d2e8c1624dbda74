//! Predicate translation.
//!
//! An [`Expr`] is a boolean expression over one entity type's properties.
//! [`PredicateTranslator`] compiles it into a parameterized WHERE clause;
//! [`Expr::evaluate`] runs the same tree against an in-memory entity with
//! SQL null semantics.

use crate::ddl::quote_ident;
use crate::error::{Error, Result};
use crate::schema::{Entity, SchemaColumn, SchemaTable, SqliteDbSchema};
use crate::serialize::SerializerRegistry;
use crate::storage::connection::Parameters;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    #[must_use]
    pub const fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// The operator with its operands swapped (`a < b` is `b > a`).
    #[must_use]
    pub const fn flipped(&self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::Ne => Self::Ne,
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
        }
    }

    const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Ne => !matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
        }
    }
}

/// Boolean expression over entity properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Property(String),
    Literal(Value),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    In {
        operand: Box<Expr>,
        values: Vec<Value>,
    },
    Call {
        function: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    #[must_use]
    pub fn prop(name: impl Into<String>) -> Self {
        Self::Property(name.into())
    }

    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    #[must_use]
    pub fn call(function: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    #[must_use]
    pub fn compare(op: CompareOp, left: Self, right: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn equals(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Eq, self, Self::lit(value))
    }

    #[must_use]
    pub fn not_equals(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Ne, self, Self::lit(value))
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Lt, self, Self::lit(value))
    }

    #[must_use]
    pub fn le(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Le, self, Self::lit(value))
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Gt, self, Self::lit(value))
    }

    #[must_use]
    pub fn ge(self, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::Ge, self, Self::lit(value))
    }

    #[must_use]
    pub fn is_null(self) -> Self {
        Self::compare(CompareOp::Eq, self, Self::Literal(Value::Null))
    }

    #[must_use]
    pub fn is_not_null(self) -> Self {
        Self::compare(CompareOp::Ne, self, Self::Literal(Value::Null))
    }

    #[must_use]
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            operand: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }

    /// Evaluate against an in-memory entity.
    ///
    /// Unknown (null) outcomes count as not matching, as in a WHERE clause.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPredicate` for the same shapes the translator
    /// rejects, and conversion errors for literals that cannot take the
    /// property's type.
    pub fn evaluate<E: Entity>(&self, entity: &E, registry: &SerializerRegistry) -> Result<bool> {
        let members = E::members();
        let read = |name: &str| match members.iter().find(|m| m.name == name) {
            Some(m) if !m.is_navigation() => Ok(entity.read(name)),
            Some(_) => Err(Error::unsupported_predicate(format!("navigation property '{name}'"))),
            None => Err(Error::unsupported_predicate(format!("unknown property '{name}'"))),
        };
        let eval = Evaluator {
            read: &read,
            registry,
        };
        Ok(eval.eval(self)?.unwrap_or(false))
    }
}

impl std::ops::Not for Expr {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Property(name) => write!(f, "{name}"),
            Self::Literal(Value::Null) => f.write_str("null"),
            Self::Literal(value) => write!(f, "{value:?}"),
            Self::Compare { op, left, right } => write!(f, "({left} {} {right})", op.as_sql()),
            Self::And(l, r) => write!(f, "({l} AND {r})"),
            Self::Or(l, r) => write!(f, "({l} OR {r})"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::In { operand, values } => write!(f, "{operand} IN [{} values]", values.len()),
            Self::Call { function, args } => write!(f, "{function}({} args)", args.len()),
        }
    }
}

// ── Translation ───────────────────────────────────────────────

/// WHERE clause body and its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub parameters: Parameters,
}

/// Translates expressions over one table into WHERE clauses.
#[derive(Debug, Clone, Copy)]
pub struct PredicateTranslator<'a> {
    schema: &'a SqliteDbSchema,
    registry: &'a SerializerRegistry,
}

impl<'a> PredicateTranslator<'a> {
    #[must_use]
    pub const fn new(schema: &'a SqliteDbSchema, registry: &'a SerializerRegistry) -> Self {
        Self { schema, registry }
    }

    /// Translate over the table of entity type `T`.
    ///
    /// # Errors
    ///
    /// See [`Self::translate_for`].
    pub fn translate<T: 'static>(&self, expr: &Expr) -> Result<WhereClause> {
        self.translate_table(self.schema.table_for::<T>()?, expr)
    }

    /// Translate over a table by name.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPredicate` naming the first node that has no
    /// translation, and conversion errors for literals that cannot take
    /// their property's type.
    pub fn translate_for(&self, table: &str, expr: &Expr) -> Result<WhereClause> {
        self.translate_table(self.schema.require_table(table)?, expr)
    }

    fn translate_table(&self, table: &SchemaTable, expr: &Expr) -> Result<WhereClause> {
        let mut translation = Translation {
            schema: self.schema,
            registry: self.registry,
            table,
            parameters: Parameters::new(),
        };
        let sql = translation.condition(expr)?;
        Ok(WhereClause {
            sql,
            parameters: translation.parameters,
        })
    }
}

struct Translation<'a> {
    schema: &'a SqliteDbSchema,
    registry: &'a SerializerRegistry,
    table: &'a SchemaTable,
    parameters: Parameters,
}

impl<'a> Translation<'a> {
    fn column(&self, name: &str) -> Result<&'a SchemaColumn> {
        if let Some(column) = self.table.column(name) {
            return Ok(column);
        }
        if self.schema.navigation(&self.table.name, name).is_some() {
            return Err(Error::unsupported_predicate(format!("navigation property '{name}'")));
        }
        Err(Error::unsupported_predicate(format!("unknown property '{name}'")))
    }

    fn literal(&mut self, column: &SchemaColumn, value: &Value) -> Result<String> {
        let converted = self.registry.convert(value, column.value_type)?;
        let cell = self.registry.serialize_as(&converted, column.value_type)?;
        let name = format!(":w{}", self.parameters.len());
        self.parameters.bind(name.clone(), cell);
        Ok(name)
    }

    fn condition(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::And(l, r) => Ok(format!("({} AND {})", self.condition(l)?, self.condition(r)?)),
            Expr::Or(l, r) => Ok(format!("({} OR {})", self.condition(l)?, self.condition(r)?)),
            Expr::Not(inner) => Ok(format!("NOT ({})", self.condition(inner)?)),
            Expr::Compare { op, left, right } => self.comparison(*op, left, right, expr),
            Expr::In { operand, values } => self.membership(operand, values),
            Expr::Property(name) => {
                let column = self.column(name)?;
                if column.value_type != crate::value::ValueType::Bool {
                    return Err(Error::unsupported_predicate(format!(
                        "non-boolean property '{name}' used as a condition"
                    )));
                }
                let param = self.literal(column, &Value::Bool(true))?;
                Ok(format!("{} = {param}", quote_ident(name)))
            }
            Expr::Literal(Value::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
            Expr::Literal(_) => Err(Error::unsupported_predicate(format!(
                "non-boolean literal {expr}"
            ))),
            Expr::Call { function, .. } => {
                Err(Error::unsupported_predicate(format!("call to function '{function}'")))
            }
        }
    }

    fn comparison(&mut self, op: CompareOp, left: &Expr, right: &Expr, node: &Expr) -> Result<String> {
        let (property, op, value) = match (left, right) {
            (Expr::Property(a), Expr::Property(b)) => {
                self.column(a)?;
                self.column(b)?;
                return Ok(format!("{} {} {}", quote_ident(a), op.as_sql(), quote_ident(b)));
            }
            (Expr::Property(p), Expr::Literal(v)) => (p, op, v),
            (Expr::Literal(v), Expr::Property(p)) => (p, op.flipped(), v),
            (Expr::Call { function, .. }, _) | (_, Expr::Call { function, .. }) => {
                return Err(Error::unsupported_predicate(format!("call to function '{function}'")));
            }
            _ => return Err(Error::unsupported_predicate(format!("comparison {node}"))),
        };
        let column = self.column(property)?;
        let ident = quote_ident(property);
        if value.is_null() {
            return match op {
                CompareOp::Eq => Ok(format!("{ident} IS NULL")),
                CompareOp::Ne => Ok(format!("{ident} IS NOT NULL")),
                _ => Err(Error::unsupported_predicate(format!("ordering against null in {node}"))),
            };
        }
        let param = self.literal(column, value)?;
        Ok(format!("{ident} {} {param}", op.as_sql()))
    }

    fn membership(&mut self, operand: &Expr, values: &[Value]) -> Result<String> {
        let Expr::Property(name) = operand else {
            return Err(Error::unsupported_predicate(format!("membership test on {operand}")));
        };
        let column = self.column(name)?;
        let ident = quote_ident(name);
        let mut params = Vec::with_capacity(values.len());
        for value in values.iter().filter(|v| !v.is_null()) {
            params.push(self.literal(column, value)?);
        }
        let has_null = values.iter().any(Value::is_null);
        let sql = match (params.is_empty(), has_null) {
            (true, false) => "0".to_string(),
            (true, true) => format!("{ident} IS NULL"),
            (false, false) => format!("{ident} IN ({})", params.join(", ")),
            (false, true) => format!("({ident} IN ({}) OR {ident} IS NULL)", params.join(", ")),
        };
        Ok(sql)
    }
}

// ── Evaluation ────────────────────────────────────────────────

type ReadFn<'a> = dyn Fn(&str) -> Result<Value> + 'a;

struct Evaluator<'a> {
    read: &'a ReadFn<'a>,
    registry: &'a SerializerRegistry,
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<Option<bool>> {
        match expr {
            Expr::And(l, r) => Ok(match (self.eval(l)?, self.eval(r)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }),
            Expr::Or(l, r) => Ok(match (self.eval(l)?, self.eval(r)?) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }),
            Expr::Not(inner) => Ok(self.eval(inner)?.map(|b| !b)),
            Expr::Compare { op, left, right } => self.comparison(*op, left, right, expr),
            Expr::In { operand, values } => {
                let Expr::Property(name) = operand.as_ref() else {
                    return Err(Error::unsupported_predicate(format!("membership test on {operand}")));
                };
                // A null entry matches a null property, as `IS NULL` does.
                let current = (self.read)(name)?;
                let Some(ty) = current.value_type() else {
                    return Ok(values.iter().any(Value::is_null).then_some(true));
                };
                for value in values.iter().filter(|v| !v.is_null()) {
                    let candidate = self.registry.convert(value, ty)?;
                    if current.compare(&candidate) == Some(Ordering::Equal) {
                        return Ok(Some(true));
                    }
                }
                Ok(Some(false))
            }
            Expr::Property(name) => match (self.read)(name)? {
                Value::Bool(b) => Ok(Some(b)),
                Value::Null => Ok(None),
                _ => Err(Error::unsupported_predicate(format!(
                    "non-boolean property '{name}' used as a condition"
                ))),
            },
            Expr::Literal(Value::Bool(b)) => Ok(Some(*b)),
            Expr::Literal(_) => Err(Error::unsupported_predicate(format!("non-boolean literal {expr}"))),
            Expr::Call { function, .. } => {
                Err(Error::unsupported_predicate(format!("call to function '{function}'")))
            }
        }
    }

    fn comparison(&self, op: CompareOp, left: &Expr, right: &Expr, node: &Expr) -> Result<Option<bool>> {
        let null_literal = matches!(
            (left, right),
            (_, Expr::Literal(Value::Null)) | (Expr::Literal(Value::Null), _)
        );
        let (current, op, other) = match (left, right) {
            (Expr::Property(a), Expr::Property(b)) => ((self.read)(a)?, op, (self.read)(b)?),
            (Expr::Property(p), Expr::Literal(v)) => ((self.read)(p)?, op, v.clone()),
            (Expr::Literal(v), Expr::Property(p)) => ((self.read)(p)?, op.flipped(), v.clone()),
            (Expr::Call { function, .. }, _) | (_, Expr::Call { function, .. }) => {
                return Err(Error::unsupported_predicate(format!("call to function '{function}'")));
            }
            _ => return Err(Error::unsupported_predicate(format!("comparison {node}"))),
        };
        if null_literal {
            return match op {
                CompareOp::Eq => Ok(Some(current.is_null())),
                CompareOp::Ne => Ok(Some(!current.is_null())),
                _ => Err(Error::unsupported_predicate(format!("ordering against null in {node}"))),
            };
        }
        let Some(ty) = current.value_type() else {
            return Ok(None);
        };
        if other.is_null() {
            return Ok(None);
        }
        let other = self.registry.convert(&other, ty)?;
        Ok(current.compare(&other).map(|ordering| op.holds(ordering)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing::{Customer, Order, shop_schema};
    use crate::value::{Decimal, SqlValue};

    #[test]
    fn test_conjunction_binds_two_serialized_literals() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());
        let expr = Expr::prop("id").ge(18_i32).and(Expr::prop("name").equals("Ann"));
        let clause = translator.translate::<Customer>(&expr).unwrap();
        assert_eq!(clause.sql, "(\"id\" >= :w0 AND \"name\" = :w1)");
        assert_eq!(clause.parameters.len(), 2);
        assert_eq!(clause.parameters.get(":w0"), Some(&SqlValue::Integer(18)));
        assert_eq!(clause.parameters.get(":w1"), Some(&SqlValue::Text("Ann".into())));
    }

    #[test]
    fn test_null_comparisons_and_membership() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());

        let clause = translator.translate::<Order>(&Expr::prop("note").is_null()).unwrap();
        assert_eq!(clause.sql, "\"note\" IS NULL");
        assert!(clause.parameters.is_empty());

        let clause = translator
            .translate::<Order>(&!Expr::prop("note").is_not_null())
            .unwrap();
        assert_eq!(clause.sql, "NOT (\"note\" IS NOT NULL)");

        let clause = translator
            .translate::<Order>(&Expr::prop("id").is_in([1_i64, 2, 3]))
            .unwrap();
        assert_eq!(clause.sql, "\"id\" IN (:w0, :w1, :w2)");

        let clause = translator
            .translate::<Order>(&Expr::prop("id").is_in(Vec::<i64>::new()))
            .unwrap();
        assert_eq!(clause.sql, "0");
    }

    #[test]
    fn test_literal_on_left_flips_operator() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());
        let expr = Expr::compare(CompareOp::Lt, Expr::lit(5_i64), Expr::prop("id"));
        let clause = translator.translate::<Order>(&expr).unwrap();
        assert_eq!(clause.sql, "\"id\" > :w0");
    }

    #[test]
    fn test_literal_takes_column_serializer() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());
        let clause = translator
            .translate::<Order>(&Expr::prop("total").equals(Decimal::new(1250, 2).unwrap()))
            .unwrap();
        assert_eq!(clause.parameters.get(":w0"), Some(&SqlValue::Text("12.50".into())));
    }

    #[test]
    fn test_unsupported_shapes_name_the_node() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());

        let err = translator
            .translate::<Order>(&Expr::prop("customer").is_null())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPredicate { ref node } if node.contains("navigation property 'customer'")));

        let err = translator
            .translate::<Order>(&Expr::compare(
                CompareOp::Eq,
                Expr::call("lower", vec![Expr::prop("note")]),
                Expr::lit("x"),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedPredicate { ref node } if node.contains("lower")));

        let err = translator.translate::<Order>(&Expr::prop("total")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPredicate { .. }));

        let err = translator.translate::<Order>(&Expr::prop("nope").equals(1)).unwrap_err();
        assert!(err.to_string().contains("unknown property 'nope'"));
    }

    #[test]
    fn test_malformed_literal_is_format_error() {
        let schema = shop_schema();
        let translator = PredicateTranslator::new(&schema, schema.registry());
        let err = translator
            .translate::<Order>(&Expr::prop("id").equals("twelve"))
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn test_evaluate_matches_sql_semantics() {
        let schema = shop_schema();
        let registry = schema.registry();
        let order = Order {
            id: 7,
            note: None,
            ..Order::new(1, "12.50")
        };

        assert!(Expr::prop("id").ge(5_i32).evaluate(&order, registry).unwrap());
        assert!(Expr::prop("note").is_null().evaluate(&order, registry).unwrap());
        assert!(!Expr::prop("note").equals("x").evaluate(&order, registry).unwrap());
        assert!(!(!Expr::prop("note").equals("x")).evaluate(&order, registry).unwrap());
        assert!(
            Expr::prop("total")
                .gt(Decimal::from_integer(12))
                .and(Expr::prop("id").is_in([6_i64, 7]))
                .evaluate(&order, registry)
                .unwrap()
        );
        assert!(
            Expr::prop("customer")
                .is_null()
                .evaluate(&order, registry)
                .is_err()
        );
    }

    #[test]
    fn test_evaluate_membership_with_null_entry() {
        let schema = shop_schema();
        let registry = schema.registry();
        let unnoted = Order::new(1, "5.00");
        let gift = Order {
            note: Some("gift".into()),
            ..Order::new(1, "5.00")
        };
        let other = Order {
            note: Some("rush".into()),
            ..Order::new(1, "5.00")
        };
        let with_null = Expr::prop("note").is_in([Value::Null, Value::from("gift")]);
        assert!(with_null.evaluate(&unnoted, registry).unwrap());
        assert!(with_null.evaluate(&gift, registry).unwrap());
        assert!(!with_null.evaluate(&other, registry).unwrap());
        assert!((!with_null.clone()).evaluate(&other, registry).unwrap());

        let without_null = Expr::prop("note").is_in([Value::from("gift")]);
        assert!(!without_null.evaluate(&unnoted, registry).unwrap());
    }
}

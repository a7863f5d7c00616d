use std::fmt::Display;

use crate::{
    error::DbResult,
    plan::Plan,
    query::{Constant, Scan},
    record::Schema,
};

/// One side of a term: a constant or the name of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    Constant(Constant),
    Field(String),
}

impl Expression {
    pub fn evaluate(&self, scan: &dyn Scan) -> DbResult<Constant> {
        match self {
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Field(name) => scan.get_value(name),
        }
    }

    pub fn as_constant(&self) -> Option<&Constant> {
        match self {
            Expression::Constant(value) => Some(value),
            Expression::Field(_) => None,
        }
    }

    pub fn as_field(&self) -> Option<&str> {
        match self {
            Expression::Field(name) => Some(name),
            Expression::Constant(_) => None,
        }
    }

    /// Whether every field the expression mentions is in `schema`
    pub fn applies_to(&self, schema: &Schema) -> bool {
        match self {
            Expression::Constant(_) => true,
            Expression::Field(name) => schema.has_field(name),
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant(value) => write!(f, "{value}"),
            Expression::Field(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    LessThan,
    GreaterThan,
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::Equal => write!(f, "="),
            Operator::LessThan => write!(f, "<"),
            Operator::GreaterThan => write!(f, ">"),
        }
    }
}

/// A comparison between two expressions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    lhs: Expression,
    op: Operator,
    rhs: Expression,
}

impl Term {
    pub fn new(lhs: Expression, op: Operator, rhs: Expression) -> Self {
        Self { lhs, op, rhs }
    }

    pub fn equality(lhs: Expression, rhs: Expression) -> Self {
        Self::new(lhs, Operator::Equal, rhs)
    }

    pub fn is_satisfied(&self, scan: &dyn Scan) -> DbResult<bool> {
        let lhs = self.lhs.evaluate(scan)?;
        let rhs = self.rhs.evaluate(scan)?;
        Ok(match self.op {
            Operator::Equal => lhs == rhs,
            Operator::LessThan => lhs < rhs,
            Operator::GreaterThan => lhs > rhs,
        })
    }

    /// The field this term joins on when both sides name the same field, as in `uid = uid`
    ///
    /// Such a term relates two different inputs that share the field name, so it never
    /// restricts a single table.
    pub fn natural_join_field(&self) -> Option<&str> {
        match (&self.lhs, self.op, &self.rhs) {
            (Expression::Field(l), Operator::Equal, Expression::Field(r)) if l == r => Some(l),
            _ => None,
        }
    }

    /// How much the term is expected to shrink the output of `plan`
    pub fn reduction_factor(&self, plan: &dyn Plan) -> usize {
        if self.op != Operator::Equal {
            return 3;
        }
        match (&self.lhs, &self.rhs) {
            (Expression::Field(l), Expression::Field(r)) => {
                plan.distinct_values(l).max(plan.distinct_values(r))
            }
            (Expression::Field(field), Expression::Constant(_))
            | (Expression::Constant(_), Expression::Field(field)) => plan.distinct_values(field),
            (Expression::Constant(l), Expression::Constant(r)) => {
                if l == r {
                    1
                } else {
                    usize::MAX
                }
            }
        }
    }

    /// The constant `field_name` is required to equal, if the term is such an equality
    pub fn equates_with_constant(&self, field_name: &str) -> Option<&Constant> {
        if self.op != Operator::Equal {
            return None;
        }
        match (&self.lhs, &self.rhs) {
            (Expression::Field(f), Expression::Constant(c))
            | (Expression::Constant(c), Expression::Field(f))
                if f == field_name =>
            {
                Some(c)
            }
            _ => None,
        }
    }

    /// The field `field_name` is required to equal, if the term is such an equality
    pub fn equates_with_field(&self, field_name: &str) -> Option<&str> {
        if self.op != Operator::Equal {
            return None;
        }
        match (&self.lhs, &self.rhs) {
            (Expression::Field(l), Expression::Field(r)) if l == field_name => Some(r),
            (Expression::Field(l), Expression::Field(r)) if r == field_name => Some(l),
            _ => None,
        }
    }

    pub fn applies_to(&self, schema: &Schema) -> bool {
        self.lhs.applies_to(schema) && self.rhs.applies_to(schema)
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

/// A conjunction of terms. The empty predicate is always true
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Vec<Term>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_term(term: Term) -> Self {
        Self { terms: vec![term] }
    }

    pub fn from_terms(terms: Vec<Term>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn conjoin_with(&mut self, other: Predicate) {
        self.terms.extend(other.terms);
    }

    pub fn is_satisfied(&self, scan: &dyn Scan) -> DbResult<bool> {
        for term in &self.terms {
            if !term.is_satisfied(scan)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn reduction_factor(&self, plan: &dyn Plan) -> usize {
        self.terms
            .iter()
            .fold(1usize, |factor, term| factor.saturating_mul(term.reduction_factor(plan)))
    }

    /// The terms that can be checked against `schema` alone
    pub fn select_sub_pred(&self, schema: &Schema) -> Option<Predicate> {
        let terms: Vec<Term> = self
            .terms
            .iter()
            .filter(|t| t.natural_join_field().is_none() && t.applies_to(schema))
            .cloned()
            .collect();
        (!terms.is_empty()).then_some(Predicate { terms })
    }

    /// The terms that need both schemas: those over their union that neither one
    /// satisfies alone, plus natural joins on a field both of them have
    pub fn join_sub_pred(&self, schema_1: &Schema, schema_2: &Schema) -> Option<Predicate> {
        let mut union = schema_1.clone();
        union.add_all(schema_2);
        let terms: Vec<Term> = self
            .terms
            .iter()
            .filter(|t| match t.natural_join_field() {
                Some(field) => schema_1.has_field(field) && schema_2.has_field(field),
                None => {
                    !t.applies_to(schema_1) && !t.applies_to(schema_2) && t.applies_to(&union)
                }
            })
            .cloned()
            .collect();
        (!terms.is_empty()).then_some(Predicate { terms })
    }

    /// A field that both schemas have and that the predicate joins them on
    pub fn natural_join_field(&self, schema_1: &Schema, schema_2: &Schema) -> Option<String> {
        self.terms
            .iter()
            .filter_map(Term::natural_join_field)
            .find(|field| schema_1.has_field(field) && schema_2.has_field(field))
            .map(str::to_string)
    }

    pub fn equates_with_constant(&self, field_name: &str) -> Option<&Constant> {
        self.terms
            .iter()
            .find_map(|t| t.equates_with_constant(field_name))
    }

    pub fn equates_with_field(&self, field_name: &str) -> Option<&str> {
        self.terms
            .iter()
            .find_map(|t| t.equates_with_field(field_name))
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms: Vec<String> = self.terms.iter().map(Term::to_string).collect();
        write!(f, "{}", terms.join(" and "))
    }
}

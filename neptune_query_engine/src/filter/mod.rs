// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The filter algebra: logical expressions over typed attributes, attribute
//! selection filters, and their serialization into the backend query
//! language.

mod pattern;

pub(crate) use pattern::parse_extended_pattern;

use chrono::{DateTime, Local, Utc};

use crate::types::{Aggregation, AttributeType, ALL_TYPES};
use crate::{ErrorKind, Result};

/// An attribute reference inside a filter.
///
/// The type may be left out, in which case it must be resolvable by type
/// inference to exactly one concrete type before the query is dispatched. An
/// aggregation turns a reference to a series attribute into a reference to
/// one of its scalar summaries.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub r#type: Option<AttributeType>,
    pub aggregation: Option<Aggregation>,
}

impl Attribute {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: None,
            aggregation: None,
        }
    }

    pub fn with_type(mut self, r#type: AttributeType) -> Self {
        self.r#type = Some(r#type);
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Renders the attribute reference: the backtick-quoted name, the wire
    /// type suffix when the type is pinned, and the aggregation wrapper when
    /// one is selected.
    pub fn to_query(&self) -> String {
        let mut query = format!("`{}`", self.name);
        if let Some(r#type) = self.r#type {
            query.push(':');
            query.push_str(r#type.backend_tag());
        }
        match self.aggregation {
            Some(aggregation) => format!("{aggregation}({query})"),
            None => query,
        }
    }
}

impl From<&str> for Attribute {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Attribute {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A literal on the right-hand side of a predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Datetime(DateTime<Utc>),
}

impl FilterValue {
    /// Renders the literal as a quoted query-language string.
    ///
    /// Backslashes and double quotes are escaped; datetimes are rendered as
    /// ISO-8601 with the local zone offset.
    fn to_query(&self) -> String {
        let raw = match self {
            FilterValue::Bool(value) => value.to_string(),
            FilterValue::Int(value) => value.to_string(),
            FilterValue::Float(value) => value.to_string(),
            FilterValue::String(value) => value.clone(),
            FilterValue::Datetime(value) => {
                return format!(
                    "\"{}\"",
                    value
                        .with_timezone(&Local)
                        .to_rfc3339_opts(chrono::SecondsFormat::AutoSi, false)
                )
            }
        };
        let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\"")
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FilterValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<DateTime<Utc>> for FilterValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Datetime(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Matches,
    NotMatches,
    Contains,
    NotContains,
}

impl PredicateOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateOperator::Eq => "==",
            PredicateOperator::Ne => "!=",
            PredicateOperator::Gt => ">",
            PredicateOperator::Ge => ">=",
            PredicateOperator::Lt => "<",
            PredicateOperator::Le => "<=",
            PredicateOperator::Matches => "MATCHES",
            PredicateOperator::NotMatches => "NOT MATCHES",
            PredicateOperator::Contains => "CONTAINS",
            PredicateOperator::NotContains => "NOT CONTAINS",
        }
    }
}

/// A logical filter over runs or experiments.
///
/// The tree is finite: leaves are value predicates and existence predicates,
/// interior nodes are the associative `AND`/`OR` operators and the prefix
/// `NOT`. `&`, `|`, and `!` are overloaded to combine filters the same way
/// the factory methods do.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Predicate {
        attribute: Attribute,
        operator: PredicateOperator,
        value: FilterValue,
    },
    Exists {
        attribute: Attribute,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn predicate(
        attribute: impl Into<Attribute>,
        operator: PredicateOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Filter::Predicate {
            attribute: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Eq, value)
    }

    pub fn ne(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Ne, value)
    }

    pub fn gt(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Gt, value)
    }

    pub fn ge(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Ge, value)
    }

    pub fn lt(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Lt, value)
    }

    pub fn le(attribute: impl Into<Attribute>, value: impl Into<FilterValue>) -> Self {
        Self::predicate(attribute, PredicateOperator::Le, value)
    }

    /// The attribute value must match every one of the given regexes.
    ///
    /// Patterns the backend's regex dialect cannot express are rejected here,
    /// before any wire call.
    pub fn matches_all<A: Into<Attribute>>(attribute: A, regexes: &[&str]) -> Result<Self> {
        let attribute = attribute.into();
        let predicates = regexes
            .iter()
            .map(|regex| {
                pattern::validate_regex(regex)?;
                Ok(Self::predicate(
                    attribute.clone(),
                    PredicateOperator::Matches,
                    *regex,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::fold_all(predicates))
    }

    /// The attribute value must match none of the given regexes.
    pub fn matches_none<A: Into<Attribute>>(attribute: A, regexes: &[&str]) -> Result<Self> {
        let attribute = attribute.into();
        let predicates = regexes
            .iter()
            .map(|regex| {
                pattern::validate_regex(regex)?;
                Ok(Self::predicate(
                    attribute.clone(),
                    PredicateOperator::NotMatches,
                    *regex,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::fold_all(predicates))
    }

    /// The tag set must contain every value, or the string attribute must
    /// contain every substring. An empty list is rejected: it would match
    /// everything, which is never what the caller meant.
    pub fn contains_all<A: Into<Attribute>>(attribute: A, values: &[&str]) -> Result<Self> {
        Self::contains(attribute, values, PredicateOperator::Contains)
    }

    /// The tag set must contain none of the values, or the string attribute
    /// must contain none of the substrings.
    pub fn contains_none<A: Into<Attribute>>(attribute: A, values: &[&str]) -> Result<Self> {
        Self::contains(attribute, values, PredicateOperator::NotContains)
    }

    fn contains<A: Into<Attribute>>(
        attribute: A,
        values: &[&str],
        operator: PredicateOperator,
    ) -> Result<Self> {
        if values.is_empty() {
            return Err(ErrorKind::InvalidArgument.with_message(
                "contains filters require at least one value; got an empty list",
            ));
        }
        let attribute = attribute.into();
        let predicates = values
            .iter()
            .map(|value| Self::predicate(attribute.clone(), operator, *value))
            .collect();
        Ok(Self::fold_all(predicates))
    }

    pub fn exists(attribute: impl Into<Attribute>) -> Self {
        Filter::Exists {
            attribute: attribute.into(),
        }
    }

    /// Selects experiments by name using the extended regex syntax.
    pub fn name(pattern: &str) -> Result<Self> {
        pattern::build_extended_regex_filter(Self::name_attribute(), pattern)
    }

    /// Selects experiments whose name equals any of the given names.
    pub fn name_in(names: &[&str]) -> Result<Self> {
        if names.is_empty() {
            return Err(ErrorKind::InvalidArgument
                .with_message("name_in requires at least one name; got an empty list"));
        }
        let filters = names
            .iter()
            .map(|name| Self::eq(Self::name_attribute(), *name))
            .collect();
        Ok(Self::fold_any(filters))
    }

    fn name_attribute() -> Attribute {
        Attribute::new("sys/name").with_type(AttributeType::String)
    }

    pub fn all(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn any(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    fn fold_all(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.pop().expect("length checked")
        } else {
            Filter::And(filters)
        }
    }

    fn fold_any(mut filters: Vec<Filter>) -> Self {
        if filters.len() == 1 {
            filters.pop().expect("length checked")
        } else {
            Filter::Or(filters)
        }
    }

    /// Serializes the filter into the backend query language.
    pub fn to_query(&self) -> String {
        match self {
            Filter::Predicate {
                attribute,
                operator,
                value,
            } => format!(
                "{} {} {}",
                attribute.to_query(),
                operator.as_str(),
                value.to_query()
            ),
            Filter::Exists { attribute } => format!("{} EXISTS", attribute.to_query()),
            Filter::And(filters) => Self::render_associative(filters, "AND"),
            Filter::Or(filters) => Self::render_associative(filters, "OR"),
            Filter::Not(filter) => format!("NOT ({})", filter.to_query()),
        }
    }

    fn render_associative(filters: &[Filter], operator: &str) -> String {
        let rendered: Vec<String> = filters
            .iter()
            .map(|filter| format!("({})", filter.to_query()))
            .collect();
        rendered.join(&format!(" {operator} "))
    }

    /// Calls `f` for every attribute reference in the tree, leaves first.
    pub(crate) fn for_each_attribute(&self, f: &mut impl FnMut(&Attribute)) {
        match self {
            Filter::Predicate { attribute, .. } | Filter::Exists { attribute } => f(attribute),
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.for_each_attribute(f);
                }
            }
            Filter::Not(filter) => filter.for_each_attribute(f),
        }
    }

    /// Mutable variant of [`Filter::for_each_attribute`]; type inference uses
    /// this to pin resolved types in place on its private copy of the tree.
    pub(crate) fn for_each_attribute_mut(&mut self, f: &mut impl FnMut(&mut Attribute)) {
        match self {
            Filter::Predicate { attribute, .. } | Filter::Exists { attribute } => f(attribute),
            Filter::And(filters) | Filter::Or(filters) => {
                for filter in filters {
                    filter.for_each_attribute_mut(f);
                }
            }
            Filter::Not(filter) => filter.for_each_attribute_mut(f),
        }
    }
}

impl std::ops::BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        Filter::And(vec![self, rhs])
    }
}

impl std::ops::BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        Filter::Or(vec![self, rhs])
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::negate(self)
    }
}

/// One conjunctive criterion over attribute names, types, and aggregations.
///
/// `name_eq` selects exact names; the regex lists constrain names positively
/// and negatively; `type_in` restricts the type set; `aggregations` selects
/// which series summaries later value fetches request (`last` by default).
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeFilter {
    pub name_eq: Option<Vec<String>>,
    pub type_in: Vec<AttributeType>,
    pub must_match_regexes: Option<Vec<String>>,
    pub must_not_match_regexes: Option<Vec<String>>,
    pub aggregations: Vec<Aggregation>,
}

impl Default for AttributeFilter {
    fn default() -> Self {
        Self {
            name_eq: None,
            type_in: ALL_TYPES.to_vec(),
            must_match_regexes: None,
            must_not_match_regexes: None,
            aggregations: vec![Aggregation::Last],
        }
    }
}

impl AttributeFilter {
    /// Matches every attribute of every type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the given names exactly.
    pub fn name_eq<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            name_eq: Some(names.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Matches names against an extended regex pattern. Alternatives in the
    /// pattern become separate filter leaves combined by union.
    pub fn matching(pattern: &str) -> Result<AttributeFilterExpr> {
        let parsed = parse_extended_pattern(pattern)?;
        let leaves = parsed
            .alternatives
            .into_iter()
            .map(|alternative| {
                AttributeFilterExpr::Leaf(AttributeFilter {
                    must_match_regexes: Some(alternative.must_match),
                    must_not_match_regexes: (!alternative.must_not_match.is_empty())
                        .then_some(alternative.must_not_match),
                    ..AttributeFilter::default()
                })
            })
            .collect::<Vec<_>>();
        Ok(AttributeFilterExpr::union(leaves))
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = AttributeType>) -> Self {
        self.type_in = types.into_iter().collect();
        self
    }

    pub fn with_aggregations(
        mut self,
        aggregations: impl IntoIterator<Item = Aggregation>,
    ) -> Self {
        self.aggregations = aggregations.into_iter().collect();
        self
    }

    pub fn must_match<S: Into<String>>(mut self, regexes: impl IntoIterator<Item = S>) -> Self {
        self.must_match_regexes = Some(regexes.into_iter().map(Into::into).collect());
        self
    }

    pub fn must_not_match<S: Into<String>>(mut self, regexes: impl IntoIterator<Item = S>) -> Self {
        self.must_not_match_regexes = Some(regexes.into_iter().map(Into::into).collect());
        self
    }

    /// The positive regex set sent on the wire: exact names are escaped into
    /// an anchored alternation and merged with the match regexes.
    pub(crate) fn wire_must_match_regexes(&self) -> Option<Vec<String>> {
        let escaped = self.name_eq.as_ref().map(|names| escape_name_eq(names));
        match (escaped, self.must_match_regexes.clone()) {
            (None, None) => None,
            (Some(mut left), Some(right)) => {
                left.extend(right);
                Some(left)
            }
            (Some(left), None) => Some(left),
            (None, Some(right)) => Some(right),
        }
    }
}

impl From<AttributeFilter> for AttributeFilterExpr {
    fn from(filter: AttributeFilter) -> Self {
        AttributeFilterExpr::Leaf(filter)
    }
}

/// Escapes exact names into a single anchored alternation regex.
fn escape_name_eq(names: &[String]) -> Vec<String> {
    let escaped: Vec<String> = names.iter().map(|name| regex::escape(name)).collect();
    if escaped.len() == 1 {
        vec![format!("^{}$", escaped[0])]
    } else {
        vec![format!("^({})$", escaped.join("|"))]
    }
}

/// A disjunction of [`AttributeFilter`] leaves.
///
/// Each leaf becomes its own fetch task; results are deduplicated by
/// `(name, type)` when the streams merge.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeFilterExpr {
    Leaf(AttributeFilter),
    Any(Vec<AttributeFilterExpr>),
}

impl AttributeFilterExpr {
    pub fn union(mut exprs: Vec<AttributeFilterExpr>) -> Self {
        if exprs.len() == 1 {
            exprs.pop().expect("length checked")
        } else {
            AttributeFilterExpr::Any(exprs)
        }
    }

    /// Flattens the disjunction into its leaves, in declaration order.
    pub fn leaves(&self) -> Vec<&AttributeFilter> {
        match self {
            AttributeFilterExpr::Leaf(filter) => vec![filter],
            AttributeFilterExpr::Any(exprs) => {
                exprs.iter().flat_map(|expr| expr.leaves()).collect()
            }
        }
    }
}

impl std::ops::BitOr for AttributeFilterExpr {
    type Output = AttributeFilterExpr;

    fn bitor(self, rhs: AttributeFilterExpr) -> AttributeFilterExpr {
        match self {
            AttributeFilterExpr::Any(mut exprs) => {
                exprs.push(rhs);
                AttributeFilterExpr::Any(exprs)
            }
            leaf => AttributeFilterExpr::Any(vec![leaf, rhs]),
        }
    }
}

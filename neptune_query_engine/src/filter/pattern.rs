// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translation of the extended regex syntax into plain filters.
//!
//! The extended syntax combines ordinary regex fragments with three top-level
//! operators: `|` separates alternatives, `&` requires every fragment of an
//! alternative to match, and a leading `!` negates a fragment. Operators only
//! take effect outside groups and character classes, so `(a|b)` stays a
//! single regex fragment.

use super::{Attribute, Filter, PredicateOperator};
use crate::{ErrorKind, Result};

/// A parsed extended pattern: a union of alternatives, each a conjunction of
/// positive and negative regex fragments.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ExtendedPattern {
    pub alternatives: Vec<PatternAlternative>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PatternAlternative {
    pub must_match: Vec<String>,
    pub must_not_match: Vec<String>,
}

/// Validates a single regex fragment against the supported dialect.
///
/// The backend evaluates patterns with an RE2-style engine, so anything the
/// `regex` crate rejects (lookaround, backreferences, malformed syntax) is
/// rejected up front as a user error.
pub(crate) fn validate_regex(fragment: &str) -> Result<()> {
    regex::Regex::new(fragment).map_err(|e| {
        ErrorKind::InvalidPattern
            .with_message(format!("unsupported regex pattern `{fragment}`: {e}"))
    })?;
    Ok(())
}

/// Parses an extended pattern into its normalized alternatives.
pub(crate) fn parse_extended_pattern(pattern: &str) -> Result<ExtendedPattern> {
    let mut alternatives = Vec::new();
    for alternative in split_top_level(pattern, '|')? {
        let mut must_match = Vec::new();
        let mut must_not_match = Vec::new();
        for fragment in split_top_level(&alternative, '&')? {
            let fragment = fragment.trim();
            let (negated, fragment) = match fragment.strip_prefix('!') {
                Some(rest) => (true, rest.trim_start()),
                None => (false, fragment),
            };
            if fragment.is_empty() {
                return Err(ErrorKind::InvalidPattern
                    .with_message(format!("empty fragment in pattern `{pattern}`")));
            }
            validate_regex(fragment)?;
            if negated {
                must_not_match.push(fragment.to_string());
            } else {
                must_match.push(fragment.to_string());
            }
        }
        if must_match.is_empty() && must_not_match.is_empty() {
            return Err(ErrorKind::InvalidPattern
                .with_message(format!("empty alternative in pattern `{pattern}`")));
        }
        // An alternative of only negations still has to match something.
        if must_match.is_empty() {
            must_match.push(".*".to_string());
        }
        alternatives.push(PatternAlternative {
            must_match,
            must_not_match,
        });
    }
    Ok(ExtendedPattern { alternatives })
}

/// Builds the run filter for a single-string extended pattern: alternatives
/// OR-folded, fragments of an alternative AND-folded into `MATCHES` /
/// `NOT MATCHES` predicates.
pub(crate) fn build_extended_regex_filter(attribute: Attribute, pattern: &str) -> Result<Filter> {
    let parsed = parse_extended_pattern(pattern)?;
    let mut alternatives = Vec::new();
    for alternative in parsed.alternatives {
        let mut predicates = Vec::new();
        for fragment in alternative.must_match {
            predicates.push(Filter::Predicate {
                attribute: attribute.clone(),
                operator: PredicateOperator::Matches,
                value: fragment.into(),
            });
        }
        for fragment in alternative.must_not_match {
            predicates.push(Filter::Predicate {
                attribute: attribute.clone(),
                operator: PredicateOperator::NotMatches,
                value: fragment.into(),
            });
        }
        alternatives.push(Filter::fold_all(predicates));
    }
    Ok(Filter::fold_any(alternatives))
}

/// Splits at an operator character, ignoring occurrences that are escaped or
/// nested inside `(...)` groups or `[...]` classes.
fn split_top_level(pattern: &str, operator: char) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut group_depth = 0usize;
    let mut in_class = false;

    for ch in pattern.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => {
                current.push(ch);
                escaped = true;
            }
            '[' if !in_class => {
                current.push(ch);
                in_class = true;
            }
            ']' if in_class => {
                current.push(ch);
                in_class = false;
            }
            '(' if !in_class => {
                current.push(ch);
                group_depth += 1;
            }
            ')' if !in_class => {
                current.push(ch);
                group_depth = group_depth.checked_sub(1).ok_or_else(|| {
                    ErrorKind::InvalidPattern
                        .with_message(format!("unbalanced group in pattern `{pattern}`"))
                })?;
            }
            c if c == operator && group_depth == 0 && !in_class => {
                parts.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    if escaped {
        return Err(ErrorKind::InvalidPattern
            .with_message(format!("dangling escape in pattern `{pattern}`")));
    }
    parts.push(current);
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeType;
    use pretty_assertions::assert_eq;

    fn alternative(must: &[&str], must_not: &[&str]) -> PatternAlternative {
        PatternAlternative {
            must_match: must.iter().map(|s| s.to_string()).collect(),
            must_not_match: must_not.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn plain_pattern_is_one_positive_fragment() {
        let parsed = parse_extended_pattern(r"^metrics/loss$").unwrap();
        assert_eq!(
            parsed.alternatives,
            vec![alternative(&["^metrics/loss$"], &[])]
        );
    }

    #[test]
    fn conjunction_and_negation() {
        let parsed = parse_extended_pattern("loss & !val").unwrap();
        assert_eq!(parsed.alternatives, vec![alternative(&["loss"], &["val"])]);
    }

    #[test]
    fn alternatives_split_on_top_level_pipe_only() {
        let parsed = parse_extended_pattern("(a|b)c | d").unwrap();
        assert_eq!(
            parsed.alternatives,
            vec![alternative(&["(a|b)c"], &[]), alternative(&["d"], &[])]
        );
    }

    #[test]
    fn escaped_operators_stay_in_the_fragment() {
        let parsed = parse_extended_pattern(r"a\|b").unwrap();
        assert_eq!(parsed.alternatives, vec![alternative(&[r"a\|b"], &[])]);

        let parsed = parse_extended_pattern(r"[&|]x").unwrap();
        assert_eq!(parsed.alternatives, vec![alternative(&[r"[&|]x"], &[])]);
    }

    #[test]
    fn negation_only_alternative_matches_everything_else() {
        let parsed = parse_extended_pattern("!debug").unwrap();
        assert_eq!(
            parsed.alternatives,
            vec![alternative(&[".*"], &["debug"])]
        );
    }

    #[test]
    fn invalid_fragment_is_a_user_error() {
        assert!(parse_extended_pattern("(").is_err());
        assert!(parse_extended_pattern("a | ").is_err());
        assert!(parse_extended_pattern(r"trailing\").is_err());
        // Backreferences are not part of the supported dialect.
        assert!(parse_extended_pattern(r"(x)\1").is_err());
    }

    #[test]
    fn builds_or_of_and_filters() {
        let attribute = Attribute::new("sys/name").with_type(AttributeType::String);
        let filter = build_extended_regex_filter(attribute, "exp & !tmp | ^base$").unwrap();
        assert_eq!(
            filter.to_query(),
            "((`sys/name`:string MATCHES \"exp\") AND (`sys/name`:string NOT MATCHES \"tmp\")) \
             OR (`sys/name`:string MATCHES \"^base$\")"
        );
    }
}

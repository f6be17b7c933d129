//! gantry-constraints — placement predicates over worker attributes.
//!
//! A constraint is parsed from a tuple `["attribute", "OP", args...]` and
//! evaluated against a candidate attribute value plus the history of values
//! already accepted for the same attribute. Histories give `UNIQUE`,
//! `CLUSTER` and `GROUP_BY` their placement semantics relative to peers of
//! the same application.

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use thiserror::Error;

/// Result type alias for constraint parsing.
pub type ConstraintResult<T> = Result<T, ConstraintError>;

/// Errors produced while parsing constraint tuples.
#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("invalid constraint {0:?}")]
    Invalid(Vec<String>),

    #[error("invalid like: {0}")]
    BadLikePattern(regex::Error),

    #[error("invalid unlike: {0}")]
    BadUnlikePattern(regex::Error),
}

/// A single placement predicate over one attribute.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Value must match the regex.
    Like { raw: String, pattern: Regex },
    /// Value must not match the regex.
    Unlike { raw: String, pattern: Regex },
    /// Value must not appear in the history.
    Unique,
    /// All values must agree: either with the pinned value, or with the
    /// first accepted one.
    Cluster(Option<String>),
    /// Spread values evenly across at least `groups` distinct values.
    GroupBy(usize),
}

impl Constraint {
    /// Parse one constraint from its operator and arguments,
    /// e.g. `["LIKE", "slave[0-9]+"]` or `["GROUP_BY", "2"]`.
    pub fn parse(tuple: &[String]) -> ConstraintResult<Self> {
        let invalid = || ConstraintError::Invalid(tuple.to_vec());
        match tuple.first().map(String::as_str) {
            Some("LIKE") => {
                let raw = tuple.get(1).ok_or_else(invalid)?;
                let pattern = Regex::new(raw).map_err(ConstraintError::BadLikePattern)?;
                Ok(Constraint::Like {
                    raw: raw.clone(),
                    pattern,
                })
            }
            Some("UNLIKE") => {
                let raw = tuple.get(1).ok_or_else(invalid)?;
                let pattern = Regex::new(raw).map_err(ConstraintError::BadUnlikePattern)?;
                Ok(Constraint::Unlike {
                    raw: raw.clone(),
                    pattern,
                })
            }
            Some("UNIQUE") => Ok(Constraint::Unique),
            Some("CLUSTER") => Ok(Constraint::Cluster(tuple.get(1).cloned())),
            Some("GROUP_BY") => match tuple.get(1) {
                None => Ok(Constraint::GroupBy(1)),
                Some(n) => {
                    let groups: usize = n.parse().map_err(|_| invalid())?;
                    Ok(Constraint::GroupBy(groups))
                }
            },
            _ => Err(invalid()),
        }
    }

    /// Evaluate this constraint for `value`, given the `history` of values
    /// already accepted for the same attribute.
    pub fn matches(&self, value: &str, history: &[String]) -> bool {
        match self {
            Constraint::Like { pattern, .. } => pattern.is_match(value),
            Constraint::Unlike { pattern, .. } => !pattern.is_match(value),
            Constraint::Unique => !history.iter().any(|v| v == value),
            Constraint::Cluster(Some(pinned)) => pinned == value,
            Constraint::Cluster(None) => history.is_empty() || history[0] == value,
            Constraint::GroupBy(groups) => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for v in history {
                    *counts.entry(v.as_str()).or_insert(0) += 1;
                }

                if counts.len() < *groups {
                    !counts.contains_key(value)
                } else {
                    let min = counts.values().copied().min().unwrap_or(0);
                    counts.get(value).copied().unwrap_or(0) == min
                }
            }
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Like { raw, .. } => write!(f, "like:{raw}"),
            Constraint::Unlike { raw, .. } => write!(f, "unlike:{raw}"),
            Constraint::Unique => write!(f, "unique"),
            Constraint::Cluster(Some(pinned)) => write!(f, "cluster:{pinned}"),
            Constraint::Cluster(None) => write!(f, "cluster"),
            Constraint::GroupBy(groups) if *groups > 1 => write!(f, "groupBy:{groups}"),
            Constraint::GroupBy(_) => write!(f, "groupBy"),
        }
    }
}

/// Parse raw constraint tuples `[attribute, OP, args...]` into a map of
/// attribute → constraints. An empty input yields an empty map.
pub fn parse_all(raw: &[Vec<String>]) -> ConstraintResult<HashMap<String, Vec<Constraint>>> {
    let mut constraints: HashMap<String, Vec<Constraint>> = HashMap::new();
    for tuple in raw {
        if tuple.is_empty() {
            return Err(ConstraintError::Invalid(tuple.clone()));
        }
        let constraint = Constraint::parse(&tuple[1..])?;
        constraints
            .entry(tuple[0].clone())
            .or_default()
            .push(constraint);
    }

    Ok(constraints)
}

/// Check every constraint of every attribute against an attribute map.
///
/// `history` supplies, per attribute, the values already accepted for
/// sibling placements. Returns `None` when everything matches, or a
/// human-readable decline reason.
pub fn check_attributes<F>(
    constraints: &HashMap<String, Vec<Constraint>>,
    attributes: &HashMap<String, String>,
    history: F,
) -> Option<String>
where
    F: Fn(&str) -> Vec<String>,
{
    for (name, list) in constraints {
        let Some(value) = attributes.get(name) else {
            return Some(format!("no {name}"));
        };
        for constraint in list {
            if !constraint.matches(value, &history(name)) {
                return Some(format!("{name} doesn't match {constraint}"));
            }
        }
    }

    None
}

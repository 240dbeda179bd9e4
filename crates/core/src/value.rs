//! Value type definitions for arbor.
//!
//! This module defines the `Value` enum which carries the result of evaluating
//! an expression, plus the conversions between scalar kinds that do not need
//! access to the tree. Node-set conversions read node values and therefore
//! live next to the evaluator.

use crate::tree::NodeId;
use crate::types::ResultType;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// The result of evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Ordered nodes, duplicates removed
    NodeSet(Vec<NodeId>),
    /// 64-bit floating point number
    Number(f64),
    /// UTF-8 string
    String(String),
    /// Boolean value
    Boolean(bool),
}

impl Value {
    /// Returns the result type of this value.
    pub fn result_type(&self) -> ResultType {
        match self {
            Value::NodeSet(_) => ResultType::NodeSet,
            Value::Number(_) => ResultType::Number,
            Value::String(_) => ResultType::String,
            Value::Boolean(_) => ResultType::Boolean,
        }
    }

    /// Returns the default value of a result type.
    pub fn default_for(result_type: ResultType) -> Self {
        match result_type {
            ResultType::NodeSet => Value::NodeSet(Vec::new()),
            ResultType::Number => Value::Number(0.0),
            ResultType::String => Value::String(String::new()),
            ResultType::Boolean => Value::Boolean(false),
        }
    }

    /// Returns the nodes if this is a NodeSet, None otherwise.
    pub fn as_nodes(&self) -> Option<&[NodeId]> {
        match self {
            Value::NodeSet(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// Returns the number if this is a Number, None otherwise.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string if this is a String, None otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the boolean if this is a Boolean, None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Consumes the value and returns its nodes, or an empty set for scalars.
    pub fn into_nodes(self) -> Vec<NodeId> {
        match self {
            Value::NodeSet(nodes) => nodes,
            _ => Vec::new(),
        }
    }

    /// Compares two values for change detection.
    ///
    /// Unlike `PartialEq`, two NaN numbers are the same value here, so a
    /// NaN result that stays NaN does not produce a notification.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => same_number(*a, *b),
            _ => self == other,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<NodeId>> for Value {
    fn from(nodes: Vec<NodeId>) -> Self {
        Value::NodeSet(nodes)
    }
}

/// Number equality where NaN equals NaN.
#[inline]
pub fn same_number(a: f64, b: f64) -> bool {
    (a.is_nan() && b.is_nan()) || a == b
}

/// Formats a number the way string conversion expects.
///
/// Integral values print without a fraction, NaN prints as `NaN` and the
/// infinities as `Infinity` / `-Infinity`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if libm::trunc(n) == n && libm::fabs(n) < 1e15 {
        return format!("{}", n as i64);
    }
    format!("{}", n)
}

/// Parses a string as a number.
///
/// Accepts optional surrounding whitespace, an optional leading minus and
/// decimal digits with at most one point. Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_point = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_point => seen_point = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Converts a number to a boolean: zero and NaN are false.
#[inline]
pub fn number_to_bool(n: f64) -> bool {
    !(n == 0.0 || n.is_nan())
}

//! Result type definitions for arbor expressions.

/// The kind of value an expression produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultType {
    /// Ordered sequence of tree nodes without duplicates
    NodeSet,
    /// 64-bit floating point number
    Number,
    /// UTF-8 string
    String,
    /// Boolean (true/false)
    Boolean,
}

impl ResultType {
    /// Returns the lowercase name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ResultType::NodeSet => "node-set",
            ResultType::Number => "number",
            ResultType::String => "string",
            ResultType::Boolean => "boolean",
        }
    }

    /// Returns true for the three scalar kinds.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, ResultType::NodeSet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_type_equality() {
        assert_eq!(ResultType::Number, ResultType::Number);
        assert_ne!(ResultType::Number, ResultType::String);
    }

    #[test]
    fn test_is_scalar() {
        assert!(!ResultType::NodeSet.is_scalar());
        assert!(ResultType::Number.is_scalar());
        assert!(ResultType::String.is_scalar());
        assert!(ResultType::Boolean.is_scalar());
        assert_eq!(ResultType::NodeSet.name(), "node-set");
    }
}

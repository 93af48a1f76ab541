use serde::{Deserialize, Serialize};

/// A value held in the secondary index, compared by equality or ordering.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

/// Comparison applied to an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A single `field <op> value` constraint. [`Store::list`] ANDs all filters
/// passed to it.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn matches(&self, fields: &std::collections::HashMap<String, IndexValue>) -> bool {
        let Some(actual) = fields.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => actual == &self.value,
            FilterOp::Ne => actual != &self.value,
            FilterOp::Lt => actual.partial_cmp(&self.value) == Some(std::cmp::Ordering::Less),
            FilterOp::Lte => matches!(
                actual.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            FilterOp::Gt => actual.partial_cmp(&self.value) == Some(std::cmp::Ordering::Greater),
            FilterOp::Gte => matches!(
                actual.partial_cmp(&self.value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn eq_filter_matches_equal_value() {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String("pending".to_string()));

        let f = Filter::eq("status", IndexValue::String("pending".to_string()));
        assert!(f.matches(&fields));

        let f2 = Filter::eq("status", IndexValue::String("active".to_string()));
        assert!(!f2.matches(&fields));
    }

    #[test]
    fn missing_field_never_matches() {
        let fields = HashMap::new();
        let f = Filter::eq("status", IndexValue::String("pending".to_string()));
        assert!(!f.matches(&fields));
    }

    #[test]
    fn ordering_filters_compare_ints() {
        let mut fields = HashMap::new();
        fields.insert("attempts".to_string(), IndexValue::Int(3));

        let gt = Filter {
            field: "attempts".to_string(),
            op: FilterOp::Gt,
            value: IndexValue::Int(2),
        };
        assert!(gt.matches(&fields));

        let lte = Filter {
            field: "attempts".to_string(),
            op: FilterOp::Lte,
            value: IndexValue::Int(3),
        };
        assert!(lte.matches(&fields));
    }
}

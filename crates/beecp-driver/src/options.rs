//! Statement creation options.
//!
//! Two statements prepared from the same SQL text are only interchangeable
//! when they were created with equal options, so [`StatementOptions`] is part
//! of every statement cache key.

/// Scrollability of result sets produced by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResultSetType {
    /// Cursor moves forward only.
    #[default]
    ForwardOnly,
    /// Scrollable, not sensitive to concurrent changes.
    ScrollInsensitive,
    /// Scrollable and sensitive to concurrent changes.
    ScrollSensitive,
}

/// Whether result sets may be updated through the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Concurrency {
    /// Read-only cursor.
    #[default]
    ReadOnly,
    /// Updatable cursor.
    Updatable,
}

/// Generated-key retrieval requested at statement creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum GeneratedKeys {
    /// Do not return generated keys.
    #[default]
    None,
    /// Return all generated keys.
    Return,
    /// Return the named generated columns.
    Columns(Vec<String>),
}

/// Options used when creating a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StatementOptions {
    /// Result set scrollability.
    pub result_set_type: ResultSetType,
    /// Result set concurrency mode.
    pub concurrency: Concurrency,
    /// Generated-key retrieval.
    pub generated_keys: GeneratedKeys,
}

impl StatementOptions {
    /// Default options: forward-only, read-only, no generated keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the result set type.
    #[must_use]
    pub fn result_set_type(mut self, kind: ResultSetType) -> Self {
        self.result_set_type = kind;
        self
    }

    /// Set the concurrency mode.
    #[must_use]
    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set generated-key retrieval.
    #[must_use]
    pub fn generated_keys(mut self, keys: GeneratedKeys) -> Self {
        self.generated_keys = keys;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_equality_covers_every_field() {
        let base = StatementOptions::new();
        assert_eq!(base, StatementOptions::default());
        assert_ne!(
            base,
            base.clone().result_set_type(ResultSetType::ScrollInsensitive)
        );
        assert_ne!(base, base.clone().concurrency(Concurrency::Updatable));
        assert_ne!(base, base.clone().generated_keys(GeneratedKeys::Return));
        assert_ne!(
            base.clone()
                .generated_keys(GeneratedKeys::Columns(vec!["id".into()])),
            base.clone().generated_keys(GeneratedKeys::Return)
        );
    }
}

//! Provider configuration contract and validation helpers.

use std::fmt::Debug;

/// Configuration owned by a single provider.
///
/// Implementations validate themselves into a list of human-readable errors
/// so callers can show every problem at once. Snapshots are taken with
/// `clone()`; providers never hand out references to their live config.
pub trait ProviderConfiguration: Clone + Debug + Send + Sync + 'static {
    /// Every problem with this configuration. Empty means valid.
    fn validate(&self) -> Vec<String>;

    /// Whether [`validate`](Self::validate) reports no problems.
    fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Accumulates validation failures.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: Vec<String>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a free-form error.
    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Require a non-blank string.
    pub fn require_non_empty(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(format!("{} is required", field));
        }
    }

    /// Require `min <= value <= max`. NaN always fails.
    pub fn require_range<T>(&mut self, field: &str, value: T, min: T, max: T)
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if !(value >= min && value <= max) {
            self.push(format!(
                "{} must be between {} and {} (got {})",
                field, min, max, value
            ));
        }
    }

    /// Require a parseable absolute URL whose scheme is one of `schemes`.
    pub fn require_url(&mut self, field: &str, value: &str, schemes: &[&str]) {
        if value.trim().is_empty() {
            self.push(format!("{} is required", field));
            return;
        }
        match url::Url::parse(value) {
            Ok(parsed) => {
                if !schemes.contains(&parsed.scheme()) {
                    self.push(format!(
                        "{} must use one of [{}] (got '{}')",
                        field,
                        schemes.join(", "),
                        parsed.scheme()
                    ));
                }
            }
            Err(e) => self.push(format!("{} is not a valid URL: {}", field, e)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.errors
    }
}

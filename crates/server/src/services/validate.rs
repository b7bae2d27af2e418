//! Parameter validator.
//!
//! A pure, stateless rule engine over untrusted JSON input. Every rule for
//! every field is evaluated in one pass (no fail-fast), so a client gets the
//! complete list of violations at once. No I/O happens here.

use serde_json::Value;

use crate::error::AppError;

/// The JSON type a field is expected to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expected {
    String,
    /// Any JSON number.
    Number,
    /// A JSON number with no fractional part, within `i64` range.
    Integer,
    Boolean,
    Array,
    Object,
}

impl Expected {
    const fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// Validation rules for a single field.
///
/// Length bounds apply to strings (character count) and arrays (element
/// count); numeric bounds apply to numbers. Inapplicable bounds are ignored
/// rather than failing, so one rule set can describe a field loosely typed
/// by the client.
pub struct Rule {
    field: &'static str,
    required: bool,
    expected: Option<Expected>,
    min_length: Option<usize>,
    max_length: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    predicate: Option<(fn(&Value) -> bool, &'static str)>,
}

impl Rule {
    /// A rule for `field` with no constraints yet.
    #[must_use]
    pub const fn new(field: &'static str) -> Self {
        Self {
            field,
            required: false,
            expected: None,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            predicate: None,
        }
    }

    /// The field must be present and non-null.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The field, when present, must carry this JSON type.
    #[must_use]
    pub const fn expect(mut self, expected: Expected) -> Self {
        self.expected = Some(expected);
        self
    }

    /// Minimum length after trimming (strings) or element count (arrays).
    #[must_use]
    pub const fn min_length(mut self, n: usize) -> Self {
        self.min_length = Some(n);
        self
    }

    /// Maximum length after trimming (strings) or element count (arrays).
    #[must_use]
    pub const fn max_length(mut self, n: usize) -> Self {
        self.max_length = Some(n);
        self
    }

    /// Inclusive numeric lower bound.
    #[must_use]
    pub const fn min(mut self, n: f64) -> Self {
        self.min = Some(n);
        self
    }

    /// Inclusive numeric upper bound.
    #[must_use]
    pub const fn max(mut self, n: f64) -> Self {
        self.max = Some(n);
        self
    }

    /// A custom check with its failure message.
    #[must_use]
    pub const fn predicate(mut self, check: fn(&Value) -> bool, message: &'static str) -> Self {
        self.predicate = Some((check, message));
        self
    }

    fn check(&self, input: &Value, errors: &mut Vec<String>) {
        let value = input.get(self.field);

        let Some(value) = value.filter(|v| !v.is_null()) else {
            if self.required {
                errors.push(format!("{} is required", self.field));
            }
            return;
        };

        if let Some(expected) = self.expected
            && !expected.matches(value)
        {
            errors.push(format!("{} must be a {}", self.field, expected.name()));
            // Length/range checks against a mistyped value would only add
            // noise to the error list.
            return;
        }

        let length = match value {
            Value::String(s) => Some(s.trim().chars().count()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        };
        if let Some(length) = length {
            if let Some(min) = self.min_length
                && length < min
            {
                errors.push(format!(
                    "{} must have at least {min} {}",
                    self.field,
                    if value.is_array() { "entries" } else { "characters" }
                ));
            }
            if let Some(max) = self.max_length
                && length > max
            {
                errors.push(format!(
                    "{} must have at most {max} {}",
                    self.field,
                    if value.is_array() { "entries" } else { "characters" }
                ));
            }
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min
                && number < min
            {
                errors.push(format!("{} must be at least {min}", self.field));
            }
            if let Some(max) = self.max
                && number > max
            {
                errors.push(format!("{} must be at most {max}", self.field));
            }
        }

        if let Some((check, message)) = self.predicate
            && !check(value)
        {
            errors.push(format!("{}: {message}", self.field));
        }
    }
}

/// Outcome of a validation pass.
#[derive(Debug)]
pub struct Report {
    /// Every violation found, in rule order.
    pub errors: Vec<String>,
}

impl Report {
    /// Whether the input passed every rule.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert into a [`AppError::Validation`] carrying all messages.
    ///
    /// # Errors
    ///
    /// Returns the accumulated violations if any rule failed.
    pub fn into_result(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self.errors))
        }
    }
}

/// Evaluate every rule against `input`.
///
/// Rules are checked independently; a failure in one field never suppresses
/// checks on another.
#[must_use]
pub fn validate(input: &Value, rules: &[Rule]) -> Report {
    let mut errors = Vec::new();
    for rule in rules {
        rule.check(input, &mut errors);
    }
    Report { errors }
}

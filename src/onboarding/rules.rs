//! 校验规则表 (Validation Rule Table)
//!
//! Rules are evaluated against the JSON form of a step's patch, so field names
//! are the camelCase wire names.

use super::Step;
use serde_json::{Map, Value};

pub const REQUIRED_FIELDS_MESSAGE: &str = "Please fill in all required fields before proceeding.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Present, not null, not an empty string or array.
    Required,
    /// Character count, only checked when present.
    MaxChars(usize),
    /// Inclusive numeric range, only checked when present.
    Between(u64, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub step: Step,
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
}

const fn required(step: Step, field: &'static str) -> Rule {
    Rule {
        step,
        field,
        check: Check::Required,
        message: REQUIRED_FIELDS_MESSAGE,
    }
}

/// Applied under every policy.
pub const RANGE_RULES: &[Rule] = &[
    Rule {
        step: Step::Academic,
        field: "yearOfStudy",
        check: Check::Between(1, 5),
        message: "Year of study must be between 1 and 5",
    },
    Rule {
        step: Step::Academic,
        field: "semester",
        check: Check::Between(1, 2),
        message: "Semester must be 1 or 2",
    },
    Rule {
        step: Step::Details,
        field: "bio",
        check: Check::MaxChars(1000),
        message: "Bio must be at most 1000 characters",
    },
];

pub const LENIENT_RULES: &[Rule] = &[
    required(Step::Personal, "firstName"),
    required(Step::Personal, "lastName"),
];

pub const STRICT_RULES: &[Rule] = &[
    required(Step::Personal, "firstName"),
    required(Step::Personal, "lastName"),
    required(Step::Personal, "dateOfBirth"),
    required(Step::Personal, "gender"),
    required(Step::Academic, "faculty"),
    required(Step::Academic, "yearOfStudy"),
    required(Step::Details, "bio"),
    required(Step::Details, "interests"),
    required(Step::Details, "lookingFor"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub check: Check,
    pub message: &'static str,
}

/// Evaluates the rules of `step` against one step's data.
pub fn evaluate<'a>(
    rules: impl IntoIterator<Item = &'a Rule>,
    step: Step,
    data: &Map<String, Value>,
) -> Vec<Violation> {
    rules
        .into_iter()
        .filter(|rule| rule.step == step)
        .filter(|rule| !passes(rule.check, data.get(rule.field)))
        .map(|rule| Violation {
            field: rule.field,
            check: rule.check,
            message: rule.message,
        })
        .collect()
}

fn passes(check: Check, value: Option<&Value>) -> bool {
    match check {
        Check::Required => match value {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
        },
        Check::MaxChars(max) => match value.and_then(Value::as_str) {
            Some(s) => s.chars().count() <= max,
            None => true,
        },
        Check::Between(min, max) => match value.and_then(Value::as_u64) {
            Some(n) => (min..=max).contains(&n),
            // 非数字的值同样视为越界
            None => value.is_none_or(Value::is_null),
        },
    }
}

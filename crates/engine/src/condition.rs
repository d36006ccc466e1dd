//! Constrained condition grammar used by `IF`, `ELIF`, and `WHILE` markers.
//!
//! The grammar is a single comparison `operand OP operand` (`==`, `!=`, `<`, `<=`, `>`,
//! `>=`), or one bare operand that must be a boolean literal or a check token. The operator
//! is located in the raw text; operands are substituted afterwards, so a variable that
//! renders empty compares as `""` and operator characters inside values never split the
//! expression. Operands may be quoted with `'` or `"`; quoted
//! operands are always text. The reserved tokens `check_passed` and `check_failed`
//! resolve from the most recent check-style action and are both `false` before any check
//! ran. Two operands that both parse as finite numbers compare numerically; anything else
//! compares as strings.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

const CHECK_PASSED_TOKEN: &str = "check_passed";
const CHECK_FAILED_TOKEN: &str = "check_failed";

/// Outcome of the most recent check-style action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub passed: bool,
    pub action_index: usize,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl Comparison {
    // Two-character operators first so `<=` is not read as `<`.
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("==", Comparison::Equal),
        ("!=", Comparison::NotEqual),
        ("<=", Comparison::LessOrEqual),
        (">=", Comparison::GreaterOrEqual),
        ("<", Comparison::LessThan),
        (">", Comparison::GreaterThan),
    ];

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering == Ordering::Equal,
            Self::NotEqual => ordering != Ordering::Equal,
            Self::LessThan => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::GreaterThan => ordering == Ordering::Greater,
            Self::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

/// Evaluates a condition whose operands contain no variable references.
///
/// Returns [`EngineError::ConditionEvaluation`] for malformed input; callers treat that as
/// `false` and record the error.
pub fn evaluate_condition(expression: &str, last_check: Option<&CheckResult>) -> Result<bool, EngineError> {
    evaluate_condition_with(expression, last_check, str::to_string)
}

/// Evaluates `expression`, passing each operand through `substitute` once the operator has
/// been located.
pub fn evaluate_condition_with<F>(
    expression: &str,
    last_check: Option<&CheckResult>,
    substitute: F,
) -> Result<bool, EngineError>
where
    F: Fn(&str) -> String,
{
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(EngineError::condition(expression, "condition is empty"));
    }

    let Some((position, symbol, comparison)) = find_operator(trimmed) else {
        let resolved = substitute(trimmed);
        let resolved = resolved.trim();
        return evaluate_bare_operand(resolved, last_check)
            .ok_or_else(|| EngineError::condition(expression, format!("'{resolved}' is not a boolean or a comparison")));
    };

    let left = trimmed[..position].trim();
    let right = trimmed[position + symbol.len()..].trim();
    if left.is_empty() {
        return Err(EngineError::condition(expression, format!("missing left operand for '{symbol}'")));
    }
    if right.is_empty() {
        return Err(EngineError::condition(expression, format!("missing right operand for '{symbol}'")));
    }
    if find_operator(right).is_some() {
        return Err(EngineError::condition(expression, "only a single comparison is supported"));
    }

    let left =
        resolve_operand(left, last_check, &substitute).map_err(|reason| EngineError::condition(expression, reason))?;
    let right =
        resolve_operand(right, last_check, &substitute).map_err(|reason| EngineError::condition(expression, reason))?;
    Ok(comparison.holds(compare_operands(&left, &right)))
}

fn evaluate_bare_operand(operand: &str, last_check: Option<&CheckResult>) -> Option<bool> {
    if operand.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if operand.eq_ignore_ascii_case("false") {
        return Some(false);
    }
    check_token(operand, last_check)
}

fn check_token(operand: &str, last_check: Option<&CheckResult>) -> Option<bool> {
    match operand {
        CHECK_PASSED_TOKEN => Some(last_check.is_some_and(|check| check.passed)),
        CHECK_FAILED_TOKEN => Some(last_check.is_some_and(|check| !check.passed)),
        _ => None,
    }
}

#[derive(Debug)]
enum Operand {
    Quoted(String),
    Bare(String),
}

impl Operand {
    fn text(&self) -> &str {
        match self {
            Self::Quoted(text) | Self::Bare(text) => text,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Quoted(_) => None,
            Self::Bare(text) => text.parse::<f64>().ok().filter(|number| number.is_finite()),
        }
    }
}

fn resolve_operand<F>(raw: &str, last_check: Option<&CheckResult>, substitute: &F) -> Result<Operand, String>
where
    F: Fn(&str) -> String,
{
    if let Some(quote) = raw.chars().next().filter(|character| matches!(character, '\'' | '"')) {
        let inner = &raw[1..];
        return match inner.strip_suffix(quote) {
            Some(literal) if !literal.contains(quote) => Ok(Operand::Quoted(substitute(literal))),
            _ => Err(format!("unterminated quoted operand {raw}")),
        };
    }
    if let Some(flag) = check_token(raw, last_check) {
        return Ok(Operand::Bare(flag.to_string()));
    }
    Ok(Operand::Bare(substitute(raw).trim().to_string()))
}

fn compare_operands(left: &Operand, right: &Operand) -> Ordering {
    if let (Some(left_number), Some(right_number)) = (left.as_number(), right.as_number()) {
        return left_number.partial_cmp(&right_number).unwrap_or(Ordering::Equal);
    }
    left.text().cmp(right.text())
}

/// Finds the first comparison operator outside quotes.
fn find_operator(expression: &str) -> Option<(usize, &'static str, Comparison)> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            _ => {}
        }
        if in_single_quote || in_double_quote {
            continue;
        }
        let rest = &expression[index..];
        if let Some((symbol, comparison)) = Comparison::OPERATORS
            .iter()
            .find(|(symbol, _)| rest.starts_with(symbol))
        {
            return Some((index, *symbol, *comparison));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(passed: bool) -> CheckResult {
        CheckResult {
            passed,
            action_index: 0,
            detail: None,
        }
    }

    #[test]
    fn numeric_comparisons() {
        assert!(evaluate_condition("1 < 3", None).unwrap());
        assert!(evaluate_condition("10 > 9", None).unwrap());
        assert!(evaluate_condition("3 <= 3", None).unwrap());
        assert!(evaluate_condition("2.5 >= 2", None).unwrap());
        assert!(evaluate_condition("3 == 3.0", None).unwrap());
        assert!(!evaluate_condition("3 != 3", None).unwrap());
    }

    #[test]
    fn non_numeric_operands_compare_lexicographically() {
        assert!(evaluate_condition("abc < abd", None).unwrap());
        // "10" vs "9" as quoted strings compares as text.
        assert!(evaluate_condition("'10' < '9'", None).unwrap());
        assert!(evaluate_condition("'hello world' == \"hello world\"", None).unwrap());
        assert!(evaluate_condition("home != login", None).unwrap());
    }

    #[test]
    fn quoted_operands_may_contain_operators() {
        assert!(evaluate_condition("'a<b' == 'a<b'", None).unwrap());
        assert!(evaluate_condition("\"x == y\" != 'z'", None).unwrap());
    }

    #[test]
    fn boolean_literals_and_check_tokens() {
        assert!(evaluate_condition("true", None).unwrap());
        assert!(!evaluate_condition(" FALSE ", None).unwrap());

        assert!(!evaluate_condition("check_passed", None).unwrap());
        assert!(!evaluate_condition("check_failed", None).unwrap());

        assert!(evaluate_condition("check_passed", Some(&check(true))).unwrap());
        assert!(!evaluate_condition("check_failed", Some(&check(true))).unwrap());
        assert!(evaluate_condition("check_failed", Some(&check(false))).unwrap());
        assert!(evaluate_condition("check_passed == false", Some(&check(false))).unwrap());
    }

    fn fake_substitute(text: &str) -> String {
        text.replace("${empty}", "")
            .replace("${url}", "https://example.com/?a<b&c!=d")
            .replace("${flag}", "true")
    }

    #[test]
    fn empty_substitution_compares_as_empty_string() {
        assert!(evaluate_condition_with("${empty} == ''", None, fake_substitute).unwrap());
        assert!(evaluate_condition_with("${empty} != done", None, fake_substitute).unwrap());
        assert!(evaluate_condition_with("'${empty}' == \"\"", None, fake_substitute).unwrap());
        assert!(!evaluate_condition_with("${empty} == done", None, fake_substitute).unwrap());
    }

    #[test]
    fn operator_characters_in_values_do_not_split_the_expression() {
        assert!(evaluate_condition_with("${url} != ''", None, fake_substitute).unwrap());
        assert!(evaluate_condition_with("'${url}' == 'https://example.com/?a<b&c!=d'", None, fake_substitute).unwrap());
        assert!(evaluate_condition_with("${flag}", None, fake_substitute).unwrap());
    }

    #[test]
    fn malformed_conditions_are_errors() {
        for expression in ["", "   ", "< 3", "3 <", "1 < 2 < 3", "maybe", "'open == 'x'"] {
            let error = evaluate_condition(expression, None).expect_err(expression);
            assert!(
                matches!(error, EngineError::ConditionEvaluation { .. }),
                "unexpected error for {expression:?}: {error:?}"
            );
        }
    }
}

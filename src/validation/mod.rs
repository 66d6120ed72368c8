use bigdecimal::BigDecimal;
use std::fmt;

pub const AMOUNT_MAX_SCALE: i64 = 2;
pub const DESCRIPTION_MAX_LEN: usize = 255;
pub const ACCOUNT_NUMBER_MAX_LEN: usize = 34;
pub const SESSION_ID_MAX_LEN: usize = 128;
pub const ORDER_ID_MAX_LEN: usize = 128;
pub const MERCHANT_NAME_MAX_LEN: usize = 255;
pub const MERCHANT_URL_MAX_LEN: usize = 2048;

/// Largest amount a `NUMERIC(18,2)` column holds.
const AMOUNT_UPPER_BOUND: i64 = 10_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Money amounts: strictly positive, whole cents, within column range.
pub fn validate_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    if amount.with_scale(AMOUNT_MAX_SCALE) != *amount {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", AMOUNT_MAX_SCALE),
        ));
    }

    if amount >= &BigDecimal::from(AMOUNT_UPPER_BOUND) {
        return Err(ValidationError::new("amount", "is too large"));
    }

    Ok(())
}

/// Returns the cleaned description. Empty is allowed.
pub fn clean_description(description: &str) -> Result<String, ValidationError> {
    let description = sanitize_string(description);
    validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;
    Ok(description)
}

pub fn validate_account_number(account_number: &str) -> ValidationResult {
    validate_required("account_number", account_number)?;
    validate_max_len("account_number", account_number, ACCOUNT_NUMBER_MAX_LEN)?;

    if !account_number.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            "account_number",
            "must contain only letters and digits",
        ));
    }

    Ok(())
}

pub fn validate_session_id(session_id: &str) -> ValidationResult {
    validate_required("session_id", session_id)?;
    validate_max_len("session_id", session_id, SESSION_ID_MAX_LEN)?;

    if session_id.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(ValidationError::new(
            "session_id",
            "must not contain whitespace",
        ));
    }

    Ok(())
}

pub fn validate_order_id(order_id: &str) -> ValidationResult {
    validate_required("order_id", order_id)?;
    validate_max_len("order_id", order_id, ORDER_ID_MAX_LEN)
}

pub fn validate_merchant(name: &str, url: &str) -> ValidationResult {
    validate_required("merchant_name", name)?;
    validate_max_len("merchant_name", name, MERCHANT_NAME_MAX_LEN)?;
    validate_required("merchant_url", url)?;
    validate_max_len("merchant_url", url, MERCHANT_URL_MAX_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).expect("valid decimal")
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_max_len() {
        assert!(validate_max_len("field", "abc", 3).is_ok());
        assert!(validate_max_len("field", "abcd", 3).is_err());
    }

    #[test]
    fn sanitizes_string() {
        assert_eq!(sanitize_string("  hello\tworld  "), "hello world");
        assert_eq!(sanitize_string("single"), "single");
        assert_eq!(sanitize_string(" \n "), "");
        assert_eq!(sanitize_string("ab\u{0000}cd\u{0007}"), "abcd");
    }

    #[test]
    fn validates_amount() {
        assert!(validate_amount(&dec("1.23")).is_ok());
        assert!(validate_amount(&dec("1500")).is_ok());
        assert!(validate_amount(&dec("0.10")).is_ok());
        assert!(validate_amount(&dec("0")).is_err());
        assert!(validate_amount(&dec("-1")).is_err());
        assert!(validate_amount(&dec("1.234")).is_err());
        assert!(validate_amount(&dec("10000000000000000")).is_err());
    }

    #[test]
    fn cleans_description() {
        assert_eq!(clean_description("  coffee \n beans ").unwrap(), "coffee beans");
        assert_eq!(clean_description("").unwrap(), "");
        assert!(clean_description(&"x".repeat(256)).is_err());
    }

    #[test]
    fn validates_account_number() {
        assert!(validate_account_number("12345678").is_ok());
        assert!(validate_account_number("").is_err());
        assert!(validate_account_number("1234-5678").is_err());
    }

    #[test]
    fn validates_session_id() {
        assert!(validate_session_id("PAY_1700000000_abc").is_ok());
        assert!(validate_session_id("PAY 1").is_err());
        assert!(validate_session_id(&"S".repeat(129)).is_err());
    }

    #[test]
    fn validates_merchant() {
        assert!(validate_merchant("Shop", "https://shop.example.com").is_ok());
        assert!(validate_merchant("", "https://shop.example.com").is_err());
        assert!(validate_merchant("Shop", " ").is_err());
    }
}

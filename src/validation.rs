// Form-level input checks for login, registration and transfers

use once_cell::sync::Lazy;
use regex::Regex;

pub const MIN_PASSWORD_LENGTH: usize = 8;

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static SPECIAL_CHARS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

/// Per-rule outcome of a password strength check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasswordCheck {
    pub too_short: bool,
    pub missing_uppercase: bool,
    pub missing_lowercase: bool,
    pub missing_digit: bool,
    pub missing_special: bool,
}

impl PasswordCheck {
    pub fn is_valid(&self) -> bool {
        *self == PasswordCheck::default()
    }

    /// Human-readable list of the failed rules
    pub fn problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        if self.too_short {
            problems.push("at least 8 characters");
        }
        if self.missing_uppercase {
            problems.push("an uppercase letter");
        }
        if self.missing_lowercase {
            problems.push("a lowercase letter");
        }
        if self.missing_digit {
            problems.push("a number");
        }
        if self.missing_special {
            problems.push("a special character");
        }
        problems
    }
}

pub fn validate_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

pub fn validate_password(password: &str) -> PasswordCheck {
    PasswordCheck {
        too_short: password.chars().count() < MIN_PASSWORD_LENGTH,
        missing_uppercase: !password.chars().any(|c| c.is_ascii_uppercase()),
        missing_lowercase: !password.chars().any(|c| c.is_ascii_lowercase()),
        missing_digit: !password.chars().any(|c| c.is_ascii_digit()),
        missing_special: !password.chars().any(|c| SPECIAL_CHARS.contains(c)),
    }
}

/// Check a transfer form: recipient address and a positive, finite amount
pub fn validate_transfer(recipient_email: &str, amount: f64) -> Result<(), String> {
    if !validate_email(recipient_email) {
        return Err(format!("Invalid recipient email: {}", recipient_email));
    }
    if !amount.is_finite() || amount <= 0.0 {
        return Err(format!("Amount must be greater than zero, got {}", amount));
    }
    Ok(())
}

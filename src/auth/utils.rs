//! Small helpers for identity normalization, request parsing and log masking.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use regex::Regex;

/// Normalize an email for lookup and rate-limit keys.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

const PASSWORD_SPECIALS: &str = "@$!%*?&";

/// 6 to 20 characters from letters, digits and `@$!%*?&`, with at least one
/// of each: lowercase, uppercase, digit, special.
#[must_use]
pub fn valid_password(secret: &str) -> bool {
    let length = secret.chars().count();
    let allowed = secret
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || PASSWORD_SPECIALS.contains(c));
    (6..=20).contains(&length)
        && allowed
        && secret.chars().any(|c| c.is_ascii_lowercase())
        && secret.chars().any(|c| c.is_ascii_uppercase())
        && secret.chars().any(|c| c.is_ascii_digit())
        && secret.chars().any(|c| PASSWORD_SPECIALS.contains(c))
}

/// Display names are 2 to 50 characters after trimming.
#[must_use]
pub fn valid_display_name(name: &str) -> bool {
    (2..=50).contains(&name.trim().chars().count())
}

/// Normalize a mobile number to `010-1234-5678` form.
///
/// Accepts the dashed form or 10 to 11 bare digits; anything else is `None`.
#[must_use]
pub fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone
        .trim()
        .chars()
        .filter(|c| *c != '-' && *c != ' ')
        .collect();
    let valid = Regex::new(r"^01[0-9][0-9]{7,8}$").is_ok_and(|regex| regex.is_match(&digits));
    if !valid {
        return None;
    }
    let (head, rest) = digits.split_at(3);
    let (middle, tail) = rest.split_at(rest.len() - 4);
    Some(format!("{head}-{middle}-{tail}"))
}

/// Extract a client IP for rate limiting from common proxy headers.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// `alice@example.com` → `a***@example.com`
#[must_use]
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{first}***@{domain}")
        }
        _ => "***".to_string(),
    }
}

/// `1.2.3.4` → `1.2.***.***`; anything that is not dotted IPv4 is fully masked.
#[must_use]
pub fn mask_ip(ip: &str) -> String {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() == 4 {
        format!("{}.{}.***.***", parts[0], parts[1])
    } else {
        "***".to_string()
    }
}

/// Keeps only the last three characters.
#[must_use]
pub fn mask_user_id(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() <= 3 {
        return "***".to_string();
    }
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("***{tail}")
}

/// Keeps the first ten and last four characters.
#[must_use]
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 14 {
        return "***".to_string();
    }
    let head: String = chars[..10].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}

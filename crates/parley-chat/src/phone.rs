//! Phone number and chat address (JID) helpers.

use std::sync::LazyLock;

use regex::Regex;

/// Venezuelan mobile prefixes accepted without a country code.
const VE_MOBILE_PREFIXES: [&str; 6] = ["412", "414", "416", "422", "424", "426"];

static USER_JID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{11,}@c\.us$").expect("valid user JID regex"));

fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Turn a phone number in any common format into a JID.
///
/// Values already containing `@` pass through unchanged. Returns `None`
/// when there are no digits.
pub fn ensure_jid(target: &str) -> Option<String> {
    let s = target.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('@') {
        return Some(s.to_string());
    }
    let digits = digits_only(s);
    if digits.is_empty() {
        None
    } else {
        Some(format!("{}@c.us", digits))
    }
}

/// `584241234567@c.us` → `+584241234567`.
pub fn jid_to_display(jid_or_phone: &str) -> String {
    let local = jid_or_phone.split('@').next().unwrap_or_default();
    let digits = digits_only(local);
    if digits.is_empty() {
        String::new()
    } else {
        format!("+{}", digits)
    }
}

/// Normalize configured agent entries into JIDs.
///
/// Each entry may itself hold several numbers separated by commas or
/// whitespace.
pub fn parse_agents<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| {
            entry
                .as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter_map(ensure_jid)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Like [`ensure_jid`], with local Venezuelan formats expanded.
///
/// A leading `0` is replaced by `58`, and a bare 10-digit mobile number
/// gets `58` prepended. Anything shorter than 11 digits afterwards is
/// rejected.
pub fn ensure_jid_with_ve_fallback(input: &str) -> Option<String> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s.contains('@') {
        return Some(s.to_string());
    }

    let mut digits = digits_only(s);
    if digits.is_empty() {
        return None;
    }

    if let Some(rest) = digits.strip_prefix('0') {
        digits = format!("58{}", rest);
    } else if digits.len() == 10 && VE_MOBILE_PREFIXES.contains(&&digits[..3]) {
        digits = format!("58{}", digits);
    }

    if digits.len() < 11 {
        return None;
    }
    Some(format!("{}@c.us", digits))
}

/// Whether `jid` is a personal chat address with a full phone number.
pub fn is_user_jid(jid: &str) -> bool {
    USER_JID_RE.is_match(jid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_jid() {
        assert_eq!(ensure_jid("573249208565").as_deref(), Some("573249208565@c.us"));
        assert_eq!(
            ensure_jid("+57 324 920 8565").as_deref(),
            Some("573249208565@c.us")
        );
        assert_eq!(
            ensure_jid("573249208565@c.us").as_deref(),
            Some("573249208565@c.us")
        );
        assert_eq!(ensure_jid("  "), None);
        assert_eq!(ensure_jid("abc"), None);
    }

    #[test]
    fn test_jid_to_display() {
        assert_eq!(jid_to_display("573249208565@c.us"), "+573249208565");
        assert_eq!(jid_to_display("573249208565"), "+573249208565");
        assert_eq!(jid_to_display(""), "");
        assert_eq!(jid_to_display("@c.us"), "");
    }

    #[test]
    fn test_parse_agents() {
        let agents = parse_agents(&["584241111111, 584142222222", "+584123333333", ""]);
        assert_eq!(
            agents,
            vec![
                "584241111111@c.us",
                "584142222222@c.us",
                "584123333333@c.us",
            ]
        );
    }

    #[test]
    fn test_parse_agents_keeps_jids() {
        let agents = parse_agents(&["584241111111@c.us 584142222222"]);
        assert_eq!(agents, vec!["584241111111@c.us", "584142222222@c.us"]);
    }

    #[test]
    fn test_ve_fallback_leading_zero() {
        assert_eq!(
            ensure_jid_with_ve_fallback("04241234567").as_deref(),
            Some("584241234567@c.us")
        );
        assert_eq!(
            ensure_jid_with_ve_fallback("0424-123.45.67").as_deref(),
            Some("584241234567@c.us")
        );
    }

    #[test]
    fn test_ve_fallback_bare_mobile() {
        assert_eq!(
            ensure_jid_with_ve_fallback("4141234567").as_deref(),
            Some("584141234567@c.us")
        );
        // Ten digits without a VE mobile prefix stay too short.
        assert_eq!(ensure_jid_with_ve_fallback("3001234567"), None);
    }

    #[test]
    fn test_ve_fallback_international_and_jid() {
        assert_eq!(
            ensure_jid_with_ve_fallback("+58 424 1234567").as_deref(),
            Some("584241234567@c.us")
        );
        assert_eq!(
            ensure_jid_with_ve_fallback("573249208565").as_deref(),
            Some("573249208565@c.us")
        );
        assert_eq!(
            ensure_jid_with_ve_fallback("x@c.us").as_deref(),
            Some("x@c.us")
        );
        assert_eq!(ensure_jid_with_ve_fallback("12345"), None);
        assert_eq!(ensure_jid_with_ve_fallback(""), None);
    }

    #[test]
    fn test_is_user_jid() {
        assert!(is_user_jid("584241234567@c.us"));
        assert!(!is_user_jid("5842412@c.us"));
        assert!(!is_user_jid("x@c.us"));
        assert!(!is_user_jid("120363041234567890@g.us"));
    }
}

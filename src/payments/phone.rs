//! Phone number canonicalisation for M-Pesa MSISDNs.

/// Kenyan country calling code.
pub const COUNTRY_CODE: &str = "254";

/// Converts the common Kenyan phone formats to `254XXXXXXXXX`.
///
/// Non-digit characters are stripped first. Inputs that do not look like a
/// Kenyan number are returned as the bare digit string; the provider rejects
/// malformed numbers itself.
pub fn normalize_phone_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.len() {
        10 if digits.starts_with('0') => format!("{}{}", COUNTRY_CODE, &digits[1..]),
        9 => format!("{}{}", COUNTRY_CODE, digits),
        _ => digits,
    }
}

/// True when `phone` is already in canonical `254XXXXXXXXX` form.
pub fn is_canonical(phone: &str) -> bool {
    phone.len() == 12 && phone.starts_with(COUNTRY_CODE) && phone.chars().all(|c| c.is_ascii_digit())
}

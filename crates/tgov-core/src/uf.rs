//! Brazilian federative unit codes.

/// The 27 two-letter UF codes.
pub const UF_CODES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR",
    "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

pub fn is_valid_uf(code: &str) -> bool {
    UF_CODES.contains(&code)
}

/// Trim and uppercase a UF candidate, returning it only when valid.
pub fn normalize_uf(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_ascii_uppercase();
    if cleaned.is_empty() {
        return None;
    }
    is_valid_uf(&cleaned).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercase_input_is_normalized() {
        assert_eq!(normalize_uf(" ce "), Some("CE".to_string()));
        assert_eq!(normalize_uf("sp"), Some("SP".to_string()));
    }

    #[test]
    fn invalid_codes_are_rejected() {
        assert_eq!(normalize_uf("XX"), None);
        assert_eq!(normalize_uf("Ceará"), None);
    }

    #[test]
    fn blank_is_not_an_error() {
        assert_eq!(normalize_uf(""), None);
        assert_eq!(normalize_uf("   "), None);
    }
}

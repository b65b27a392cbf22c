//! OSC classification from the IBGE CONCLA natureza jurídica code.

/// Whether a natureza jurídica code (`NNN-N`, sometimes observed without
/// the check-digit suffix) denotes an Organização da Sociedade Civil.
///
/// Codes in the `3xx` range are private non-profits; `1xx` codes are
/// government bodies and never OSC. Unknown or empty codes classify as
/// `false`.
pub fn is_osc(natureza_juridica: Option<&str>) -> bool {
    let Some(code) = natureza_juridica else {
        return false;
    };
    let code = code.trim();
    if code.starts_with('1') {
        return false;
    }
    code.starts_with('3')
}

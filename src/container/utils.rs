/// Checks whether the given bytes form a valid container name.
///
/// The first byte must be an ASCII letter or digit, every following byte an ASCII letter,
/// digit, `_`, `.` or `-`. An empty slice is not a valid name.
pub(super) fn is_valid_name(src: &[u8]) -> bool {
    match src.split_first() {
        Some((first, rest)) => {
            first.is_ascii_alphanumeric()
                && rest
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
        }
        None => false,
    }
}

/// Checks whether all bytes in the given slice are ASCII letters or digits.
pub(super) fn is_alpha_numeric(src: &[u8]) -> bool {
    src.iter().all(|b| b.is_ascii_alphanumeric())
}

/// Turns a display name into a single, filesystem-safe path component.
///
/// Surrounding whitespace is trimmed, percent-encoding is decoded and path
/// separators are replaced with `-`. Names that would still resolve to
/// something other than a normal component (empty, `.` or `..`) become `_`.
pub fn sanitize_name(name: &str) -> String {
    let trimmed = name.trim();
    let decoded = match urlencoding::decode(trimmed) {
        Ok(decoded) => decoded.into_owned(),
        // Not valid UTF-8 once decoded; keep what we were given.
        Err(_) => trimmed.to_string(),
    };
    let replaced: String =
        decoded.trim().chars().map(|c| if matches!(c, '/' | '\\' | '\0') { '-' } else { c }).collect();
    match replaced.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => replaced,
    }
}

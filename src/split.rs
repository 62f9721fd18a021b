//! Splitting of `field:field[:field]` directive values.

/// Splits `spec` at its first `:`.
///
/// Returns the part before the colon and, if a colon was present, the part
/// after it. `"a:b:c"` yields `("a", Some("b:c"))`, `"a"` yields
/// `("a", None)`.
pub fn split_colon(spec: &str) -> (&str, Option<&str>) {
    match spec.split_once(':') {
        Some((left, right)) => (left, Some(right)),
        None => (spec, None),
    }
}

/// Splits up to three colon-separated fields out of `spec`.
///
/// Anything after a third colon stays part of the third field. Empty
/// second and third fields are reported as absent.
pub fn split_triple(spec: &str) -> (&str, Option<&str>, Option<&str>) {
    let (first, rest) = split_colon(spec);
    let Some(rest) = rest else {
        return (first, None, None);
    };
    let (second, third) = split_colon(rest);
    (first, non_empty(second), third.and_then(non_empty))
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

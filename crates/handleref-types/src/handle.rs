//! Reference tags: `<tag><id>` handles such as `org12`.

use crate::HandleError;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref REF_PATTERN: Regex = Regex::new(r"^(?P<tag>[a-zA-Z]+)[\s-]*(?P<id>[0-9]+)$")
        .expect("reference tag pattern compiles");
}

/// Build the handle for `tag` and `id`. Fails when the id is unset or zero.
pub fn format_handle(tag: &str, id: Option<i64>) -> Result<String, HandleError> {
    match id {
        Some(id) if id != 0 => Ok(format!("{}{}", tag, id)),
        _ => Err(HandleError::IdNotSet),
    }
}

/// Split a handle into `(lowercase tag, id)`.
///
/// Accepts ASCII letters, an optional whitespace/hyphen separator, then ASCII
/// digits: `org12`, `Org 12` and `org-12` all give `("org", 12)`.
pub fn split_ref(s: &str) -> Result<(String, i64), HandleError> {
    let caps = REF_PATTERN
        .captures(s)
        .ok_or_else(|| HandleError::InvalidFormat(s.to_string()))?;
    let id = caps["id"]
        .parse::<i64>()
        .map_err(|_| HandleError::InvalidFormat(s.to_string()))?;
    Ok((caps["tag"].to_lowercase(), id))
}

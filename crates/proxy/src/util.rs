use ens_domain::error::Error;

/// Map a reqwest error onto the shared taxonomy.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Whether a model name belongs to the o-series reasoning family, which
/// takes `max_completion_tokens` instead of `max_tokens`.
pub(crate) fn is_o_series(model: &str) -> bool {
    let mut chars = model.chars();
    matches!(chars.next(), Some('o'))
        && matches!(chars.next(), Some(c) if c.is_ascii_digit())
}

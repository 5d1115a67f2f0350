//! URL normalisation shared by discovery, extraction and storage keys.

use url::Url;

/// Normalizes a detail or company URL so equal items compare equal.
///
/// Drops the query string and fragment, trailing slashes, and at most one
/// of `alias_suffixes` (e.g. `/life`) when it is the last path segment and
/// at least two segments remain. Returns `None` for anything that is not an
/// absolute http(s) URL.
pub fn canonicalize(raw: &str, alias_suffixes: &[String]) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    let path = strip_alias(&path, alias_suffixes).unwrap_or(path);
    url.set_path(&path);

    Some(url.as_str().trim_end_matches('/').to_string())
}

/// `/company/acme/life` becomes `/company/acme`; `/company/life` is a slug.
fn strip_alias(path: &str, alias_suffixes: &[String]) -> Option<String> {
    alias_suffixes
        .iter()
        .map(|suffix| suffix.trim_matches('/'))
        .filter(|suffix| !suffix.is_empty())
        .find_map(|suffix| {
            let rest = path.strip_suffix(suffix)?.strip_suffix('/')?;
            let segments = rest.split('/').filter(|s| !s.is_empty()).count();
            (segments >= 2).then(|| rest.trim_end_matches('/').to_string())
        })
}

/// Builds a search listing URL from optional keywords and location.
pub fn build_search_url(
    base: &str,
    keywords: Option<&str>,
    location: Option<&str>,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?;
    let params: Vec<(&str, &str)> = [("keywords", keywords), ("location", location)]
        .into_iter()
        .filter_map(|(key, value)| {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (key, v))
        })
        .collect();

    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url.into())
}

//! Resolution of import references against the importing manifest's URI

use url::Url;

/// Resolve `reference` relative to `base`.
///
/// - absolute URLs are returned normalized
/// - with a URL `base` the reference is joined with URL semantics
/// - otherwise both are `/`-separated paths: a leading `/` is absolute,
///   anything else is relative to the directory of `base`
///
/// Returns `None` for a blank reference.
pub fn resolve_uri(reference: &str, base: Option<&str>) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(reference) {
        if is_scheme_url(reference) {
            return Some(url.to_string());
        }
    }

    match base {
        Some(base) if is_scheme_url(base) => match Url::parse(base).and_then(|b| b.join(reference)) {
            Ok(url) => Some(url.to_string()),
            Err(e) => {
                tracing::debug!(%base, %reference, error = %e, "URL join failed, using path join");
                Some(join_paths(reference, Some(base)))
            }
        },
        _ => Some(join_paths(reference, base)),
    }
}

/// Directory part of a URI, including the trailing `/`
pub fn base_of(uri: &str) -> &str {
    match uri.rfind('/') {
        Some(pos) => &uri[..=pos],
        None => "",
    }
}

fn is_scheme_url(s: &str) -> bool {
    // Single-letter schemes are Windows drive letters, not URLs
    match s.find(':') {
        Some(pos) if pos > 1 => s[..pos]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')),
        _ => false,
    }
}

fn join_paths(reference: &str, base: Option<&str>) -> String {
    let joined = if reference.starts_with('/') {
        reference.to_string()
    } else {
        format!("{}{}", base.map(base_of).unwrap_or(""), reference)
    };
    normalize_path(&joined)
}

fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if matches!(segments.last(), Some(last) if *last != "..") {
                    segments.pop();
                } else if !absolute {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }
    let body = segments.join("/");
    if absolute { format!("/{body}") } else { body }
}

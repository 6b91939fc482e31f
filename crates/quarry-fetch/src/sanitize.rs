const URL_REDACTION: &str = "<redacted>";

/// Redacts userinfo, query values and fragments from every `scheme://` URL.
pub fn sanitize_url(url: &str) -> String {
    let Some(scheme_idx) = url.find("://") else {
        return url.to_owned();
    };

    let (scheme, rest) = url.split_at(scheme_idx + 3);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let authority = match authority.rfind('@') {
        Some(at_pos) => format!("{URL_REDACTION}@{}", &authority[at_pos + 1..]),
        None => authority.to_owned(),
    };

    format!("{scheme}{authority}{}", sanitize_tail(tail))
}

fn sanitize_tail(tail: &str) -> String {
    let (before_fragment, has_fragment) = match tail.find('#') {
        Some(pos) => (&tail[..pos], true),
        None => (tail, false),
    };

    let sanitized = match before_fragment.split_once('?') {
        Some((path, query)) => {
            let query: Vec<String> = query
                .split('&')
                .map(|part| match part.split_once('=') {
                    Some((key, _)) => format!("{key}={URL_REDACTION}"),
                    None => part.to_owned(),
                })
                .collect();
            format!("{path}?{}", query.join("&"))
        }
        None => before_fragment.to_owned(),
    };

    if has_fragment {
        format!("{sanitized}#{URL_REDACTION}")
    } else {
        sanitized
    }
}

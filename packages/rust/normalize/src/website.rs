//! Website URL canonicalization.
//!
//! Different sources report the same site as `acme.com`,
//! `http://www.acme.com/` or `https://acme.com/?utm_source=wiki`. Canonical
//! form: https scheme kept as given, lowercase host, no fragment, no
//! tracking parameters, no trailing slash on the bare root.

use url::Url;

/// Query parameters that only identify the referral, never the resource.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref", "igshid"];

/// Canonicalize a website string. Returns `None` when the input does not
/// look like an HTTP(S) URL at all.
pub fn canonical_website(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Bare hostnames get an https scheme before parsing.
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let mut url = Url::parse(&with_scheme).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.host_str()?;

    url.set_fragment(None);

    // Drop tracking parameters, keep everything else in order.
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        // Re-serialize through the form codec so decoded pairs get their
        // reserved characters re-encoded.
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        drop(pairs);
    }

    let mut out = url.to_string();
    // `Url` always renders the root path as "/"; strip it for a bare origin.
    if url.path() == "/" && url.query().is_none() {
        out.truncate(out.trim_end_matches('/').len());
    }
    Some(out)
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}

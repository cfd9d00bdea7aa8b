//! Link resolution for crawl-links
//!
//! Joining is syntactic and deliberately simple. `http...` hrefs pass through,
//! `/path` is joined to the start URL's scheme and authority as written (no
//! punycode or userinfo rewriting), and anything else is appended to the start
//! URL with a `/` in between. `../x`, `?q` and `#frag` get no special
//! treatment.

/// Resolve `href` against the start URL, `None` for an empty href
pub fn resolve_href(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    if href.starts_with("http") {
        return Some(href.to_string());
    }

    if href.starts_with('/') {
        return Some(format!("{}{}", scheme_and_authority(base), href));
    }

    if base.ends_with('/') {
        Some(format!("{}{}", base, href))
    } else {
        Some(format!("{}/{}", base, href))
    }
}

/// `scheme://authority` prefix of `base`, or all of `base` without a scheme
fn scheme_and_authority(base: &str) -> &str {
    match base.find("://") {
        Some(at) => {
            let rest = &base[at + 3..];
            let end = rest.find('/').map_or(base.len(), |i| at + 3 + i);
            &base[..end]
        }
        None => base,
    }
}

/// Ordered list of links to follow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    links: Vec<String>,
}

impl LinkSet {
    /// Resolve `hrefs` in document order, keeping the first `limit` links.
    ///
    /// Elements without an href are skipped. Duplicates are kept so the
    /// result lines up with what the page links to.
    pub fn resolve<I, S>(base: &str, hrefs: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let links = hrefs
            .into_iter()
            .flatten()
            .filter_map(|href| resolve_href(base, href.as_ref()))
            .take(limit)
            .collect();
        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.links.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.links
    }
}

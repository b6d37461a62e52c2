//! Pagination for the catalog and tag list endpoints.
//!
//! Registries limit a page with the `n` query parameter and point at the next
//! page with a `Link: <url>; rel="next"` header.

use serde::Deserialize;

/// A page of results from a paginated registry endpoint.
pub(crate) trait Paginator {
    /// Take the items of this page.
    fn items(self) -> Vec<String>;
}

/// A page of `/v2/_catalog`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct CatalogPage {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

impl Paginator for CatalogPage {
    fn items(self) -> Vec<String> {
        self.repositories.unwrap_or_default()
    }
}

/// A page of `/v2/<name>/tags/list`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TagPage {
    #[allow(dead_code)]
    name: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl Paginator for TagPage {
    fn items(self) -> Vec<String> {
        self.tags.unwrap_or_default()
    }
}

/// Find the `rel="next"` target of a `Link` header, resolved against `current`.
///
/// Returns the path and query to request next.
pub(crate) fn next_link(headers: &http::HeaderMap, current: &http::Uri) -> Option<String> {
    let base = url::Url::parse(&current.to_string()).ok()?;

    headers
        .get_all(http::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let (target, params) = link.trim().split_once(';')?;
            let is_next = params.split(';').any(|param| {
                let param = param.trim().replace(' ', "");
                param == "rel=\"next\"" || param == "rel=next"
            });
            if !is_next {
                return None;
            }

            let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
            let next = base.join(target).ok()?;
            if next.host_str() != base.host_str() {
                tracing::warn!(%next, "Ignoring pagination link to another host");
                return None;
            }

            Some(match next.query() {
                Some(query) => format!("{}?{}", next.path(), query),
                None => next.path().to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(link: &str) -> http::HeaderMap {
        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::LINK, link.parse().unwrap());
        headers
    }

    #[test]
    fn relative_next_link() {
        let current: http::Uri = "https://r.example/v2/_catalog?n=2".parse().unwrap();
        let next = next_link(
            &headers(r#"</v2/_catalog?last=b&n=2>; rel="next""#),
            &current,
        );
        assert_eq!(next.as_deref(), Some("/v2/_catalog?last=b&n=2"));
    }

    #[test]
    fn absolute_next_link() {
        let current: http::Uri = "https://r.example/v2/app/tags/list?n=2".parse().unwrap();
        let next = next_link(
            &headers(r#"<https://r.example/v2/app/tags/list?last=v2&n=2>; rel="next""#),
            &current,
        );
        assert_eq!(next.as_deref(), Some("/v2/app/tags/list?last=v2&n=2"));

        let elsewhere = next_link(
            &headers(r#"<https://evil.example/v2/app/tags/list?last=v2>; rel="next""#),
            &current,
        );
        assert!(elsewhere.is_none());
    }

    #[test]
    fn no_next_link() {
        let current: http::Uri = "https://r.example/v2/_catalog".parse().unwrap();
        assert!(next_link(&http::HeaderMap::new(), &current).is_none());
        assert!(next_link(&headers(r#"</v2/_catalog?last=b>; rel="prev""#), &current).is_none());
    }

    #[test]
    fn null_tags() {
        let page: TagPage = serde_json::from_str(r#"{"name": "app", "tags": null}"#).unwrap();
        assert!(page.items().is_empty());
    }
}

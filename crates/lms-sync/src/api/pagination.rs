//! RFC 5988 `Link` header parsing
//!
//! The source API communicates pagination through `Link` response headers
//! carrying `current`, `next`, and `last` relations. Some responses omit the
//! header, or individual relations, entirely.

use reqwest::header::{HeaderMap, LINK};

/// Pagination links extracted from one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLinks {
    pub current: Option<String>,
    pub next: Option<String>,
    pub last: Option<String>,
}

impl PageLinks {
    /// Parse a `Link` header value of the form
    /// `<url>; rel="current", <url>; rel="next", <url>; rel="last"`
    pub fn parse(header: &str) -> Self {
        let mut links = PageLinks::default();
        for part in header.split(',') {
            let mut url = None;
            let mut rel = None;
            for segment in part.split(';') {
                let segment = segment.trim();
                if let Some(inner) = segment
                    .strip_prefix('<')
                    .and_then(|s| s.strip_suffix('>'))
                {
                    url = Some(inner.to_string());
                } else if let Some(value) = segment.strip_prefix("rel=") {
                    rel = Some(value.trim_matches('"'));
                }
            }
            match (url, rel) {
                (Some(u), Some("current")) => links.current = Some(u),
                (Some(u), Some("next")) => links.next = Some(u),
                (Some(u), Some("last")) => links.last = Some(u),
                _ => {},
            }
        }
        links
    }

    /// Extract links from response headers; missing header means no links
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(Self::parse)
            .unwrap_or_default()
    }

    /// URL of the next page to fetch, or `None` when pagination is done.
    ///
    /// Terminates when `next` is absent, when no `last` relation was sent at
    /// all, or when the current page is the last one.
    pub fn follow(&self) -> Option<&str> {
        let next = self.next.as_deref()?;
        self.last.as_deref()?;
        if self.current.is_some() && self.current == self.last {
            return None;
        }
        Some(next)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const MID_PAGE: &str = "<https://lms.test/api/v1/courses?page=1&per_page=20>; rel=\"current\", \
         <https://lms.test/api/v1/courses?page=2&per_page=20>; rel=\"next\", \
         <https://lms.test/api/v1/courses?page=3&per_page=20>; rel=\"last\"";

    #[test]
    fn parses_all_relations() {
        let links = PageLinks::parse(MID_PAGE);
        assert!(links.current.unwrap().contains("page=1"));
        assert!(links.next.as_ref().unwrap().contains("page=2"));
        assert!(links.last.unwrap().contains("page=3"));
    }

    #[test]
    fn follows_next_mid_pagination() {
        let links = PageLinks::parse(MID_PAGE);
        assert_eq!(
            links.follow(),
            Some("https://lms.test/api/v1/courses?page=2&per_page=20")
        );
    }

    #[test]
    fn stops_without_next() {
        let links = PageLinks::parse(
            "<https://lms.test/c?page=3>; rel=\"current\", <https://lms.test/c?page=3>; rel=\"last\"",
        );
        assert_eq!(links.follow(), None);
    }

    #[test]
    fn stops_without_last() {
        // Defensive: some responses omit the last relation entirely
        let links = PageLinks::parse("<https://lms.test/c?page=2>; rel=\"next\"");
        assert_eq!(links.follow(), None);
    }

    #[test]
    fn stops_when_current_is_last() {
        let links = PageLinks::parse(
            "<https://lms.test/c?page=3>; rel=\"current\", \
             <https://lms.test/c?page=4>; rel=\"next\", \
             <https://lms.test/c?page=3>; rel=\"last\"",
        );
        assert_eq!(links.follow(), None);
    }

    #[test]
    fn missing_header_yields_no_links() {
        let headers = HeaderMap::new();
        let links = PageLinks::from_headers(&headers);
        assert_eq!(links, PageLinks::default());
        assert_eq!(links.follow(), None);
    }

    #[test]
    fn ignores_unknown_relations() {
        let links = PageLinks::parse(
            "<https://lms.test/c?page=1>; rel=\"first\", <https://lms.test/c?page=2>; rel=\"prev\"",
        );
        assert!(links.next.is_none());
        assert!(links.current.is_none());
    }
}

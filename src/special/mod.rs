//! `_redirects` and `_headers` rule files, evaluated per request from
//! the effective project directory.

mod headers;
mod redirects;

pub use headers::{HeaderSection, match_headers, parse_headers};
pub use redirects::{RedirectMatch, RedirectRule, find_redirect, parse_redirects};

/// Segment-wise pattern match shared by both rule files. Supports
/// `:name` placeholders and a trailing `*` splat. Returns captured
/// placeholders and the splat remainder on success.
fn match_pattern<'a>(pattern: &'a str, path: &'a str) -> Option<MatchCaptures<'a>> {
    let pat_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    let mut captures = MatchCaptures::default();

    for (i, pat) in pat_segments.iter().enumerate() {
        if *pat == "*" {
            // splat swallows the rest, including nothing
            captures.splat = Some(path_segments.get(i..).unwrap_or(&[]).join("/"));
            return Some(captures);
        }

        let Some(actual) = path_segments.get(i) else {
            return None;
        };

        if let Some(name) = pat.strip_prefix(':') {
            if actual.is_empty() {
                return None;
            }
            captures.params.push((name, actual));
        } else if pat != actual {
            return None;
        }
    }

    if path_segments.len() != pat_segments.len() {
        return None;
    }
    Some(captures)
}

#[derive(Debug, Default)]
struct MatchCaptures<'a> {
    params: Vec<(&'a str, &'a str)>,
    splat: Option<String>,
}

impl MatchCaptures<'_> {
    /// Replaces `:name` references and `:splat` in a target template.
    fn substitute(&self, template: &str) -> String {
        let mut out = template.to_string();
        // longest names first so :postid does not lose to :post
        let mut params: Vec<_> = self.params.clone();
        params.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
        for (name, value) in params {
            out = out.replace(&format!(":{name}"), value);
        }
        if let Some(splat) = &self.splat {
            out = out.replace(":splat", splat);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_match() {
        assert!(match_pattern("/about", "/about").is_some());
        assert!(match_pattern("/about", "/about/team").is_none());
        assert!(match_pattern("/about/team", "/about").is_none());
    }

    #[test]
    fn test_placeholder_capture() {
        let m = match_pattern("/posts/:id", "/posts/42").unwrap();
        assert_eq!(m.params, vec![("id", "42")]);
        assert_eq!(m.substitute("/articles/:id"), "/articles/42");
    }

    #[test]
    fn test_trailing_splat() {
        let m = match_pattern("/news/*", "/news/2024/06/hello").unwrap();
        assert_eq!(m.splat.as_deref(), Some("2024/06/hello"));
        assert_eq!(m.substitute("/blog/:splat"), "/blog/2024/06/hello");

        // splat also matches the bare prefix
        assert!(match_pattern("/news/*", "/news").is_some());
        assert!(match_pattern("/*", "/anything/at/all").is_some());
    }
}

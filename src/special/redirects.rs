use super::match_pattern;

/// One parsed `_redirects` line: `<from> <to> [status] [conditions...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRule {
    pub from: String,
    pub to: String,
    pub status: u16,
}

const ACCEPTED_STATUSES: &[u16] = &[301, 302, 303, 307, 308, 200, 404];

/// Parses the file, skipping blanks, comments, and lines that do not
/// form a valid rule. Bad lines are logged and dropped rather than
/// failing the whole file.
pub fn parse_redirects(text: &str) -> Vec<RedirectRule> {
    let mut rules = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let (Some(from), Some(to)) = (tokens.next(), tokens.next()) else {
            tracing::warn!(line = lineno + 1, "redirect rule missing target, skipped");
            continue;
        };

        let status = match tokens.next() {
            None => 301,
            Some(tok) => {
                // trailing conditions (country/language) are accepted
                // and ignored; a status token must parse
                let candidate = tok.trim_end_matches('!');
                match candidate.parse::<u16>() {
                    Ok(s) if ACCEPTED_STATUSES.contains(&s) => s,
                    Ok(s) => {
                        tracing::warn!(line = lineno + 1, status = s, "unsupported redirect status, skipped");
                        continue;
                    }
                    // not a status at all: treat as a condition token
                    Err(_) => 301,
                }
            }
        };

        rules.push(RedirectRule {
            from: from.to_string(),
            to: to.to_string(),
            status,
        });
    }

    rules
}

/// Outcome of matching a request path against the rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectMatch {
    /// Substituted target (URL or in-site path).
    pub to: String,
    pub status: u16,
}

/// First match wins, top to bottom.
pub fn find_redirect(rules: &[RedirectRule], path: &str) -> Option<RedirectMatch> {
    for rule in rules {
        if let Some(captures) = match_pattern(&rule.from, path) {
            return Some(RedirectMatch {
                to: captures.substitute(&rule.to),
                status: rule.status,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let rules = parse_redirects(
            "# moved pages\n\
             /home / 301\n\
             \n\
             /blog/* /news/:splat 302\n\
             /spa/* /index.html 200\n\
             /gone /404.html 404\n",
        );
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].status, 301);
        assert_eq!(rules[2].status, 200);
        assert_eq!(rules[3].status, 404);
    }

    #[test]
    fn test_parse_default_status() {
        let rules = parse_redirects("/old /new");
        assert_eq!(rules[0].status, 301);
    }

    #[test]
    fn test_parse_skips_bad_lines() {
        let rules = parse_redirects("/only-from\n/from /to 999\n/ok /fine 302");
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].from, "/ok");
    }

    #[test]
    fn test_first_match_wins() {
        let rules = parse_redirects("/a /first\n/a /second 302");
        let m = find_redirect(&rules, "/a").unwrap();
        assert_eq!(m.to, "/first");
        assert_eq!(m.status, 301);
    }

    #[test]
    fn test_placeholder_and_splat_substitution() {
        let rules = parse_redirects("/posts/:id/* /articles/:id/:splat 301");
        let m = find_redirect(&rules, "/posts/42/a/b").unwrap();
        assert_eq!(m.to, "/articles/42/a/b");
    }

    #[test]
    fn test_absolute_url_target() {
        let rules = parse_redirects("/ext https://example.com/ 302");
        let m = find_redirect(&rules, "/ext").unwrap();
        assert_eq!(m.to, "https://example.com/");
    }

    #[test]
    fn test_no_match() {
        let rules = parse_redirects("/a /b");
        assert!(find_redirect(&rules, "/c").is_none());
    }
}

use super::match_pattern;

/// One `_headers` section: a path pattern followed by indented
/// `Name: value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSection {
    pub pattern: String,
    pub headers: Vec<(String, String)>,
}

pub fn parse_headers(text: &str) -> Vec<HeaderSection> {
    let mut sections: Vec<HeaderSection> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let indented = line.starts_with(' ') || line.starts_with('\t');
        if !indented {
            sections.push(HeaderSection {
                pattern: line.trim().to_string(),
                headers: Vec::new(),
            });
            continue;
        }

        let Some(section) = sections.last_mut() else {
            tracing::warn!("header line before any pattern, skipped");
            continue;
        };
        match line.trim().split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                section
                    .headers
                    .push((name.trim().to_string(), value.trim().to_string()));
            }
            _ => tracing::warn!(line = line.trim(), "malformed header line, skipped"),
        }
    }

    sections
}

/// Collects headers from every matching section in file order; a later
/// value for the same name replaces the earlier one.
pub fn match_headers(sections: &[HeaderSection], path: &str) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();

    for section in sections {
        if match_pattern(&section.pattern, path).is_none() {
            continue;
        }
        for (name, value) in &section.headers {
            match out
                .iter_mut()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                Some(slot) => slot.1 = value.clone(),
                None => out.push((name.clone(), value.clone())),
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = "\
/*
  X-Frame-Options: DENY
  Cache-Control: max-age=60

/fonts/*
  Cache-Control: max-age=31536000
  Access-Control-Allow-Origin: *
";

    #[test]
    fn test_parse_sections() {
        let sections = parse_headers(FILE);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].pattern, "/*");
        assert_eq!(sections[1].headers.len(), 2);
    }

    #[test]
    fn test_later_section_replaces() {
        let sections = parse_headers(FILE);
        let headers = match_headers(&sections, "/fonts/a.woff2");
        assert!(headers.contains(&("X-Frame-Options".to_string(), "DENY".to_string())));
        assert!(
            headers.contains(&("Cache-Control".to_string(), "max-age=31536000".to_string()))
        );
        assert!(
            headers.contains(&("Access-Control-Allow-Origin".to_string(), "*".to_string()))
        );
    }

    #[test]
    fn test_non_matching_section_skipped() {
        let sections = parse_headers(FILE);
        let headers = match_headers(&sections, "/index.html");
        assert_eq!(
            headers,
            vec![
                ("X-Frame-Options".to_string(), "DENY".to_string()),
                ("Cache-Control".to_string(), "max-age=60".to_string()),
            ]
        );
    }

    #[test]
    fn test_placeholder_pattern() {
        let sections = parse_headers("/:page/admin\n  X-Robots-Tag: noindex\n");
        assert_eq!(match_headers(&sections, "/app/admin").len(), 1);
        assert!(match_headers(&sections, "/app/other").is_empty());
    }

    #[test]
    fn test_orphan_header_line_ignored() {
        let sections = parse_headers("  X-Lost: 1\n/*\n  X-Found: 1\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].headers.len(), 1);
    }
}

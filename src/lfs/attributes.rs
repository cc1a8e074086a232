//! Which paths a `.gitattributes` file routes through the LFS filter.
//!
//! Supports the pattern forms LFS tooling writes: plain paths, `*` and `?`
//! within a segment, `**` across segments, and the `[[:space:]]` escape.
//! Later lines override earlier ones, as in git.

/// The LFS-relevant rules of one `.gitattributes` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LfsAttributes {
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    pattern: String,
    /// pattern has no `/` and applies to the file name at any depth
    basename: bool,
    lfs: bool,
}

impl LfsAttributes {
    pub fn parse(text: &str) -> Self {
        let rules = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let pattern = fields.next()?.replace("[[:space:]]", " ");
                let lfs = fields.fold(None, |state, attr| match attr {
                    "filter=lfs" => Some(true),
                    "-filter" | "!filter" => Some(false),
                    a if a.starts_with("filter=") => Some(false),
                    _ => state,
                })?;
                let basename = !pattern.contains('/');
                let pattern = pattern.trim_start_matches('/').to_string();
                Some(Rule {
                    pattern,
                    basename,
                    lfs,
                })
            })
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether `path` (relative to the repository root) is stored via LFS.
    pub fn is_lfs(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        self.rules
            .iter()
            .rev()
            .find(|rule| {
                let subject = if rule.basename { name } else { path };
                glob_match(rule.pattern.as_bytes(), subject.as_bytes())
            })
            .is_some_and(|rule| rule.lfs)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern {
        [] => text.is_empty(),
        [b'*', b'*', rest @ ..] => {
            let rest = rest.strip_prefix(b"/").unwrap_or(rest);
            (0..=text.len()).any(|i| glob_match(rest, &text[i..]))
        }
        [b'*', rest @ ..] => {
            let segment = text.iter().position(|&c| c == b'/').unwrap_or(text.len());
            (0..=segment).any(|i| glob_match(rest, &text[i..]))
        }
        [b'?', rest @ ..] => matches!(text, [c, tail @ ..] if *c != b'/' && glob_match(rest, tail)),
        [p, rest @ ..] => matches!(text, [c, tail @ ..] if c == p && glob_match(rest, tail)),
    }
}

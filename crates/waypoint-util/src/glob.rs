//! Glob pattern matching for include/exclude filters.
//!
//! Patterns are compiled into anchored regular expressions:
//! - `**` matches any number of path segments (including none)
//! - `*` matches any sequence of characters within one segment
//! - `?` matches exactly one character other than `/`
//!
//! Everything else matches itself literally. A pattern without any `/`
//! is matched against the file name only, so `*.log` excludes log files
//! at any depth.

use regex::Regex;

use crate::{Error, Result};

/// A single compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
    basename_only: bool,
}

impl GlobPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_start_matches("./");
        if trimmed.is_empty() {
            return Err(Error::EmptyPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty",
            });
        }

        let regex = Regex::new(&to_regex(trimmed)).map_err(|source| Error::Pattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
            basename_only: !trimmed.contains('/'),
        })
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check a `/`-separated relative path against this pattern.
    pub fn matches(&self, path: &str) -> bool {
        if self.basename_only {
            let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
            return self.regex.is_match(name);
        }
        self.regex.is_match(path)
    }
}

/// Translate a glob into an anchored regular expression.
fn to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                if chars.get(i) == Some(&'/') {
                    // `**/` - zero or more whole segments.
                    out.push_str("(?:.*/)?");
                    i += 1;
                } else {
                    out.push_str(".*");
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
        i += 1;
    }

    out.push('$');
    out
}

/// An ordered collection of glob patterns.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    patterns: Vec<GlobPattern>,
}

impl GlobSet {
    /// Compile every pattern, failing on the first invalid one.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| GlobPattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Check whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Check a relative file path against all patterns.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    /// Check a relative directory path, so whole subtrees can be pruned.
    ///
    /// `**/target/**` matches `target/` but not `target` itself, so the
    /// directory is tested with a trailing separator as well.
    pub fn matches_dir(&self, path: &str) -> bool {
        let with_slash = format!("{}/", path.trim_end_matches('/'));
        self.patterns
            .iter()
            .any(|p| p.matches(path) || p.matches(&with_slash))
    }

    /// Append more patterns.
    pub fn extend(&mut self, other: GlobSet) {
        self.patterns.extend(other.patterns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(p: &str) -> GlobPattern {
        GlobPattern::new(p).unwrap()
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let p = glob("src/*.rs");
        assert!(p.matches("src/main.rs"));
        assert!(!p.matches("src/bin/main.rs"));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let p = glob("src/**/*.rs");
        assert!(p.matches("src/main.rs"));
        assert!(p.matches("src/a/b/c.rs"));
        assert!(!p.matches("tests/a.rs"));
    }

    #[test]
    fn test_leading_double_star() {
        let p = glob("**/node_modules/**");
        assert!(p.matches("node_modules/left-pad/index.js"));
        assert!(p.matches("web/node_modules/x.js"));
        assert!(!p.matches("src/modules/x.js"));
    }

    #[test]
    fn test_question_mark() {
        let p = glob("file?.txt");
        assert!(p.matches("file1.txt"));
        assert!(!p.matches("file10.txt"));
    }

    #[test]
    fn test_literal_characters_are_escaped() {
        let p = glob("a+b(1).txt");
        assert!(p.matches("a+b(1).txt"));
        assert!(!p.matches("aab1.txt"));
    }

    #[test]
    fn test_basename_pattern_matches_any_depth() {
        let p = glob("*.log");
        assert!(p.matches("debug.log"));
        assert!(p.matches("logs/deep/debug.log"));
        assert!(!p.matches("debug.log.txt"));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let p = glob("docs/*.md");
        assert!(!p.matches("old/docs/readme.md"));
    }

    #[test]
    fn test_set_matches_dir() {
        let set = GlobSet::new(["**/.git/**", "**/target/**"]).unwrap();
        assert!(set.matches_dir(".git"));
        assert!(set.matches_dir("crates/foo/target"));
        assert!(!set.matches_dir("src"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(GlobPattern::new("").is_err());
        assert!(GlobSet::new(["ok/*", ""]).is_err());
    }
}

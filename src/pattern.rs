//! Wildcard path patterns
//!
//! Patterns are slash-delimited strings whose segments are literals or the
//! single token `*`. A trailing `*` matches any number of remaining
//! segments; an interior `*` matches exactly one. Used for public-route
//! whitelisting and for selecting rate-limit policies.

/// A compiled path pattern
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    normalized: String,
    segments: Option<Vec<String>>,
}

impl PathPattern {
    /// Compile a pattern string
    pub fn new(pattern: &str) -> Self {
        let normalized = normalize(pattern);
        let segments = if normalized.contains('*') {
            Some(
                normalized
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect(),
            )
        } else {
            None
        };
        Self {
            raw: pattern.to_string(),
            normalized,
            segments,
        }
    }

    /// The pattern string as declared
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Check whether a path matches this pattern
    pub fn matches(&self, path: &str) -> bool {
        let path = normalize(path);

        let Some(pattern_segments) = &self.segments else {
            // No wildcard: exact equality after normalization.
            return self.normalized == path;
        };

        let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let mut i = 0;
        for (pi, seg) in pattern_segments.iter().enumerate() {
            let last = pi == pattern_segments.len() - 1;
            if seg == "*" && last {
                return true;
            }
            if i >= path_segments.len() {
                return false;
            }
            if seg != "*" && seg != path_segments[i] {
                return false;
            }
            i += 1;
        }

        i == path_segments.len()
    }
}

/// An ordered list of patterns; the first match wins
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<PathPattern>,
}

impl PatternSet {
    /// Compile a list of pattern strings, keeping declared order
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| PathPattern::new(p.as_ref()))
                .collect(),
        }
    }

    /// Check whether any pattern matches the path
    pub fn matches_any(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(path))
    }

    /// Number of patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Collapse duplicate slashes and strip the trailing slash (except root).
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                out.push('/');
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

//! Path pattern matching.
//!
//! # Responsibilities
//! - Parse route patterns such as `/datasets/{user-id}/{id}`
//! - Match a request path exactly or by prefix
//! - Bind placeholder segments to path parameters
//!
//! # Design Decisions
//! - Segment-based, no regex: matching is O(segments)
//! - Prefix matches stop at segment boundaries (`/data` does not match `/database`)
//! - Placeholders match exactly one non-empty segment

use std::fmt;

use thiserror::Error;

/// How a pattern is compared against a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// Segment count and every literal must match.
    Exact,
    /// The pattern's segments must be a leading subsequence of the path.
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern {0:?} must start with '/'")]
    NotAbsolute(String),

    #[error("pattern {0:?} has an empty segment")]
    EmptySegment(String),

    #[error("pattern {0:?} has a malformed placeholder")]
    BadPlaceholder(String),

    #[error("pattern {pattern:?} binds {name:?} more than once")]
    DuplicateParam { pattern: String, name: String },
}

/// Ordered path parameter bindings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A successful pattern match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
    pub params: PathParams,
    /// Path below a prefix pattern, always starting with `/` or empty.
    pub remainder: String,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute(raw.to_string()));
        }

        let mut segments = Vec::new();
        for part in split_segments(raw) {
            if part.is_empty() {
                return Err(PatternError::EmptySegment(raw.to_string()));
            }
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(name) => {
                    if name.is_empty() || name.contains(['{', '}', '/']) {
                        return Err(PatternError::BadPlaceholder(raw.to_string()));
                    }
                    if segments.iter().any(|s| matches!(s, Segment::Param(n) if n == name)) {
                        return Err(PatternError::DuplicateParam {
                            pattern: raw.to_string(),
                            name: name.to_string(),
                        });
                    }
                    Segment::Param(name.to_string())
                }
                None if part.contains(['{', '}']) => {
                    return Err(PatternError::BadPlaceholder(raw.to_string()));
                }
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Shape of the pattern with placeholder names erased.
    ///
    /// `/users/{id}` and `/users/{name}` share a shape.
    pub fn shape(&self) -> String {
        let mut shape = String::new();
        for segment in &self.segments {
            shape.push('/');
            match segment {
                Segment::Literal(l) => shape.push_str(l),
                Segment::Param(_) => shape.push_str("{}"),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }
        shape
    }

    /// Length of all literal segments including their separators.
    /// Used to rank competing prefix routes.
    pub fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.len() + 1,
                Segment::Param(_) => 0,
            })
            .sum()
    }

    /// Number of literal segments.
    pub fn literal_segments(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Match `path` under the given kind. `path` must already be normalized.
    pub fn matches(&self, path: &str, kind: MatchKind) -> Option<PathMatch> {
        let parts: Vec<&str> = split_segments(path).collect();

        match kind {
            MatchKind::Exact if parts.len() != self.segments.len() => return None,
            MatchKind::Prefix if parts.len() < self.segments.len() => return None,
            _ => {}
        }

        let mut params = PathParams::new();
        for (segment, part) in self.segments.iter().zip(&parts) {
            match segment {
                Segment::Literal(l) if l == part => {}
                Segment::Literal(_) => return None,
                Segment::Param(_) if part.is_empty() => return None,
                Segment::Param(name) => params.insert(name.clone(), *part),
            }
        }

        let rest = &parts[self.segments.len()..];
        let remainder = if rest.is_empty() {
            String::new()
        } else {
            format!("/{}", rest.join("/"))
        };

        Some(PathMatch { params, remainder })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a path into segments. `/` yields nothing.
fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed.split('/').filter(move |_| !trimmed.is_empty())
}

/// Apply the trailing-slash policy.
///
/// Unless `strict` is set, a single trailing slash is dropped (`/` stays `/`).
pub fn normalize_path(path: &str, strict: bool) -> &str {
    if strict || path.len() <= 1 {
        return path;
    }
    path.strip_suffix('/').unwrap_or(path)
}

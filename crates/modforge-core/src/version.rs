//! Mod version parsing, comparison, and range matching.
//!
//! Registry version strings are not guaranteed to be semver, so they are
//! compared segment by segment:
//! - Segments are split on `.`, `-`, `_` and at digit/letter boundaries
//! - Build metadata after `+` is ignored (`0.5.3+mc1.20.1` equals `0.5.3`)
//! - Numeric segments compare as numbers, missing trailing zeros are equal
//! - Known qualifiers order as
//!   `snapshot` < `alpha` < `beta` < `pre` < `rc` < `""` (release) < `sp`
//! - Unknown text sorts below numbers and compares case-insensitively

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// A parsed mod version with comparable segments.
#[derive(Debug, Clone)]
pub struct ModVersion {
    original: String,
    segments: Vec<Segment>,
}

impl PartialEq for ModVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ModVersion {}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Segment {
    Numeric(u64),
    Qualifier(QualifierKind),
    Text(String),
}

/// Well-known pre-release and post-release qualifiers with defined ordering.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
enum QualifierKind {
    Snapshot,
    Alpha,
    Beta,
    Pre,
    Rc,
    Release,
    Sp,
}

impl ModVersion {
    pub fn parse(version: &str) -> Self {
        let trimmed = version.trim();
        Self {
            original: trimmed.to_string(),
            segments: parse_segments(trimmed),
        }
    }

    /// The version string exactly as published.
    pub fn as_str(&self) -> &str {
        &self.original
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether any segment is a qualifier ordered before a release.
    pub fn is_prerelease(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Qualifier(q) if *q < QualifierKind::Release))
    }
}

impl fmt::Display for ModVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

impl Ord for ModVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let max_len = self.segments.len().max(other.segments.len());
        for i in 0..max_len {
            let ord = compare_segments(self.segments.get(i), other.segments.get(i));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ModVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn compare_segments(a: Option<&Segment>, b: Option<&Segment>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (Some(s), None) => compare_segment_to_empty(s),
        (None, Some(s)) => compare_segment_to_empty(s).reverse(),
        (Some(a), Some(b)) => compare_two_segments(a, b),
    }
}

fn compare_segment_to_empty(seg: &Segment) -> Ordering {
    match seg {
        Segment::Numeric(0) => Ordering::Equal,
        Segment::Numeric(_) => Ordering::Greater,
        Segment::Qualifier(q) => q.cmp(&QualifierKind::Release),
        Segment::Text(_) => Ordering::Less,
    }
}

fn compare_two_segments(a: &Segment, b: &Segment) -> Ordering {
    match (a, b) {
        (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
        (Segment::Qualifier(a), Segment::Qualifier(b)) => a.cmp(b),
        (Segment::Numeric(_), Segment::Qualifier(_)) => Ordering::Greater,
        (Segment::Qualifier(_), Segment::Numeric(_)) => Ordering::Less,
        (Segment::Numeric(_), Segment::Text(_)) => Ordering::Greater,
        (Segment::Text(_), Segment::Numeric(_)) => Ordering::Less,
        (Segment::Text(a), Segment::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Segment::Qualifier(q), Segment::Text(_)) => {
            if *q >= QualifierKind::Release {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (Segment::Text(_), Segment::Qualifier(q)) => {
            if *q >= QualifierKind::Release {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
    }
}

fn parse_segments(version: &str) -> Vec<Segment> {
    let core = version.split('+').next().unwrap_or(version);
    let core = match core.strip_prefix(['v', 'V']) {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => core,
    };

    let mut segments = Vec::new();
    let mut current = String::new();
    let mut current_is_digit = false;

    for ch in core.chars() {
        if ch == '.' || ch == '-' || ch == '_' {
            if !current.is_empty() {
                segments.push(classify(&current));
                current.clear();
            }
            continue;
        }
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != current_is_digit {
            segments.push(classify(&current));
            current.clear();
        }
        current_is_digit = is_digit;
        current.push(ch);
    }
    if !current.is_empty() {
        segments.push(classify(&current));
    }

    segments
}

fn classify(token: &str) -> Segment {
    if let Ok(n) = token.parse::<u64>() {
        return Segment::Numeric(n);
    }
    match token.to_lowercase().as_str() {
        "snapshot" | "snap" => Segment::Qualifier(QualifierKind::Snapshot),
        "alpha" | "a" => Segment::Qualifier(QualifierKind::Alpha),
        "beta" | "b" => Segment::Qualifier(QualifierKind::Beta),
        "pre" | "preview" => Segment::Qualifier(QualifierKind::Pre),
        "rc" | "cr" => Segment::Qualifier(QualifierKind::Rc),
        "ga" | "final" | "release" => Segment::Qualifier(QualifierKind::Release),
        "sp" => Segment::Qualifier(QualifierKind::Sp),
        _ => Segment::Text(token.to_string()),
    }
}

/// A requirement string that could not be turned into a [`VersionRange`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid version requirement `{input}`: {reason}")]
pub struct RangeParseError {
    pub input: String,
    pub reason: String,
}

fn range_error(input: &str, reason: impl Into<String>) -> RangeParseError {
    RangeParseError {
        input: input.to_string(),
        reason: reason.into(),
    }
}

/// A contiguous interval of versions with optional inclusive/exclusive bounds.
///
/// Accepted requirement syntax:
/// - `*`, `x` or an empty string: any version
/// - `1.2.3` or `=1.2.3`: exactly that version
/// - `1.x`, `1.2.*`: wildcard on the trailing component
/// - `>=2.0,<3.0`, `>=2.0 <3.0`: comparator lists, intersected
/// - `^1.2`, `~1.2`: caret and tilde shorthands
/// - `[1.0,2.0)`, `(,2.0]`, `[1.5]`: interval notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub version: ModVersion,
    pub inclusive: bool,
}

impl Bound {
    fn inclusive(version: &str) -> Self {
        Self {
            version: ModVersion::parse(version),
            inclusive: true,
        }
    }

    fn exclusive(version: &str) -> Self {
        Self {
            version: ModVersion::parse(version),
            inclusive: false,
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl VersionRange {
    /// The unbounded range, satisfied by every version.
    pub fn any() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    /// The range containing exactly `version`.
    pub fn exact(version: ModVersion) -> Self {
        Self {
            lower: Some(Bound {
                version: version.clone(),
                inclusive: true,
            }),
            upper: Some(Bound {
                version,
                inclusive: true,
            }),
        }
    }

    /// Parse a version requirement string.
    pub fn parse(spec: &str) -> Result<Self, RangeParseError> {
        let s = spec.trim();
        if s.is_empty() || s == "*" || s.eq_ignore_ascii_case("x") || s.eq_ignore_ascii_case("any")
        {
            return Ok(Self::any());
        }
        if s.starts_with('[') || s.starts_with('(') {
            return parse_interval(s);
        }

        let mut range = Self::any();
        let mut pending_op = String::new();
        for token in s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            if token.chars().all(|c| "<>=^~".contains(c)) {
                pending_op.push_str(token);
                continue;
            }
            let comparator = format!("{pending_op}{token}");
            pending_op.clear();
            let next = parse_comparator(&comparator, spec)?;
            range = range
                .intersect(&next)
                .ok_or_else(|| range_error(spec, "requirement can never be satisfied"))?;
        }
        if !pending_op.is_empty() {
            return Err(range_error(spec, format!("`{pending_op}` has no version")));
        }
        Ok(range)
    }

    pub fn is_any(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// The pinned version if this range admits exactly one version.
    pub fn exact_version(&self) -> Option<&ModVersion> {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) if l.inclusive && u.inclusive && l.version == u.version => {
                Some(&l.version)
            }
            _ => None,
        }
    }

    /// Whether no version can ever satisfy this range.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some(l), Some(u)) => match l.version.cmp(&u.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(l.inclusive && u.inclusive),
                Ordering::Less => false,
            },
            _ => false,
        }
    }

    /// Interval intersection. Returns `None` when the result is empty.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let range = Self {
            lower: tighter_lower(self.lower.as_ref(), other.lower.as_ref()),
            upper: tighter_upper(self.upper.as_ref(), other.upper.as_ref()),
        };
        (!range.is_empty()).then_some(range)
    }

    /// Check if a version satisfies this range.
    pub fn contains(&self, version: &ModVersion) -> bool {
        if let Some(ref lower) = self.lower {
            let cmp = version.cmp(&lower.version);
            if lower.inclusive {
                if cmp == Ordering::Less {
                    return false;
                }
            } else if cmp != Ordering::Greater {
                return false;
            }
        }
        if let Some(ref upper) = self.upper {
            let cmp = version.cmp(&upper.version);
            if upper.inclusive {
                if cmp == Ordering::Greater {
                    return false;
                }
            } else if cmp != Ordering::Less {
                return false;
            }
        }
        true
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        if let Some(v) = self.exact_version() {
            return write!(f, "={v}");
        }
        let mut parts = Vec::new();
        if let Some(l) = &self.lower {
            parts.push(format!("{}{}", if l.inclusive { ">=" } else { ">" }, l.version));
        }
        if let Some(u) = &self.upper {
            parts.push(format!("{}{}", if u.inclusive { "<=" } else { "<" }, u.version));
        }
        f.write_str(&parts.join(", "))
    }
}

fn tighter_lower(a: Option<&Bound>, b: Option<&Bound>) -> Option<Bound> {
    match (a, b) {
        (None, x) | (x, None) => x.cloned(),
        (Some(a), Some(b)) => match a.version.cmp(&b.version) {
            Ordering::Greater => Some(a.clone()),
            Ordering::Less => Some(b.clone()),
            Ordering::Equal => Some(Bound {
                version: a.version.clone(),
                inclusive: a.inclusive && b.inclusive,
            }),
        },
    }
}

fn tighter_upper(a: Option<&Bound>, b: Option<&Bound>) -> Option<Bound> {
    match (a, b) {
        (None, x) | (x, None) => x.cloned(),
        (Some(a), Some(b)) => match a.version.cmp(&b.version) {
            Ordering::Less => Some(a.clone()),
            Ordering::Greater => Some(b.clone()),
            Ordering::Equal => Some(Bound {
                version: a.version.clone(),
                inclusive: a.inclusive && b.inclusive,
            }),
        },
    }
}

fn parse_interval(s: &str) -> Result<VersionRange, RangeParseError> {
    if !s.ends_with(']') && !s.ends_with(')') {
        return Err(range_error(s, "unterminated interval"));
    }
    let open_inclusive = s.starts_with('[');
    let close_inclusive = s.ends_with(']');
    let inner = &s[1..s.len() - 1];
    if inner.contains(['[', ']', '(', ')']) {
        return Err(range_error(s, "only a single interval is supported"));
    }

    let range = if let Some((lower, upper)) = inner.split_once(',') {
        let lower = lower.trim();
        let upper = upper.trim();
        VersionRange {
            lower: (!lower.is_empty()).then(|| Bound {
                version: ModVersion::parse(lower),
                inclusive: open_inclusive,
            }),
            upper: (!upper.is_empty()).then(|| Bound {
                version: ModVersion::parse(upper),
                inclusive: close_inclusive,
            }),
        }
    } else {
        // [1.0] means exactly 1.0
        let inner = inner.trim();
        if inner.is_empty() {
            return Err(range_error(s, "empty interval"));
        }
        VersionRange::exact(ModVersion::parse(inner))
    };

    if range.is_empty() {
        return Err(range_error(s, "requirement can never be satisfied"));
    }
    Ok(range)
}

fn parse_comparator(token: &str, spec: &str) -> Result<VersionRange, RangeParseError> {
    let (op, version) = split_operator(token);
    if version.is_empty() {
        return Err(range_error(spec, format!("`{token}` has no version")));
    }
    if ModVersion::parse(version).is_empty() {
        return Err(range_error(spec, format!("`{version}` is not a version")));
    }

    let range = match op {
        ">=" => VersionRange {
            lower: Some(Bound::inclusive(version)),
            upper: None,
        },
        ">" => VersionRange {
            lower: Some(Bound::exclusive(version)),
            upper: None,
        },
        "<=" => VersionRange {
            lower: None,
            upper: Some(Bound::inclusive(version)),
        },
        "<" => VersionRange {
            lower: None,
            upper: Some(Bound::exclusive(version)),
        },
        "^" => {
            let parts = numeric_parts(version, spec)?;
            let idx = parts.iter().position(|&n| n != 0).unwrap_or(parts.len() - 1);
            VersionRange {
                lower: Some(Bound::inclusive(version)),
                upper: Some(Bound::exclusive(&bump(&parts[..=idx], spec)?)),
            }
        }
        "~" => {
            let parts = numeric_parts(version, spec)?;
            let keep = parts.len().min(2);
            VersionRange {
                lower: Some(Bound::inclusive(version)),
                upper: Some(Bound::exclusive(&bump(&parts[..keep], spec)?)),
            }
        }
        "=" | "==" | "" => match wildcard_prefix(version) {
            Some(prefix) if op.is_empty() => {
                let parts = numeric_parts(prefix, spec)?;
                VersionRange {
                    lower: Some(Bound::inclusive(prefix)),
                    upper: Some(Bound::exclusive(&bump(&parts, spec)?)),
                }
            }
            _ => VersionRange::exact(ModVersion::parse(version)),
        },
        other => return Err(range_error(spec, format!("unknown operator `{other}`"))),
    };
    Ok(range)
}

fn split_operator(token: &str) -> (&str, &str) {
    let end = token
        .find(|c: char| !"<>=^~".contains(c))
        .unwrap_or(token.len());
    (&token[..end], token[end..].trim())
}

/// `1.x` and `1.2.*` yield `1` and `1.2`.
fn wildcard_prefix(version: &str) -> Option<&str> {
    version
        .strip_suffix(".x")
        .or_else(|| version.strip_suffix(".X"))
        .or_else(|| version.strip_suffix(".*"))
}

fn numeric_parts(version: &str, spec: &str) -> Result<Vec<u64>, RangeParseError> {
    let core = version.split(['-', '+']).next().unwrap_or(version);
    core.split('.')
        .map(|p| {
            p.parse::<u64>()
                .map_err(|_| range_error(spec, format!("`{version}` is not a numeric version")))
        })
        .collect()
}

/// Increment the last component: `[1, 2]` becomes `"1.3"`.
fn bump(parts: &[u64], spec: &str) -> Result<String, RangeParseError> {
    let mut out: Vec<String> = parts.iter().map(|n| n.to_string()).collect();
    if let (Some(last), Some(&n)) = (out.last_mut(), parts.last()) {
        let next = n
            .checked_add(1)
            .ok_or_else(|| range_error(spec, format!("`{n}` has no next version")))?;
        *last = next.to_string();
    }
    Ok(out.join("."))
}

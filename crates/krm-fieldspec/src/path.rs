//! Path patterns and concrete field paths.
//!
//! A [`PathPattern`] is what users write into configuration, for example
//! `spec/template/spec/containers[]/image` or `spec.foo[1].c`. A
//! [`FieldPath`] is the concrete location of a single node inside one
//! resource, for example `spec.foo[1].c`.
use std::fmt;

use serde_yaml::Value;
use snafu::Snafu;

use crate::node::{child, scalar_text};

const ESCAPE: char = '\\';

#[derive(Debug, PartialEq, Snafu)]
pub enum PathError {
    #[snafu(display("path must not be empty"))]
    EmptyPath,

    #[snafu(display("path {path:?} contains an empty segment"))]
    EmptySegment { path: String },

    #[snafu(display("path {path:?} contains an unclosed bracket"))]
    UnclosedBracket { path: String },

    #[snafu(display("path {path:?} contains a closing bracket without an opening one"))]
    UnexpectedBracket { path: String },

    #[snafu(display("path {path:?} contains characters after a closing bracket"))]
    TrailingCharacters { path: String },

    #[snafu(display("path {path:?} contains the invalid selector {selector:?}"))]
    InvalidSelector { path: String, selector: String },

    #[snafu(display("path {path:?} ends with a dangling escape character"))]
    DanglingEscape { path: String },
}

/// The character separating the segments of a [`PathPattern`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delimiter {
    /// Used by field specs, e.g. `spec/location`.
    Slash,

    /// Used by search expressions, e.g. `spec.replicas`.
    Dot,
}

impl Delimiter {
    pub fn as_char(self) -> char {
        match self {
            Self::Slash => '/',
            Self::Dot => '.',
        }
    }
}

/// A single segment of a [`PathPattern`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// A mapping key.
    Field(String),

    /// A single sequence element, `[N]`.
    Index(usize),

    /// Every element of a sequence, `[]` or `[*]`.
    Elements,

    /// Sequence elements whose `key` field equals `value`, `[key=value]`.
    Select { key: String, value: String },

    /// Any single mapping key, `*`.
    AnyField,

    /// Zero or more levels of nesting, `**`.
    AnyDepth,
}

impl Segment {
    fn is_wildcard(&self) -> bool {
        matches!(self, Self::AnyField | Self::AnyDepth)
    }
}

/// A parsed path expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

#[derive(Default)]
struct RawSegment {
    name: String,
    escaped: bool,
    brackets: Vec<String>,
}

impl PathPattern {
    /// Parses a slash-delimited field spec path.
    pub fn parse_slashed(raw: &str) -> Result<Self, PathError> {
        Self::parse(raw, Delimiter::Slash)
    }

    /// Parses a dot-delimited search path.
    pub fn parse_dotted(raw: &str) -> Result<Self, PathError> {
        Self::parse(raw, Delimiter::Dot)
    }

    pub fn parse(raw: &str, delimiter: Delimiter) -> Result<Self, PathError> {
        if raw.trim().is_empty() {
            return EmptyPathSnafu.fail();
        }

        let mut segments = Vec::new();
        for raw_segment in split(raw.trim(), delimiter.as_char())? {
            parse_segment(raw, raw_segment, &mut segments)?;
        }

        Ok(Self {
            raw: raw.trim().to_owned(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` if the pattern consists of plain mapping keys only,
    /// so it addresses at most one node and can be created.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Field(_)))
    }

    pub fn has_wildcards(&self) -> bool {
        self.segments.iter().any(Segment::is_wildcard)
    }

    /// Checks whether the concrete `path` inside `root` is addressed by this
    /// pattern. Mapping keys and sequence indices have to line up exactly,
    /// a field segment never steps into a sequence implicitly.
    pub fn matches(&self, root: &Value, path: &FieldPath) -> bool {
        matches_from(&self.segments, path.steps(), root)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn split(raw: &str, delimiter: char) -> Result<Vec<RawSegment>, PathError> {
    let mut segments = Vec::new();
    let mut current = RawSegment::default();
    let mut bracket: Option<String> = None;
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c == ESCAPE {
            let Some(escaped) = chars.next() else {
                return DanglingEscapeSnafu { path: raw }.fail();
            };
            match bracket.as_mut() {
                Some(contents) => contents.push(escaped),
                None if !current.brackets.is_empty() => {
                    return TrailingCharactersSnafu { path: raw }.fail();
                }
                None => {
                    current.name.push(escaped);
                    current.escaped = true;
                }
            }
            continue;
        }

        if let Some(contents) = bracket.as_mut() {
            if c == ']' {
                current.brackets.push(std::mem::take(contents));
                bracket = None;
            } else {
                contents.push(c);
            }
            continue;
        }

        match c {
            '[' => bracket = Some(String::new()),
            ']' => return UnexpectedBracketSnafu { path: raw }.fail(),
            c if c == delimiter => segments.push(std::mem::take(&mut current)),
            _ if !current.brackets.is_empty() => {
                return TrailingCharactersSnafu { path: raw }.fail();
            }
            _ => current.name.push(c),
        }
    }

    if bracket.is_some() {
        return UnclosedBracketSnafu { path: raw }.fail();
    }
    segments.push(current);

    Ok(segments)
}

fn parse_segment(
    path: &str,
    raw: RawSegment,
    segments: &mut Vec<Segment>,
) -> Result<(), PathError> {
    if raw.name.is_empty() && raw.brackets.is_empty() {
        return EmptySegmentSnafu { path }.fail();
    }

    match (raw.name.as_str(), raw.escaped) {
        ("", _) => {}
        ("*", false) => segments.push(Segment::AnyField),
        ("**", false) => segments.push(Segment::AnyDepth),
        (name, _) => segments.push(Segment::Field(name.to_owned())),
    }

    for selector in raw.brackets {
        let segment = match selector.trim() {
            "" | "*" => Segment::Elements,
            digits if digits.chars().all(|c| c.is_ascii_digit()) => {
                let index = digits.parse().map_err(|_| {
                    InvalidSelectorSnafu {
                        path,
                        selector: &selector,
                    }
                    .build()
                })?;
                Segment::Index(index)
            }
            other => match other.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => Segment::Select {
                    key: key.trim().to_owned(),
                    value: value.trim().to_owned(),
                },
                _ => {
                    return InvalidSelectorSnafu {
                        path,
                        selector: &selector,
                    }
                    .fail();
                }
            },
        };
        segments.push(segment);
    }

    Ok(())
}

fn matches_from(segments: &[Segment], steps: &[Step], node: &Value) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return steps.is_empty();
    };

    if *segment == Segment::AnyDepth {
        let mut current = Some(node);
        for skip in 0..=steps.len() {
            let Some(at) = current else {
                return false;
            };
            if matches_from(rest, &steps[skip..], at) {
                return true;
            }
            current = steps.get(skip).and_then(|step| child(at, step));
        }
        return false;
    }

    let Some((step, remaining)) = steps.split_first() else {
        return false;
    };
    let Some(next) = child(node, step) else {
        return false;
    };

    let segment_matches = match (segment, step) {
        (Segment::Field(name), Step::Key(key)) => name == key,
        (Segment::AnyField, Step::Key(_)) => true,
        (Segment::Index(index), Step::Index(at)) => index == at,
        (Segment::Elements, Step::Index(_)) => true,
        (Segment::Select { key, value }, Step::Index(_)) => next
            .as_mapping()
            .and_then(|mapping| mapping.get(key.as_str()))
            .and_then(scalar_text)
            .is_some_and(|text| &text == value),
        _ => false,
    };

    segment_matches && matches_from(rest, remaining, next)
}

/// One step of a [`FieldPath`].
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// The concrete location of a node inside a resource.
///
/// It is displayed the same way search results are reported, for example
/// `spec.foo[1].c`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct FieldPath(Vec<Step>);

impl FieldPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, step: Step) {
        self.0.push(step);
    }

    pub fn pop(&mut self) -> Option<Step> {
        self.0.pop()
    }

    pub fn last(&self) -> Option<&Step> {
        self.0.last()
    }

    /// Returns a copy of `self` extended by `step`.
    pub fn join(&self, step: Step) -> Self {
        let mut path = self.clone();
        path.push(step);
        path
    }

    /// Returns the path of the enclosing node, or [`None`] for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }
}

impl From<Vec<Step>> for FieldPath {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}

impl<S: Into<String>> FromIterator<S> for FieldPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(|key| Step::Key(key.into())).collect())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                Step::Key(key) if i == 0 => f.write_str(key)?,
                Step::Key(key) => write!(f, ".{key}")?,
                Step::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

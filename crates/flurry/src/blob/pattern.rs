//! Blob path templates such as `input/{name}.csv`.
//!
//! A template is a literal container followed by a blob name made of
//! literals and `{parameter}` placeholders. Parameters stay inside one path
//! segment, except a trailing parameter which takes the rest of the name.
//! When a template ends in `.{param}`, the parameter before the dot is
//! greedy so the trailing parameter binds only the final extension.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use flurry_core::BlobPath;

use crate::error::{
    AdjacentParametersSnafu, CompileSnafu, DuplicateParameterSnafu, InvalidParameterNameSnafu,
    InvalidResolvedPathSnafu, MissingBlobNameSnafu, ParameterInContainerSnafu, PatternError,
    UnboundParameterSnafu, UnclosedParameterSnafu, UnopenedParameterSnafu,
};

/// Parameter values captured from a matching blob path.
pub type Bindings = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

/// A parsed blob path template.
#[derive(Debug, Clone)]
pub struct BlobPathPattern {
    raw: String,
    container: String,
    segments: Vec<Segment>,
    matcher: Regex,
}

impl PartialEq for BlobPathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.container == other.container && self.segments == other.segments
    }
}

impl Eq for BlobPathPattern {}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn tokenize(pattern: &str, blob: &str) -> Result<Vec<Segment>, PatternError> {
    let mut segments = Vec::new();
    let mut rest = blob;

    while !rest.is_empty() {
        match (rest.find('{'), rest.find('}')) {
            (_, Some(close)) if rest.find('{').is_none_or(|open| close < open) => {
                return UnopenedParameterSnafu { pattern }.fail();
            }
            (Some(open), close) => {
                let close = close.context(UnclosedParameterSnafu { pattern })?;
                if open > 0 {
                    segments.push(Segment::Literal(rest[..open].to_string()));
                }
                let name = &rest[open + 1..close];
                ensure!(
                    is_valid_name(name),
                    InvalidParameterNameSnafu { pattern, name }
                );
                if let Some(Segment::Parameter(previous)) = segments.last() {
                    return AdjacentParametersSnafu {
                        first: previous.clone(),
                        second: name,
                    }
                    .fail();
                }
                ensure!(
                    !segments.contains(&Segment::Parameter(name.to_string())),
                    DuplicateParameterSnafu { pattern, name }
                );
                segments.push(Segment::Parameter(name.to_string()));
                rest = &rest[close + 1..];
            }
            (None, _) => {
                segments.push(Segment::Literal(rest.to_string()));
                rest = "";
            }
        }
    }

    Ok(segments)
}

fn compile(pattern: &str, segments: &[Segment]) -> Result<Regex, PatternError> {
    let last = segments.len().saturating_sub(1);
    let mut expr = String::from("^");

    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Literal(text) => expr.push_str(&regex::escape(text)),
            Segment::Parameter(name) if i == last => {
                expr.push_str(&format!("(?P<{name}>.+)"));
            }
            Segment::Parameter(name) => {
                let before_extension = i + 2 == segments.len()
                    && matches!(&segments[i + 1], Segment::Literal(l) if l == ".");
                let before_final_extension = matches!(
                    (&segments.get(i + 1), &segments.get(i + 2)),
                    (Some(Segment::Literal(l)), Some(Segment::Parameter(_))) if l == "." && i + 2 == last
                );
                let quantifier = if before_extension || before_final_extension {
                    "+"
                } else {
                    "+?"
                };
                expr.push_str(&format!("(?P<{name}>[^/]{quantifier})"));
            }
        }
    }
    expr.push('$');

    Regex::new(&expr).context(CompileSnafu { pattern })
}

impl BlobPathPattern {
    /// Parse a `container/blob` template.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let normalized = pattern.replace('\\', "/");
        let trimmed = normalized.trim_matches('/');
        let (container, blob) = trimmed
            .split_once('/')
            .filter(|(c, b)| !c.is_empty() && !b.is_empty())
            .context(MissingBlobNameSnafu { pattern })?;

        ensure!(
            !container.contains(['{', '}']),
            ParameterInContainerSnafu { container }
        );

        let segments = tokenize(pattern, blob)?;
        let matcher = compile(pattern, &segments)?;

        Ok(Self {
            raw: trimmed.to_string(),
            container: container.to_ascii_lowercase(),
            segments,
            matcher,
        })
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Parameter names in the order they appear.
    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Parameter(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Match `path` against the template, returning captured parameters.
    pub fn matches(&self, path: &BlobPath) -> Option<Bindings> {
        if path.container() != self.container {
            return None;
        }
        let caps = self.matcher.captures(path.name())?;
        Some(
            self.parameter_names()
                .filter_map(|name| Some((name.to_string(), caps.name(name)?.as_str().to_string())))
                .collect(),
        )
    }

    /// Substitute `bindings` into the template.
    pub fn apply_names(&self, bindings: &Bindings) -> Result<BlobPath, PatternError> {
        let mut name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => name.push_str(text),
                Segment::Parameter(param) => {
                    let value = bindings.get(param).context(UnboundParameterSnafu {
                        pattern: self.raw.as_str(),
                        name: param.as_str(),
                    })?;
                    name.push_str(value);
                }
            }
        }
        let path = format!("{}/{}", self.container, name);
        BlobPath::parse(&path).context(InvalidResolvedPathSnafu { path })
    }
}

impl fmt::Display for BlobPathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for BlobPathPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlobPathPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for BlobPathPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

/// Placeholder values extracted from a request path.
pub type PathParams = BTreeMap<String, String>;

/// Errors produced while compiling a path template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("path template '{template}' declares placeholder '{name}' more than once")]
    DuplicatePlaceholder { template: String, name: String },

    #[error("path template '{template}' uses greedy placeholder '{name}+' before the end")]
    GreedyNotLast { template: String, name: String },

    #[error("path template '{template}' has an unbalanced or empty placeholder")]
    MalformedPlaceholder { template: String },

    #[error("path template '{template}' failed to compile: {reason}")]
    Pattern { template: String, reason: String },
}

/// A parsed template piece.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    /// `{name}`: one path segment, never spans `/`.
    Param(String),
    /// `{name+}`: the remainder of the path, `/` included.
    Greedy(String),
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct RouteTemplate {
    source: String,
    pattern: Regex,
    names: Vec<String>,
}

impl RouteTemplate {
    /// Compile a template such as `/items/{id}` or `/files/{path+}`.
    pub fn compile(template: &str) -> Result<Self, RouteError> {
        let pieces = parse_path_template(template)?;

        let mut names: Vec<String> = Vec::new();
        let mut pattern = String::from("^");
        for (index, piece) in pieces.iter().enumerate() {
            match piece {
                Piece::Literal(text) => pattern.push_str(&regex::escape(text)),
                Piece::Param(name) | Piece::Greedy(name) => {
                    if names.contains(name) {
                        return Err(RouteError::DuplicatePlaceholder {
                            template: template.to_string(),
                            name: name.clone(),
                        });
                    }
                    if matches!(piece, Piece::Greedy(_)) {
                        if index + 1 != pieces.len() {
                            return Err(RouteError::GreedyNotLast {
                                template: template.to_string(),
                                name: name.clone(),
                            });
                        }
                        pattern.push_str("(.*)");
                    } else {
                        pattern.push_str("([^/]+)");
                    }
                    names.push(name.clone());
                }
            }
        }
        pattern.push('$');

        let pattern = Regex::new(&pattern).map_err(|e| RouteError::Pattern {
            template: template.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: template.to_string(),
            pattern,
            names,
        })
    }

    /// The template text this matcher was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in positional order.
    pub fn placeholders(&self) -> &[String] {
        &self.names
    }

    /// Match a request path, returning the captured placeholder values.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let captures = self.pattern.captures(path)?;
        let params = self
            .names
            .iter()
            .enumerate()
            .filter_map(|(i, name)| {
                captures
                    .get(i + 1)
                    .map(|m| (name.clone(), m.as_str().to_string()))
            })
            .collect();
        Some(params)
    }
}

/// Split a template into literal text and placeholders.
fn parse_path_template(template: &str) -> Result<Vec<Piece>, RouteError> {
    let malformed = || RouteError::MalformedPlaceholder {
        template: template.to_string(),
    };

    let mut pieces = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find(['{', '}']) {
        if rest.as_bytes()[open] == b'}' {
            return Err(malformed());
        }
        if open > 0 {
            pieces.push(Piece::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(malformed)?;
        let inner = &after[..close];
        if inner.contains('{') {
            return Err(malformed());
        }
        let piece = match inner.strip_suffix('+') {
            Some(name) if is_placeholder_name(name) => Piece::Greedy(name.to_string()),
            None if is_placeholder_name(inner) => Piece::Param(inner.to_string()),
            _ => return Err(malformed()),
        };
        pieces.push(piece);
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_string()));
    }
    Ok(pieces)
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

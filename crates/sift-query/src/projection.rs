use std::iter::Peekable;
use std::vec::IntoIter;

use bson::{Bson, Document};

use crate::error::QueryError;

/// Marker for an included field.
pub const INCLUDE: i32 = 1;
/// Marker for an excluded field.
pub const EXCLUDE: i32 = 0;

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionNode {
    /// Take (or drop) the whole field.
    Marker(i32),
    /// Recurse into sub-fields.
    Nested(Projection),
}

impl From<i32> for ProjectionNode {
    fn from(marker: i32) -> Self {
        ProjectionNode::Marker(marker)
    }
}

impl From<Projection> for ProjectionNode {
    fn from(tree: Projection) -> Self {
        ProjectionNode::Nested(tree)
    }
}

/// A nested field selection.
///
/// Given `name friends { name } friends.friend.name`, parses to:
/// ```text
/// { "name": 1, "friends": { "name": 1 }, "friends.friend.name": 1 }
/// ```
///
/// Keys keep first-seen order. Dotted keys stay flat as parsed; use
/// [`Projection::canonical`] to expand them into nesting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    entries: Vec<(String, ProjectionNode)>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the selection DSL with the include marker.
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        Self::parse_with_marker(input, INCLUDE)
    }

    /// Parse the selection DSL, marking every leaf with `marker`.
    pub fn parse_with_marker(input: &str, marker: i32) -> Result<Self, QueryError> {
        let mut tokens = tokenize(input)?.into_iter().peekable();
        parse_group(input, &mut tokens, marker, false)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&ProjectionNode> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, n)| n)
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut ProjectionNode> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, n)| n)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ProjectionNode)> {
        self.entries.iter().map(|(k, n)| (k.as_str(), n))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Set `key` to `node`, replacing any existing entry in place.
    pub fn insert(&mut self, key: impl Into<String>, node: impl Into<ProjectionNode>) {
        let key = key.into();
        let node = node.into();
        match self.get_mut(&key) {
            Some(existing) => *existing = node,
            None => self.entries.push((key, node)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ProjectionNode> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Union `node` into `key`. Two subtrees merge recursively; a marker on
    /// either side takes the whole field.
    pub fn merge_entry(&mut self, key: impl Into<String>, node: impl Into<ProjectionNode>) {
        let key = key.into();
        let node = node.into();
        match self.get_mut(&key) {
            None => self.entries.push((key, node)),
            Some(existing) => match (existing, node) {
                (ProjectionNode::Nested(current), ProjectionNode::Nested(incoming)) => {
                    current.merge(&incoming);
                }
                (ProjectionNode::Marker(_), _) => {}
                (existing, marker @ ProjectionNode::Marker(_)) => *existing = marker,
            },
        }
    }

    /// Union every entry of `other` into `self`.
    pub fn merge(&mut self, other: &Projection) {
        for (key, node) in &other.entries {
            self.merge_entry(key.clone(), node.clone());
        }
    }

    /// Union `node` in at a dotted `path`, creating nested levels.
    pub fn merge_path(&mut self, path: &str, node: impl Into<ProjectionNode>) {
        let node = node.into();
        match path.split_once('.') {
            None => self.merge_entry(path, node),
            Some((head, rest)) => {
                let mut sub = Projection::new();
                sub.merge_path(rest, node);
                self.merge_entry(head, ProjectionNode::Nested(sub));
            }
        }
    }

    /// Overwrite whatever sits at a dotted `path` with `node`. A marker on an
    /// ancestor already covers the path and is left alone.
    pub fn replace_path(&mut self, path: &str, node: impl Into<ProjectionNode>) {
        let node = node.into();
        match path.split_once('.') {
            None => self.insert(path, node),
            Some((head, rest)) => match self.get_mut(head) {
                Some(ProjectionNode::Marker(_)) => {}
                Some(ProjectionNode::Nested(sub)) => sub.replace_path(rest, node),
                None => {
                    let mut sub = Projection::new();
                    sub.replace_path(rest, node);
                    self.insert(head, ProjectionNode::Nested(sub));
                }
            },
        }
    }

    /// Expand dotted keys into nesting, union-merging fields that appear in
    /// both forms (`a { b }` and `a.c` become `a { b c }`).
    pub fn canonical(&self) -> Projection {
        let mut out = Projection::new();
        for (key, node) in &self.entries {
            let node = match node {
                ProjectionNode::Nested(sub) => ProjectionNode::Nested(sub.canonical()),
                marker => marker.clone(),
            };
            out.merge_path(key, node);
        }
        out
    }

    /// A copy of `self` with every field named in `to_remove` deleted.
    ///
    /// A marker in `to_remove` deletes the whole field. A subtree deletes only
    /// the overlapping sub-fields, and a field left empty is deleted too.
    /// Dotted keys on either side count as the equivalent nesting.
    pub fn without(&self, to_remove: &Projection) -> Projection {
        let removal = to_remove.canonical();
        let mut out = Projection::new();
        for (key, node) in &self.entries {
            if let Some(kept) = prune(key, node, &removal) {
                out.entries.push((key.clone(), kept));
            }
        }
        out
    }

    /// Render as a `$project` document.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (key, node) in &self.entries {
            let value = match node {
                ProjectionNode::Marker(marker) => Bson::Int32(*marker),
                ProjectionNode::Nested(sub) => Bson::Document(sub.to_document()),
            };
            doc.insert(key.clone(), value);
        }
        doc
    }
}

impl<K: Into<String>, N: Into<ProjectionNode>> FromIterator<(K, N)> for Projection {
    fn from_iter<I: IntoIterator<Item = (K, N)>>(iter: I) -> Self {
        let mut tree = Projection::new();
        for (key, node) in iter {
            tree.insert(key, node);
        }
        tree
    }
}

fn prune(key: &str, node: &ProjectionNode, removal: &Projection) -> Option<ProjectionNode> {
    let mut level = removal;
    for segment in key.split('.') {
        match level.get(segment) {
            None => return Some(node.clone()),
            Some(ProjectionNode::Marker(_)) => return None,
            Some(ProjectionNode::Nested(sub)) => level = sub,
        }
    }
    match node {
        // The whole field was requested but part of it is protected.
        ProjectionNode::Marker(_) => None,
        ProjectionNode::Nested(sub) => {
            let rest = sub.without(level);
            (!rest.is_empty()).then_some(ProjectionNode::Nested(rest))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Open,
    Close,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            '{' => {
                tokens.push(Token::Open);
                chars.next();
            }
            '}' => {
                tokens.push(Token::Close);
                chars.next();
            }
            c if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            c if is_ident_char(c) => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !is_ident_char(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                let ident = &input[start..end];
                if ident.split('.').any(str::is_empty) {
                    return Err(QueryError::projection(
                        input,
                        format!("empty path segment in {ident:?}"),
                    ));
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(QueryError::projection(
                    input,
                    format!("unexpected character {other:?} at offset {start}"),
                ));
            }
        }
    }

    Ok(tokens)
}

fn parse_group(
    input: &str,
    tokens: &mut Peekable<IntoIter<Token<'_>>>,
    marker: i32,
    nested: bool,
) -> Result<Projection, QueryError> {
    let mut tree = Projection::new();

    loop {
        match tokens.next() {
            None if nested => return Err(QueryError::projection(input, "unclosed '{'")),
            None => return Ok(tree),
            Some(Token::Close) if nested => {
                if tree.is_empty() {
                    return Err(QueryError::projection(input, "empty '{ }' group"));
                }
                return Ok(tree);
            }
            Some(Token::Close) => return Err(QueryError::projection(input, "unbalanced '}'")),
            Some(Token::Open) => {
                return Err(QueryError::projection(input, "'{' must follow a field name"));
            }
            Some(Token::Ident(name)) => {
                if tokens.next_if_eq(&Token::Open).is_some() {
                    let sub = parse_group(input, tokens, marker, true)?;
                    tree.merge_entry(name, ProjectionNode::Nested(sub));
                } else {
                    tree.merge_entry(name, ProjectionNode::Marker(marker));
                }
            }
        }
    }
}

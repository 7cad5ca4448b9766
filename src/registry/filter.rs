// src/registry/filter.rs

//! LDAP-style filter expressions over registration properties.
//!
//! Supported grammar:
//!
//! ```text
//! filter  = "(" ( "&" filter+ | "|" filter+ | "!" filter | item ) ")"
//! item    = attr "=" value
//! value   = any characters; "*" is a wildcard, "\" escapes the next char
//! ```
//!
//! A value of exactly `*` tests for presence of the attribute. Attribute
//! names compare case-insensitively, values case-sensitively.

use std::fmt;
use std::str::FromStr;

use super::{Properties, OBJECT_CLASS, PROVIDER_INTERFACE, SERVICE_PID};
use crate::{PublishError, Result};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Equal(String, String),
    Substring(String, Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Star,
}

impl Filter {
    /// Parse a filter expression.
    pub fn parse(source: &str) -> Result<Self> {
        // ---
        let mut parser = Parser {
            input: source.as_bytes(),
            src: source,
            pos: 0,
        };
        parser.skip_ws();
        let root = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.input.len() {
            return Err(parser.error("unexpected input after filter"));
        }

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Filter selecting transport providers whose persistent id equals `pid`.
    ///
    /// `pid` is spliced in verbatim, so a selector containing filter syntax
    /// changes the expression or makes it unparseable.
    pub fn for_provider(pid: &str) -> Result<Self> {
        Self::parse(&format!(
            "(&({OBJECT_CLASS}={PROVIDER_INTERFACE})({SERVICE_PID}={pid}))"
        ))
    }

    /// Evaluate the filter against a property set.
    pub fn matches(&self, props: &Properties) -> bool {
        self.root.matches(props)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Filter {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Node {
    fn matches(&self, props: &Properties) -> bool {
        match self {
            Node::And(children) => children.iter().all(|c| c.matches(props)),
            Node::Or(children) => children.iter().any(|c| c.matches(props)),
            Node::Not(child) => !child.matches(props),
            Node::Present(attr) => lookup(props, attr).is_some(),
            Node::Equal(attr, value) => lookup(props, attr) == Some(value.as_str()),
            Node::Substring(attr, segments) => {
                lookup(props, attr).is_some_and(|v| wildcard_match(v, segments))
            }
        }
    }
}

fn lookup<'a>(props: &'a Properties, attr: &str) -> Option<&'a str> {
    props
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(attr))
        .map(|(_, v)| v.as_str())
}

fn wildcard_match(value: &str, segments: &[Segment]) -> bool {
    // ---
    let mut rest = value;
    let mut anchored = true;

    for (i, segment) in segments.iter().enumerate() {
        match segment {
            Segment::Star => anchored = false,
            Segment::Literal(lit) => {
                let last = i == segments.len() - 1;
                if anchored {
                    match rest.strip_prefix(lit.as_str()) {
                        Some(r) => rest = r,
                        None => return false,
                    }
                } else if last {
                    return rest.ends_with(lit.as_str());
                } else {
                    match rest.find(lit.as_str()) {
                        Some(at) => rest = &rest[at + lit.len()..],
                        None => return false,
                    }
                }
                anchored = true;
            }
        }
    }

    // A trailing star swallows the rest; otherwise everything must be consumed.
    matches!(segments.last(), Some(Segment::Star)) || rest.is_empty()
}

struct Parser<'a> {
    input: &'a [u8],
    src: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> PublishError {
        PublishError::FilterSyntax(format!("{what} at offset {} in `{}`", self.pos, self.src))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected `{}`", byte as char)))
        }
    }

    fn filter(&mut self) -> Result<Node> {
        // ---
        self.expect(b'(')?;
        self.skip_ws();

        let node = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Node::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Node::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                Node::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unterminated filter")),
        };

        self.skip_ws();
        self.expect(b')')?;
        Ok(node)
    }

    fn filter_list(&mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() != Some(b'(') {
                break;
            }
            nodes.push(self.filter()?);
        }
        if nodes.is_empty() {
            return Err(self.error("operator needs at least one operand"));
        }
        Ok(nodes)
    }

    fn item(&mut self) -> Result<Node> {
        // ---
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'(' | b')' | b'&' | b'|' | b'!' | b'<' | b'>' | b'~') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.src[start..self.pos].trim();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        let attr = attr.to_string();

        if self.peek() != Some(b'=') {
            return Err(self.error("only `=` comparisons are supported"));
        }
        self.pos += 1;

        let segments = self.value()?;
        Ok(match segments.as_slice() {
            [Segment::Star] => Node::Present(attr),
            [] => Node::Equal(attr, String::new()),
            [Segment::Literal(lit)] => Node::Equal(attr, lit.clone()),
            _ => Node::Substring(attr, segments),
        })
    }

    fn value(&mut self) -> Result<Vec<Segment>> {
        // ---
        let mut segments = Vec::new();
        let mut literal: Vec<u8> = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(b')') => break,
                Some(b'(') => return Err(self.error("unescaped `(` in value")),
                Some(b'*') => {
                    self.pos += 1;
                    flush(&mut literal, &mut segments);
                    if !matches!(segments.last(), Some(Segment::Star)) {
                        segments.push(Segment::Star);
                    }
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            literal.push(b);
                            self.pos += 1;
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(b) => {
                    literal.push(b);
                    self.pos += 1;
                }
            }
        }

        flush(&mut literal, &mut segments);
        Ok(segments)
    }
}

fn flush(literal: &mut Vec<u8>, segments: &mut Vec<Segment>) {
    if !literal.is_empty() {
        // Input came from a &str and escapes only split at ASCII bytes.
        let text = String::from_utf8_lossy(literal).into_owned();
        segments.push(Segment::Literal(text));
        literal.clear();
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn provider_filter_matches_interface_and_pid() {
        // ---
        let filter = Filter::for_provider("cloud-1").unwrap();

        let good = props(&[(OBJECT_CLASS, PROVIDER_INTERFACE), (SERVICE_PID, "cloud-1")]);
        let other_pid = props(&[(OBJECT_CLASS, PROVIDER_INTERFACE), (SERVICE_PID, "cloud-2")]);
        let other_iface = props(&[(OBJECT_CLASS, "something.Else"), (SERVICE_PID, "cloud-1")]);

        assert!(filter.matches(&good));
        assert!(!filter.matches(&other_pid));
        assert!(!filter.matches(&other_iface));
    }

    #[test]
    fn attribute_names_ignore_case() {
        // ---
        let filter = Filter::parse("(SERVICE.PID=abc)").unwrap();
        assert!(filter.matches(&props(&[("service.pid", "abc")])));
        assert!(!filter.matches(&props(&[("service.pid", "ABC")])));
    }

    #[test]
    fn or_not_and_presence() {
        // ---
        let filter = Filter::parse("(|(a=1)(!(b=*)))").unwrap();
        assert!(filter.matches(&props(&[("a", "1"), ("b", "x")])));
        assert!(filter.matches(&props(&[("a", "2")])));
        assert!(!filter.matches(&props(&[("a", "2"), ("b", "x")])));
    }

    #[test]
    fn substring_wildcards() {
        // ---
        let filter = Filter::parse("(pid=cloud-*-eu*)").unwrap();
        assert!(filter.matches(&props(&[("pid", "cloud-main-eu")])));
        assert!(filter.matches(&props(&[("pid", "cloud-x-eu-west")])));
        assert!(!filter.matches(&props(&[("pid", "cloud-main-us")])));

        let suffix = Filter::parse("(pid=*service)").unwrap();
        assert!(suffix.matches(&props(&[("pid", "cloud.service")])));
        assert!(!suffix.matches(&props(&[("pid", "cloud.services")])));
    }

    #[test]
    fn escaped_characters_are_literal() {
        // ---
        let filter = Filter::parse(r"(pid=a\*b\(c\))").unwrap();
        assert!(filter.matches(&props(&[("pid", "a*b(c)")])));
        assert!(!filter.matches(&props(&[("pid", "axxb(c)")])));
    }

    #[test]
    fn malformed_expressions_are_syntax_errors() {
        // ---
        for bad in ["", "(", "(a=1", "a=1", "(&)", "(=1)", "(a~=1)", "(a=1))", "(a=(b)"] {
            let err = Filter::parse(bad).unwrap_err();
            assert!(
                matches!(err, PublishError::FilterSyntax(_)),
                "`{bad}` gave {err:?}"
            );
        }
    }

    #[test]
    fn selector_with_filter_syntax_breaks_provider_filter() {
        // ---
        let err = Filter::for_provider("bad)pid(").unwrap_err();
        assert!(matches!(err, PublishError::FilterSyntax(_)));
    }
}

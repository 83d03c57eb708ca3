//! Statement model: terms, triples, patterns, and context keys.
//!
//! [`Term`] is a closed tagged union. Nothing outside this module extends it,
//! which keeps revision payloads decodable by any engine version that knows
//! the schema tag.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TermError;

/// The set of triples currently held by one context.
pub type TripleSet = HashSet<Triple>;

/// A single RDF-style term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// A resource identifier.
    Iri(String),
    /// A literal value, optionally annotated with a datatype or a language.
    Literal {
        lexical: String,
        annotation: LiteralAnnotation,
    },
    /// A blank node label, without the `_:` prefix.
    Blank(String),
}

/// What qualifies a literal's lexical form. A literal carries a datatype IRI
/// or a language tag, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LiteralAnnotation {
    #[default]
    Plain,
    Datatype(String),
    Language(String),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    /// A plain literal with neither datatype nor language.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            annotation: LiteralAnnotation::Plain,
        }
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            annotation: LiteralAnnotation::Datatype(datatype.into()),
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            annotation: LiteralAnnotation::Language(language.into()),
        }
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// Parse a term written in N-Triples syntax.
    ///
    /// Accepts `<iri>`, `_:label`, `"lexical"`, `"lexical"@lang` and
    /// `"lexical"^^<datatype>`. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, TermError> {
        let s = input.trim();
        let invalid = |message: &str| TermError::Invalid {
            input: input.to_string(),
            message: message.to_string(),
        };

        if let Some(rest) = s.strip_prefix('<') {
            let iri = rest
                .strip_suffix('>')
                .ok_or_else(|| invalid("IRI is missing its closing '>'"))?;
            if iri.is_empty() || iri.contains(['<', '>', ' ']) {
                return Err(invalid("IRI is empty or contains '<', '>' or spaces"));
            }
            return Ok(Term::Iri(iri.to_string()));
        }

        if let Some(label) = s.strip_prefix("_:") {
            if label.is_empty() || label.contains(char::is_whitespace) {
                return Err(invalid("blank node label is empty or contains whitespace"));
            }
            return Ok(Term::Blank(label.to_string()));
        }

        if let Some(rest) = s.strip_prefix('"') {
            let mut lexical = String::new();
            let mut chars = rest.char_indices();
            let mut end = None;
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        let (_, esc) = chars
                            .next()
                            .ok_or_else(|| invalid("dangling escape at end of literal"))?;
                        lexical.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            '"' => '"',
                            '\\' => '\\',
                            _ => return Err(invalid("unknown escape sequence")),
                        });
                    }
                    '"' => {
                        end = Some(i + 1);
                        break;
                    }
                    _ => lexical.push(c),
                }
            }
            let end = end.ok_or_else(|| invalid("literal is missing its closing quote"))?;
            let suffix = &rest[end..];

            if suffix.is_empty() {
                return Ok(Term::literal(lexical));
            }
            if let Some(lang) = suffix.strip_prefix('@') {
                if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err(invalid("language tag must be non-empty ASCII alphanumerics"));
                }
                return Ok(Term::lang_literal(lexical, lang));
            }
            if let Some(dt) = suffix.strip_prefix("^^") {
                return match Term::parse(dt)? {
                    Term::Iri(dt) => Ok(Term::typed_literal(lexical, dt)),
                    _ => Err(invalid("datatype must be an IRI")),
                };
            }
            return Err(invalid("unexpected characters after literal"));
        }

        Err(invalid("expected '<', '\"' or '_:'"))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal {
                lexical,
                annotation,
            } => {
                f.write_str("\"")?;
                for c in lexical.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\r' => f.write_str("\\r")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")?;
                match annotation {
                    LiteralAnnotation::Plain => Ok(()),
                    LiteralAnnotation::Datatype(dt) => write!(f, "^^<{dt}>"),
                    LiteralAnnotation::Language(lang) => write!(f, "@{lang}"),
                }
            }
        }
    }
}

/// A (subject, predicate, object) statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: Term, object: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} .", self.subject, self.predicate, self.object)
    }
}

/// A triple with wildcard slots. `None` matches any term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TriplePattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
}

impl TriplePattern {
    /// The pattern `(*, *, *)`.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn new(subject: Option<Term>, predicate: Option<Term>, object: Option<Term>) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    pub fn matches(&self, triple: &Triple) -> bool {
        slot_matches(&self.subject, &triple.subject)
            && slot_matches(&self.predicate, &triple.predicate)
            && slot_matches(&self.object, &triple.object)
    }

    /// True when every slot is a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.subject.is_none() && self.predicate.is_none() && self.object.is_none()
    }

    /// The concrete triple when no slot is a wildcard.
    pub fn as_triple(&self) -> Option<Triple> {
        Some(Triple::new(
            self.subject.clone()?,
            self.predicate.clone()?,
            self.object.clone()?,
        ))
    }
}

impl From<&Triple> for TriplePattern {
    fn from(t: &Triple) -> Self {
        Self::new(
            Some(t.subject.clone()),
            Some(t.predicate.clone()),
            Some(t.object.clone()),
        )
    }
}

fn slot_matches(slot: &Option<Term>, term: &Term) -> bool {
    slot.as_ref().is_none_or(|s| s == term)
}

/// Identifies a named graph. `None` is the default (unnamed) context.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContextKey(Option<String>);

impl ContextKey {
    pub fn named(name: impl Into<String>) -> Self {
        ContextKey(Some(name.into()))
    }

    /// The default (unnamed) context.
    pub fn unnamed() -> Self {
        ContextKey(None)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.0.is_none()
    }
}

impl From<&str> for ContextKey {
    fn from(name: &str) -> Self {
        ContextKey::named(name)
    }
}

impl From<Option<String>> for ContextKey {
    fn from(name: Option<String>) -> Self {
        ContextKey(name)
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => write!(f, "{name:?}"),
            None => f.write_str("(default)"),
        }
    }
}

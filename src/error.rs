//! Error types for grammar construction, parsing, capability/conversion
//! resolution and tree serialization
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures their layer can produce. Structural mismatches during a parse
//! are not errors - they are recovered through traceback - so [`ParseError`]
//! only carries the failures that survive to the caller.

use crate::location::Location;
use std::fmt;

/// Error raised while building or validating a [`Grammar`](crate::Grammar)
#[derive(Debug, Clone)]
pub enum GrammarError {
    /// Two productions were declared with the same name
    DuplicateType {
        /// The conflicting production name
        name: String,
    },

    /// A production was declared but never given a shape
    UndefinedType {
        /// The declared-only production name
        name: String,
    },

    /// A variant production was defined without any cases
    EmptyVariant {
        /// The variant production name
        name: String,
    },

    /// A pattern terminal carries an invalid regular expression
    InvalidPattern {
        /// The terminal production name
        type_name: String,
        /// The offending pattern
        pattern: String,
        /// Why the pattern failed to compile
        reason: String,
    },

    /// A package override maps a production onto one that is not its subtype
    OverrideNotSubtype {
        /// The overridden production name
        from: String,
        /// The overriding production name
        to: String,
    },

    /// The grammar contains no productions
    NoTypes,
}

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarError::DuplicateType { name } => {
                write!(f, "duplicate production type '{}'", name)
            }
            GrammarError::UndefinedType { name } => {
                write!(f, "production type '{}' was declared but never defined", name)
            }
            GrammarError::EmptyVariant { name } => {
                write!(f, "variant production '{}' has no cases", name)
            }
            GrammarError::InvalidPattern {
                type_name,
                pattern,
                reason,
            } => {
                write!(
                    f,
                    "invalid pattern '{}' on terminal '{}': {}",
                    pattern, type_name, reason
                )
            }
            GrammarError::OverrideNotSubtype { from, to } => {
                write!(
                    f,
                    "override type '{}' is not a subtype of overridden type '{}'",
                    to, from
                )
            }
            GrammarError::NoTypes => write!(f, "grammar contains no production types"),
        }
    }
}

impl std::error::Error for GrammarError {}

/// Error returned by [`Parser::parse`](crate::Parser::parse)
#[derive(Debug, Clone)]
pub enum ParseError {
    /// Backtracking exhausted every alternative up to the root
    Failed {
        /// Name of the parsed source, as given to `parse`
        source: String,
        /// The furthest position any match attempt reached
        furthest: Location,
    },

    /// A production type name was not found in the grammar
    UnknownType {
        /// The unknown production name
        name: String,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Failed { source, furthest } => {
                write!(
                    f,
                    "parse of '{}' failed at line {}, column {} (offset {})",
                    source, furthest.line, furthest.column, furthest.offset
                )
            }
            ParseError::UnknownType { name } => {
                write!(f, "unknown production type '{}'", name)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Error raised by capability and conversion resolution
///
/// Absence and ambiguity are fatal and deterministic: the same call fails
/// the same way every time and leaves no partial cache state behind.
#[derive(Debug, Clone)]
pub enum ResolveError {
    /// No registered provider answers the requested capability
    CapabilityNotFound {
        /// The requested capability name
        capability: String,
        /// The runtime type of the rule being extended
        rule_type: String,
    },

    /// More than one registered provider answers the requested capability
    AmbiguousCapability {
        /// The requested capability name
        capability: String,
        /// Names of all eligible providers
        candidates: Vec<String>,
    },

    /// No registered converter produces the requested target type
    ConversionNotFound {
        /// The rule's declaring type name
        from: String,
        /// The requested target type name
        to: String,
    },

    /// More than one registered converter produces the requested target type
    AmbiguousConversion {
        /// The rule's declaring type name
        from: String,
        /// The requested target type name
        to: String,
        /// Names of all eligible converters
        candidates: Vec<String>,
    },

    /// A provider or converter constructor failed
    Instantiation {
        /// What was being constructed, with source/target type names
        what: String,
        /// The constructor's failure message
        reason: String,
    },

    /// A resolved converter failed while transforming a rule
    ConversionFailed {
        /// The rule's declaring type name
        from: String,
        /// The requested target type name
        to: String,
        /// The converter's failure message
        reason: String,
    },

    /// An extension was queried before its base rule was bound
    Unbound,

    /// An extension's base rule was bound twice
    AlreadyBound,
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::CapabilityNotFound {
                capability,
                rule_type,
            } => {
                write!(
                    f,
                    "no provider found for capability '{}' on rule type '{}'",
                    capability, rule_type
                )
            }
            ResolveError::AmbiguousCapability {
                capability,
                candidates,
            } => {
                write!(
                    f,
                    "too many providers for capability '{}': {}",
                    capability,
                    candidates.join(", ")
                )
            }
            ResolveError::ConversionNotFound { from, to } => {
                write!(f, "no converter from '{}' to '{}'", from, to)
            }
            ResolveError::AmbiguousConversion {
                from,
                to,
                candidates,
            } => {
                write!(
                    f,
                    "too many converters from '{}' to '{}': {}",
                    from,
                    to,
                    candidates.join(", ")
                )
            }
            ResolveError::Instantiation { what, reason } => {
                write!(f, "failed to instantiate {}: {}", what, reason)
            }
            ResolveError::ConversionFailed { from, to, reason } => {
                write!(f, "failed to convert '{}' to '{}': {}", from, to, reason)
            }
            ResolveError::Unbound => write!(f, "extension has no bound base rule"),
            ResolveError::AlreadyBound => write!(f, "extension base rule is already bound"),
        }
    }
}

impl std::error::Error for ResolveError {}

/// Error raised by [`Rule::store`](crate::Rule::store) and
/// [`Rule::load`](crate::Rule::load)
#[derive(Debug)]
pub enum StoreError {
    /// The underlying stream failed
    Io(std::io::Error),

    /// The stored bytes were not a well-formed tree
    Format(serde_json::Error),

    /// The deserialized value is not a rule-producing tree for the grammar
    NotARule {
        /// Description of what was found instead
        found: String,
    },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "stream error: {}", e),
            StoreError::Format(e) => write!(f, "malformed stored tree: {}", e),
            StoreError::NotARule { found } => {
                write!(f, "deserialized value is not a rule: {}", found)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Format(e) => Some(e),
            StoreError::NotARule { .. } => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Format(e)
    }
}

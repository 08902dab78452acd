//! Linkparse - declarative-grammar parsing engine
//!
//! Grammar productions are declared as structured rule types and matched
//! incrementally against input text. The engine provides:
//! - Backtracking over ambiguous alternatives with reset-and-resume
//!   traceback
//! - Lookahead-driven optional-field detection
//! - Priority-driven subtree rotation for operator-precedence constructs
//! - A capability/conversion layer attaching behavior to AST nodes
//!   without subclassing, with exactly-one-candidate resolution and
//!   lifetime-scoped caching
//! - Serialization of completed trees via serde
//!
//! ## Quick Start
//!
//! ```rust
//! use linkparse::{field, GrammarBuilder, Parser};
//!
//! let mut g = GrammarBuilder::new();
//! let word = g.terminal("demo.Word", "[a-z]+");
//! let semi = g.literal("demo.Semi", ";");
//! let stmt = g.aggregate("demo.Stmt", vec![field("word", word), field("semi", semi)]);
//! g.root(stmt);
//! let grammar = g.build().unwrap();
//!
//! let parser = Parser::new(grammar);
//! let rule = parser.parse("input", "hello;").unwrap();
//! assert_eq!(rule.field("word").unwrap().text(), "hello");
//! ```
//!
//! ## Capabilities and conversions
//!
//! Behavior is attached to completed rules through process-wide
//! registries: [`register_extension`] declares a provider answering one
//! or more capabilities for a grammar type and its subtypes, resolved
//! per rule instance via [`Rule::as_ext`]; [`register_conversion`]
//! declares a converter to an external value type, resolved per
//! production type via [`Rule::to`]. Both resolutions require exactly
//! one eligible candidate.
//!
//! ## Feature Flags
//!
//! - `logging` - Enable debug logging using the `log` crate

// Lint configuration for production quality
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]
#![allow(clippy::redundant_closure)]

// Logging macros, shared crate-wide
mod trace;

mod conversion;
mod driver;
mod error;
mod extension;
mod grammar;
mod location;
mod matcher;
mod pattern_cache;
mod rule;
mod token;

pub use conversion::{
    clear_conversions, conversion_count, register_conversion, register_conversion_with, Conversion,
};
pub use driver::Parser;
pub use error::{GrammarError, ParseError, ResolveError, StoreError};
pub use extension::{
    clear_extensions, extension_count, provider, register_extension, CapabilityId, Extension,
    ExtensionAnchor, ExtensionFactory, ExtensionRegistry, ProviderRegistration,
};
pub use grammar::{
    field, FieldDescriptor, Grammar, GrammarBuilder, PackageOverride, RuleType, Shape,
    TokenPattern, TypeId,
};
pub use location::Location;
pub use pattern_cache::{cache_size, clear_cache};
pub use rule::{Metadata, Rule, RuleValue, ValueBody};
pub use token::{FieldRef, TokenId, TokenTree};

//! Grammar descriptors
//!
//! A [`Grammar`] is an index-addressed table of production types. Each
//! production is described by an explicit [`RuleType`] record: terminals
//! carry a literal or a pattern, aggregates carry an ordered field list,
//! and variants carry a prioritized list of case types. Productions
//! reference each other by [`TypeId`], so the whole table serializes
//! cleanly with serde.
//!
//! Grammars are built through [`GrammarBuilder`], which validates the
//! table once at [`build`](GrammarBuilder::build) time: every declared
//! type must be defined, patterns must compile, variants must be
//! non-empty and package overrides must map onto subtypes.

use crate::error::GrammarError;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

// ============================================================================
// Type identifiers
// ============================================================================

/// Index of a production type within its [`Grammar`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The type's index in the grammar table
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

// ============================================================================
// Production shapes
// ============================================================================

/// What a terminal production matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenPattern {
    /// An exact character sequence
    Literal(String),
    /// A regular expression, anchored at the match position
    Pattern(String),
}

/// One field of an aggregate production
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name, unique within its aggregate
    pub name: String,
    /// The production type this field matches
    pub token_type: TypeId,
    /// Whether the field may be skipped without failing the aggregate
    pub optional: bool,
    /// Lookahead literal read when the optional marker is present
    pub when_followed_by: Option<String>,
    /// Lookahead literal read when the optional marker is absent
    pub skip_if_followed_by: Option<String>,
}

impl FieldDescriptor {
    /// Mark the field unconditionally optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the field optional when the upcoming input starts with `literal`
    pub fn when_followed_by(mut self, literal: &str) -> Self {
        self.optional = true;
        self.when_followed_by = Some(literal.to_string());
        self
    }

    /// Skip the field when the upcoming input starts with `literal`
    pub fn skip_if_followed_by(mut self, literal: &str) -> Self {
        self.skip_if_followed_by = Some(literal.to_string());
        self
    }

    /// The lookahead literal that makes this field skippable, if any
    ///
    /// The optional marker selects which condition source is read: a field
    /// marked optional reads `when_followed_by`, an unmarked field reads
    /// `skip_if_followed_by`. Empty literals count as no condition.
    pub fn optional_condition(&self) -> Option<&str> {
        let condition = if self.optional {
            self.when_followed_by.as_deref()
        } else {
            self.skip_if_followed_by.as_deref()
        };
        condition.filter(|c| !c.is_empty())
    }

    /// Whether the field is optional with no lookahead condition attached
    #[inline]
    pub fn unconditionally_optional(&self) -> bool {
        self.optional && self.optional_condition().is_none()
    }
}

/// Shorthand constructor for a required aggregate field
#[inline]
pub fn field(name: &str, token_type: TypeId) -> FieldDescriptor {
    FieldDescriptor {
        name: name.to_string(),
        token_type,
        optional: false,
        when_followed_by: None,
        skip_if_followed_by: None,
    }
}

/// A namespace remap applied while parsing under a given root production
///
/// While a parse runs under a root whose type carries this override, any
/// field declared as a type named `from.X` resolves to `to.X` when that
/// type exists and is a subtype of the declared one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageOverride {
    /// Namespace prefix to replace
    pub from: String,
    /// Namespace prefix to substitute
    pub to: String,
}

/// The structural shape of a production type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    /// Matches input characters directly
    Terminal {
        /// What the terminal matches
        pattern: TokenPattern,
    },
    /// Matches an ordered sequence of fields
    Aggregate {
        /// The fields, in match order
        fields: Vec<FieldDescriptor>,
    },
    /// Matches exactly one of several case types
    Variant {
        /// Candidate case types
        cases: Vec<TypeId>,
    },
}

/// A production type record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleType {
    /// Fully qualified type name, e.g. `"expr.Number"`
    pub name: String,
    /// Structural shape
    pub shape: Shape,
    /// Base priority used to order variant alternatives and drive rotation
    pub priority: i32,
    /// Whether the priority propagates upward through single-child chains
    pub propagate_priority: bool,
    /// Whether matched values of this type are captured as metadata
    /// instead of structural children
    pub meta: bool,
    /// Characters skipped before matching this type and inside its
    /// children, unless a child overrides the set
    pub ignored_characters: Option<String>,
    /// Namespace remaps active while this type is the parse root
    pub overrides: Vec<PackageOverride>,
}

// ============================================================================
// Grammar
// ============================================================================

/// An immutable, validated production table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grammar {
    types: Vec<RuleType>,
    root: TypeId,
}

impl Grammar {
    /// The default root production
    #[inline]
    pub fn root(&self) -> TypeId {
        self.root
    }

    /// Look up a production record
    #[inline]
    pub fn get(&self, id: TypeId) -> Option<&RuleType> {
        self.types.get(id.index())
    }

    /// Production record for a known-valid id
    #[inline]
    pub(crate) fn ty(&self, id: TypeId) -> &RuleType {
        &self.types[id.index()]
    }

    /// Find a production by name
    pub fn type_by_name(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }

    /// Name of a production
    #[inline]
    pub fn name_of(&self, id: TypeId) -> &str {
        &self.ty(id).name
    }

    /// Number of productions in the table
    #[inline]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Whether `sub` is `sup` or a transitive variant case of `sup`
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        if sub == sup {
            return true;
        }
        let mut visited = HashSet::new();
        let mut pending = vec![sup];
        while let Some(current) = pending.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Shape::Variant { cases } = &self.ty(current).shape {
                for &case in cases {
                    if case == sub {
                        return true;
                    }
                    pending.push(case);
                }
            }
        }
        false
    }

    /// Resolve a declared field type under the overrides of `parse_root`
    ///
    /// Returns the remapped type when an override prefix applies and the
    /// remapped name exists as a subtype of `declared`; otherwise returns
    /// `declared` unchanged.
    pub fn resolve_override(&self, parse_root: TypeId, declared: TypeId) -> TypeId {
        let declared_name = self.name_of(declared);
        for over in &self.ty(parse_root).overrides {
            let rest = match declared_name.strip_prefix(&over.from) {
                Some(rest) if rest.starts_with('.') => rest,
                _ => continue,
            };
            let candidate = format!("{}{}", over.to, rest);
            if let Some(id) = self.type_by_name(&candidate) {
                if self.is_subtype(id, declared) {
                    return id;
                }
            }
        }
        declared
    }

    /// Serialize the grammar to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a grammar from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ============================================================================
// Builder
// ============================================================================

struct PendingType {
    name: String,
    shape: Option<Shape>,
    priority: i32,
    propagate_priority: bool,
    meta: bool,
    ignored_characters: Option<String>,
    overrides: Vec<PackageOverride>,
}

/// Incremental [`Grammar`] constructor
///
/// Types can be declared ahead of their definitions, so mutually
/// recursive productions are built in any order. All validation happens
/// in [`build`](Self::build).
#[derive(Default)]
pub struct GrammarBuilder {
    types: Vec<PendingType>,
    root: Option<TypeId>,
}

impl Default for PendingType {
    fn default() -> Self {
        Self {
            name: String::new(),
            shape: None,
            priority: 0,
            propagate_priority: false,
            meta: false,
            ignored_characters: None,
            overrides: Vec::new(),
        }
    }
}

impl GrammarBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a production without defining its shape yet
    pub fn declare(&mut self, name: &str) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(PendingType {
            name: name.to_string(),
            ..PendingType::default()
        });
        id
    }

    /// Declare and define a pattern terminal
    pub fn terminal(&mut self, name: &str, pattern: &str) -> TypeId {
        let id = self.declare(name);
        self.define_terminal(id, pattern);
        id
    }

    /// Declare and define a literal terminal
    pub fn literal(&mut self, name: &str, text: &str) -> TypeId {
        let id = self.declare(name);
        self.define_literal(id, text);
        id
    }

    /// Declare and define an aggregate
    pub fn aggregate(&mut self, name: &str, fields: Vec<FieldDescriptor>) -> TypeId {
        let id = self.declare(name);
        self.define_aggregate(id, fields);
        id
    }

    /// Declare and define a variant
    pub fn variant(&mut self, name: &str, cases: Vec<TypeId>) -> TypeId {
        let id = self.declare(name);
        self.define_variant(id, cases);
        id
    }

    /// Define a previously declared type as a pattern terminal
    pub fn define_terminal(&mut self, id: TypeId, pattern: &str) {
        self.types[id.index()].shape = Some(Shape::Terminal {
            pattern: TokenPattern::Pattern(pattern.to_string()),
        });
    }

    /// Define a previously declared type as a literal terminal
    pub fn define_literal(&mut self, id: TypeId, text: &str) {
        self.types[id.index()].shape = Some(Shape::Terminal {
            pattern: TokenPattern::Literal(text.to_string()),
        });
    }

    /// Define a previously declared type as an aggregate
    pub fn define_aggregate(&mut self, id: TypeId, fields: Vec<FieldDescriptor>) {
        self.types[id.index()].shape = Some(Shape::Aggregate { fields });
    }

    /// Define a previously declared type as a variant
    pub fn define_variant(&mut self, id: TypeId, cases: Vec<TypeId>) {
        self.types[id.index()].shape = Some(Shape::Variant { cases });
    }

    /// Set a type's base priority and whether it propagates upward
    pub fn adjust_priority(&mut self, id: TypeId, value: i32, propagate: bool) {
        let ty = &mut self.types[id.index()];
        ty.priority = value;
        ty.propagate_priority = propagate;
    }

    /// Mark a type as metadata: matched values attach to the enclosing
    /// aggregate instead of becoming structural children
    pub fn meta(&mut self, id: TypeId) {
        self.types[id.index()].meta = true;
    }

    /// Set the characters skipped before matching this type and its children
    pub fn ignore_characters(&mut self, id: TypeId, chars: &str) {
        self.types[id.index()].ignored_characters = Some(chars.to_string());
    }

    /// Add a namespace override active while `id` is the parse root
    pub fn package_override(&mut self, id: TypeId, from: &str, to: &str) {
        self.types[id.index()].overrides.push(PackageOverride {
            from: from.to_string(),
            to: to.to_string(),
        });
    }

    /// Set the default root production
    pub fn root(&mut self, id: TypeId) {
        self.root = Some(id);
    }

    /// Validate the table and produce an immutable [`Grammar`]
    pub fn build(self) -> Result<Grammar, GrammarError> {
        if self.types.is_empty() {
            return Err(GrammarError::NoTypes);
        }

        {
            let mut seen = HashSet::new();
            for pending in &self.types {
                if !seen.insert(pending.name.as_str()) {
                    return Err(GrammarError::DuplicateType {
                        name: pending.name.clone(),
                    });
                }
            }
        }

        let mut types = Vec::with_capacity(self.types.len());
        for pending in self.types {
            let shape = match pending.shape {
                Some(shape) => shape,
                None => {
                    return Err(GrammarError::UndefinedType { name: pending.name });
                }
            };
            match &shape {
                Shape::Terminal {
                    pattern: TokenPattern::Pattern(pattern),
                } => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        return Err(GrammarError::InvalidPattern {
                            type_name: pending.name,
                            pattern: pattern.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                Shape::Variant { cases } if cases.is_empty() => {
                    return Err(GrammarError::EmptyVariant { name: pending.name });
                }
                _ => {}
            }
            types.push(RuleType {
                name: pending.name,
                shape,
                priority: pending.priority,
                propagate_priority: pending.propagate_priority,
                meta: pending.meta,
                ignored_characters: pending.ignored_characters,
                overrides: pending.overrides,
            });
        }

        let grammar = Grammar {
            types,
            root: self.root.unwrap_or(TypeId(0)),
        };

        // An override that resolves a name must resolve it to a subtype.
        for ty in &grammar.types {
            for over in &ty.overrides {
                for (i, candidate_src) in grammar.types.iter().enumerate() {
                    let rest = match candidate_src.name.strip_prefix(&over.from) {
                        Some(rest) if rest.starts_with('.') => rest,
                        _ => continue,
                    };
                    let mapped_name = format!("{}{}", over.to, rest);
                    if let Some(mapped) = grammar.type_by_name(&mapped_name) {
                        if !grammar.is_subtype(mapped, TypeId(i as u32)) {
                            return Err(GrammarError::OverrideNotSubtype {
                                from: candidate_src.name.clone(),
                                to: mapped_name,
                            });
                        }
                    }
                }
            }
        }

        Ok(grammar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arithmetic() -> Grammar {
        let mut g = GrammarBuilder::new();
        let number = g.terminal("expr.Number", "[0-9]+");
        let plus = g.literal("expr.Plus", "+");
        let expr = g.declare("expr.Expr");
        let sum = g.aggregate(
            "expr.Sum",
            vec![
                field("left", number),
                field("op", plus),
                field("right", expr),
            ],
        );
        g.define_variant(expr, vec![sum, number]);
        g.root(expr);
        g.build().unwrap()
    }

    #[test]
    fn test_build_and_lookup() {
        let g = arithmetic();
        assert_eq!(g.type_count(), 4);
        let expr = g.type_by_name("expr.Expr").unwrap();
        assert_eq!(g.root(), expr);
        assert_eq!(g.name_of(expr), "expr.Expr");
        assert!(g.type_by_name("expr.Missing").is_none());
    }

    #[test]
    fn test_subtyping_through_variants() {
        let g = arithmetic();
        let expr = g.type_by_name("expr.Expr").unwrap();
        let number = g.type_by_name("expr.Number").unwrap();
        let sum = g.type_by_name("expr.Sum").unwrap();
        let plus = g.type_by_name("expr.Plus").unwrap();

        assert!(g.is_subtype(number, expr));
        assert!(g.is_subtype(sum, expr));
        assert!(g.is_subtype(expr, expr));
        assert!(!g.is_subtype(plus, expr));
        assert!(!g.is_subtype(expr, number));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let mut g = GrammarBuilder::new();
        g.literal("a.X", "x");
        g.literal("a.X", "y");
        assert!(matches!(
            g.build(),
            Err(GrammarError::DuplicateType { name }) if name == "a.X"
        ));
    }

    #[test]
    fn test_undefined_type_rejected() {
        let mut g = GrammarBuilder::new();
        g.declare("a.Forward");
        assert!(matches!(
            g.build(),
            Err(GrammarError::UndefinedType { name }) if name == "a.Forward"
        ));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let mut g = GrammarBuilder::new();
        g.terminal("a.Bad", "[unclosed");
        assert!(matches!(
            g.build(),
            Err(GrammarError::InvalidPattern { type_name, .. }) if type_name == "a.Bad"
        ));
    }

    #[test]
    fn test_empty_variant_rejected() {
        let mut g = GrammarBuilder::new();
        g.variant("a.V", vec![]);
        assert!(matches!(
            g.build(),
            Err(GrammarError::EmptyVariant { name }) if name == "a.V"
        ));
    }

    #[test]
    fn test_empty_builder_rejected() {
        assert!(matches!(
            GrammarBuilder::new().build(),
            Err(GrammarError::NoTypes)
        ));
    }

    #[test]
    fn test_optional_condition_selection() {
        let f = field("a", TypeId(0)).when_followed_by(";");
        assert_eq!(f.optional_condition(), Some(";"));
        assert!(!f.unconditionally_optional());

        let f = field("b", TypeId(0)).skip_if_followed_by(")");
        assert!(!f.optional);
        assert_eq!(f.optional_condition(), Some(")"));

        let f = field("c", TypeId(0)).optional();
        assert_eq!(f.optional_condition(), None);
        assert!(f.unconditionally_optional());

        // The optional marker selects the condition source
        let mut f = field("d", TypeId(0)).skip_if_followed_by(")");
        f.optional = true;
        assert_eq!(f.optional_condition(), None);
    }

    #[test]
    fn test_override_resolution() {
        let mut g = GrammarBuilder::new();
        let num = g.terminal("lang.Number", "[0-9]+");
        let word = g.terminal("lang.Word", "[a-z]+");
        let alt_value = g.variant("alt.Value", vec![word]);
        let value = g.variant("expr.Value", vec![num, alt_value]);
        let root = g.aggregate("script.Root", vec![field("v", value)]);
        g.package_override(root, "expr", "alt");
        g.root(root);
        let g = g.build().unwrap();

        // expr.Value remaps to its case alt.Value under script.Root
        assert_eq!(g.resolve_override(root, value), alt_value);
        // No remap exists outside the overridden namespace
        assert_eq!(g.resolve_override(root, num), num);
        // No overrides active under other roots
        assert_eq!(g.resolve_override(value, value), value);
    }

    #[test]
    fn test_override_requires_subtype() {
        let mut g = GrammarBuilder::new();
        let num = g.terminal("expr.Number", "[0-9]+");
        g.literal("alt.Number", "zero");
        let root = g.aggregate("script.Root", vec![field("n", num)]);
        g.package_override(root, "expr", "alt");
        g.root(root);
        assert!(matches!(
            g.build(),
            Err(GrammarError::OverrideNotSubtype { .. })
        ));
    }

    #[test]
    fn test_override_prefix_boundary() {
        let mut g = GrammarBuilder::new();
        let num = g.terminal("expression.Number", "[0-9]+");
        let alt = g.variant("alt.Number", vec![num]);
        let root = g.aggregate("script.Root", vec![field("n", num)]);
        // "expr" must not match the "expression" prefix
        g.package_override(root, "expr", "alt");
        g.root(root);
        let g = g.build().unwrap();
        assert_eq!(g.resolve_override(root, num), num);
        let _ = alt;
    }

    #[test]
    fn test_json_round_trip() {
        let g = arithmetic();
        let json = g.to_json().unwrap();
        let back = Grammar::from_json(&json).unwrap();
        assert_eq!(g, back);
    }
}

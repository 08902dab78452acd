//! Completed production values
//!
//! A [`RuleValue`] is the plain data of a completed match: type, span and
//! body. A [`Rule`] wraps a value tree with navigable [`Metadata`]
//! snapshots and carries the per-instance extension cache consulted by
//! [`Rule::as_ext`]. Metadata links are weak in both directions, so a
//! retained Rule neither pins its ancestors nor is pinned by them.

use crate::conversion;
use crate::error::{ResolveError, StoreError};
use crate::extension::{self, CapabilityId, Extension, ExtensionKey};
use crate::grammar::{Grammar, Shape, TypeId};
use crate::location::Location;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, OnceLock, Weak};

// ============================================================================
// Plain value tree
// ============================================================================

/// The data of one completed production match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleValue {
    /// The matched production type
    pub type_id: TypeId,
    /// Start position in the input
    pub location: Location,
    /// Exclusive end position in the input
    pub end: Location,
    /// The matched content
    pub body: ValueBody,
}

/// Body of a [`RuleValue`], mirroring the production's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueBody {
    /// Matched input text of a terminal
    Terminal(String),
    /// One slot per declared field; `None` for skipped optional fields
    Aggregate(Vec<Option<RuleValue>>),
    /// The matched case of a variant
    Variant(Box<RuleValue>),
}

impl RuleValue {
    /// Concatenated matched text of the subtree
    pub fn text(&self) -> String {
        match &self.body {
            ValueBody::Terminal(text) => text.clone(),
            ValueBody::Aggregate(slots) => slots
                .iter()
                .flatten()
                .map(RuleValue::text)
                .collect::<Vec<_>>()
                .join(""),
            ValueBody::Variant(inner) => inner.text(),
        }
    }
}

// ============================================================================
// Metadata snapshots
// ============================================================================

/// Immutable positional snapshot of one node in a completed tree
///
/// Holds what the parse-state token knew at population time: type, span
/// and position within the parent. Parent and rule links are weak, so the
/// snapshot keeps neither side alive.
pub struct Metadata {
    type_id: TypeId,
    location: Location,
    end: Location,
    position: usize,
    produces_rule: bool,
    parent: Weak<Metadata>,
    children: OnceLock<Vec<Arc<Metadata>>>,
    rule: OnceLock<Weak<RuleData>>,
}

impl Metadata {
    /// The production type of this node
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Start position in the input
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Exclusive end position in the input
    #[inline]
    pub fn end(&self) -> Location {
        self.end
    }

    /// Index of this node within its parent's present children
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether this node is itself a rule-producing aggregate
    #[inline]
    pub fn produces_rule(&self) -> bool {
        self.produces_rule
    }

    /// The parent snapshot, if still alive
    pub fn parent(&self) -> Option<Arc<Metadata>> {
        self.parent.upgrade()
    }

    /// Snapshots of the present children, in order
    pub fn children(&self) -> &[Arc<Metadata>] {
        self.children.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// The rule bound to this snapshot, if still alive
    pub fn rule(&self) -> Option<Rule> {
        self.rule
            .get()
            .and_then(Weak::upgrade)
            .map(|inner| Rule { inner })
    }
}

impl fmt::Debug for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("type_id", &self.type_id)
            .field("location", &self.location)
            .field("end", &self.end)
            .field("position", &self.position)
            .finish()
    }
}

// ============================================================================
// Rule
// ============================================================================

pub(crate) struct RuleData {
    grammar: Arc<Grammar>,
    type_id: TypeId,
    node: RuleNode,
    metadata: Arc<Metadata>,
    extensions: Mutex<HashMap<ExtensionKey, Arc<dyn Extension>>>,
}

enum RuleNode {
    Terminal(String),
    Aggregate(Vec<Option<Rule>>),
    Variant(Rule),
}

/// A completed production value with navigation and behavior resolution
///
/// Cheap to clone; clones share the underlying node and its extension
/// cache. The cache is reclaimed when the last clone drops.
#[derive(Clone)]
pub struct Rule {
    inner: Arc<RuleData>,
}

/// Build the rule tree for a completed value
pub(crate) fn build_rule(
    grammar: &Arc<Grammar>,
    value: &RuleValue,
    parent: Option<(&Arc<Metadata>, usize)>,
) -> Rule {
    let metadata = Arc::new(Metadata {
        type_id: value.type_id,
        location: value.location,
        end: value.end,
        position: parent.map(|(_, i)| i).unwrap_or(0),
        produces_rule: matches!(value.body, ValueBody::Aggregate(_)),
        parent: parent.map(|(p, _)| Arc::downgrade(p)).unwrap_or_default(),
        children: OnceLock::new(),
        rule: OnceLock::new(),
    });

    let node = match &value.body {
        ValueBody::Terminal(text) => {
            let _ = metadata.children.set(Vec::new());
            RuleNode::Terminal(text.clone())
        }
        ValueBody::Aggregate(slots) => {
            let mut child_meta = Vec::new();
            let mut rules = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    Some(child_value) => {
                        let child =
                            build_rule(grammar, child_value, Some((&metadata, child_meta.len())));
                        child_meta.push(child.inner.metadata.clone());
                        rules.push(Some(child));
                    }
                    None => rules.push(None),
                }
            }
            let _ = metadata.children.set(child_meta);
            RuleNode::Aggregate(rules)
        }
        ValueBody::Variant(inner) => {
            let child = build_rule(grammar, inner, Some((&metadata, 0)));
            let _ = metadata.children.set(vec![child.inner.metadata.clone()]);
            RuleNode::Variant(child)
        }
    };

    let data = Arc::new(RuleData {
        grammar: grammar.clone(),
        type_id: value.type_id,
        node,
        metadata: metadata.clone(),
        extensions: Mutex::new(HashMap::new()),
    });
    let _ = metadata.rule.set(Arc::downgrade(&data));
    Rule { inner: data }
}

impl Rule {
    /// The grammar this rule was parsed against
    #[inline]
    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.inner.grammar
    }

    /// The production type of this rule
    #[inline]
    pub fn token_type(&self) -> TypeId {
        self.inner.type_id
    }

    /// Name of the production type
    #[inline]
    pub fn type_name(&self) -> &str {
        self.inner.grammar.name_of(self.inner.type_id)
    }

    /// The bound positional snapshot
    #[inline]
    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.inner.metadata
    }

    /// Start position in the input
    #[inline]
    pub fn location(&self) -> Location {
        self.inner.metadata.location()
    }

    /// Exclusive end position in the input
    #[inline]
    pub fn end(&self) -> Location {
        self.inner.metadata.end()
    }

    /// Index of this rule within its parent's present children
    #[inline]
    pub fn position(&self) -> usize {
        self.inner.metadata.position()
    }

    /// The nearest rule-producing ancestor's value
    pub fn parent(&self) -> Option<Rule> {
        let mut current = self.inner.metadata.parent();
        while let Some(meta) = current {
            if meta.produces_rule() {
                return meta.rule();
            }
            current = meta.parent();
        }
        None
    }

    /// Sibling rule at `position() + offset`, if present
    pub fn offset_token(&self, offset: isize) -> Option<Rule> {
        let parent = self.inner.metadata.parent()?;
        let target = self.position() as isize + offset;
        if target < 0 {
            return None;
        }
        parent
            .children()
            .get(target as usize)
            .and_then(|meta| meta.rule())
    }

    /// The next sibling, if any
    #[inline]
    pub fn next_token(&self) -> Option<Rule> {
        self.offset_token(1)
    }

    /// The previous sibling, if any
    #[inline]
    pub fn previous_token(&self) -> Option<Rule> {
        self.offset_token(-1)
    }

    /// Rebuild the plain value tree of this rule
    pub fn value(&self) -> RuleValue {
        let body = match &self.inner.node {
            RuleNode::Terminal(text) => ValueBody::Terminal(text.clone()),
            RuleNode::Aggregate(slots) => ValueBody::Aggregate(
                slots
                    .iter()
                    .map(|slot| slot.as_ref().map(Rule::value))
                    .collect(),
            ),
            RuleNode::Variant(inner) => ValueBody::Variant(Box::new(inner.value())),
        };
        RuleValue {
            type_id: self.inner.type_id,
            location: self.location(),
            end: self.end(),
            body,
        }
    }

    /// Concatenated matched text of the subtree
    pub fn text(&self) -> String {
        match &self.inner.node {
            RuleNode::Terminal(text) => text.clone(),
            RuleNode::Aggregate(slots) => slots
                .iter()
                .flatten()
                .map(Rule::text)
                .collect::<Vec<_>>()
                .join(""),
            RuleNode::Variant(inner) => inner.text(),
        }
    }

    /// Look up an aggregate field's value by name
    ///
    /// Skipped optional fields and unknown names return `None`. On a
    /// variant rule the lookup passes through to the active case.
    pub fn field(&self, name: &str) -> Option<&Rule> {
        match &self.inner.node {
            RuleNode::Aggregate(slots) => {
                let fields = match &self.inner.grammar.ty(self.inner.type_id).shape {
                    Shape::Aggregate { fields } => fields,
                    _ => return None,
                };
                let index = fields.iter().position(|f| f.name == name)?;
                slots.get(index)?.as_ref()
            }
            RuleNode::Variant(inner) => inner.field(name),
            RuleNode::Terminal(_) => None,
        }
    }

    /// The active case of a variant rule
    pub fn case(&self) -> Option<&Rule> {
        match &self.inner.node {
            RuleNode::Variant(inner) => Some(inner),
            _ => None,
        }
    }

    /// Short diagnostic label: type name and start position
    pub fn tag(&self) -> String {
        format!("{}@{}", self.type_name(), self.location())
    }

    /// Resolve the unique provider of `capability` for this rule
    ///
    /// The resolved extension is cached per rule instance; two
    /// capabilities answered by the same provider share one instance.
    pub fn as_ext(&self, capability: CapabilityId) -> Result<Arc<dyn Extension>, ResolveError> {
        extension::resolve(self, capability)
    }

    /// Convert this rule through the unique converter producing `T`
    ///
    /// The resolved converter is cached per declaring production type,
    /// shared across instances.
    pub fn to<T: 'static>(&self) -> Result<T, ResolveError> {
        conversion::convert(self)
    }

    /// Whether two handles share the same underlying rule instance
    #[inline]
    pub fn ptr_eq(&self, other: &Rule) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Serialize this rule's value tree to a stream
    pub fn store<W: Write>(&self, writer: W) -> Result<(), StoreError> {
        let stored = to_stored(&self.inner.grammar, &self.value());
        serde_json::to_writer(writer, &stored)?;
        Ok(())
    }

    /// Deserialize a rule from a stream, validating it against `grammar`
    pub fn load<R: Read>(grammar: &Arc<Grammar>, reader: R) -> Result<Rule, StoreError> {
        let stored: StoredNode = serde_json::from_reader(reader)?;
        let value = from_stored(grammar, &stored)?;
        Ok(build_rule(grammar, &value, None))
    }

    pub(crate) fn extensions_cache(&self) -> &Mutex<HashMap<ExtensionKey, Arc<dyn Extension>>> {
        &self.inner.extensions
    }

    pub(crate) fn active_case(&self) -> Option<&Rule> {
        self.case()
    }
}

// Structural equality over the value tree; instance identity is ptr_eq.
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.value() == other.value()
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rule({})", self.tag())
    }
}

// ============================================================================
// Stored form
// ============================================================================

// Stored trees carry type names instead of table indices so they stay
// valid across grammar rebuilds that keep the same productions.
#[derive(Serialize, Deserialize)]
struct StoredNode {
    type_name: String,
    location: Location,
    end: Location,
    body: StoredBody,
}

#[derive(Serialize, Deserialize)]
enum StoredBody {
    Terminal(String),
    Aggregate(Vec<Option<StoredNode>>),
    Variant(Box<StoredNode>),
}

fn to_stored(grammar: &Grammar, value: &RuleValue) -> StoredNode {
    let body = match &value.body {
        ValueBody::Terminal(text) => StoredBody::Terminal(text.clone()),
        ValueBody::Aggregate(slots) => StoredBody::Aggregate(
            slots
                .iter()
                .map(|slot| slot.as_ref().map(|v| to_stored(grammar, v)))
                .collect(),
        ),
        ValueBody::Variant(inner) => StoredBody::Variant(Box::new(to_stored(grammar, inner))),
    };
    StoredNode {
        type_name: grammar.name_of(value.type_id).to_string(),
        location: value.location,
        end: value.end,
        body,
    }
}

fn from_stored(grammar: &Grammar, stored: &StoredNode) -> Result<RuleValue, StoreError> {
    let type_id = grammar
        .type_by_name(&stored.type_name)
        .ok_or_else(|| StoreError::NotARule {
            found: format!("unknown production type '{}'", stored.type_name),
        })?;

    let body = match (&grammar.ty(type_id).shape, &stored.body) {
        (Shape::Terminal { .. }, StoredBody::Terminal(text)) => ValueBody::Terminal(text.clone()),
        (Shape::Aggregate { fields }, StoredBody::Aggregate(slots)) => {
            if slots.len() != fields.len() {
                return Err(StoreError::NotARule {
                    found: format!(
                        "aggregate '{}' with {} slots, expected {}",
                        stored.type_name,
                        slots.len(),
                        fields.len()
                    ),
                });
            }
            // Slot types are not checked against declarations: priority
            // rotation legitimately re-parents operands across fields.
            let mut values = Vec::with_capacity(slots.len());
            for slot in slots {
                match slot {
                    Some(child) => values.push(Some(from_stored(grammar, child)?)),
                    None => values.push(None),
                }
            }
            ValueBody::Aggregate(values)
        }
        (Shape::Variant { .. }, StoredBody::Variant(case)) => {
            let value = from_stored(grammar, case)?;
            if !grammar.is_subtype(value.type_id, type_id) {
                return Err(StoreError::NotARule {
                    found: format!(
                        "variant '{}' holding non-case type '{}'",
                        stored.type_name,
                        grammar.name_of(value.type_id)
                    ),
                });
            }
            ValueBody::Variant(Box::new(value))
        }
        _ => {
            return Err(StoreError::NotARule {
                found: format!(
                    "body shape does not match production '{}'",
                    stored.type_name
                ),
            });
        }
    };

    Ok(RuleValue {
        type_id,
        location: stored.location,
        end: stored.end,
        body,
    })
}

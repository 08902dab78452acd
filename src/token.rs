//! Parse-state token arena
//!
//! Every in-progress match for a grammar production is a token owned by a
//! [`TokenTree`]. Tokens are addressed by [`TokenId`], so parent and child
//! links are plain indices and the whole parse session is released as one
//! allocation. The tree exposes the per-token state machine: population,
//! failure and optionality flags, sibling navigation, breadth-first
//! traversal, lookahead-driven optionality and priority bookkeeping.
//!
//! Mutation is reserved for the matching machinery; consumers observe
//! tokens through the query surface.

use crate::grammar::{FieldDescriptor, Grammar, Shape, TypeId};
use crate::location::Location;
use crate::rule::RuleValue;
use crate::trace::log_debug;
use std::sync::Arc;

// ============================================================================
// Identifiers
// ============================================================================

/// Index of a token within its [`TokenTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId(pub(crate) u32);

impl TokenId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifies the aggregate field a token fills: the owning aggregate
/// type and the field's index within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// The aggregate type declaring the field
    pub owner: TypeId,
    /// The field's index in declaration order
    pub index: usize,
}

// ============================================================================
// Token storage
// ============================================================================

#[derive(Debug)]
struct TokenNode {
    type_id: TypeId,
    parent: Option<TokenId>,
    child_index: usize,
    field: Option<FieldRef>,
    children: Vec<TokenId>,
    populated: bool,
    failed: bool,
    optional: bool,
    detached: bool,
    location: Location,
    end: Option<Location>,
    next_field: usize,
    untried: Vec<TypeId>,
    value: Option<RuleValue>,
    meta_tokens: Vec<RuleValue>,
    sort_seq: Option<u32>,
}

/// Arena of parse-state tokens for one parse session
#[derive(Debug)]
pub struct TokenTree {
    grammar: Arc<Grammar>,
    nodes: Vec<TokenNode>,
    sort_counter: u32,
}

impl TokenTree {
    /// Create an empty tree over `grammar`
    pub(crate) fn new(grammar: Arc<Grammar>) -> Self {
        Self {
            grammar,
            nodes: Vec::new(),
            sort_counter: 0,
        }
    }

    /// The grammar this tree parses against
    #[inline]
    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    #[inline]
    fn node(&self, id: TokenId) -> &TokenNode {
        &self.nodes[id.index()]
    }

    #[inline]
    fn node_mut(&mut self, id: TokenId) -> &mut TokenNode {
        &mut self.nodes[id.index()]
    }

    /// Allocate a token for a match attempt of `type_id` at `location`
    pub(crate) fn create(
        &mut self,
        type_id: TypeId,
        parent: Option<TokenId>,
        field: Option<FieldRef>,
        location: Location,
    ) -> TokenId {
        let grammar = self.grammar.clone();

        // Variant alternatives are tried highest base priority first, in
        // declaration order within equal priorities.
        let untried = match &grammar.ty(type_id).shape {
            Shape::Variant { cases } => {
                let mut cases = cases.clone();
                cases.sort_by_key(|&c| std::cmp::Reverse(grammar.ty(c).priority));
                cases
            }
            _ => Vec::new(),
        };

        let optional = field
            .and_then(|f| self.descriptor(f))
            .map(|d| d.unconditionally_optional())
            .unwrap_or(false);

        let id = TokenId(self.nodes.len() as u32);
        let child_index = match parent {
            Some(p) => {
                let idx = self.node(p).children.len();
                self.node_mut(p).children.push(id);
                idx
            }
            None => 0,
        };
        self.nodes.push(TokenNode {
            type_id,
            parent,
            child_index,
            field,
            children: Vec::new(),
            populated: false,
            failed: false,
            optional,
            detached: false,
            location,
            end: None,
            next_field: 0,
            untried,
            value: None,
            meta_tokens: Vec::new(),
            sort_seq: None,
        });
        id
    }

    fn descriptor(&self, field: FieldRef) -> Option<&FieldDescriptor> {
        match &self.grammar.ty(field.owner).shape {
            Shape::Aggregate { fields } => fields.get(field.index),
            _ => None,
        }
    }

    // ========================================================================
    // State queries
    // ========================================================================

    /// The production value, present once the token is populated
    pub fn token(&self, id: TokenId) -> Option<&RuleValue> {
        let node = self.node(id);
        if node.populated {
            node.value.as_ref()
        } else {
            None
        }
    }

    /// The production type this token matches
    #[inline]
    pub fn token_type(&self, id: TokenId) -> TypeId {
        self.node(id).type_id
    }

    /// Whether the token holds a completed match
    #[inline]
    pub fn is_populated(&self, id: TokenId) -> bool {
        self.node(id).populated
    }

    /// Whether the token failed; terminal for this token
    #[inline]
    pub fn is_failed(&self, id: TokenId) -> bool {
        self.node(id).failed
    }

    /// Whether the token may be skipped without failing its parent
    #[inline]
    pub fn is_optional(&self, id: TokenId) -> bool {
        self.node(id).optional
    }

    /// Whether values of this token's type attach as metadata
    #[inline]
    pub fn is_meta_token(&self, id: TokenId) -> bool {
        self.grammar.ty(self.node(id).type_id).meta
    }

    /// Whether the token was discarded by backtracking
    #[inline]
    pub fn is_detached(&self, id: TokenId) -> bool {
        self.node(id).detached
    }

    /// Position where this token's match attempt started
    #[inline]
    pub fn location(&self, id: TokenId) -> Location {
        self.node(id).location
    }

    /// Exclusive end position, present once populated
    #[inline]
    pub fn end(&self, id: TokenId) -> Option<Location> {
        self.node(id).end
    }

    /// The parent token, if any
    #[inline]
    pub fn parent(&self, id: TokenId) -> Option<TokenId> {
        self.node(id).parent
    }

    /// Descriptor of the aggregate field this token fills, if any
    pub fn target_field(&self, id: TokenId) -> Option<&FieldDescriptor> {
        self.node(id).field.and_then(|f| self.descriptor(f))
    }

    /// Index of the aggregate field this token fills, if any
    #[inline]
    pub(crate) fn field_index(&self, id: TokenId) -> Option<usize> {
        self.node(id).field.map(|f| f.index)
    }

    /// Index of this token within its parent's child sequence
    #[inline]
    pub fn position(&self, id: TokenId) -> usize {
        self.node(id).child_index
    }

    /// Number of children currently attached
    #[inline]
    pub fn child_count(&self, id: TokenId) -> usize {
        self.node(id).children.len()
    }

    /// Child at `index`, if attached
    #[inline]
    pub fn child(&self, id: TokenId, index: usize) -> Option<TokenId> {
        self.node(id).children.get(index).copied()
    }

    /// Sibling at `position() + offset`
    ///
    /// Empty when the computed index is negative or past the parent's
    /// child count, or when the token has no parent.
    pub fn offset_token(&self, id: TokenId, offset: isize) -> Option<TokenId> {
        let parent = self.node(id).parent?;
        let target = self.node(id).child_index as isize + offset;
        if target < 0 {
            return None;
        }
        self.child(parent, target as usize)
    }

    /// The next sibling, if any
    #[inline]
    pub fn next_token(&self, id: TokenId) -> Option<TokenId> {
        self.offset_token(id, 1)
    }

    /// The previous sibling, if any
    #[inline]
    pub fn previous_token(&self, id: TokenId) -> Option<TokenId> {
        self.offset_token(id, -1)
    }

    /// Follow parent links to the token with no parent
    pub fn root(&self, id: TokenId) -> TokenId {
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            current = parent;
        }
        current
    }

    /// The token sequence from the root down to `id`, inclusive
    pub fn path(&self, id: TokenId) -> Vec<TokenId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    /// Apply `f` to `id` and all its descendants, breadth first
    pub fn visit<F: FnMut(TokenId)>(&self, id: TokenId, mut f: F) {
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            f(current);
            queue.extend(self.node(current).children.iter().copied());
        }
    }

    /// Render the subtree under `id`, one line per token
    pub fn dump_tree(&self, id: TokenId) -> String {
        self.dump_tree_with(id, |tree, token| {
            let node = tree.node(token);
            format!(
                "{} populated={} failed={} optional={}",
                tree.tag(token),
                node.populated,
                node.failed,
                node.optional
            )
        })
    }

    /// Render the subtree under `id` with caller-supplied per-token text
    pub fn dump_tree_with<F>(&self, id: TokenId, formatter: F) -> String
    where
        F: Fn(&TokenTree, TokenId) -> String,
    {
        let mut out = String::new();
        self.dump_into(id, 0, &formatter, &mut out);
        out
    }

    fn dump_into<F>(&self, id: TokenId, depth: usize, formatter: &F, out: &mut String)
    where
        F: Fn(&TokenTree, TokenId) -> String,
    {
        out.push_str(&"  ".repeat(depth));
        out.push_str(&formatter(self, id));
        out.push('\n');
        for &child in &self.node(id).children {
            self.dump_into(child, depth + 1, formatter, out);
        }
    }

    /// Short diagnostic label: type name and start position
    pub fn tag(&self, id: TokenId) -> String {
        let node = self.node(id);
        format!("{}@{}", self.grammar.name_of(node.type_id), node.location)
    }

    /// Ignored-character set in effect for this token
    ///
    /// Inherited from the nearest ancestor (including this token) whose
    /// type declares one.
    pub fn ignored_characters(&self, id: TokenId) -> Option<&str> {
        let mut current = Some(id);
        while let Some(token) = current {
            let node = self.node(token);
            if let Some(chars) = &self.grammar.ty(node.type_id).ignored_characters {
                return Some(chars);
            }
            current = node.parent;
        }
        None
    }

    /// Aggregate priority of this token's subtree
    ///
    /// The type's own adjustment plus the base priority of every child
    /// whose type propagates upward.
    pub fn base_priority(&self, id: TokenId) -> i32 {
        let node = self.node(id);
        let mut result = self.grammar.ty(node.type_id).priority;
        for &child in &node.children {
            if self.propagate_priority(child) {
                result += self.base_priority(child);
            }
        }
        result
    }

    /// Whether this token's priority folds into its parent's
    #[inline]
    pub fn propagate_priority(&self, id: TokenId) -> bool {
        self.grammar.ty(self.node(id).type_id).propagate_priority
    }

    /// Number of untried variant alternatives remaining
    #[inline]
    pub fn alternatives_left(&self, id: TokenId) -> usize {
        self.node(id).untried.len()
    }

    /// Metadata values captured while matching this token
    #[inline]
    pub fn meta_tokens(&self, id: TokenId) -> &[RuleValue] {
        &self.node(id).meta_tokens
    }

    /// Post-order population sequence number, assigned by
    /// [`sort_priorities`](Self::sort_priorities)
    #[inline]
    pub fn sort_seq(&self, id: TokenId) -> Option<u32> {
        self.node(id).sort_seq
    }

    /// Whether exactly one child slot remains unfilled
    pub fn only_one_unfilled_child_left(&self, id: TokenId) -> bool {
        let node = self.node(id);
        match &self.grammar.ty(node.type_id).shape {
            Shape::Aggregate { fields } => fields.len().saturating_sub(node.next_field) == 1,
            Shape::Variant { .. } => !node.populated,
            Shape::Terminal { .. } => false,
        }
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// Mark the token skippable; one-way and idempotent
    pub(crate) fn mark_optional(&mut self, id: TokenId) {
        self.node_mut(id).optional = true;
    }

    /// Clear populated state without clearing the production value
    ///
    /// Used to retry an earlier sibling after a later one fails.
    pub(crate) fn drop_populated(&mut self, id: TokenId) {
        let node = self.node_mut(id);
        node.populated = false;
        node.end = None;
        node.sort_seq = None;
        node.meta_tokens.clear();
    }

    /// Record a successful population ending at `end`
    pub(crate) fn on_populated(&mut self, id: TokenId, end: Location) {
        debug_assert!(!self.node(id).populated);
        let node = self.node_mut(id);
        node.populated = true;
        node.failed = false;
        node.end = Some(end);
    }

    /// Mark the token failed; terminal for this token
    pub(crate) fn mark_failed(&mut self, id: TokenId) {
        log_debug!("match failed: {}", self.tag(id));
        self.node_mut(id).failed = true;
    }

    pub(crate) fn set_value(&mut self, id: TokenId, value: RuleValue) {
        self.node_mut(id).value = Some(value);
    }

    pub(crate) fn add_meta_token(&mut self, id: TokenId, value: RuleValue) {
        self.node_mut(id).meta_tokens.push(value);
    }

    pub(crate) fn set_next_field(&mut self, id: TokenId, index: usize) {
        self.node_mut(id).next_field = index;
    }

    /// Remove and return the highest-priority untried alternative
    pub(crate) fn take_alternative(&mut self, id: TokenId) -> Option<TypeId> {
        let node = self.node_mut(id);
        if node.untried.is_empty() {
            None
        } else {
            Some(node.untried.remove(0))
        }
    }

    /// Remove `id` from its parent's child sequence and mark it discarded
    pub(crate) fn detach(&mut self, id: TokenId) {
        log_debug!("invalidating {}", self.tag(id));
        let parent = self.node(id).parent;
        if let Some(parent) = parent {
            let removed_index = self.node(id).child_index;
            self.node_mut(parent).children.remove(removed_index);
            let later: Vec<TokenId> = self.node(parent).children[removed_index..].to_vec();
            for sibling in later {
                self.node_mut(sibling).child_index -= 1;
            }
        }
        self.node_mut(id).detached = true;
    }

    /// Assign this token's post-order population sequence number
    ///
    /// Runs once per population: children are numbered before their
    /// parent, and a dropped-then-repopulated token is renumbered.
    pub(crate) fn sort_priorities(&mut self, id: TokenId) {
        if self.node(id).sort_seq.is_none() {
            self.sort_counter += 1;
            let seq = self.sort_counter;
            self.node_mut(id).sort_seq = Some(seq);
        }
    }

    // ========================================================================
    // Lookahead
    // ========================================================================

    /// Lookahead-driven optionality, invoked on failure at byte offset `from`
    ///
    /// Reads the failing field's optionality condition, skips ignored
    /// characters and marks the token optional when the condition literal
    /// follows. The decision cascades upward through ancestors that have
    /// exactly one unfilled child left.
    pub(crate) fn lookahead(&mut self, id: TokenId, source: &str, from: usize) {
        let mut current = id;
        loop {
            let condition = self
                .target_field(current)
                .and_then(|d| d.optional_condition())
                .map(str::to_string);
            if let Some(condition) = condition {
                let ignored = self.ignored_characters(current).map(str::to_string);
                let start = first_non_ignored(ignored.as_deref(), source, from);
                if source[start..].starts_with(condition.as_str())
                    && !self.node(current).optional
                {
                    log_debug!("lookahead matched '{}' for {}", condition, self.tag(current));
                    self.mark_optional(current);
                }
            }
            let parent = match self.node(current).parent {
                Some(p) => p,
                None => break,
            };
            if !self.only_one_unfilled_child_left(parent) {
                break;
            }
            current = parent;
        }
    }
}

/// First byte offset at or after `from` whose character is not in the
/// ignored set
pub(crate) fn first_non_ignored(ignored: Option<&str>, source: &str, from: usize) -> usize {
    let ignored = match ignored {
        Some(chars) if !chars.is_empty() => chars,
        _ => return from,
    };
    let mut offset = from;
    for ch in source[from..].chars() {
        if !ignored.contains(ch) {
            break;
        }
        offset += ch.len_utf8();
    }
    offset
}

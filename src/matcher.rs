//! Recursive-descent matching over the token arena
//!
//! The matcher realizes the contracts the token state machine exposes:
//! aggregates match their fields left to right, variants try their cases
//! in priority order, and a failure walks back to the nearest populated
//! sibling with untried alternatives, resets it and resumes from there.
//! Lookahead runs on every field failure before traceback, so optional
//! trailing fields are skipped instead of failing their aggregate.
//!
//! Variant populations also run priority rotation: a freshly populated
//! operator chain is re-parented so lower-priority operators sit nearer
//! the root, which turns right-recursive operator productions into
//! precedence-correct trees.

use crate::error::ParseError;
use crate::grammar::{FieldDescriptor, Grammar, Shape, TokenPattern, TypeId};
use crate::location::Location;
use crate::pattern_cache;
use crate::rule::{RuleValue, ValueBody};
use crate::token::{first_non_ignored, FieldRef, TokenId, TokenTree};
use crate::trace::{log_debug, log_error};
use std::sync::Arc;

enum Step {
    Matched { end: Location },
    Failed,
}

pub(crate) struct Matcher<'a> {
    grammar: Arc<Grammar>,
    tree: TokenTree,
    input: &'a str,
    parse_root: TypeId,
    furthest: Location,
}

impl<'a> Matcher<'a> {
    pub(crate) fn new(grammar: Arc<Grammar>, parse_root: TypeId, input: &'a str) -> Self {
        let tree = TokenTree::new(grammar.clone());
        Self {
            grammar,
            tree,
            input,
            parse_root,
            furthest: Location::start(),
        }
    }

    /// Match the parse root against the entire input
    ///
    /// A match that leaves unconsumed input resumes the root's untried
    /// alternatives; the parse either consumes everything or fails.
    pub(crate) fn run(
        mut self,
        source_name: &str,
    ) -> Result<(TokenTree, TokenId, RuleValue), ParseError> {
        let root = self
            .tree
            .create(self.parse_root, None, None, Location::start());

        loop {
            match self.match_node(root, Location::start()) {
                Step::Matched { end } => {
                    let ignored = self.tree.ignored_characters(root).map(str::to_string);
                    let rest = first_non_ignored(ignored.as_deref(), self.input, end.offset);
                    if rest >= self.input.len() {
                        let value = match self.tree.token(root) {
                            Some(value) => value.clone(),
                            None => unreachable!("populated root token has a value"),
                        };
                        return Ok((self.tree, root, value));
                    }

                    log_debug!(
                        "input remains after {} at offset {}, resuming alternatives",
                        self.tree.tag(root),
                        rest
                    );
                    self.note_furthest(Location::from_offset(self.input, rest));
                    if self.tree.alternatives_left(root) > 0 {
                        self.tree.drop_populated(root);
                        continue;
                    }
                    log_error!(
                        "parse of '{}' failed: unconsumed input at {}",
                        source_name,
                        self.furthest
                    );
                    return Err(ParseError::Failed {
                        source: source_name.to_string(),
                        furthest: self.furthest,
                    });
                }
                Step::Failed => {
                    log_error!(
                        "parse of '{}' failed: alternatives exhausted, furthest {}",
                        source_name,
                        self.furthest
                    );
                    return Err(ParseError::Failed {
                        source: source_name.to_string(),
                        furthest: self.furthest,
                    });
                }
            }
        }
    }

    fn note_furthest(&mut self, location: Location) {
        if location > self.furthest {
            self.furthest = location;
        }
    }

    fn match_node(&mut self, id: TokenId, at: Location) -> Step {
        let type_id = self.tree.token_type(id);
        match self.grammar.ty(type_id).shape.clone() {
            Shape::Terminal { pattern } => self.match_terminal(id, at, &pattern),
            Shape::Aggregate { fields } => self.match_aggregate(id, at, &fields),
            Shape::Variant { .. } => self.match_variant(id, at),
        }
    }

    // ========================================================================
    // Terminals
    // ========================================================================

    fn match_terminal(&mut self, id: TokenId, at: Location, pattern: &TokenPattern) -> Step {
        let ignored = self.tree.ignored_characters(id).map(str::to_string);
        let start_offset = first_non_ignored(ignored.as_deref(), self.input, at.offset);
        let start = Location::from_offset(self.input, start_offset);

        let matched_len = match pattern {
            TokenPattern::Literal(text) => self.input[start_offset..]
                .starts_with(text.as_str())
                .then(|| text.len()),
            TokenPattern::Pattern(pattern) => {
                pattern_cache::match_at(pattern, self.input, start_offset)
            }
        };

        match matched_len {
            Some(len) => {
                let text = &self.input[start_offset..start_offset + len];
                let end = start.advance_over(text);
                log_debug!("matched {} as '{}'", self.tree.tag(id), text);
                self.tree.set_value(
                    id,
                    RuleValue {
                        type_id: self.tree.token_type(id),
                        location: start,
                        end,
                        body: ValueBody::Terminal(text.to_string()),
                    },
                );
                self.tree.on_populated(id, end);
                self.tree.sort_priorities(id);
                self.note_furthest(end);
                Step::Matched { end }
            }
            None => {
                self.note_furthest(start);
                self.tree.mark_failed(id);
                Step::Failed
            }
        }
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    fn match_aggregate(&mut self, id: TokenId, at: Location, fields: &[FieldDescriptor]) -> Step {
        let type_id = self.tree.token_type(id);
        let mut slots: Vec<Option<RuleValue>> = Vec::with_capacity(fields.len());
        let mut metas: Vec<(usize, RuleValue)> = Vec::new();
        let mut field_index = 0;
        let mut pos = at;

        'fields: while field_index < fields.len() {
            self.tree.set_next_field(id, field_index);
            let declared = fields[field_index].token_type;
            let resolved = self.grammar.resolve_override(self.parse_root, declared);
            let child = self.tree.create(
                resolved,
                Some(id),
                Some(FieldRef {
                    owner: type_id,
                    index: field_index,
                }),
                pos,
            );
            let mut current = child;
            let mut step = self.match_node(child, pos);

            loop {
                match step {
                    Step::Matched { end } => {
                        let value = match self.tree.token(current) {
                            Some(value) => value.clone(),
                            None => unreachable!("populated child token has a value"),
                        };
                        if self.tree.is_meta_token(current) {
                            metas.push((field_index, value));
                            slots.push(None);
                        } else {
                            slots.push(Some(value));
                        }
                        pos = end;
                        field_index += 1;
                        continue 'fields;
                    }
                    Step::Failed => {
                        self.tree.lookahead(current, self.input, pos.offset);
                        if self.tree.is_optional(current) && !self.tree.is_populated(current) {
                            self.tree.detach(current);
                            slots.push(None);
                            field_index += 1;
                            continue 'fields;
                        }

                        match self.find_retry_sibling(id) {
                            Some((retry_field, sibling)) => {
                                self.detach_after(id, sibling);
                                self.tree.drop_populated(sibling);
                                slots.truncate(retry_field);
                                metas.retain(|(i, _)| *i < retry_field);
                                pos = self.tree.location(sibling);
                                field_index = retry_field;
                                self.tree.set_next_field(id, retry_field);
                                log_debug!(
                                    "traceback into {} at field {}",
                                    self.tree.tag(sibling),
                                    retry_field
                                );
                                current = sibling;
                                step = self.match_variant(sibling, pos);
                            }
                            None => {
                                self.tree.mark_failed(id);
                                return Step::Failed;
                            }
                        }
                    }
                }
            }
        }

        for (_, value) in metas {
            self.tree.add_meta_token(id, value);
        }
        self.tree.set_value(
            id,
            RuleValue {
                type_id,
                location: at,
                end: pos,
                body: ValueBody::Aggregate(slots),
            },
        );
        self.tree.on_populated(id, pos);
        self.tree.sort_priorities(id);
        Step::Matched { end: pos }
    }

    /// Nearest earlier populated sibling with untried alternatives
    fn find_retry_sibling(&self, id: TokenId) -> Option<(usize, TokenId)> {
        for index in (0..self.tree.child_count(id)).rev() {
            let child = self.tree.child(id, index)?;
            if self.tree.is_populated(child) && self.tree.alternatives_left(child) > 0 {
                if let Some(field_index) = self.tree.field_index(child) {
                    return Some((field_index, child));
                }
            }
        }
        None
    }

    /// Detach every child of `id` after `keep`
    fn detach_after(&mut self, id: TokenId, keep: TokenId) {
        let keep_index = self.tree.position(keep);
        while self.tree.child_count(id) > keep_index + 1 {
            let last_index = self.tree.child_count(id) - 1;
            if let Some(child) = self.tree.child(id, last_index) {
                self.tree.detach(child);
            }
        }
    }

    // ========================================================================
    // Variants
    // ========================================================================

    fn match_variant(&mut self, id: TokenId, at: Location) -> Step {
        // A reset token may still carry the child of its dropped population.
        while let Some(child) = self.tree.child(id, 0) {
            self.tree.detach(child);
        }

        while let Some(case) = self.tree.take_alternative(id) {
            let resolved = self.grammar.resolve_override(self.parse_root, case);
            let child = self.tree.create(resolved, Some(id), None, at);
            match self.match_node(child, at) {
                Step::Matched { end } => {
                    let inner = match self.tree.token(child) {
                        Some(value) => value.clone(),
                        None => unreachable!("populated case token has a value"),
                    };
                    self.tree.set_value(
                        id,
                        RuleValue {
                            type_id: self.tree.token_type(id),
                            location: inner.location,
                            end: inner.end,
                            body: ValueBody::Variant(Box::new(inner)),
                        },
                    );
                    self.tree.on_populated(id, end);
                    self.tree.sort_priorities(id);
                    self.rotate(id);
                    return Step::Matched { end };
                }
                Step::Failed => {
                    self.tree.detach(child);
                }
            }
        }

        self.tree.mark_failed(id);
        Step::Failed
    }

    /// Rewrite a freshly populated variant value for operator precedence
    fn rotate(&mut self, id: TokenId) {
        if let Some(value) = self.tree.token(id).cloned() {
            let rotated = rotate_value(&self.grammar, value);
            self.tree.set_value(id, rotated);
        }
    }
}

// ============================================================================
// Priority rotation
// ============================================================================

/// Re-parent right-recursive operator chains by priority
///
/// A variant holding an operator aggregate whose rightmost operand is a
/// lower-priority operator gets rotated: the inner operator moves up and
/// adopts the outer one as its leftmost operand. Equal priorities stay
/// right-associated. Runs to a fixed point at each level; inner levels
/// were already rotated when they populated.
pub(crate) fn rotate_value(grammar: &Grammar, value: RuleValue) -> RuleValue {
    let mut current = value;
    loop {
        match try_rotate(grammar, &current) {
            Some(rotated) => current = rotated,
            None => return current,
        }
    }
}

fn try_rotate(grammar: &Grammar, value: &RuleValue) -> Option<RuleValue> {
    let outer_case = match &value.body {
        ValueBody::Variant(inner) => inner.as_ref(),
        _ => return None,
    };
    let outer_ty = grammar.ty(outer_case.type_id);
    if !outer_ty.propagate_priority {
        return None;
    }
    let outer_slots = match &outer_case.body {
        ValueBody::Aggregate(slots) => slots,
        _ => return None,
    };
    let last = last_present_index(outer_slots)?;
    let wrapper = outer_slots[last].as_ref()?;
    let inner_case = match &wrapper.body {
        ValueBody::Variant(inner) => inner.as_ref(),
        _ => return None,
    };
    let inner_ty = grammar.ty(inner_case.type_id);
    if !inner_ty.propagate_priority || inner_ty.priority >= outer_ty.priority {
        return None;
    }
    let inner_slots = match &inner_case.body {
        ValueBody::Aggregate(slots) => slots,
        _ => return None,
    };
    let first = first_present_index(inner_slots)?;
    let operand = inner_slots[first].as_ref()?.clone();

    // Operand slots stay variant-wrapped like the slot they move into.
    let operand = match operand.body {
        ValueBody::Variant(_) => operand,
        _ => RuleValue {
            type_id: wrapper.type_id,
            location: operand.location,
            end: operand.end,
            body: ValueBody::Variant(Box::new(operand)),
        },
    };

    // The outer operator takes the inner one's first operand as its tail.
    let mut new_outer_slots = outer_slots.clone();
    let new_outer_end = operand.end;
    new_outer_slots[last] = Some(operand);
    let new_outer = RuleValue {
        type_id: outer_case.type_id,
        location: outer_case.location,
        end: new_outer_end,
        body: ValueBody::Aggregate(new_outer_slots),
    };
    let wrapped_outer = RuleValue {
        type_id: wrapper.type_id,
        location: new_outer.location,
        end: new_outer.end,
        body: ValueBody::Variant(Box::new(new_outer)),
    };

    // The inner operator moves up, adopting the outer as its head.
    let mut new_inner_slots = inner_slots.clone();
    new_inner_slots[first] = Some(wrapped_outer);
    let new_inner = RuleValue {
        type_id: inner_case.type_id,
        location: outer_case.location,
        end: inner_case.end,
        body: ValueBody::Aggregate(new_inner_slots),
    };

    Some(RuleValue {
        type_id: value.type_id,
        location: value.location,
        end: value.end,
        body: ValueBody::Variant(Box::new(new_inner)),
    })
}

fn last_present_index(slots: &[Option<RuleValue>]) -> Option<usize> {
    slots.iter().rposition(Option::is_some)
}

fn first_present_index(slots: &[Option<RuleValue>]) -> Option<usize> {
    slots.iter().position(Option::is_some)
}

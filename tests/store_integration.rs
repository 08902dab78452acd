//! Serialization round trips for completed rule trees.

use linkparse::{field, Grammar, GrammarBuilder, Parser, Rule, StoreError};
use proptest::prelude::*;
use std::sync::Arc;

fn arithmetic() -> Arc<Grammar> {
    let mut g = GrammarBuilder::new();
    let number = g.terminal("store.Number", "[0-9]+");
    let plus = g.literal("store.Plus", "+");
    let star = g.literal("store.Star", "*");
    let expr = g.declare("store.Expr");
    let sum = g.aggregate(
        "store.Sum",
        vec![
            field("left", number),
            field("op", plus),
            field("right", expr),
        ],
    );
    let product = g.aggregate(
        "store.Product",
        vec![
            field("left", number),
            field("op", star),
            field("right", expr),
        ],
    );
    g.define_variant(expr, vec![sum, product, number]);
    g.adjust_priority(sum, 10, true);
    g.adjust_priority(product, 20, true);
    g.root(expr);
    Arc::new(g.build().unwrap())
}

fn round_trip(grammar: &Arc<Grammar>, rule: &Rule) -> Rule {
    let mut buffer = Vec::new();
    rule.store(&mut buffer).unwrap();
    Rule::load(grammar, buffer.as_slice()).unwrap()
}

#[test]
fn test_round_trip_preserves_values_and_positions() {
    let grammar = arithmetic();
    let parser = Parser::with_grammar(grammar.clone());
    let rule = parser.parse("input", "12+345").unwrap();

    let loaded = round_trip(&grammar, &rule);
    assert_eq!(loaded, rule);
    assert_eq!(loaded.value(), rule.value());
    assert_eq!(loaded.text(), "12+345");
    assert_eq!(loaded.location(), rule.location());
    assert_eq!(loaded.end(), rule.end());
}

#[test]
fn test_round_trip_rotated_tree() {
    let grammar = arithmetic();
    let parser = Parser::with_grammar(grammar.clone());
    // Rotation puts an operator value into a slot declared as a number
    let rule = parser.parse("input", "1*2+3").unwrap();

    let loaded = round_trip(&grammar, &rule);
    assert_eq!(loaded, rule);
    let sum = loaded.case().unwrap();
    assert_eq!(sum.type_name(), "store.Sum");
    assert_eq!(sum.field("left").unwrap().text(), "1*2");
}

#[test]
fn test_round_trip_with_skipped_optional_field() {
    let mut g = GrammarBuilder::new();
    let a = g.literal("storeopt.A", "a");
    let b = g.literal("storeopt.B", "b");
    let semi = g.literal("storeopt.Semi", ";");
    let root = g.aggregate(
        "storeopt.Root",
        vec![
            field("a", a),
            field("b", b).when_followed_by(";"),
            field("semi", semi),
        ],
    );
    g.root(root);
    let grammar = Arc::new(g.build().unwrap());
    let parser = Parser::with_grammar(grammar.clone());

    let rule = parser.parse("input", "a;").unwrap();
    let loaded = round_trip(&grammar, &rule);
    assert_eq!(loaded, rule);
    assert!(loaded.field("b").is_none());
}

#[test]
fn test_load_rejects_non_tree_input() {
    let grammar = arithmetic();
    assert!(matches!(
        Rule::load(&grammar, &b"[1, 2, 3]"[..]),
        Err(StoreError::Format(_))
    ));
    assert!(matches!(
        Rule::load(&grammar, &b"not json at all"[..]),
        Err(StoreError::Format(_))
    ));
}

#[test]
fn test_load_rejects_tree_from_other_grammar() {
    let grammar = arithmetic();
    let parser = Parser::with_grammar(grammar.clone());
    let rule = parser.parse("input", "7").unwrap();
    let mut buffer = Vec::new();
    rule.store(&mut buffer).unwrap();

    let mut g = GrammarBuilder::new();
    let word = g.terminal("storeother.Word", "[a-z]+");
    g.root(word);
    let other = Arc::new(g.build().unwrap());

    assert!(matches!(
        Rule::load(&other, buffer.as_slice()),
        Err(StoreError::NotARule { .. })
    ));
}

fn expr_strategy() -> impl Strategy<Value = String> {
    (
        1u32..1000,
        prop::collection::vec((any::<bool>(), 1u32..1000), 0..6),
    )
        .prop_map(|(first, rest)| {
            let mut expr = first.to_string();
            for (multiply, number) in rest {
                expr.push(if multiply { '*' } else { '+' });
                expr.push_str(&number.to_string());
            }
            expr
        })
}

proptest! {
    #[test]
    fn prop_store_load_round_trip(expr in expr_strategy()) {
        let grammar = arithmetic();
        let parser = Parser::with_grammar(grammar.clone());
        let rule = parser.parse("prop", &expr).unwrap();

        let loaded = round_trip(&grammar, &rule);
        prop_assert_eq!(&loaded, &rule);
        prop_assert_eq!(loaded.text(), expr);
    }
}

//! End-to-end parsing scenarios: lookahead optionality, traceback,
//! priority rotation, meta tokens and failure reporting.

use linkparse::{field, GrammarBuilder, Location, ParseError, Parser, ValueBody};

// ============================================================================
// Lookahead-driven optionality
// ============================================================================

fn statement_grammar() -> Parser {
    let mut g = GrammarBuilder::new();
    let a = g.literal("stmt.A", "a");
    let b = g.literal("stmt.B", "b");
    let semi = g.literal("stmt.Semi", ";");
    let root = g.aggregate(
        "stmt.Root",
        vec![
            field("a", a),
            field("b", b).when_followed_by(";"),
            field("semi", semi),
        ],
    );
    g.root(root);
    Parser::new(g.build().unwrap())
}

#[test]
fn test_lookahead_skips_optional_trailing_field() {
    let parser = statement_grammar();

    // "b" is absent but ";" follows at the failure position, so the
    // optional field is skipped and the parse succeeds
    let rule = parser.parse("input", "a;").unwrap();
    assert_eq!(rule.text(), "a;");
    assert!(rule.field("b").is_none());
    assert_eq!(rule.field("semi").unwrap().text(), ";");
}

#[test]
fn test_optional_field_still_matches_when_present() {
    let parser = statement_grammar();
    let rule = parser.parse("input", "ab;").unwrap();
    assert_eq!(rule.field("b").unwrap().text(), "b");
}

#[test]
fn test_lookahead_condition_not_met_fails() {
    let parser = statement_grammar();
    // Neither "b" nor the ";" condition follows "a"
    assert!(parser.parse("input", "ax;").is_err());
}

#[test]
fn test_lookahead_skips_ignored_characters() {
    let mut g = GrammarBuilder::new();
    let a = g.literal("ws.A", "a");
    let b = g.literal("ws.B", "b");
    let semi = g.literal("ws.Semi", ";");
    let root = g.aggregate(
        "ws.Root",
        vec![
            field("a", a),
            field("b", b).when_followed_by(";"),
            field("semi", semi),
        ],
    );
    g.ignore_characters(root, " \t");
    g.root(root);
    let parser = Parser::new(g.build().unwrap());

    // Whitespace sits between the failure position and the ";" condition
    let rule = parser.parse("input", "a  ;").unwrap();
    assert!(rule.field("b").is_none());
    assert_eq!(rule.field("semi").unwrap().text(), ";");
}

// ============================================================================
// Traceback
// ============================================================================

#[test]
fn test_traceback_resets_earlier_sibling() {
    let mut g = GrammarBuilder::new();
    let ab = g.literal("tb.AB", "ab");
    let a = g.literal("tb.A", "a");
    let v = g.variant("tb.V", vec![ab, a]);
    let b = g.literal("tb.B", "b");
    let root = g.aggregate("tb.Root", vec![field("v", v), field("b", b)]);
    g.root(root);
    let parser = Parser::new(g.build().unwrap());

    // The variant greedily matches "ab", starving the "b" field; traceback
    // resets it to its untried "a" alternative
    let rule = parser.parse("input", "ab").unwrap();
    assert_eq!(rule.text(), "ab");
    let v = rule.field("v").unwrap();
    assert_eq!(v.text(), "a");
    assert_eq!(v.case().unwrap().type_name(), "tb.A");
    assert_eq!(rule.field("b").unwrap().text(), "b");
}

#[test]
fn test_traceback_exhaustion_fails_whole_parse() {
    let mut g = GrammarBuilder::new();
    let ab = g.literal("tbx.AB", "ab");
    let a = g.literal("tbx.A", "a");
    let v = g.variant("tbx.V", vec![ab, a]);
    let c = g.literal("tbx.C", "c");
    let root = g.aggregate("tbx.Root", vec![field("v", v), field("c", c)]);
    g.root(root);
    let parser = Parser::new(g.build().unwrap());

    assert!(parser.parse("input", "ab").is_err());
}

#[test]
fn test_root_variant_retries_on_leftover_input() {
    let mut g = GrammarBuilder::new();
    let long = g.literal("lv.Long", "xy");
    let short = g.literal("lv.Short", "x");
    let v = g.variant("lv.V", vec![long, short]);
    g.root(v);
    let parser = Parser::new(g.build().unwrap());

    // Both alternatives match a prefix of "xz"; neither consumes the
    // whole input, so the parse fails rather than returning a partial tree
    assert!(parser.parse("input", "xz").is_err());
    assert_eq!(parser.parse("input", "xy").unwrap().text(), "xy");
    assert_eq!(parser.parse("input", "x").unwrap().text(), "x");
}

// ============================================================================
// Priority rotation
// ============================================================================

fn arithmetic() -> Parser {
    let mut g = GrammarBuilder::new();
    let number = g.terminal("arith.Number", "[0-9]+");
    let plus = g.literal("arith.Plus", "+");
    let star = g.literal("arith.Star", "*");
    let expr = g.declare("arith.Expr");
    let sum = g.aggregate(
        "arith.Sum",
        vec![
            field("left", number),
            field("op", plus),
            field("right", expr),
        ],
    );
    let product = g.aggregate(
        "arith.Product",
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
    Parser::new(g.build().unwrap())
}

#[test]
fn test_rotation_orders_operators_by_priority() {
    let parser = arithmetic();
    let rule = parser.parse("input", "1*2+3").unwrap();

    // The lower-priority sum ends up at the root
    let sum = rule.case().unwrap();
    assert_eq!(sum.type_name(), "arith.Sum");
    let left = sum.field("left").unwrap();
    assert_eq!(left.case().unwrap().type_name(), "arith.Product");
    assert_eq!(left.text(), "1*2");
    assert_eq!(sum.field("right").unwrap().text(), "3");
}

#[test]
fn test_rotation_preserves_text_and_span() {
    let parser = arithmetic();
    let rule = parser.parse("input", "1*2*3+4").unwrap();
    assert_eq!(rule.text(), "1*2*3+4");
    assert_eq!(rule.location(), Location::start());
    assert_eq!(rule.end().offset, 7);

    let sum = rule.case().unwrap();
    assert_eq!(sum.type_name(), "arith.Sum");
    assert_eq!(sum.field("left").unwrap().text(), "1*2*3");
}

#[test]
fn test_equal_priorities_right_associate() {
    let parser = arithmetic();
    let rule = parser.parse("input", "1+2+3").unwrap();
    let sum = rule.case().unwrap();
    assert_eq!(sum.field("left").unwrap().text(), "1");
    assert_eq!(sum.field("right").unwrap().text(), "2+3");
}

// ============================================================================
// Meta tokens
// ============================================================================

#[test]
fn test_meta_tokens_captured_outside_structure() {
    let mut g = GrammarBuilder::new();
    let word = g.terminal("meta.Word", "[a-z]+");
    let note = g.terminal("meta.Note", "#[a-z]*");
    let semi = g.literal("meta.Semi", ";");
    let root = g.aggregate(
        "meta.Root",
        vec![
            field("word", word),
            field("note", note).optional(),
            field("semi", semi),
        ],
    );
    g.meta(note);
    g.root(root);
    let parser = Parser::new(g.build().unwrap());

    let (rule, tree, token) = parser.parse_with_tokens("input", "hi#note;").unwrap();
    // The note matched but is not a structural child
    assert!(rule.field("note").is_none());
    match &rule.value().body {
        ValueBody::Aggregate(slots) => assert!(slots[1].is_none()),
        other => panic!("unexpected body: {:?}", other),
    }
    let metas = tree.meta_tokens(token);
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].text(), "#note");

    // Without the note nothing is captured
    let (_, tree, token) = parser.parse_with_tokens("input", "hi;").unwrap();
    assert!(tree.meta_tokens(token).is_empty());
}

// ============================================================================
// Failure reporting and diagnostics
// ============================================================================

#[test]
fn test_failure_reports_furthest_position() {
    let parser = statement_grammar();
    match parser.parse("demo.txt", "ax").unwrap_err() {
        ParseError::Failed { source, furthest } => {
            assert_eq!(source, "demo.txt");
            // Matching got past "a" before anything failed
            assert!(furthest.offset >= 1);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_token_tree_diagnostics() {
    let parser = statement_grammar();
    let (_, tree, root) = parser.parse_with_tokens("input", "ab;").unwrap();

    assert!(tree.is_populated(root));
    assert_eq!(tree.tag(root), "stmt.Root@1:1");

    let dump = tree.dump_tree(root);
    assert!(dump.contains("stmt.Root@1:1"));
    assert!(dump.contains("stmt.Semi@1:3"));

    let mut count = 0;
    tree.visit(root, |_| count += 1);
    assert_eq!(count, 4);
}

#[test]
fn test_ignored_characters_trailing_and_leading() {
    let mut g = GrammarBuilder::new();
    let word = g.terminal("sp.Word", "[a-z]+");
    let semi = g.literal("sp.Semi", ";");
    let root = g.aggregate("sp.Root", vec![field("word", word), field("semi", semi)]);
    g.ignore_characters(root, " \t\n");
    g.root(root);
    let parser = Parser::new(g.build().unwrap());

    let rule = parser.parse("input", "  hello ;\n").unwrap();
    assert_eq!(rule.field("word").unwrap().text(), "hello");
    assert_eq!(rule.field("word").unwrap().location().column, 3);
}

#[test]
fn test_nested_parse_positions() {
    let parser = arithmetic();
    let rule = parser.parse("input", "10+20").unwrap();
    let sum = rule.case().unwrap();
    let left = sum.field("left").unwrap();
    let op = sum.field("op").unwrap();
    let right = sum.field("right").unwrap();

    assert_eq!(left.location().offset, 0);
    assert_eq!(op.location().offset, 2);
    assert_eq!(right.location().offset, 3);
    assert_eq!(right.end().offset, 5);

    // Sibling navigation across the aggregate
    assert!(left.next_token().unwrap().ptr_eq(op));
    assert!(op.next_token().unwrap().ptr_eq(right));
    assert!(right.next_token().is_none());
    assert_eq!(left.parent().unwrap().type_name(), "arith.Sum");
}

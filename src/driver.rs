//! Top-level parse entry point

use crate::error::ParseError;
use crate::grammar::{Grammar, TypeId};
use crate::matcher::Matcher;
use crate::rule::{build_rule, Rule};
use crate::token::{TokenId, TokenTree};
use std::sync::Arc;

/// Parses input against one root production of a [`Grammar`]
///
/// A parser is cheap to construct and holds no parse state; one instance
/// can serve many inputs, and separate instances can run in separate
/// threads over a shared grammar.
pub struct Parser {
    grammar: Arc<Grammar>,
    root: TypeId,
}

impl Parser {
    /// A parser rooted at the grammar's default root production
    pub fn new(grammar: Grammar) -> Self {
        Self::with_grammar(Arc::new(grammar))
    }

    /// A parser over a shared grammar, rooted at its default root
    pub fn with_grammar(grammar: Arc<Grammar>) -> Self {
        let root = grammar.root();
        Self { grammar, root }
    }

    /// A parser rooted at the named production
    pub fn for_type(grammar: Arc<Grammar>, name: &str) -> Result<Self, ParseError> {
        let root = grammar
            .type_by_name(name)
            .ok_or_else(|| ParseError::UnknownType {
                name: name.to_string(),
            })?;
        Ok(Self { grammar, root })
    }

    /// The grammar this parser matches against
    #[inline]
    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    /// Match the root production against the entire input
    ///
    /// `name` identifies the source in failure reports. Succeeds only
    /// when the whole input is consumed; a match that leaves input behind
    /// resumes the root's untried alternatives before failing.
    pub fn parse(&self, name: &str, source: &str) -> Result<Rule, ParseError> {
        let (_, _, value) = Matcher::new(self.grammar.clone(), self.root, source).run(name)?;
        Ok(build_rule(&self.grammar, &value, None))
    }

    /// Like [`parse`](Self::parse), also returning the parse-state tree
    ///
    /// The returned [`TokenTree`] and root [`TokenId`] give read access
    /// to the per-token state the match left behind, for diagnostics.
    pub fn parse_with_tokens(
        &self,
        name: &str,
        source: &str,
    ) -> Result<(Rule, TokenTree, TokenId), ParseError> {
        let (tree, root, value) = Matcher::new(self.grammar.clone(), self.root, source).run(name)?;
        let rule = build_rule(&self.grammar, &value, None);
        Ok((rule, tree, root))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::{field, GrammarBuilder};

    fn grammar() -> Arc<Grammar> {
        let mut g = GrammarBuilder::new();
        let word = g.terminal("drv.Word", "[a-z]+");
        let semi = g.literal("drv.Semi", ";");
        let stmt = g.aggregate("drv.Stmt", vec![field("word", word), field("semi", semi)]);
        g.root(stmt);
        Arc::new(g.build().unwrap())
    }

    #[test]
    fn test_parse_success() {
        let parser = Parser::with_grammar(grammar());
        let rule = parser.parse("input", "hello;").unwrap();
        assert_eq!(rule.type_name(), "drv.Stmt");
        assert_eq!(rule.text(), "hello;");
        assert_eq!(rule.field("word").unwrap().text(), "hello");
    }

    #[test]
    fn test_parse_failure_names_source() {
        let parser = Parser::with_grammar(grammar());
        let err = parser.parse("broken.txt", "hello").unwrap_err();
        assert!(err.to_string().contains("broken.txt"));
    }

    #[test]
    fn test_for_type() {
        let g = grammar();
        let parser = Parser::for_type(g.clone(), "drv.Word").unwrap();
        let rule = parser.parse("input", "abc").unwrap();
        assert_eq!(rule.type_name(), "drv.Word");

        assert!(matches!(
            Parser::for_type(g, "drv.Missing"),
            Err(ParseError::UnknownType { name }) if name == "drv.Missing"
        ));
    }

    #[test]
    fn test_parse_with_tokens_exposes_state() {
        let parser = Parser::with_grammar(grammar());
        let (rule, tree, root) = parser.parse_with_tokens("input", "hi;").unwrap();
        assert!(tree.is_populated(root));
        assert!(!tree.is_failed(root));
        assert_eq!(tree.child_count(root), 2);
        assert_eq!(tree.token(root).unwrap(), &rule.value());
    }
}

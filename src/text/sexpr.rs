//! S-expression reader.
//!
//! Groups a flat token stream into the parenthesized tree the module
//! builder walks. The reader is iterative: an explicit stack of open
//! frames replaces recursion, so arbitrarily deep nesting in the input
//! cannot exhaust the call stack.

use super::token::{Span, Token, TokenKind};
use thiserror::Error;

/// A structural failure while grouping tokens into trees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message} at {span}")]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// One node of the S-expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Atom(Token),
    List { span: Span, items: Vec<SExpr> },
}

impl SExpr {
    pub fn span(&self) -> Span {
        match self {
            SExpr::Atom(token) => token.span,
            SExpr::List { span, .. } => *span,
        }
    }

    pub fn as_atom(&self) -> Option<&Token> {
        match self {
            SExpr::Atom(token) => Some(token),
            SExpr::List { .. } => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List { items, .. } => Some(items),
            SExpr::Atom(_) => None,
        }
    }

    /// The keyword text of a bare atom (`func`, `i32.add`).
    pub fn keyword(&self) -> Option<&str> {
        self.as_atom().and_then(Token::keyword)
    }

    /// The name of a `$id` atom, without the sigil.
    pub fn id(&self) -> Option<&str> {
        self.as_atom().and_then(Token::id)
    }

    /// The keyword heading a list: `head_keyword` of `(func …)` is
    /// `func`.
    pub fn head_keyword(&self) -> Option<&str> {
        self.as_list()?.first()?.keyword()
    }

    pub fn is_list_headed_by(&self, keyword: &str) -> bool {
        self.head_keyword() == Some(keyword)
    }
}

// The derived drop glue would recurse through nested lists, so a tree
// deep enough to need the iterative reader would still blow the stack
// on teardown. Drain children into a worklist instead.
impl Drop for SExpr {
    fn drop(&mut self) {
        if let SExpr::List { items, .. } = self {
            let mut worklist = std::mem::take(items);
            while let Some(mut node) = worklist.pop() {
                if let SExpr::List { items, .. } = &mut node {
                    worklist.append(items);
                }
            }
        }
    }
}

/// An open list awaiting its closing paren.
struct Frame {
    open: Span,
    items: Vec<SExpr>,
}

/// Groups `tokens` into a sequence of top-level S-expressions.
pub fn read(tokens: Vec<Token>) -> Result<Vec<SExpr>, ParseError> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut top = Vec::new();

    for token in tokens {
        match token.kind {
            TokenKind::LeftParen => {
                stack.push(Frame {
                    open: token.span,
                    items: Vec::new(),
                });
            }
            TokenKind::RightParen => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| ParseError::new("unmatched ')'", token.span))?;
                let span = Span::new(
                    frame.open.start,
                    token.span.end,
                    frame.open.line,
                    frame.open.column,
                );
                let list = SExpr::List {
                    span,
                    items: frame.items,
                };
                match stack.last_mut() {
                    Some(parent) => parent.items.push(list),
                    None => top.push(list),
                }
            }
            _ => {
                let atom = SExpr::Atom(token);
                match stack.last_mut() {
                    Some(frame) => frame.items.push(atom),
                    None => top.push(atom),
                }
            }
        }
    }

    if let Some(frame) = stack.last() {
        return Err(ParseError::new("unclosed '('", frame.open));
    }
    Ok(top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::lexer::tokenize;

    fn read_source(source: &str) -> Result<Vec<SExpr>, ParseError> {
        read(tokenize(source).unwrap())
    }

    fn single(source: &str) -> SExpr {
        let mut forms = read_source(source).unwrap();
        assert_eq!(forms.len(), 1);
        forms.remove(0)
    }

    #[test]
    fn empty_input() {
        assert!(read_source("").unwrap().is_empty());
    }

    #[test]
    fn empty_list() {
        let form = single("()");
        assert_eq!(form.as_list(), Some(&[][..]));
    }

    #[test]
    fn nested_lists() {
        let form = single("(module (func (nop)))");
        assert_eq!(form.head_keyword(), Some("module"));
        let items = form.as_list().unwrap();
        assert!(items[1].is_list_headed_by("func"));
        assert!(items[1].as_list().unwrap()[1].is_list_headed_by("nop"));
    }

    #[test]
    fn atoms_at_top_level() {
        let forms = read_source("a b c").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0].keyword(), Some("a"));
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 100_000;
        let source = "(".repeat(depth) + &")".repeat(depth);
        let forms = read_source(&source).unwrap();
        assert_eq!(forms.len(), 1);
        // teardown of the tree must not recurse either
        drop(forms);
    }

    #[test]
    fn stray_close_paren() {
        let err = read_source("(module))").unwrap_err();
        assert!(err.to_string().contains("unmatched ')'"));
    }

    #[test]
    fn unclosed_paren_reports_opening_position() {
        let err = read_source("(module (func (").unwrap_err();
        assert!(err.to_string().contains("unclosed '('"));
        // innermost unclosed paren
        assert_eq!(err.span.column, 15);
    }

    #[test]
    fn list_span_covers_both_parens() {
        let form = single("(a b)");
        let span = form.span();
        assert_eq!((span.start, span.end), (0, 5));
    }

    #[test]
    fn id_accessor() {
        let form = single("(func $main)");
        let items = form.as_list().unwrap();
        assert_eq!(items[1].id(), Some("main"));
        assert_eq!(items[1].keyword(), None);
    }
}

use crate::errors::*;
use crate::input::Input;
use crate::sym::Sym;
use crate::utils::disp_iter;
use std::fmt::{Debug, Display, Formatter};

pub type SAtom = Sym;

#[derive(Clone)]
pub struct SList {
    list: Vec<SExpr>,
    span: Span,
}

impl SList {
    pub fn iter(&self) -> ListIter {
        ListIter {
            elems: self.list.as_slice(),
            span: self.span.clone(),
        }
    }

    pub fn loc(&self) -> Span {
        self.span.clone()
    }

    pub fn invalid(&self, error: impl ToString) -> Message {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl std::ops::Index<usize> for SList {
    type Output = SExpr;

    fn index(&self, index: usize) -> &Self::Output {
        &self.list[index]
    }
}

#[derive(Clone)]
pub enum SExpr {
    Atom(SAtom),
    List(SList),
}

impl SExpr {
    pub fn loc(&self) -> Span {
        match self {
            SExpr::Atom(atom) => atom.span_or_default(),
            SExpr::List(list) => list.loc(),
        }
    }

    pub fn invalid(&self, error: impl ToString) -> Message {
        self.loc().invalid(error)
    }

    pub fn is_atom(&self, expected_atom: &str) -> bool {
        self.as_atom().map(|a| a.canonical_str() == expected_atom).unwrap_or(false)
    }

    /// If this s-expression is the application of the function `function_name`, returns
    /// the arguments of the application.
    pub fn as_application(&self, function_name: &str) -> Option<&[SExpr]> {
        match self {
            SExpr::Atom(_) => None,
            SExpr::List(l) => match l.list.as_slice() {
                [SExpr::Atom(head), rest @ ..] if head.canonical_str() == function_name => Some(rest),
                _ => None,
            },
        }
    }

    pub fn as_list(&self) -> Option<&SList> {
        match &self {
            SExpr::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list_iter(&self) -> Option<ListIter> {
        self.as_list().map(SList::iter)
    }

    pub fn as_atom(&self) -> Option<&SAtom> {
        match self {
            SExpr::Atom(a) => Some(a),
            _ => None,
        }
    }
}

pub struct ListIter<'a> {
    elems: &'a [SExpr],
    span: Span,
}

impl<'a> ListIter<'a> {
    pub fn peek(&self) -> Option<&'a SExpr> {
        self.elems.first()
    }

    pub fn pop(&mut self) -> Res<&'a SExpr> {
        self.next()
            .ok_or_else(|| self.loc().end().invalid("Unexpected end of list"))
    }

    pub fn loc(&self) -> Span {
        self.span.clone()
    }

    pub fn invalid(&self, error: impl ToString) -> Message {
        self.loc().invalid(error)
    }

    pub fn len(&self) -> usize {
        self.elems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    pub fn pop_known_atom(&mut self, expected: &str) -> Res<()> {
        match self.next() {
            None => Err(self
                .loc()
                .end()
                .invalid(format!("Expected atom `{expected}` but got end of list"))),
            Some(sexpr) => {
                let atom = sexpr
                    .as_atom()
                    .ok_or_else(|| sexpr.invalid(format!("Expected atom `{expected}`")))?;
                if atom.canonical_str() == expected {
                    Ok(())
                } else {
                    Err(atom.invalid(format!("Expected the atom `{expected}`")))
                }
            }
        }
    }

    pub fn pop_atom(&mut self) -> Res<&'a SAtom> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected an atom but got end of list")),
            Some(sexpr) => sexpr.as_atom().ok_or_else(|| sexpr.invalid("Expected an atom")),
        }
    }

    pub fn pop_list(&mut self) -> Res<&'a SList> {
        match self.next() {
            None => Err(self.loc().end().invalid("Expected a list but got end of list")),
            Some(sexpr) => sexpr.as_list().ok_or_else(|| sexpr.invalid("Expected a list")),
        }
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a SExpr;

    fn next(&mut self) -> Option<Self::Item> {
        match self.elems.split_first() {
            None => None,
            Some((head, tail)) => {
                self.elems = tail;
                Some(head)
            }
        }
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            SExpr::Atom(a) => write!(f, "{a}"),
            SExpr::List(l) => {
                write!(f, "(")?;
                disp_iter(f, l.list.iter(), " ")?;
                write!(f, ")")
            }
        }
    }
}

impl Debug for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

// Tokens index the input by byte position; `end` is exclusive.
#[derive(Debug, PartialEq)]
enum Token {
    Sym { start: usize, end: usize },
    LParen(usize),
    RParen(usize),
}

pub fn parse(input: &Input) -> Res<SExpr> {
    let tokenized = tokenize(input);
    let mut tokens = tokenized.iter().peekable();
    let e = read(&mut tokens, input)?;
    if let Some(extra) = tokens.next() {
        let span = token_span(extra, input);
        return Err(span.invalid("Unexpected token after the top-level expression"));
    }
    Ok(e)
}

fn token_span(token: &Token, input: &Input) -> Span {
    match *token {
        Token::Sym { start, end } => Span::new(input.clone(), start, end - 1),
        Token::LParen(i) | Token::RParen(i) => Span::new(input.clone(), i, i),
    }
}

/// Cuts the input into a sequence of tokens.
fn tokenize(input: &Input) -> Vec<Token> {
    let s = input.text();
    let mut tokens = Vec::new();

    // start of the symbol under construction, if any
    let mut cur_start = None;
    // true between a ';' and the next '\n'
    let mut is_in_comment = false;

    for (index, n) in s.char_indices() {
        if n.is_whitespace() || n == '(' || n == ')' || n == ';' || is_in_comment {
            // if we were reading a symbol, we have reached its end
            if let Some(start) = cur_start {
                tokens.push(Token::Sym { start, end: index });
                cur_start = None;
            }

            if n == '\n' {
                is_in_comment = false;
            } else if n == ';' {
                is_in_comment = true;
            } else if !is_in_comment {
                if n == '(' {
                    tokens.push(Token::LParen(index));
                } else if n == ')' {
                    tokens.push(Token::RParen(index));
                }
            }
        } else if cur_start.is_none() {
            cur_start = Some(index);
        }
    }
    if let Some(start) = cur_start {
        tokens.push(Token::Sym { start, end: s.len() });
    }
    tokens
}

fn read(tokens: &mut std::iter::Peekable<core::slice::Iter<Token>>, src: &Input) -> Res<SExpr> {
    match tokens.next() {
        Some(&Token::Sym { start, end }) => {
            // PDDL is case-insensitive: canonicalize to upper case
            let s = src.text()[start..end].to_ascii_uppercase();
            let span = Span::new(src.clone(), start, end - 1);
            let atom = Sym::with_source(s, span);
            Ok(SExpr::Atom(atom))
        }
        Some(&Token::LParen(start)) => {
            let mut es = Vec::new();
            loop {
                match tokens.peek() {
                    Some(&&Token::RParen(end)) => {
                        let _ = tokens.next(); // consume
                        let list = SList {
                            list: es,
                            span: Span::new(src.clone(), start, end),
                        };
                        break Ok(SExpr::List(list));
                    }
                    Some(_) => {
                        let e = read(tokens, src)?;
                        es.push(e);
                    }
                    None => {
                        let span = Span::new(src.clone(), start, start);
                        break Err(span.invalid("Unclosed parenthesis"));
                    }
                }
            }
        }
        Some(&Token::RParen(i)) => Err(Span::new(src.clone(), i, i).invalid("Unexpected closing parenthesis")),
        None => Err(Message::error("Unexpected end of input")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats_as(input: &str, output: &str) {
        let input = Input::from_string(input);
        let res = parse(&input).unwrap();
        let formatted = format!("{res}");
        assert_eq!(&formatted, output);
    }

    #[test]
    fn parsing() {
        formats_as("aa", "AA");
        formats_as(" aa", "AA");
        formats_as("aa ", "AA");
        formats_as(" aa ", "AA");
        formats_as("(a b)", "(A B)");
        formats_as("(a (b c) d)", "(A (B C) D)");
        formats_as(" ( a  ( b  c )   d  )   ", "(A (B C) D)");
        formats_as(
            " ( a  (
        b  c )   d  )   ",
            "(A (B C) D)",
        );
        formats_as(
            " ( a  ( b ; (y x)
         c )   d
           )
          ",
            "(A (B C) D)",
        );
    }

    #[test]
    fn rejects_malformed() {
        let unclosed = Input::from_string("(a (b c)");
        assert!(parse(&unclosed).is_err());
        let stray = Input::from_string(")");
        assert!(parse(&stray).is_err());
        let trailing = Input::from_string("(a) (b)");
        assert!(parse(&trailing).is_err());
    }
}

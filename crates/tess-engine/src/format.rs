//! Parser for the native filter language.
//!
//! ```text
//! filter     := or
//! or         := and (("OR" | "||") and)*
//! and        := unary (("AND" | "&&") unary)*
//! unary      := ("NOT" | "!") unary | primary
//! primary    := "(" filter ")" | "TRUEPREDICATE" | "FALSEPREDICATE"
//!             | "ANY" ident "." ident op operand
//!             | ident op operand
//! op         := ("==" | "=" | "!=" | "<>" | ">" | ">=" | "<" | "<=" | "CONTAINS" | "IN")
//!               ("[" ("c" | "d" | "cd") "]")?
//! operand    := "%@" | literal | "{" (literal ("," literal)*)? "}"
//! literal    := string | integer | float | "TRUE" | "FALSE" | "NIL" | "NULL"
//! ```
//!
//! Keywords are case-insensitive. Each `%@` binds the next argument.

use tess_predicate::{ComparisonOptions, Operator};
use tess_types::AttributeValue;

use crate::error::{FilterError, FilterResult};
use crate::filter::NativeFilter;

/// Parse `source`, binding placeholders to `arguments` positionally.
pub fn parse(source: &str, arguments: &[AttributeValue]) -> FilterResult<NativeFilter> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        current: 0,
        arguments,
        next_argument: 0,
        depth: 0,
    };
    let filter = parser.parse_or()?;
    parser.expect_end()?;
    if parser.next_argument < arguments.len() {
        return Err(FilterError::UnusedArguments {
            unused: arguments.len() - parser.next_argument,
        });
    }
    Ok(filter)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Placeholder,
    Op(Operator),
    And,
    Or,
    Not,
    Any,
    TruePredicate,
    FalsePredicate,
    True,
    False,
    Nil,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

#[derive(Clone, Debug)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> FilterError {
    FilterError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> FilterResult<Vec<Token>> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let peek = |i: usize| chars.get(i).map(|&(_, c)| c);

    while let Some(&(offset, c)) = chars.get(i) {
        let mut push = |kind: TokenKind, width: usize| {
            tokens.push(Token { kind, offset });
            width
        };
        i += match c {
            c if c.is_whitespace() => 1,
            '(' => push(TokenKind::LParen, 1),
            ')' => push(TokenKind::RParen, 1),
            '{' => push(TokenKind::LBrace, 1),
            '}' => push(TokenKind::RBrace, 1),
            '[' => push(TokenKind::LBracket, 1),
            ']' => push(TokenKind::RBracket, 1),
            ',' => push(TokenKind::Comma, 1),
            '.' => push(TokenKind::Dot, 1),
            '%' if peek(i + 1) == Some('@') => push(TokenKind::Placeholder, 2),
            '=' if peek(i + 1) == Some('=') => push(TokenKind::Op(Operator::Equal), 2),
            '=' => push(TokenKind::Op(Operator::Equal), 1),
            '!' if peek(i + 1) == Some('=') => push(TokenKind::Op(Operator::NotEqual), 2),
            '!' => push(TokenKind::Not, 1),
            '<' if peek(i + 1) == Some('>') => push(TokenKind::Op(Operator::NotEqual), 2),
            '<' if peek(i + 1) == Some('=') => push(TokenKind::Op(Operator::LessThanOrEqual), 2),
            '<' => push(TokenKind::Op(Operator::LessThan), 1),
            '>' if peek(i + 1) == Some('=') => {
                push(TokenKind::Op(Operator::GreaterThanOrEqual), 2)
            }
            '>' => push(TokenKind::Op(Operator::GreaterThan), 1),
            '&' if peek(i + 1) == Some('&') => push(TokenKind::And, 2),
            '|' if peek(i + 1) == Some('|') => push(TokenKind::Or, 2),
            '"' | '\'' => {
                let (text, width) = lex_string(&chars[i..], offset)?;
                push(TokenKind::Str(text), width)
            }
            c if c.is_ascii_digit()
                || (c == '-' && peek(i + 1).is_some_and(|n| n.is_ascii_digit())) =>
            {
                let (kind, width) = lex_number(&chars[i..], offset)?;
                push(kind, width)
            }
            c if c.is_alphabetic() || c == '_' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_alphanumeric() || *c == '_')
                    .count();
                let word: String = chars[i..i + width].iter().map(|&(_, c)| c).collect();
                push(keyword(word), width)
            }
            other => return Err(syntax(offset, format!("unexpected character {other:?}"))),
        };
    }
    tokens.push(Token {
        kind: TokenKind::Eof,
        offset: source.len(),
    });
    Ok(tokens)
}

fn keyword(word: String) -> TokenKind {
    match word.to_ascii_uppercase().as_str() {
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "ANY" => TokenKind::Any,
        "CONTAINS" => TokenKind::Op(Operator::Contains),
        "IN" => TokenKind::Op(Operator::In),
        "TRUEPREDICATE" => TokenKind::TruePredicate,
        "FALSEPREDICATE" => TokenKind::FalsePredicate,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        "NIL" | "NULL" => TokenKind::Nil,
        _ => TokenKind::Ident(word),
    }
}

/// Lex a quoted string starting at `chars[0]`; returns the text and the
/// number of characters consumed.
fn lex_string(chars: &[(usize, char)], offset: usize) -> FilterResult<(String, usize)> {
    let quote = chars[0].1;
    let mut text = String::new();
    let mut i = 1;
    loop {
        match chars.get(i).map(|&(_, c)| c) {
            None => return Err(syntax(offset, "unterminated string")),
            Some('\\') => {
                let escaped = chars
                    .get(i + 1)
                    .map(|&(_, c)| c)
                    .ok_or_else(|| syntax(offset, "unterminated string"))?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            Some(c) if c == quote => return Ok((text, i + 1)),
            Some(c) => {
                text.push(c);
                i += 1;
            }
        }
    }
}

fn lex_number(chars: &[(usize, char)], offset: usize) -> FilterResult<(TokenKind, usize)> {
    let mut width = usize::from(chars[0].1 == '-');
    let mut is_float = false;
    while let Some(&(_, c)) = chars.get(width) {
        let next_is_digit = chars.get(width + 1).is_some_and(|(_, n)| n.is_ascii_digit());
        if c.is_ascii_digit() {
            width += 1;
        } else if c == '.' && !is_float && next_is_digit {
            is_float = true;
            width += 1;
        } else {
            break;
        }
    }
    let text: String = chars[..width].iter().map(|&(_, c)| c).collect();
    let kind = if is_float {
        text.parse().map(TokenKind::Float).ok()
    } else {
        text.parse().map(TokenKind::Int).ok()
    };
    kind.map(|k| (k, width))
        .ok_or_else(|| syntax(offset, format!("invalid number {text}")))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    current: usize,
    arguments: &'a [AttributeValue],
    next_argument: usize,
    /// Open `NOT`s and parentheses around the current position.
    depth: usize,
}

/// Deepest `NOT` / parenthesis nesting a filter may use.
const MAX_NESTING: usize = 128;

impl Parser<'_> {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof and `advance` never moves past it.
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.current += 1;
        }
        token
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if &self.peek().kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> FilterResult<()> {
        if self.eat(&kind) {
            Ok(())
        } else {
            Err(syntax(self.peek().offset, format!("expected {what}")))
        }
    }

    fn expect_end(&mut self) -> FilterResult<()> {
        self.expect(TokenKind::Eof, "end of filter")
    }

    fn parse_or(&mut self) -> FilterResult<NativeFilter> {
        let mut children = vec![self.parse_and()?];
        while self.eat(&TokenKind::Or) {
            children.push(self.parse_and()?);
        }
        Ok(collapse(children, NativeFilter::Or))
    }

    fn parse_and(&mut self) -> FilterResult<NativeFilter> {
        let mut children = vec![self.parse_unary()?];
        while self.eat(&TokenKind::And) {
            children.push(self.parse_unary()?);
        }
        Ok(collapse(children, NativeFilter::And))
    }

    fn descend(&mut self, offset: usize) -> FilterResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax(
                offset,
                format!("filter nested deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn parse_unary(&mut self) -> FilterResult<NativeFilter> {
        let offset = self.peek().offset;
        if self.eat(&TokenKind::Not) {
            self.descend(offset)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(NativeFilter::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> FilterResult<NativeFilter> {
        let token = self.advance();
        match token.kind {
            TokenKind::LParen => {
                self.descend(token.offset)?;
                let inner = self.parse_or()?;
                self.expect(TokenKind::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            TokenKind::TruePredicate => Ok(NativeFilter::True),
            TokenKind::FalsePredicate => Ok(NativeFilter::False),
            TokenKind::Any => {
                let relation = self.parse_ident()?;
                self.expect(TokenKind::Dot, "'.'")?;
                let key = self.parse_ident()?;
                let (op, options) = self.parse_operator()?;
                let value = self.parse_operand(&key, op)?;
                Ok(NativeFilter::Any {
                    relation,
                    key,
                    op,
                    value,
                    options,
                })
            }
            TokenKind::Ident(key) => {
                let (op, options) = self.parse_operator()?;
                let value = self.parse_operand(&key, op)?;
                Ok(NativeFilter::Compare {
                    key,
                    op,
                    value,
                    options,
                })
            }
            TokenKind::Eof => Err(syntax(token.offset, "unexpected end of filter")),
            other => Err(syntax(token.offset, format!("unexpected {other:?}"))),
        }
    }

    fn parse_ident(&mut self) -> FilterResult<String> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok(name),
            _ => Err(syntax(token.offset, "expected key")),
        }
    }

    fn parse_operator(&mut self) -> FilterResult<(Operator, ComparisonOptions)> {
        let token = self.advance();
        let TokenKind::Op(op) = token.kind else {
            return Err(syntax(token.offset, "expected comparison operator"));
        };
        let mut options = ComparisonOptions::default();
        if self.eat(&TokenKind::LBracket) {
            let flags = self.advance();
            let TokenKind::Ident(flags_text) = flags.kind else {
                return Err(syntax(flags.offset, "expected modifier"));
            };
            for flag in flags_text.chars() {
                match flag {
                    'c' | 'C' => options.case_insensitive = true,
                    'd' | 'D' => options.diacritic_insensitive = true,
                    other => {
                        return Err(syntax(flags.offset, format!("unknown modifier {other:?}")))
                    }
                }
            }
            self.expect(TokenKind::RBracket, "']'")?;
        }
        Ok((op, options))
    }

    fn parse_operand(&mut self, key: &str, op: Operator) -> FilterResult<AttributeValue> {
        let value = if self.eat(&TokenKind::LBrace) {
            let mut items = Vec::new();
            if !self.eat(&TokenKind::RBrace) {
                loop {
                    items.push(self.parse_value()?);
                    if self.eat(&TokenKind::RBrace) {
                        break;
                    }
                    self.expect(TokenKind::Comma, "',' or '}'")?;
                }
            }
            AttributeValue::List(items)
        } else {
            self.parse_value()?
        };
        if op == Operator::In && value.as_list().is_none() {
            return Err(FilterError::InNeedsList {
                key: key.to_string(),
            });
        }
        Ok(value)
    }

    fn parse_value(&mut self) -> FilterResult<AttributeValue> {
        let token = self.advance();
        Ok(match token.kind {
            TokenKind::Placeholder => {
                let value = self.arguments.get(self.next_argument).cloned().ok_or(
                    FilterError::MissingArgument {
                        supplied: self.arguments.len(),
                    },
                )?;
                self.next_argument += 1;
                value
            }
            TokenKind::Str(s) => AttributeValue::String(s),
            TokenKind::Int(v) => AttributeValue::Int64(v),
            TokenKind::Float(v) => AttributeValue::Double(v),
            TokenKind::True => AttributeValue::Bool(true),
            TokenKind::False => AttributeValue::Bool(false),
            TokenKind::Nil => AttributeValue::Null,
            _ => return Err(syntax(token.offset, "expected value")),
        })
    }
}

fn collapse(
    mut children: Vec<NativeFilter>,
    build: fn(Vec<NativeFilter>) -> NativeFilter,
) -> NativeFilter {
    if children.len() == 1 {
        children.remove(0)
    } else {
        build(children)
    }
}

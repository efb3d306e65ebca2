use std::fmt;

use nom::{
    branch::alt,
    bytes::complete::{escaped, tag, take_while1},
    character::complete::{anychar, char, none_of, one_of},
    combinator::{map, opt, recognize, value},
    sequence::{delimited, preceded, terminated},
    IResult,
};

/// A single lexical element of a DTS source stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Marker: subsequent tokens come from this source file.
    File(String),
    Version,
    Plugin,
    MemReserve,
    Bits,
    DeleteNode,
    DeleteProp,
    Include,
    /// Include operand with its delimiters (`"x.h"` or `<x.h>`).
    IncludePath(String),
    /// Body of a double-quoted string, escape sequences kept verbatim.
    Str(String),
    /// Body of a single-quoted literal.
    Char(String),
    /// `&label` reference.
    Ref(String),
    /// `label:` declaration.
    Label(String),
    /// Identifier, number or node name.
    Name(String),
    /// Parenthesized expression kept verbatim, e.g. `(-5)`.
    Paren(String),
    Punct(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::File(name) => write!(f, "<file {name}>"),
            Token::Version => f.write_str("/dts-v1/"),
            Token::Plugin => f.write_str("/plugin/"),
            Token::MemReserve => f.write_str("/memreserve/"),
            Token::Bits => f.write_str("/bits/"),
            Token::DeleteNode => f.write_str("/delete-node/"),
            Token::DeleteProp => f.write_str("/delete-property/"),
            Token::Include => f.write_str("#include"),
            Token::IncludePath(path) => f.write_str(path),
            Token::Str(body) => write!(f, "\"{body}\""),
            Token::Char(body) => write!(f, "'{body}'"),
            Token::Ref(label) => write!(f, "&{label}"),
            Token::Label(label) => write!(f, "{label}:"),
            Token::Name(name) => f.write_str(name),
            Token::Paren(body) => f.write_str(body),
            Token::Punct(c) => write!(f, "{c}"),
        }
    }
}

/// The character class shared by identifiers, numbers and node names.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ",._+#@-".contains(c)
}

fn name(input: &str) -> IResult<&str, &str> {
    take_while1(is_name_char)(input)
}

fn directive(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Version, tag("/dts-v1/")),
        value(Token::Plugin, tag("/plugin/")),
        value(Token::MemReserve, tag("/memreserve/")),
        value(Token::Bits, tag("/bits/")),
        value(Token::DeleteNode, tag("/delete-node/")),
        value(Token::DeleteProp, tag("/delete-property/")),
    ))(input)
}

fn reference(input: &str) -> IResult<&str, Token> {
    map(preceded(char('&'), name), |s: &str| Token::Ref(s.to_string()))(input)
}

fn label(input: &str) -> IResult<&str, Token> {
    map(terminated(name, char(':')), |s: &str| {
        Token::Label(s.to_string())
    })(input)
}

fn plain_name(input: &str) -> IResult<&str, Token> {
    map(name, |s: &str| Token::Name(s.to_string()))(input)
}

fn paren(input: &str) -> IResult<&str, Token> {
    map(
        recognize(delimited(char('('), take_while1(|c| c != ')'), char(')'))),
        |s: &str| Token::Paren(s.to_string()),
    )(input)
}

fn double_quoted(input: &str) -> IResult<&str, Token> {
    map(
        delimited(
            char('"'),
            opt(escaped(none_of("\\\""), '\\', anychar)),
            char('"'),
        ),
        |body: Option<&str>| Token::Str(body.unwrap_or_default().to_string()),
    )(input)
}

fn single_quoted(input: &str) -> IResult<&str, Token> {
    map(
        delimited(
            char('\''),
            opt(escaped(none_of("\\'"), '\\', anychar)),
            char('\''),
        ),
        |body: Option<&str>| Token::Char(body.unwrap_or_default().to_string()),
    )(input)
}

fn punct(input: &str) -> IResult<&str, Token> {
    map(one_of("{};=<>,[]/"), Token::Punct)(input)
}

/// Scan a single token off the front of `input`. Alternatives are tried in
/// priority order, so the fixed directives win over `/` punctuation and a
/// `label:` wins over a bare name.
pub(crate) fn scan_token(input: &str) -> IResult<&str, Token> {
    alt((
        directive,
        reference,
        label,
        plain_name,
        paren,
        double_quoted,
        single_quoted,
        punct,
    ))(input)
}

//! nom grammar for queries, interpolations and mapping statements.
//!
//! ```text
//! mapping     := sep* (statement end)*
//! statement   := "let" name "=" query | target "=" query
//! query       := coalesce
//! coalesce    := or ("|" or)*
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := compare (("==" | "!=") compare)*
//! compare     := sum (("<" | "<=" | ">" | ">=") sum)*
//! sum         := product (("+" | "-") product)*
//! product     := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "-") unary | postfix
//! postfix     := primary ("." (method "(" args ")" | segment))*
//! ```
//!
//! At the top level of a mapping a newline ends the statement; inside
//! brackets and interpolations it is plain whitespace.

use super::ExprError;
use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_a, tag, take_till},
    character::complete::{alpha1, alphanumeric1, char, digit1, none_of},
    combinator::{all_consuming, cut, eof, map, not, opt, peek, recognize, value},
    error::{ContextError, ErrorKind, ParseError as NomParseError, VerboseError, VerboseErrorKind, context},
    multi::{many0, many0_count},
    sequence::{delimited, pair, preceded, separated_pair, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};

/// Functions known to the evaluator; anything else is a compile error.
pub const FUNCTIONS: &[&str] = &[
    "content",
    "deleted",
    "env",
    "json",
    "now",
    "timestamp_unix",
    "uuid_v4",
];

/// Methods known to the evaluator.
pub const METHODS: &[&str] = &[
    "contains",
    "format_json",
    "from_json",
    "join",
    "keys",
    "length",
    "lowercase",
    "not_null",
    "number",
    "or",
    "replace",
    "split",
    "string",
    "trim",
    "type",
    "uppercase",
    "values",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Coalesce,
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// Path into the evaluation context (`this.a.b` or bare `a.b`).
    This(Vec<String>),
    /// Path into the document being built by the current mapping.
    Root(Vec<String>),
    /// `$name` followed by an optional path.
    Variable(String, Vec<String>),
    /// Path applied to an arbitrary expression, e.g. `json("a").b`.
    Get(Box<Expr>, Vec<String>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `root.a.b = query`; an empty path targets the whole result.
    Assign { target: Vec<String>, value: Expr },
    /// `let name = query`
    Let { name: String, value: Expr },
}

/// Whether a newline separates statements or is plain whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Line,
    Block,
}

// ============================================================================
// Public API
// ============================================================================

/// Parse a whole mapping script.
pub fn parse_mapping(src: &str) -> Result<Vec<Statement>, ExprError> {
    finish(src, all_consuming(mapping::<VerboseError<&str>>)(src)).map(|(statements, _)| statements)
}

/// Parse the interpolation body starting at `src[start..]`, up to and
/// including its closing `}`. Returns the query and the offset just past
/// the brace.
pub fn parse_interpolation(src: &str, start: usize) -> Result<(Expr, usize), ExprError> {
    let body = &src[start..];
    finish(
        src,
        delimited(
            blank::<VerboseError<&str>>(Layout::Block),
            |i| query(i, Layout::Block),
            preceded(
                blank(Layout::Block),
                cut(context("expected `}` closing the interpolation", char('}'))),
            ),
        )(body),
    )
}

/// Parse a standalone query that must consume all of `src`.
#[cfg(test)]
pub fn parse_query(src: &str) -> Result<Expr, ExprError> {
    finish(
        src,
        all_consuming(delimited(
            blank::<VerboseError<&str>>(Layout::Block),
            |i| query(i, Layout::Block),
            blank(Layout::Block),
        ))(src),
    )
    .map(|(expr, _)| expr)
}

fn finish<'a, T>(
    src: &'a str,
    result: IResult<&'a str, T, VerboseError<&'a str>>,
) -> Result<(T, usize), ExprError> {
    match result {
        Ok((rest, parsed)) => Ok((parsed, src.len() - rest.len())),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(to_expr_error(src, &e)),
        Err(nom::Err::Incomplete(_)) => Err(ExprError::parse(src.len(), "incomplete input")),
    }
}

/// Report the innermost context, located by the unparsed rest it saw.
fn to_expr_error(src: &str, err: &VerboseError<&str>) -> ExprError {
    let offset = |rest: &str| src.len() - rest.len();
    let innermost = err.errors.iter().find_map(|(rest, kind)| match kind {
        VerboseErrorKind::Context(what) => Some((*rest, *what)),
        _ => None,
    });
    match innermost {
        Some((rest, what)) if what.starts_with("expected") => {
            ExprError::parse(offset(rest), format!("{what}, found {}", describe(rest)))
        }
        Some((rest, what)) => ExprError::parse(offset(rest), format!("{what} {}", describe(rest))),
        None => {
            let rest = err.errors.first().map_or("", |(rest, _)| *rest);
            ExprError::parse(offset(rest), format!("unexpected {}", describe(rest)))
        }
    }
}

fn describe(rest: &str) -> String {
    let Some(first) = rest.chars().next() else {
        return "end of input".to_string();
    };
    if first == '\n' {
        return "end of line".to_string();
    }
    let word: String = if is_ident_char(first) {
        rest.chars().take_while(|c| is_ident_char(*c)).collect()
    } else {
        first.to_string()
    };
    format!("`{word}`")
}

fn is_ident_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

// ============================================================================
// Whitespace and comments
// ============================================================================

fn comment<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(char('#'), take_till(|c| c == '\n')))(input)
}

/// Skip spaces and comments, and newlines too under [`Layout::Block`].
fn blank<'a, E: NomParseError<&'a str>>(layout: Layout) -> impl FnMut(&'a str) -> IResult<&'a str, (), E> {
    let spaces = match layout {
        Layout::Line => " \t\r",
        Layout::Block => " \t\r\n",
    };
    value((), many0_count(alt((value((), is_a(spaces)), value((), comment)))))
}

/// Blank lines, comments and `;` between statements.
fn separators<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, (), E> {
    value((), many0_count(alt((value((), is_a(" \t\r\n;")), value((), comment)))))(input)
}

// ============================================================================
// Statements
// ============================================================================

fn mapping<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Vec<Statement>, E> {
    let (mut input, _) = separators(input)?;
    let mut statements = Vec::new();
    while !input.is_empty() {
        let (rest, parsed) = cut(statement)(input)?;
        let (rest, _) = cut(end_of_statement)(rest)?;
        statements.push(parsed);
        input = rest;
    }
    Ok((input, statements))
}

fn end_of_statement<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (), E> {
    let (input, _) = blank(Layout::Line)(input)?;
    let (input, _) = context("expected end of statement", alt((eof, tag("\n"), tag(";"))))(input)?;
    separators(input)
}

fn statement<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Statement, E> {
    alt((let_statement, assign_statement))(input)
}

fn let_statement<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Statement, E> {
    let (input, name) = preceded(pair(tag("let"), is_a(" \t")), identifier)(input)?;
    let (input, value) = assigned_query(input)?;
    Ok((
        input,
        Statement::Let {
            name: name.to_string(),
            value,
        },
    ))
}

fn assign_statement<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Statement, E> {
    let (input, target) = context("expected assignment target", target)(input)?;
    let (input, value) = assigned_query(input)?;
    Ok((input, Statement::Assign { target, value }))
}

/// `= query` after a target, committed.
fn assigned_query<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, _) = blank(Layout::Line)(input)?;
    let (input, _) = cut(context("expected `=`", terminated(char('='), not(char('=')))))(input)?;
    let (input, _) = blank(Layout::Line)(input)?;
    cut(|i| query(i, Layout::Line))(input)
}

/// `root`/`this` alone target the whole result.
fn target<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Vec<String>, E> {
    let (input, first) = alt((map(identifier, String::from), string_literal))(input)?;
    let (input, rest) = many0(preceded(
        tuple((blank(Layout::Line), char('.'), blank(Layout::Line))),
        cut(context("expected path segment", path_segment)),
    ))(input)?;
    let mut path = match first.as_str() {
        "root" | "this" => Vec::new(),
        _ => vec![first],
    };
    path.extend(rest);
    Ok((input, path))
}

// ============================================================================
// Queries
// ============================================================================

fn query<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Expr, E> {
    binary(input, layout, 0)
}

const LEVELS: usize = 7;

/// Operators of one precedence level, loosest first.
fn operator<'a, E: NomParseError<&'a str>>(
    level: usize,
) -> impl FnMut(&'a str) -> IResult<&'a str, BinaryOp, E> {
    move |input| match level {
        0 => value(BinaryOp::Coalesce, terminated(char('|'), not(char('|'))))(input),
        1 => value(BinaryOp::Or, tag("||"))(input),
        2 => value(BinaryOp::And, tag("&&"))(input),
        3 => alt((
            value(BinaryOp::Eq, tag("==")),
            value(BinaryOp::Ne, tag("!=")),
        ))(input),
        4 => alt((
            value(BinaryOp::Le, tag("<=")),
            value(BinaryOp::Ge, tag(">=")),
            value(BinaryOp::Lt, char('<')),
            value(BinaryOp::Gt, char('>')),
        ))(input),
        5 => alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))(input),
        _ => alt((
            value(BinaryOp::Mul, char('*')),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Rem, char('%')),
        ))(input),
    }
}

fn binary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
    level: usize,
) -> IResult<&'a str, Expr, E> {
    if level >= LEVELS {
        return unary(input, layout);
    }
    let (input, first) = binary(input, layout, level + 1)?;
    let (input, rest) = many0(pair(
        preceded(blank(layout), operator(level)),
        cut(preceded(blank(layout), |i| binary(i, layout, level + 1))),
    ))(input)?;
    let expr = rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    });
    Ok((input, expr))
}

fn unary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Expr, E> {
    alt((
        map(
            preceded(pair(char('!'), blank(layout)), cut(|i| unary(i, layout))),
            |e| Expr::Unary(UnaryOp::Not, Box::new(e)),
        ),
        map(
            preceded(pair(char('-'), blank(layout)), cut(|i| unary(i, layout))),
            |e| Expr::Unary(UnaryOp::Neg, Box::new(e)),
        ),
        |i| postfix(i, layout),
    ))(input)
}

enum Suffix {
    Field(String),
    Method(String, Vec<Expr>),
}

fn postfix<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Expr, E> {
    let (input, base) = primary(input, layout)?;
    let (input, suffixes) = many0(preceded(
        tuple((blank(layout), char('.'), blank(layout))),
        cut(context(
            "expected path segment",
            alt((
                |i| method_suffix(i, layout),
                map(path_segment, Suffix::Field),
            )),
        )),
    ))(input)?;
    Ok((input, suffixes.into_iter().fold(base, apply_suffix)))
}

fn apply_suffix(expr: Expr, suffix: Suffix) -> Expr {
    let segment = match suffix {
        Suffix::Method(name, args) => {
            return Expr::Method {
                target: Box::new(expr),
                name,
                args,
            };
        }
        Suffix::Field(segment) => segment,
    };
    match expr {
        Expr::This(mut path) => {
            path.push(segment);
            Expr::This(path)
        }
        Expr::Root(mut path) => {
            path.push(segment);
            Expr::Root(path)
        }
        Expr::Variable(name, mut path) => {
            path.push(segment);
            Expr::Variable(name, path)
        }
        Expr::Get(inner, mut path) => {
            path.push(segment);
            Expr::Get(inner, path)
        }
        other => Expr::Get(Box::new(other), vec![segment]),
    }
}

fn method_suffix<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Suffix, E> {
    let (rest, name) = terminated(identifier, peek(preceded(blank(layout), char('('))))(input)?;
    if !METHODS.contains(&name) {
        return Err(unknown(input, "unknown method"));
    }
    let (rest, args) = preceded(blank(layout), arguments)(rest)?;
    Ok((rest, Suffix::Method(name.to_string(), args)))
}

fn unknown<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    what: &'static str,
) -> nom::Err<E> {
    nom::Err::Failure(E::add_context(
        input,
        what,
        E::from_error_kind(input, ErrorKind::Verify),
    ))
}

fn primary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Expr, E> {
    context(
        "expected a query",
        alt((
            map(string_literal, |s| Expr::Literal(Value::String(s))),
            map(number_literal, |n| Expr::Literal(Value::Number(n))),
            variable,
            delimited(
                pair(char('('), blank(Layout::Block)),
                |i| query(i, Layout::Block),
                preceded(blank(Layout::Block), cut(context("expected `)`", char(')')))),
            ),
            array_literal,
            object_literal,
            |i| call_or_path(i, layout),
        )),
    )(input)
}

fn variable<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, name) = preceded(
        char('$'),
        cut(context("expected variable name after `$`", identifier)),
    )(input)?;
    Ok((input, Expr::Variable(name.to_string(), Vec::new())))
}

/// `name(args)` is a function call; a bare name is a keyword or a context path.
fn call_or_path<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
    layout: Layout,
) -> IResult<&'a str, Expr, E> {
    let (rest, name) = identifier(input)?;
    let (rest, call) = opt(peek(preceded(blank(layout), char('('))))(rest)?;
    if call.is_some() {
        if !FUNCTIONS.contains(&name) {
            return Err(unknown(input, "unknown function"));
        }
        let (rest, args) = preceded(blank(layout), arguments)(rest)?;
        return Ok((
            rest,
            Expr::Call {
                name: name.to_string(),
                args,
            },
        ));
    }
    let expr = match name {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        "this" => Expr::This(Vec::new()),
        "root" => Expr::Root(Vec::new()),
        _ => Expr::This(vec![name.to_string()]),
    };
    Ok((rest, expr))
}

/// `( query, ... )`
fn arguments<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Vec<Expr>, E> {
    delimited(
        pair(char('('), blank(Layout::Block)),
        comma_separated(|i| query(i, Layout::Block)),
        preceded(blank(Layout::Block), cut(context("expected `,` or `)`", char(')')))),
    )(input)
}

fn array_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, items) = delimited(
        pair(char('['), blank(Layout::Block)),
        comma_separated(|i| query(i, Layout::Block)),
        preceded(blank(Layout::Block), cut(context("expected `,` or `]`", char(']')))),
    )(input)?;
    Ok((input, Expr::Array(items)))
}

fn object_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, fields) = delimited(
        pair(char('{'), blank(Layout::Block)),
        comma_separated(object_field),
        preceded(blank(Layout::Block), cut(context("expected `,` or `}`", char('}')))),
    )(input)?;
    Ok((input, Expr::Object(fields)))
}

fn object_field<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, (String, Expr), E> {
    separated_pair(
        alt((string_literal, map(identifier, String::from))),
        delimited(
            blank(Layout::Block),
            cut(context("expected `:`", char(':'))),
            blank(Layout::Block),
        ),
        cut(|i| query(i, Layout::Block)),
    )(input)
}

/// Items separated by `,`. Once a comma is read another item is required, so
/// trailing commas are rejected.
fn comma_separated<'a, T, E: NomParseError<&'a str> + ContextError<&'a str>>(
    item: fn(&'a str) -> IResult<&'a str, T, E>,
) -> impl FnMut(&'a str) -> IResult<&'a str, Vec<T>, E> {
    move |input| {
        let (input, first) = opt(item)(input)?;
        let Some(first) = first else {
            return Ok((input, Vec::new()));
        };
        let (input, rest) = many0(preceded(
            tuple((blank(Layout::Block), char(','), blank(Layout::Block))),
            cut(item),
        ))(input)?;
        Ok((input, std::iter::once(first).chain(rest).collect()))
    }
}

// ============================================================================
// Tokens
// ============================================================================

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(input)
}

/// A path segment: a name, a quoted key or an array index.
fn path_segment<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, String, E> {
    alt((
        map(identifier, String::from),
        string_literal,
        map(digit1, String::from),
    ))(input)
}

fn string_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, String, E> {
    preceded(
        char('"'),
        cut(terminated(
            map(
                opt(escaped_transform(
                    none_of("\"\\"),
                    '\\',
                    cut(context(
                        "unknown escape sequence",
                        alt((
                            value('\n', char('n')),
                            value('\r', char('r')),
                            value('\t', char('t')),
                            value('\\', char('\\')),
                            value('"', char('"')),
                        )),
                    )),
                )),
                Option::unwrap_or_default,
            ),
            context("expected closing `\"`", char('"')),
        )),
    )(input)
}

/// Integer, or float when a fraction follows. Never signed; `-` is unary.
fn number_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Number, E> {
    let (rest, text) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;
    let number = if text.contains('.') {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>().ok().map(Number::from)
    };
    match number {
        Some(number) => Ok((rest, number)),
        None => Err(nom::Err::Failure(E::add_context(
            input,
            "invalid number",
            E::from_error_kind(input, ErrorKind::Digit),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(src: &str) -> Expr {
        parse_query(src).unwrap()
    }

    fn offset_of(err: ExprError) -> usize {
        match err {
            ExprError::Parse { offset, .. } => offset,
            other => panic!("expected a parse error, got {other}"),
        }
    }

    #[test]
    fn test_bare_path_is_context_path() {
        assert_eq!(query("vars.region"), Expr::This(vec!["vars".into(), "region".into()]));
        assert_eq!(query("this.a.0"), Expr::This(vec!["a".into(), "0".into()]));
        assert_eq!(query(r#"this."a.b""#), Expr::This(vec!["a.b".into()]));
    }

    #[test]
    fn test_numeric_path_segments_are_integers() {
        assert_eq!(
            query("list.0.1"),
            Expr::This(vec!["list".into(), "0".into(), "1".into()])
        );
        assert_eq!(query("1.5"), Expr::Literal(json!(1.5)));
        assert_eq!(query("7"), Expr::Literal(json!(7)));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(query(r#""a\"b\n""#), Expr::Literal(json!("a\"b\n")));
        assert_eq!(query(r#""""#), Expr::Literal(json!("")));
        assert!(parse_query(r#""open"#).is_err());
        let err = parse_query(r#""bad \q""#).unwrap_err();
        assert!(err.to_string().contains("unknown escape sequence"), "{err}");
    }

    #[test]
    fn test_precedence() {
        let expr = query("1 + 2 * 3 == 7 && true");
        let Expr::Binary(BinaryOp::And, lhs, _) = expr else {
            panic!("expected && at the top");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::Eq, _, _)));
    }

    #[test]
    fn test_coalesce_binds_loosest() {
        let expr = query(r#"a || b | "x""#);
        let Expr::Binary(BinaryOp::Coalesce, lhs, _) = expr else {
            panic!("expected | at the top");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::Or, _, _)));
    }

    #[test]
    fn test_left_associative_arithmetic() {
        assert_eq!(
            query("8 - 2 - 1"),
            Expr::Binary(
                BinaryOp::Sub,
                Box::new(Expr::Binary(
                    BinaryOp::Sub,
                    Box::new(Expr::Literal(json!(8))),
                    Box::new(Expr::Literal(json!(2)))
                )),
                Box::new(Expr::Literal(json!(1)))
            )
        );
        assert_eq!(
            query("!-x"),
            Expr::Unary(
                UnaryOp::Not,
                Box::new(Expr::Unary(UnaryOp::Neg, Box::new(Expr::This(vec!["x".into()]))))
            )
        );
    }

    #[test]
    fn test_methods_and_calls() {
        let expr = query(r#"json("name").uppercase()"#);
        let Expr::Method { target, name, args } = expr else {
            panic!("expected method call");
        };
        assert_eq!(name, "uppercase");
        assert!(args.is_empty());
        assert_eq!(
            *target,
            Expr::Call {
                name: "json".into(),
                args: vec![Expr::Literal(json!("name"))]
            }
        );
        assert_eq!(
            query(r#"json("a").b.0"#),
            Expr::Get(
                Box::new(Expr::Call {
                    name: "json".into(),
                    args: vec![Expr::Literal(json!("a"))]
                }),
                vec!["b".into(), "0".into()]
            )
        );
    }

    #[test]
    fn test_unknown_function_and_method_rejected() {
        let err = parse_query("nope()").unwrap_err();
        assert_eq!(err.to_string(), "parse error at offset 0: unknown function `nope`");
        let err = parse_query("a.nope()").unwrap_err();
        assert_eq!(err.to_string(), "parse error at offset 2: unknown method `nope`");
    }

    #[test]
    fn test_interpolation_stops_at_closing_brace() {
        let src = r#"${!json("a")}-suffix"#;
        let (expr, end) = parse_interpolation(src, 3).unwrap();
        assert_eq!(&src[end..], "-suffix");
        assert!(matches!(expr, Expr::Call { .. }));
    }

    #[test]
    fn test_interpolation_with_nested_object() {
        let src = "${!{\"a\": 1,\n \"b\": [2]}.a}!";
        let (_, end) = parse_interpolation(src, 3).unwrap();
        assert_eq!(&src[end..], "!");
    }

    #[test]
    fn test_unterminated_interpolation() {
        let err = parse_interpolation("${!json(\"a\")", 3).unwrap_err();
        assert_eq!(offset_of(err.clone()), 12);
        assert!(err.to_string().contains("closing the interpolation"), "{err}");
    }

    #[test]
    fn test_statement_targets() {
        let parsed = parse_mapping("root = vars\nfoo = \"bar\"\nroot.a.b = 1\nlet x = 2").unwrap();
        assert_eq!(
            parsed,
            vec![
                Statement::Assign {
                    target: vec![],
                    value: Expr::This(vec!["vars".into()])
                },
                Statement::Assign {
                    target: vec!["foo".into()],
                    value: Expr::Literal(json!("bar"))
                },
                Statement::Assign {
                    target: vec!["a".into(), "b".into()],
                    value: Expr::Literal(json!(1))
                },
                Statement::Let {
                    name: "x".into(),
                    value: Expr::Literal(json!(2))
                },
            ]
        );
    }

    #[test]
    fn test_let_prefix_is_an_ordinary_target() {
        let parsed = parse_mapping("letter = 1").unwrap();
        assert_eq!(
            parsed,
            vec![Statement::Assign {
                target: vec!["letter".into()],
                value: Expr::Literal(json!(1))
            }]
        );
    }

    #[test]
    fn test_comments_and_semicolons() {
        let parsed = parse_mapping("# header\na = 1 # trailing\n\nb = 2; c = 3\n").unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parse_mapping("").unwrap().is_empty());
        assert!(parse_mapping("  # only a comment\n;;\n").unwrap().is_empty());
    }

    #[test]
    fn test_newlines_inside_brackets_are_whitespace() {
        let parsed = parse_mapping("a = [1,\n2]\nb = json(\n\"x\"\n)").unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parse_mapping("a = 1 +\n2").is_err());
    }

    #[test]
    fn test_statement_errors() {
        assert!(parse_mapping("foo").is_err());
        assert!(parse_mapping("foo = ").is_err());
        assert!(parse_mapping("foo == 1").is_err());
        let err = parse_mapping("foo = 1 2").unwrap_err();
        assert!(err.to_string().contains("expected end of statement"), "{err}");
        let err = parse_mapping("= 1").unwrap_err();
        assert!(err.to_string().contains("expected assignment target"), "{err}");
        let err = parse_mapping("a = 1)").unwrap_err();
        assert_eq!(offset_of(err), 5);
    }

    #[test]
    fn test_multiline_literals() {
        let err = parse_mapping("list = [\n  1,\n  2,\n]").unwrap_err();
        // trailing commas are not accepted
        assert!(err.to_string().contains("expected a query"), "{err}");
        assert!(parse_mapping("obj = {\n \"a\": 1,\n b: [1, 2]\n}").is_ok());
        assert!(parse_mapping("obj = {}\nlist = []").is_ok());
    }
}

//! Expression grammar, parsed with nom into a small AST.
//!
//! Precedence, loosest to tightest: `||`, `&&`, comparisons, `+`/`-`,
//! `*`/`/`/`%`, unary `-`/`!`, postfix `.field` / `[index]`.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    error::{VerboseError, convert_error},
    multi::{fold_many0, many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::Value;
use std::str::FromStr;

type PResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// A parsed expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parse a complete expression string.
pub(crate) fn parse(input: &str) -> Result<Expr, String> {
    match all_consuming(terminated(expression, multispace0))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(convert_error(input, e)),
        Err(nom::Err::Incomplete(_)) => Err("incomplete input".to_string()),
    }
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(multispace0, inner)
}

fn expression(input: &str) -> PResult<'_, Expr> {
    or_expr(input)
}

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = and_expr(input)?;
    fold_many0(
        preceded(ws(tag("||")), and_expr),
        move || init.clone(),
        |acc, rhs| Expr::Binary(BinaryOp::Or, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = cmp_expr(input)?;
    fold_many0(
        preceded(ws(tag("&&")), cmp_expr),
        move || init.clone(),
        |acc, rhs| Expr::Binary(BinaryOp::And, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn cmp_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = add_expr(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Eq, tag("==")),
                value(BinaryOp::Ne, tag("!=")),
                value(BinaryOp::Le, tag("<=")),
                value(BinaryOp::Ge, tag(">=")),
                value(BinaryOp::Lt, tag("<")),
                value(BinaryOp::Gt, tag(">")),
            ))),
            add_expr,
        ),
        move || init.clone(),
        |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn add_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = mul_expr(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Add, char('+')),
                value(BinaryOp::Sub, char('-')),
            ))),
            mul_expr,
        ),
        move || init.clone(),
        |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn mul_expr(input: &str) -> PResult<'_, Expr> {
    let (input, init) = unary(input)?;
    fold_many0(
        pair(
            ws(alt((
                value(BinaryOp::Mul, char('*')),
                value(BinaryOp::Div, char('/')),
                value(BinaryOp::Rem, char('%')),
            ))),
            unary,
        ),
        move || init.clone(),
        |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)),
    )(input)
}

fn unary(input: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            map(preceded(char('-'), unary), |e| {
                Expr::Unary(UnaryOp::Neg, Box::new(e))
            }),
            map(preceded(char('!'), unary), |e| {
                Expr::Unary(UnaryOp::Not, Box::new(e))
            }),
            postfix,
        )),
    )(input)
}

fn postfix(input: &str) -> PResult<'_, Expr> {
    let (mut input, mut expr) = atom(input)?;
    loop {
        if let Ok((rest, field)) = preceded(ws(char('.')), identifier)(input) {
            expr = Expr::Field(Box::new(expr), field.to_string());
            input = rest;
            continue;
        }
        if let Ok((rest, index)) =
            delimited(ws(char('[')), expression, ws(char(']')))(input)
        {
            expr = Expr::Index(Box::new(expr), Box::new(index));
            input = rest;
            continue;
        }
        return Ok((input, expr));
    }
}

fn atom(input: &str) -> PResult<'_, Expr> {
    preceded(
        multispace0,
        alt((
            float_literal,
            int_literal,
            map(quoted_string('\''), |s| Expr::Literal(Value::String(s))),
            map(quoted_string('"'), |s| Expr::Literal(Value::String(s))),
            list_literal,
            delimited(char('('), expression, ws(char(')'))),
            name_or_keyword,
        )),
    )(input)
}

fn float_literal(input: &str) -> PResult<'_, Expr> {
    map_res(
        recognize(tuple((digit1, char('.'), digit1))),
        |text: &str| f64::from_str(text).map(|f| Expr::Literal(Value::from(f))),
    )(input)
}

fn int_literal(input: &str) -> PResult<'_, Expr> {
    map_res(digit1, |text: &str| {
        i64::from_str(text).map(|n| Expr::Literal(Value::from(n)))
    })(input)
}

fn list_literal(input: &str) -> PResult<'_, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(ws(char(',')), expression),
            ws(char(']')),
        ),
        Expr::List,
    )(input)
}

fn quoted_string<'a>(quote: char) -> impl FnMut(&'a str) -> PResult<'a, String> {
    move |input| {
        delimited(
            char(quote),
            map(
                opt(nom::bytes::complete::escaped_transform(
                    take_till1(move |c| c == quote || c == '\\'),
                    '\\',
                    alt((
                        value('\\', char('\\')),
                        value('\'', char('\'')),
                        value('"', char('"')),
                        value('\n', char('n')),
                        value('\t', char('t')),
                    )),
                )),
                |s: Option<String>| s.unwrap_or_default(),
            ),
            char(quote),
        )(input)
    }
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0(alt((alphanumeric1, tag("_")))),
    ))(input)
}

fn name_or_keyword(input: &str) -> PResult<'_, Expr> {
    map(identifier, |name| match name {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        other => Expr::Var(other.to_string()),
    })(input)
}

//! LDAP style search filters over property dictionaries.
//!
//! The grammar is the subset the registry needs: conjunction `(&…)`,
//! disjunction `(|…)`, negation `(!…)`, equality with `*` wildcards,
//! presence `(attr=*)`, and the ordered comparisons `<=` and `>=`.
//! Syntax errors are fatal at construction time; a program built over a
//! malformed filter fails when its operation runs.
use crate::value::{PropValue, Props};
use anyhow::{bail, Result};
use arcstr::ArcStr;
use combine::{
    attempt, between, choice, eof, many, many1, parser::char::string, satisfy,
    stream::position, token, EasyParser, ParseError, Parser, Stream,
};
use std::fmt;
use triomphe::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Le,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::Eq => write!(f, "="),
            CmpOp::Le => write!(f, "<="),
            CmpOp::Ge => write!(f, ">="),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(ArcStr),
    Cmp { attr: ArcStr, op: CmpOp, pattern: ArcStr },
}

fn attr<I>() -> impl Parser<I, Output = ArcStr>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    many1(satisfy(|c: char| {
        !matches!(c, '=' | '<' | '>' | '(' | ')' | '&' | '|' | '!' | '*')
            && !c.is_whitespace()
    }))
    .map(|s: String| ArcStr::from(s))
}

fn op<I>() -> impl Parser<I, Output = CmpOp>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    choice((
        attempt(string("<=")).map(|_| CmpOp::Le),
        attempt(string(">=")).map(|_| CmpOp::Ge),
        string("=").map(|_| CmpOp::Eq),
    ))
}

fn pattern<I>() -> impl Parser<I, Output = String>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    many(satisfy(|c: char| c != '(' && c != ')'))
}

fn comparison<I>() -> impl Parser<I, Output = Node>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    (attr(), op(), pattern()).map(|(attr, op, pattern)| {
        if op == CmpOp::Eq && pattern == "*" {
            Node::Present(attr)
        } else {
            Node::Cmp { attr, op, pattern: ArcStr::from(pattern) }
        }
    })
}

fn body<I>() -> impl Parser<I, Output = Node>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    choice((
        token('&').with(many1(node())).map(Node::And),
        token('|').with(many1(node())).map(Node::Or),
        token('!').with(node()).map(|n| Node::Not(Box::new(n))),
        comparison(),
    ))
}

fn node_<I>() -> impl Parser<I, Output = Node>
where
    I: Stream<Token = char>,
    I::Error: ParseError<I::Token, I::Range, I::Position>,
{
    between(token('('), token(')'), body())
}

parser! {
    fn node[I]()(I) -> Node
    where [I: Stream<Token = char>, I::Error: ParseError<I::Token, I::Range, I::Position>]
    {
        node_()
    }
}

/// `*` wildcards match any run of characters, including the empty run
fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let segments: Vec<&str> = pattern.split('*').collect();
    let last = segments.len() - 1;
    let mut pos = 0;
    for (i, seg) in segments.iter().enumerate() {
        if seg.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(seg) {
                return false;
            }
            pos = seg.len();
        } else if i == last {
            let rest = &text[pos..];
            if rest.len() < seg.len() || !rest.ends_with(seg) {
                return false;
            }
        } else {
            match text[pos..].find(seg) {
                Some(j) => pos += j + seg.len(),
                None => return false,
            }
        }
    }
    true
}

fn cmp(v: &PropValue, op: CmpOp, pattern: &str) -> bool {
    match (v, op) {
        (PropValue::String(s), CmpOp::Eq) => wildcard_match(pattern, s),
        (PropValue::String(s), CmpOp::Le) => s.as_str() <= pattern,
        (PropValue::String(s), CmpOp::Ge) => s.as_str() >= pattern,
        (PropValue::Int(i), op) => match pattern.parse::<i64>() {
            Ok(p) => match op {
                CmpOp::Eq => *i == p,
                CmpOp::Le => *i <= p,
                CmpOp::Ge => *i >= p,
            },
            Err(_) => false,
        },
        (PropValue::Float(x), op) => match pattern.parse::<f64>() {
            Ok(p) => match op {
                CmpOp::Eq => *x == p,
                CmpOp::Le => *x <= p,
                CmpOp::Ge => *x >= p,
            },
            Err(_) => false,
        },
        (PropValue::Bool(b), CmpOp::Eq) => pattern.parse::<bool>() == Ok(*b),
        (PropValue::Bool(_), _) => false,
    }
}

impl Node {
    fn matches(&self, props: &Props) -> bool {
        match self {
            Node::And(ns) => ns.iter().all(|n| n.matches(props)),
            Node::Or(ns) => ns.iter().any(|n| n.matches(props)),
            Node::Not(n) => !n.matches(props),
            Node::Present(attr) => props.get(attr).is_some(),
            Node::Cmp { attr, op, pattern } => match props.get(attr) {
                None => false,
                Some(v) => cmp(v, *op, pattern),
            },
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::And(ns) => {
                write!(f, "(&")?;
                for n in ns {
                    write!(f, "{n}")?
                }
                write!(f, ")")
            }
            Node::Or(ns) => {
                write!(f, "(|")?;
                for n in ns {
                    write!(f, "{n}")?
                }
                write!(f, ")")
            }
            Node::Not(n) => write!(f, "(!{n})"),
            Node::Present(attr) => write!(f, "({attr}=*)"),
            Node::Cmp { attr, op, pattern } => write!(f, "({attr}{op}{pattern})"),
        }
    }
}

/// a parsed search filter over service properties
#[derive(Debug, Clone, PartialEq)]
pub struct Filter(Arc<Node>);

impl Filter {
    pub fn parse(s: &str) -> Result<Filter> {
        match node().skip(eof()).easy_parse(position::Stream::new(s)) {
            Ok((n, _)) => Ok(Filter(Arc::new(n))),
            Err(e) => bail!("invalid filter {s:?}: {e}"),
        }
    }

    pub fn matches(&self, props: &Props) -> bool {
        self.0.matches(props)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::props;
    use proptest::prelude::*;

    #[test]
    fn equality_and_presence() {
        let p = props! { "name" => "echo", "rank" => 3 };
        assert!(Filter::parse("(name=echo)").unwrap().matches(&p));
        assert!(!Filter::parse("(name=relay)").unwrap().matches(&p));
        assert!(Filter::parse("(rank=*)").unwrap().matches(&p));
        assert!(!Filter::parse("(missing=*)").unwrap().matches(&p));
    }

    #[test]
    fn wildcards() {
        let p = props! { "path" => "svc/echo/main" };
        assert!(Filter::parse("(path=svc/*)").unwrap().matches(&p));
        assert!(Filter::parse("(path=*main)").unwrap().matches(&p));
        assert!(Filter::parse("(path=svc*main)").unwrap().matches(&p));
        assert!(!Filter::parse("(path=svc*tail)").unwrap().matches(&p));
    }

    #[test]
    fn numeric_comparisons() {
        let p = props! { "rank" => 3 };
        assert!(Filter::parse("(rank>=3)").unwrap().matches(&p));
        assert!(Filter::parse("(rank<=7)").unwrap().matches(&p));
        assert!(!Filter::parse("(rank>=4)").unwrap().matches(&p));
        assert!(!Filter::parse("(rank=x)").unwrap().matches(&p));
    }

    #[test]
    fn boolean_connectives() {
        let p = props! { "name" => "echo", "rank" => 3 };
        assert!(Filter::parse("(&(name=echo)(rank>=1))").unwrap().matches(&p));
        assert!(Filter::parse("(|(name=relay)(rank=3))").unwrap().matches(&p));
        assert!(Filter::parse("(!(name=relay))").unwrap().matches(&p));
        assert!(!Filter::parse("(&(name=echo)(!(rank=3)))").unwrap().matches(&p));
    }

    #[test]
    fn syntax_errors_are_fatal() {
        assert!(Filter::parse("name=echo").is_err());
        assert!(Filter::parse("(name=echo").is_err());
        assert!(Filter::parse("(&)").is_err());
        assert!(Filter::parse("(name=echo)x").is_err());
        assert!(Filter::parse("").is_err());
    }

    fn arb_attr() -> impl Strategy<Value = ArcStr> {
        "[a-z][a-z0-9.]{0,6}".prop_map(|s| ArcStr::from(s))
    }

    fn arb_pattern() -> impl Strategy<Value = ArcStr> {
        "[a-zA-Z0-9. _-]{1,8}".prop_map(|s| ArcStr::from(s))
    }

    fn arb_op() -> impl Strategy<Value = CmpOp> {
        prop_oneof![Just(CmpOp::Eq), Just(CmpOp::Le), Just(CmpOp::Ge)]
    }

    fn arb_node() -> impl Strategy<Value = Node> {
        let leaf = prop_oneof![
            arb_attr().prop_map(Node::Present),
            (arb_attr(), arb_op(), arb_pattern())
                .prop_map(|(attr, op, pattern)| Node::Cmp { attr, op, pattern }),
        ];
        leaf.prop_recursive(3, 16, 3, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 1..3).prop_map(Node::And),
                prop::collection::vec(inner.clone(), 1..3).prop_map(Node::Or),
                inner.prop_map(|n| Node::Not(Box::new(n))),
            ]
        })
    }

    proptest! {
        #[test]
        fn printed_filters_reparse(n in arb_node()) {
            let s = n.to_string();
            let f = Filter::parse(&s).unwrap();
            prop_assert_eq!(&*f.0, &n);
        }
    }
}

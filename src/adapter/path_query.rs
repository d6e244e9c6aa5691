// src/adapter/path_query.rs
//! Parser for the small JSONPath-like query language of structured adapters:
//!
//! ```text
//! $.Apple[?(@.Date == '2024-06-14')].Close
//! $.cleaned[?(@['Current Stage'] == 2 && @.DPD > 30)]
//! $.Meta[-5:].Volume
//! ```

use std::fmt;

use crate::error::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    pub fn holds(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ord == Equal,
            Self::Ne => ord != Equal,
            Self::Gt => ord == Greater,
            Self::Ge => ord != Less,
            Self::Lt => ord == Less,
            Self::Le => ord != Greater,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Num(f64),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Self::Num(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: String,
    pub op: Op,
    pub value: Literal,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathQuery {
    /// Label segment (`$.Apple`), checked against the adapter's dataset.
    pub dataset: Option<String>,
    pub predicates: Vec<Predicate>,
    pub projection: Option<String>,
    /// Keep only the last N matching rows (`[-N:]`).
    pub tail: Option<usize>,
}

impl PathQuery {
    /// Every field name the query references.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.predicates
            .iter()
            .map(|p| p.field.as_str())
            .chain(self.projection.as_deref())
    }

    /// Parse a path expression. `is_field` decides whether a lone
    /// `$.Name` is a projection or a dataset label.
    pub fn parse(input: &str, is_field: impl Fn(&str) -> bool) -> Result<Self, QueryError> {
        let mut cur = Cursor::new(input.trim());
        if !cur.eat('$') {
            return Err(QueryError::Parse("path must start with '$'".into()));
        }

        let mut q = PathQuery::default();
        let first = cur.segment_name()?;
        let mut saw_bracket = false;

        loop {
            cur.skip_ws();
            if cur.peek() != Some('[') || cur.starts_with("['") || cur.starts_with("[\"") {
                break;
            }
            saw_bracket = true;
            if cur.eat_str("[?(") {
                let body = cur.take_until_close_filter()?;
                for clause in split_and(&body) {
                    q.predicates.push(parse_clause(&clause)?);
                }
            } else if cur.eat_str("[*]") {
            } else if cur.eat_str("[-") {
                let n = cur.take_while(|c| c.is_ascii_digit());
                let n: usize = n
                    .parse()
                    .map_err(|_| QueryError::Parse("expected count in '[-N:]'".into()))?;
                if !cur.eat_str(":]") && !cur.eat(']') {
                    return Err(QueryError::Parse("unterminated '[-N:]'".into()));
                }
                if n == 0 {
                    return Err(QueryError::Parse("'[-0:]' selects no rows".into()));
                }
                q.tail = Some(n);
            } else {
                return Err(QueryError::Parse(format!(
                    "unsupported selector near '{}'",
                    cur.rest()
                )));
            }
        }

        let second = cur.segment_name()?;
        cur.skip_ws();
        if !cur.is_done() {
            return Err(QueryError::Parse(format!("unexpected '{}'", cur.rest())));
        }

        match (first, second) {
            (Some(a), Some(b)) => {
                q.dataset = Some(a);
                q.projection = Some(b);
            }
            (Some(a), None) if saw_bracket || !is_field(&a) => q.dataset = Some(a),
            (Some(a), None) => q.projection = Some(a),
            (None, b) => q.projection = b,
        }
        Ok(q)
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        if let Some(d) = &self.dataset {
            write_name(f, d)?;
        }
        if !self.predicates.is_empty() {
            f.write_str("[?(")?;
            for (i, p) in self.predicates.iter().enumerate() {
                if i > 0 {
                    f.write_str(" && ")?;
                }
                f.write_str("@")?;
                write_name(f, &p.field)?;
                write!(f, " {} {}", p.op.as_str(), p.value)?;
            }
            f.write_str(")]")?;
        }
        if let Some(n) = self.tail {
            write!(f, "[-{n}:]")?;
        }
        if let Some(p) = &self.projection {
            write_name(f, p)?;
        }
        Ok(())
    }
}

fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    if name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        write!(f, ".{name}")
    } else {
        write!(f, "['{name}']")
    }
}

struct Cursor<'a> {
    s: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a str) -> Self {
        Self { s, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.s[self.pos..]
    }

    fn is_done(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, p: &str) -> bool {
        self.rest().starts_with(p)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, p: &str) -> bool {
        if self.starts_with(p) {
            self.pos += p.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        self.take_while(char::is_whitespace);
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.s[start..self.pos]
    }

    /// `.Name` (up to the next `.` or `[`) or `['Name']`; `None` if neither.
    fn segment_name(&mut self) -> Result<Option<String>, QueryError> {
        self.skip_ws();
        if self.eat('.') {
            let name = self.take_while(|c| c != '.' && c != '[').trim();
            if name.is_empty() {
                return Err(QueryError::Parse("empty name after '.'".into()));
            }
            return Ok(Some(name.to_string()));
        }
        if self.starts_with("['") || self.starts_with("[\"") {
            self.eat('[');
            let name = self.quoted()?;
            if !self.eat(']') {
                return Err(QueryError::Parse("expected ']' after quoted name".into()));
            }
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn quoted(&mut self) -> Result<String, QueryError> {
        let q = match self.peek() {
            Some(c @ ('\'' | '"')) => c,
            _ => return Err(QueryError::Parse("expected quote".into())),
        };
        self.eat(q);
        let mut out = String::new();
        let mut escaped = false;
        while let Some(c) = self.peek() {
            self.pos += c.len_utf8();
            if escaped {
                out.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                return Ok(out);
            } else {
                out.push(c);
            }
        }
        Err(QueryError::Parse("unterminated string".into()))
    }

    /// Body of `[?( ... )]`, honouring quotes.
    fn take_until_close_filter(&mut self) -> Result<String, QueryError> {
        let start = self.pos;
        let mut quote: Option<char> = None;
        while let Some(c) = self.peek() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '\'' || c == '"' => quote = Some(c),
                None if self.starts_with(")]") => {
                    let body = self.s[start..self.pos].to_string();
                    self.pos += 2;
                    return Ok(body);
                }
                None => {}
            }
            self.pos += c.len_utf8();
        }
        Err(QueryError::Parse("unterminated filter '[?('".into()))
    }
}

fn split_and(body: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '&' && chars.peek() == Some(&'&') => {
                chars.next();
                out.push(std::mem::take(&mut cur));
                continue;
            }
            None => {}
        }
        cur.push(c);
    }
    out.push(cur);
    out.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_clause(clause: &str) -> Result<Predicate, QueryError> {
    let mut cur = Cursor::new(clause.trim());
    if !cur.eat('@') {
        return Err(QueryError::Parse(format!("filter must start with '@': {clause}")));
    }
    let field = if cur.eat('.') {
        cur.take_while(|c| !matches!(c, '=' | '!' | '<' | '>'))
            .trim()
            .to_string()
    } else if cur.eat('[') {
        let name = cur.quoted()?;
        if !cur.eat(']') {
            return Err(QueryError::Parse("expected ']' after quoted field".into()));
        }
        name
    } else {
        return Err(QueryError::Parse(format!("expected field after '@': {clause}")));
    };
    if field.is_empty() {
        return Err(QueryError::Parse(format!("empty field in filter: {clause}")));
    }

    cur.skip_ws();
    let op = [
        ("==", Op::Eq),
        ("!=", Op::Ne),
        (">=", Op::Ge),
        ("<=", Op::Le),
        (">", Op::Gt),
        ("<", Op::Lt),
        ("=", Op::Eq),
    ]
    .into_iter()
    .find_map(|(tok, op)| cur.eat_str(tok).then_some(op))
    .ok_or_else(|| QueryError::Parse(format!("missing comparison operator: {clause}")))?;

    cur.skip_ws();
    let value = match cur.peek() {
        Some('\'' | '"') => Literal::Str(cur.quoted()?),
        Some(_) => {
            let raw = cur.rest().trim();
            match raw.parse::<f64>() {
                Ok(n) if n.is_finite() => Literal::Num(n),
                _ => Literal::Str(raw.to_string()),
            }
        }
        None => return Err(QueryError::Parse(format!("missing value: {clause}"))),
    };
    Ok(Predicate { field, op, value })
}

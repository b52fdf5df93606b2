//! Reader for the textual rule form.

use crate::error::{FlowResult, RuleCompileError};
use crate::rule::ast::{ActionTemplate, FactPattern, FieldConstraint, RuleDef, Term};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Open,
    Close,
    Str(String),
    Var(String),
    Atom(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    pos: usize,
}

fn syntax(pos: usize, message: impl Into<String>) -> RuleCompileError {
    RuleCompileError::Syntax {
        position: pos,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, RuleCompileError> {
    let mut out = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            ';' => {
                // Comment to end of line.
                while chars.next_if(|&(_, c)| c != '\n').is_some() {}
            }
            '(' => {
                chars.next();
                out.push(Token { tok: Tok::Open, pos });
            }
            ')' => {
                chars.next();
                out.push(Token { tok: Tok::Close, pos });
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => text.push('\n'),
                            Some((_, 't')) => text.push('\t'),
                            Some((_, other)) => text.push(other),
                            None => return Err(syntax(pos, "unterminated string")),
                        },
                        Some((_, other)) => text.push(other),
                        None => return Err(syntax(pos, "unterminated string")),
                    }
                }
                out.push(Token { tok: Tok::Str(text), pos });
            }
            _ => {
                let mut word = String::new();
                while let Some((_, c)) = chars.next_if(|&(_, c)| !c.is_whitespace() && !matches!(c, '(' | ')' | '"' | ';')) {
                    word.push(c);
                }
                let tok = match word.strip_prefix('?') {
                    Some("") => return Err(syntax(pos, "variable without a name")),
                    Some(name) => Tok::Var(name.to_string()),
                    None => Tok::Atom(word),
                };
                out.push(Token { tok, pos });
            }
        }
    }
    Ok(out)
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.at).map(|t| &t.tok)
    }

    fn pos(&self) -> usize {
        self.tokens.get(self.at).map_or(self.end, |t| t.pos)
    }

    fn next(&mut self) -> Result<Tok, RuleCompileError> {
        let tok = self
            .tokens
            .get(self.at)
            .map(|t| t.tok.clone())
            .ok_or_else(|| syntax(self.end, "unexpected end of input"))?;
        self.at += 1;
        Ok(tok)
    }

    fn expect(&mut self, want: &Tok, what: &str) -> Result<(), RuleCompileError> {
        let pos = self.pos();
        if &self.next()? == want {
            Ok(())
        } else {
            Err(syntax(pos, format!("expected {what}")))
        }
    }

    fn atom(&mut self, what: &str) -> Result<String, RuleCompileError> {
        let pos = self.pos();
        match self.next()? {
            Tok::Atom(a) => Ok(a),
            _ => Err(syntax(pos, format!("expected {what}"))),
        }
    }

    fn rule(&mut self) -> Result<RuleDef, RuleCompileError> {
        self.expect(&Tok::Open, "'('")?;
        let pos = self.pos();
        if self.atom("defrule")? != "defrule" {
            return Err(syntax(pos, "expected defrule"));
        }
        let name = self.atom("rule name")?;
        // Optional comment string.
        if let Some(Tok::Str(_)) = self.peek() {
            self.at += 1;
        }

        let mut patterns = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Atom(a)) if a == "=>" => {
                    self.at += 1;
                    break;
                }
                Some(Tok::Open) => patterns.push(self.pattern()?),
                _ => return Err(syntax(self.pos(), "expected a pattern or '=>'")),
            }
        }

        let mut actions = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Close) => {
                    self.at += 1;
                    break;
                }
                Some(Tok::Open) => actions.push(self.action()?),
                _ => return Err(syntax(self.pos(), "expected an action or ')'")),
            }
        }
        Ok(RuleDef { name, patterns, actions })
    }

    fn pattern(&mut self) -> Result<FactPattern, RuleCompileError> {
        self.expect(&Tok::Open, "'('")?;
        let predicate = self.atom("predicate name")?;
        let mut fields = Vec::new();
        loop {
            match self.next()? {
                Tok::Close => break,
                Tok::Open => {
                    let field = self.atom("field name")?;
                    let term = self.term()?;
                    self.expect(&Tok::Close, "')' after field")?;
                    fields.push(FieldConstraint { field, term });
                }
                _ => return Err(syntax(self.pos(), "expected '(' field term ')'")),
            }
        }
        Ok(FactPattern { predicate, fields })
    }

    fn term(&mut self) -> Result<Term, RuleCompileError> {
        let pos = self.pos();
        match self.next()? {
            Tok::Var(name) => Ok(Term::Var(name)),
            Tok::Str(s) => Ok(Term::Const(Value::String(s))),
            Tok::Atom(a) => Ok(Term::Const(atom_value(a))),
            Tok::Open => {
                if self.atom("create$")? != "create$" {
                    return Err(syntax(pos, "only (create$ ...) lists may appear as values"));
                }
                let mut items = Vec::new();
                while self.peek() != Some(&Tok::Close) {
                    items.push(self.term()?);
                }
                self.at += 1;
                Ok(Term::List(items))
            }
            Tok::Close => Err(syntax(pos, "unexpected ')'")),
        }
    }

    fn action(&mut self) -> Result<ActionTemplate, RuleCompileError> {
        self.expect(&Tok::Open, "'('")?;
        let pos = self.pos();
        let name = self.atom("action name")?;
        let mut args = Vec::new();
        while self.peek() != Some(&Tok::Close) {
            args.push(self.term()?);
        }
        self.at += 1;

        match name.as_str() {
            "printout" => {
                let mut parts = args.into_iter();
                match parts.next() {
                    Some(Term::Const(Value::String(router))) if router == "t" => {}
                    _ => return Err(syntax(pos, "printout expects the router 't'")),
                }
                let mut parts: Vec<Term> = parts.collect();
                if matches!(parts.last(), Some(Term::Const(Value::String(s))) if s == "crlf") {
                    parts.pop();
                }
                Ok(ActionTemplate::Printout { parts })
            }
            "add_data" => {
                let mut args = args.into_iter();
                let (Some(target), Some(properties), Some(values)) = (args.next(), args.next(), args.next()) else {
                    return Err(syntax(pos, "add_data expects a target, properties and values"));
                };
                let timestamp = args.next();
                if args.next().is_some() {
                    return Err(syntax(pos, "add_data takes at most four arguments"));
                }
                Ok(ActionTemplate::AddData {
                    target,
                    properties: property_names(properties).ok_or_else(|| {
                        syntax(pos, "add_data properties must be a list of property names")
                    })?,
                    values: match values {
                        Term::List(items) => items,
                        single => vec![single],
                    },
                    timestamp,
                })
            }
            _ => {
                let mut args = args.into_iter();
                let item = args
                    .next()
                    .ok_or_else(|| syntax(pos, format!("{name} expects an item argument")))?;
                Ok(ActionTemplate::External {
                    name,
                    item,
                    arguments: args.collect(),
                })
            }
        }
    }
}

fn property_names(term: Term) -> Option<Vec<String>> {
    let items = match term {
        Term::List(items) => items,
        single => vec![single],
    };
    items
        .into_iter()
        .map(|t| match t {
            Term::Const(Value::String(s)) => Some(s),
            _ => None,
        })
        .collect()
}

fn atom_value(atom: String) -> Value {
    match atom.as_str() {
        "TRUE" => return Value::Bool(true),
        "FALSE" => return Value::Bool(false),
        "nil" => return Value::Null,
        _ => {}
    }
    let numeric = atom
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'));
    if numeric {
        if let Ok(i) = atom.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(r) = atom.parse::<f64>() {
            return Value::Real(r);
        }
    }
    Value::String(atom)
}

/// Parses one `(defrule ...)` form.
///
/// # Errors
///
/// Returns `RuleCompileError::Syntax` with the byte offset of the offending token.
pub fn parse_rule(src: &str) -> FlowResult<RuleDef> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        at: 0,
        end: src.len(),
    };
    let rule = parser.rule()?;
    if parser.at < parser.tokens.len() {
        return Err(syntax(parser.pos(), "trailing input after rule").into());
    }
    Ok(rule)
}

impl std::str::FromStr for RuleDef {
    type Err = crate::error::FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_rule(s)
    }
}

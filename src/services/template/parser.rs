//! Template parser.
//!
//! Splits template text into literal text and `{{ ... }}` actions and parses
//! each action into a pipeline of commands.

use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Action(Pipeline),
}

/// Commands joined by `|`; each result becomes the last argument of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `.`
    Dot,
    /// `.A.B`
    Field(Vec<String>),
    /// Function name
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    /// `( pipeline )`, optionally followed by field access
    Sub(Box<Pipeline>, Vec<String>),
}

/// Parse template text into nodes.
pub fn parse(text: &str) -> Result<Vec<Node>, TemplateError> {
    let mut nodes: Vec<Node> = Vec::new();
    let mut rest = text;
    let mut offset = 0;
    let mut trim_next = false;

    while let Some(start) = rest.find("{{") {
        let mut literal = &rest[..start];
        if trim_next {
            literal = literal.trim_start();
        }

        let after_open = &rest[start + 2..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(|c: char| c.is_ascii_whitespace());
        if trim_left {
            literal = literal.trim_end();
        }
        if !literal.is_empty() {
            nodes.push(Node::Text(literal.to_string()));
        }

        let body_start = if trim_left { 1 } else { 0 };
        let close = find_close(&after_open[body_start..]).ok_or_else(|| TemplateError::Parse {
            position: offset + start,
            message: "unclosed action".to_string(),
        })?;
        let mut body = &after_open[body_start..body_start + close];

        trim_next = body.ends_with('-')
            && body[..body.len() - 1].ends_with(|c: char| c.is_ascii_whitespace());
        if trim_next {
            body = &body[..body.len() - 1];
        }

        let body = body.trim();
        let is_comment = body.starts_with("/*") && body.ends_with("*/");
        if !is_comment {
            let pipeline = parse_pipeline(body).map_err(|message| TemplateError::Parse {
                position: offset + start,
                message,
            })?;
            nodes.push(Node::Action(pipeline));
        }

        let consumed = start + 2 + body_start + close + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    let literal = if trim_next { rest.trim_start() } else { rest };
    if !literal.is_empty() {
        nodes.push(Node::Text(literal.to_string()));
    }
    Ok(nodes)
}

/// Offset of the closing `}}`, skipping over quoted strings.
fn find_close(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == b'\\' && q == b'"' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some(b);
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(Vec<String>),
    Dot,
    Ident(String),
    Str(String),
    Number(String),
    Pipe,
    Open,
    Close,
}

fn tokenize(body: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' => {
                let mut value = String::new();
                i += 1;
                loop {
                    let Some(&c) = chars.get(i) else {
                        return Err("unterminated quoted string".to_string());
                    };
                    i += 1;
                    match c {
                        '"' => break,
                        '\\' => {
                            let escaped = chars.get(i).ok_or("unterminated escape")?;
                            i += 1;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                        }
                        other => value.push(other),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '`')
                    .ok_or("unterminated raw string")?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            '.' => {
                let mut path = Vec::new();
                while chars.get(i) == Some(&'.') {
                    i += 1;
                    let start = i;
                    while chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                        i += 1;
                    }
                    if start == i {
                        break;
                    }
                    path.push(chars[start..i].iter().collect());
                }
                if path.is_empty() {
                    tokens.push(Token::Dot);
                } else {
                    tokens.push(Token::Field(path));
                }
            }
            c if c.is_ascii_digit() || ((c == '-' || c == '+') && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
                {
                    // A sign only belongs to the number right after an exponent marker.
                    if matches!(chars[i], '+' | '-') && !matches!(chars[i - 1], 'e' | 'E') {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token::Number(chars[start..i].iter().collect()));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn pipeline(&mut self) -> Result<Pipeline, String> {
        let mut commands = vec![self.command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.command()?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self) -> Result<Command, String> {
        let mut args = Vec::new();
        while let Some(token) = self.peek() {
            if matches!(token, Token::Pipe | Token::Close) {
                break;
            }
            args.push(self.operand()?);
        }
        if args.is_empty() {
            return Err("missing command".to_string());
        }
        Ok(Command { args })
    }

    fn operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Dot) => Ok(Operand::Dot),
            Some(Token::Field(path)) => Ok(Operand::Field(path)),
            Some(Token::Str(s)) => Ok(Operand::Str(s)),
            Some(Token::Number(n)) => parse_number(&n),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Operand::Bool(true),
                "false" => Operand::Bool(false),
                "nil" => Operand::Nil,
                _ => Operand::Ident(name),
            }),
            Some(Token::Open) => {
                let inner = self.pipeline()?;
                if self.next() != Some(Token::Close) {
                    return Err("unclosed parenthesis".to_string());
                }
                let path = match self.peek() {
                    Some(Token::Field(path)) => {
                        let path = path.clone();
                        self.pos += 1;
                        path
                    }
                    _ => Vec::new(),
                };
                Ok(Operand::Sub(Box::new(inner), path))
            }
            Some(Token::Close) => Err("unexpected ')'".to_string()),
            Some(Token::Pipe) => Err("unexpected '|'".to_string()),
            None => Err("unexpected end of action".to_string()),
        }
    }
}

fn parse_number(text: &str) -> Result<Operand, String> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Operand::Int(i));
    }
    text.parse::<f64>()
        .map(Operand::Float)
        .map_err(|_| format!("bad number syntax: {text}"))
}

fn parse_pipeline(body: &str) -> Result<Pipeline, String> {
    let tokens = tokenize(body)?;
    if tokens.is_empty() {
        return Err("missing value for command".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let pipeline = parser.pipeline()?;
    if parser.pos < parser.tokens.len() {
        return Err("unexpected ')'".to_string());
    }
    Ok(pipeline)
}

//! Template compilation
//!
//! `Renderer` is the compile service the engine consumes. The bundled
//! `InterpolatingRenderer` evaluates `{{ expression }}` placeholders against the
//! reactive context and extracts the text content of the resulting markup.

use super::context::ReactiveContext;
use super::element::RenderedNode;
use super::template::ResolvedTemplate;
use anyhow::{anyhow, bail, Result};
use regex::{Captures, Regex};
use scraper::Html;
use serde_json::{Number, Value};
use std::sync::OnceLock;

/// Compile service: markup + context -> rendered node
pub trait Renderer: Send + Sync {
    fn compile(&self, template: &ResolvedTemplate, context: &ReactiveContext) -> Result<RenderedNode>;
}

fn interpolation() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("interpolation pattern is valid"))
}

/// Renders `{{ }}` placeholders with integer arithmetic and context lookups
#[derive(Debug, Default, Clone, Copy)]
pub struct InterpolatingRenderer;

impl InterpolatingRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one placeholder expression to display text
    pub fn evaluate(expression: &str, context: &ReactiveContext) -> Result<String> {
        let tokens = tokenize(expression)?;
        if tokens.is_empty() {
            return Ok(String::new());
        }

        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            context,
        };
        let value = parser.expression()?;
        if parser.pos != tokens.len() {
            bail!("unexpected trailing input in '{}'", expression.trim());
        }
        Ok(display(&value))
    }
}

impl Renderer for InterpolatingRenderer {
    fn compile(&self, template: &ResolvedTemplate, context: &ReactiveContext) -> Result<RenderedNode> {
        let mut failure = None;
        let markup = interpolation().replace_all(&template.markup, |caps: &Captures| {
            match Self::evaluate(&caps[1], context) {
                Ok(text) if template.plain => text,
                Ok(text) => escape_html(&text),
                Err(err) => {
                    failure.get_or_insert(err);
                    String::new()
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }

        let fragment = Html::parse_fragment(&markup);
        let text = fragment.root_element().text().collect::<String>();

        Ok(RenderedNode {
            markup: markup.into_owned(),
            text,
        })
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(char),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| anyhow!("invalid number '{}'", literal))?;
                tokens.push(Token::Number(number));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(d) if d == quote => break,
                        Some(d) => literal.push(d),
                        None => bail!("unterminated string literal"),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' || d == '.' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' | '-' | '*' | '/' | '(' | ')' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            other => bail!("unexpected character '{}'", other),
        }
    }

    Ok(tokens)
}

/// Recursive-descent evaluator:
/// expression := term (('+' | '-') term)*
/// term       := unary (('*' | '/') unary)*
/// unary      := '-' unary | primary
/// primary    := number | string | identifier | '(' expression ')'
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    context: &'a ReactiveContext,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expression(&mut self) -> Result<Value> {
        let mut left = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            left = binary(op, &left, &right)?;
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Value> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, &left, &right)?;
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value> {
        if self.peek() == Some(&Token::Op('-')) {
            self.pos += 1;
            let operand = self.unary()?;
            return number(-as_number(&operand)?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value> {
        match self.next() {
            Some(Token::Number(n)) => number(n),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Ident(path)) => Ok(match path.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                "null" => Value::Null,
                _ => self.context.lookup(&path).unwrap_or(Value::Null),
            }),
            Some(Token::Op('(')) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::Op(')')) => Ok(value),
                    _ => bail!("missing closing parenthesis"),
                }
            }
            Some(token) => bail!("unexpected token {:?}", token),
            None => bail!("unexpected end of expression"),
        }
    }
}

fn as_number(value: &Value) -> Result<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("'{}' is not a number", s)),
        other => bail!("{} is not a number", other),
    }
}

fn number(n: f64) -> Result<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Ok(Value::Number(Number::from(n as i64)));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| anyhow!("result is not a finite number"))
}

fn binary(op: char, left: &Value, right: &Value) -> Result<Value> {
    if op == '+' && (left.is_string() || right.is_string()) {
        return Ok(Value::String(format!("{}{}", display(left), display(right))));
    }

    let (l, r) = (as_number(left)?, as_number(right)?);
    match op {
        '+' => number(l + r),
        '-' => number(l - r),
        '*' => number(l * r),
        '/' if r == 0.0 => bail!("division by zero"),
        '/' => number(l / r),
        _ => bail!("unknown operator '{}'", op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::types::DialogId;
    use serde_json::json;

    fn compile(markup: &str, plain: bool, context: &ReactiveContext) -> RenderedNode {
        InterpolatingRenderer::new()
            .compile(
                &ResolvedTemplate {
                    markup: markup.to_string(),
                    plain,
                },
                context,
            )
            .unwrap()
    }

    #[test]
    fn test_arithmetic_interpolation() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        let node = compile("<div><p>some text {{1 + 1}}</p></div>", true, &context);
        assert_eq!(node.text, "some text 2");
        assert_eq!(node.markup, "<div><p>some text 2</p></div>");
    }

    #[test]
    fn test_plain_text_template() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        assert_eq!(compile("Empty template", true, &context).text, "Empty template");
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        assert_eq!(InterpolatingRenderer::evaluate("1 + 2 * 3", &context).unwrap(), "7");
        assert_eq!(InterpolatingRenderer::evaluate("(1 + 2) * 3", &context).unwrap(), "9");
        assert_eq!(InterpolatingRenderer::evaluate("-4 + 10 / 4", &context).unwrap(), "-1.5");
    }

    #[test]
    fn test_context_lookup() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        context.set("user", json!({ "name": "Ada", "age": 36 }));

        let node = compile("<p>{{ user.name }} is {{ user.age + 1 }}</p>", true, &context);
        assert_eq!(node.text, "Ada is 37");

        // Unknown names render empty
        assert_eq!(compile("<p>[{{ missing }}]</p>", true, &context).text, "[]");
    }

    #[test]
    fn test_string_concatenation() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        assert_eq!(
            InterpolatingRenderer::evaluate("'pane: ' + (1 + 1)", &context).unwrap(),
            "pane: 2"
        );
    }

    #[test]
    fn test_unplain_values_are_escaped() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        context.set("html", json!("<b>bold</b>"));

        let escaped = compile("<p>{{ html }}</p>", false, &context);
        assert_eq!(escaped.markup, "<p>&lt;b&gt;bold&lt;/b&gt;</p>");
        assert_eq!(escaped.text, "<b>bold</b>");

        let trusted = compile("<p>{{ html }}</p>", true, &context);
        assert_eq!(trusted.text, "bold");
    }

    #[test]
    fn test_invalid_expressions_fail() {
        let context = ReactiveContext::detached(DialogId::from("dialog1"));
        let renderer = InterpolatingRenderer::new();
        let template = ResolvedTemplate {
            markup: "<p>{{ 1 / 0 }}</p>".to_string(),
            plain: true,
        };
        assert!(renderer.compile(&template, &context).is_err());
        assert!(InterpolatingRenderer::evaluate("(1 + 2", &context).is_err());
        assert!(InterpolatingRenderer::evaluate("1 2", &context).is_err());
    }
}

// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Minimal XML-RPC codec for the pfSense configuration endpoint.
//!
//! pfSense exposes its configuration API as classic XML-RPC at
//! `/xmlrpc.php`. The ecosystem has no maintained XML-RPC crate, and the
//! protocol subset pfSense uses is small (scalars, arrays, structs and
//! faults), so the codec lives here: an explicit [`Value`] model, a
//! request encoder and a recursive-descent response parser. Anything the
//! parser does not understand surfaces as
//! [`FirewallError::Protocol`] rather than being guessed at.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::lb_errors::FirewallError;

/// An XML-RPC value.
///
/// Untagged `<value>` content is a string per the XML-RPC spec; pfSense
/// relies on that for most of its config scalars, so ports and booleans
/// frequently arrive as strings and are re-interpreted by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `<int>` / `<i4>`
    Int(i64),
    /// `<boolean>`
    Bool(bool),
    /// `<string>` or untyped value content
    Str(String),
    /// `<double>`
    Double(f64),
    /// `<array>`
    Array(Vec<Value>),
    /// `<struct>`
    Struct(BTreeMap<String, Value>),
}

impl Value {
    /// Struct member lookup; `None` for non-structs and absent keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.get(key),
            _ => None,
        }
    }

    /// String view of `Str` values.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Array view of `Array` values.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Boolean view; accepts the string spellings pfSense uses ("1"/"0").
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Str(s) => match s.as_str() {
                "1" | "true" => Some(true),
                "0" | "false" | "" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Encode a `<methodCall>` document for `method` with `params`.
#[must_use]
pub fn encode_request(method: &str, params: &[Value]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str("<?xml version=\"1.0\"?>\n<methodCall>\n<methodName>");
    out.push_str(&escape(method));
    out.push_str("</methodName>\n<params>\n");
    for param in params {
        out.push_str("<param><value>");
        encode_value(&mut out, param);
        out.push_str("</value></param>\n");
    }
    out.push_str("</params>\n</methodCall>\n");
    out
}

fn encode_value(out: &mut String, value: &Value) {
    match value {
        Value::Int(i) => {
            let _ = write!(out, "<int>{i}</int>");
        }
        Value::Bool(b) => {
            let _ = write!(out, "<boolean>{}</boolean>", i32::from(*b));
        }
        Value::Str(s) => {
            let _ = write!(out, "<string>{}</string>", escape(s));
        }
        Value::Double(d) => {
            let _ = write!(out, "<double>{d}</double>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                out.push_str("<value>");
                encode_value(out, item);
                out.push_str("</value>");
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                let _ = write!(out, "<member><name>{}</name><value>", escape(name));
                encode_value(out, member);
                out.push_str("</value></member>");
            }
            out.push_str("</struct>");
        }
    }
}

/// Parse a `<methodResponse>` document and return its single value.
///
/// # Errors
///
/// - [`FirewallError::Fault`] when the response carries a `<fault>`.
/// - [`FirewallError::Protocol`] for anything that is not well-formed
///   XML-RPC in the subset pfSense emits.
pub fn parse_response(xml: &str) -> Result<Value, FirewallError> {
    let mut parser = Parser::new(xml);
    parser.skip_declaration();
    parser.expect_open("methodResponse")?;

    let tag = parser.peek_open()?;
    let value = if tag == "fault" {
        parser.expect_open("fault")?;
        let fault = parser.parse_value()?;
        let code = fault
            .get("faultCode")
            .and_then(|v| match v {
                Value::Int(i) => Some(*i),
                Value::Str(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(0);
        let message = fault
            .get("faultString")
            .and_then(Value::as_str)
            .unwrap_or("unknown fault")
            .to_string();
        return Err(FirewallError::Fault { code, message });
    } else {
        parser.expect_open("params")?;
        parser.expect_open("param")?;
        let value = parser.parse_value()?;
        parser.expect_close("param")?;
        parser.expect_close("params")?;
        value
    };

    parser.expect_close("methodResponse")?;
    Ok(value)
}

fn protocol(reason: impl Into<String>) -> FirewallError {
    FirewallError::Protocol {
        reason: reason.into(),
    }
}

/// Cursor over the response document. Only the XML-RPC element subset is
/// recognized; attributes, comments and CDATA are out of contract.
struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_declaration(&mut self) {
        self.skip_ws();
        if self.rest().starts_with("<?") {
            if let Some(end) = self.rest().find("?>") {
                self.pos += end + 2;
            }
        }
    }

    /// Name of the next opening tag, without consuming it.
    fn peek_open(&mut self) -> Result<&'a str, FirewallError> {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with('<') || rest.starts_with("</") {
            return Err(protocol(format!(
                "expected an opening tag near '{}'",
                snippet(rest)
            )));
        }
        let end = rest
            .find(['>', '/'])
            .ok_or_else(|| protocol("unterminated tag"))?;
        Ok(rest[1..end].trim())
    }

    fn expect_open(&mut self, name: &str) -> Result<(), FirewallError> {
        let tag = self.peek_open()?;
        if tag != name {
            return Err(protocol(format!("expected <{name}>, found <{tag}>")));
        }
        self.consume_tag();
        Ok(())
    }

    fn expect_close(&mut self, name: &str) -> Result<(), FirewallError> {
        self.skip_ws();
        let closing = format!("</{name}>");
        if self.rest().starts_with(&closing) {
            self.pos += closing.len();
            Ok(())
        } else {
            Err(protocol(format!(
                "expected </{name}> near '{}'",
                snippet(self.rest())
            )))
        }
    }

    /// Consume the tag at the cursor; returns true for `<tag/>`.
    fn consume_tag(&mut self) -> bool {
        let rest = self.rest();
        if let Some(end) = rest.find('>') {
            let self_closing = rest[..end].ends_with('/');
            self.pos += end + 1;
            self_closing
        } else {
            self.pos = self.input.len();
            false
        }
    }

    /// Text content up to the next '<', entity-decoded.
    fn take_text(&mut self) -> String {
        let rest = self.rest();
        let end = rest.find('<').unwrap_or(rest.len());
        self.pos += end;
        unescape(&rest[..end])
    }

    fn parse_value(&mut self) -> Result<Value, FirewallError> {
        self.skip_ws();
        if self.rest().starts_with("<value/>") {
            self.consume_tag();
            return Ok(Value::Str(String::new()));
        }
        self.expect_open("value")?;

        // Untyped content is a string, including the empty string for an
        // immediately-closed value.
        self.skip_value_ws();
        let value = if self.rest().starts_with("</value>") {
            Value::Str(String::new())
        } else if self.rest().starts_with('<') {
            self.parse_typed_value()?
        } else {
            Value::Str(self.take_text())
        };

        self.expect_close("value")?;
        Ok(value)
    }

    /// Inside `<value>`, leading whitespace before a child element is
    /// formatting noise, but whitespace-only text before `</value>` or
    /// raw text is significant. Only skip when an element follows.
    fn skip_value_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        if trimmed.starts_with('<') {
            self.pos = self.input.len() - trimmed.len();
        }
    }

    fn parse_typed_value(&mut self) -> Result<Value, FirewallError> {
        let tag = self.peek_open()?;
        match tag {
            "int" | "i4" => {
                let text = self.element_text(tag)?;
                let parsed = text
                    .trim()
                    .parse()
                    .map_err(|_| protocol(format!("bad integer '{text}'")))?;
                Ok(Value::Int(parsed))
            }
            "boolean" => {
                let text = self.element_text(tag)?;
                match text.trim() {
                    "1" | "true" => Ok(Value::Bool(true)),
                    "0" | "false" => Ok(Value::Bool(false)),
                    other => Err(protocol(format!("bad boolean '{other}'"))),
                }
            }
            "double" => {
                let text = self.element_text(tag)?;
                let parsed = text
                    .trim()
                    .parse()
                    .map_err(|_| protocol(format!("bad double '{text}'")))?;
                Ok(Value::Double(parsed))
            }
            // base64 payloads are passed through as text; pfSense only
            // uses them for fields this controller never touches.
            "string" | "base64" | "dateTime.iso8601" => {
                let text = self.element_text(tag)?;
                Ok(Value::Str(text))
            }
            "array" => self.parse_array(),
            "struct" => self.parse_struct(),
            other => Err(protocol(format!("unsupported value type <{other}>"))),
        }
    }

    /// Consume `<tag>text</tag>` (or `<tag/>`) and return the text.
    fn element_text(&mut self, tag: &str) -> Result<String, FirewallError> {
        if self.consume_tag() {
            return Ok(String::new());
        }
        let text = self.take_text();
        self.expect_close(tag)?;
        Ok(text)
    }

    fn parse_array(&mut self) -> Result<Value, FirewallError> {
        if self.consume_tag() {
            return Ok(Value::Array(Vec::new()));
        }
        self.skip_ws();
        if self.rest().starts_with("<data/>") {
            self.consume_tag();
            self.expect_close("array")?;
            return Ok(Value::Array(Vec::new()));
        }
        self.expect_open("data")?;

        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with("</data>") {
                break;
            }
            items.push(self.parse_value()?);
        }
        self.expect_close("data")?;
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn parse_struct(&mut self) -> Result<Value, FirewallError> {
        if self.consume_tag() {
            return Ok(Value::Struct(BTreeMap::new()));
        }

        let mut members = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with("</struct>") {
                break;
            }
            self.expect_open("member")?;
            self.expect_open("name")?;
            let name = self.take_text();
            self.expect_close("name")?;
            let value = self.parse_value()?;
            self.expect_close("member")?;
            members.insert(name, value);
        }
        self.expect_close("struct")?;
        Ok(Value::Struct(members))
    }
}

fn snippet(s: &str) -> String {
    s.chars().take(40).collect()
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(idx) = rest.find('&') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx..];
        let known = [
            ("&amp;", '&'),
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ];
        if let Some((entity, ch)) = known.iter().find(|(e, _)| rest.starts_with(e)) {
            out.push(*ch);
            rest = &rest[entity.len()..];
        } else {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[path = "xmlrpc_tests.rs"]
mod xmlrpc_tests;

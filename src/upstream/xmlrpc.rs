// src/upstream/xmlrpc.rs

//! Minimal XML-RPC codec for the changelog endpoint
//!
//! The index exposes its changelog over XML-RPC (`changelog_last_serial`,
//! `changelog_since_serial`, `list_packages_with_serial`). The responses
//! use a tiny subset of the protocol: ints, strings, arrays and structs,
//! no attributes on any element we care about. This module implements just
//! that subset; the request side is plain string assembly.

use crate::error::{Error, Result};

/// A decoded XML-RPC value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Double(f64),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(members) => Some(members),
            _ => None,
        }
    }
}

/// Render a method call document
pub fn request(method: &str, params: &[Value]) -> String {
    let mut body = String::with_capacity(256);
    body.push_str("<?xml version=\"1.0\"?>\n<methodCall>\n<methodName>");
    body.push_str(&escape(method));
    body.push_str("</methodName>\n<params>\n");
    for param in params {
        body.push_str("<param>");
        render_value(param, &mut body);
        body.push_str("</param>\n");
    }
    body.push_str("</params>\n</methodCall>\n");
    body
}

fn render_value(value: &Value, out: &mut String) {
    out.push_str("<value>");
    match value {
        Value::Int(n) => {
            out.push_str("<int>");
            out.push_str(&n.to_string());
            out.push_str("</int>");
        }
        Value::Str(s) => {
            out.push_str("<string>");
            out.push_str(&escape(s));
            out.push_str("</string>");
        }
        Value::Bool(b) => {
            out.push_str("<boolean>");
            out.push(if *b { '1' } else { '0' });
            out.push_str("</boolean>");
        }
        Value::Double(d) => {
            out.push_str("<double>");
            out.push_str(&d.to_string());
            out.push_str("</double>");
        }
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                render_value(item, out);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                out.push_str(&escape(name));
                out.push_str("</name>");
                render_value(member, out);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
        Value::Nil => out.push_str("<nil/>"),
    }
    out.push_str("</value>");
}

/// Parse a method response document, returning the single result value.
///
/// A `<fault>` response surfaces as a parse error carrying the fault
/// string, since the changelog endpoint only faults on operator error.
pub fn parse_response(body: &str) -> Result<Value> {
    let mut cursor = Cursor::new(body);

    cursor.expect_tag("methodResponse")?;
    if cursor.peek_tag()? == "fault" {
        cursor.expect_tag("fault")?;
        let fault = cursor.parse_value()?;
        return Err(Error::ParseError(format!("XML-RPC fault: {fault:?}")));
    }
    cursor.expect_tag("params")?;
    cursor.expect_tag("param")?;
    cursor.parse_value()
}

/// Tag-level cursor over an XML document without attributes
struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(body: &'a str) -> Self {
        Self { rest: body }
    }

    fn err(&self, what: &str) -> Error {
        let context: String = self.rest.chars().take(48).collect();
        Error::ParseError(format!("XML-RPC: {what} near '{context}'"))
    }

    /// Advance to the next `<`, skipping text, XML declarations and comments
    fn skip_to_tag(&mut self) -> Result<()> {
        loop {
            let start = self
                .rest
                .find('<')
                .ok_or_else(|| self.err("unexpected end of document"))?;
            self.rest = &self.rest[start..];
            if self.rest.starts_with("<?") || self.rest.starts_with("<!--") {
                let end = self
                    .rest
                    .find('>')
                    .ok_or_else(|| self.err("unterminated declaration"))?;
                self.rest = &self.rest[end + 1..];
                continue;
            }
            return Ok(());
        }
    }

    /// Name of the next opening tag, without consuming it
    fn peek_tag(&mut self) -> Result<&'a str> {
        self.skip_to_tag()?;
        let end = self
            .rest
            .find('>')
            .ok_or_else(|| self.err("unterminated tag"))?;
        let name = self.rest[1..end].trim_end_matches('/').trim();
        Ok(name)
    }

    /// Consume an opening tag with the given name
    fn expect_tag(&mut self, name: &str) -> Result<()> {
        let tag = self.peek_tag()?;
        if tag != name {
            return Err(self.err(&format!("expected <{name}>, found <{tag}>")));
        }
        let end = self
            .rest
            .find('>')
            .ok_or_else(|| self.err("unterminated tag"))?;
        self.rest = &self.rest[end + 1..];
        Ok(())
    }

    /// Consume a closing tag with the given name
    fn expect_close(&mut self, name: &str) -> Result<()> {
        self.skip_to_tag()?;
        let closing = format!("</{name}>");
        if let Some(rest) = self.rest.strip_prefix(closing.as_str()) {
            self.rest = rest;
            Ok(())
        } else {
            Err(self.err(&format!("expected </{name}>")))
        }
    }

    /// Text content up to the next `<`
    fn take_text(&mut self) -> Result<&'a str> {
        let end = self
            .rest
            .find('<')
            .ok_or_else(|| self.err("unterminated text"))?;
        let (text, rest) = self.rest.split_at(end);
        self.rest = rest;
        Ok(text)
    }

    /// Parse one `<value>...</value>` element
    fn parse_value(&mut self) -> Result<Value> {
        self.expect_tag("value")?;

        // A value may carry bare text (implicit string)
        let text_end = self
            .rest
            .find('<')
            .ok_or_else(|| self.err("unterminated value"))?;
        if !self.rest[..text_end].trim().is_empty() {
            let text = unescape(self.rest[..text_end].trim());
            self.rest = &self.rest[text_end..];
            self.expect_close("value")?;
            return Ok(Value::Str(text));
        }
        if self.rest[text_end..].starts_with("</value>") {
            self.rest = &self.rest[text_end + "</value>".len()..];
            return Ok(Value::Str(String::new()));
        }

        let tag = self.peek_tag()?;
        let value = match tag {
            "int" | "i4" | "i8" => {
                let tag = tag.to_string();
                self.expect_tag(&tag)?;
                let text = self.take_text()?.trim();
                let n = text
                    .parse::<i64>()
                    .map_err(|_| self.err("invalid integer"))?;
                self.expect_close(&tag)?;
                Value::Int(n)
            }
            "string" => {
                self.expect_tag("string")?;
                let text = unescape(self.take_text()?);
                self.expect_close("string")?;
                Value::Str(text)
            }
            "boolean" => {
                self.expect_tag("boolean")?;
                let text = self.take_text()?.trim();
                self.expect_close("boolean")?;
                Value::Bool(text == "1")
            }
            "double" => {
                self.expect_tag("double")?;
                let text = self.take_text()?.trim();
                let d = text
                    .parse::<f64>()
                    .map_err(|_| self.err("invalid double"))?;
                self.expect_close("double")?;
                Value::Double(d)
            }
            "nil" | "nil/" => {
                let end = self
                    .rest
                    .find('>')
                    .ok_or_else(|| self.err("unterminated tag"))?;
                self.rest = &self.rest[end + 1..];
                Value::Nil
            }
            "array" => {
                self.expect_tag("array")?;
                self.expect_tag("data")?;
                let mut items = Vec::new();
                while self.peek_tag()? == "value" {
                    items.push(self.parse_value()?);
                }
                self.expect_close("data")?;
                self.expect_close("array")?;
                Value::Array(items)
            }
            "struct" => {
                self.expect_tag("struct")?;
                let mut members = Vec::new();
                while self.peek_tag()? == "member" {
                    self.expect_tag("member")?;
                    self.expect_tag("name")?;
                    let name = unescape(self.take_text()?);
                    self.expect_close("name")?;
                    let value = self.parse_value()?;
                    self.expect_close("member")?;
                    members.push((name, value));
                }
                self.expect_close("struct")?;
                Value::Struct(members)
            }
            other => return Err(self.err(&format!("unsupported value type <{other}>"))),
        };

        self.expect_close("value")?;
        Ok(value)
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_request() {
        let body = request("changelog_since_serial", &[Value::Int(1234)]);
        assert!(body.contains("<methodName>changelog_since_serial</methodName>"));
        assert!(body.contains("<value><int>1234</int></value>"));
    }

    #[test]
    fn test_parse_int_response() {
        let body = "<?xml version=\"1.0\"?>\n<methodResponse><params><param>\
                    <value><int>28000000</int></value>\
                    </param></params></methodResponse>";
        let value = parse_response(body).unwrap();
        assert_eq!(value.as_int(), Some(28_000_000));
    }

    #[test]
    fn test_parse_changelog_tuples() {
        let body = "<methodResponse><params><param><value><array><data>\
                    <value><array><data>\
                    <value><string>peerme</string></value>\
                    <value><string>1.0.1</string></value>\
                    <value><int>1700000000</int></value>\
                    <value><string>new release</string></value>\
                    <value><int>4242</int></value>\
                    </data></array></value>\
                    </data></array></value></param></params></methodResponse>";
        let value = parse_response(body).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_array().unwrap();
        assert_eq!(row[0].as_str(), Some("peerme"));
        assert_eq!(row[4].as_int(), Some(4242));
    }

    #[test]
    fn test_parse_struct_of_serials() {
        let body = "<methodResponse><params><param><value><struct>\
                    <member><name>peerme</name><value><int>10</int></value></member>\
                    <member><name>pyaib</name><value><int>20</int></value></member>\
                    </struct></value></param></params></methodResponse>";
        let value = parse_response(body).unwrap();
        let members = value.as_struct().unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].0, "peerme");
        assert_eq!(members[1].1.as_int(), Some(20));
    }

    #[test]
    fn test_parse_fault() {
        let body = "<methodResponse><fault><value><struct>\
                    <member><name>faultString</name>\
                    <value><string>boom</string></value></member>\
                    </struct></value></fault></methodResponse>";
        assert!(parse_response(body).is_err());
    }

    #[test]
    fn test_parse_implicit_string() {
        let body = "<methodResponse><params><param>\
                    <value>bare text</value>\
                    </param></params></methodResponse>";
        let value = parse_response(body).unwrap();
        assert_eq!(value.as_str(), Some("bare text"));

        let empty = "<methodResponse><params><param>\
                     <value></value>\
                     </param></params></methodResponse>";
        assert_eq!(parse_response(empty).unwrap().as_str(), Some(""));
    }

    #[test]
    fn test_escape_round_trip() {
        let original = "a<b>&c";
        assert_eq!(unescape(&escape(original)), original);
    }
}

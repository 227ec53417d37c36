//! # Frame Schema
//!
//! The voice gateway describes its frames with a protobuf `.proto` file. The
//! client reads that description at startup instead of compiling it in, so the
//! field numbers always follow whatever schema the gateway publishes.
//!
//! ## Supported proto3 subset:
//! - `syntax`, `package`, `import`, `option` (imports and options are ignored)
//! - top-level `message` declarations with `oneof` groups and `optional` /
//!   `repeated` labels
//! - `enum`, `service` and `extend` blocks are skipped
//!
//! ## Loading:
//! [`SchemaLoader`] fetches and parses the schema once. Concurrent callers of
//! [`SchemaLoader::get`] all wait on the same load; a failed load is not cached,
//! so the next caller retries.

use crate::error::SchemaError;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const BUILTIN_SCHEMA: &str = include_str!("../../assets/frames.proto");

/// Protobuf scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "double" => ScalarType::Double,
            "float" => ScalarType::Float,
            "int32" => ScalarType::Int32,
            "int64" => ScalarType::Int64,
            "uint32" => ScalarType::Uint32,
            "uint64" => ScalarType::Uint64,
            "sint32" => ScalarType::Sint32,
            "sint64" => ScalarType::Sint64,
            "fixed32" => ScalarType::Fixed32,
            "fixed64" => ScalarType::Fixed64,
            "sfixed32" => ScalarType::Sfixed32,
            "sfixed64" => ScalarType::Sfixed64,
            "bool" => ScalarType::Bool,
            "string" => ScalarType::String,
            "bytes" => ScalarType::Bytes,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Scalar(ScalarType),
    /// Fully qualified message name, without the leading dot.
    Message(String),
}

impl FieldType {
    pub fn describe(&self) -> String {
        match self {
            FieldType::Scalar(scalar) => format!("{scalar:?}").to_lowercase(),
            FieldType::Message(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Singular,
    Optional,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub number: u32,
    pub label: Label,
    pub ty: FieldType,
    pub oneof: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageType {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl MessageType {
    pub fn field(&self, name: &str) -> Result<&FieldDef, SchemaError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| SchemaError::MissingField {
                message: self.name.clone(),
                field: name.to_string(),
            })
    }
}

/// A parsed `.proto` description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    messages: HashMap<String, MessageType>,
}

impl Schema {
    pub fn parse(text: &str) -> Result<Self, SchemaError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0, package: String::new(), raw: Vec::new() };
        parser.parse_file()?;
        parser.resolve()
    }

    /// Look up a message by fully qualified name (`pipecat.Frame`).
    pub fn message(&self, name: &str) -> Result<&MessageType, SchemaError> {
        let name = name.trim_start_matches('.');
        self.messages
            .get(name)
            .ok_or_else(|| SchemaError::MissingType(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(u64),
    Str(String),
    Symbol(char),
}

#[derive(Debug, Clone)]
struct Lexed {
    token: Token,
    line: usize,
}

fn tokenize(text: &str) -> Result<Vec<Lexed>, SchemaError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '/' => {
                chars.next();
                match chars.peek() {
                    Some('/') => {
                        while let Some(&c) = chars.peek() {
                            if c == '\n' {
                                break;
                            }
                            chars.next();
                        }
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = '\0';
                        loop {
                            match chars.next() {
                                Some('/') if prev == '*' => break,
                                Some(c) => {
                                    if c == '\n' {
                                        line += 1;
                                    }
                                    prev = c;
                                }
                                None => {
                                    return Err(SchemaError::Parse { line, message: "unterminated comment".into() })
                                }
                            }
                        }
                    }
                    _ => return Err(SchemaError::Parse { line, message: "stray `/`".into() }),
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some('\n') | None => {
                            return Err(SchemaError::Parse { line, message: "unterminated string".into() })
                        }
                        Some(c) => value.push(c),
                    }
                }
                tokens.push(Lexed { token: Token::Str(value), line });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() {
                        digits.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
                    u64::from_str_radix(hex, 16)
                } else {
                    digits.parse::<u64>()
                }
                .map_err(|_| SchemaError::Parse { line, message: format!("bad number `{digits}`") })?;
                tokens.push(Lexed { token: Token::Int(value), line });
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Lexed { token: Token::Ident(ident), line });
            }
            _ => {
                chars.next();
                tokens.push(Lexed { token: Token::Symbol(c), line });
            }
        }
    }

    Ok(tokens)
}

struct RawField {
    name: String,
    number: u32,
    label: Label,
    oneof: Option<String>,
    type_name: String,
    line: usize,
}

struct RawMessage {
    full_name: String,
    fields: Vec<RawField>,
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
    package: String,
    raw: Vec<RawMessage>,
}

impl Parser {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn error<T>(&self, message: impl Into<String>) -> Result<T, SchemaError> {
        Err(SchemaError::Parse { line: self.line(), message: message.into() })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), SchemaError> {
        match self.next() {
            Some(Token::Symbol(c)) if c == symbol => Ok(()),
            other => self.error(format!("expected `{symbol}`, found {other:?}")),
        }
    }

    fn expect_ident(&mut self) -> Result<String, SchemaError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => self.error(format!("expected identifier, found {other:?}")),
        }
    }

    fn skip_statement(&mut self) -> Result<(), SchemaError> {
        loop {
            match self.next() {
                Some(Token::Symbol(';')) => return Ok(()),
                Some(_) => {}
                None => return self.error("unexpected end of file"),
            }
        }
    }

    fn skip_block(&mut self) -> Result<(), SchemaError> {
        // Skip up to and including the matching `}` of the next `{`.
        while !matches!(self.peek(), Some(Token::Symbol('{'))) {
            if self.next().is_none() {
                return self.error("unexpected end of file");
            }
        }
        let mut depth = 0usize;
        loop {
            match self.next() {
                Some(Token::Symbol('{')) => depth += 1,
                Some(Token::Symbol('}')) => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some(_) => {}
                None => return self.error("unbalanced braces"),
            }
        }
    }

    fn qualify(scope: &str, name: &str) -> String {
        if scope.is_empty() {
            name.to_string()
        } else {
            format!("{scope}.{name}")
        }
    }

    fn parse_file(&mut self) -> Result<(), SchemaError> {
        while let Some(token) = self.next() {
            match token {
                Token::Ident(kw) if kw == "syntax" || kw == "edition" => {
                    self.expect_symbol('=')?;
                    match self.next() {
                        Some(Token::Str(version)) if version == "proto3" || version == "proto2" => {}
                        other => return self.error(format!("unsupported syntax {other:?}")),
                    }
                    self.expect_symbol(';')?;
                }
                Token::Ident(kw) if kw == "package" => {
                    self.package = self.expect_ident()?;
                    self.expect_symbol(';')?;
                }
                Token::Ident(kw) if kw == "import" || kw == "option" => self.skip_statement()?,
                Token::Ident(kw) if kw == "message" => self.parse_message()?,
                Token::Ident(kw) if kw == "enum" || kw == "service" || kw == "extend" => self.skip_block()?,
                Token::Symbol(';') => {}
                other => return self.error(format!("unexpected {other:?} at top level")),
            }
        }
        Ok(())
    }

    fn parse_message(&mut self) -> Result<(), SchemaError> {
        let name = self.expect_ident()?;
        let full_name = Self::qualify(&self.package, &name);
        self.expect_symbol('{')?;

        let mut fields = Vec::new();
        loop {
            match self.peek().cloned() {
                Some(Token::Symbol('}')) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Symbol(';')) => self.pos += 1,
                Some(Token::Ident(kw)) => match kw.as_str() {
                    "message" | "enum" | "map" => {
                        return self.error(format!("`{kw}` inside message `{full_name}` is not supported"))
                    }
                    "oneof" => {
                        self.pos += 1;
                        let group = self.expect_ident()?;
                        self.expect_symbol('{')?;
                        loop {
                            match self.peek() {
                                Some(Token::Symbol('}')) => {
                                    self.pos += 1;
                                    break;
                                }
                                Some(Token::Ident(kw)) if kw == "option" => self.skip_statement()?,
                                Some(_) => fields.push(self.parse_field(Some(group.clone()))?),
                                None => return self.error("unterminated oneof"),
                            }
                        }
                    }
                    "option" | "reserved" | "extensions" => self.skip_statement()?,
                    "extend" => self.skip_block()?,
                    _ => fields.push(self.parse_field(None)?),
                },
                other => return self.error(format!("unexpected {other:?} in message `{full_name}`")),
            }
        }

        self.raw.push(RawMessage { full_name, fields });
        Ok(())
    }

    fn parse_field(&mut self, oneof: Option<String>) -> Result<RawField, SchemaError> {
        let line = self.line();
        let mut type_name = self.expect_ident()?;
        let label = match type_name.as_str() {
            "optional" => Label::Optional,
            "repeated" => Label::Repeated,
            _ => Label::Singular,
        };
        if matches!(type_name.as_str(), "optional" | "repeated" | "required") {
            type_name = self.expect_ident()?;
        }

        let name = self.expect_ident()?;
        self.expect_symbol('=')?;
        let number = match self.next() {
            Some(Token::Int(n)) if n > 0 && n <= u64::from(u32::MAX >> 3) => n as u32,
            other => return self.error(format!("bad field number {other:?} for `{name}`")),
        };

        if matches!(self.peek(), Some(Token::Symbol('['))) {
            while !matches!(self.next(), Some(Token::Symbol(']')) | None) {}
        }
        self.expect_symbol(';')?;

        Ok(RawField { name, number, label, oneof, type_name, line })
    }

    /// Resolve a type reference: absolute, package-qualified, then as written.
    fn resolve_type(&self, name: &str, known: &HashSet<String>) -> Option<String> {
        let candidates = match name.strip_prefix('.') {
            Some(absolute) => vec![absolute.to_string()],
            None => vec![Self::qualify(&self.package, name), name.to_string()],
        };
        candidates.into_iter().find(|candidate| known.contains(candidate))
    }

    fn resolve(self) -> Result<Schema, SchemaError> {
        let message_names: HashSet<String> = self.raw.iter().map(|m| m.full_name.clone()).collect();
        let mut messages = HashMap::new();

        for raw in &self.raw {
            let mut fields = Vec::with_capacity(raw.fields.len());
            for field in &raw.fields {
                let ty = if let Some(scalar) = ScalarType::from_name(&field.type_name) {
                    FieldType::Scalar(scalar)
                } else if let Some(full) = self.resolve_type(&field.type_name, &message_names) {
                    FieldType::Message(full)
                } else {
                    return Err(SchemaError::Parse {
                        line: field.line,
                        message: format!("unknown type `{}` in `{}`", field.type_name, raw.full_name),
                    });
                };
                fields.push(FieldDef {
                    name: field.name.clone(),
                    number: field.number,
                    label: field.label,
                    ty,
                    oneof: field.oneof.clone(),
                });
            }
            messages.insert(raw.full_name.clone(), MessageType { name: raw.full_name.clone(), fields });
        }

        Ok(Schema { messages })
    }
}

/// Where the schema text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    Builtin,
    File(PathBuf),
    Url(String),
}

impl SchemaSource {
    /// `builtin`, an `http(s)://` URL, or a filesystem path.
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("builtin") {
            SchemaSource::Builtin
        } else if value.starts_with("http://") || value.starts_with("https://") {
            SchemaSource::Url(value.to_string())
        } else {
            SchemaSource::File(PathBuf::from(value))
        }
    }

    fn describe(&self) -> String {
        match self {
            SchemaSource::Builtin => "builtin".to_string(),
            SchemaSource::File(path) => path.display().to_string(),
            SchemaSource::Url(url) => url.clone(),
        }
    }

    async fn fetch(&self) -> Result<String, SchemaError> {
        let fetch_error = |message: String| SchemaError::Fetch { source_name: self.describe(), message };
        match self {
            SchemaSource::Builtin => Ok(BUILTIN_SCHEMA.to_string()),
            SchemaSource::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| fetch_error(e.to_string())),
            SchemaSource::Url(url) => {
                let response = reqwest::get(url).await.map_err(|e| fetch_error(e.to_string()))?;
                let response = response.error_for_status().map_err(|e| fetch_error(e.to_string()))?;
                response.text().await.map_err(|e| fetch_error(e.to_string()))
            }
        }
    }
}

/// Load-once holder for the frame schema.
pub struct SchemaLoader {
    source: SchemaSource,
    cell: OnceCell<Arc<Schema>>,
}

impl SchemaLoader {
    pub fn new(source: SchemaSource) -> Self {
        Self { source, cell: OnceCell::new() }
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// The schema, loading it on first use.
    pub async fn get(&self) -> Result<Arc<Schema>, SchemaError> {
        self.cell
            .get_or_try_init(|| async {
                debug!(source = %self.source.describe(), "Loading frame schema");
                let text = self.source.fetch().await?;
                let schema = Schema::parse(&text)?;
                info!(
                    source = %self.source.describe(),
                    messages = schema.messages.len(),
                    "Frame schema loaded"
                );
                Ok(Arc::new(schema))
            })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_schema_parses() {
        let schema = Schema::parse(BUILTIN_SCHEMA).unwrap();
        let frame = schema.message("pipecat.Frame").unwrap();
        let audio = frame.field("audio").unwrap();
        assert_eq!(audio.number, 2);
        assert_eq!(audio.oneof.as_deref(), Some("frame"));
        assert_eq!(audio.ty, FieldType::Message("pipecat.AudioRawFrame".into()));

        let raw = schema.message(".pipecat.AudioRawFrame").unwrap();
        assert_eq!(raw.field("audio").unwrap().ty, FieldType::Scalar(ScalarType::Bytes));
        assert_eq!(raw.field("sample_rate").unwrap().number, 4);
        assert_eq!(raw.field("pts").unwrap().label, Label::Optional);
    }

    #[test]
    fn test_enums_are_skipped_and_nested_declarations_rejected() {
        let text = r#"
            syntax = "proto3";
            package demo;
            /* block
               comment */
            enum Kind { A = 0; B = 1; }
            message Inner { repeated int32 values = 1 [packed = true]; }
            message Outer {
                Inner inner = 1;
                .demo.Inner other = 2;
                reserved 4, 5;
            }
        "#;
        let schema = Schema::parse(text).unwrap();
        let outer = schema.message("demo.Outer").unwrap();
        assert_eq!(outer.field("inner").unwrap().ty, FieldType::Message("demo.Inner".into()));
        assert_eq!(outer.field("other").unwrap().ty, FieldType::Message("demo.Inner".into()));
        let inner = schema.message("demo.Inner").unwrap();
        assert_eq!(inner.field("values").unwrap().label, Label::Repeated);

        let err = Schema::parse("message A { message B { int32 x = 1; } }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { line: 1, .. }), "{err:?}");
        assert!(Schema::parse("message A { map<string, int32> m = 1; }").is_err());
    }

    #[test]
    fn test_parse_errors_carry_line() {
        let err = Schema::parse("syntax = \"proto3\";\nmessage A {\n  Missing m = 1;\n}\n").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { line: 3, .. }), "{err:?}");

        let err = Schema::parse("message A { int32 x = ; }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn test_missing_lookups() {
        let schema = Schema::parse(BUILTIN_SCHEMA).unwrap();
        assert!(matches!(schema.message("pipecat.Nope"), Err(SchemaError::MissingType(_))));
        let frame = schema.message("pipecat.Frame").unwrap();
        assert!(matches!(frame.field("video"), Err(SchemaError::MissingField { .. })));
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!(SchemaSource::parse("builtin"), SchemaSource::Builtin);
        assert_eq!(SchemaSource::parse("https://x/frames.proto"), SchemaSource::Url("https://x/frames.proto".into()));
        assert_eq!(SchemaSource::parse("/srv/frames.proto"), SchemaSource::File("/srv/frames.proto".into()));
    }

    #[tokio::test]
    async fn test_loader_loads_once_for_concurrent_callers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BUILTIN_SCHEMA.as_bytes()).unwrap();

        let loader = SchemaLoader::new(SchemaSource::File(file.path().to_path_buf()));
        assert!(!loader.is_loaded());
        let (a, b) = tokio::join!(loader.get(), loader.get());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(loader.is_loaded());

        // Later edits to the file are not picked up.
        file.as_file_mut().set_len(0).unwrap();
        let c = loader.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.proto");
        let loader = SchemaLoader::new(SchemaSource::File(path.clone()));

        assert!(matches!(loader.get().await, Err(SchemaError::Fetch { .. })));
        std::fs::write(&path, BUILTIN_SCHEMA).unwrap();
        assert!(loader.get().await.is_ok());
    }
}

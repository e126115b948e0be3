//! Reusable shader fragments: signature extraction and call-site rendering.
//!
//! A fragment is GLSL-like source made of top-level items:
//! - `uniform T name [= value];` declarations
//! - helper functions, constants, structs, preprocessor lines
//! - one entry function: `main` if present, otherwise the last function
//!
//! Entry parameters are `[in|out] T name`. The entry is renamed per call site
//! so one fragment can be instantiated any number of times in a program;
//! helpers, globals and `#define` macros are prefixed the same way.

use std::collections::HashMap;

use anyhow::Result;

use super::errors::SignatureError;
use super::types::{Direction, GlslType};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: GlslType,
    pub direction: Direction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Uniform {
    pub name: String,
    pub ty: GlslType,
    /// Initializer text, if the declaration carried one.
    pub value: Option<String>,
}

/// Ordered entry parameters plus uniforms in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
    pub uniforms: Vec<Uniform>,
}

#[derive(Clone, Debug)]
enum Item {
    Directive {
        text: String,
        defines: Option<String>,
    },
    Global {
        text: String,
        names: Vec<String>,
    },
    /// Index into the signature's uniforms.
    Uniform(usize),
    Function(Function),
}

#[derive(Clone, Debug)]
struct Function {
    return_type: String,
    name: String,
    params: String,
    /// Body including its braces.
    body: String,
}

#[derive(Clone, Debug)]
pub struct Fragment {
    name: String,
    items: Vec<Item>,
    entry: usize,
    signature: Signature,
}

impl Fragment {
    /// Parse a fragment, naming it after its entry function.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_name(None, source)
    }

    /// Parse a fragment under an explicit base name.
    pub fn named(name: &str, source: &str) -> Result<Self> {
        Self::parse_with_name(Some(name), source)
    }

    fn parse_with_name(name: Option<&str>, source: &str) -> Result<Self> {
        let stripped = strip_comments(source);
        let mut items = Vec::new();
        let mut uniforms = Vec::new();

        for raw in split_items(&stripped)? {
            match raw {
                RawItem::Directive(text) => items.push(Item::Directive {
                    text: text.to_string(),
                    defines: defined_macro(text),
                }),
                RawItem::Statement(text) => {
                    if first_token(text) == Some("uniform") {
                        items.push(Item::Uniform(uniforms.len()));
                        uniforms.push(parse_uniform(text)?);
                    } else {
                        items.push(Item::Global {
                            text: text.to_string(),
                            names: global_names(text),
                        });
                    }
                }
                RawItem::Function { header, body } => {
                    items.push(Item::Function(parse_function(header, body)?));
                }
            }
        }

        let entry = items
            .iter()
            .position(|item| matches!(item, Item::Function(f) if f.name == "main"))
            .or_else(|| items.iter().rposition(|item| matches!(item, Item::Function(_))))
            .ok_or(SignatureError::NoEntryFunction)?;

        let Item::Function(entry_fn) = &items[entry] else {
            return Err(SignatureError::NoEntryFunction.into());
        };
        let parameters = parse_parameters(&entry_fn.params)?;
        let name = sanitize_ident(name.unwrap_or(&entry_fn.name));

        Ok(Self {
            name,
            items,
            entry,
            signature: Signature {
                parameters,
                uniforms,
            },
        })
    }

    /// Base name used when building call names.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Render this fragment's code for one call site.
    ///
    /// The entry function becomes `call_name`; helpers, named globals and
    /// macros get a `{call_name}_` prefix. Passthrough uniform declarations
    /// are dropped since the program declares them. A uniform listed in
    /// `replaced` becomes a prefixed global, fed from an `in T {global}_in`
    /// parameter appended to the entry and copied on entry.
    pub fn compile(&self, call_name: &str, replaced: &[String]) -> String {
        let is_replaced = |name: &str| replaced.iter().any(|r| r == name);
        let replaced_uniforms: Vec<&Uniform> = self
            .signature
            .uniforms
            .iter()
            .filter(|u| is_replaced(u.name.as_str()))
            .collect();

        let mut renames: HashMap<&str, String> = HashMap::new();
        for (i, item) in self.items.iter().enumerate() {
            match item {
                Item::Directive {
                    defines: Some(name),
                    ..
                } => {
                    renames.insert(name, format!("{call_name}_{name}"));
                }
                Item::Function(f) if i != self.entry => {
                    renames.insert(&f.name, format!("{call_name}_{}", f.name));
                }
                Item::Global { names, .. } => {
                    for name in names {
                        renames.insert(name, format!("{call_name}_{name}"));
                    }
                }
                _ => {}
            }
        }
        for uniform in &replaced_uniforms {
            renames.insert(&uniform.name, format!("{call_name}_{}", uniform.name));
        }
        if let Item::Function(entry) = &self.items[self.entry] {
            renames.insert(&entry.name, call_name.to_string());
        }

        let mut out: Vec<String> = Vec::new();
        for (i, item) in self.items.iter().enumerate() {
            match item {
                Item::Directive { text, .. } => out.push(rename_identifiers(text, &renames)),
                Item::Uniform(u) => {
                    let uniform = &self.signature.uniforms[*u];
                    if is_replaced(uniform.name.as_str()) {
                        out.push(format!("{} {call_name}_{};", uniform.ty, uniform.name));
                    }
                }
                Item::Global { text, .. } => out.push(rename_identifiers(text, &renames)),
                Item::Function(f) if i == self.entry => {
                    let mut params: Vec<String> = self
                        .signature
                        .parameters
                        .iter()
                        .map(|p| {
                            let qualifier = match p.direction {
                                Direction::In => "in",
                                Direction::Out => "out",
                            };
                            format!("{qualifier} {} {}", p.ty, p.name)
                        })
                        .collect();
                    params.extend(
                        replaced_uniforms
                            .iter()
                            .map(|u| format!("in {} {call_name}_{}_in", u.ty, u.name)),
                    );

                    let body = rename_identifiers(&f.body, &renames);
                    let copies: String = replaced_uniforms
                        .iter()
                        .map(|u| format!("\n    {call_name}_{0} = {call_name}_{0}_in;", u.name))
                        .collect();
                    let body = if copies.is_empty() {
                        body
                    } else {
                        format!("{{{copies}{}", body.strip_prefix('{').unwrap_or(&body))
                    };
                    out.push(format!(
                        "{} {call_name}({}) {body}",
                        f.return_type,
                        params.join(", ")
                    ));
                }
                Item::Function(f) => out.push(format!(
                    "{} {}({}) {}",
                    f.return_type,
                    rename_identifiers(&f.name, &renames),
                    rename_identifiers(&f.params, &renames),
                    rename_identifiers(&f.body, &renames)
                )),
            }
        }
        out.join("\n")
    }
}

enum RawItem<'a> {
    Directive(&'a str),
    Statement(&'a str),
    Function { header: &'a str, body: &'a str },
}

fn strip_comments(source: &str) -> String {
    let source = source.replace("\r\n", "\n");
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            for c in chars.by_ref() {
                if c == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = '\0';
            for c in chars.by_ref() {
                if c == '\n' {
                    out.push('\n');
                }
                if prev == '*' && c == '/' {
                    break;
                }
                prev = c;
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

fn split_items(source: &str) -> Result<Vec<RawItem<'_>>, SignatureError> {
    let bytes = source.as_bytes();
    let mut items = Vec::new();
    let mut i = 0;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        if bytes[i] == b'#' {
            let end = source[i..].find('\n').map_or(bytes.len(), |n| i + n);
            items.push(RawItem::Directive(source[i..end].trim_end()));
            i = end;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i] != b';' && bytes[i] != b'{' {
            if bytes[i] == b'}' {
                return Err(SignatureError::UnbalancedBraces);
            }
            i += 1;
        }
        if i >= bytes.len() {
            return Err(SignatureError::UnterminatedStatement(
                source[start..].trim().to_string(),
            ));
        }
        if bytes[i] == b';' {
            items.push(RawItem::Statement(source[start..=i].trim()));
            i += 1;
            continue;
        }

        let header = source[start..i].trim();
        let close = matching_brace(bytes, i).ok_or(SignatureError::UnbalancedBraces)?;
        if header.contains('(') {
            items.push(RawItem::Function {
                header,
                body: &source[i..=close],
            });
            i = close + 1;
        } else {
            // struct / interface block: runs to the `;` after its body
            let end = source[close..]
                .find(';')
                .map(|n| close + n)
                .ok_or(SignatureError::UnbalancedBraces)?;
            items.push(RawItem::Statement(source[start..=end].trim()));
            i = end + 1;
        }
    }

    Ok(items)
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn first_token(text: &str) -> Option<&str> {
    text.split(|c: char| c.is_whitespace() || c == ';').find(|t| !t.is_empty())
}

fn is_precision(token: &str) -> bool {
    matches!(token, "lowp" | "mediump" | "highp")
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_type(s: &str) -> Result<GlslType, SignatureError> {
    GlslType::parse(s).ok_or_else(|| SignatureError::UnknownType(s.to_string()))
}

fn parse_uniform(statement: &str) -> Result<Uniform, SignatureError> {
    let malformed = || SignatureError::MalformedUniform(statement.to_string());
    let decl = statement.trim_end_matches(';').trim();
    let rest = decl.strip_prefix("uniform").ok_or_else(malformed)?;

    let (lhs, value) = match rest.split_once('=') {
        Some((lhs, value)) => (lhs, Some(value.trim().to_string())),
        None => (rest, None),
    };
    if value.as_deref() == Some("") {
        return Err(malformed());
    }

    let tokens: Vec<&str> = lhs.split_whitespace().filter(|t| !is_precision(t)).collect();
    let [ty, name] = tokens.as_slice() else {
        return Err(malformed());
    };
    if !is_ident(name) {
        return Err(malformed());
    }

    Ok(Uniform {
        name: name.to_string(),
        ty: parse_type(ty)?,
        value,
    })
}

fn parse_function(header: &str, body: &str) -> Result<Function, SignatureError> {
    let malformed = || SignatureError::MalformedParameter(header.to_string());
    let open = header.find('(').ok_or_else(malformed)?;
    let close = header.rfind(')').filter(|&c| c > open).ok_or_else(malformed)?;

    let mut head: Vec<&str> = header[..open].split_whitespace().collect();
    let name = head.pop().filter(|n| is_ident(n)).ok_or_else(malformed)?;
    if head.is_empty() {
        return Err(malformed());
    }

    Ok(Function {
        return_type: head.join(" "),
        name: name.to_string(),
        params: header[open + 1..close].trim().to_string(),
        body: body.to_string(),
    })
}

fn parse_parameters(params: &str) -> Result<Vec<Parameter>, SignatureError> {
    let params = params.trim();
    if params.is_empty() || params == "void" {
        return Ok(Vec::new());
    }

    params
        .split(',')
        .map(|raw| {
            let raw = raw.trim();
            let mut direction = Direction::In;
            let mut rest: Vec<&str> = Vec::new();
            for token in raw.split_whitespace() {
                match token {
                    "in" => direction = Direction::In,
                    "out" => direction = Direction::Out,
                    "const" => {}
                    t if is_precision(t) => {}
                    "inout" | "flat" | "smooth" | "noperspective" | "centroid" => {
                        return Err(SignatureError::UnsupportedQualifier {
                            parameter: raw.to_string(),
                            qualifier: token.to_string(),
                        });
                    }
                    t => rest.push(t),
                }
            }
            let [ty, name] = rest.as_slice() else {
                return Err(SignatureError::MalformedParameter(raw.to_string()));
            };
            if !is_ident(name) {
                return Err(SignatureError::MalformedParameter(raw.to_string()));
            }
            Ok(Parameter {
                name: name.to_string(),
                ty: parse_type(ty)?,
                direction,
            })
        })
        .collect()
}

/// Names introduced by a top-level declaration, for call-site prefixing.
fn global_names(statement: &str) -> Vec<String> {
    let decl = statement.trim_end_matches(';').trim();
    match first_token(decl) {
        Some("precision") => Vec::new(),
        Some("struct") => {
            let mut names: Vec<String> = decl
                .split(|c: char| c.is_whitespace() || c == '{')
                .filter(|t| !t.is_empty())
                .nth(1)
                .filter(|n| is_ident(n))
                .map(str::to_string)
                .into_iter()
                .collect();
            if let Some(close) = decl.rfind('}') {
                names.extend(declarator_names(&decl[close + 1..]));
            }
            names
        }
        _ => declarator_names(decl),
    }
}

/// `float a = 1.0, b[2]` -> `a`, `b`. The type only prefixes the first part.
fn declarator_names(decl: &str) -> Vec<String> {
    split_top_level(decl)
        .into_iter()
        .filter_map(|part| {
            let lhs = part.split('=').next()?.split('[').next()?;
            let name = lhs.split_whitespace().last()?;
            (is_ident(name) && GlslType::parse(name).is_none()).then(|| name.to_string())
        })
        .collect()
}

/// Split on commas outside any brackets.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Macro name of a `#define` line.
fn defined_macro(directive: &str) -> Option<String> {
    let rest = directive.strip_prefix('#')?.trim_start().strip_prefix("define")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    is_ident(&name).then_some(name)
}

fn rename_identifiers(text: &str, renames: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();
    let mut prev: Option<char> = None;

    while let Some((start, c)) = chars.next() {
        if c.is_ascii_alphabetic() || c == '_' || c.is_ascii_digit() {
            let mut end = start + c.len_utf8();
            while let Some(&(i, n)) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    end = i + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let word = &text[start..end];
            let member = prev == Some('.');
            match renames.get(word) {
                Some(new) if !c.is_ascii_digit() && !member => out.push_str(new),
                _ => out.push_str(word),
            }
            prev = word.chars().last();
        } else {
            out.push(c);
            prev = Some(c);
        }
    }
    out
}

/// Force a string into a valid GLSL identifier.
pub fn sanitize_ident(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

//! A small structured model of the configuration documents the harness
//! emits, plus a renderer that produces `terraform fmt`-style text.
//!
//! Only the subset the fixtures need is modelled: blocks with labels,
//! attributes holding literals, references, lists and maps.

use std::fmt::Write;

const INDENT: &str = "  ";

/// A dotted reference such as `azurerm_key_vault.test.id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal(pub Vec<String>);

impl Traversal {
    pub fn parse(s: &str) -> Self {
        Traversal(s.split('.').map(String::from).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl std::fmt::Display for Traversal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(i64),
    Bool(bool),
    Ref(Traversal),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
}

impl Expr {
    pub fn string(s: impl Into<String>) -> Self {
        Expr::Str(s.into())
    }

    pub fn number(n: i64) -> Self {
        Expr::Num(n)
    }

    pub fn reference(path: &str) -> Self {
        Expr::Ref(Traversal::parse(path))
    }

    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::List(items.into_iter().map(|s| Expr::Str(s.into())).collect())
    }

    pub fn string_map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Expr::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), Expr::Str(v.into())))
                .collect(),
        )
    }

    fn is_multiline(&self) -> bool {
        matches!(self, Expr::Map(entries) if !entries.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyItem {
    Attr(String, Expr),
    Block(Block),
    /// Blank line in the rendered output; no semantic meaning.
    Gap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// `resource`, `data`, or the name of a nested block (`acl`, `access_policy`).
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Vec<BodyItem>,
}

impl Block {
    pub fn new(kind: impl Into<String>, labels: &[&str]) -> Self {
        Self {
            kind: kind.into(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            body: Vec::new(),
        }
    }

    pub fn resource(resource_type: &str, name: &str) -> Self {
        Self::new("resource", &[resource_type, name])
    }

    pub fn data(data_type: &str, name: &str) -> Self {
        Self::new("data", &[data_type, name])
    }

    pub fn nested(kind: &str) -> Self {
        Self::new(kind, &[])
    }

    pub fn attr(mut self, key: &str, value: Expr) -> Self {
        self.body.push(BodyItem::Attr(key.to_string(), value));
        self
    }

    pub fn block(mut self, block: Block) -> Self {
        self.body.push(BodyItem::Block(block));
        self
    }

    pub fn gap(mut self) -> Self {
        self.body.push(BodyItem::Gap);
        self
    }

    /// `type.name` for `resource` blocks, `data.type.name` for data sources.
    pub fn address(&self) -> Option<String> {
        match (self.kind.as_str(), self.labels.as_slice()) {
            ("resource", [ty, name]) => Some(format!("{}.{}", ty, name)),
            ("data", [ty, name]) => Some(format!("data.{}.{}", ty, name)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Expr> {
        self.body.iter().find_map(|item| match item {
            BodyItem::Attr(k, v) if k == key => Some(v),
            _ => None,
        })
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.body.iter().filter_map(|item| match item {
            BodyItem::Attr(k, v) => Some((k.as_str(), v)),
            _ => None,
        })
    }

    pub fn blocks_named<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.body.iter().filter_map(move |item| match item {
            BodyItem::Block(b) if b.kind == kind => Some(b),
            _ => None,
        })
    }
}

/// A whole configuration document: an ordered list of top-level blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn extend(mut self, other: Document) -> Self {
        self.blocks.extend(other.blocks);
        self
    }

    pub fn resources(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == "resource")
    }

    pub fn find(&self, address: &str) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| b.address().as_deref() == Some(address))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            render_block(block, 0, &mut out);
        }
        out
    }
}

// ── Rendering ────────────────────────────────────────────────────────────────

fn render_block(block: &Block, indent: usize, out: &mut String) {
    let pad = INDENT.repeat(indent);
    out.push_str(&pad);
    out.push_str(&block.kind);
    for label in &block.labels {
        out.push(' ');
        out.push_str(&quote(label));
    }
    out.push_str(" {\n");
    render_body(&block.body, indent + 1, out);
    out.push_str(&pad);
    out.push_str("}\n");
}

/// Consecutive single-line attributes are aligned on `=`. Blocks and
/// multi-line attributes stand alone, separated by a blank line.
fn render_body(body: &[BodyItem], indent: usize, out: &mut String) {
    let pad = INDENT.repeat(indent);
    let mut started = false;
    let mut separate = false;
    let mut i = 0;

    while i < body.len() {
        match &body[i] {
            BodyItem::Gap => {
                separate = started;
                i += 1;
            }
            BodyItem::Attr(_, expr) if !expr.is_multiline() => {
                let start = i;
                while i < body.len()
                    && matches!(&body[i], BodyItem::Attr(_, e) if !e.is_multiline())
                {
                    i += 1;
                }
                let run = &body[start..i];
                let width = run
                    .iter()
                    .map(|item| match item {
                        BodyItem::Attr(k, _) => k.len(),
                        _ => 0,
                    })
                    .max()
                    .unwrap_or(0);

                if separate {
                    out.push('\n');
                }
                for item in run {
                    if let BodyItem::Attr(k, v) = item {
                        let _ = writeln!(out, "{}{:<width$} = {}", pad, k, render_inline(v), width = width);
                    }
                }
                started = true;
                separate = false;
            }
            BodyItem::Attr(key, expr) => {
                if started {
                    out.push('\n');
                }
                let _ = write!(out, "{}{} = ", pad, key);
                render_multiline(expr, indent, out);
                out.push('\n');
                started = true;
                separate = true;
                i += 1;
            }
            BodyItem::Block(block) => {
                if started {
                    out.push('\n');
                }
                render_block(block, indent, out);
                started = true;
                separate = true;
                i += 1;
            }
        }
    }
}

fn render_multiline(expr: &Expr, indent: usize, out: &mut String) {
    match expr {
        Expr::Map(entries) => {
            let pad = INDENT.repeat(indent + 1);
            let keys: Vec<String> = entries.iter().map(|(k, _)| map_key(k)).collect();
            let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);
            out.push_str("{\n");
            for (key, (_, value)) in keys.iter().zip(entries) {
                let _ = writeln!(out, "{}{:<width$} = {}", pad, key, render_inline(value), width = width);
            }
            out.push_str(&INDENT.repeat(indent));
            out.push('}');
        }
        other => out.push_str(&render_inline(other)),
    }
}

fn render_inline(expr: &Expr) -> String {
    match expr {
        Expr::Str(s) => quote(s),
        Expr::Num(n) => n.to_string(),
        Expr::Bool(b) => b.to_string(),
        Expr::Ref(t) => t.to_string(),
        Expr::List(items) => {
            let parts: Vec<String> = items.iter().map(render_inline).collect();
            format!("[{}]", parts.join(", "))
        }
        Expr::Map(entries) if entries.is_empty() => "{}".to_string(),
        Expr::Map(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{} = {}", map_key(k), render_inline(v)))
                .collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

fn map_key(key: &str) -> String {
    let mut chars = key.chars();
    let is_ident = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if is_ident {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Quote a string literal, escaping template sequences so values are taken verbatim.
fn quote(s: &str) -> String {
    let escaped = s
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace("${", "$${")
        .replace("%{", "%%{");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn aligns_consecutive_attributes() {
        let doc = Document::new().push(
            Block::resource("azurerm_resource_group", "test")
                .attr("name", Expr::string("acctestRG-1"))
                .attr("location", Expr::string("westeurope")),
        );
        assert_eq!(
            doc.render(),
            "resource \"azurerm_resource_group\" \"test\" {\n  name     = \"acctestRG-1\"\n  location = \"westeurope\"\n}\n"
        );
    }

    #[test]
    fn nested_blocks_and_maps_are_separated() {
        let doc = Document::new().push(
            Block::resource("azurerm_storage_share", "test")
                .attr("name", Expr::string("share"))
                .attr("metadata", Expr::string_map([("hello", "world")]))
                .block(Block::nested("acl").attr("id", Expr::string("abc"))),
        );
        let expected = "\
resource \"azurerm_storage_share\" \"test\" {
  name = \"share\"

  metadata = {
    hello = \"world\"
  }

  acl {
    id = \"abc\"
  }
}
";
        assert_eq!(doc.render(), expected);
    }

    #[test]
    fn references_and_lists_render_inline() {
        let block = Block::resource("x", "y")
            .attr("key_vault_id", Expr::reference("azurerm_key_vault.test.id"))
            .attr("secret_permissions", Expr::strings(["get", "delete"]));
        let text = Document::new().push(block).render();
        assert!(text.contains("key_vault_id       = azurerm_key_vault.test.id\n"), "{}", text);
        assert!(text.contains("[\"get\", \"delete\"]"), "{}", text);
    }

    #[test]
    fn quoting_escapes_template_sequences() {
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote("${x}"), "\"$${x}\"");
        assert_eq!(map_key("hello"), "hello");
        assert_eq!(map_key("my key"), "\"my key\"");
    }

    #[test]
    fn gap_inserts_blank_line_between_runs() {
        let block = Block::resource("x", "y")
            .attr("a", Expr::string("1"))
            .gap()
            .attr("bbb", Expr::string("2"));
        let text = Document::new().push(block).render();
        assert!(text.contains("  a = \"1\"\n\n  bbb = \"2\"\n"), "{}", text);
    }

    #[test]
    fn addresses_for_resources_and_data_sources() {
        assert_eq!(Block::resource("a", "b").address().as_deref(), Some("a.b"));
        assert_eq!(Block::data("c", "d").address().as_deref(), Some("data.c.d"));
        assert_eq!(Block::nested("acl").address(), None);
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use encoding_rs::Encoding;
use regex::{Regex, RegexBuilder};

/// Unmatched placeholders are stripped from the rendered output.
static STRIP_PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<#.+?#>").expect("Failed to compile placeholder strip regex"));

/// The six HTML fragments the output file is assembled from.
#[derive(Debug, Clone)]
pub struct Templates {
    pub header: String,
    pub folder_start: String,
    pub file: String,
    pub cover: String,
    pub folder_end: String,
    pub footer: String,
}

impl Templates {
    /// Load all template fragments from a directory, decoded with the
    /// configured encoding. Loaded once before emission begins.
    pub fn load(directory: &Path, encoding: &'static Encoding) -> Result<Self> {
        Ok(Self {
            header: read_template(directory, "header", encoding)?,
            folder_start: read_template(directory, "folder-start", encoding)?,
            file: read_template(directory, "file", encoding)?,
            cover: read_template(directory, "cover", encoding)?,
            folder_end: read_template(directory, "folder-end", encoding)?,
            footer: read_template(directory, "footer", encoding)?,
        })
    }
}

fn read_template(directory: &Path, name: &str, encoding: &'static Encoding) -> Result<String> {
    let path = directory.join(format!("{name}.tpl.html"));
    let bytes =
        std::fs::read(&path).with_context(|| format!("Failed to read template: {}", path.display()))?;
    let (text, _, _) = encoding.decode(&bytes);
    Ok(text.into_owned())
}

/// A flat mapping of placeholder names to values for template substitution.
///
/// Per-entity values are inserted first; environment values are merged after
/// and win on key collision, so file tags can never shadow global settings.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

impl RenderContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Merge pairs in order; later pairs override earlier values.
    pub fn merge(&mut self, pairs: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in pairs {
            self.values.insert(key, value);
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Substitute `<#name#>` placeholders with context values, then strip any
/// placeholders that had no value.
#[must_use]
pub fn render(template: &str, context: &RenderContext) -> String {
    let mut rendered = template.to_string();
    for (key, value) in &context.values {
        let placeholder = RegexBuilder::new(&format!(r"<#\s*{}\s*#>", regex::escape(key)))
            .case_insensitive(true)
            .build()
            .expect("Failed to compile placeholder regex");
        rendered = placeholder.replace_all(&rendered, regex::NoExpand(value.as_str())).into_owned();
    }
    STRIP_PLACEHOLDER_RE.replace_all(&rendered, "").into_owned()
}

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Capability interface onto the templating collaborator: render a template
/// file against a flat key/value context.
pub trait TemplateEngine {
    fn render(&self, template_path: &Path, context: &BTreeMap<String, String>) -> Result<String>;
}

/// Minimal `{{key}}` substitution renderer, matching the mustache-style
/// placeholders used by the shipped init-file templates. Unknown keys render
/// empty; everything else passes through untouched.
pub struct CurlyRenderer;

impl TemplateEngine for CurlyRenderer {
    fn render(&self, template_path: &Path, context: &BTreeMap<String, String>) -> Result<String> {
        let text = fs::read_to_string(template_path).map_err(|e| Error::TemplateRender {
            template: template_path.to_path_buf(),
            reason: format!("read template: {e}"),
        })?;
        Ok(render_str(&text, context))
    }
}

pub fn render_str(text: &str, context: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = context.get(key) {
                    out.push_str(value);
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder: emit literally.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

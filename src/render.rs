//! # 页面渲染
//!
//! handler 只依赖 [`PageRenderer`]: 给定视图名和数据, 返回 HTML。
//! 内置的 [`TemplateRenderer`] 支持 `{{ key }}` 占位符, 插入的值会做 HTML 转义。

use std::collections::HashMap;

use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("view `{0}` not found")]
    UnknownView(String),
    #[error("view `{view}` references missing value `{key}`")]
    MissingValue { view: String, key: String },
    #[error("view `{0}` has an unterminated placeholder")]
    Unterminated(String),
}

pub trait PageRenderer: Send + Sync {
    fn render(&self, view: &str, data: &Map<String, Value>) -> Result<String, RenderError>;
}

pub struct TemplateRenderer {
    views: HashMap<String, String>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::empty().with_view("index", include_str!("../views/index.html"))
    }
}

impl TemplateRenderer {
    pub fn empty() -> Self {
        Self { views: HashMap::new() }
    }

    pub fn with_view(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.views.insert(name.into(), template.into());
        self
    }
}

impl PageRenderer for TemplateRenderer {
    fn render(&self, view: &str, data: &Map<String, Value>) -> Result<String, RenderError> {
        let template = self.views.get(view).ok_or_else(|| RenderError::UnknownView(view.to_owned()))?;
        let mut out = String::with_capacity(template.len());
        let mut rest = template.as_str();
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| RenderError::Unterminated(view.to_owned()))?;
            let key = after[..end].trim();
            match data.get(key) {
                Some(Value::String(s)) => escape_html(&mut out, s),
                Some(other) => escape_html(&mut out, &other.to_string()),
                None => {
                    return Err(RenderError::MissingValue {
                        view: view.to_owned(),
                        key: key.to_owned(),
                    })
                }
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn escape_html(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

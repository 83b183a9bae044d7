use crate::cache::ResourceCache;
use crate::catalog::err::CatalogErr;
use crate::catalog::{Catalog, Structure, StructureId};
use handlebars::Handlebars;
use regex::{Captures, Regex};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;

static LINK_ATTRIBUTES: &str = r#"(?i)\b(href|src|action)(\s*=\s*)(["'])(/[^"']*)"#;

pub type RendererCache = ResourceCache<StructureId, Arc<TenantRenderer>>;

#[derive(Error, Debug, Clone)]
pub enum RenderErr {
    #[error("template '{0}' not found")]
    NotFound(String),
    #[error("template '{name}': {message}")]
    Template { name: String, message: String },
    #[error("template data is not serializable: {0}")]
    Data(String),
    #[error(transparent)]
    Catalog(#[from] CatalogErr),
    #[error("{0}")]
    Msg(String),
}

/// What a structure wraps around every html document it renders: its head markup and its
/// route prefix.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Chrome {
    pub prefix: Option<String>,
    pub head: Option<String>,
}

impl From<&Structure> for Chrome {
    fn from(structure: &Structure) -> Self {
        Self {
            prefix: structure.route_prefix.clone(),
            head: structure.head.clone(),
        }
    }
}

/// A template renderer bound to one structure.  Template bodies are looked up by name in the
/// catalog on every render so edits are visible immediately.
///
/// [`TenantRenderer::render`] blocks on the catalog and must be called from a blocking thread,
/// never from an async worker.
pub struct TenantRenderer {
    structure_id: StructureId,
    catalog: Catalog,
    handlebars: Handlebars<'static>,
    runtime: Handle,
    links: Regex,
}

impl TenantRenderer {
    pub fn new(
        structure_id: StructureId,
        catalog: Catalog,
        runtime: Handle,
    ) -> Result<Self, RenderErr> {
        let links = Regex::new(LINK_ATTRIBUTES).map_err(|e| RenderErr::Msg(e.to_string()))?;
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        Ok(Self {
            structure_id,
            catalog,
            handlebars,
            runtime,
            links,
        })
    }

    pub fn structure_id(&self) -> StructureId {
        self.structure_id
    }

    pub fn render(&self, name: &str, data: &serde_json::Value) -> Result<String, RenderErr> {
        let content = self
            .runtime
            .block_on(self.catalog.template_content(self.structure_id, name))?
            .ok_or_else(|| RenderErr::NotFound(name.to_string()))?;
        self.render_source(name, content.as_str(), data)
    }

    /// renders template text that has not necessarily been saved yet
    pub fn render_source(
        &self,
        name: &str,
        content: &str,
        data: &serde_json::Value,
    ) -> Result<String, RenderErr> {
        self.handlebars
            .render_template(content, data)
            .map_err(|e| RenderErr::Template {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    pub fn decorate(&self, html: &str, chrome: &Chrome) -> String {
        let html = inject_head(html, chrome.head.as_deref());
        let prefix = match chrome.prefix.as_deref().map(|p| p.trim().trim_end_matches('/')) {
            Some(prefix) if !prefix.is_empty() => {
                if prefix.starts_with('/') {
                    prefix.to_string()
                } else {
                    format!("/{}", prefix)
                }
            }
            _ => return html,
        };

        self.links
            .replace_all(html.as_str(), |caps: &Captures| {
                let link = &caps[4];
                if link.starts_with("//")
                    || link == prefix
                    || link.starts_with(format!("{}/", prefix).as_str())
                {
                    caps[0].to_string()
                } else {
                    format!("{}{}{}{}{}", &caps[1], &caps[2], &caps[3], prefix, link)
                }
            })
            .to_string()
    }
}

fn inject_head(html: &str, head: Option<&str>) -> String {
    let head = match head {
        Some(head) if !head.trim().is_empty() => head,
        _ => return html.to_string(),
    };

    // ascii lowercasing keeps byte offsets intact
    let lower = html.to_ascii_lowercase();
    if let Some(index) = lower.find("</head>") {
        return format!("{}{}{}", &html[..index], head, &html[index..]);
    }

    let mut from = 0;
    while let Some(found) = lower[from..].find("<html") {
        let start = from + found;
        let after = lower[start + 5..].chars().next();
        if matches!(after, Some(c) if c == '>' || c.is_ascii_whitespace()) {
            if let Some(close) = lower[start..].find('>') {
                let index = start + close + 1;
                return format!("{}<head>{}</head>{}", &html[..index], head, &html[index..]);
            }
        }
        from = start + 5;
    }

    html.to_string()
}

use crate::route::err::RouteErr;
use percent_encoding::percent_decode_str;
use regex::Regex;
use std::collections::HashMap;

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// joins a structure's route prefix onto a route path.  A missing, empty or `/` prefix leaves
/// the path alone.
pub fn join_prefix(prefix: Option<&str>, path: &str) -> String {
    let prefix = prefix.map(|p| p.trim().trim_end_matches('/')).unwrap_or("");
    let path = path.trim();
    let prefix = if prefix.is_empty() || prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{}", prefix)
    };

    if path.is_empty() || path == "/" {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix
        }
    } else if path.starts_with('/') {
        format!("{}{}", prefix, path)
    } else {
        format!("{}/{}", prefix, path)
    }
}

/// A compiled path matcher.  Segments are either literal text, a named parameter `:name`
/// capturing one segment, or a trailing `*` capturing the remainder of the path under the
/// parameter name `*`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    params: Vec<String>,
}

impl PathPattern {
    pub fn compile(source: &str) -> Result<Self, RouteErr> {
        if !source.starts_with('/') {
            return Err(RouteErr::pattern(source, "path must begin with '/'"));
        }

        let trimmed = source.trim_end_matches('/');
        if trimmed.is_empty() {
            let regex = Regex::new("^/$").map_err(|e| RouteErr::pattern(source, e))?;
            return Ok(Self {
                source: source.to_string(),
                regex,
                params: vec![],
            });
        }

        let segments: Vec<&str> = trimmed[1..].split('/').collect();
        let mut params: Vec<String> = vec![];
        let mut expr = String::from("^");

        for (index, segment) in segments.iter().enumerate() {
            let last = index == segments.len() - 1;
            if segment.is_empty() {
                return Err(RouteErr::pattern(source, "empty path segment"));
            }
            if *segment == "*" {
                if !last {
                    return Err(RouteErr::pattern(
                        source,
                        "wildcard '*' may only be the final segment",
                    ));
                }
                expr.push_str("(?:/(.*))?");
                params.push("*".to_string());
            } else if let Some(name) = segment.strip_prefix(':') {
                if !is_param_name(name) {
                    return Err(RouteErr::pattern(
                        source,
                        format!("invalid parameter name ':{}'", name),
                    ));
                }
                if params.iter().any(|p| p == name) {
                    return Err(RouteErr::pattern(
                        source,
                        format!("duplicate parameter ':{}'", name),
                    ));
                }
                expr.push_str("/([^/]+)");
                params.push(name.to_string());
            } else {
                expr.push('/');
                expr.push_str(regex::escape(segment).as_str());
            }
        }

        expr.push_str("/?$");
        let regex = Regex::new(expr.as_str()).map_err(|e| RouteErr::pattern(source, e))?;

        Ok(Self {
            source: source.to_string(),
            regex,
            params,
        })
    }

    pub fn source(&self) -> &str {
        self.source.as_str()
    }

    pub fn params(&self) -> &Vec<String> {
        &self.params
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// returns the extracted parameters when `path` matches
    pub fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        let captures = self.regex.captures(path)?;
        let mut params = HashMap::new();
        for (index, name) in self.params.iter().enumerate() {
            let value = captures
                .get(index + 1)
                .map(|m| decode(m.as_str()))
                .unwrap_or_default();
            params.insert(name.clone(), value);
        }
        Some(params)
    }
}

/// percent-decodes one captured segment; text that does not decode to utf-8 is kept as sent
fn decode(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

use crate::catalog::{Structure, StructureId};
use crate::route::pattern::join_prefix;
use parking_lot::Mutex;
use rhai::{Dynamic, Engine, Map, INT};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub static TEXT_HTML: &str = "text/html; charset=utf-8";
pub static TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub static APPLICATION_JSON: &str = "application/json";
pub static FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// the parts of an inbound request a handler may see
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    pub method: String,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestParts {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// the `req` object handed to scripts
    pub fn to_map(&self) -> Map {
        let mut req = Map::new();
        req.insert("method".into(), Dynamic::from(self.method.clone()));
        req.insert("path".into(), Dynamic::from(self.path.clone()));
        req.insert("params".into(), Dynamic::from_map(to_map(self.params.clone())));
        req.insert("query".into(), Dynamic::from_map(parse_pairs(self.query.as_str())));

        let mut headers = Map::new();
        for (name, value) in &self.headers {
            headers.insert(name.to_lowercase().into(), Dynamic::from(value.clone()));
        }
        req.insert("headers".into(), Dynamic::from_map(headers));
        req.insert("body".into(), Dynamic::from(self.body.clone()));

        let form = match self.header("content-type") {
            Some(content_type) if content_type.starts_with(FORM_URLENCODED) => {
                parse_pairs(self.body.as_str())
            }
            _ => Map::new(),
        };
        req.insert("form".into(), Dynamic::from_map(form));
        req
    }
}

fn to_map(pairs: HashMap<String, String>) -> Map {
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), Dynamic::from(v)))
        .collect()
}

/// urlencoded pairs; repeated keys keep the last value
fn parse_pairs(encoded: &str) -> Map {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(encoded) {
        Ok(pairs) => pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Dynamic::from(v)))
            .collect(),
        Err(_) => Map::new(),
    }
}

/// converts a script value into body text, serializing maps and arrays as json
pub fn body_text(value: &Dynamic) -> (String, &'static str) {
    if value.is_unit() {
        (String::new(), TEXT_HTML)
    } else if value.is_string() {
        (value.to_string(), TEXT_HTML)
    } else if value.is_map() || value.is_array() {
        match serde_json::to_string(value) {
            Ok(json) => (json, APPLICATION_JSON),
            Err(_) => (value.to_string(), TEXT_PLAIN),
        }
    } else {
        (value.to_string(), TEXT_PLAIN)
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HttpReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, content_type: &str, body: String) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
struct ResponseState {
    status: u16,
    headers: Vec<(String, String)>,
    content_type: Option<String>,
    body: Option<String>,
}

/// the `res` object handed to handlers
#[derive(Debug, Clone)]
pub struct ResponseProxy {
    state: Arc<Mutex<ResponseState>>,
}

impl Default for ResponseProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseProxy {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ResponseState {
                status: 200,
                headers: vec![],
                content_type: None,
                body: None,
            })),
        }
    }

    pub fn written(&self) -> bool {
        self.state.lock().body.is_some()
    }

    pub fn set_status(&self, status: u16) {
        self.state.lock().status = status;
    }

    pub fn set_header(&self, name: &str, value: &str) {
        let mut state = self.state.lock();
        if name.eq_ignore_ascii_case("content-type") {
            state.content_type = Some(value.to_string());
        } else {
            state.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn send(&self, value: &Dynamic) {
        let (body, content_type) = body_text(value);
        self.write(body, content_type);
    }

    pub fn json(&self, value: &Dynamic) {
        let body = serde_json::to_string(value).unwrap_or_else(|_| value.to_string());
        let mut state = self.state.lock();
        state.content_type = Some(APPLICATION_JSON.to_string());
        state.body = Some(body);
    }

    pub fn redirect(&self, location: &str) {
        let mut state = self.state.lock();
        state.status = 302;
        state.headers.push(("location".to_string(), location.to_string()));
        state.body = Some(String::new());
    }

    fn write(&self, body: String, default_content_type: &str) {
        let mut state = self.state.lock();
        if state.content_type.is_none() {
            state.content_type = Some(default_content_type.to_string());
        }
        state.body = Some(body);
    }

    /// the final reply.  `fallback` (the handler's return value) is used when nothing was
    /// written to the proxy.
    pub fn into_reply(self, fallback: &Dynamic) -> HttpReply {
        if !self.written() {
            self.send(fallback);
        }
        let state = self.state.lock().clone();
        let mut headers = vec![(
            "content-type".to_string(),
            state.content_type.unwrap_or_else(|| TEXT_HTML.to_string()),
        )];
        headers.extend(state.headers);
        HttpReply {
            status: state.status,
            headers,
            body: state.body.unwrap_or_default(),
        }
    }
}

/// the `app` object: the host as seen by one structure
#[derive(Debug, Clone)]
pub struct AppHandle {
    pub structure_id: StructureId,
    pub name: String,
    pub route_prefix: Option<String>,
}

impl From<&Structure> for AppHandle {
    fn from(structure: &Structure) -> Self {
        Self {
            structure_id: structure.id,
            name: structure.name.clone(),
            route_prefix: structure.route_prefix.clone(),
        }
    }
}

impl AppHandle {
    pub fn path(&self, path: &str) -> String {
        join_prefix(self.route_prefix.as_deref(), path)
    }
}

/// the `socket` object handed to stream handlers.  Messages sent are buffered and delivered
/// once the handler returns.
#[derive(Debug, Clone)]
pub struct SocketProxy {
    pub id: String,
    outbox: Arc<Mutex<Vec<String>>>,
}

impl SocketProxy {
    pub fn new<I>(id: I) -> Self
    where
        I: ToString,
    {
        Self {
            id: id.to_string(),
            outbox: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn send(&self, value: &Dynamic) {
        self.outbox.lock().push(body_text(value).0);
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.outbox.lock())
    }
}

pub fn register(engine: &mut Engine) {
    engine.register_type_with_name::<ResponseProxy>("Response");
    engine.register_fn("send", |res: &mut ResponseProxy, body: Dynamic| {
        res.send(&body);
        res.clone()
    });
    engine.register_fn("json", |res: &mut ResponseProxy, body: Dynamic| {
        res.json(&body);
        res.clone()
    });
    engine.register_fn("status", |res: &mut ResponseProxy, status: INT| {
        res.set_status(status.clamp(100, 999) as u16);
        res.clone()
    });
    engine.register_fn(
        "header",
        |res: &mut ResponseProxy, name: &str, value: &str| {
            res.set_header(name, value);
            res.clone()
        },
    );
    engine.register_fn("redirect", |res: &mut ResponseProxy, location: &str| {
        res.redirect(location);
        res.clone()
    });

    engine.register_type_with_name::<AppHandle>("App");
    engine.register_get("id", |app: &mut AppHandle| app.structure_id as INT);
    engine.register_get("name", |app: &mut AppHandle| app.name.clone());
    engine.register_fn("path", |app: &mut AppHandle, path: &str| app.path(path));
    engine.register_fn("log", |app: &mut AppHandle, message: &str| {
        info!(structure = app.structure_id, "{}", message);
    });

    engine.register_type_with_name::<SocketProxy>("Socket");
    engine.register_get("id", |socket: &mut SocketProxy| socket.id.clone());
    engine.register_fn("send", |socket: &mut SocketProxy, message: Dynamic| {
        socket.send(&message);
    });
}

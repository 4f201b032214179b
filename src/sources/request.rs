//! HTTP-style request source
//!
//! Binding names:
//! - `header:'X-Name'` -> first value, case-insensitive; empty counts as missing
//! - `cookie:'session'` -> from `Cookie` headers
//! - `query:'page'` -> form-urlencoded query string, first value
//! - `json:'user.id'` -> path into the JSON body; an empty body is `{}`
//!
//! `Authorization: Bearer <token>` yields just the token. Each part of
//! the request is parsed at most once per cache entry.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::trace;

use crate::binding::Binding;
use crate::cache::CacheEntry;
use crate::compiler::CompileOptions;
use crate::extract::Lookup;
use crate::jsonpath;
use crate::parser::{BindingManager, MultiBindingParser, ParserOptions};

pub const HEADER_BINDING: &str = "header";
pub const COOKIE_BINDING: &str = "cookie";
pub const QUERY_BINDING: &str = "query";
pub const JSON_BINDING: &str = "json";

const AUTHORIZATION: &str = "authorization";
const BEARER_PREFIX: &str = "Bearer ";

/// Minimal request: method, target and raw parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: String,
    /// Header lines in arrival order
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Build from a method and a request target such as `/users?id=7`
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            method: method.into(),
            path: path.to_string(),
            query: query.to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// All values of header `name`, case-insensitive
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Lazily parsed parts of one request
#[derive(Debug, Default)]
pub struct RequestCache {
    headers: OnceCell<FxHashMap<String, String>>,
    cookies: OnceCell<FxHashMap<String, String>>,
    query: OnceCell<FxHashMap<String, String>>,
    body: OnceCell<Result<Value, String>>,
}

impl RequestCache {
    /// First value per header, keyed by lowercase name
    pub fn headers(&self, request: &Request) -> &FxHashMap<String, String> {
        self.headers.get_or_init(|| {
            trace!(count = request.headers.len(), "indexing request headers");
            let mut headers = FxHashMap::default();
            for (name, value) in &request.headers {
                headers
                    .entry(name.to_ascii_lowercase())
                    .or_insert_with(|| value.clone());
            }
            headers
        })
    }

    pub fn cookies(&self, request: &Request) -> &FxHashMap<String, String> {
        self.cookies.get_or_init(|| {
            trace!("parsing request cookies");
            let mut cookies = FxHashMap::default();
            let pairs = request
                .header_values("cookie")
                .flat_map(|line| line.split(';'))
                .filter_map(|pair| pair.split_once('='));
            for (name, value) in pairs {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                cookies
                    .entry(name.to_string())
                    .or_insert_with(|| value.to_string());
            }
            cookies
        })
    }

    pub fn query(&self, request: &Request) -> &FxHashMap<String, String> {
        self.query.get_or_init(|| {
            trace!("parsing query string");
            let mut query = FxHashMap::default();
            for (name, value) in url::form_urlencoded::parse(request.query.as_bytes()) {
                query
                    .entry(name.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
            query
        })
    }

    /// Parsed JSON body; the parse error is kept and reported on every access
    pub fn body(&self, request: &Request) -> anyhow::Result<&Value> {
        let parsed = self.body.get_or_init(|| {
            trace!(bytes = request.body.len(), "parsing request body");
            if request.body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Object(serde_json::Map::new()));
            }
            serde_json::from_slice(&request.body).map_err(|e| e.to_string())
        });
        parsed
            .as_ref()
            .map_err(|reason| anyhow::anyhow!("invalid JSON body: {reason}"))
    }

    /// Read one binding from `request`
    pub fn lookup(&self, request: &Request, binding: &Binding) -> anyhow::Result<Lookup> {
        let id = binding.identifier.as_str();
        match binding.name.as_str() {
            HEADER_BINDING => {
                let value = match self.headers(request).get(&id.to_ascii_lowercase()) {
                    Some(value) if !value.is_empty() => value.as_str(),
                    _ => return Ok(Lookup::Missing),
                };
                let value = if id.eq_ignore_ascii_case(AUTHORIZATION) {
                    value.strip_prefix(BEARER_PREFIX).unwrap_or(value)
                } else {
                    value
                };
                Ok(Lookup::text(value))
            }
            COOKIE_BINDING => Ok(text_or_missing(self.cookies(request).get(id))),
            QUERY_BINDING => Ok(text_or_missing(self.query(request).get(id))),
            JSON_BINDING => {
                let body = self.body(request)?;
                Ok(Lookup::from_option(jsonpath::resolve(body, id)?))
            }
            other => anyhow::bail!("unsupported binding '{other}' for requests"),
        }
    }
}

fn text_or_missing(value: Option<&String>) -> Lookup {
    value
        .map(|v| Lookup::text(v.as_str()))
        .unwrap_or(Lookup::Missing)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestManager;

impl BindingManager<Request> for RequestManager {
    type Cached = RequestCache;

    fn new_cached(&self) -> RequestCache {
        RequestCache::default()
    }

    fn extract(&self, source: &Request, binding: &Binding) -> anyhow::Result<Lookup> {
        RequestCache::default().lookup(source, binding)
    }

    fn extract_cached(
        &self,
        source: &Request,
        entry: &CacheEntry<RequestCache>,
        binding: &Binding,
    ) -> anyhow::Result<Lookup> {
        entry.read_locked(|cache| cache.lookup(source, binding))
    }
}

pub fn options() -> CompileOptions {
    CompileOptions::new([HEADER_BINDING, COOKIE_BINDING, QUERY_BINDING, JSON_BINDING])
}

/// Cached request parser, evicting each request's entry after parsing
pub fn parser() -> MultiBindingParser<Request, RequestManager> {
    MultiBindingParser::new(RequestManager, options(), ParserOptions::default())
}

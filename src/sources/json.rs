//! JSON document source (`json:'path.to.value'`)

use serde_json::Value;

use crate::binding::Binding;
use crate::compiler::CompileOptions;
use crate::extract::Lookup;
use crate::jsonpath;
use crate::parser::{BindingManager, MultiBindingParser, ParserOptions};

pub const JSON_BINDING: &str = "json";

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonManager;

impl BindingManager<Value> for JsonManager {
    type Cached = ();

    fn new_cached(&self) {}

    fn extract(&self, source: &Value, binding: &Binding) -> anyhow::Result<Lookup> {
        if binding.name != JSON_BINDING {
            anyhow::bail!("unsupported binding '{}' for JSON documents", binding.name);
        }
        Ok(Lookup::from_option(jsonpath::resolve(source, &binding.identifier)?))
    }
}

pub fn options() -> CompileOptions {
    CompileOptions::new([JSON_BINDING])
}

/// Parser over parsed JSON documents
pub fn parser() -> MultiBindingParser<Value, JsonManager> {
    MultiBindingParser::new(JsonManager, options(), ParserOptions::uncached())
}

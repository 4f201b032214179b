//! Flat string map source (`mapvalue:'key'`)

use rustc_hash::FxHashMap;

use crate::binding::Binding;
use crate::compiler::CompileOptions;
use crate::extract::Lookup;
use crate::parser::{BindingManager, MultiBindingParser, ParserOptions};

pub const MAP_BINDING: &str = "mapvalue";

pub type StringMap = FxHashMap<String, String>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MapManager;

impl BindingManager<StringMap> for MapManager {
    type Cached = ();

    fn new_cached(&self) {}

    fn extract(&self, source: &StringMap, binding: &Binding) -> anyhow::Result<Lookup> {
        if binding.name != MAP_BINDING {
            anyhow::bail!("unsupported binding '{}' for string maps", binding.name);
        }
        Ok(source
            .get(&binding.identifier)
            .map(|value| Lookup::text(value.as_str()))
            .unwrap_or(Lookup::Missing))
    }
}

pub fn options() -> CompileOptions {
    CompileOptions::new([MAP_BINDING])
}

/// Parser over string maps; lookups are cheap so nothing is cached
pub fn parser() -> MultiBindingParser<StringMap, MapManager> {
    MultiBindingParser::new(MapManager, options(), ParserOptions::uncached())
}

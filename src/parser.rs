//! Multi-binding parser - compiler, source cache and extraction adapter in one
//!
//! A [`BindingManager`] knows how to read each of its binding names from
//! a source type. [`MultiBindingParser`] compiles chains against it,
//! optionally memoizes per-source derived data while a parse runs, and
//! evicts that data afterwards.

use std::any::type_name;
use std::sync::Arc;

use tracing::{instrument, trace};

use crate::binding::Binding;
use crate::cache::{CacheEntry, SourceCache};
use crate::compiler::{ChainCompiler, CompileOptions};
use crate::error::Result;
use crate::extract::{Extractor, Lookup};
use crate::schema::Record;

/// Source-specific extraction with optional per-source memoization
pub trait BindingManager<S: ?Sized>: Send + Sync + 'static {
    /// Derived data kept per source while cached parsing is enabled
    type Cached: Send + Sync + 'static;

    /// Fresh cache payload for a source seen for the first time
    fn new_cached(&self) -> Self::Cached;

    /// Read `binding` from `source` without a cache
    fn extract(&self, source: &S, binding: &Binding) -> anyhow::Result<Lookup>;

    /// Read `binding` from `source` using its cache entry
    fn extract_cached(
        &self,
        source: &S,
        _entry: &CacheEntry<Self::Cached>,
        binding: &Binding,
    ) -> anyhow::Result<Lookup> {
        self.extract(source, binding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Route extraction through the per-source cache
    pub use_cache: bool,
    /// Drop the source's cache entry when a parse finishes
    pub evict_after_parse: bool,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            evict_after_parse: true,
        }
    }
}

impl ParserOptions {
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            evict_after_parse: false,
        }
    }
}

/// Adapter from a [`BindingManager`] to the [`Extractor`] a chain calls
struct ManagedExtractor<S: ?Sized, M: BindingManager<S>> {
    manager: Arc<M>,
    cache: Option<Arc<SourceCache<S, M::Cached>>>,
}

impl<S: ?Sized, M: BindingManager<S>> Extractor<S> for ManagedExtractor<S, M> {
    fn extract(&self, source: &S, binding: &Binding) -> anyhow::Result<Lookup> {
        match &self.cache {
            Some(cache) => {
                let entry = cache.get_or_create(source, || self.manager.new_cached());
                self.manager.extract_cached(source, &entry, binding)
            }
            None => self.manager.extract(source, binding),
        }
    }
}

/// Parser combining chain compilation with a [`BindingManager`]
pub struct MultiBindingParser<S: ?Sized + 'static, M: BindingManager<S>> {
    compiler: ChainCompiler<S>,
    manager: Arc<M>,
    cache: Option<Arc<SourceCache<S, M::Cached>>>,
    options: ParserOptions,
}

impl<S: ?Sized + 'static, M: BindingManager<S>> MultiBindingParser<S, M> {
    pub fn new(manager: M, compile: CompileOptions, options: ParserOptions) -> Self {
        let manager = Arc::new(manager);
        let cache = options.use_cache.then(|| Arc::new(SourceCache::new()));
        let extractor = ManagedExtractor {
            manager: Arc::clone(&manager),
            cache: cache.clone(),
        };

        Self {
            compiler: ChainCompiler::new(extractor, compile),
            manager,
            cache,
            options,
        }
    }

    /// Populate `dest` from `source`
    ///
    /// With eviction enabled the source's cache entry is dropped whether
    /// or not the parse succeeded.
    #[instrument(level = "debug", skip_all, fields(record = type_name::<T>()))]
    pub fn parse<T: Record>(&self, source: &S, dest: &mut T) -> Result<()> {
        let chain = self.compiler.get_or_compile::<T>()?;
        let result = chain.execute(source, dest);

        if self.options.evict_after_parse {
            if let Some(cache) = &self.cache {
                if cache.delete(source) {
                    trace!("evicted source cache entry");
                }
            }
        }
        result
    }

    /// Parse into a fresh `T::default()`
    pub fn parse_new<T: Record + Default>(&self, source: &S) -> Result<T> {
        let mut dest = T::default();
        self.parse(source, &mut dest)?;
        Ok(dest)
    }

    /// Drop the cache entry of `source`, for callers that disabled eviction
    pub fn evict(&self, source: &S) -> bool {
        self.cache.as_ref().is_some_and(|cache| cache.delete(source))
    }

    pub fn compiler(&self) -> &ChainCompiler<S> {
        &self.compiler
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    pub fn cache(&self) -> Option<&SourceCache<S, M::Cached>> {
        self.cache.as_deref()
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }
}

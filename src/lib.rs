//! Pave - populate typed records from several sources through field annotations

pub mod annotation;
pub mod binding;
pub mod cache;
pub mod chain;
pub mod coerce;
pub mod compiler;
pub mod config;
pub mod error;
pub mod extract;
pub mod jsonpath;
pub mod parser;
pub mod schema;
pub mod sources;
pub mod tag;

pub use annotation::FieldAnnotation;
pub use binding::{Binding, Modifiers};
pub use cache::{CacheEntry, SourceCache};
pub use chain::{Chain, ChainSummary, Step, StepSummary};
pub use coerce::FieldTarget;
pub use compiler::{compile, compile_schema, ChainCompiler, CompileOptions};
pub use config::PaveConfig;
pub use error::{ErrorKind, FixSuggestion, PaveError, Result};
pub use extract::{Extractor, Lookup};
pub use parser::{BindingManager, MultiBindingParser, ParserOptions};
pub use schema::{FieldShape, FieldSpec, Record, RecordSchema, SchemaBuilder};

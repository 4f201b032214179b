//! Chain compilation and the per-type chain cache
//!
//! Compilation walks a record schema in declaration order and turns each
//! visible field into a [`Step`]:
//! - scalar fields with at least one binding -> binding step
//! - record fields -> sub-chain, unless `recursive:false` or the type is atomic
//! - non-recursed record fields need a text decoder
//! - fields with nothing to do (no bindings, empty sub-chain) -> no step
//!
//! [`ChainCompiler`] memoizes chains per destination type. Concurrent
//! first requests may each compile, but only one result is published and
//! every caller gets that one.

use std::any::{type_name, Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use rustc_hash::FxHashSet;
use tracing::{debug, instrument, trace};

use crate::annotation::FieldAnnotation;
use crate::chain::{Chain, Step, StepKind};
use crate::coerce::default_atomic_types;
use crate::error::{PaveError, Result};
use crate::extract::Extractor;
use crate::schema::{FieldShape, FieldSpec, NestedAccess, Record, RecordSchema};
use crate::tag::DEFAULT_DELIMITER;

/// Maximum record nesting depth before compilation fails
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Parser-level compile configuration
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Annotation keys treated as bindings
    pub binding_names: Vec<String>,
    /// Extra modifiers accepted on bindings
    pub custom_modifiers: Vec<String>,
    /// Extra annotation keys stored on steps
    pub custom_tags: Vec<String>,
    /// Record types treated as leaves
    pub atomic_types: FxHashSet<TypeId>,
    pub max_depth: usize,
    /// Scope delimiter of the annotation grammar
    pub delimiter: char,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            binding_names: Vec::new(),
            custom_modifiers: Vec::new(),
            custom_tags: Vec::new(),
            atomic_types: default_atomic_types().into_iter().collect(),
            max_depth: DEFAULT_MAX_DEPTH,
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl CompileOptions {
    pub fn new<I, N>(binding_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self {
            binding_names: binding_names.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_custom_modifiers<I, N>(mut self, modifiers: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.custom_modifiers.extend(modifiers.into_iter().map(Into::into));
        self
    }

    pub fn with_custom_tags<I, N>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.custom_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Treat `T` as a leaf even if it is a registered record
    pub fn atomic<T: Any>(mut self) -> Self {
        self.atomic_types.insert(TypeId::of::<T>());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn is_binding_name(&self, key: &str) -> bool {
        self.binding_names.iter().any(|n| n == key)
    }

    pub fn is_atomic(&self, type_id: TypeId) -> bool {
        self.atomic_types.contains(&type_id)
    }
}

/// Compile a chain for `T` without caching
pub fn compile<T: Record, S: ?Sized>(
    options: &CompileOptions,
    extractor: Arc<dyn Extractor<S>>,
) -> Result<Chain<S>> {
    compile_schema(&T::schema(), options, extractor)
}

/// Compile a chain from an explicit schema without caching
pub fn compile_schema<S: ?Sized>(
    schema: &RecordSchema,
    options: &CompileOptions,
    extractor: Arc<dyn Extractor<S>>,
) -> Result<Chain<S>> {
    ChainBuilder::new(options, &extractor, None).build(schema)
}

/// Recursive chain construction with a cycle guard
struct ChainBuilder<'a, S: ?Sized> {
    options: &'a CompileOptions,
    extractor: &'a Arc<dyn Extractor<S>>,
    /// Chains published so far, reused and extended for nested types
    published: Option<&'a DashMap<TypeId, Arc<Chain<S>>>>,
    /// Record types currently being compiled, outermost first
    path: Vec<(TypeId, &'static str)>,
}

impl<'a, S: ?Sized> ChainBuilder<'a, S> {
    fn new(
        options: &'a CompileOptions,
        extractor: &'a Arc<dyn Extractor<S>>,
        published: Option<&'a DashMap<TypeId, Arc<Chain<S>>>>,
    ) -> Self {
        Self {
            options,
            extractor,
            published,
            path: Vec::new(),
        }
    }

    fn describe_path(&self, next: &'static str) -> String {
        self.path
            .iter()
            .map(|(_, name)| *name)
            .chain(std::iter::once(next))
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    fn build(&mut self, schema: &RecordSchema) -> Result<Chain<S>> {
        if self.path.iter().any(|(id, _)| *id == schema.type_id) {
            return Err(PaveError::RecursiveType {
                path: self.describe_path(schema.type_name),
            });
        }
        if self.path.len() >= self.options.max_depth {
            return Err(PaveError::DepthExceeded {
                max_depth: self.options.max_depth,
                path: self.describe_path(schema.type_name),
            });
        }

        self.path.push((schema.type_id, schema.type_name));
        let built = self.build_steps(schema);
        self.path.pop();
        let (steps, nested_depth) = built?;

        Ok(Chain {
            type_id: schema.type_id,
            type_name: schema.type_name,
            steps,
            depth: nested_depth + 1,
            extractor: Arc::clone(self.extractor),
        })
    }

    /// Steps of `schema` and the height of its deepest nested record
    fn build_steps(&mut self, schema: &RecordSchema) -> Result<(Vec<Step<S>>, usize)> {
        let mut steps = Vec::with_capacity(schema.fields.len());
        let mut nested_depth = 0;
        for field in &schema.fields {
            if let Some(step) = self.build_step(field, &mut nested_depth)? {
                steps.push(step);
            }
        }
        Ok((steps, nested_depth))
    }

    fn build_step(&mut self, field: &FieldSpec, nested_depth: &mut usize) -> Result<Option<Step<S>>> {
        if !field.is_visible() {
            trace!(field = field.name, "private field, skipped");
            return Ok(None);
        }

        let annotation = FieldAnnotation::decode(field.annotation, self.options)
            .map_err(|err| err.in_annotation(field.name))?;

        let kind = match &field.shape {
            FieldShape::Private => return Ok(None),
            FieldShape::Leaf(leaf) => {
                if annotation.bindings.is_empty() {
                    return Ok(None);
                }
                StepKind::Bindings {
                    bindings: annotation.bindings,
                    target: leaf.clone(),
                }
            }
            FieldShape::Record(access) => {
                let recurse =
                    !self.options.is_atomic(access.type_id) && annotation.recursive.unwrap_or(true);

                if recurse {
                    if !annotation.bindings.is_empty() {
                        trace!(field = field.name, "bindings on a recursed record are ignored");
                    }
                    let chain = self.nested_chain(access)?;
                    *nested_depth = (*nested_depth).max(chain.depth);
                    if chain.is_empty() {
                        return Ok(None);
                    }
                    StepKind::Nested {
                        chain,
                        access: access.clone(),
                    }
                } else {
                    if annotation.bindings.is_empty() {
                        return Ok(None);
                    }
                    let leaf = access.text.clone().ok_or_else(|| PaveError::NotTextDecodable {
                        field: field.name.to_string(),
                        type_name: access.type_name,
                    })?;
                    StepKind::Bindings {
                        bindings: annotation.bindings,
                        target: leaf,
                    }
                }
            }
        };

        if let (Some(default), StepKind::Bindings { target, .. }) = (annotation.default.as_deref(), &kind) {
            if default.trim().is_empty() && !target.accepts_empty {
                return Err(PaveError::EmptyDefault {
                    field: field.name.to_string(),
                    type_name: target.type_name,
                });
            }
        }

        Ok(Some(Step {
            field: field.name,
            kind,
            default: annotation.default,
            tags: annotation.tags,
            writable: field.writable,
        }))
    }

    fn nested_chain(&mut self, access: &NestedAccess) -> Result<Arc<Chain<S>>> {
        if let Some(published) = self.published {
            if let Some(chain) = published.get(&access.type_id) {
                // A reused chain must still fit below the current path
                if self.path.len() + chain.depth > self.options.max_depth {
                    return Err(PaveError::DepthExceeded {
                        max_depth: self.options.max_depth,
                        path: self.describe_path(access.type_name),
                    });
                }
                return Ok(Arc::clone(&chain));
            }
        }

        let chain = Arc::new(self.build(&(access.schema)())?);

        Ok(match self.published {
            Some(published) => Arc::clone(&*published.entry(access.type_id).or_insert(chain)),
            None => chain,
        })
    }
}

/// Memoizing compiler bound to one extractor and option set
pub struct ChainCompiler<S: ?Sized> {
    options: CompileOptions,
    extractor: Arc<dyn Extractor<S>>,
    chains: DashMap<TypeId, Arc<Chain<S>>>,
}

impl<S: ?Sized> ChainCompiler<S> {
    pub fn new<E: Extractor<S> + 'static>(extractor: E, options: CompileOptions) -> Self {
        Self::with_extractor(Arc::new(extractor), options)
    }

    pub fn with_extractor(extractor: Arc<dyn Extractor<S>>, options: CompileOptions) -> Self {
        Self {
            options,
            extractor,
            chains: DashMap::new(),
        }
    }

    /// Cached chain for `T`, compiling and publishing it on first use
    ///
    /// Failed compilations are not cached.
    #[instrument(level = "debug", skip_all, fields(record = type_name::<T>()))]
    pub fn get_or_compile<T: Record>(&self) -> Result<Arc<Chain<S>>> {
        let id = TypeId::of::<T>();
        if let Some(chain) = self.chains.get(&id) {
            trace!("chain cache hit");
            return Ok(Arc::clone(&chain));
        }

        // Compile outside any shard lock; the first insert wins
        let chain = Arc::new(
            ChainBuilder::new(&self.options, &self.extractor, Some(&self.chains)).build(&T::schema())?,
        );
        let published = Arc::clone(&*self.chains.entry(id).or_insert(chain));

        debug!(steps = published.len(), "chain compiled");
        Ok(published)
    }

    /// Fresh, uncached chain for `T`
    pub fn compile<T: Record>(&self) -> Result<Chain<S>> {
        compile::<T, S>(&self.options, Arc::clone(&self.extractor))
    }

    /// Cached chain for `T`, if one was published
    pub fn cached<T: Record>(&self) -> Option<Arc<Chain<S>>> {
        self.chains.get(&TypeId::of::<T>()).map(|c| Arc::clone(&c))
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Number of cached chains, nested types included
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn clear(&self) {
        self.chains.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Binding;
    use crate::coerce::FieldTarget;
    use crate::error::ErrorKind;
    use crate::extract::Lookup;
    use pretty_assertions::assert_eq;

    type Source = ();

    fn no_op() -> Arc<dyn Extractor<Source>> {
        Arc::new(|_: &Source, _: &Binding| -> anyhow::Result<Lookup> { Ok(Lookup::Missing) })
    }

    fn options() -> CompileOptions {
        CompileOptions::new(["query", "header"])
    }

    #[derive(Debug, Default)]
    struct Address {
        street: String,
        city: String,
    }

    impl Record for Address {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("street", "header:X-Street", |a| &mut a.street)
                .field("city", "query:'city,omitempty' default:Paris", |a| &mut a.city)
                .build()
        }
    }

    #[derive(Debug, Default)]
    struct Unbound {
        note: String,
    }

    impl Record for Unbound {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("note", "form:note", |u| &mut u.note)
                .build()
        }
    }

    #[derive(Debug, Default)]
    struct User {
        name: String,
        address: Address,
        unbound: Unbound,
        hidden: u8,
        plain: u32,
    }

    impl Record for User {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("name", "query:name header:'X-Name,omitempty'", |u| &mut u.name)
                .record("address", "", |u| &mut u.address)
                .record("unbound", "", |u| &mut u.unbound)
                .private("hidden")
                .field("plain", "", |u| &mut u.plain)
                .build()
        }
    }

    #[test]
    fn steps_follow_declaration_order_and_skip_empty_fields() {
        let chain = compile::<User, Source>(&options(), no_op()).unwrap();
        let fields: Vec<_> = chain.steps().iter().map(|s| s.field()).collect();
        assert_eq!(fields, vec!["name", "address"]);

        let name = chain.step("name").unwrap();
        let bindings: Vec<_> = name.bindings().iter().map(|b| b.name.as_str()).collect();
        assert_eq!(bindings, vec!["query", "header"]);

        let address = chain.step("address").unwrap().sub_chain().unwrap();
        assert_eq!(address.len(), 2);
        assert_eq!(address.step("city").unwrap().default_value(), Some("Paris"));
    }

    #[test]
    fn compilation_is_deterministic() {
        let first = compile::<User, Source>(&options(), no_op()).unwrap();
        let second = compile::<User, Source>(&options(), no_op()).unwrap();
        assert_eq!(first.summary(), second.summary());
    }

    #[test]
    fn invalid_annotation_names_the_field() {
        #[derive(Default)]
        struct Broken {
            id: u32,
        }
        impl Record for Broken {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .field("id", "query:'id,lowercase'", |b| &mut b.id)
                    .build()
            }
        }

        let err = compile::<Broken, Source>(&options(), no_op()).unwrap_err();
        assert!(matches!(err, PaveError::InvalidAnnotation { ref field, .. } if field == "id"));
        assert_eq!(err.kind(), ErrorKind::Grammar);

        let lenient = options().with_custom_modifiers(["lowercase"]);
        assert!(compile::<Broken, Source>(&lenient, no_op()).is_ok());
    }

    #[test]
    fn empty_default_requires_type_accepting_empty() {
        #[derive(Default)]
        struct Defaults {
            count: u32,
            label: String,
        }
        impl Record for Defaults {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .field("label", "query:'label,omitempty' default:''", |d| &mut d.label)
                    .field("count", "query:'count,omitempty' default:''", |d| &mut d.count)
                    .build()
            }
        }

        let err = compile::<Defaults, Source>(&options(), no_op()).unwrap_err();
        assert!(matches!(
            err,
            PaveError::EmptyDefault { ref field, type_name: "u32" } if field == "count"
        ));
    }

    #[test]
    fn blank_default_counts_as_empty() {
        #[derive(Default)]
        struct Blank {
            count: u32,
            label: String,
        }
        impl Record for Blank {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .field("label", "query:'label,omitempty' default:'  '", |b| &mut b.label)
                    .field("count", "query:'count,omitempty' default:' '", |b| &mut b.count)
                    .build()
            }
        }

        let err = compile::<Blank, Source>(&options(), no_op()).unwrap_err();
        assert!(matches!(err, PaveError::EmptyDefault { ref field, .. } if field == "count"));
    }

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl Record for Point {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("x", "query:x", |p| &mut p.x)
                .field("y", "query:y", |p| &mut p.y)
                .build()
        }
    }

    impl FieldTarget for Point {
        fn coerce_text(&mut self, text: &str) -> Result<()> {
            let (x, y) = text.split_once(',').ok_or_else(|| PaveError::Coercion {
                target: "Point",
                value: text.to_string(),
                reason: "expected x,y".into(),
            })?;
            self.x.coerce_text(x)?;
            self.y.coerce_text(y)
        }
    }

    #[test]
    fn non_recursive_record_needs_text_decoder() {
        #[derive(Default)]
        struct Shape {
            origin: Point,
        }
        impl Record for Shape {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .record("origin", "query:origin recursive:false", |s| &mut s.origin)
                    .build()
            }
        }

        let err = compile::<Shape, Source>(&options(), no_op()).unwrap_err();
        assert!(matches!(err, PaveError::NotTextDecodable { ref field, .. } if field == "origin"));
    }

    #[test]
    fn text_record_becomes_leaf_when_not_recursed() {
        #[derive(Default)]
        struct Shape {
            origin: Point,
            center: Point,
        }
        impl Record for Shape {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .text_record("origin", "query:origin recursive:false", |s| &mut s.origin)
                    .text_record("center", "", |s| &mut s.center)
                    .build()
            }
        }

        let chain = compile::<Shape, Source>(&options(), no_op()).unwrap();
        let origin = chain.step("origin").unwrap();
        assert!(origin.sub_chain().is_none());
        assert_eq!(origin.bindings().len(), 1);
        assert!(chain.step("center").unwrap().sub_chain().is_some());

        // Atomic types are leaves without any annotation
        let atomic = options().atomic::<Point>();
        let chain = compile::<Shape, Source>(&atomic, no_op()).unwrap();
        assert!(chain.step("origin").unwrap().sub_chain().is_none());
        assert!(chain.step("center").is_none());
    }

    #[test]
    fn non_recursed_text_record_is_written_through_its_decoder() {
        #[derive(Default)]
        struct Segment {
            start: Point,
            end: Point,
        }
        impl Record for Segment {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .text_record("start", "query:start recursive:false", |s| &mut s.start)
                    .text_record(
                        "end",
                        "query:'end,omitempty' default:'7,8' recursive:false",
                        |s| &mut s.end,
                    )
                    .build()
            }
        }

        let extractor: Arc<dyn Extractor<Source>> =
            Arc::new(|_: &Source, binding: &Binding| -> anyhow::Result<Lookup> {
                Ok(match binding.identifier.as_str() {
                    "start" => Lookup::text("3,4"),
                    _ => Lookup::Missing,
                })
            });
        let chain = compile::<Segment, Source>(&options(), extractor).unwrap();
        let mut segment = Segment::default();
        chain.execute(&(), &mut segment).unwrap();

        assert_eq!(segment.start, Point { x: 3, y: 4 });
        assert_eq!(segment.end, Point { x: 7, y: 8 });
    }

    #[derive(Debug, Default)]
    struct Node {
        label: String,
        next: Option<Box<Node>>,
    }

    impl Record for Node {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("label", "query:label", |n| &mut n.label)
                .boxed_record("next", "", |n| &mut n.next)
                .build()
        }
    }

    #[test]
    fn self_referential_record_is_rejected() {
        let err = compile::<Node, Source>(&options(), no_op()).unwrap_err();
        match err {
            PaveError::RecursiveType { path } => assert!(path.contains("Node -> ")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nesting_depth_is_capped() {
        let shallow = options().with_max_depth(1);
        let err = compile::<User, Source>(&shallow, no_op()).unwrap_err();
        assert!(matches!(err, PaveError::DepthExceeded { max_depth: 1, .. }));
        assert!(compile::<User, Source>(&options().with_max_depth(2), no_op()).is_ok());
    }

    #[derive(Default)]
    struct Leaf {
        value: u8,
    }

    impl Record for Leaf {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("value", "query:value", |l| &mut l.value)
                .build()
        }
    }

    #[derive(Default)]
    struct Low {
        leaf: Leaf,
    }

    impl Record for Low {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .record("leaf", "", |l| &mut l.leaf)
                .build()
        }
    }

    #[derive(Default)]
    struct Mid {
        low: Low,
    }

    impl Record for Mid {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .record("low", "", |m| &mut m.low)
                .build()
        }
    }

    #[derive(Default)]
    struct Top {
        mid: Mid,
    }

    impl Record for Top {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .record("mid", "", |t| &mut t.mid)
                .build()
        }
    }

    #[test]
    fn cached_nested_chain_still_counts_toward_depth() {
        let cold = ChainCompiler::with_extractor(no_op(), options().with_max_depth(2));
        let err = cold.get_or_compile::<Top>().unwrap_err();
        assert!(matches!(err, PaveError::DepthExceeded { max_depth: 2, .. }));

        // Low fits on its own, but must not let Top slip past the cap
        let warm = ChainCompiler::with_extractor(no_op(), options().with_max_depth(2));
        assert_eq!(warm.get_or_compile::<Low>().unwrap().depth(), 2);
        let err = warm.get_or_compile::<Top>().unwrap_err();
        assert!(matches!(err, PaveError::DepthExceeded { max_depth: 2, .. }));
        assert!(warm.cached::<Top>().is_none());

        let roomy = ChainCompiler::with_extractor(no_op(), options().with_max_depth(4));
        roomy.get_or_compile::<Low>().unwrap();
        assert_eq!(roomy.get_or_compile::<Top>().unwrap().depth(), 4);
        assert!(compile::<Top, Source>(&options().with_max_depth(3), no_op()).is_err());
    }

    #[test]
    fn chain_depth_reports_nesting_height() {
        let chain = compile::<User, Source>(&options(), no_op()).unwrap();
        assert_eq!(chain.depth(), 2);
        assert_eq!(chain.step("address").unwrap().sub_chain().unwrap().depth(), 1);
    }

    #[test]
    fn custom_tags_are_stored_on_steps() {
        let opts = options().with_custom_tags(["doc"]);
        let chain = compile::<Address, Source>(&opts, no_op()).unwrap();
        assert_eq!(chain.step("street").unwrap().tag("doc"), None);

        #[derive(Default)]
        struct Documented {
            id: u64,
        }
        impl Record for Documented {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>()
                    .field("id", "query:id doc:'Primary key'", |d| &mut d.id)
                    .build()
            }
        }
        let chain = compile::<Documented, Source>(&opts, no_op()).unwrap();
        assert_eq!(chain.step("id").unwrap().tag("doc"), Some("Primary key"));
    }

    #[test]
    fn compiler_caches_top_level_and_nested_chains() {
        let compiler = ChainCompiler::with_extractor(no_op(), options());
        assert!(compiler.is_empty());

        let first = compiler.get_or_compile::<User>().unwrap();
        let second = compiler.get_or_compile::<User>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Address was published while compiling User and is shared
        let address = compiler.cached::<Address>().unwrap();
        let nested = first.step("address").unwrap().sub_chain().unwrap();
        assert!(Arc::ptr_eq(&address, nested));
        assert_eq!(compiler.len(), 3);

        compiler.clear();
        assert!(compiler.cached::<User>().is_none());
    }

    #[test]
    fn failed_compilation_is_not_cached() {
        let compiler = ChainCompiler::with_extractor(no_op(), options());
        assert!(compiler.get_or_compile::<Node>().is_err());
        assert!(compiler.cached::<Node>().is_none());
    }
}

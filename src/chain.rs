//! Compiled binding chains and their execution
//!
//! A [`Chain`] is the immutable, per-type plan produced by the compiler:
//! one [`Step`] per bindable field, in declaration order. Executing it
//! walks the steps, tries each field's bindings by priority and writes
//! the first usable value into the destination.
//!
//! Per binding:
//! - extraction error -> skipped with `omiterror`, otherwise recorded;
//!   a required binding aborts the field with what was recorded so far
//! - found value -> coerced into the field, the field is done
//! - null -> skipped with `omitnil`, otherwise a miss
//! - missing -> a miss; a required binding aborts the field as unsatisfied
//!
//! When no binding matched and every binding was omittable, the field
//! gets its `default` (if any) or keeps its zero value. Otherwise the
//! recorded failures are returned. Execution stops at the first failing
//! field; fields written before it keep their values.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, trace};

use crate::binding::Binding;
use crate::coerce::FieldTarget;
use crate::error::{PaveError, Result};
use crate::extract::{Extractor, Lookup};
use crate::schema::{LeafAccess, NestedAccess, Record};

/// What a step does with its field
pub(crate) enum StepKind<S: ?Sized> {
    /// Try bindings in order, write the first match
    Bindings {
        bindings: Vec<Binding>,
        target: LeafAccess,
    },
    /// Populate a nested record with its own chain
    Nested {
        chain: Arc<Chain<S>>,
        access: NestedAccess,
    },
}

/// Compiled plan for one field
pub struct Step<S: ?Sized> {
    pub(crate) field: &'static str,
    pub(crate) kind: StepKind<S>,
    pub(crate) default: Option<String>,
    pub(crate) tags: Vec<(String, String)>,
    pub(crate) writable: bool,
}

impl<S: ?Sized> Step<S> {
    pub fn field(&self) -> &'static str {
        self.field
    }

    /// Candidate bindings in priority order (empty for nested steps)
    pub fn bindings(&self) -> &[Binding] {
        match &self.kind {
            StepKind::Bindings { bindings, .. } => bindings,
            StepKind::Nested { .. } => &[],
        }
    }

    pub fn default_value(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Sub-chain for a record-typed field
    pub fn sub_chain(&self) -> Option<&Arc<Chain<S>>> {
        match &self.kind {
            StepKind::Nested { chain, .. } => Some(chain),
            StepKind::Bindings { .. } => None,
        }
    }

    /// Value of an allowed custom tag on this field
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn summary(&self) -> StepSummary {
        StepSummary {
            field: self.field.to_string(),
            bindings: self.bindings().to_vec(),
            default: self.default.clone(),
            tags: self.tags.clone(),
            writable: self.writable,
            nested: self.sub_chain().map(|chain| Box::new(chain.summary())),
        }
    }

    fn execute(&self, extractor: &dyn Extractor<S>, source: &S, dest: &mut dyn Any) -> Result<()> {
        match &self.kind {
            StepKind::Bindings { bindings, target } => {
                self.execute_bindings(bindings, target, extractor, source, dest)
            }
            StepKind::Nested { chain, access } => {
                let nested = access.resolve(dest).ok_or_else(|| PaveError::NotAddressable {
                    field: self.field.to_string(),
                })?;
                chain.run(extractor, source, nested)
            }
        }
    }

    fn execute_bindings(
        &self,
        bindings: &[Binding],
        target: &LeafAccess,
        extractor: &dyn Extractor<S>,
        source: &S,
        dest: &mut dyn Any,
    ) -> Result<()> {
        let mut failures = Vec::new();

        for binding in bindings {
            let modifiers = &binding.modifiers;

            match extractor.extract(source, binding) {
                Err(err) => {
                    if modifiers.omit_error {
                        trace!(%binding, error = %err, "extraction failed, omitted");
                        continue;
                    }
                    failures.push(PaveError::Extraction {
                        binding: binding.name.clone(),
                        identifier: binding.identifier.clone(),
                        source: err.into(),
                    });
                    if modifiers.required {
                        return Err(collect_failures(failures));
                    }
                }
                Ok(Lookup::Found(value)) => {
                    trace!(%binding, "binding matched");
                    return self.write(target, dest, |field| field.coerce(&value));
                }
                Ok(Lookup::Null) if modifiers.omit_nil => {
                    trace!(%binding, "null value, omitted");
                }
                Ok(Lookup::Null) | Ok(Lookup::Missing) => {
                    if modifiers.required {
                        failures.push(PaveError::BindingUnsatisfied {
                            binding: binding.name.clone(),
                            identifier: binding.identifier.clone(),
                        });
                        return Err(collect_failures(failures));
                    }
                }
            }
        }

        if bindings.iter().all(|b| b.modifiers.is_omittable()) {
            if !failures.is_empty() {
                debug!(
                    field = self.field,
                    swallowed = failures.len(),
                    "all bindings omittable, falling back"
                );
            }
            return match &self.default {
                Some(default) => self.write(target, dest, |field| field.coerce_text(default)),
                None => Ok(()),
            };
        }

        if failures.is_empty() {
            // Only reachable when every non-omittable binding was a plain miss
            if let Some(last) = bindings.last() {
                failures.push(PaveError::BindingUnsatisfied {
                    binding: last.name.clone(),
                    identifier: last.identifier.clone(),
                });
            }
        }
        Err(collect_failures(failures))
    }

    fn write(
        &self,
        target: &LeafAccess,
        dest: &mut dyn Any,
        apply: impl FnOnce(&mut dyn FieldTarget) -> Result<()>,
    ) -> Result<()> {
        let field = target.resolve(dest).ok_or_else(|| PaveError::NotAddressable {
            field: self.field.to_string(),
        })?;
        apply(field)
    }
}

fn collect_failures(mut failures: Vec<PaveError>) -> PaveError {
    if failures.len() == 1 {
        if let Some(only) = failures.pop() {
            return only;
        }
    }
    PaveError::AllBindingsFailed {
        count: failures.len(),
        errors: failures,
    }
}

/// Immutable binding plan for one record type
pub struct Chain<S: ?Sized> {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) steps: Vec<Step<S>>,
    /// Record levels visited when compiling, this one included
    pub(crate) depth: usize,
    pub(crate) extractor: Arc<dyn Extractor<S>>,
}

impl<S: ?Sized> Chain<S> {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn steps(&self) -> &[Step<S>] {
        &self.steps
    }

    pub fn step(&self, field: &str) -> Option<&Step<S>> {
        self.steps.iter().find(|s| s.field == field)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Nesting height: 1 for a record without nested records
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Structural description, comparable across compilations
    pub fn summary(&self) -> ChainSummary {
        ChainSummary {
            type_name: self.type_name.to_string(),
            steps: self.steps.iter().map(Step::summary).collect(),
        }
    }

    /// Populate `dest` from `source`
    ///
    /// Fails with a structural error when the chain was compiled for a
    /// different type. Stops at the first failing field.
    #[instrument(level = "debug", skip_all, fields(record = self.type_name))]
    pub fn execute<T: Record>(&self, source: &S, dest: &mut T) -> Result<()> {
        if TypeId::of::<T>() != self.type_id {
            return Err(PaveError::TypeMismatch {
                expected: self.type_name,
                actual: type_name::<T>(),
            });
        }
        self.run(self.extractor.as_ref(), source, dest)
    }

    /// [`Chain::execute`] for a type-erased destination
    pub fn execute_dyn(&self, source: &S, dest: &mut dyn Any) -> Result<()> {
        if (*dest).type_id() != self.type_id {
            return Err(PaveError::TypeMismatch {
                expected: self.type_name,
                actual: "a different record type",
            });
        }
        self.run(self.extractor.as_ref(), source, dest)
    }

    fn run(&self, extractor: &dyn Extractor<S>, source: &S, dest: &mut dyn Any) -> Result<()> {
        for step in &self.steps {
            if !step.writable {
                trace!(field = step.field, "field is read-only, skipped");
                continue;
            }
            if let Err(err) = step.execute(extractor, source, dest) {
                debug!(field = step.field, error = %err, "field binding failed");
                return Err(err.in_field(step.field));
            }
        }
        Ok(())
    }
}

impl<S: ?Sized> fmt::Debug for Chain<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("type_name", &self.type_name)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

/// Serializable description of a compiled chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainSummary {
    pub type_name: String,
    pub steps: Vec<StepSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepSummary {
    pub field: String,
    pub bindings: Vec<Binding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<(String, String)>,
    pub writable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<ChainSummary>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompileOptions};
    use crate::schema::RecordSchema;
    use rustc_hash::FxHashMap;
    use std::sync::Mutex;

    type Source = FxHashMap<&'static str, Lookup>;

    #[derive(Debug, Default)]
    struct Target {
        value: i64,
    }

    // Annotation is swapped per test through a thread-local
    thread_local! {
        static ANNOTATION: std::cell::Cell<&'static str> = const { std::cell::Cell::new("") };
    }

    impl Record for Target {
        fn schema() -> RecordSchema {
            RecordSchema::builder::<Self>()
                .field("value", ANNOTATION.with(|a| a.get()), |t| &mut t.value)
                .build()
        }
    }

    fn run(annotation: &'static str, source: Source) -> (Result<()>, Target, Vec<String>) {
        ANNOTATION.with(|a| a.set(annotation));
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let extractor = move |source: &Source, binding: &Binding| -> anyhow::Result<Lookup> {
            if let Ok(mut seen) = seen.lock() {
                seen.push(binding.name.clone());
            }
            match source.get(binding.name.as_str()) {
                Some(Lookup::Found(v)) if v == "boom" => anyhow::bail!("source exploded"),
                Some(lookup) => Ok(lookup.clone()),
                None => Ok(Lookup::Missing),
            }
        };
        let options = CompileOptions::new(["a", "b", "c"]);
        let chain = compile::<Target, Source>(&options, Arc::new(extractor)).unwrap();
        let mut target = Target::default();
        let result = chain.execute(&source, &mut target);
        let calls = calls.lock().map(|c| c.clone()).unwrap_or_default();
        (result, target, calls)
    }

    fn source(entries: &[(&'static str, Lookup)]) -> Source {
        entries.iter().cloned().collect()
    }

    #[test]
    fn first_match_wins_and_later_bindings_are_not_tried() {
        let (result, target, calls) = run(
            "a:'x,omitempty' b:'x,omitempty' c:x",
            source(&[("b", Lookup::text("2")), ("c", Lookup::text("3"))]),
        );
        result.unwrap();
        assert_eq!(target.value, 2);
        assert_eq!(calls, vec!["a", "b"]);
    }

    #[test]
    fn default_applies_when_all_bindings_omittable() {
        let (result, target, _) = run("a:'x,omitempty' b:'x,omitempty' default:42", source(&[]));
        result.unwrap();
        assert_eq!(target.value, 42);
    }

    #[test]
    fn zero_value_without_default() {
        let (result, target, _) = run("a:'x,omitempty'", source(&[]));
        result.unwrap();
        assert_eq!(target.value, 0);
    }

    #[test]
    fn required_miss_is_unsatisfied() {
        let (result, _, _) = run("a:x", source(&[]));
        let err = result.unwrap_err();
        assert_eq!(err.field_path().as_deref(), Some("value"));
        assert!(matches!(err.root_cause(), PaveError::BindingUnsatisfied { .. }));
    }

    #[test]
    fn required_binding_stops_before_later_bindings() {
        let (result, _, calls) = run("a:x b:'x,omitempty'", source(&[("b", Lookup::text("1"))]));
        assert!(result.is_err());
        assert_eq!(calls, vec!["a"]);
    }

    #[test]
    fn omit_error_falls_through() {
        let (result, target, _) = run(
            "a:'x,omiterror' b:x",
            source(&[("a", Lookup::text("boom")), ("b", Lookup::text("7"))]),
        );
        result.unwrap();
        assert_eq!(target.value, 7);
    }

    #[test]
    fn omit_nil_falls_through() {
        let (result, target, _) = run(
            "a:'x,omitnil' b:x",
            source(&[("a", Lookup::Null), ("b", Lookup::text("8"))]),
        );
        result.unwrap();
        assert_eq!(target.value, 8);
    }

    #[test]
    fn null_without_omit_nil_fails_a_required_binding() {
        let (result, _, _) = run("a:x", source(&[("a", Lookup::Null)]));
        assert!(matches!(
            result.unwrap_err().root_cause(),
            PaveError::BindingUnsatisfied { .. }
        ));
    }

    #[test]
    fn errors_accumulate_until_required_binding() {
        let (result, _, _) = run(
            "a:'x,omitempty' b:x",
            source(&[("a", Lookup::text("boom"))]),
        );
        match result.unwrap_err().root_cause() {
            PaveError::AllBindingsFailed { count, errors } => {
                assert_eq!(*count, 2);
                assert!(matches!(errors[0], PaveError::Extraction { .. }));
                assert!(matches!(errors[1], PaveError::BindingUnsatisfied { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn errors_are_swallowed_when_all_omittable() {
        let (result, target, _) = run(
            "a:'x,omitempty' default:5",
            source(&[("a", Lookup::text("boom"))]),
        );
        result.unwrap();
        assert_eq!(target.value, 5);
    }

    #[test]
    fn coercion_failure_fails_the_field() {
        let (result, _, _) = run("a:x", source(&[("a", Lookup::text("abc"))]));
        assert!(matches!(
            result.unwrap_err().root_cause(),
            PaveError::Coercion { .. }
        ));
    }

    #[test]
    fn execute_dyn_checks_the_erased_destination() {
        ANNOTATION.with(|a| a.set("a:x"));
        let extractor = |_: &Source, _: &Binding| -> anyhow::Result<Lookup> { Ok(Lookup::text("11")) };
        let options = CompileOptions::new(["a"]);
        let chain = compile::<Target, Source>(&options, Arc::new(extractor)).unwrap();

        let mut target = Target::default();
        let erased: &mut dyn Any = &mut target;
        chain.execute_dyn(&Source::default(), erased).unwrap();
        assert_eq!(target.value, 11);

        let mut wrong = String::new();
        let err = chain.execute_dyn(&Source::default(), &mut wrong).unwrap_err();
        assert!(matches!(err, PaveError::TypeMismatch { .. }));
        assert!(wrong.is_empty());
    }

    #[test]
    fn type_mismatch_is_structural() {
        ANNOTATION.with(|a| a.set("a:x"));
        let extractor = |_: &Source, _: &Binding| -> anyhow::Result<Lookup> { Ok(Lookup::Missing) };
        let options = CompileOptions::new(["a"]);
        let chain = compile::<Target, Source>(&options, Arc::new(extractor)).unwrap();

        #[derive(Default)]
        struct Other;
        impl Record for Other {
            fn schema() -> RecordSchema {
                RecordSchema::builder::<Self>().build()
            }
        }

        let err = chain.execute(&Source::default(), &mut Other).unwrap_err();
        assert!(matches!(err, PaveError::TypeMismatch { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::Structural);
    }
}

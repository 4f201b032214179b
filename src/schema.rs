//! Record schemas - the field layout a chain is compiled from
//!
//! A record type describes its fields once, in declaration order, with
//! an accessor per field. The compiler reads the schema; the executor
//! writes through the accessors.
//!
//! ```
//! use pave::{Record, RecordSchema};
//!
//! #[derive(Default)]
//! struct Page {
//!     number: u32,
//!     size: u32,
//! }
//!
//! impl Record for Page {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::builder::<Self>()
//!             .field("number", "query:'page,omitempty' default:1", |p| &mut p.number)
//!             .field("size", "query:'size,omitempty' default:20", |p| &mut p.size)
//!             .build()
//!     }
//! }
//! ```

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::coerce::FieldTarget;

/// A type whose fields can be populated by a binding chain
pub trait Record: Any {
    fn schema() -> RecordSchema
    where
        Self: Sized;
}

pub(crate) type LeafAccessor =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn FieldTarget> + Send + Sync>;

pub(crate) type RecordAccessor =
    Arc<dyn for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync>;

fn leaf_accessor<F>(f: F) -> LeafAccessor
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn FieldTarget> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn record_accessor<F>(f: F) -> RecordAccessor
where
    F: for<'a> Fn(&'a mut dyn Any) -> Option<&'a mut dyn Any> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Write access to a text-decodable field
#[derive(Clone)]
pub struct LeafAccess {
    pub(crate) accessor: LeafAccessor,
    pub(crate) type_name: &'static str,
    pub(crate) accepts_empty: bool,
}

impl LeafAccess {
    fn new<T: Any, V: FieldTarget + 'static>(get: fn(&mut T) -> &mut V) -> Self {
        Self {
            accessor: leaf_accessor(move |dest| {
                dest.downcast_mut::<T>()
                    .map(|record| get(record) as &mut dyn FieldTarget)
            }),
            type_name: V::type_name(),
            accepts_empty: V::accepts_empty(),
        }
    }

    /// Resolve the field inside `dest`
    pub(crate) fn resolve<'a>(&self, dest: &'a mut dyn Any) -> Option<&'a mut dyn FieldTarget> {
        (self.accessor)(dest)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for LeafAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafAccess")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Access to a record-typed field
#[derive(Clone)]
pub struct NestedAccess {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) schema: fn() -> RecordSchema,
    pub(crate) accessor: RecordAccessor,
    /// Decoder used when the field is not recursed into
    pub(crate) text: Option<LeafAccess>,
}

impl NestedAccess {
    /// Resolve the nested record inside `dest`, allocating it if optional
    pub(crate) fn resolve<'a>(&self, dest: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        (self.accessor)(dest)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for NestedAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NestedAccess")
            .field("type_name", &self.type_name)
            .field("text_decodable", &self.text.is_some())
            .finish_non_exhaustive()
    }
}

/// What kind of value a field holds
#[derive(Debug, Clone)]
pub enum FieldShape {
    /// Text-decodable scalar
    Leaf(LeafAccess),
    /// Record, by value or behind an `Option`
    Record(NestedAccess),
    /// Field the binding machinery cannot see
    Private,
}

/// One declared field of a record
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub annotation: &'static str,
    /// Settable by the executor; read-only fields are compiled but skipped
    pub writable: bool,
    pub shape: FieldShape,
}

impl FieldSpec {
    pub fn is_visible(&self) -> bool {
        !matches!(self.shape, FieldShape::Private)
    }
}

/// Ordered field layout of one record type
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub fields: Vec<FieldSpec>,
}

impl RecordSchema {
    pub fn builder<T: Record>() -> SchemaBuilder<T> {
        SchemaBuilder {
            fields: Vec::new(),
            _record: PhantomData,
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Fluent builder for [`RecordSchema`], fields in declaration order
pub struct SchemaBuilder<T> {
    fields: Vec<FieldSpec>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> SchemaBuilder<T> {
    fn push(mut self, name: &'static str, annotation: &'static str, shape: FieldShape) -> Self {
        self.fields.push(FieldSpec {
            name,
            annotation,
            writable: true,
            shape,
        });
        self
    }

    /// Scalar field written through [`FieldTarget`]
    pub fn field<V: FieldTarget + 'static>(
        self,
        name: &'static str,
        annotation: &'static str,
        get: fn(&mut T) -> &mut V,
    ) -> Self {
        self.push(name, annotation, FieldShape::Leaf(LeafAccess::new(get)))
    }

    /// Nested record held by value
    pub fn record<U: Record>(
        self,
        name: &'static str,
        annotation: &'static str,
        get: fn(&mut T) -> &mut U,
    ) -> Self {
        let access = NestedAccess {
            type_id: TypeId::of::<U>(),
            type_name: type_name::<U>(),
            schema: U::schema,
            accessor: record_accessor(move |dest| {
                dest.downcast_mut::<T>().map(|record| get(record) as &mut dyn Any)
            }),
            text: None,
        };
        self.push(name, annotation, FieldShape::Record(access))
    }

    /// Nested record behind an `Option`, allocated with `Default` on first write
    pub fn optional_record<U: Record + Default>(
        self,
        name: &'static str,
        annotation: &'static str,
        get: fn(&mut T) -> &mut Option<U>,
    ) -> Self {
        let access = NestedAccess {
            type_id: TypeId::of::<U>(),
            type_name: type_name::<U>(),
            schema: U::schema,
            accessor: record_accessor(move |dest| {
                dest.downcast_mut::<T>()
                    .map(|record| get(record).get_or_insert_with(U::default) as &mut dyn Any)
            }),
            text: None,
        };
        self.push(name, annotation, FieldShape::Record(access))
    }

    /// Boxed optional record, for self-referential types
    pub fn boxed_record<U: Record + Default>(
        self,
        name: &'static str,
        annotation: &'static str,
        get: fn(&mut T) -> &mut Option<Box<U>>,
    ) -> Self {
        let access = NestedAccess {
            type_id: TypeId::of::<U>(),
            type_name: type_name::<U>(),
            schema: U::schema,
            accessor: record_accessor(move |dest| {
                dest.downcast_mut::<T>().map(|record| {
                    let boxed = get(record).get_or_insert_with(Box::default);
                    &mut **boxed as &mut dyn Any
                })
            }),
            text: None,
        };
        self.push(name, annotation, FieldShape::Record(access))
    }

    /// Nested record that can also be decoded from text (`recursive:false`)
    pub fn text_record<U: Record + FieldTarget>(
        self,
        name: &'static str,
        annotation: &'static str,
        get: fn(&mut T) -> &mut U,
    ) -> Self {
        let access = NestedAccess {
            type_id: TypeId::of::<U>(),
            type_name: type_name::<U>(),
            schema: U::schema,
            accessor: record_accessor(move |dest| {
                dest.downcast_mut::<T>().map(|record| get(record) as &mut dyn Any)
            }),
            text: Some(LeafAccess::new(get)),
        };
        self.push(name, annotation, FieldShape::Record(access))
    }

    /// Field declared on the record but invisible to binding
    pub fn private(self, name: &'static str) -> Self {
        self.push(name, "", FieldShape::Private)
    }

    /// Mark the previously added field as not settable
    pub fn read_only(mut self) -> Self {
        if let Some(last) = self.fields.last_mut() {
            last.writable = false;
        }
        self
    }

    pub fn build(self) -> RecordSchema {
        RecordSchema {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            fields: self.fields,
        }
    }
}

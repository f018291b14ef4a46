//! Handle descriptors.
//!
//! A [`Schema`] is a set of named [`Record`]s. Each record lists the slots of
//! a native class's dispatch table in table order: the n-th field describes
//! slot n. The correspondence cannot be checked from this side; a record that
//! disagrees with the native layout will call the wrong function.
//!
//! Schemas can be assembled with the builder methods here or loaded from text
//! with [`parser::parse`].

pub mod parser;

use std::{collections::BTreeMap, fmt, sync::Arc};

use itertools::Itertools;

use crate::types::ValueType;

/// Signature of one callable slot.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotSignature {
    pub name: Arc<str>,
    pub params: Vec<ValueType>,
    /// Kept as a list so that declarations with several results can be
    /// represented and rejected at bind time.
    pub returns: Vec<ValueType>,
    /// Raw calling-convention annotation, e.g. `stdcall`.
    pub call: Option<Arc<str>>,
}

impl SlotSignature {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            params: vec![],
            returns: vec![],
            call: None,
        }
    }
    pub fn param(mut self, ty: ValueType) -> Self {
        self.params.push(ty);
        self
    }
    pub fn params(mut self, tys: impl IntoIterator<Item = ValueType>) -> Self {
        self.params.extend(tys);
        self
    }
    pub fn returns(mut self, ty: ValueType) -> Self {
        self.returns.push(ty);
        self
    }
    pub fn call(mut self, tag: impl Into<Arc<str>>) -> Self {
        self.call = Some(tag.into());
        self
    }
    pub fn return_type(&self) -> Option<&ValueType> {
        self.returns.first()
    }
}

impl fmt::Display for SlotSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.iter().join(", "))?;
        match self.returns.as_slice() {
            [] => Ok(()),
            [ty] => write!(f, " -> {ty}"),
            tys => write!(f, " -> ({})", tys.iter().join(", ")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Method(SlotSignature),
    /// Occupies a table slot without producing a trampoline.
    Reserved(Arc<str>),
}

impl Field {
    pub fn name(&self) -> &str {
        match self {
            Field::Method(sig) => &sig.name,
            Field::Reserved(name) => name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub name: Arc<str>,
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: vec![],
        }
    }
    pub fn method(mut self, sig: SlotSignature) -> Self {
        self.fields.push(Field::Method(sig));
        self
    }
    pub fn reserved(mut self, name: impl Into<Arc<str>>) -> Self {
        self.fields.push(Field::Reserved(name.into()));
        self
    }
    /// A record counts as a handle shape only if it has something to call.
    pub fn has_methods(&self) -> bool {
        self.fields.iter().any(|f| matches!(f, Field::Method(_)))
    }
    pub fn methods(&self) -> impl Iterator<Item = (usize, &SlotSignature)> {
        self.fields.iter().enumerate().filter_map(|(i, f)| match f {
            Field::Method(sig) => Some((i, sig)),
            Field::Reserved(_) => None,
        })
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "handle {} {{", self.name)?;
        for field in &self.fields {
            match field {
                Field::Method(sig) => {
                    if let Some(call) = &sig.call {
                        writeln!(f, "    #[call = {call:?}]")?;
                    }
                    writeln!(f, "    {sig};")?;
                }
                Field::Reserved(name) => writeln!(f, "    {name};")?,
            }
        }
        write!(f, "}}")
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    records: BTreeMap<Arc<str>, Arc<Record>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_record(mut self, record: Record) -> Self {
        self.insert(record);
        self
    }
    /// Adds a record, replacing any previous one with the same name.
    pub fn insert(&mut self, record: Record) -> Option<Arc<Record>> {
        self.records.insert(record.name.clone(), Arc::new(record))
    }
    pub fn get(&self, name: &str) -> Option<&Arc<Record>> {
        self.records.get(name)
    }
    pub fn records(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }
    pub fn len(&self) -> usize {
        self.records.len()
    }
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
    /// Whether `ty` is a pointer to a record of this schema that declares at
    /// least one method.
    pub fn is_handle_type(&self, ty: &ValueType) -> bool {
        ty.pointee_record()
            .and_then(|name| self.get(name))
            .is_some_and(|r| r.has_methods())
    }
    /// Descriptor for binding an object of the named record.
    pub fn descriptor(self: &Arc<Self>, name: &str) -> Descriptor {
        Descriptor::new(self.clone(), ValueType::handle(name))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.records.values().map(|r| r.to_string()).join("\n\n");
        write!(f, "{body}")
    }
}

/// What a caller hands to the binder: a schema and the type to bind as.
///
/// Only `*Record` is bindable; anything else fails with
/// [`BindError::NotAStruct`](crate::runtime::binder::BindError::NotAStruct).
#[derive(Clone, Debug)]
pub struct Descriptor {
    pub schema: Arc<Schema>,
    pub target: ValueType,
}

impl Descriptor {
    pub fn new(schema: Arc<Schema>, target: ValueType) -> Self {
        Self { schema, target }
    }
}

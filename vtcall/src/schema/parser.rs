//! Text form of a [`Schema`].
//!
//! ```text
//! // one `handle` block per native class, fields in dispatch table order
//! handle Calculator {
//!     multiply(i32, i32) -> i32;
//!     #[call = "stdcall"]
//!     name() -> str;
//!     reserved;
//!     child() -> *Calculator;
//! }
//! ```
//!
//! A bare identifier followed by `;` reserves a slot without making it
//! callable. `-> (T, U)` is accepted here and rejected later by the binder.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use chumsky::{extra, prelude::*};
use thiserror::Error;

use super::{Field, Record, Schema, SlotSignature};
use crate::types::ValueType;
use crate::utils::{
    error::ReportableError,
    metadata::{Location, Span},
};

type ParseError<'src> = extra::Err<Rich<'src, char>>;

macro_rules! ParserTrait {
    ($src:lifetime, $output:ty) => { impl Parser<$src, &$src str, $output, ParseError<$src>> + Clone + $src };
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SchemaError {
    pub message: String,
    pub labels: Vec<(Location, String)>,
}

impl ReportableError for SchemaError {
    fn get_labels(&self) -> Vec<(Location, String)> {
        self.labels.clone()
    }
}

fn get_span<T: chumsky::span::Span<Offset = usize>>(e: T) -> Span {
    e.start()..e.end()
}

/// Whitespace and `//` comments.
fn ws<'src>() -> ParserTrait!('src, ()) {
    let comment = just("//")
        .then(any().and_is(just('\n').not()).repeated())
        .ignored();
    text::whitespace()
        .at_least(1)
        .ignored()
        .or(comment)
        .repeated()
        .ignored()
}

fn symbol<'src>(c: char) -> ParserTrait!('src, char) {
    just(c).padded_by(ws())
}

fn ident<'src>() -> ParserTrait!('src, &'src str) {
    text::ascii::ident().padded_by(ws()).labelled("identifier")
}

fn type_parser<'src>() -> ParserTrait!('src, ValueType) {
    recursive(|ty| {
        let named = text::ascii::ident().map(|word: &str| {
            ValueType::from_keyword(word).unwrap_or_else(|| ValueType::record(word))
        });
        let pointer = just('*')
            .padded_by(ws())
            .ignore_then(ty)
            .map(ValueType::pointer_to);
        pointer.or(named).padded_by(ws()).labelled("type")
    })
}

fn type_list<'src>() -> ParserTrait!('src, Vec<ValueType>) {
    type_parser()
        .separated_by(symbol(','))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(symbol('('), symbol(')'))
}

/// `#[call = "..."]`
fn annotation<'src>() -> ParserTrait!('src, &'src str) {
    let string = just('"')
        .ignore_then(none_of("\"\n").repeated().to_slice())
        .then_ignore(just('"'))
        .padded_by(ws());
    just('#')
        .then(just('['))
        .padded_by(ws())
        .ignore_then(ident())
        .then_ignore(symbol('='))
        .then(string)
        .then_ignore(symbol(']'))
        .try_map(|(key, value): (&str, &str), span| {
            if key == "call" {
                Ok(value)
            } else {
                Err(Rich::custom(span, format!("unknown attribute `{key}`")))
            }
        })
        .labelled("annotation")
}

fn field_parser<'src>() -> ParserTrait!('src, Field) {
    let returns = just("->")
        .padded_by(ws())
        .ignore_then(type_list().or(type_parser().map(|t| vec![t])))
        .or_not()
        .map(Option::unwrap_or_default);
    let method = annotation()
        .or_not()
        .then(ident())
        .then(type_list())
        .then(returns)
        .map(|(((call, name), params), returns)| {
            Field::Method(SlotSignature {
                name: Arc::from(name),
                params,
                returns,
                call: call.map(Arc::from),
            })
        })
        .labelled("method");
    let reserved = ident().map(|name| Field::Reserved(Arc::from(name)));
    method.or(reserved).then_ignore(symbol(';'))
}

fn record_parser<'src>() -> ParserTrait!('src, (Record, Span)) {
    let keyword = text::ascii::ident()
        .filter(|word: &&str| *word == "handle")
        .padded_by(ws())
        .labelled("`handle`");
    keyword
        .ignore_then(ident())
        .map_with(|name, e| (name, get_span(e.span())))
        .then(
            field_parser()
                .repeated()
                .collect::<Vec<_>>()
                .delimited_by(symbol('{'), symbol('}')),
        )
        .map(|((name, span), fields)| {
            (
                Record {
                    name: Arc::from(name),
                    fields,
                },
                span,
            )
        })
}

fn schema_parser<'src>() -> ParserTrait!('src, Vec<(Record, Span)>) {
    ws().ignore_then(record_parser().repeated().collect::<Vec<_>>())
        .then_ignore(end())
}

/// Parse schema text. `path` is only used for error locations.
pub fn parse(src: &str, path: Option<PathBuf>) -> Result<Schema, Vec<Box<dyn ReportableError>>> {
    let path = path.unwrap_or_default();
    let records = schema_parser().parse(src).into_result().map_err(|errs| {
        errs.into_iter()
            .map(|e| {
                let loc = Location::new(get_span(*e.span()), path.clone());
                Box::new(SchemaError {
                    message: e.to_string(),
                    labels: vec![(loc, e.reason().to_string())],
                }) as Box<dyn ReportableError>
            })
            .collect::<Vec<_>>()
    })?;

    let mut seen: BTreeMap<Arc<str>, Span> = BTreeMap::new();
    let mut errs: Vec<Box<dyn ReportableError>> = vec![];
    let mut schema = Schema::new();
    for (record, span) in records {
        if let Some(first) = seen.get(&record.name) {
            errs.push(Box::new(SchemaError {
                message: format!("handle `{}` is declared more than once", record.name),
                labels: vec![
                    (Location::new(span, path.clone()), "declared again here".to_string()),
                    (
                        Location::new(first.clone(), path.clone()),
                        "first declared here".to_string(),
                    ),
                ],
            }));
            continue;
        }
        seen.insert(record.name.clone(), span);
        schema.insert(record);
    }
    if errs.is_empty() { Ok(schema) } else { Err(errs) }
}

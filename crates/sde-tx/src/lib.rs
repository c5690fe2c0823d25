//! # SDE Transformations - Message Processing Functions
//!
//! Transform functions for SDE pipelines: map, filter, flat-map and key-by
//! implementations operating on multimodal messages, plus lightweight
//! closure adapters for ad-hoc logic and the factory that builds transforms
//! from declarative pipeline specs.
//!
//! ## Available transformations
//!
//! - **Passthrough**: forward every message untouched; useful for testing
//!   pipeline connectivity
//! - **TextClean**: trim whitespace and normalize the case of text payloads
//! - **MinLength**: drop messages whose text payload is too short
//! - **TextKey**: derive a partition key from the text payload
//! - **Closure adapters**: [`map_fn`], [`filter_fn`], [`flat_map_fn`],
//!   [`key_fn`]

use sde_core::{
    FilterFunction, FlatMapFunction, FunctionError, FunctionResponse, FunctionSlot, KeyByFunction,
    KeyStrategy, MapFunction, Message, OperatorKind, Payload, RunningAggregate, SdeError,
    TransformSpec, TumblingCountWindow, WindowSpec,
};

/// Forwards every message without modification.
pub struct Passthrough {
    id: String,
}

impl Passthrough {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl MapFunction for Passthrough {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        Ok(input)
    }
}

/// Case normalization applied by [`TextClean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Lower,
    Upper,
    Title,
}

impl CaseMode {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "lower" => Some(CaseMode::Lower),
            "upper" => Some(CaseMode::Upper),
            "title" => Some(CaseMode::Title),
            _ => None,
        }
    }

    fn apply(self, text: &str) -> String {
        match self {
            CaseMode::Lower => text.to_lowercase(),
            CaseMode::Upper => text.to_uppercase(),
            CaseMode::Title => text
                .split_whitespace()
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        None => String::new(),
                        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Cleans text payloads: optional whitespace trimming and case
/// normalization. Non-text messages pass through untouched.
pub struct TextClean {
    id: String,
    trim: bool,
    normalize_case: Option<CaseMode>,
}

impl TextClean {
    pub fn new(id: impl Into<String>, trim: bool, normalize_case: Option<CaseMode>) -> Self {
        Self {
            id: id.into(),
            trim,
            normalize_case,
        }
    }
}

impl MapFunction for TextClean {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        for mut message in input {
            if let Some(text) = message.text_content() {
                let mut cleaned = text.to_string();
                if self.trim {
                    cleaned = cleaned.trim().to_string();
                }
                if let Some(mode) = self.normalize_case {
                    cleaned = mode.apply(&cleaned);
                }
                let kind = message.kind();
                message.set_payload(kind, Payload::Text(cleaned));
            }
            out.add(message);
        }
        Ok(out)
    }
}

/// Retains messages whose text payload has at least `min_chars` characters.
/// Non-text messages are retained.
pub struct MinLength {
    id: String,
    min_chars: usize,
}

impl MinLength {
    pub fn new(id: impl Into<String>, min_chars: usize) -> Self {
        Self {
            id: id.into(),
            min_chars,
        }
    }
}

impl FilterFunction for MinLength {
    fn name(&self) -> &str {
        &self.id
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let min_chars = self.min_chars;
        let kept: Vec<Message> = input
            .into_iter()
            .filter(|message| {
                message
                    .text_content()
                    .map_or(true, |text| text.chars().count() >= min_chars)
            })
            .collect();
        Ok(FunctionResponse::from(kept))
    }
}

/// Derives a key from the text payload; non-text messages key on their
/// content kind label.
pub struct TextKey {
    id: String,
}

impl TextKey {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl KeyByFunction for TextKey {
    fn name(&self) -> &str {
        &self.id
    }

    fn key(&mut self, message: &Message) -> Result<String, FunctionError> {
        Ok(message
            .text_content()
            .map(str::to_string)
            .unwrap_or_else(|| message.kind().to_string()))
    }
}

/// Map adapter over a closure. The closure may drop a message by returning
/// `Ok(None)`, which removes that position from the output.
pub struct MapFn<F> {
    name: String,
    f: F,
}

/// Build a [`MapFunction`] from a closure.
pub fn map_fn<F>(name: impl Into<String>, f: F) -> MapFn<F>
where
    F: FnMut(Message) -> Result<Option<Message>, FunctionError> + Send,
{
    MapFn {
        name: name.into(),
        f,
    }
}

impl<F> MapFunction for MapFn<F>
where
    F: FnMut(Message) -> Result<Option<Message>, FunctionError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        for message in input {
            if let Some(mapped) = (self.f)(message)? {
                out.add(mapped);
            }
        }
        Ok(out)
    }
}

/// Filter adapter over a predicate closure.
pub struct FilterFn<F> {
    name: String,
    predicate: F,
}

/// Build a [`FilterFunction`] from a predicate.
pub fn filter_fn<F>(name: impl Into<String>, predicate: F) -> FilterFn<F>
where
    F: FnMut(&Message) -> Result<bool, FunctionError> + Send,
{
    FilterFn {
        name: name.into(),
        predicate,
    }
}

impl<F> FilterFunction for FilterFn<F>
where
    F: FnMut(&Message) -> Result<bool, FunctionError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        for message in input {
            if (self.predicate)(&message)? {
                out.add(message);
            }
        }
        Ok(out)
    }
}

/// Flat-map adapter over a closure returning any number of messages.
pub struct FlatMapFn<F> {
    name: String,
    f: F,
}

/// Build a [`FlatMapFunction`] from a closure.
pub fn flat_map_fn<F>(name: impl Into<String>, f: F) -> FlatMapFn<F>
where
    F: FnMut(Message) -> Result<Vec<Message>, FunctionError> + Send,
{
    FlatMapFn {
        name: name.into(),
        f,
    }
}

impl<F> FlatMapFunction for FlatMapFn<F>
where
    F: FnMut(Message) -> Result<Vec<Message>, FunctionError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut out = FunctionResponse::new();
        for message in input {
            for produced in (self.f)(message)? {
                out.add(produced);
            }
        }
        Ok(out)
    }
}

/// Key-by adapter over a closure.
pub struct KeyFn<F> {
    name: String,
    f: F,
}

/// Build a [`KeyByFunction`] from a closure.
pub fn key_fn<F>(name: impl Into<String>, f: F) -> KeyFn<F>
where
    F: FnMut(&Message) -> Result<String, FunctionError> + Send,
{
    KeyFn {
        name: name.into(),
        f,
    }
}

impl<F> KeyByFunction for KeyFn<F>
where
    F: FnMut(&Message) -> Result<String, FunctionError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn key(&mut self, message: &Message) -> Result<String, FunctionError> {
        (self.f)(message)
    }
}

/// Build a transform operator's kind and function slot from its
/// declarative spec.
pub fn create_transform(spec: &TransformSpec) -> Result<(OperatorKind, FunctionSlot), SdeError> {
    match spec {
        TransformSpec::Passthrough { id } => Ok((
            OperatorKind::Map,
            FunctionSlot::Map(Box::new(Passthrough::new(id.clone()))),
        )),
        TransformSpec::TextClean {
            id,
            trim,
            normalize_case,
        } => {
            let mode = match normalize_case.as_deref() {
                None => None,
                Some(raw) => Some(CaseMode::parse(raw).ok_or_else(|| {
                    SdeError::InvalidGraph(format!(
                        "transform `{id}`: unknown case mode `{raw}` (expected lower, upper, or title)"
                    ))
                })?),
            };
            Ok((
                OperatorKind::Map,
                FunctionSlot::Map(Box::new(TextClean::new(id.clone(), *trim, mode))),
            ))
        }
        TransformSpec::MinLength { id, min_chars } => Ok((
            OperatorKind::Filter,
            FunctionSlot::Filter(Box::new(MinLength::new(id.clone(), *min_chars))),
        )),
        TransformSpec::KeyBy { id, partitions } => {
            let strategy = match partitions {
                Some(partitions) => KeyStrategy::Hash {
                    partitions: *partitions,
                },
                None => KeyStrategy::Direct,
            };
            Ok((
                OperatorKind::KeyBy,
                FunctionSlot::KeyBy {
                    function: Box::new(TextKey::new(id.clone())),
                    strategy,
                },
            ))
        }
        TransformSpec::Window { id: _, size } => Ok((
            OperatorKind::Window,
            FunctionSlot::Window(Box::new(TumblingCountWindow::new(WindowSpec::count(*size)))),
        )),
        TransformSpec::Aggregate { id: _, ops } => Ok((
            OperatorKind::Aggregate,
            FunctionSlot::Aggregate(Box::new(RunningAggregate::new(ops.clone()))),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sde_core::ContentKind;

    fn text(id: u64, content: &str) -> Message {
        Message::with_id(id, ContentKind::Text, Payload::Text(content.into()))
    }

    #[test]
    fn text_clean_trims_and_uppercases() {
        let mut clean = TextClean::new("clean", true, Some(CaseMode::Upper));
        let out = clean
            .execute(FunctionResponse::from(vec![text(1, "  hello  ")]))
            .unwrap();
        assert_eq!(out.iter().next().unwrap().text_content(), Some("HELLO"));
    }

    #[test]
    fn text_clean_title_case() {
        let mut clean = TextClean::new("clean", false, Some(CaseMode::Title));
        let out = clean
            .execute(FunctionResponse::from(vec![text(1, "hello wide world")]))
            .unwrap();
        assert_eq!(
            out.iter().next().unwrap().text_content(),
            Some("Hello Wide World")
        );
    }

    #[test]
    fn text_clean_ignores_binary_payloads() {
        let mut clean = TextClean::new("clean", true, Some(CaseMode::Lower));
        let out = clean
            .execute(FunctionResponse::from(vec![Message::binary(vec![1, 2])]))
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn min_length_drops_short_text() {
        let mut filter = MinLength::new("keep-long", 2);
        let out = filter
            .execute(FunctionResponse::from(vec![
                text(1, "a"),
                text(2, "bb"),
                text(3, "ccc"),
            ]))
            .unwrap();
        let ids: Vec<u64> = out.into_iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn map_fn_can_drop_positions() {
        let mut mapper = map_fn("evens-only", |m: Message| {
            Ok((m.id() % 2 == 0).then_some(m))
        });
        let out = mapper
            .execute(FunctionResponse::from(vec![
                text(1, "a"),
                text(2, "b"),
                text(3, "c"),
            ]))
            .unwrap();
        let ids: Vec<u64> = out.into_iter().map(|m| m.id()).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn flat_map_fn_expands() {
        let mut fm = flat_map_fn("split-words", |m: Message| {
            let words = m
                .text_content()
                .unwrap_or_default()
                .split_whitespace()
                .map(Message::text)
                .collect();
            Ok(words)
        });
        let out = fm
            .execute(FunctionResponse::from(vec![text(1, "two words")]))
            .unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn text_key_falls_back_to_kind() {
        let mut key = TextKey::new("key");
        assert_eq!(key.key(&text(1, "hello")).unwrap(), "hello");
        assert_eq!(key.key(&Message::binary(vec![0])).unwrap(), "binary");
    }

    #[test]
    fn factory_rejects_unknown_case_mode() {
        let spec = TransformSpec::TextClean {
            id: "clean".into(),
            trim: false,
            normalize_case: Some("snake".into()),
        };
        assert!(matches!(
            create_transform(&spec),
            Err(SdeError::InvalidGraph(_))
        ));
    }

    #[test]
    fn factory_builds_expected_kinds() {
        let (kind, slot) = create_transform(&TransformSpec::Window {
            id: "w".into(),
            size: 4,
        })
        .unwrap();
        assert_eq!(kind, OperatorKind::Window);
        assert_eq!(slot.kind(), OperatorKind::Window);
    }
}

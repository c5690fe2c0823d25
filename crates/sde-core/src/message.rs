//! The unit of data flowing through a pipeline.
//!
//! A [`Message`] is an opaque record with a 64-bit identifier, a typed
//! content payload (text, bytes, or a float vector), ordered string
//! metadata, a processing trace, and an optional quality score.
//!
//! Messages are move-only. Content payloads may be large media blobs or
//! embedding vectors, so `Message` deliberately does not implement `Clone`;
//! a caller that needs its own copy builds one through the explicit
//! [`Message::duplicate`] factory, which assigns a fresh identifier.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique message identifier, assigned at construction.
pub type MessageId = u64;

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Content discriminator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Text,
    Binary,
    Image,
    Audio,
    Video,
    Embedding,
    Metadata,
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ContentKind::Text => "text",
            ContentKind::Binary => "binary",
            ContentKind::Image => "image",
            ContentKind::Audio => "audio",
            ContentKind::Video => "video",
            ContentKind::Embedding => "embedding",
            ContentKind::Metadata => "metadata",
        };
        f.write_str(label)
    }
}

/// Tagged content payload.
///
/// The pairing with [`ContentKind`] is: `Text` and `Metadata` carry
/// `Payload::Text`; `Binary`, `Image`, `Audio` and `Video` carry
/// `Payload::Bytes`; `Embedding` carries `Payload::Vector`. The convenience
/// constructors on [`Message`] enforce this pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Bytes(Vec<u8>),
    Vector(Vec<f32>),
}

impl Payload {
    /// Approximate payload size in bytes, used for logging only.
    pub fn size(&self) -> usize {
        match self {
            Payload::Text(s) => s.len(),
            Payload::Bytes(b) => b.len(),
            Payload::Vector(v) => v.len() * std::mem::size_of::<f32>(),
        }
    }
}

/// A single record moving through the graph.
///
/// Exclusively owned by exactly one holder at any instant: the producing
/// source, an in-flight [`FunctionResponse`](crate::FunctionResponse), or
/// the consuming operator. Edges transfer ownership with a moving
/// enqueue/dequeue.
#[derive(Debug)]
pub struct Message {
    id: MessageId,
    created_at: DateTime<Utc>,
    kind: ContentKind,
    payload: Payload,
    metadata: BTreeMap<String, String>,
    trace: Vec<String>,
    quality: Option<f64>,
}

impl Message {
    /// Reserve the next identifier from the process-wide sequence.
    pub fn next_id() -> MessageId {
        NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a message with an auto-assigned identifier.
    pub fn new(kind: ContentKind, payload: Payload) -> Self {
        Self::with_id(Self::next_id(), kind, payload)
    }

    /// Build a message with an explicit identifier.
    ///
    /// Identifier assignment is the creator's responsibility; the engine
    /// never reassigns ids when forwarding. Deterministic tests use this
    /// constructor directly.
    pub fn with_id(id: MessageId, kind: ContentKind, payload: Payload) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            kind,
            payload,
            metadata: BTreeMap::new(),
            trace: Vec::new(),
            quality: None,
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::new(ContentKind::Text, Payload::Text(content.into()))
    }

    pub fn binary(data: Vec<u8>) -> Self {
        Self::new(ContentKind::Binary, Payload::Bytes(data))
    }

    pub fn image(data: Vec<u8>) -> Self {
        Self::new(ContentKind::Image, Payload::Bytes(data))
    }

    pub fn audio(data: Vec<u8>) -> Self {
        Self::new(ContentKind::Audio, Payload::Bytes(data))
    }

    pub fn video(data: Vec<u8>) -> Self {
        Self::new(ContentKind::Video, Payload::Bytes(data))
    }

    pub fn embedding(vector: Vec<f32>) -> Self {
        Self::new(ContentKind::Embedding, Payload::Vector(vector))
    }

    /// Build a `Metadata`-kind message carrying a textual record, e.g. a
    /// JSON summary produced by an aggregate function.
    pub fn metadata_record(content: impl Into<String>) -> Self {
        Self::new(ContentKind::Metadata, Payload::Text(content.into()))
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Replace the payload, keeping identifier and metadata.
    pub fn set_payload(&mut self, kind: ContentKind, payload: Payload) {
        self.kind = kind;
        self.payload = payload;
    }

    /// Textual content, if the payload is text.
    pub fn text_content(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn insert_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_metadata(key, value);
        self
    }

    /// Ordered labels of the processing steps this message has passed
    /// through. Operators append their name on every forward.
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    pub fn record_step(&mut self, label: impl Into<String>) {
        self.trace.push(label.into());
    }

    pub fn quality(&self) -> Option<f64> {
        self.quality
    }

    /// Set the quality score. Values outside `[0, 1]` are clamped.
    pub fn set_quality(&mut self, quality: f64) {
        self.quality = Some(quality.clamp(0.0, 1.0));
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.set_quality(quality);
        self
    }

    /// Explicit copy factory: same content, metadata and quality, fresh
    /// identifier and creation time, empty trace.
    pub fn duplicate(&self) -> Message {
        Message {
            id: Self::next_id(),
            created_at: Utc::now(),
            kind: self.kind,
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            trace: Vec::new(),
            quality: self.quality,
        }
    }

    /// Fan-out copy carrying the *same* identifier.
    ///
    /// The engine uses this to deliver one record along every outgoing edge
    /// of an operator; downstream consumers on parallel edges observe the
    /// same message id. Everywhere else, use [`Message::duplicate`].
    pub fn fork(&self) -> Message {
        Message {
            id: self.id,
            created_at: self.created_at,
            kind: self.kind,
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            trace: self.trace.clone(),
            quality: self.quality,
        }
    }
}

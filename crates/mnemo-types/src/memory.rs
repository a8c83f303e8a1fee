//! Memory types for mnemo.
//!
//! These types model long-term memory for a (persona, user) pair: facts,
//! preferences and events distilled from chat history, the transient buffer
//! of chat turns awaiting extraction, and the add/update decisions produced
//! by the extraction model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Prefix of every memory id.
pub const MEMORY_ID_PREFIX: &str = "mem:";

/// Kind of a remembered fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Fact,
    Preference,
    Event,
    Emotion,
    Relationship,
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryType::Fact => write!(f, "fact"),
            MemoryType::Preference => write!(f, "preference"),
            MemoryType::Event => write!(f, "event"),
            MemoryType::Emotion => write!(f, "emotion"),
            MemoryType::Relationship => write!(f, "relationship"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fact" => Ok(MemoryType::Fact),
            "preference" => Ok(MemoryType::Preference),
            "event" => Ok(MemoryType::Event),
            "emotion" => Ok(MemoryType::Emotion),
            "relationship" => Ok(MemoryType::Relationship),
            other => Err(format!("invalid memory type: '{other}'")),
        }
    }
}

/// Who created a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    /// Written through the manual memory management surface.
    Manual,
    /// Produced by the background extraction pipeline.
    Auto,
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySource::Manual => write!(f, "manual"),
            MemorySource::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for MemorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(MemorySource::Manual),
            "auto" => Ok(MemorySource::Auto),
            other => Err(format!("invalid memory source: '{other}'")),
        }
    }
}

/// Lifecycle status of a memory.
///
/// `Superseded` is terminal: the record is retained for history but never
/// returned by active-memory queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Active,
    Superseded,
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryStatus::Active => write!(f, "active"),
            MemoryStatus::Superseded => write!(f, "superseded"),
        }
    }
}

impl FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MemoryStatus::Active),
            "superseded" => Ok(MemoryStatus::Superseded),
            other => Err(format!("invalid memory status: '{other}'")),
        }
    }
}

/// Ownership scope of a memory. Every query is filtered by both fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub persona_id: String,
    pub user_id: i64,
}

impl MemoryScope {
    pub fn new(persona_id: impl Into<String>, user_id: i64) -> Self {
        Self {
            persona_id: persona_id.into(),
            user_id,
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.persona_id, self.user_id)
    }
}

/// A single remembered fact attributed to a (persona, user) pair.
///
/// A memory is never edited to reflect a newer fact by the extraction
/// pipeline: a replacement record is created and this one is flipped to
/// `Superseded` with `superseded_by` pointing forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub persona_id: String,
    pub user_id: i64,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Canonical text of the fact.
    pub content: String,
    /// Free-text tags for non-vector recall.
    pub keywords: Option<String>,
    /// JSON-serialized embedding vector, if one has been computed.
    #[serde(skip_serializing, default)]
    pub embedding: Option<String>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
    pub source: MemorySource,
    pub status: MemoryStatus,
    /// Id of the record that replaced this one.
    pub superseded_by: Option<String>,
    pub hit_count: u32,
    pub last_hit_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing, default)]
    pub is_deleted: bool,
}

impl Memory {
    /// Build a new active memory with a fresh id and no embedding.
    pub fn new(
        scope: &MemoryScope,
        memory_type: MemoryType,
        content: impl Into<String>,
        keywords: Option<String>,
        source: MemorySource,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Self::generate_id(),
            persona_id: scope.persona_id.clone(),
            user_id: scope.user_id,
            memory_type,
            content: content.into(),
            keywords: keywords.filter(|k| !k.trim().is_empty()),
            embedding: None,
            embedding_updated_at: None,
            source,
            status: MemoryStatus::Active,
            superseded_by: None,
            hit_count: 0,
            last_hit_at: None,
            created_at: now,
            updated_at: now,
            is_deleted: false,
        }
    }

    /// Generate a memory id: `mem:` followed by a time-ordered UUID.
    pub fn generate_id() -> String {
        format!("{MEMORY_ID_PREFIX}{}", Uuid::now_v7())
    }

    pub fn scope(&self) -> MemoryScope {
        MemoryScope::new(self.persona_id.clone(), self.user_id)
    }

    pub fn belongs_to(&self, scope: &MemoryScope) -> bool {
        self.persona_id == scope.persona_id && self.user_id == scope.user_id
    }

    /// Active and not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.status == MemoryStatus::Active && !self.is_deleted
    }
}

/// One chat round: the user's message and the assistant's reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnPair {
    pub user_message: String,
    pub assistant_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-conversation accumulation of chat turns awaiting extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingBatch {
    pub conversation_id: String,
    pub persona_id: String,
    pub user_id: i64,
    pub round_count: u32,
    /// Turns in append order.
    pub turns: Vec<TurnPair>,
}

impl PendingBatch {
    pub fn new(conversation_id: impl Into<String>, scope: &MemoryScope) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            persona_id: scope.persona_id.clone(),
            user_id: scope.user_id,
            round_count: 0,
            turns: Vec::new(),
        }
    }

    /// Append a turn pair stamped with the current time.
    pub fn push_turn(&mut self, user_message: impl Into<String>, assistant_message: impl Into<String>) {
        self.turns.push(TurnPair {
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
            timestamp: Utc::now(),
        });
        self.round_count += 1;
    }

    pub fn scope(&self) -> MemoryScope {
        MemoryScope::new(self.persona_id.clone(), self.user_id)
    }
}

/// Decision kind produced by the extraction model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// No related memory exists: create one.
    Add,
    /// Conflicts with or supplements exactly one existing memory.
    Update,
    /// Nothing new. Unrecognised or null action strings also land here.
    #[default]
    #[serde(other)]
    None,
}

/// One add/update/none decision from the extraction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_memory_id: Option<String>,
    /// Raw type string; coerced to [`MemoryType`] when applied.
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub memory_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "keywords_from_any")]
    pub keywords: String,
}

/// Model replies use `null` and a missing key interchangeably.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept keywords as a plain string or a list of strings.
fn keywords_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        Text(String),
        List(Vec<String>),
        Missing(Option<()>),
    }

    Ok(match Keywords::deserialize(deserializer)? {
        Keywords::Text(text) => text,
        Keywords::List(items) => items.join(", "),
        Keywords::Missing(_) => String::new(),
    })
}

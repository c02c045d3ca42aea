use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Numeric channel identifier (primary key of the graph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl ChannelId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for ChannelId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalized reference to a channel, prior to remote resolution.
///
/// Usernames are held without the leading `@`; `Display` puts it back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Locator {
    Id(ChannelId),
    Username(String),
}

impl Locator {
    pub fn username(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::Username(name.trim_start_matches('@').to_string())
    }
}

impl From<ChannelId> for Locator {
    fn from(id: ChannelId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "{}", id),
            Locator::Username(name) => write!(f, "@{}", name),
        }
    }
}

/// Channel metadata as reported by the content source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub id: ChannelId,
    pub title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    /// Group-type entity (not a broadcast channel)
    #[serde(default, alias = "megagroup")]
    pub excluded: bool,
}

/// A channel admitted to the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelNode {
    pub id: ChannelId,
    pub title: String,
    pub username: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

impl ChannelNode {
    pub fn from_metadata(metadata: &ChannelMetadata, discovered_at: DateTime<Utc>) -> Self {
        Self {
            id: metadata.id,
            title: metadata.title.clone(),
            username: metadata.username.clone(),
            date: metadata.date,
            discovered_at,
        }
    }
}

/// A channel admitted but not yet fully scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierEntry {
    pub channel_id: ChannelId,
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of admitting a resolved destination to the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting: node created and frontier entry added
    Discovered,
    /// Already a node: attributes refreshed, frontier untouched
    Known,
}

// ============================================================================
// EDGES
// ============================================================================

/// Before/after partition relative to the configured split instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Before,
    After,
}

impl TimeBucket {
    /// `Before` iff strictly earlier than the split instant.
    pub fn for_instant(observed_at: DateTime<Utc>, split_instant: DateTime<Utc>) -> Self {
        if observed_at < split_instant {
            TimeBucket::Before
        } else {
            TimeBucket::After
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeBucket::Before => "before",
            TimeBucket::After => "after",
        }
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeBucket {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(TimeBucket::Before),
            "after" => Ok(TimeBucket::After),
            other => Err(ParseError {
                kind: "time bucket",
                value: other.to_string(),
            }),
        }
    }
}

/// How a reference was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Forward,
    LinkOrMention,
}

impl ReferenceKind {
    /// Kind stored after observing `observed` on an edge currently of kind `self`.
    ///
    /// `Forward` is sticky: a `LinkOrMention` edge becomes `Forward` on the first
    /// forward observation and never goes back.
    pub fn reconcile(self, observed: ReferenceKind) -> ReferenceKind {
        match (self, observed) {
            (ReferenceKind::LinkOrMention, ReferenceKind::Forward) => ReferenceKind::Forward,
            (stored, _) => stored,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Forward => "forward",
            ReferenceKind::LinkOrMention => "link_or_mention",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forward" => Ok(ReferenceKind::Forward),
            "link_or_mention" => Ok(ReferenceKind::LinkOrMention),
            other => Err(ParseError {
                kind: "reference kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Identity of an aggregated edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeKey {
    pub origin: ChannelId,
    pub destination: ChannelId,
    pub bucket: TimeBucket,
}

impl EdgeKey {
    pub fn new(origin: ChannelId, destination: ChannelId, bucket: TimeBucket) -> Self {
        Self {
            origin,
            destination,
            bucket,
        }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}/{}", self.origin, self.destination, self.bucket)
    }
}

/// Aggregated, time-bucketed edge between two channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEdge {
    pub origin: ChannelId,
    pub destination: ChannelId,
    pub bucket: TimeBucket,
    pub strength: i64,
    pub kind: ReferenceKind,
    pub updated_at: DateTime<Utc>,
}

impl ChannelEdge {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.origin, self.destination, self.bucket)
    }
}

/// Which side of an edge a channel sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges whose origin is the channel
    Out,
    /// Edges whose destination is the channel
    In,
}

/// Edge listing filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeFilter {
    pub channel: ChannelId,
    pub direction: Direction,
    pub bucket: Option<TimeBucket>,
    pub kind: Option<ReferenceKind>,
}

impl EdgeFilter {
    pub fn outgoing(channel: ChannelId) -> Self {
        Self {
            channel,
            direction: Direction::Out,
            bucket: None,
            kind: None,
        }
    }

    pub fn incoming(channel: ChannelId) -> Self {
        Self {
            channel,
            direction: Direction::In,
            bucket: None,
            kind: None,
        }
    }

    pub fn with_bucket(mut self, bucket: TimeBucket) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_kind(mut self, kind: ReferenceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, edge: &ChannelEdge) -> bool {
        let endpoint = match self.direction {
            Direction::Out => edge.origin,
            Direction::In => edge.destination,
        };
        endpoint == self.channel
            && self.bucket.map_or(true, |b| b == edge.bucket)
            && self.kind.map_or(true, |k| k == edge.kind)
    }
}

/// Partial edge update (façade writes)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeUpdate {
    pub strength: Option<i64>,
    pub kind: Option<ReferenceKind>,
}

// ============================================================================
// CONTENT
// ============================================================================

/// Where a forwarded item came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwardOrigin {
    Channel { channel_id: ChannelId },
    User { user_id: i64 },
    Hidden,
}

/// Inline markup span kinds we care about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityKind {
    Mention,
    TextUrl { url: String },
    Url,
    #[serde(other)]
    Other,
}

/// Inline entity; offsets and lengths are UTF-16 code units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntity {
    pub offset: usize,
    pub length: usize,
    #[serde(flatten)]
    pub kind: EntityKind,
}

impl MessageEntity {
    pub fn new(kind: EntityKind, offset: usize, length: usize) -> Self {
        Self {
            offset,
            length,
            kind,
        }
    }
}

/// One message of a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub forward: Option<ForwardOrigin>,
    #[serde(default)]
    pub entities: Vec<MessageEntity>,
}

impl ContentItem {
    pub fn new(id: i64, date: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id,
            date,
            text: text.into(),
            forward: None,
            entities: Vec::new(),
        }
    }

    pub fn forwarded_from(mut self, origin: ForwardOrigin) -> Self {
        self.forward = Some(origin);
        self
    }

    pub fn with_entity(mut self, entity: MessageEntity) -> Self {
        self.entities.push(entity);
        self
    }

    /// Text covered by an entity, or `None` when the span is out of range or
    /// splits a surrogate pair.
    pub fn entity_text(&self, entity: &MessageEntity) -> Option<String> {
        let end = entity.offset.checked_add(entity.length)?;
        let units: Vec<u16> = self.text.encode_utf16().collect();
        let span = units.get(entity.offset..end)?;
        String::from_utf16(span).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reconcile_forward_is_sticky() {
        use ReferenceKind::*;
        assert_eq!(LinkOrMention.reconcile(Forward), Forward);
        assert_eq!(Forward.reconcile(LinkOrMention), Forward);
        assert_eq!(LinkOrMention.reconcile(LinkOrMention), LinkOrMention);
        assert_eq!(Forward.reconcile(Forward), Forward);
    }

    #[test]
    fn test_bucket_boundary() {
        let split = Utc.with_ymd_and_hms(2022, 2, 24, 3, 0, 0).unwrap();
        assert_eq!(TimeBucket::for_instant(split, split), TimeBucket::After);
        assert_eq!(
            TimeBucket::for_instant(split - chrono::Duration::microseconds(1), split),
            TimeBucket::Before
        );
    }

    #[test]
    fn test_entity_text_uses_utf16_offsets() {
        // The emoji occupies two UTF-16 code units
        let item = ContentItem::new(1, Utc::now(), "🔥 @news");
        let entity = MessageEntity::new(EntityKind::Mention, 3, 5);
        assert_eq!(item.entity_text(&entity).as_deref(), Some("@news"));
    }

    #[test]
    fn test_entity_text_out_of_range() {
        let item = ContentItem::new(1, Utc::now(), "@a");
        let entity = MessageEntity::new(EntityKind::Mention, 1, 10);
        assert_eq!(item.entity_text(&entity), None);
    }

    #[test]
    fn test_entity_deserializes_unknown_kind_as_other() {
        let entity: MessageEntity =
            serde_json::from_str(r#"{"type":"bold","offset":0,"length":4}"#).unwrap();
        assert_eq!(entity.kind, EntityKind::Other);

        let entity: MessageEntity = serde_json::from_str(
            r#"{"type":"text_url","offset":0,"length":4,"url":"https://t.me/x"}"#,
        )
        .unwrap();
        assert_eq!(
            entity.kind,
            EntityKind::TextUrl {
                url: "https://t.me/x".to_string()
            }
        );
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::username("@news").to_string(), "@news");
        assert_eq!(Locator::Id(ChannelId(42)).to_string(), "42");
    }
}

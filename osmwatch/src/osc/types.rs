//! Structural event and primitive types for the change stream.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

use super::lexer::RawTag;
use super::OscError;

/// Timestamp format used throughout the replication stream.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Parses an ISO-8601 UTC timestamp of the form `YYYY-MM-DDTHH:MM:SSZ`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, OscError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| OscError::InvalidTimestamp(value.to_string()))
}

/// The change action wrapping a primitive in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => write!(f, "create"),
            Action::Modify => write!(f, "modify"),
            Action::Delete => write!(f, "delete"),
        }
    }
}

/// The three editable entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Node,
    Way,
    Relation,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveKind::Node => write!(f, "node"),
            PrimitiveKind::Way => write!(f, "way"),
            PrimitiveKind::Relation => write!(f, "relation"),
        }
    }
}

/// A typed/role-tagged relation member reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: PrimitiveKind,
    pub role: String,
    pub member_ref: i64,
}

/// A fully assembled change primitive.
///
/// Node primitives carry `coord`; way primitives carry `node_refs`; relation
/// primitives carry `members`. Once published by the parser a primitive is
/// never mutated within the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub id: i64,
    pub kind: PrimitiveKind,
    pub version: u32,
    pub changeset: i64,
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: Action,
    pub tags: HashMap<String, String>,
    /// Latitude/longitude, nodes only. Deleted nodes may omit coordinates.
    pub coord: Option<(f64, f64)>,
    /// Ordered node id chain, ways only.
    pub node_refs: Vec<i64>,
    /// Ordered member list, relations only.
    pub members: Vec<Member>,
}

/// Common attributes shared by all primitive kinds.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveAttrs {
    pub id: i64,
    pub version: u32,
    pub changeset: i64,
    pub user: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PrimitiveAttrs {
    fn from_tag(tag: &RawTag) -> Result<Self, OscError> {
        Ok(Self {
            id: parse_required(tag, "id")?,
            version: parse_required(tag, "version")?,
            changeset: parse_required(tag, "changeset")?,
            user: tag.attr("user").map(str::to_string),
            timestamp: parse_timestamp(tag.required("timestamp")?)?,
        })
    }
}

/// Node attributes. Coordinates are optional because delete actions may
/// strip them from the wire format.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAttrs {
    pub common: PrimitiveAttrs,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl NodeAttrs {
    fn from_tag(tag: &RawTag) -> Result<Self, OscError> {
        Ok(Self {
            common: PrimitiveAttrs::from_tag(tag)?,
            lat: parse_optional(tag, "lat")?,
            lon: parse_optional(tag, "lon")?,
        })
    }

    /// Returns (lat, lon) when both coordinates are present.
    pub fn coord(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// A structural element recognized by the parser, with its required
/// attributes validated at construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Action(Action),
    Node(NodeAttrs),
    Way(PrimitiveAttrs),
    Relation(PrimitiveAttrs),
    Tag { key: String, value: String },
    NodeRef { node_ref: i64 },
    Member(Member),
}

impl Element {
    /// Classifies a raw markup tag into a typed element.
    ///
    /// Returns `Ok(None)` for elements the parser does not care about
    /// (document roots, `bounds`, and similar), so callers can skip them.
    pub fn classify(tag: &RawTag) -> Result<Option<Self>, OscError> {
        let element = match tag.name() {
            "create" => Element::Action(Action::Create),
            "modify" => Element::Action(Action::Modify),
            "delete" => Element::Action(Action::Delete),
            "node" => Element::Node(NodeAttrs::from_tag(tag)?),
            "way" => Element::Way(PrimitiveAttrs::from_tag(tag)?),
            "relation" => Element::Relation(PrimitiveAttrs::from_tag(tag)?),
            "tag" => Element::Tag {
                key: tag.required("k")?.to_string(),
                value: tag.required("v")?.to_string(),
            },
            "nd" => Element::NodeRef {
                node_ref: parse_required(tag, "ref")?,
            },
            "member" => Element::Member(Member {
                kind: parse_member_kind(tag)?,
                role: tag.attr("role").unwrap_or_default().to_string(),
                member_ref: parse_required(tag, "ref")?,
            }),
            _ => return Ok(None),
        };
        Ok(Some(element))
    }

    /// The element kind name matched by a closing tag.
    pub fn kind_name(name: &str) -> Option<ElementKind> {
        match name {
            "create" | "modify" | "delete" => Some(ElementKind::Action),
            "node" => Some(ElementKind::Node),
            "way" => Some(ElementKind::Way),
            "relation" => Some(ElementKind::Relation),
            "tag" => Some(ElementKind::Tag),
            "nd" => Some(ElementKind::NodeRef),
            "member" => Some(ElementKind::Member),
            _ => None,
        }
    }
}

/// Kind marker used by end events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Action,
    Node,
    Way,
    Relation,
    Tag,
    NodeRef,
    Member,
}

/// One structural event in the flat change stream.
#[derive(Debug, Clone, PartialEq)]
pub enum OscEvent {
    Start(Element),
    End(ElementKind),
}

fn parse_required<T: std::str::FromStr>(tag: &RawTag, attribute: &str) -> Result<T, OscError> {
    let raw = tag.required(attribute)?;
    raw.parse().map_err(|_| OscError::InvalidAttribute {
        element: tag.name().to_string(),
        attribute: attribute.to_string(),
        value: raw.to_string(),
    })
}

fn parse_optional<T: std::str::FromStr>(tag: &RawTag, attribute: &str) -> Result<Option<T>, OscError> {
    match tag.attr(attribute) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| OscError::InvalidAttribute {
                element: tag.name().to_string(),
                attribute: attribute.to_string(),
                value: raw.to_string(),
            }),
        None => Ok(None),
    }
}

fn parse_member_kind(tag: &RawTag) -> Result<PrimitiveKind, OscError> {
    let raw = tag.required("type")?;
    match raw {
        "node" => Ok(PrimitiveKind::Node),
        "way" => Ok(PrimitiveKind::Way),
        "relation" => Ok(PrimitiveKind::Relation),
        _ => Err(OscError::InvalidAttribute {
            element: "member".to_string(),
            attribute: "type".to_string(),
            value: raw.to_string(),
        }),
    }
}

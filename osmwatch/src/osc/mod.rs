//! Change-stream model: structural events, the streaming lexer, and the
//! diff parser that reassembles complete primitives from the flat event
//! sequence.

mod lexer;
mod parser;
mod types;

pub use lexer::{EventReader, RawTag};
pub use parser::DiffParser;
pub use types::{
    parse_timestamp, Action, Element, ElementKind, Member, NodeAttrs, OscEvent, Primitive,
    PrimitiveAttrs, PrimitiveKind, TIMESTAMP_FORMAT,
};

use thiserror::Error;

/// Error type for change-stream lexing and parsing.
///
/// Every variant is fatal for the batch being parsed: the caller must not
/// advance the replication cursor and should retry the same sequence number.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OscError {
    #[error("missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: String },

    #[error("invalid value '{value}' for attribute '{attribute}' on <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: String,
        value: String,
    },

    #[error("invalid timestamp '{0}', expected YYYY-MM-DDTHH:MM:SSZ")]
    InvalidTimestamp(String),

    /// A primitive start was observed in a diff with no open
    /// create/modify/delete block. Silently defaulting an action here would
    /// corrupt the aggregation, so this is a hard parse failure.
    #[error("<{kind}> element outside of a create/modify/delete block")]
    PrimitiveOutsideAction { kind: PrimitiveKind },

    #[error("<{child}> element with no open {parent}")]
    ChildOutsideParent {
        child: &'static str,
        parent: &'static str,
    },

    #[error("malformed markup at byte {offset}: {message}")]
    Malformed { offset: usize, message: String },
}

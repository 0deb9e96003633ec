//! Diff parser: reassembles complete primitives from the flat event stream.
//!
//! The parser is driven twice per batch: once over the diff itself, where
//! every primitive must sit inside a create/modify/delete block, and then
//! zero or more times over node-lookup responses, which carry bare `node`
//! elements with no action wrapper and only feed the coordinate table.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::lexer::EventReader;
use super::types::{
    Action, Element, ElementKind, OscEvent, Primitive, PrimitiveAttrs, PrimitiveKind,
};
use super::OscError;

/// Table key for published primitives. Node, way, and relation ids are
/// separate id spaces, so the kind participates in the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveRef {
    pub kind: PrimitiveKind,
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    /// Primary diff input: action context is enforced.
    Diff,
    /// Supplementary node-lookup response: bare nodes, coordinates only.
    Lookup,
}

/// State machine over the structural event stream.
#[derive(Debug, Default)]
pub struct DiffParser {
    action: Option<Action>,
    current: Option<Primitive>,
    nodes: HashMap<i64, (f64, f64)>,
    primitives: HashMap<PrimitiveRef, Primitive>,
    unresolved: HashSet<i64>,
}

impl DiffParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one complete diff batch.
    ///
    /// # Errors
    ///
    /// Any [`OscError`] is fatal for the batch: the parser may be left with
    /// partial state and should be discarded, and the replication cursor
    /// must not advance.
    pub fn parse_diff(&mut self, input: &str) -> Result<(), OscError> {
        for event in EventReader::new(input) {
            self.handle_event(event?, ParseMode::Diff)?;
        }
        Ok(())
    }

    /// Absorbs a node-lookup response, populating the coordinate table.
    ///
    /// Lookup responses supply `node` elements with no enclosing action, so
    /// action-context enforcement is suspended. Finished nodes land in the
    /// coordinate table only; they are not published as primitives.
    pub fn absorb_node_lookup(&mut self, input: &str) -> Result<(), OscError> {
        for event in EventReader::new(input) {
            self.handle_event(event?, ParseMode::Lookup)?;
        }
        Ok(())
    }

    /// Coordinates for a node id, if known.
    pub fn node_coord(&self, id: i64) -> Option<(f64, f64)> {
        self.nodes.get(&id).copied()
    }

    /// Whether the coordinate table holds the given node id.
    pub fn has_node(&self, id: i64) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Node ids referenced by ways but absent from the coordinate table.
    pub fn unresolved_refs(&self) -> impl Iterator<Item = i64> + '_ {
        self.unresolved.iter().copied()
    }

    /// All primitives published so far, in no particular order.
    pub fn primitives(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives.values()
    }

    /// Published way primitives.
    pub fn ways(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives
            .values()
            .filter(|p| p.kind == PrimitiveKind::Way)
    }

    fn handle_event(&mut self, event: OscEvent, mode: ParseMode) -> Result<(), OscError> {
        match event {
            OscEvent::Start(element) => self.handle_start(element, mode),
            OscEvent::End(kind) => {
                self.handle_end(kind, mode);
                Ok(())
            }
        }
    }

    fn handle_start(&mut self, element: Element, mode: ParseMode) -> Result<(), OscError> {
        match element {
            Element::Action(action) => {
                self.action = Some(action);
            }
            Element::Node(attrs) => {
                let action = self.open_action(PrimitiveKind::Node, mode)?;
                let coord = attrs.coord();
                self.current = Some(new_primitive(
                    PrimitiveKind::Node,
                    attrs.common,
                    action,
                    coord,
                ));
            }
            Element::Way(attrs) => {
                let action = self.open_action(PrimitiveKind::Way, mode)?;
                self.current = Some(new_primitive(PrimitiveKind::Way, attrs, action, None));
            }
            Element::Relation(attrs) => {
                let action = self.open_action(PrimitiveKind::Relation, mode)?;
                self.current = Some(new_primitive(PrimitiveKind::Relation, attrs, action, None));
            }
            Element::Tag { key, value } => {
                let current = self.current.as_mut().ok_or(OscError::ChildOutsideParent {
                    child: "tag",
                    parent: "primitive",
                })?;
                current.tags.insert(key, value);
            }
            Element::NodeRef { node_ref } => {
                let known = self.nodes.contains_key(&node_ref);
                let current = self.current.as_mut().ok_or(OscError::ChildOutsideParent {
                    child: "nd",
                    parent: "way",
                })?;
                current.node_refs.push(node_ref);
                if !known {
                    self.unresolved.insert(node_ref);
                }
            }
            Element::Member(member) => {
                let current = self.current.as_mut().ok_or(OscError::ChildOutsideParent {
                    child: "member",
                    parent: "relation",
                })?;
                current.members.push(member);
            }
        }
        Ok(())
    }

    fn handle_end(&mut self, kind: ElementKind, mode: ParseMode) {
        match kind {
            ElementKind::Action => {
                self.action = None;
            }
            ElementKind::Node | ElementKind::Way | ElementKind::Relation => {
                if let Some(primitive) = self.current.take() {
                    self.publish(primitive, mode);
                }
            }
            ElementKind::Tag | ElementKind::NodeRef | ElementKind::Member => {}
        }
    }

    /// Resolves the action context for a primitive start.
    fn open_action(&self, kind: PrimitiveKind, mode: ParseMode) -> Result<Action, OscError> {
        match mode {
            ParseMode::Diff => self
                .action
                .ok_or(OscError::PrimitiveOutsideAction { kind }),
            // Lookup responses describe current state, not a change; the
            // placeholder action never leaves the parser.
            ParseMode::Lookup => Ok(self.action.unwrap_or(Action::Modify)),
        }
    }

    fn publish(&mut self, primitive: Primitive, mode: ParseMode) {
        if primitive.kind == PrimitiveKind::Node {
            if let Some(coord) = primitive.coord {
                self.nodes.insert(primitive.id, coord);
                self.unresolved.remove(&primitive.id);
            }
        }

        if mode == ParseMode::Lookup {
            debug!(node = primitive.id, "node resolved via lookup");
            return;
        }

        // Last write wins on duplicate ids within a batch.
        self.primitives.insert(
            PrimitiveRef {
                kind: primitive.kind,
                id: primitive.id,
            },
            primitive,
        );
    }
}

fn new_primitive(
    kind: PrimitiveKind,
    attrs: PrimitiveAttrs,
    action: Action,
    coord: Option<(f64, f64)>,
) -> Primitive {
    Primitive {
        id: attrs.id,
        kind,
        version: attrs.version,
        changeset: attrs.changeset,
        user: attrs.user,
        timestamp: attrs.timestamp,
        action,
        tags: HashMap::new(),
        coord,
        node_refs: Vec::new(),
        members: Vec::new(),
    }
}

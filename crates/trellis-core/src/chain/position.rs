//! Resumable positions inside a node's relationship chain(s)

use super::Direction;
use crate::record::{RelDirection, RelationshipGroupRecord, NO_ID};
use std::collections::BTreeMap;

/// Where relationship loading for one node continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainPosition {
    /// Nothing to load
    Empty,
    /// Non-dense node: one chain, `next` is the next relationship to load
    Single {
        /// Next relationship to load
        next: u64,
    },
    /// Dense node: one cursor per relationship type
    Dense(DenseChainPosition),
}

impl ChainPosition {
    /// Relationship the next load starts from
    pub fn current(&mut self, direction: Direction, types: &[u32]) -> u64 {
        match self {
            ChainPosition::Empty => NO_ID,
            ChainPosition::Single { next } => *next,
            ChainPosition::Dense(dense) => dense.current(direction, types),
        }
    }

    /// Move past the relationship just loaded, whose next pointer is `next`
    pub fn advance(&mut self, next: u64, direction: Direction, types: &[u32]) -> u64 {
        match self {
            ChainPosition::Empty => NO_ID,
            ChainPosition::Single { next: current } => {
                *current = next;
                next
            }
            ChainPosition::Dense(dense) => dense.advance(next, direction, types),
        }
    }

    /// Whether further loads may return relationships
    pub fn has_more(&self, direction: Direction, types: &[u32]) -> bool {
        match self {
            ChainPosition::Empty => false,
            ChainPosition::Single { next } => *next != NO_ID,
            ChainPosition::Dense(dense) => dense.has_more(direction, types),
        }
    }
}

/// Position across the groups of a dense node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenseChainPosition {
    groups: BTreeMap<u32, RelationshipGroupRecord>,
    cursors: BTreeMap<u32, TypeCursor>,
}

impl DenseChainPosition {
    /// Start before the first relationship of every group
    pub fn new(groups: BTreeMap<u32, RelationshipGroupRecord>) -> Self {
        Self {
            groups,
            cursors: BTreeMap::new(),
        }
    }

    /// Relationship types this node has groups for
    pub fn group_types(&self) -> impl Iterator<Item = u32> + '_ {
        self.groups.keys().copied()
    }

    fn type_order(&self, types: &[u32]) -> Vec<u32> {
        if types.is_empty() {
            self.groups.keys().copied().collect()
        } else {
            types.to_vec()
        }
    }

    fn cursor(&mut self, type_id: u32, direction: Direction) -> &mut TypeCursor {
        let groups = &self.groups;
        self.cursors
            .entry(type_id)
            .or_insert_with(|| TypeCursor::new(groups.get(&type_id), direction))
    }

    fn current(&mut self, direction: Direction, types: &[u32]) -> u64 {
        for type_id in self.type_order(types) {
            let cursor = self.cursor(type_id, direction);
            if cursor.has_more() {
                let position = cursor.current();
                if position != NO_ID {
                    return position;
                }
            }
        }
        NO_ID
    }

    fn advance(&mut self, next: u64, direction: Direction, types: &[u32]) -> u64 {
        let mut next = next;
        for type_id in self.type_order(types) {
            let cursor = self.cursor(type_id, direction);
            if cursor.has_more() {
                let position = cursor.advance(next);
                if cursor.has_more() {
                    return position;
                }
                next = NO_ID;
            }
        }
        NO_ID
    }

    fn has_more(&self, _direction: Direction, types: &[u32]) -> bool {
        self.type_order(types)
            .iter()
            .any(|type_id| match self.cursors.get(type_id) {
                Some(cursor) => cursor.has_more(),
                None => self.groups.contains_key(type_id),
            })
    }
}

/// Walks the sub-chains of one group, in out, in, loop order
#[derive(Debug, Clone, PartialEq, Eq)]
struct TypeCursor {
    heads: Vec<u64>,
    index: usize,
    current: u64,
    exhausted: bool,
}

impl TypeCursor {
    fn new(group: Option<&RelationshipGroupRecord>, direction: Direction) -> Self {
        let heads: Vec<u64> = match group {
            Some(group) => RelDirection::ALL
                .iter()
                .filter(|d| direction.includes(**d))
                .map(|d| group.head(*d))
                .collect(),
            None => Vec::new(),
        };
        Self {
            exhausted: heads.is_empty(),
            heads,
            index: 0,
            current: NO_ID,
        }
    }

    fn goto_next_sub_chain(&mut self) -> u64 {
        while self.index < self.heads.len() {
            let head = self.heads[self.index];
            self.index += 1;
            if head != NO_ID {
                self.current = head;
                return head;
            }
        }
        self.exhausted = true;
        self.current = NO_ID;
        NO_ID
    }

    fn current(&mut self) -> u64 {
        if self.current == NO_ID && !self.exhausted {
            self.goto_next_sub_chain()
        } else {
            self.current
        }
    }

    fn advance(&mut self, next: u64) -> u64 {
        if next != NO_ID {
            self.current = next;
            next
        } else {
            self.goto_next_sub_chain()
        }
    }

    fn has_more(&self) -> bool {
        !self.exhausted
    }
}

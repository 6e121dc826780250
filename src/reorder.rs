//! Dense, zero-based `display_order` maintenance for sibling sets.
//!
//! Everything here is pure planning: functions return the updates to apply and never
//! touch storage. A returned batch must be applied all-or-nothing
//! (see `Repository::apply_reorder`), otherwise the sibling set can end up with a
//! duplicated or missing position.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

/// Direction of a single-slot move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Direction {
    Up,
    Down,
}

/// Anything that lives in a sibling set with an explicit position.
pub trait Ordered {
    fn order_id(&self) -> Uuid;
    fn display_order(&self) -> i32;
}

/// ReorderUpdate
///
/// One position change. `previous_order` is the position the plan was computed from;
/// storage uses it as a compare-and-swap token so that a plan computed from a stale
/// listing is rejected instead of corrupting the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ReorderUpdate {
    pub id: Uuid,
    pub previous_order: i32,
    pub new_order: i32,
}

/// move_one_step
///
/// Swaps the target with its immediate neighbour in `direction`.
///
/// `items` must be sorted ascending by `display_order`. Returns an empty plan when the
/// target is already at the edge in that direction (no wrap-around) or is not present;
/// otherwise exactly two updates.
pub fn move_one_step<T: Ordered>(items: &[T], target: Uuid, direction: Direction) -> Vec<ReorderUpdate> {
    let Some(index) = items.iter().position(|item| item.order_id() == target) else {
        return Vec::new();
    };

    let neighbour = match direction {
        Direction::Up if index > 0 => index - 1,
        Direction::Down if index + 1 < items.len() => index + 1,
        _ => return Vec::new(),
    };

    let current = &items[index];
    let other = &items[neighbour];

    vec![
        ReorderUpdate {
            id: current.order_id(),
            previous_order: current.display_order(),
            new_order: other.display_order(),
        },
        ReorderUpdate {
            id: other.order_id(),
            previous_order: other.display_order(),
            new_order: current.display_order(),
        },
    ]
}

/// compact
///
/// Dense renumbering plan: the updates needed so that `items`, taken in their current
/// order, occupy exactly `0..len`. Items already in place are left out.
pub fn compact<T: Ordered>(items: &[T]) -> Vec<ReorderUpdate> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| {
            let target = index as i32;
            (item.display_order() != target).then(|| ReorderUpdate {
                id: item.order_id(),
                previous_order: item.display_order(),
                new_order: target,
            })
        })
        .collect()
}

/// Position a newly created item takes: the end of the sibling set.
pub fn next_position(sibling_count: usize) -> i32 {
    sibling_count as i32
}

/// True when the positions of `items` are exactly `{0, 1, .., len - 1}`.
pub fn is_gapless<T: Ordered>(items: &[T]) -> bool {
    let mut seen = vec![false; items.len()];
    for item in items {
        let order = item.display_order();
        if order < 0 || order as usize >= items.len() || seen[order as usize] {
            return false;
        }
        seen[order as usize] = true;
    }
    true
}

/// Applies a plan to an in-memory listing, keyed by id, and re-sorts it.
pub fn apply_in_place<T, F>(items: &mut [T], updates: &[ReorderUpdate], mut set_order: F)
where
    T: Ordered,
    F: FnMut(&mut T, i32),
{
    for update in updates {
        if let Some(item) = items.iter_mut().find(|item| item.order_id() == update.id) {
            set_order(item, update.new_order);
        }
    }
    items.sort_by_key(|item| item.display_order());
}

/// Position
///
/// Whether an item can move up or down, derived from its place in the full sibling set.
/// Recomputed from the current sequence every time; never stored alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Position {
    pub is_first: bool,
    pub is_last: bool,
}

impl Position {
    pub fn within(index: usize, len: usize) -> Self {
        Self {
            is_first: index == 0,
            is_last: index + 1 >= len,
        }
    }

    /// Position of `target` inside `items` (sorted by `display_order`).
    pub fn of<T: Ordered>(items: &[T], target: Uuid) -> Option<Self> {
        items
            .iter()
            .position(|item| item.order_id() == target)
            .map(|index| Self::within(index, items.len()))
    }
}

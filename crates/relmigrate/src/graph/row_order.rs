//! Row ordering for tables with a single self-referencing FK column.

use std::collections::{HashMap, VecDeque};

use crate::core::{Row, RowId};

/// Rows sorted parent-before-child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowOrder {
    /// Every input row exactly once.
    pub rows: Vec<Row>,

    /// Whether some rows could not be ordered.
    pub has_cycle: bool,

    /// Ids of the rows appended by the cycle fallback, in input order.
    pub unresolved: Vec<RowId>,
}

/// Order rows so that each row comes after its parent.
///
/// A row depends on its parent only if the parent's id is present in `rows`.
/// A NULL parent, or one that points outside the set (already migrated or
/// absent), is treated as resolved. A row that names itself as parent can
/// never be ordered and is reported through the cycle fallback.
///
/// Ready rows keep input order, so sorting an already sorted list returns it
/// unchanged.
pub fn sort_rows(rows: Vec<Row>, parent_column: &str, key_column: &str) -> RowOrder {
    let ids: Vec<Option<RowId>> = rows.iter().map(|r| r.id(key_column)).collect();
    let position: HashMap<&RowId, usize> = ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| id.as_ref().map(|id| (id, i)))
        .collect();

    let mut blocked = vec![false; rows.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); rows.len()];

    for (i, row) in rows.iter().enumerate() {
        let Some(parent) = row.id(parent_column) else {
            continue;
        };
        if let Some(&p) = position.get(&parent) {
            blocked[i] = true;
            children[p].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..rows.len()).filter(|&i| !blocked[i]).collect();
    let mut placed = vec![false; rows.len()];
    let mut order = Vec::with_capacity(rows.len());

    while let Some(i) = queue.pop_front() {
        placed[i] = true;
        order.push(i);
        for &child in &children[i] {
            if !placed[child] {
                blocked[child] = false;
                queue.push_back(child);
            }
        }
    }

    let unresolved_idx: Vec<usize> = (0..rows.len()).filter(|&i| !placed[i]).collect();
    let unresolved: Vec<RowId> = unresolved_idx
        .iter()
        .filter_map(|&i| ids[i].clone())
        .collect();
    let has_cycle = !unresolved_idx.is_empty();
    order.extend(unresolved_idx);

    let mut slots: Vec<Option<Row>> = rows.into_iter().map(Some).collect();
    let rows = order.into_iter().filter_map(|i| slots[i].take()).collect();

    RowOrder {
        rows,
        has_cycle,
        unresolved,
    }
}

//! Sibling tree maintenance for directory entries.
//!
//! Readers that navigate by tree expect each storage's children to form a
//! binary search tree ordered by the directory comparator:
//!
//! 1. **Shorter names first**
//! 2. **Then case-insensitive alphabetical order** for equal lengths
//! 3. `_VBA_PROJECT` sorts last and names starting with `__` sort late
//!
//! The midpoint of the sorted list becomes the parent's child. Earlier
//! entries chain off it through `previous` and later ones through `next`.

use std::cmp::Ordering;
use std::collections::HashSet;

use super::super::consts::NOSTREAM;
use super::super::storage::Storage;

/// Directory comparator on entry names.
pub fn compare_names(name1: &str, name2: &str) -> Ordering {
    let len1 = name1.encode_utf16().count();
    let len2 = name2.encode_utf16().count();
    match len1.cmp(&len2) {
        Ordering::Equal => {
            if name1 == "_VBA_PROJECT" {
                return Ordering::Greater;
            }
            if name2 == "_VBA_PROJECT" {
                return Ordering::Less;
            }
            if name1.starts_with("__") && name2.starts_with("__") {
                return name1.to_uppercase().cmp(&name2.to_uppercase());
            }
            if name1.starts_with("__") {
                return Ordering::Greater;
            }
            if name2.starts_with("__") {
                return Ordering::Less;
            }
            name1.to_uppercase().cmp(&name2.to_uppercase())
        },
        other => other,
    }
}

/// Entries reachable from `parent`'s child link through sibling links.
///
/// Corrupt links (out of range or revisiting an entry) are ignored.
pub fn children_of(entries: &[Storage], parent: usize) -> Vec<usize> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let Some(start) = entries.get(parent).map(Storage::child) else {
        return found;
    };

    let mut stack = vec![start];
    while let Some(link) = stack.pop() {
        let Ok(id) = usize::try_from(link) else {
            continue;
        };
        if id == parent || id >= entries.len() || !seen.insert(id) {
            continue;
        }
        found.push(id);
        stack.push(entries[id].previous());
        stack.push(entries[id].next());
    }
    found
}

/// Link `parent`'s children using the comparator and midpoint rules.
pub fn link_children(parent: usize, children: &[usize], entries: &mut [Storage]) {
    if children.is_empty() {
        entries[parent].set_child(NOSTREAM);
        return;
    }

    let mut sorted = children.to_vec();
    sorted.sort_by(|&a, &b| compare_names(entries[a].name(), entries[b].name()));

    let link = |id: usize| id as i32;
    let midpoint = sorted.len() / 2;
    entries[parent].set_child(link(sorted[midpoint]));

    for &id in &sorted {
        entries[id].set_previous(NOSTREAM);
        entries[id].set_next(NOSTREAM);
    }

    // Left chain down to the first entry
    for j in 1..=midpoint {
        entries[sorted[j]].set_previous(link(sorted[j - 1]));
    }

    // Right chain up to the last entry
    for j in midpoint..sorted.len() - 1 {
        entries[sorted[j]].set_next(link(sorted[j + 1]));
    }
}

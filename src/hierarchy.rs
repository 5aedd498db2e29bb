use std::collections::{HashMap, HashSet};

use crate::models::Franchise;

/// A franchise with its child subtrees, as reconstructed from the flat
/// adjacency-list rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FranchiseNode {
    pub franchise: Franchise,
    pub children: Vec<FranchiseNode>,
}

/// Annotate flat adjacency-list rows with their depth and emit them in
/// canonical order: depth-first pre-order, parents before descendants,
/// siblings and roots sorted by name (id as tie-break).
///
/// Rows whose recorded parent does not resolve within the input are kept
/// as top-level items after the connected forest, and rows caught in a
/// parent cycle are surfaced the same way, so no input row is ever
/// dropped. Traversal uses an explicit stack; input depth is untrusted.
pub fn annotate_depth(rows: Vec<Franchise>) -> Vec<Franchise> {
    let ids: HashSet<i64> = rows.iter().map(|f| f.id).collect();

    let mut roots: Vec<usize> = Vec::new();
    let mut orphans: Vec<usize> = Vec::new();
    let mut children: HashMap<i64, Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        match row.parent_id {
            None => roots.push(idx),
            Some(pid) if pid != row.id && ids.contains(&pid) => {
                children.entry(pid).or_default().push(idx);
            }
            // dangling parent, or a row naming itself as parent
            Some(_) => orphans.push(idx),
        }
    }

    let by_name = |a: &usize, b: &usize| {
        (rows[*a].name.as_str(), rows[*a].id).cmp(&(rows[*b].name.as_str(), rows[*b].id))
    };
    roots.sort_by(by_name);
    orphans.sort_by(|a, b| {
        (rows[*a].parent_id, rows[*a].name.as_str(), rows[*a].id).cmp(&(
            rows[*b].parent_id,
            rows[*b].name.as_str(),
            rows[*b].id,
        ))
    });
    for list in children.values_mut() {
        list.sort_by(by_name);
    }

    let mut visited = vec![false; rows.len()];
    let mut out: Vec<Franchise> = Vec::with_capacity(rows.len());

    let walk = |start: usize, visited: &mut Vec<bool>, out: &mut Vec<Franchise>| {
        let mut stack = vec![(start, 0u32)];
        while let Some((idx, depth)) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            let mut franchise = rows[idx].clone();
            franchise.depth = depth;
            out.push(franchise);
            if let Some(kids) = children.get(&rows[idx].id) {
                for &kid in kids.iter().rev() {
                    stack.push((kid, depth + 1));
                }
            }
        }
    };

    for &idx in &roots {
        walk(idx, &mut visited, &mut out);
    }
    for &idx in &orphans {
        walk(idx, &mut visited, &mut out);
    }

    // rows still unvisited sit on a parent cycle with no way in; emit each
    // as a top-level item and let the walk pick up its descendants
    let mut leftovers: Vec<usize> = (0..rows.len()).filter(|&i| !visited[i]).collect();
    leftovers.sort_by(by_name);
    for idx in leftovers {
        if !visited[idx] {
            walk(idx, &mut visited, &mut out);
        }
    }

    out
}

/// Nest flat adjacency-list rows into trees. A row with no parent becomes
/// a root; a row whose parent resolves becomes that parent's child; a row
/// whose parent is missing falls back to a root rather than being dropped.
pub fn build_tree(rows: Vec<Franchise>) -> Vec<FranchiseNode> {
    let annotated = annotate_depth(rows);

    // assemble bottom-up: walking the canonical order in reverse means a
    // parent is reached only after all of its children are pending
    let mut pending: HashMap<i64, Vec<FranchiseNode>> = HashMap::new();
    let mut roots: Vec<FranchiseNode> = Vec::new();
    for franchise in annotated.into_iter().rev() {
        let mut children = pending.remove(&franchise.id).unwrap_or_default();
        children.reverse();
        match (franchise.depth, franchise.parent_id) {
            (depth, Some(parent)) if depth > 0 => {
                pending
                    .entry(parent)
                    .or_default()
                    .push(FranchiseNode { franchise, children });
            }
            _ => roots.push(FranchiseNode { franchise, children }),
        }
    }

    roots.reverse();
    roots
}

/// Flatten edited trees back into the linear list the store rewrites.
/// Pre-order, each node exactly once; consuming the nodes disconnects the
/// child collections so a repeat flatten of the same data cannot emit
/// duplicates. Selection filtering is the caller's job.
pub fn flatten_tree(nodes: Vec<FranchiseNode>) -> Vec<Franchise> {
    let mut out = Vec::new();
    let mut stack: Vec<FranchiseNode> = nodes.into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        let FranchiseNode {
            franchise,
            children,
        } = node;
        out.push(franchise);
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    out
}

/// In-memory counterpart of the stored name search: keeps rows whose name
/// contains the term (case-insensitive), matching on the row's own name
/// only. Depth values and relative order are preserved, so ancestors of a
/// match that do not themselves match are omitted.
pub fn filter_by_name(rows: &[Franchise], term: &str) -> Vec<Franchise> {
    let needle = term.to_lowercase();
    rows.iter()
        .filter(|f| f.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

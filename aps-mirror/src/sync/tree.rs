use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use serde::Serialize;

use crate::storage::{ContentKind, ContentRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub record: ContentRecord,
    pub children: Vec<TreeNode>,
}

/// Nests flat content rows by `parent_id`.
///
/// Rows whose parent is not among `contents` become roots, so top folders
/// (parented to the project marker) surface at the first level. Siblings are
/// ordered by name, case-insensitively, then newest first.
pub fn build_tree(contents: Vec<ContentRecord>) -> Vec<TreeNode> {
    let present: HashSet<String> = contents.iter().map(|row| row.id.clone()).collect();
    let mut roots = Vec::new();
    let mut by_parent: HashMap<String, Vec<ContentRecord>> = HashMap::new();
    for row in contents {
        if row.parent_id != row.id && present.contains(&row.parent_id) {
            by_parent.entry(row.parent_id.clone()).or_default().push(row);
        } else {
            roots.push(row);
        }
    }

    let mut nodes = attach(roots, &mut by_parent);
    // Rows left here sit on a parent cycle that no root reaches.
    let mut stranded: Vec<ContentRecord> = by_parent.into_values().flatten().collect();
    if !stranded.is_empty() {
        tracing::warn!(count = stranded.len(), "content rows form a parent cycle");
        sort_siblings(&mut stranded);
        nodes.extend(stranded.into_iter().map(|record| TreeNode {
            record,
            children: Vec::new(),
        }));
    }
    nodes
}

fn attach(
    mut rows: Vec<ContentRecord>,
    by_parent: &mut HashMap<String, Vec<ContentRecord>>,
) -> Vec<TreeNode> {
    sort_siblings(&mut rows);
    rows.into_iter()
        .map(|record| {
            let children = by_parent.remove(&record.id).unwrap_or_default();
            TreeNode {
                children: attach(children, by_parent),
                record,
            }
        })
        .collect()
}

fn sort_siblings(rows: &mut [ContentRecord]) {
    rows.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
}

/// Rows of `project_id` whose parent is neither another row of the same
/// project nor the project itself. An intact mirror has none.
pub fn orphans<'a>(project_id: &str, contents: &'a [ContentRecord]) -> Vec<&'a ContentRecord> {
    let ids: HashSet<&str> = contents
        .iter()
        .filter(|row| row.project_id == project_id)
        .map(|row| row.id.as_str())
        .collect();
    contents
        .iter()
        .filter(|row| row.project_id == project_id)
        .filter(|row| row.parent_id != project_id && !ids.contains(row.parent_id.as_str()))
        .collect()
}

pub fn render_tree(nodes: &[TreeNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, 0, &mut out);
    }
    out
}

fn render_node(node: &TreeNode, level: usize, out: &mut String) {
    let record = &node.record;
    let marker = match record.kind {
        ContentKind::Folder => "[dir]",
        ContentKind::Item => match record.translated {
            Some(true) => "[ready]",
            Some(false) => "[pending]",
            None => "[?]",
        },
    };
    let _ = writeln!(
        out,
        "{:indent$}{marker} {} ({})",
        "",
        record.name,
        record.id,
        indent = level * 2
    );
    for child in &node.children {
        render_node(child, level + 1, out);
    }
}

//! `careplan menu` and capability gating for operator commands.
//!
//! Commands are gated by the menu entry they belong to, so what `menu` shows
//! is exactly what the operator may run.

use std::collections::BTreeSet;

use anyhow::{Result, bail};

use careplan_core::access::{Capability, NavNode, operator_menu, visible_nodes};

/// Print the menu entries visible to `held`, indented by depth.
pub fn run_menu(held: &BTreeSet<Capability>, json: bool) -> Result<()> {
    let visible = visible_nodes(&operator_menu(), held);
    if json {
        println!("{}", serde_json::to_string_pretty(&visible)?);
        return Ok(());
    }
    for line in render(&visible, 0) {
        println!("{line}");
    }
    Ok(())
}

fn render(nodes: &[NavNode], depth: usize) -> Vec<String> {
    nodes
        .iter()
        .flat_map(|node| {
            let line = format!("{:indent$}{:<18} {}", "", node.id, node.label, indent = depth * 2);
            std::iter::once(line).chain(render(&node.children, depth + 1))
        })
        .collect()
}

/// Fail unless the menu entry `id` and every ancestor are visible to `held`.
pub fn require(held: &BTreeSet<Capability>, id: &str) -> Result<()> {
    let Some(path) = path_to(&operator_menu(), id) else {
        bail!("unknown menu entry: {id}");
    };
    for node in &path {
        if !node.requirement.is_satisfied_by(held) {
            bail!(
                "permission denied for {id}: requires {}",
                node.requirement
            );
        }
    }
    Ok(())
}

fn path_to(nodes: &[NavNode], id: &str) -> Option<Vec<NavNode>> {
    for node in nodes {
        if node.id == id {
            return Some(vec![node.clone()]);
        }
        if let Some(mut rest) = path_to(&node.children, id) {
            rest.insert(0, node.clone());
            return Some(rest);
        }
    }
    None
}

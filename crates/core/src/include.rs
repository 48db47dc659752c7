//! Navigation include planning: dotted paths become a join tree with
//! deterministic table aliases, an extended SELECT list, and LEFT JOIN
//! clauses.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::entity::{EntityDescriptor, RelationshipEdge};
use crate::error::{IncludeError, Result};

pub const BASE_ALIAS: &str = "t0";
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 5;

#[derive(Debug)]
pub struct IncludeNode {
    pub navigation: String,
    pub nav_index: usize,
    pub edge: RelationshipEdge,
    pub descriptor: Arc<EntityDescriptor>,
    pub alias: String,
    /// Second alias allocated for the junction table of a many-to-many
    /// edge.
    pub junction_alias: Option<String>,
    pub is_collection: bool,
    pub children: Vec<IncludeNode>,
}

impl IncludeNode {
    /// Column prefix carried by this node's columns in the joined SELECT
    /// list (`t1_` for alias `t1`).
    #[must_use]
    pub fn column_prefix(&self) -> String {
        format!("{}_", self.alias)
    }
}

#[derive(Debug)]
pub struct JoinPlan {
    pub base: Arc<EntityDescriptor>,
    pub roots: Vec<IncludeNode>,
    pub select_list: String,
    pub join_clauses: String,
    pub has_collection: bool,
}

impl JoinPlan {
    /// Resolves a navigation chain to its planned node.
    #[must_use]
    pub fn node_for_path(&self, segments: &[String]) -> Option<&IncludeNode> {
        let mut nodes = &self.roots;
        let mut found = None;
        for segment in segments {
            let node = nodes.iter().find(|node| &node.navigation == segment)?;
            nodes = &node.children;
            found = Some(node);
        }
        found
    }
}

/// Plans the join tree for the requested include paths.
///
/// Shared prefixes reuse one node; aliases `t1`, `t2`, … are assigned in
/// insertion order, so planning is deterministic for a given textual path
/// order and the node set is insensitive to reordering.
pub fn plan_includes(
    base: Arc<EntityDescriptor>,
    paths: &[String],
    dialect: &dyn Dialect,
    max_depth: usize,
) -> Result<JoinPlan> {
    let mut roots: Vec<IncludeNode> = Vec::new();
    let mut next_alias = 1usize;

    for raw_path in paths {
        let segments: Vec<&str> = raw_path.split('.').collect();
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(IncludeError::MalformedPath {
                path: raw_path.clone(),
            }
            .into());
        }
        if segments.len() > max_depth {
            return Err(IncludeError::DepthExceeded {
                path: raw_path.clone(),
                limit: max_depth,
            }
            .into());
        }

        let mut current_descriptor = Arc::clone(&base);
        let mut nodes = &mut roots;
        for segment in segments {
            let position = nodes.iter().position(|node| node.navigation == segment);
            let index = match position {
                Some(index) => index,
                None => {
                    let node = new_node(
                        &current_descriptor,
                        segment,
                        raw_path,
                        &mut next_alias,
                    )?;
                    nodes.push(node);
                    nodes.len() - 1
                }
            };
            current_descriptor = Arc::clone(&nodes[index].descriptor);
            nodes = &mut nodes[index].children;
        }
    }

    let mut select_list = format!("{BASE_ALIAS}.*");
    let mut join_clauses = String::new();
    let mut has_collection = false;
    for node in &roots {
        render_node(
            node,
            BASE_ALIAS,
            &base,
            dialect,
            &mut select_list,
            &mut join_clauses,
            &mut has_collection,
        );
    }

    Ok(JoinPlan {
        base,
        roots,
        select_list,
        join_clauses,
        has_collection,
    })
}

fn new_node(
    parent: &Arc<EntityDescriptor>,
    segment: &str,
    raw_path: &str,
    next_alias: &mut usize,
) -> Result<IncludeNode> {
    let Some((nav_index, navigation)) = parent.navigation(segment) else {
        return Err(IncludeError::UnknownNavigation {
            path: raw_path.to_string(),
            segment: segment.to_string(),
            type_name: parent.type_name.to_string(),
        }
        .into());
    };

    let descriptor = navigation.target()?;
    let alias = format!("t{next_alias}");
    *next_alias += 1;
    let junction_alias = if matches!(navigation.edge, RelationshipEdge::ManyToMany { .. }) {
        let alias = format!("t{next_alias}");
        *next_alias += 1;
        Some(alias)
    } else {
        None
    };

    Ok(IncludeNode {
        navigation: segment.to_string(),
        nav_index,
        edge: navigation.edge.clone(),
        descriptor,
        alias,
        junction_alias,
        is_collection: navigation.is_collection(),
        children: Vec::new(),
    })
}

fn render_node(
    node: &IncludeNode,
    parent_alias: &str,
    parent: &Arc<EntityDescriptor>,
    dialect: &dyn Dialect,
    select_list: &mut String,
    join_clauses: &mut String,
    has_collection: &mut bool,
) {
    *has_collection |= node.is_collection;

    for column in &node.descriptor.columns {
        write!(
            select_list,
            ", {}.{} AS {}",
            node.alias,
            dialect.quote_ident(&column.name),
            dialect.quote_ident(&format!("{}_{}", node.alias, column.name)),
        )
        .expect("writing to String should not fail");
    }

    if !join_clauses.is_empty() {
        join_clauses.push(' ');
    }

    let target_table = dialect.quote_ident(&node.descriptor.table);
    match &node.edge {
        RelationshipEdge::ToOne {
            owner_fk,
            target_column,
        } => {
            let referenced = target_column
                .clone()
                .unwrap_or_else(|| node.descriptor.primary_key().name.clone());
            write!(
                join_clauses,
                "LEFT JOIN {target_table} {} ON {parent_alias}.{} = {}.{}",
                node.alias,
                dialect.quote_ident(owner_fk),
                node.alias,
                dialect.quote_ident(&referenced),
            )
            .expect("writing to String should not fail");
        }
        RelationshipEdge::ToMany { inverse_fk } => {
            write!(
                join_clauses,
                "LEFT JOIN {target_table} {} ON {}.{} = {parent_alias}.{}",
                node.alias,
                node.alias,
                dialect.quote_ident(inverse_fk),
                dialect.quote_ident(&parent.primary_key().name),
            )
            .expect("writing to String should not fail");
        }
        RelationshipEdge::ManyToMany {
            junction_table,
            left_fk,
            right_fk,
        } => {
            let junction_alias = node
                .junction_alias
                .as_deref()
                .expect("many-to-many node always carries a junction alias");
            write!(
                join_clauses,
                "LEFT JOIN {} {junction_alias} ON {parent_alias}.{} = {junction_alias}.{} \
                 LEFT JOIN {target_table} {} ON {junction_alias}.{} = {}.{}",
                dialect.quote_ident(junction_table),
                dialect.quote_ident(&parent.primary_key().name),
                dialect.quote_ident(left_fk),
                node.alias,
                dialect.quote_ident(right_fk),
                node.alias,
                dialect.quote_ident(&node.descriptor.primary_key().name),
            )
            .expect("writing to String should not fail");
        }
    }

    for child in &node.children {
        render_node(
            child,
            &node.alias,
            &node.descriptor,
            dialect,
            select_list,
            join_clauses,
            has_collection,
        );
    }
}

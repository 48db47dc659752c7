//! Folds row streams back into entities and entity graphs.
//!
//! The joined path keys every materialised instance by the chain of
//! primary-key values from the base row down, so duplicates collapse and
//! collections receive each child once. Children are assembled depth-first
//! before being attached, deepest level first, so a child already carries
//! its own graph when it moves into its parent.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{StreamExt, TryStreamExt, stream};
use indexmap::IndexMap;

use crate::convert::from_wire;
use crate::entity::{Entity, EntityDescriptor, descriptor_for};
use crate::error::{Error, MaterializeError, Result};
use crate::include::{IncludeNode, JoinPlan};
use crate::row::{Row, RowStream};
use crate::value::ValueKey;

pub type EntityStream<'a, T> = futures_util::stream::BoxStream<'a, Result<T>>;

/// Materialises one entity per row; no include plan.
pub fn materialize_rows<T: Entity>(rows: &[Row]) -> Result<Vec<T>> {
    let descriptor = descriptor_for::<T>()?;
    rows.iter()
        .map(|row| typed_entity::<T>(&descriptor, row))
        .collect()
}

/// Materialises an entity graph following the include plan, deduplicating
/// base entities and collection children by primary key. Output preserves
/// the first-seen order of base rows.
pub fn materialize_graph<T: Entity>(rows: &[Row], plan: &JoinPlan) -> Result<Vec<T>> {
    let shape = GraphShape::from_plan(plan);
    let mut assembler = GraphAssembler::new(&shape);
    for row in rows {
        assembler.consume(row)?;
    }
    assembler.finish::<T>()
}

/// Streaming variant of the simple path.
pub fn materialize_stream<'a, T: Entity>(rows: RowStream<'a>) -> EntityStream<'a, T> {
    Box::pin(rows.and_then(|row| async move {
        let descriptor = descriptor_for::<T>()?;
        typed_entity::<T>(&descriptor, &row)
    }))
}

/// Streaming variant of the joined path.
///
/// Requires base rows to arrive in contiguous runs per primary key (the
/// builder's injected ordering guarantees this); a key that reappears
/// after its run has been flushed is an error.
pub fn materialize_graph_stream<'a, T: Entity>(
    rows: RowStream<'a>,
    shape: GraphShape,
) -> EntityStream<'a, T> {
    let state = RunState {
        rows,
        shape,
        assembler: None,
        current_key: None,
        flushed: HashSet::new(),
        done: false,
    };

    Box::pin(stream::try_unfold(state, |mut state| async move {
        loop {
            if state.done {
                return Ok(None);
            }
            match state.rows.next().await {
                Some(Err(error)) => return Err(error),
                Some(Ok(row)) => {
                    if let Some(entity) = state.push_row::<T>(&row)? {
                        return Ok(Some((entity, state)));
                    }
                }
                None => {
                    state.done = true;
                    if let Some(entity) = state.flush::<T>()? {
                        return Ok(Some((entity, state)));
                    }
                    return Ok(None);
                }
            }
        }
    }))
}

/// Owned, cloneable skeleton of a join plan: everything the assembler
/// needs, detached from the plan's lifetime so streams can carry it.
#[derive(Debug, Clone)]
pub struct GraphShape {
    base: Arc<EntityDescriptor>,
    nodes: Vec<ShapeNode>,
    roots: Vec<usize>,
}

#[derive(Debug, Clone)]
struct ShapeNode {
    column_prefix: String,
    descriptor: Arc<EntityDescriptor>,
    parent_descriptor: Arc<EntityDescriptor>,
    nav_index: usize,
    children: Vec<usize>,
}

impl GraphShape {
    #[must_use]
    pub fn from_plan(plan: &JoinPlan) -> Self {
        let mut nodes = Vec::new();
        let mut roots = Vec::new();
        for node in &plan.roots {
            roots.push(flatten(node, Arc::clone(&plan.base), &mut nodes));
        }
        Self {
            base: Arc::clone(&plan.base),
            nodes,
            roots,
        }
    }
}

fn flatten(
    node: &IncludeNode,
    parent_descriptor: Arc<EntityDescriptor>,
    nodes: &mut Vec<ShapeNode>,
) -> usize {
    let index = nodes.len();
    nodes.push(ShapeNode {
        column_prefix: node.column_prefix(),
        descriptor: Arc::clone(&node.descriptor),
        parent_descriptor,
        nav_index: node.nav_index,
        children: Vec::new(),
    });
    for child in &node.children {
        let child_index = flatten(child, Arc::clone(&node.descriptor), nodes);
        nodes[index].children.push(child_index);
    }
    index
}

struct RunState<'a> {
    rows: RowStream<'a>,
    shape: GraphShape,
    assembler: Option<GraphAssembler>,
    current_key: Option<ValueKey>,
    flushed: HashSet<ValueKey>,
    done: bool,
}

impl RunState<'_> {
    fn push_row<T: Entity>(&mut self, row: &Row) -> Result<Option<T>> {
        let key = base_key(&self.shape.base, row)?;
        if self.flushed.contains(&key) {
            return Err(MaterializeError::NonContiguousRun {
                key: format!("{:?}", key.0),
            }
            .into());
        }

        let mut completed = None;
        if self.current_key.as_ref() != Some(&key) {
            completed = self.flush::<T>()?;
            self.current_key = Some(key);
            self.assembler = Some(GraphAssembler::new(&self.shape));
        }
        self.assembler
            .as_mut()
            .expect("assembler exists while a run is open")
            .consume(row)?;
        Ok(completed)
    }

    fn flush<T: Entity>(&mut self) -> Result<Option<T>> {
        let Some(assembler) = self.assembler.take() else {
            return Ok(None);
        };
        if let Some(key) = self.current_key.take() {
            self.flushed.insert(key);
        }
        let mut entities = assembler.finish::<T>()?;
        Ok(entities.pop())
    }
}

fn base_key(base: &Arc<EntityDescriptor>, row: &Row) -> Result<ValueKey> {
    let pk = base.primary_key();
    let raw = row
        .get(&pk.name)
        .ok_or_else(|| missing_column(&pk.name, base.type_name))?;
    let converted = from_wire(raw, pk.value_type, false)
        .map_err(|source| conversion_error(&pk.name, source))?;
    Ok(ValueKey(converted))
}

fn typed_entity<T: Entity>(descriptor: &Arc<EntityDescriptor>, row: &Row) -> Result<T> {
    let materialized = entity_from_row(descriptor, row, "")?;
    downcast::<T>(materialized)
}

fn downcast<T: Entity>(instance: Box<dyn Any + Send>) -> Result<T> {
    instance.downcast::<T>().map(|boxed| *boxed).map_err(|_| {
        Error::Materialize(MaterializeError::TypeMismatch {
            expected: std::any::type_name::<T>(),
        })
    })
}

/// Builds one instance from a row, reading columns under `prefix`. Unknown
/// row columns are ignored; absent required (non-nullable) columns fail.
fn entity_from_row(
    descriptor: &Arc<EntityDescriptor>,
    row: &Row,
    prefix: &str,
) -> Result<Box<dyn Any + Send>> {
    let mut instance = descriptor.new_instance();
    for column in &descriptor.columns {
        let label = format!("{prefix}{}", column.name);
        let Some(raw) = row.get(&label) else {
            if column.flags.nullable {
                continue;
            }
            return Err(missing_column(&column.name, descriptor.type_name));
        };
        let converted = from_wire(raw, column.value_type, column.flags.nullable)
            .map_err(|source| conversion_error(&column.name, source))?;
        column.set(instance.as_mut(), converted)?;
    }
    Ok(instance)
}

fn missing_column(column: &str, type_name: &'static str) -> Error {
    Error::Materialize(MaterializeError::MissingColumn {
        column: column.to_string(),
        type_name,
    })
}

fn conversion_error(column: &str, source: crate::error::ValueError) -> Error {
    Error::Materialize(MaterializeError::Conversion {
        column: column.to_string(),
        source,
    })
}

/// Chain of primary-key values from the base row down to an instance;
/// identity for deduplication.
type KeyChain = Vec<ValueKey>;

struct GraphAssembler {
    shape: GraphShape,
    bases: IndexMap<ValueKey, Box<dyn Any + Send>>,
    instances: Vec<IndexMap<KeyChain, Box<dyn Any + Send>>>,
}

impl GraphAssembler {
    fn new(shape: &GraphShape) -> Self {
        Self {
            shape: shape.clone(),
            bases: IndexMap::new(),
            instances: shape.nodes.iter().map(|_| IndexMap::new()).collect(),
        }
    }

    fn consume(&mut self, row: &Row) -> Result<()> {
        let key = base_key(&self.shape.base, row)?;
        if !self.bases.contains_key(&key) {
            let base = entity_from_row(&self.shape.base, row, "")?;
            self.bases.insert(key.clone(), base);
        }

        let chain = vec![key];
        for root in self.shape.roots.clone() {
            self.visit(root, &chain, row)?;
        }
        Ok(())
    }

    fn visit(&mut self, index: usize, parent_chain: &KeyChain, row: &Row) -> Result<()> {
        let node = self.shape.nodes[index].clone();
        let pk = node.descriptor.primary_key();
        let label = format!("{}{}", node.column_prefix, pk.name);
        let raw = row
            .get(&label)
            .ok_or_else(|| missing_column(&label, node.descriptor.type_name))?;
        // A null child primary key means the LEFT JOIN found no match.
        if raw.is_null() {
            return Ok(());
        }
        let converted = from_wire(raw, pk.value_type, false)
            .map_err(|source| conversion_error(&pk.name, source))?;

        let mut chain = parent_chain.clone();
        chain.push(ValueKey(converted));

        if !self.instances[index].contains_key(&chain) {
            let instance = entity_from_row(&node.descriptor, row, &node.column_prefix)?;
            self.instances[index].insert(chain.clone(), instance);
        }

        for child in &node.children {
            self.visit(*child, &chain, row)?;
        }
        Ok(())
    }

    fn finish<T: Entity>(mut self) -> Result<Vec<T>> {
        // Deepest nodes first, so an instance is complete before it moves
        // into its parent.
        for index in (0..self.shape.nodes.len()).rev() {
            let instances = std::mem::take(&mut self.instances[index]);
            let node = self.shape.nodes[index].clone();
            let navigation = &node.parent_descriptor.navigations[node.nav_index];

            for (chain, instance) in instances {
                let parent_chain = &chain[..chain.len() - 1];
                let parent = if parent_chain.len() == 1 {
                    self.bases
                        .get_mut(&parent_chain[0])
                        .expect("base instance exists for every child chain")
                } else {
                    let parent_index = self
                        .shape
                        .nodes
                        .iter()
                        .position(|candidate| candidate.children.contains(&index))
                        .expect("non-root node has a parent");
                    self.instances[parent_index]
                        .get_mut(parent_chain)
                        .expect("parent instance exists for every child chain")
                };
                navigation.attach(parent.as_mut(), instance)?;
            }
        }

        self.bases.into_values().map(downcast::<T>).collect()
    }
}

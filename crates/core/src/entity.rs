//! Entity metadata: descriptors, relationship edges, and the process-wide
//! registry.
//!
//! Descriptors are declared once per type through [`EntityBuilder`] and
//! cached by `TypeId`; the hot path never rebuilds them. Field access is
//! carried by getter/setter closures so the materialiser can work with
//! type-erased instances when walking an include plan.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use indexmap::IndexMap;

use crate::error::{Error, MaterializeError, MetadataError, Result, ValueError};
use crate::value::{Value, ValueType};

pub type Getter = Arc<dyn Fn(&dyn Any) -> Result<Value> + Send + Sync>;
pub type Setter = Arc<dyn Fn(&mut dyn Any, Value) -> Result<()> + Send + Sync>;
type Attach = Arc<dyn Fn(&mut dyn Any, Box<dyn Any + Send>) -> Result<()> + Send + Sync>;
type DescriptorThunk = fn() -> Result<Arc<EntityDescriptor>>;

/// Per-column flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColumnFlags {
    pub primary_key: bool,
    pub auto_increment: bool,
    pub string_preferred: bool,
    pub nullable: bool,
    pub indexed: bool,
}

/// Membership of a column in a named index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub order: u32,
    pub unique: bool,
}

/// Entity-level index over several columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// How a navigation reaches its target table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipEdge {
    /// The owner carries the foreign key. `target_column` names the
    /// referenced column when it is not the target's primary key.
    ToOne {
        owner_fk: String,
        target_column: Option<String>,
    },
    /// The target carries the foreign key back to the owner.
    ToMany { inverse_fk: String },
    /// A junction table carries both foreign keys.
    ManyToMany {
        junction_table: String,
        left_fk: String,
        right_fk: String,
    },
}

/// Declarative description of one persisted column.
pub struct ColumnDef {
    name: String,
    value_type: ValueType,
    flags: ColumnFlags,
    sql_type: Option<String>,
    default_literal: Option<String>,
    index: Option<IndexSpec>,
}

impl ColumnDef {
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            flags: ColumnFlags::default(),
            sql_type: None,
            default_literal: None,
            index: None,
        }
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.flags.primary_key = true;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.flags.auto_increment = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.flags.nullable = true;
        self
    }

    #[must_use]
    pub fn string_preferred(mut self) -> Self {
        self.flags.string_preferred = true;
        self
    }

    /// Explicit wire type for DDL, overriding the dialect mapping.
    #[must_use]
    pub fn sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    #[must_use]
    pub fn default_literal(mut self, literal: impl Into<String>) -> Self {
        self.default_literal = Some(literal.into());
        self
    }

    /// Declares membership in a named index; `order` sorts columns within
    /// the index.
    #[must_use]
    pub fn index(mut self, name: impl Into<String>, order: u32, unique: bool) -> Self {
        self.flags.indexed = true;
        self.index = Some(IndexSpec {
            name: name.into(),
            order,
            unique,
        });
        self
    }
}

pub struct ColumnDescriptor {
    pub name: String,
    pub value_type: ValueType,
    pub flags: ColumnFlags,
    pub sql_type: Option<String>,
    pub default_literal: Option<String>,
    pub index: Option<IndexSpec>,
    getter: Getter,
    setter: Setter,
}

impl ColumnDescriptor {
    pub fn get(&self, entity: &dyn Any) -> Result<Value> {
        (self.getter)(entity)
    }

    pub fn set(&self, entity: &mut dyn Any, value: Value) -> Result<()> {
        (self.setter)(entity, value)
    }
}

impl fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("flags", &self.flags)
            .field("sql_type", &self.sql_type)
            .finish_non_exhaustive()
    }
}

pub struct NavigationDescriptor {
    pub name: String,
    pub edge: RelationshipEdge,
    target: DescriptorThunk,
    attach: Attach,
}

impl NavigationDescriptor {
    /// Resolves the target descriptor through the registry.
    pub fn target(&self) -> Result<Arc<EntityDescriptor>> {
        (self.target)()
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(
            self.edge,
            RelationshipEdge::ToMany { .. } | RelationshipEdge::ManyToMany { .. }
        )
    }

    pub fn attach(&self, parent: &mut dyn Any, child: Box<dyn Any + Send>) -> Result<()> {
        (self.attach)(parent, child)
    }
}

impl fmt::Debug for NavigationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavigationDescriptor")
            .field("name", &self.name)
            .field("edge", &self.edge)
            .finish_non_exhaustive()
    }
}

/// Immutable metadata summary of one mapped type.
pub struct EntityDescriptor {
    pub type_name: &'static str,
    pub table: String,
    pub columns: Vec<ColumnDescriptor>,
    pub navigations: Vec<NavigationDescriptor>,
    pub composite_indexes: Vec<CompositeIndex>,
    primary_key: usize,
    create: fn() -> Box<dyn Any + Send>,
}

impl EntityDescriptor {
    #[must_use]
    pub fn primary_key(&self) -> &ColumnDescriptor {
        &self.columns[self.primary_key]
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|column| column.name == name)
    }

    #[must_use]
    pub fn navigation(&self, name: &str) -> Option<(usize, &NavigationDescriptor)> {
        self.navigations
            .iter()
            .enumerate()
            .find(|(_, navigation)| navigation.name == name)
    }

    /// Ordered mapping from column name to its descriptor, in declaration
    /// order.
    #[must_use]
    pub fn column_map(&self) -> IndexMap<&str, &ColumnDescriptor> {
        self.columns
            .iter()
            .map(|column| (column.name.as_str(), column))
            .collect()
    }

    /// Fresh default-initialised instance for the materialiser.
    #[must_use]
    pub fn new_instance(&self) -> Box<dyn Any + Send> {
        (self.create)()
    }

    pub fn primary_key_value(&self, entity: &dyn Any) -> Result<Value> {
        self.primary_key().get(entity)
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("navigations", &self.navigations)
            .finish_non_exhaustive()
    }
}

/// A domain type mapped to one table.
///
/// `build_descriptor` is the declarative schema; it runs at most once per
/// process, when the registry first sees the type.
pub trait Entity: Default + Send + Sized + 'static {
    fn build_descriptor() -> std::result::Result<EntityDescriptor, MetadataError>;
}

/// Declares the descriptor of an entity type.
pub struct EntityBuilder<T> {
    table: Option<String>,
    columns: Vec<ColumnDescriptor>,
    navigations: Vec<NavigationDescriptor>,
    composite_indexes: Vec<CompositeIndex>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Entity> Default for EntityBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: None,
            columns: Vec::new(),
            navigations: Vec::new(),
            composite_indexes: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    #[must_use]
    pub fn column<G, S>(mut self, def: ColumnDef, get: G, set: S) -> Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> std::result::Result<(), ValueError> + Send + Sync + 'static,
    {
        let column_name = def.name.clone();
        let getter: Getter = Arc::new(move |entity: &dyn Any| {
            let typed = entity
                .downcast_ref::<T>()
                .ok_or(MaterializeError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            Ok(get(typed))
        });
        let setter: Setter = Arc::new(move |entity: &mut dyn Any, value: Value| {
            let typed = entity
                .downcast_mut::<T>()
                .ok_or(MaterializeError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            set(typed, value).map_err(|source| {
                Error::Materialize(MaterializeError::Conversion {
                    column: column_name.clone(),
                    source,
                })
            })
        });

        self.columns.push(ColumnDescriptor {
            name: def.name,
            value_type: def.value_type,
            flags: def.flags,
            sql_type: def.sql_type,
            default_literal: def.default_literal,
            index: def.index,
            getter,
            setter,
        });
        self
    }

    /// Declares a to-one navigation; the owner carries `owner_fk`.
    #[must_use]
    pub fn to_one<Target, A>(self, name: &str, owner_fk: &str, attach: A) -> Self
    where
        Target: Entity,
        A: Fn(&mut T, Target) + Send + Sync + 'static,
    {
        self.navigation::<Target, A>(
            name,
            RelationshipEdge::ToOne {
                owner_fk: owner_fk.to_string(),
                target_column: None,
            },
            attach,
        )
    }

    /// To-one navigation referencing a named column instead of the target's
    /// primary key.
    #[must_use]
    pub fn to_one_referencing<Target, A>(
        self,
        name: &str,
        owner_fk: &str,
        target_column: &str,
        attach: A,
    ) -> Self
    where
        Target: Entity,
        A: Fn(&mut T, Target) + Send + Sync + 'static,
    {
        self.navigation::<Target, A>(
            name,
            RelationshipEdge::ToOne {
                owner_fk: owner_fk.to_string(),
                target_column: Some(target_column.to_string()),
            },
            attach,
        )
    }

    /// Declares an inverse to-many navigation; the target carries
    /// `inverse_fk`.
    #[must_use]
    pub fn to_many<Target, A>(self, name: &str, inverse_fk: &str, attach: A) -> Self
    where
        Target: Entity,
        A: Fn(&mut T, Target) + Send + Sync + 'static,
    {
        self.navigation::<Target, A>(
            name,
            RelationshipEdge::ToMany {
                inverse_fk: inverse_fk.to_string(),
            },
            attach,
        )
    }

    /// Declares a many-to-many navigation realised through a junction
    /// table.
    #[must_use]
    pub fn many_to_many<Target, A>(
        self,
        name: &str,
        junction_table: &str,
        left_fk: &str,
        right_fk: &str,
        attach: A,
    ) -> Self
    where
        Target: Entity,
        A: Fn(&mut T, Target) + Send + Sync + 'static,
    {
        self.navigation::<Target, A>(
            name,
            RelationshipEdge::ManyToMany {
                junction_table: junction_table.to_string(),
                left_fk: left_fk.to_string(),
                right_fk: right_fk.to_string(),
            },
            attach,
        )
    }

    #[must_use]
    pub fn composite_index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.composite_indexes.push(CompositeIndex {
            name: name.to_string(),
            columns: columns.iter().map(ToString::to_string).collect(),
            unique,
        });
        self
    }

    pub fn build(self) -> std::result::Result<EntityDescriptor, MetadataError> {
        let type_name = std::any::type_name::<T>();
        let table = self
            .table
            .ok_or(MetadataError::MissingTable { type_name })?;

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.clone()) {
                return Err(MetadataError::DuplicateColumn {
                    type_name,
                    column: column.name.clone(),
                });
            }
        }

        let mut primary_key = None;
        for (index, column) in self.columns.iter().enumerate() {
            if !column.flags.primary_key {
                continue;
            }
            if let Some(first) = primary_key {
                let first_name: &ColumnDescriptor = &self.columns[first];
                return Err(MetadataError::DuplicatePrimaryKey {
                    type_name,
                    first: first_name.name.clone(),
                    second: column.name.clone(),
                });
            }
            primary_key = Some(index);
        }
        let primary_key = primary_key.ok_or(MetadataError::MissingPrimaryKey { type_name })?;

        Ok(EntityDescriptor {
            type_name,
            table,
            columns: self.columns,
            navigations: self.navigations,
            composite_indexes: self.composite_indexes,
            primary_key,
            create: || Box::new(T::default()),
        })
    }

    fn navigation<Target, A>(mut self, name: &str, edge: RelationshipEdge, attach: A) -> Self
    where
        Target: Entity,
        A: Fn(&mut T, Target) + Send + Sync + 'static,
    {
        let erased: Attach = Arc::new(move |parent: &mut dyn Any, child: Box<dyn Any + Send>| {
            let parent = parent
                .downcast_mut::<T>()
                .ok_or(MaterializeError::TypeMismatch {
                    expected: std::any::type_name::<T>(),
                })?;
            let child = child
                .downcast::<Target>()
                .map_err(|_| MaterializeError::TypeMismatch {
                    expected: std::any::type_name::<Target>(),
                })?;
            attach(parent, *child);
            Ok(())
        });

        self.navigations.push(NavigationDescriptor {
            name: name.to_string(),
            edge,
            target: descriptor_for::<Target>,
            attach: erased,
        });
        self
    }
}

static REGISTRY: OnceLock<RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<TypeId, Arc<EntityDescriptor>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Returns the cached descriptor for `T`, building and validating it on
/// first use.
///
/// Concurrent callers observe either the fully-built entry or none;
/// navigation targets are resolved after insertion so cyclic entity graphs
/// terminate.
pub fn descriptor_for<T: Entity>() -> Result<Arc<EntityDescriptor>> {
    let key = TypeId::of::<T>();

    if let Some(descriptor) = registry()
        .read()
        .expect("entity registry lock poisoned")
        .get(&key)
    {
        return Ok(Arc::clone(descriptor));
    }

    let built = Arc::new(T::build_descriptor()?);

    let descriptor = {
        let mut map = registry().write().expect("entity registry lock poisoned");
        Arc::clone(map.entry(key).or_insert_with(|| Arc::clone(&built)))
    };

    if let Err(error) = validate_navigations(&descriptor) {
        registry()
            .write()
            .expect("entity registry lock poisoned")
            .remove(&key);
        return Err(error);
    }

    Ok(descriptor)
}

/// Ordered column-name view of `T`'s descriptor.
pub fn column_map<T: Entity>() -> Result<IndexMap<String, ValueType>> {
    let descriptor = descriptor_for::<T>()?;
    Ok(descriptor
        .columns
        .iter()
        .map(|column| (column.name.clone(), column.value_type))
        .collect())
}

fn validate_navigations(descriptor: &EntityDescriptor) -> Result<()> {
    for navigation in &descriptor.navigations {
        let target = navigation.target().map_err(|error| {
            Error::Metadata(MetadataError::UnresolvedNavigation {
                type_name: descriptor.type_name,
                navigation: navigation.name.clone(),
                reason: error.to_string(),
            })
        })?;

        if let RelationshipEdge::ToOne {
            owner_fk,
            target_column,
        } = &navigation.edge
        {
            if descriptor.column(owner_fk).is_none() {
                return Err(MetadataError::UnresolvedNavigation {
                    type_name: descriptor.type_name,
                    navigation: navigation.name.clone(),
                    reason: format!("owner foreign key `{owner_fk}` is not a mapped column"),
                }
                .into());
            }
            if let Some(column) = target_column {
                if target.column(column).is_none() {
                    return Err(MetadataError::UnresolvedNavigation {
                        type_name: descriptor.type_name,
                        navigation: navigation.name.clone(),
                        reason: format!(
                            "referenced column `{column}` is not mapped on `{}`",
                            target.table
                        ),
                    }
                    .into());
                }
            }
        }
    }

    Ok(())
}

//! Graph-shaped test models built from one generic soft-deletable node.

use super::capability::{SoftDeletable, SoftDeleteInfo, DELETED_TIME, IS_DELETED};
use super::entity::{Entity, EntityKey, EntityType};
use super::navigation::Navigation;
use super::registry::Model;
use super::value::{Column, ColumnKind, PropertyValues, Value};
use super::ModelResult;
use std::any::Any;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Table shape of one node kind.
pub(crate) trait NodeKind: Debug + Clone + 'static {
    const TYPE: &'static EntityType;
    /// Nullable uuid columns pointing at principals.
    const LINKS: &'static [&'static str];
}

#[derive(Debug, Clone)]
pub(crate) struct Node<K> {
    pub id: EntityKey,
    pub links: Vec<(&'static str, Option<EntityKey>)>,
    pub soft_delete: SoftDeleteInfo,
    _kind: PhantomData<K>,
}

impl<K: NodeKind> Node<K> {
    pub fn new(links: &[(&'static str, EntityKey)]) -> Self {
        let links = K::LINKS
            .iter()
            .map(|column| {
                let key = links
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, key)| *key);
                (*column, key)
            })
            .collect();
        Self {
            id: Uuid::new_v4(),
            links,
            soft_delete: SoftDeleteInfo::default(),
            _kind: PhantomData,
        }
    }
}

impl<K: NodeKind> Entity for Node<K> {
    fn descriptor() -> &'static EntityType {
        K::TYPE
    }

    fn from_values(values: &PropertyValues) -> ModelResult<Self> {
        Ok(Self {
            id: values.require_uuid("id")?,
            links: K::LINKS
                .iter()
                .map(|column| (*column, values.get(column).and_then(Value::as_uuid)))
                .collect(),
            soft_delete: SoftDeleteInfo::read_from(values)?,
            _kind: PhantomData,
        })
    }

    fn entity_type(&self) -> &'static EntityType {
        K::TYPE
    }

    fn key(&self) -> EntityKey {
        self.id
    }

    fn to_values(&self) -> PropertyValues {
        let mut values = PropertyValues::new().with("id", self.id);
        for (column, key) in &self.links {
            values.set(*column, *key);
        }
        self.soft_delete.write_to(&mut values);
        values
    }

    fn apply_values(&mut self, values: &PropertyValues) -> ModelResult<()> {
        *self = Self::from_values(values)?;
        Ok(())
    }

    fn as_soft_deletable(&self) -> Option<&dyn SoftDeletable> {
        Some(self)
    }

    fn as_soft_deletable_mut(&mut self) -> Option<&mut dyn SoftDeletable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<K: NodeKind> SoftDeletable for Node<K> {
    fn soft_delete_info(&self) -> &SoftDeleteInfo {
        &self.soft_delete
    }

    fn soft_delete_info_mut(&mut self) -> &mut SoftDeleteInfo {
        &mut self.soft_delete
    }
}

macro_rules! node_kind {
    ($kind:ident, $name:literal, $table:literal, [$($link:literal),*]) => {
        #[derive(Debug, Clone)]
        pub(crate) struct $kind;

        impl NodeKind for $kind {
            const TYPE: &'static EntityType = &EntityType {
                name: $name,
                table: $table,
                key_column: "id",
                columns: &[
                    Column::required("id", ColumnKind::Uuid),
                    $(Column::optional($link, ColumnKind::Uuid),)*
                    Column::required(IS_DELETED, ColumnKind::Bool),
                    Column::optional(DELETED_TIME, ColumnKind::Integer),
                ],
            };
            const LINKS: &'static [&'static str] = &[$($link),*];
        }
    };
}

node_kind!(Left, "Left", "lefts", ["right_id"]);
node_kind!(Right, "Right", "rights", ["left_id"]);

/// `Left -> Right` and `Right -> Left`, each keyed on the other side.
pub(crate) fn cyclic_model() -> Arc<Model> {
    let model = Model::builder()
        .entity::<Node<Left>>()
        .entity::<Node<Right>>()
        .has_many(Navigation::<Node<Left>, Node<Right>>::new("Rights"), "left_id")
        .has_many(Navigation::<Node<Right>, Node<Left>>::new("Lefts"), "right_id")
        .build();
    match model {
        Ok(model) => Arc::new(model),
        Err(err) => panic!("cyclic model: {err}"),
    }
}

node_kind!(Hub, "Hub", "hubs", []);
node_kind!(Branch, "Branch", "branches", ["hub_id"]);
node_kind!(Leaf, "Leaf", "leaves", ["hub_id", "branch_id"]);
node_kind!(Tip, "Tip", "tips", ["leaf_id"]);

/// `Hub -> Leaf`, `Hub -> Branch -> Leaf`, `Leaf -> Tip`: leaves are
/// reachable along two paths.
pub(crate) fn diamond_model() -> Arc<Model> {
    let model = Model::builder()
        .entity::<Node<Hub>>()
        .entity::<Node<Branch>>()
        .entity::<Node<Leaf>>()
        .entity::<Node<Tip>>()
        .has_many(Navigation::<Node<Hub>, Node<Leaf>>::new("Leaves"), "hub_id")
        .has_many(Navigation::<Node<Hub>, Node<Branch>>::new("Branches"), "hub_id")
        .has_many(Navigation::<Node<Branch>, Node<Leaf>>::new("Leaves"), "branch_id")
        .has_many(Navigation::<Node<Leaf>, Node<Tip>>::new("Tips"), "leaf_id")
        .build();
    match model {
        Ok(model) => Arc::new(model),
        Err(err) => panic!("diamond model: {err}"),
    }
}

pub(crate) const DIAMOND_SCHEMA: &str = "
    CREATE TABLE hubs (id TEXT PRIMARY KEY, is_deleted INTEGER NOT NULL, deleted_time INTEGER);
    CREATE TABLE branches (id TEXT PRIMARY KEY, hub_id TEXT, is_deleted INTEGER NOT NULL, deleted_time INTEGER);
    CREATE TABLE leaves (id TEXT PRIMARY KEY, hub_id TEXT, branch_id TEXT, is_deleted INTEGER NOT NULL, deleted_time INTEGER);
    CREATE TABLE tips (id TEXT PRIMARY KEY, leaf_id TEXT, is_deleted INTEGER NOT NULL, deleted_time INTEGER);
";

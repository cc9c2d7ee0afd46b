use crate::db;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

pub const UNCATEGORIZED: &str = "Uncategorized";

/// Presentation order of resource types inside one layer group.
/// Types missing from this table rank after every listed type.
const TYPE_PRIORITY: [(&str, u8); 6] = [
    ("VIDEO", 1),
    ("PRINTABLE", 2),
    ("INFOGRAPHICS", 3),
    ("SLIDES", 4),
    ("QUIZ", 5),
    ("MINDMAP", 6),
];

pub fn type_rank(resource_type: &str) -> u8 {
    TYPE_PRIORITY
        .iter()
        .find(|(t, _)| *t == resource_type)
        .map(|(_, r)| *r)
        .unwrap_or(TYPE_PRIORITY.len() as u8 + 1)
}

#[derive(Debug, Error)]
pub enum LearningPathError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("query failed: {0}")]
    Query(rusqlite::Error),
    #[error("persist failed: {0}")]
    Persist(rusqlite::Error),
}

impl LearningPathError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "bad_params",
            Self::Query(_) => "db_query_failed",
            Self::Persist(_) => "db_update_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResource {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub status: String,
    pub description: Option<String>,
    pub topic_id: String,
    pub subtopic_id: Option<String>,
    pub layer_id: String,
    pub order_index: i64,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// orderIndex ascending, then type priority, then newest first.
pub fn compare_resources(a: &PathResource, b: &PathResource) -> Ordering {
    a.order_index
        .cmp(&b.order_index)
        .then_with(|| type_rank(&a.resource_type).cmp(&type_rank(&b.resource_type)))
        .then_with(|| b.created_at.cmp(&a.created_at))
}

pub fn sort_resources(resources: &mut [PathResource]) {
    resources.sort_by(compare_resources);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerGroup {
    pub layer_id: Option<String>,
    pub layer_name: String,
    pub resources: Vec<PathResource>,
}

/// Layer-name -> ordered resources. Groups keep the order in which the sort pass
/// first met each layer name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedResources {
    pub groups: Vec<LayerGroup>,
}

impl GroupedResources {
    pub fn group(&self, layer_name: &str) -> Option<&LayerGroup> {
        self.groups.iter().find(|g| g.layer_name == layer_name)
    }

    pub fn resource_count(&self) -> usize {
        self.groups.iter().map(|g| g.resources.len()).sum()
    }

    /// Group names in canonical layer order, "Uncategorized" last when present.
    pub fn display_order(&self, canonical_layers: &[Layer]) -> Vec<String> {
        let mut out: Vec<String> = canonical_layers
            .iter()
            .filter(|l| self.group(&l.name).is_some())
            .map(|l| l.name.clone())
            .collect();
        if self
            .group(UNCATEGORIZED)
            .is_some_and(|g| !g.resources.is_empty())
        {
            out.push(UNCATEGORIZED.to_string());
        }
        out
    }

    fn locate(&self, resource_id: &str) -> Option<(usize, usize)> {
        self.groups.iter().enumerate().find_map(|(gi, g)| {
            g.resources
                .iter()
                .position(|r| r.id == resource_id)
                .map(|ri| (gi, ri))
        })
    }
}

pub fn group_by_layer(
    mut resources: Vec<PathResource>,
    layers: &HashMap<String, Layer>,
) -> GroupedResources {
    sort_resources(&mut resources);
    let mut grouped = GroupedResources::default();
    for r in resources {
        let (layer_id, layer_name) = match layers.get(&r.layer_id) {
            Some(l) => (Some(l.id.clone()), l.name.clone()),
            None => (None, UNCATEGORIZED.to_string()),
        };
        match grouped
            .groups
            .iter_mut()
            .find(|g| g.layer_name == layer_name)
        {
            Some(g) => g.resources.push(r),
            None => grouped.groups.push(LayerGroup {
                layer_id,
                layer_name,
                resources: vec![r],
            }),
        }
    }
    grouped
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: String,
    pub order_index: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome {
    Unchanged,
    Moved {
        layer_name: String,
        updates: Vec<OrderItem>,
    },
}

/// Swaps the resource with its neighbour inside its layer group and renumbers the
/// whole group 0..n. Mutates `grouped` in place so the caller's view is already
/// updated before anything is persisted.
pub fn reorder_within_layer(
    grouped: &mut GroupedResources,
    resource_id: &str,
    direction: Direction,
) -> Result<ReorderOutcome, LearningPathError> {
    let Some((gi, index)) = grouped.locate(resource_id) else {
        return Err(LearningPathError::NotFound(format!(
            "resource {}",
            resource_id
        )));
    };
    let group = &mut grouped.groups[gi];
    let last = group.resources.len() - 1;
    let swap_with = match direction {
        Direction::Up if index == 0 => return Ok(ReorderOutcome::Unchanged),
        Direction::Down if index == last => return Ok(ReorderOutcome::Unchanged),
        Direction::Up => index - 1,
        Direction::Down => index + 1,
    };
    group.resources.swap(index, swap_with);

    let mut updates = Vec::with_capacity(group.resources.len());
    for (i, r) in group.resources.iter_mut().enumerate() {
        r.order_index = i as i64;
        updates.push(OrderItem {
            id: r.id.clone(),
            order_index: i as i64,
        });
    }
    Ok(ReorderOutcome::Moved {
        layer_name: group.layer_name.clone(),
        updates,
    })
}

/// Rebuilds one layer group in the order the caller last displayed it.
/// Ids that are not in the group are rejected; group members the caller did not
/// list keep their relative order after the listed ones.
pub fn apply_cached_order(
    grouped: &mut GroupedResources,
    ordered_ids: &[String],
) -> Result<(), LearningPathError> {
    let Some(first) = ordered_ids.first() else {
        return Ok(());
    };
    let Some((gi, _)) = grouped.locate(first) else {
        return Err(LearningPathError::NotFound(format!("resource {}", first)));
    };
    let group = &mut grouped.groups[gi];
    let mut remaining = std::mem::take(&mut group.resources);
    let mut ordered = Vec::with_capacity(remaining.len());
    for id in ordered_ids {
        let Some(pos) = remaining.iter().position(|r| &r.id == id) else {
            group.resources = ordered.into_iter().chain(remaining).collect();
            return Err(LearningPathError::InvalidInput(format!(
                "resource {} is not in layer {}",
                id, group.layer_name
            )));
        };
        ordered.push(remaining.remove(pos));
    }
    ordered.extend(remaining);
    group.resources = ordered;
    Ok(())
}

pub fn list_layers(conn: &Connection) -> Result<Vec<Layer>, LearningPathError> {
    let mut stmt = conn
        .prepare("SELECT id, name, description FROM layers ORDER BY name")
        .map_err(LearningPathError::Query)?;
    stmt.query_map([], |r| {
        Ok(Layer {
            id: r.get(0)?,
            name: r.get(1)?,
            description: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(LearningPathError::Query)
}

fn require_scope(
    conn: &Connection,
    topic_id: &str,
    subtopic_id: Option<&str>,
) -> Result<(), LearningPathError> {
    let topic: Option<i64> = conn
        .query_row("SELECT 1 FROM topics WHERE id = ?", [topic_id], |r| r.get(0))
        .optional()
        .map_err(LearningPathError::Query)?;
    if topic.is_none() {
        return Err(LearningPathError::NotFound(format!("topic {}", topic_id)));
    }
    if let Some(sid) = subtopic_id {
        let sub: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM subtopics WHERE id = ? AND topic_id = ?",
                [sid, topic_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(LearningPathError::Query)?;
        if sub.is_none() {
            return Err(LearningPathError::NotFound(format!("subtopic {}", sid)));
        }
    }
    Ok(())
}

/// Loads every resource of exactly one (topic, subtopic-or-null) scope and
/// groups it by layer. A missing subtopic means "topic-level only"; the two
/// scopes are never merged.
pub fn fetch_grouped_resources(
    conn: &Connection,
    topic_id: &str,
    subtopic_id: Option<&str>,
) -> Result<GroupedResources, LearningPathError> {
    require_scope(conn, topic_id, subtopic_id)?;

    let layers: HashMap<String, Layer> = list_layers(conn)?
        .into_iter()
        .map(|l| (l.id.clone(), l))
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT id, title, type, status, description, topic_id, subtopic_id, layer_id,
                    order_index, file_url, created_at
             FROM resources
             WHERE topic_id = ?1
               AND ((?2 IS NULL AND subtopic_id IS NULL) OR subtopic_id = ?2)",
        )
        .map_err(LearningPathError::Query)?;
    let rows = stmt
        .query_map((topic_id, subtopic_id), |r| {
            let created_raw: String = r.get(10)?;
            Ok(PathResource {
                id: r.get(0)?,
                title: r.get(1)?,
                resource_type: r.get(2)?,
                status: r.get(3)?,
                description: r.get(4)?,
                topic_id: r.get(5)?,
                subtopic_id: r.get(6)?,
                layer_id: r.get(7)?,
                order_index: r.get(8)?,
                file_url: r.get(9)?,
                created_at: db::parse_timestamp(&created_raw).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        10,
                        rusqlite::types::Type::Text,
                        format!("created_at is not an RFC 3339 timestamp: {:?}", created_raw).into(),
                    )
                })?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(LearningPathError::Query)?;

    Ok(group_by_layer(rows, &layers))
}

#[derive(Debug, Clone, Copy)]
pub enum OrderedTable {
    Resources,
    Subtopics,
}

impl OrderedTable {
    fn update_sql(self, scoped: bool) -> &'static str {
        match (self, scoped) {
            (Self::Resources, false) => "UPDATE resources SET order_index = ? WHERE id = ?",
            (Self::Resources, true) => {
                "UPDATE resources SET order_index = ? WHERE id = ? AND topic_id = ?"
            }
            (Self::Subtopics, false) => "UPDATE subtopics SET order_index = ? WHERE id = ?",
            (Self::Subtopics, true) => {
                "UPDATE subtopics SET order_index = ? WHERE id = ? AND topic_id = ?"
            }
        }
    }

    /// Resource rows carry who last changed them; subtopics have no audit columns.
    fn audit_sql(self) -> Option<&'static str> {
        match self {
            Self::Resources => {
                Some("UPDATE resources SET updated_at = ?, updated_by_id = ? WHERE id = ?")
            }
            Self::Subtopics => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Resources => "resource",
            Self::Subtopics => "subtopic",
        }
    }
}

/// Writes every (id, orderIndex) pair in one transaction. A missing row or a
/// failed statement rolls the whole batch back. Resource rows also get
/// `updated_at` and `updated_by_id` (null when nobody is logged in).
pub fn persist_order(
    conn: &Connection,
    table: OrderedTable,
    parent_topic_id: Option<&str>,
    updated_by: Option<&str>,
    items: &[OrderItem],
) -> Result<(), LearningPathError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(LearningPathError::Persist)?;
    let now = db::now_rfc3339();
    {
        let mut stmt = tx
            .prepare(table.update_sql(parent_topic_id.is_some()))
            .map_err(LearningPathError::Persist)?;
        let mut audit = match table.audit_sql() {
            Some(sql) => Some(tx.prepare(sql).map_err(LearningPathError::Persist)?),
            None => None,
        };
        for item in items {
            let changed = match parent_topic_id {
                Some(tid) => stmt.execute((item.order_index, &item.id, tid)),
                None => stmt.execute((item.order_index, &item.id)),
            };
            let changed = match (changed, audit.as_mut()) {
                (Ok(n), Some(audit)) if n > 0 => {
                    audit.execute((&now, updated_by, &item.id)).map(|_| n)
                }
                (other, _) => other,
            };
            match changed {
                Ok(0) => {
                    drop(audit);
                    drop(stmt);
                    let _ = tx.rollback();
                    warn!(table = table.label(), id = %item.id, "order batch rejected: row not in scope");
                    return Err(LearningPathError::NotFound(format!(
                        "{} {}",
                        table.label(),
                        item.id
                    )));
                }
                Ok(_) => {}
                Err(e) => {
                    drop(audit);
                    drop(stmt);
                    let _ = tx.rollback();
                    warn!(table = table.label(), id = %item.id, error = %e, "order batch failed");
                    return Err(LearningPathError::Persist(e));
                }
            }
        }
    }
    tx.commit().map_err(LearningPathError::Persist)?;
    info!(table = table.label(), count = items.len(), "order batch committed");
    Ok(())
}

pub fn reorder_subtopics(
    conn: &Connection,
    topic_id: &str,
    items: &[OrderItem],
) -> Result<(), LearningPathError> {
    require_scope(conn, topic_id, None)?;
    persist_order(conn, OrderedTable::Subtopics, Some(topic_id), None, items)
}

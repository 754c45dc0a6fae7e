use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    CompleteStory, NodeId, NodeTree, Story, StoryId, StoryNode, StoryOption, StoryTree,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to encode or decode node options: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to prepare story store location: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Story store connection is poisoned")]
    Poisoned,
}

/// Persistence collaborator for generated stories.
///
/// `persist` is atomic: either the story and every node of the tree are
/// stored, or nothing is.
pub trait StoryStore {
    fn persist(
        &self,
        tree: &StoryTree,
        session_id: &str,
        user_id: Option<i64>,
    ) -> Result<Story, StoreError>;

    fn story(&self, id: StoryId) -> Result<Story, StoreError>;

    fn node(&self, id: NodeId) -> Result<StoryNode, StoreError>;

    fn root_node(&self, story_id: StoryId) -> Result<StoryNode, StoreError>;

    /// All nodes of a story in creation order.
    fn nodes_for_story(&self, story_id: StoryId) -> Result<Vec<StoryNode>, StoreError>;

    fn complete_story(&self, story_id: StoryId) -> Result<CompleteStory, StoreError> {
        let story = self.story(story_id)?;
        let nodes = self.nodes_for_story(story_id)?;
        let root_node_id = nodes
            .iter()
            .find(|n| n.is_root)
            .map(|n| n.id)
            .ok_or_else(|| StoreError::NotFound(format!("Root node of story {story_id}")))?;
        Ok(CompleteStory {
            story,
            root_node_id,
            nodes,
        })
    }
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;
CREATE TABLE IF NOT EXISTS stories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    session_id TEXT NOT NULL,
    user_id INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_stories_session ON stories(session_id);
CREATE TABLE IF NOT EXISTS story_nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    story_id INTEGER NOT NULL REFERENCES stories(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    image_prompt_1 TEXT,
    image_prompt_2 TEXT,
    is_root INTEGER NOT NULL,
    is_ending INTEGER NOT NULL,
    is_winning_ending INTEGER NOT NULL,
    options TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_story_nodes_story ON story_nodes(story_id);
"#;

const NODE_COLUMNS: &str = "id, story_id, content, image_prompt_1, image_prompt_2, \
                            is_root, is_ending, is_winning_ending, options";

/// SQLite-backed [`StoryStore`].
///
/// Node ids come from `AUTOINCREMENT`, so a child's id is always greater
/// than its parent's.
pub struct SqliteStoryStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened story store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError>,
    {
        let mut guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

impl StoryStore for SqliteStoryStore {
    fn persist(
        &self,
        tree: &StoryTree,
        session_id: &str,
        user_id: Option<i64>,
    ) -> Result<Story, StoreError> {
        self.with_conn(|conn| {
            // Dropping the transaction on any error rolls everything back.
            let tx = conn.transaction()?;
            let created_at = Utc::now();
            tx.execute(
                "INSERT INTO stories (title, session_id, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![tree.title, session_id, user_id, created_at.to_rfc3339()],
            )?;
            let story_id = tx.last_insert_rowid();

            let root_id = insert_node(&tx, story_id, &tree.root, true)?;
            tx.commit()?;

            info!(
                story_id,
                root_id,
                nodes = tree.root.node_count(),
                "Persisted story tree"
            );
            Ok(Story {
                id: story_id,
                title: tree.title.clone(),
                session_id: session_id.to_string(),
                user_id,
                created_at,
            })
        })
    }

    fn story(&self, id: StoryId) -> Result<Story, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, title, session_id, user_id, created_at FROM stories WHERE id = ?1",
                [id],
                story_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("Story {id}")))
        })
    }

    fn node(&self, id: NodeId) -> Result<StoryNode, StoreError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {NODE_COLUMNS} FROM story_nodes WHERE id = ?1"),
                    [id],
                    RawNode::from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("Story node {id}")))?;
            raw.decode()
        })
    }

    fn root_node(&self, story_id: StoryId) -> Result<StoryNode, StoreError> {
        self.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {NODE_COLUMNS} FROM story_nodes WHERE story_id = ?1 AND is_root = 1"
                    ),
                    [story_id],
                    RawNode::from_row,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("Root node of story {story_id}")))?;
            raw.decode()
        })
    }

    fn nodes_for_story(&self, story_id: StoryId) -> Result<Vec<StoryNode>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NODE_COLUMNS} FROM story_nodes WHERE story_id = ?1 ORDER BY id"
            ))?;
            let rows = stmt.query_map([story_id], RawNode::from_row)?;
            let mut nodes = Vec::new();
            for row in rows {
                nodes.push(row?.decode()?);
            }
            Ok(nodes)
        })
    }
}

/// Pre-order insert: the node gets its id before any child is created.
fn insert_node(
    tx: &Transaction<'_>,
    story_id: StoryId,
    node: &NodeTree,
    is_root: bool,
) -> Result<NodeId, StoreError> {
    tx.execute(
        "INSERT INTO story_nodes (story_id, content, image_prompt_1, image_prompt_2, \
         is_root, is_ending, is_winning_ending, options) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '[]')",
        params![
            story_id,
            node.content,
            node.image_prompt_1,
            node.image_prompt_2,
            is_root,
            node.is_ending(),
            node.is_winning_ending(),
        ],
    )?;
    let node_id = tx.last_insert_rowid();

    let choices = node.options();
    if choices.is_empty() {
        return Ok(node_id);
    }

    let mut options = Vec::with_capacity(choices.len());
    for choice in choices {
        let child_id = insert_node(tx, story_id, &choice.next, false)?;
        options.push(StoryOption {
            text: choice.text.clone(),
            node_id: child_id,
        });
    }
    tx.execute(
        "UPDATE story_nodes SET options = ?1 WHERE id = ?2",
        params![serde_json::to_string(&options)?, node_id],
    )?;
    Ok(node_id)
}

fn story_from_row(row: &Row<'_>) -> rusqlite::Result<Story> {
    let created_at: String = row.get(4)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(Story {
        id: row.get(0)?,
        title: row.get(1)?,
        session_id: row.get(2)?,
        user_id: row.get(3)?,
        created_at,
    })
}

/// Row as stored, with options still JSON-encoded.
struct RawNode {
    node: StoryNode,
    options: String,
}

impl RawNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            node: StoryNode {
                id: row.get(0)?,
                story_id: row.get(1)?,
                content: row.get(2)?,
                image_prompt_1: row.get(3)?,
                image_prompt_2: row.get(4)?,
                is_root: row.get(5)?,
                is_ending: row.get(6)?,
                is_winning_ending: row.get(7)?,
                options: Vec::new(),
            },
            options: row.get(8)?,
        })
    }

    fn decode(self) -> Result<StoryNode, StoreError> {
        let mut node = self.node;
        node.options = serde_json::from_str(&self.options)?;
        Ok(node)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type StoryId = i64;
pub type NodeId = i64;

/// A persisted, generated story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: StoryId,
    pub title: String,
    pub session_id: String,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// One persisted point in a story's narrative tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    pub story_id: StoryId,
    pub content: String,
    pub image_prompt_1: Option<String>,
    pub image_prompt_2: Option<String>,
    pub is_root: bool,
    pub is_ending: bool,
    pub is_winning_ending: bool,
    pub options: Vec<StoryOption>,
}

/// An edge from a node to the child it leads to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryOption {
    pub text: String,
    pub node_id: NodeId,
}

/// A story together with every node it owns, as read back by consumers.
#[derive(Debug, Clone, Serialize)]
pub struct CompleteStory {
    pub story: Story,
    pub root_node_id: NodeId,
    pub nodes: Vec<StoryNode>,
}

impl CompleteStory {
    pub fn node(&self, id: NodeId) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn root(&self) -> Option<&StoryNode> {
        self.node(self.root_node_id)
    }
}

// ── Validated tree ──────────────────────────────────────────────

/// A story tree that passed validation and is ready to persist.
///
/// Built bottom-up by [`crate::validate_story`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryTree {
    pub title: String,
    pub root: NodeTree,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeTree {
    pub content: String,
    pub image_prompt_1: Option<String>,
    pub image_prompt_2: Option<String>,
    pub kind: NodeKind,
}

/// Whether a node ends the story or branches further.
///
/// Encoding this as an enum keeps ending nodes from ever carrying options.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Ending { winning: bool },
    Branch { options: Vec<ChoiceTree> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceTree {
    pub text: String,
    pub next: NodeTree,
}

impl NodeTree {
    pub fn is_ending(&self) -> bool {
        matches!(self.kind, NodeKind::Ending { .. })
    }

    pub fn is_winning_ending(&self) -> bool {
        matches!(self.kind, NodeKind::Ending { winning: true })
    }

    pub fn options(&self) -> &[ChoiceTree] {
        match &self.kind {
            NodeKind::Branch { options } => options,
            NodeKind::Ending { .. } => &[],
        }
    }

    /// Total number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self
            .options()
            .iter()
            .map(|c| c.next.node_count())
            .sum::<usize>()
    }

    /// Number of levels below and including `self`.
    pub fn depth(&self) -> usize {
        1 + self
            .options()
            .iter()
            .map(|c| c.next.depth())
            .max()
            .unwrap_or(0)
    }
}

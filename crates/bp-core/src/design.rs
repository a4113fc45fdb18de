use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compositor::CompositeImage;

/// A text prompt plus the number of image variants requested for it.
/// Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    text: String,
    variants: u32,
}

impl Prompt {
    /// `variants` is clamped to at least one.
    pub fn new(text: impl Into<String>, variants: u32) -> Self {
        Self {
            text: text.into(),
            variants: variants.max(1),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn variants(&self) -> u32 {
        self.variants
    }
}

/// Marketplace metadata attached to a single design.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DesignMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

impl DesignMetadata {
    /// Metadata derived from the prompt itself, used when the caller
    /// supplies nothing marketplace-specific.
    pub fn derived(prompt: &Prompt, variant: usize) -> Self {
        let title: String = prompt.text().chars().take(MAX_TITLE_LEN).collect();
        Self {
            title: format!("{} #{}", title.trim_end(), variant + 1),
            description: prompt.text().to_string(),
            tags: Vec::new(),
        }
    }
}

const MAX_TITLE_LEN: usize = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DesignStatus {
    Pending,
    Generated,
    Composited,
    Publishing,
    Published(String),
    Failed(String),
}

impl DesignStatus {
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published(_) | Self::Failed(_))
    }
}

/// One unit of work: a prompt on its way to a published (or failed)
/// marketplace listing. Mutated only by the pipeline stage that currently
/// owns it; terminal once `Published` or `Failed`.
#[derive(Debug, Clone)]
pub struct Design {
    pub id: Uuid,
    pub prompt: Prompt,
    pub metadata: DesignMetadata,
    pub composite: Option<CompositeImage>,
    pub status: DesignStatus,
}

impl Design {
    pub fn new(prompt: Prompt, metadata: DesignMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt,
            metadata,
            composite: None,
            status: DesignStatus::Pending,
        }
    }

    /// Upload filename for the marketplace file input.
    pub fn file_name(&self) -> String {
        let id = self.id.simple().to_string();
        format!("design_{}.png", &id[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_clamps_variants_to_one() {
        assert_eq!(Prompt::new("cat", 0).variants(), 1);
        assert_eq!(Prompt::new("cat", 3).variants(), 3);
    }

    #[test]
    fn derived_metadata_numbers_variants() {
        let prompt = Prompt::new("minimalist cat", 2);
        let meta = DesignMetadata::derived(&prompt, 1);
        assert_eq!(meta.title, "minimalist cat #2");
        assert_eq!(meta.description, "minimalist cat");
        assert!(meta.tags.is_empty());
    }

    #[test]
    fn derived_metadata_truncates_long_titles() {
        let prompt = Prompt::new("x".repeat(200), 1);
        let meta = DesignMetadata::derived(&prompt, 0);
        assert!(meta.title.len() <= 64);
        assert!(meta.title.ends_with("#1"));
    }

    #[test]
    fn status_terminality() {
        assert!(DesignStatus::Pending.is_active());
        assert!(DesignStatus::Publishing.is_active());
        assert!(DesignStatus::Published("u".into()).is_terminal());
        assert!(DesignStatus::Failed("e".into()).is_terminal());
    }

    #[test]
    fn file_name_uses_short_id() {
        let prompt = Prompt::new("cat", 1);
        let design = Design::new(prompt.clone(), DesignMetadata::derived(&prompt, 0));
        let name = design.file_name();
        assert!(name.starts_with("design_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "design_".len() + 8 + ".png".len());
    }
}

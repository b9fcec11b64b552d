//! Artifact kinds and their on-disk layout.

use serde::{Deserialize, Serialize};

/// The kinds of artifact a stage can produce.
///
/// Stock clips are indexed because one item sources several; all other kinds
/// are singletons per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    Script,
    Narration,
    StockClip(u32),
    AssembledVideo,
    CaptionedVideo,
    MetadataJson,
}

impl ArtifactKind {
    /// Directory name under the artifact root. Clip indices share one
    /// directory; the index lives in the record key, not the tree.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Script => "script",
            ArtifactKind::Narration => "narration",
            ArtifactKind::StockClip(_) => "stock_clip",
            ArtifactKind::AssembledVideo => "assembled_video",
            ArtifactKind::CaptionedVideo => "captioned_video",
            ArtifactKind::MetadataJson => "metadata_json",
        }
    }

    /// Stable key used in item records, e.g. `stock_clip[2]`.
    pub fn key(self) -> String {
        match self {
            ArtifactKind::StockClip(n) => format!("stock_clip[{}]", n),
            other => other.dir_name().to_string(),
        }
    }

    /// Parses a record key back into a kind.
    pub fn parse_key(key: &str) -> Option<Self> {
        match key {
            "script" => Some(ArtifactKind::Script),
            "narration" => Some(ArtifactKind::Narration),
            "assembled_video" => Some(ArtifactKind::AssembledVideo),
            "captioned_video" => Some(ArtifactKind::CaptionedVideo),
            "metadata_json" => Some(ArtifactKind::MetadataJson),
            other => {
                let inner = other.strip_prefix("stock_clip[")?.strip_suffix(']')?;
                inner.parse().ok().map(ArtifactKind::StockClip)
            }
        }
    }

    /// File extension for this kind's payload.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Script => "txt",
            ArtifactKind::Narration => "mp3",
            ArtifactKind::StockClip(_)
            | ArtifactKind::AssembledVideo
            | ArtifactKind::CaptionedVideo => "mp4",
            ArtifactKind::MetadataJson => "json",
        }
    }

    /// All singleton kinds plus the first clip slot, for layout bootstrap.
    pub fn all_dirs() -> [&'static str; 6] {
        [
            "script",
            "narration",
            "stock_clip",
            "assembled_video",
            "captioned_video",
            "metadata_json",
        ]
    }
}

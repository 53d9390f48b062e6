use std::path::PathBuf;

use crate::KnowledgeSettings;
use crate::errors::{KnowledgeError, KnowledgeResult};

pub const KNOWLEDGE_DIR: &str = "knowledge";
pub const SNAPSHOT_FILE: &str = "plant_knowledge.json";

pub fn data_root() -> KnowledgeResult<PathBuf> {
    if let Ok(override_dir) = std::env::var("VERDANT_DATA_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let dir = dirs::data_dir().ok_or(KnowledgeError::MissingDataDir)?;
    Ok(dir.join("verdant"))
}

pub fn snapshot_path(settings: &KnowledgeSettings) -> KnowledgeResult<PathBuf> {
    if let Some(path) = &settings.snapshot_path {
        return Ok(path.clone());
    }
    Ok(data_root()?.join(KNOWLEDGE_DIR).join(SNAPSHOT_FILE))
}

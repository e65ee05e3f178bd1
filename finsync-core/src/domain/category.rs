//! Category mapping

use serde::{Deserialize, Serialize};

/// Id of the reserved fallback category
pub const UNCATEGORIZED_ID: i64 = 106;
pub const UNCATEGORIZED_NAME: &str = "Uncategorized";

/// Maps a provider category code to the internal taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub provider_category_code: Option<String>,
    pub app_category_name: String,
}

impl Category {
    pub fn uncategorized() -> Self {
        Self {
            id: UNCATEGORIZED_ID,
            provider_category_code: None,
            app_category_name: UNCATEGORIZED_NAME.to_string(),
        }
    }

    pub fn is_uncategorized(&self) -> bool {
        self.id == UNCATEGORIZED_ID
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct PresignRequest {
    pub file_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresignResponse {
    pub upload_url: Option<String>,
    pub form_fields: Option<HashMap<String, String>>,
}

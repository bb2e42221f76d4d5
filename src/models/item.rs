use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The payload union of a stored item, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ItemData {
    #[serde(rename = "TEXT")]
    Text { value: String },
    #[serde(rename = "CREDENTIAL")]
    Credential { login: String, password: String },
    #[serde(rename = "CARD")]
    Card {
        card_number: String,
        card_holder: String,
        expiry_date: String,
        cvv: String,
    },
    #[serde(rename = "BINARY")]
    Binary { filename: String, id: Uuid },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    pub id: Option<Uuid>,
    pub title: Option<String>,
    pub data: Option<ItemData>,
    pub meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemCreate {
    pub title: String,
    pub data: ItemData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ItemData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, String>>,
}

/// `POST /items` and `PUT /items/{id}` answer with at least the item id.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSummary {
    pub id: Option<Uuid>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemList {
    pub items: Option<Vec<Item>>,
    pub total: Option<i64>,
}

/// Query parameters of `GET /items`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListParams {
    pub item_type: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

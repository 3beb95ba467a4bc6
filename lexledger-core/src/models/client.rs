use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Client lookup record. Client CRUD lives outside the billing engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub is_deleted: bool,
}

/// Case (matter) lookup record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: Uuid,
    pub client_id: Uuid,

    /// `YYMM-NNNN`
    pub case_number: String,

    pub title: String,
    pub is_deleted: bool,
}

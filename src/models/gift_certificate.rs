use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftCertificate {
    pub id: String,
    pub purchase_id: String,
    pub product_key: String,
    pub generated_code: String,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
    pub message: Option<String>,
    pub created_at: i64,
}

/// Recipient details carried in checkout metadata. Absent fields stay None.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GiftRecipient {
    pub name: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
}

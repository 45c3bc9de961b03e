use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductType {
    Digital,
    Gift,
    Merch,
    Class,
}

/// Catalog entry. Owned by catalog administration; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub product_key: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    pub product_type: ProductType,
}

use rusqlite::Connection;

use crate::catalog;
use crate::db::queries;
use crate::models::{GiftRecipient, ProductType, ShippingDetails};
use crate::payments::PaymentEvent;

use super::FulfillmentError;

/// Type-specific fulfillment input. Each variant carries exactly the fields
/// its branch needs, so a branch can never see another type's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductFulfillment {
    Digital,
    Gift(GiftRecipient),
    Merch(ShippingDetails),
    Class { class_session_id: i64, quantity: i64 },
}

impl ProductFulfillment {
    pub fn product_type(&self) -> ProductType {
        match self {
            ProductFulfillment::Digital => ProductType::Digital,
            ProductFulfillment::Gift(_) => ProductType::Gift,
            ProductFulfillment::Merch(_) => ProductType::Merch,
            ProductFulfillment::Class { .. } => ProductType::Class,
        }
    }

    /// Extract the variant for `product_type` from checkout metadata.
    pub fn from_metadata(
        product_type: ProductType,
        event: &PaymentEvent,
    ) -> Result<Self, FulfillmentError> {
        Ok(match product_type {
            ProductType::Digital => ProductFulfillment::Digital,
            ProductType::Gift => ProductFulfillment::Gift(GiftRecipient {
                name: event.meta("recipientName").map(str::to_string),
                email: event.meta("recipientEmail").map(str::to_string),
                message: event.meta("message").map(str::to_string),
            }),
            ProductType::Merch => ProductFulfillment::Merch(ShippingDetails {
                full_name: required(event, "shipping_fullName")?,
                address_line1: required(event, "shipping_address1")?,
                address_line2: event.meta("shipping_address2").map(str::to_string),
                city: required(event, "shipping_city")?,
                state: required(event, "shipping_state")?,
                postal_code: required(event, "shipping_postal")?,
                country: required(event, "shipping_country")?,
            }),
            ProductType::Class => {
                let class_session_id = parse_int(event, "sessionId")?.ok_or_else(|| {
                    FulfillmentError::Validation("Missing sessionId for class purchase".into())
                })?;
                let quantity = parse_int(event, "quantity")?.unwrap_or(1);
                if quantity <= 0 {
                    return Err(FulfillmentError::Validation(format!(
                        "Invalid quantity {}",
                        quantity
                    )));
                }
                ProductFulfillment::Class {
                    class_session_id,
                    quantity,
                }
            }
        })
    }
}

/// A validated fulfillment request for one confirmed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FulfillmentRequest {
    pub product_key: String,
    pub fulfillment: ProductFulfillment,
}

impl FulfillmentRequest {
    /// Validate everything a branch will need before anything is written.
    ///
    /// The product type comes from metadata (`type`, or `productType`) and falls
    /// back to the catalog entry for the product key.
    pub fn from_event(conn: &Connection, event: &PaymentEvent) -> Result<Self, FulfillmentError> {
        let product_key = event
            .meta("productKey")
            .ok_or_else(|| FulfillmentError::Validation("Missing productKey".into()))?
            .to_string();

        let product_type = match event.meta("type").or_else(|| event.meta("productType")) {
            Some(raw) => raw
                .to_ascii_lowercase()
                .parse::<ProductType>()
                .map_err(|_| FulfillmentError::UnknownProductType(raw.to_string()))?,
            None => catalog::lookup_product(conn, &product_key)?
                .map(|p| p.product_type)
                .ok_or_else(|| {
                    FulfillmentError::Validation(format!(
                        "Missing product type and {} is not in the catalog",
                        product_key
                    ))
                })?,
        };

        let fulfillment = ProductFulfillment::from_metadata(product_type, event)?;

        if let ProductFulfillment::Class {
            class_session_id, ..
        } = fulfillment
        {
            if queries::get_class_session(conn, class_session_id)?.is_none() {
                return Err(FulfillmentError::ClassSessionNotFound(class_session_id));
            }
        }

        Ok(Self {
            product_key,
            fulfillment,
        })
    }

    pub fn product_type(&self) -> ProductType {
        self.fulfillment.product_type()
    }
}

fn required(event: &PaymentEvent, key: &str) -> Result<String, FulfillmentError> {
    event
        .meta(key)
        .map(str::to_string)
        .ok_or_else(|| FulfillmentError::Validation(format!("Missing {}", key)))
}

fn parse_int(event: &PaymentEvent, key: &str) -> Result<Option<i64>, FulfillmentError> {
    event
        .meta(key)
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| FulfillmentError::Validation(format!("{} must be an integer", key)))
        })
        .transpose()
}

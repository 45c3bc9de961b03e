mod class_session;
mod download_token;
mod gift_certificate;
mod order;
mod product;
mod purchase;
mod shipping_address;

pub use class_session::*;
pub use download_token::*;
pub use gift_certificate::*;
pub use order::*;
pub use product::*;
pub use purchase::*;
pub use shipping_address::*;

//! Items Module
//!
//! The signed-in user's saved research items: the store library used by the
//! router's `ItemStore` implementation, plus the routes the panel uses to
//! list, search, edit and delete them.

mod handler;
mod routes;
mod store;

pub use routes::routes;
pub use store::Items;

pub mod branch_handlers;
pub mod handlers;
pub mod merge_handlers;
pub mod routes;
pub mod user_extractor;

pub use branch_handlers::*;
pub use handlers::*;
pub use merge_handlers::*;
pub use routes::*;

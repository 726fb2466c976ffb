pub mod branch;
pub mod commit;
pub mod conflict;
pub mod context;
pub mod entity;
pub mod identifier;

pub use branch::*;
pub use commit::*;
pub use conflict::*;
pub use context::*;
pub use entity::*;
pub use identifier::*;

pub mod branches;
pub mod catalog;
pub mod conflicts;
pub mod data_access;
pub mod merge_candidate;
pub mod preview;
pub mod registry;
pub mod routing;
pub mod scope;
pub mod service;
pub mod unit_of_work;

pub use branches::*;
pub use catalog::*;
pub use conflicts::*;
pub use data_access::*;
pub use merge_candidate::*;
pub use preview::*;
pub use registry::*;
pub use routing::*;
pub use scope::*;
pub use service::*;
pub use unit_of_work::*;

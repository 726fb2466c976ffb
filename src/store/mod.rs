pub mod dolt;
pub mod memory;
pub mod traits;

pub use dolt::*;
pub use memory::*;
pub use traits::*;

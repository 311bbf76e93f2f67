pub mod loader;
pub mod timestamp;

pub use loader::*;
pub use timestamp::*;

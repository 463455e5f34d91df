pub mod control;
pub mod fault;
pub mod pack;

pub use control::*;
pub use fault::*;
pub use pack::*;

mod account;
mod audit;
mod money;

pub use account::*;
pub use audit::*;
pub use money::*;

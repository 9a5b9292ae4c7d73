// Application layer: the transaction coordinator and the workflows built on it.

pub mod coordinator;
pub mod error;
pub mod service;

pub use coordinator::*;
pub use error::*;
pub use service::*;

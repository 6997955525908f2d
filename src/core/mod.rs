pub mod codec;
pub mod connection;
pub mod frame;
pub mod history;
pub mod reconnect;
pub mod types;

pub use codec::*;
pub use connection::*;
pub use frame::*;
pub use history::*;
pub use reconnect::*;
pub use types::*;

pub mod intent;
pub mod memo;
pub mod order;
pub mod price;
pub mod transfer;

pub use intent::Intent;
pub use order::{MakerFill, MatchResult, NewOrder, Order, OrderId, Side};
pub use price::Price;
pub use transfer::Transfer;

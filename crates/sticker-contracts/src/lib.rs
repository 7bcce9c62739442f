pub mod events;
pub mod grid;
pub mod modes;
pub mod session;
pub mod wire;

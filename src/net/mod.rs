pub mod executor;
pub mod listener;
pub mod router;
pub mod session;

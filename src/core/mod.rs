pub mod executor;
pub mod inbound;

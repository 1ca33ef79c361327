pub mod builder;
pub mod router;

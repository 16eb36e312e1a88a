pub mod aggregate;
pub mod batch;
pub mod decodo;
pub mod renderer;
pub mod static_xhr;

pub use batch::fetch_batch;

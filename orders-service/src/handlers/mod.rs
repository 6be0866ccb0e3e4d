pub mod docs;
pub mod orders;

pub use orders::AppState;

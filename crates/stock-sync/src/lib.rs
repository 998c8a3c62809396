//! Stock View Sync for the offers of a live event.
//!
//! - [`StockView`] holds the offers as last reported by the backend
//! - [`StockSync`] loads them and merges realtime changes until torn down

pub mod sync;
pub mod view;

pub use sync::StockSync;
pub use view::StockView;

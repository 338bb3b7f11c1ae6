pub mod quotes;
pub mod rates;
pub mod setup;
pub mod show;
pub mod ui;

pub mod assessment;
pub mod batches;
pub mod certificates;
pub mod core;
pub mod setup;

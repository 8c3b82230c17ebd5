mod assess;
mod resolve;
mod sync;

pub use assess::run_assess;
pub use resolve::run_resolve;
pub use sync::{run_sync, SyncArgs};

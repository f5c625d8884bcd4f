mod allowance_ops;
mod metadata_ops;
mod scan_progress_ops;

pub use allowance_ops::*;
pub use metadata_ops::*;
pub use scan_progress_ops::*;

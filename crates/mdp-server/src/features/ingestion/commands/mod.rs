pub mod cancel_run;
pub mod start_run;

pub use cancel_run::{CancelRunCommand, CancelRunError, CancelRunResponse};
pub use start_run::{StartRunCommand, StartRunError, StartRunResponse};

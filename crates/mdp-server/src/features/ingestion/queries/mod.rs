pub mod get_status;
pub mod list_runs;

pub use get_status::{GetStatusError, GetStatusQuery};
pub use list_runs::{ListRunsError, ListRunsQuery, ListRunsResponse};

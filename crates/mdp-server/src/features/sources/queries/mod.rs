pub mod get;
pub mod list;

pub use get::{GetSourceError, GetSourceQuery, SourceDetail};
pub use list::{ListSourcesError, ListSourcesQuery, ListSourcesResponse, SourceListItem};

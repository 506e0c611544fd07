//! Document providers: sources that enumerate their own documents for
//! bulk (re)indexing.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::IndexingError;
use crate::task::IndexTask;

pub trait DocumentProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Add every document in `container` (all containers when `None`)
    /// modified after `since` (all documents when `None`) to `task`.
    fn enumerate_documents(
        &self,
        task: &Arc<IndexTask>,
        container: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(), IndexingError>;

    /// The whole index was cleared; drop any record of what was indexed.
    fn index_deleted(&self) -> Result<(), IndexingError> {
        Ok(())
    }
}

//! # search-indexing
//!
//! The indexing pipeline: resource resolution, prioritized work queues,
//! index tasks, the worker/runner/timer threads and the crawler.
//!
//! ## Components
//! - `ResolverRegistry`: `prefix:identifier` ids to [`Resource`]s
//! - `IndexingService`: the pre-processing and run queues with their
//!   threads, commit cadence and maintenance operations
//! - `IndexTask`: a group of items tracked to completion
//! - `Crawler`: schedule-driven or full traversal of a [`ResourceTree`]
//! - `fs`: the local filesystem as resolver, tree and document provider

pub mod crawler;
mod dispatch;
pub mod error;
pub mod fs;
pub mod item;
pub mod provider;
pub mod queue;
pub mod resource;
pub mod service;
pub mod stats;
pub mod task;

pub use crawler::{Crawler, ResourceTree, TreeNode};
pub use error::{FailureKind, IndexingError};
pub use fs::{FileResolver, FileResource, FileSystemProvider, FileSystemTree, FILE_PREFIX};
pub use item::{ItemKey, Runnable, WorkItem};
pub use provider::DocumentProvider;
pub use queue::PriorityQueue;
pub use resource::{MemoryResolver, MemoryResource, ResolverRegistry, Resource, ResourceResolver};
pub use service::{IndexingService, MaintenanceReport, ServiceStatus};
pub use stats::{HourlyRate, RateAccumulator};
pub use task::{IndexTask, TaskProgress, TaskRegistry};

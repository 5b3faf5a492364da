// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod pipeline;
pub mod schema_manager;
pub mod search;
pub mod upsert;

pub use pipeline::{IndexingError, IndexingPipeline, IndexingReport, PageDescriptor};
pub use schema_manager::{SchemaManager, SchemaOutcome};
pub use search::{PhasedSearch, Retrieval, Retriever, SearchError, SearchRequest};
pub use upsert::{AckMode, UpsertError, UpsertPipeline, UpsertQueue, UpsertTicket};

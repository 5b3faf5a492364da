// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Multi-representation page index: patch-grid pooling, a three-field
//! multi-vector collection schema, batch upserts and field-selectable
//! MaxSim retrieval.

pub mod api;
pub mod client;
pub mod config;
pub mod core;
pub mod encoding;
pub mod index;
pub mod storage;

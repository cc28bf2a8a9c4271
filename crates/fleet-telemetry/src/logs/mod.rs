// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log buffering, batching and shipping.
//!
//! ```text
//!   producers --insert_batch--> buffer (actor) --drain--> serialize
//!       --> partition (count + bytes) --> stream lock --> publish with token
//! ```

pub mod batcher;
pub mod buffer;
pub mod entry;
pub mod shipper;
pub mod stream;

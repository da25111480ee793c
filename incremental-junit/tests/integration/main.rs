// Copyright (c) The incremental-junit Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod concurrency;
mod fixtures;
mod session_flow;
#[cfg(unix)]
mod signals;

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod error;
mod models;
mod store;

pub use error::StoreError;
pub use models::{
    AuditEntry, DeadLetterEntry, PendingApproval, SessionContext, Task, TaskStatus, ThreadSession,
};
pub use store::{RetentionReport, Store};

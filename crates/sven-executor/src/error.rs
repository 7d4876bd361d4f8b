// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("unsupported task type: {0}")]
    UnsupportedTaskType(String),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("{0} is required")]
    MissingField(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("permission pending approval")]
    PermissionPending,
    #[error("task not found")]
    NotFound,
    #[error("collaborator error: {0}")]
    Collaborator(String),
    #[error("store error: {0}")]
    Store(#[from] sven_store::StoreError),
}

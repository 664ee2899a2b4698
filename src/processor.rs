//! Processor contract and lookup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::model::{ApiError, Identity, Operation};

/// User-provided business logic for one identity.
///
/// Implement only the operations the identity supports; the default bodies
/// answer 501 Not Implemented for everything else.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn retrieve_many(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::RetrieveMany,
            &ctx.request().identity,
        ))
    }

    async fn retrieve(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Retrieve,
            &ctx.request().identity,
        ))
    }

    async fn create(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Create,
            &ctx.request().identity,
        ))
    }

    async fn update(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Update,
            &ctx.request().identity,
        ))
    }

    async fn delete(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Delete,
            &ctx.request().identity,
        ))
    }

    async fn info(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Info,
            &ctx.request().identity,
        ))
    }

    async fn patch(&self, ctx: &mut Context) -> Result<(), ApiError> {
        Err(ApiError::not_implemented(
            Operation::Patch,
            &ctx.request().identity,
        ))
    }
}

/// Resolves the processor registered for an identity, if any.
pub type ProcessorFinder = Arc<dyn Fn(&Identity) -> Option<Arc<dyn Processor>> + Send + Sync>;

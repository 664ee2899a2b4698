//! The operation dispatch pipeline.
//!
//! One dispatch function per operation kind. Each orchestrates, in order:
//! authentication, authorization, the read-only guard (writes only),
//! unmarshalling (body-carrying writes only), processor lookup and
//! invocation, auditing, and event emission. The caller owns the
//! relationship gate and response shaping.

use std::sync::Arc;

use crate::auth::{Auditer, AuthAction, Authorizer, RequestAuthenticator};
use crate::context::Context;
use crate::model::{
    ApiError, Event, EventKind, Identity, ModelManager, Operation, Output, Unmarshaller,
};
use crate::processor::ProcessorFinder;
use crate::push::EventPusher;

/// Walk the authenticator chain. `Ok` short-circuits, `Continue` defers,
/// `Ko` rejects with 401. An empty chain accepts implicitly, as does a chain
/// that only ever answered `Continue` (the request proceeds anonymous).
pub(crate) async fn check_authentication(
    authenticators: &[Arc<dyn RequestAuthenticator>],
    ctx: &mut Context,
) -> Result<(), ApiError> {
    for authenticator in authenticators {
        match authenticator.authenticate_request(ctx).await? {
            AuthAction::Ok => return Ok(()),
            AuthAction::Continue => continue,
            AuthAction::Ko => {
                return Err(ApiError::unauthorized("You are not authenticated"));
            }
        }
    }
    Ok(())
}

/// Walk the authorizer chain with the same protocol; `Ko` rejects with 403.
pub(crate) async fn check_authorization(
    authorizers: &[Arc<dyn Authorizer>],
    ctx: &Context,
) -> Result<(), ApiError> {
    for authorizer in authorizers {
        match authorizer.is_authorized(ctx).await? {
            AuthAction::Ok => return Ok(()),
            AuthAction::Continue => continue,
            AuthAction::Ko => {
                return Err(ApiError::forbidden(
                    "You are not authorized to access this resource",
                ));
            }
        }
    }
    Ok(())
}

fn check_read_only(
    read_only: bool,
    excluded: &[Identity],
    identity: &Identity,
) -> Result<(), ApiError> {
    if read_only && !excluded.iter().any(|i| i.name == identity.name) {
        return Err(ApiError::locked("This API is currently in read-only mode"));
    }
    Ok(())
}

/// Build the input object from the request body, via the registered
/// unmarshaller when there is one, else through the model manager. Any
/// failure surfaces as a 400.
fn unmarshal_input(
    ctx: &mut Context,
    manager: &dyn ModelManager,
    unmarshaller: Option<&Unmarshaller>,
) -> Result<(), ApiError> {
    let object = match unmarshaller {
        Some(unmarshal) => unmarshal(ctx.request()),
        None => {
            let data = ctx
                .request()
                .data
                .clone()
                .unwrap_or(serde_json::Value::Null);
            manager.unmarshal(&ctx.request().identity, &data)
        }
    }
    .map_err(|e| ApiError::bad_request(e.to_string()))?;

    ctx.set_input_data(object);
    Ok(())
}

fn find_processor(
    finder: &ProcessorFinder,
    operation: Operation,
    identity: &Identity,
) -> Result<Arc<dyn crate::processor::Processor>, ApiError> {
    finder(identity).ok_or_else(|| ApiError::not_implemented(operation, identity))
}

fn audit(auditer: Option<&Arc<dyn Auditer>>, ctx: &Context, result: &Result<(), ApiError>) {
    if let Some(auditer) = auditer {
        auditer.audit(ctx, result.as_ref().err());
    }
}

fn emit_event(pusher: Option<&EventPusher>, kind: EventKind, ctx: &Context) {
    let Some(pusher) = pusher else { return };
    let Some(object) = ctx.output_data().and_then(Output::as_one) else {
        return;
    };
    match Event::from_identifiable(kind, object) {
        Ok(event) => pusher(event),
        Err(e) => tracing::warn!(error = %e, "Unable to encode event payload; event dropped"),
    }
}

pub(crate) async fn dispatch_retrieve_many_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    auditer: Option<&Arc<dyn Auditer>>,
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        let processor =
            find_processor(processor_finder, Operation::RetrieveMany, &ctx.request().identity)?;
        processor.retrieve_many(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    result
}

pub(crate) async fn dispatch_retrieve_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    auditer: Option<&Arc<dyn Auditer>>,
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        let processor =
            find_processor(processor_finder, Operation::Retrieve, &ctx.request().identity)?;
        processor.retrieve(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    result
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch_create_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    manager: &Arc<dyn ModelManager>,
    unmarshaller: Option<&Unmarshaller>,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    pusher: Option<&EventPusher>,
    auditer: Option<&Arc<dyn Auditer>>,
    read_only: bool,
    read_only_excluded: &[Identity],
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        check_read_only(read_only, read_only_excluded, &ctx.request().identity)?;
        unmarshal_input(ctx, manager.as_ref(), unmarshaller)?;
        let processor =
            find_processor(processor_finder, Operation::Create, &ctx.request().identity)?;
        processor.create(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    if result.is_ok() {
        emit_event(pusher, EventKind::Create, ctx);
    }
    result
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch_update_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    manager: &Arc<dyn ModelManager>,
    unmarshaller: Option<&Unmarshaller>,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    pusher: Option<&EventPusher>,
    auditer: Option<&Arc<dyn Auditer>>,
    read_only: bool,
    read_only_excluded: &[Identity],
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        check_read_only(read_only, read_only_excluded, &ctx.request().identity)?;
        unmarshal_input(ctx, manager.as_ref(), unmarshaller)?;
        let processor =
            find_processor(processor_finder, Operation::Update, &ctx.request().identity)?;
        processor.update(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    if result.is_ok() {
        emit_event(pusher, EventKind::Update, ctx);
    }
    result
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch_delete_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    pusher: Option<&EventPusher>,
    auditer: Option<&Arc<dyn Auditer>>,
    read_only: bool,
    read_only_excluded: &[Identity],
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        check_read_only(read_only, read_only_excluded, &ctx.request().identity)?;
        let processor =
            find_processor(processor_finder, Operation::Delete, &ctx.request().identity)?;
        processor.delete(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    if result.is_ok() {
        emit_event(pusher, EventKind::Delete, ctx);
    }
    result
}

pub(crate) async fn dispatch_info_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    auditer: Option<&Arc<dyn Auditer>>,
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        let processor = find_processor(processor_finder, Operation::Info, &ctx.request().identity)?;
        processor.info(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    result
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn dispatch_patch_operation(
    ctx: &mut Context,
    processor_finder: &ProcessorFinder,
    manager: &Arc<dyn ModelManager>,
    unmarshaller: Option<&Unmarshaller>,
    authenticators: &[Arc<dyn RequestAuthenticator>],
    authorizers: &[Arc<dyn Authorizer>],
    auditer: Option<&Arc<dyn Auditer>>,
    read_only: bool,
    read_only_excluded: &[Identity],
) -> Result<(), ApiError> {
    let result = async {
        check_authentication(authenticators, ctx).await?;
        check_authorization(authorizers, ctx).await?;
        check_read_only(read_only, read_only_excluded, &ctx.request().identity)?;
        unmarshal_input(ctx, manager.as_ref(), unmarshaller)?;
        let processor =
            find_processor(processor_finder, Operation::Patch, &ctx.request().identity)?;
        processor.patch(ctx).await
    }
    .await;

    audit(auditer, ctx, &result);
    result
}

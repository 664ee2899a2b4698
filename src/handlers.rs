//! Handler shell around the dispatch pipeline.
//!
//! # Responsibilities
//! - Gate every operation on the relationship registry (405 before any
//!   user code runs)
//! - Run the dispatcher on its own task, racing it against cancellation
//! - Trap dispatcher panics and shape them into 500 responses
//! - Shape successful Contexts into wire Responses (status derivation,
//!   sparse projection, secret stripping, trace annotation)

use std::future::Future;
use std::sync::Arc;

use crate::context::{CancelCause, CancelHandle, Context};
use crate::dispatchers::{
    dispatch_create_operation, dispatch_delete_operation, dispatch_info_operation,
    dispatch_patch_operation, dispatch_retrieve_many_operation, dispatch_retrieve_operation,
    dispatch_update_operation,
};
use crate::model::{
    ApiError, Identity, ModelManager, Operation, RelationshipsRegistry, Request, Response,
};
use crate::server::CoreState;

/// Identity-aware redactor producing a safe copy of a response body for
/// trace logging. The wire body is never touched.
pub type TraceCleaner = Arc<dyn Fn(&Identity, &[u8]) -> Vec<u8> + Send + Sync>;

/// Whether the relationship registry permits the request's operation.
///
/// Retrieve, Update, and Delete address a single object and only accept an
/// absent (or root) parent; the collection operations substitute the root
/// identity when the parent is unset.
fn operation_allowed(registry: &RelationshipsRegistry, request: &Request) -> bool {
    let root = Identity::root();
    match request.operation {
        Operation::Retrieve | Operation::Update | Operation::Delete => {
            (request.parent_identity.is_empty() || request.parent_identity.is_root())
                && registry.is_operation_allowed(&request.identity, &root, request.operation)
        }
        _ => {
            let parent = if request.parent_identity.is_empty() {
                &root
            } else {
                &request.parent_identity
            };
            registry.is_operation_allowed(&request.identity, parent, request.operation)
        }
    }
}

/// The noun used in the canonical 405 message: collection operations name
/// the category, single-object operations the singular name.
fn gate_subject(request: &Request) -> &str {
    match request.operation {
        Operation::RetrieveMany | Operation::Info | Operation::Patch => {
            &request.identity.category
        }
        _ => &request.identity.name,
    }
}

/// Run one operation end to end: relationship gate, then the dispatcher
/// under the cancellation-aware runner.
///
/// `None` means the client gave up and nothing should be written back.
pub(crate) async fn handle_operation(mut ctx: Context, state: Arc<CoreState>) -> Option<Response> {
    let operation = ctx.request().operation;
    let response = Response::new(ctx.request().clone());

    let Some(manager) = state.manager(ctx.request().version) else {
        return Some(make_error_response(
            ctx.span(),
            response,
            ApiError::bad_request(format!(
                "No model manager for version {}",
                ctx.request().version
            )),
        ));
    };

    if !operation_allowed(manager.relationships(), ctx.request()) {
        let message = format!(
            "{operation} operation not allowed on {}",
            gate_subject(ctx.request())
        );
        return Some(make_error_response(
            ctx.span(),
            response,
            ApiError::not_allowed(message),
        ));
    }

    let span = ctx.span().clone();
    let cancel = ctx.cancel_handle();
    let disable_panic_recovery = state.disable_panic_recovery;
    let trace_cleaner = state.trace_cleaner.clone();

    let dispatcher = async move {
        let result = dispatch(&mut ctx, operation, &state, &manager).await;
        (ctx, result)
    };

    run_dispatcher(
        cancel,
        span,
        response,
        dispatcher,
        disable_panic_recovery,
        trace_cleaner,
    )
    .await
}

/// Table of per-operation dispatcher invocations; each operation consumes a
/// different subset of the collaborators.
async fn dispatch(
    ctx: &mut Context,
    operation: Operation,
    state: &CoreState,
    manager: &Arc<dyn ModelManager>,
) -> Result<(), ApiError> {
    let unmarshaller = state.unmarshallers.get(&ctx.request().identity.name);
    match operation {
        Operation::RetrieveMany => {
            dispatch_retrieve_many_operation(
                ctx,
                &state.processor_finder,
                &state.request_authenticators,
                &state.authorizers,
                state.auditer.as_ref(),
            )
            .await
        }
        Operation::Retrieve => {
            dispatch_retrieve_operation(
                ctx,
                &state.processor_finder,
                &state.request_authenticators,
                &state.authorizers,
                state.auditer.as_ref(),
            )
            .await
        }
        Operation::Create => {
            dispatch_create_operation(
                ctx,
                &state.processor_finder,
                manager,
                unmarshaller,
                &state.request_authenticators,
                &state.authorizers,
                state.pusher.as_ref(),
                state.auditer.as_ref(),
                state.read_only,
                &state.read_only_excluded,
            )
            .await
        }
        Operation::Update => {
            dispatch_update_operation(
                ctx,
                &state.processor_finder,
                manager,
                unmarshaller,
                &state.request_authenticators,
                &state.authorizers,
                state.pusher.as_ref(),
                state.auditer.as_ref(),
                state.read_only,
                &state.read_only_excluded,
            )
            .await
        }
        Operation::Delete => {
            dispatch_delete_operation(
                ctx,
                &state.processor_finder,
                &state.request_authenticators,
                &state.authorizers,
                state.pusher.as_ref(),
                state.auditer.as_ref(),
                state.read_only,
                &state.read_only_excluded,
            )
            .await
        }
        Operation::Info => {
            dispatch_info_operation(
                ctx,
                &state.processor_finder,
                &state.request_authenticators,
                &state.authorizers,
                state.auditer.as_ref(),
            )
            .await
        }
        Operation::Patch => {
            dispatch_patch_operation(
                ctx,
                &state.processor_finder,
                manager,
                unmarshaller,
                &state.request_authenticators,
                &state.authorizers,
                state.auditer.as_ref(),
                state.read_only,
                &state.read_only_excluded,
            )
            .await
        }
    }
}

/// Launch `dispatcher` on a fresh task and wait for whichever of
/// {cancellation, completion} fires first.
///
/// A plain cancellation yields `None` (the transport is abandoned); a
/// deadline yields a 408. A panicking dispatcher is trapped and shaped into
/// a 500 unless panic recovery is disabled, in which case it propagates.
pub(crate) async fn run_dispatcher<F>(
    mut cancel: CancelHandle,
    span: tracing::Span,
    response: Response,
    dispatcher: F,
    disable_panic_recovery: bool,
    trace_cleaner: Option<TraceCleaner>,
) -> Option<Response>
where
    F: Future<Output = (Context, Result<(), ApiError>)> + Send + 'static,
{
    let task = tokio::spawn(dispatcher);

    tokio::select! {
        cause = cancel.cancelled() => match cause {
            CancelCause::Cancelled => None,
            CancelCause::DeadlineExceeded => Some(make_error_response(
                &span,
                response,
                ApiError::timeout("The request took too long to complete"),
            )),
        },
        joined = task => match joined {
            Ok((ctx, Ok(()))) => Some(make_response(&ctx, response, trace_cleaner.as_ref())),
            Ok((_, Err(err))) => Some(make_error_response(&span, response, err)),
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                if disable_panic_recovery {
                    std::panic::resume_unwind(payload);
                }
                let description = panic_description(payload.as_ref());
                tracing::error!(panic = %description, "Recovered panic in dispatcher");
                Some(make_error_response(&span, response, ApiError::internal(description)))
            }
            Err(_) => None,
        },
    }
}

pub(crate) fn panic_description(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic".to_string()
    }
}

/// Shape a successful Context into its Response.
///
/// Panics if the output cannot be encoded; that is a programming error in
/// the model, not a runtime condition.
pub(crate) fn make_response(
    ctx: &Context,
    mut response: Response,
    trace_cleaner: Option<&TraceCleaner>,
) -> Response {
    if let Some(url) = ctx.redirect() {
        response.redirect = url.to_string();
        return response;
    }

    let span = ctx.span();

    response.status_code = match ctx.status_code() {
        Some(code) => code,
        None => match ctx.request().operation {
            Operation::Create => 201,
            Operation::Info => 204,
            _ => 200,
        },
    };

    if matches!(
        ctx.request().operation,
        Operation::RetrieveMany | Operation::Info
    ) {
        response.total = ctx.count();
        span.record("count_total", ctx.count());
    }

    if !ctx.messages().is_empty() {
        response.messages = ctx.messages().to_vec();
        span.record("messages", tracing::field::debug(&response.messages));
    }

    let Some(output) = ctx.output_data() else {
        response.status_code = 204;
        span.record("status.code", response.status_code);
        return response;
    };

    let fields = ctx.request().headers.values("X-Fields");
    let value = match output.to_wire_value(fields) {
        Ok(value) => value,
        Err(e) => panic!("unable to encode output data: {e}"),
    };
    if let Err(e) = response.encode(&value) {
        panic!("unable to encode output data: {e}");
    }

    let logged = clean_for_trace(trace_cleaner, &ctx.request().identity, &response.data);
    let logged = String::from_utf8_lossy(&logged);
    span.record("response", logged.as_ref());
    span.record("status.code", response.status_code);

    response
}

/// The bytes recorded on the trace span for a response body: the cleaner's
/// redacted copy when one is configured, the body itself otherwise.
pub(crate) fn clean_for_trace(
    cleaner: Option<&TraceCleaner>,
    identity: &Identity,
    data: &[u8],
) -> Vec<u8> {
    match cleaner {
        Some(clean) => clean(identity, data),
        None => data.to_vec(),
    }
}

/// Shape an error into the Response, stamping the trace identifier.
pub(crate) fn make_error_response(
    span: &tracing::Span,
    mut response: Response,
    err: ApiError,
) -> Response {
    let err = process_error(span, err);
    response.status_code = err.code;
    if let Err(e) = response.encode(&[err]) {
        panic!("unable to encode error: {e}");
    }
    response
}

/// Stamp the active span's identifier on the error (when a subscriber is
/// installed) and log server-side failures.
pub(crate) fn process_error(span: &tracing::Span, mut err: ApiError) -> ApiError {
    if err.trace == "unknown" {
        if let Some(id) = span.id() {
            err.trace = format!("{:x}", id.into_u64());
        }
    }
    if err.code >= 500 {
        tracing::error!(
            code = err.code,
            title = %err.title,
            description = %err.description,
            "Returning internal error to client",
        );
    }
    err
}

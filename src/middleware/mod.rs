//! Per-request event processor and middleware chain (§4.6).
//!
//! `Middleware` is grounded on two shapes from the retrieval pack: the
//! phase-trait design seen in plugin frameworks where a plugin implements
//! `access`/`header_filter`/... hooks with default no-op bodies, and the
//! ordered-chain-with-short-circuit pattern used by closure-based middleware
//! stacks. Neither crate is the teacher, so this module is written in the
//! teacher's own register (plain trait objects, `Vec<Box<dyn Trait>>`,
//! explicit loops rather than combinator chains) while keeping the phase
//! shape those references establish.

use crate::{plugin::PluginRegistry, session::Session, vhost::VirtualHostRouter, Request, Response};
use std::{future::Future, pin::Pin, sync::Arc};

/// Outcome of running one middleware's [`Middleware::process`] hook.
///
/// Unchanged routine table from spec.md §4.6. [`MiddlewareChain::run`] stops
/// walking the chain at the first middleware that returns anything other
/// than `Continue`.
#[derive(Debug, Clone, PartialEq)]
pub enum FileProcessArgs {
    /// Nothing decided yet; keep walking the chain.
    Continue,
    /// Stop walking `process`, but also skip every `post_process` hook for
    /// this request (the only routine that suppresses `post_process`).
    VirtualSkip,
    /// Reject the request outright (maps to a `PolicyRejected` response).
    Deny,
    /// An error occurred while processing; `Response` has already been
    /// filled in by the middleware that produced this.
    Error,
    /// No matching resource; respond 404.
    NotFound,
    /// Redirect to the path carried in the variant.
    Redirect(String),
    /// Serve a different path on the same virtual host.
    ServeOther(String),
    /// Serve a fully-qualified URL on a different host entirely.
    ServeOtherFq(String),
}

impl FileProcessArgs {
    /// Whether the chain should keep evaluating further middleware.
    pub const fn is_continue(&self) -> bool {
        matches!(self, FileProcessArgs::Continue)
    }
}

/// Everything one middleware hook needs: the request, the in-progress
/// response, the running routine decision, and (if the virtual host has one
/// configured) the active session.
///
/// Grounded on the teacher's pattern of passing `(&Request, &mut Response)`
/// straight into [`Handler::handle`](crate::Handler::handle); bundled into a
/// struct here because middleware also needs the routing decision and the
/// optional session threaded alongside.
pub struct HttpEntity<'a> {
    pub request: &'a Request,
    pub response: &'a mut Response,
    pub routine: FileProcessArgs,
    pub session: Option<&'a mut dyn Session>,
}

impl<'a> HttpEntity<'a> {
    pub fn new(request: &'a Request, response: &'a mut Response) -> Self {
        Self {
            request,
            response,
            routine: FileProcessArgs::Continue,
            session: None,
        }
    }
}

/// One stage of the request-processing chain.
///
/// `process` runs head-to-tail until one middleware returns a non-`Continue`
/// routine; `post_process` then runs over every middleware in the chain
/// (head-to-tail again) regardless of which one decided the routine, *unless*
/// the routine is `VirtualSkip` — the one routine that suppresses
/// `post_process` entirely, matching the Testable Property in spec.md §8.
///
/// Both hooks are declared asynchronous (§5: "an implementation may suspend
/// freely inside them", the same contract [`Handler::handle`
/// ](crate::Handler::handle) gets) — a middleware stage can await a database
/// lookup, a remote auth check, or a session fetch. `dyn Middleware` can't
/// carry an `async fn` directly (return-position `impl Trait` isn't
/// object-safe), so both hooks are written out by hand in the boxed-future
/// shape `async-trait` would generate.
pub trait Middleware: Send + Sync {
    fn process<'s, 'e: 's>(
        &'s self,
        entity: &'s mut HttpEntity<'e>,
    ) -> Pin<Box<dyn Future<Output = FileProcessArgs> + Send + 's>>;

    /// Runs after the chain's routine has been decided. Default: no-op.
    fn post_process<'s, 'e: 's>(
        &'s self,
        _entity: &'s mut HttpEntity<'e>,
        _routine: &'s FileProcessArgs,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 's>> {
        Box::pin(async {})
    }
}

/// An ordered list of [`Middleware`] stages run for every request on a
/// virtual host.
pub struct MiddlewareChain {
    stages: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Box<dyn Middleware>>) -> Self {
        Self { stages }
    }

    /// Runs the chain against `entity`, returning the routine decision.
    pub async fn run<'e>(&self, entity: &mut HttpEntity<'e>) -> FileProcessArgs {
        let mut routine = FileProcessArgs::Continue;

        for stage in &self.stages {
            routine = stage.process(entity).await;
            if !routine.is_continue() {
                break;
            }
        }

        if routine != FileProcessArgs::VirtualSkip {
            for stage in &self.stages {
                stage.post_process(entity, &routine).await;
            }
        }

        entity.routine = routine.clone();
        routine
    }
}

/// Bundles the optional per-server routing, middleware, and plugin wiring a
/// [`Server`](crate::Server) consults while running a request (§2, §4.5-§4.7).
///
/// Every field defaults to unset, so a host that never calls
/// [`ServerBuilder::vhost_router`](crate::server::server_impl::ServerBuilder::vhost_router)
/// gets exactly the teacher's original bare-[`Handler`](crate::Handler)
/// behavior — this struct only adds request routing for hosts that opt in.
#[derive(Clone)]
pub struct Pipeline {
    pub router: Option<Arc<VirtualHostRouter>>,
    pub chain: Option<Arc<MiddlewareChain>>,
    pub plugins: Option<Arc<PluginRegistry>>,
    pub content_language: &'static str,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            router: None,
            chain: None,
            plugins: None,
            content_language: "en-US",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{ReqLimits, RespLimits};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct Counting {
        seen: Arc<AtomicUsize>,
        result: FileProcessArgs,
    }

    impl Middleware for Counting {
        fn process<'s, 'e: 's>(
            &'s self,
            _entity: &'s mut HttpEntity<'e>,
        ) -> Pin<Box<dyn Future<Output = FileProcessArgs> + Send + 's>> {
            Box::pin(async move {
                self.seen.fetch_add(1, Ordering::SeqCst);
                self.result.clone()
            })
        }

        fn post_process<'s, 'e: 's>(
            &'s self,
            _entity: &'s mut HttpEntity<'e>,
            _routine: &'s FileProcessArgs,
        ) -> Pin<Box<dyn Future<Output = ()> + Send + 's>> {
            Box::pin(async move {
                self.seen.fetch_add(100, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn stops_process_at_first_non_continue() {
        let seen = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new(vec![
            Box::new(Counting {
                seen: seen.clone(),
                result: FileProcessArgs::Deny,
            }),
            Box::new(Counting {
                seen: seen.clone(),
                result: FileProcessArgs::Continue,
            }),
        ]);

        let req_limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let request = Request::new(&req_limits);
        let mut response = Response::new(&resp_limits);
        let mut entity = HttpEntity::new(&request, &mut response);

        let routine = chain.run(&mut entity).await;
        assert_eq!(routine, FileProcessArgs::Deny);
        // Only stage 1's `process` ran (1), but post_process ran on both (100 * 2).
        assert_eq!(seen.load(Ordering::SeqCst), 201);
    }

    #[tokio::test]
    async fn virtual_skip_suppresses_post_process() {
        let seen = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new(vec![Box::new(Counting {
            seen: seen.clone(),
            result: FileProcessArgs::VirtualSkip,
        })]);

        let req_limits = ReqLimits::default();
        let resp_limits = RespLimits::default();
        let request = Request::new(&req_limits);
        let mut response = Response::new(&resp_limits);
        let mut entity = HttpEntity::new(&request, &mut response);

        chain.run(&mut entity).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

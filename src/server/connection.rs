use crate::{
    errors::{ErrorKind, Malformed},
    event,
    http::{
        request::{Parser, Request},
        response::Response,
        types::{StatusCode, Version},
    },
    limits::{ConnLimits, Http09Limits, ReqLimits, RespLimits, ServerLimits},
    middleware::{FileProcessArgs, HttpEntity, Pipeline},
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{
    any::Any,
    future::{poll_fn, Future},
    io,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
    task::Poll,
    time::Instant,
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

/// Written ahead of the real response when the request carried `Expect:
/// 100-continue` and the declared `Content-Length` is within policy (§4.4).
const CONTINUE_PREAMBLE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) http_09_limits: Option<Http09Limits>,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
    pub(crate) pipeline: Pipeline,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            parser: Parser::new(&limits.3),
            request: Request::new(&limits.3),
            response: Response::new(&limits.4),

            server_limits: limits.0,
            conn_limits: limits.1,
            http_09_limits: limits.2,
            req_limits: limits.3,
            resp_limits: limits.4,
            pipeline: limits.5,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.request.client_addr = client_addr;
        self.request.server_addr = server_addr;

        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            Err(error) => {
                self.conn_limits
                    .send_error(
                        stream,
                        error,
                        self.request.version(),
                        self.server_limits.json_errors,
                    )
                    .await
            }
        }
    }

    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        while !self.is_expired()? {
            self.reset_request_response();

            if self
                .parser
                .fill_buffer(stream, self.conn_limits.socket_read_timeout)
                .await?
                == 0
            {
                break;
            }
            self.response.version = self.parse()?;

            if self.response.needs_continue_preamble {
                self.response.needs_continue_preamble = false;
                self.conn_limits
                    .write_bytes(stream, CONTINUE_PREAMBLE)
                    .await?;
            }

            self.run_pipeline().await?;

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            if self.response.upgraded {
                self.handler.upgrade(&mut self.connection_data, stream).await;
                break;
            }

            if !self.response.keep_alive {
                break;
            }

            self.connection.request_count += 1;
        }

        Ok(())
    }

    /// Routes, runs the middleware chain, dispatches to a plugin endpoint,
    /// and finishes the request through the event processor (§2, §4.5-§4.7).
    ///
    /// Without a configured [`VirtualHostRouter`](crate::vhost::VirtualHostRouter)
    /// this falls straight back to the bare [`Handler::handle`] call, so a
    /// host that never opts into routing sees no behavioral change.
    #[inline]
    async fn run_pipeline(&mut self) -> Result<(), ErrorKind> {
        let Some(router) = self.pipeline.router.clone() else {
            self.invoke_handler().await;
            return Ok(());
        };

        let host = self.request.header(b"host").unwrap_or(b"");
        let path = self.request.url().path().to_vec();
        let client_ip = self.request.client_addr().ip();
        let server_addr = self.request.server_addr();

        let config = router.route(server_addr, host, &path, client_ip)?;

        let chain = self.pipeline.chain.clone();
        let plugins = self.pipeline.plugins.clone();
        let content_language = self.pipeline.content_language;

        let routine = {
            let mut entity = HttpEntity::new(&self.request, &mut self.response);

            let mut routine = match &chain {
                Some(chain) => chain.run(&mut entity).await,
                None => FileProcessArgs::Continue,
            };

            if routine.is_continue() {
                if let Some(plugins) = &plugins {
                    let snapshot = plugins.snapshot();
                    let path_str = std::str::from_utf8(&path).unwrap_or("");

                    if let Some(endpoint) = snapshot.endpoint(path_str) {
                        let handler = endpoint.handler.clone();

                        routine = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                            handler.handle(&mut entity)
                        })) {
                            Ok(routine) => routine,
                            Err(payload) => {
                                tracing::error!(
                                    panic = %panic_message(&payload),
                                    endpoint = path_str,
                                    "plugin endpoint handler panicked"
                                );
                                FileProcessArgs::Error
                            }
                        };
                    }
                }
            }

            routine
        };

        match routine {
            FileProcessArgs::Continue => {
                event::finish(&mut self.response, config, &path, false, content_language).await;
            }
            FileProcessArgs::VirtualSkip => {}
            FileProcessArgs::ServeOther(target) => {
                event::finish_other(&mut self.response, config, &target, false, false, content_language)
                    .await;
            }
            FileProcessArgs::ServeOtherFq(target) => {
                event::finish_other(&mut self.response, config, &target, true, false, content_language)
                    .await;
            }
            other => {
                event::finish_routine(&mut self.response, &other);
            }
        }

        Ok(())
    }

    /// Calls the bare [`Handler::handle`], isolated from its own panics
    /// (§7): a handler panic is caught, logged with context, and turned into
    /// a closed `500` instead of taking down the whole connection (or, with
    /// `panic = 'abort'`, the process).
    #[inline]
    async fn invoke_handler(&mut self) {
        let outcome = catch_unwind_future(self.handler.handle(
            &mut self.connection_data,
            &self.request,
            &mut self.response,
        ))
        .await;

        if let Err(payload) = outcome {
            tracing::error!(panic = %panic_message(&payload), "handler panicked, closing connection");
            self.write_panic_response();
        }
    }

    fn write_panic_response(&mut self) {
        self.response.reset(&self.resp_limits);
        self.response
            .status(StatusCode::InternalServerError)
            .close()
            .body("Internal Server Error");
    }
}

/// Polls `future` to completion, catching any panic raised from inside it.
///
/// `Box::pin` makes the boxed future `Unpin` regardless of `F`, which is
/// what lets [`poll_fn`] hand out a plain `&mut` to `poll` on every wakeup
/// without a manual unsafe pin projection.
async fn catch_unwind_future<F: Future>(future: F) -> Result<F::Output, Box<dyn Any + Send>> {
    let mut future = Box::pin(future);

    poll_fn(move |cx| {
        match std::panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    })
    .await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        version: Version,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        self.write_bytes(stream, error.as_http(version, json_errors))
            .await
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

macro_rules! is_expired {
    ($self:expr, $limits:expr) => {
        Ok(!$self.response.keep_alive
            || $self.connection.request_count >= $limits.max_requests_per_connection
            || $self.connection.created.elapsed() > $limits.connection_lifetime)
    };
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn is_expired(&self) -> Result<bool, ErrorKind> {
        match (self.response.version, &self.http_09_limits) {
            (Version::Http09, Some(limits)) => is_expired!(self, limits),
            (Version::Http09, None) => Err(ErrorKind::Malformed(Malformed::UnsupportedVersion)),
            _ => is_expired!(self, self.conn_limits),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
    }
}

//

/// Managing user session data stored between requests within a single HTTP connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication data,
/// multistep form status, cache, etc.). The state is available across all requests
/// within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use maker_web::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
///
/// Check out a [real-world example
/// ](https://github.com/AmakeSashaDev/maker_web/blob/main/examples/request_counter.rs)
/// (well, almost)
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use maker_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use maker_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// Two-stage filtering with cache:
/// ```
/// use std::{collections::HashSet, sync::RwLock, net::{SocketAddr, IpAddr}};
/// use maker_web::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     cache: RwLock<HashSet<IpAddr>>,
///     db: DatabaseClient,
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         let Ok(guard) = self.cache.read() else {
///             return Err(err_resp.status(StatusCode::InternalServerError)
///                 .body("Internal server error"));
///         };
///
///         if guard.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             let Ok(mut guard) = self.cache.write() else {
///                 return Err(err_resp.status(StatusCode::InternalServerError)
///                     .body("Internal server error"));
///             };
///             guard.insert(client_addr.ip());
///
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds.Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                http_09_limits: None,
                req_limits,
                resp_limits,
                pipeline: Pipeline::default(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Handled, StatusCode};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn writes_100_continue_preamble_before_invoking_handler() {
        struct EchoBody;

        impl Handler<()> for EchoBody {
            async fn handle(&self, _: &mut (), req: &Request, r: &mut Response) -> Handled {
                r.status(StatusCode::Ok).body(req.body().unwrap_or(b""))
            }
        }

        let (mut server_stream, mut client_stream) = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let connect = TcpStream::connect(addr);
            let (accepted, connected) =
                tokio::join!(async { listener.accept().await.unwrap().0 }, connect);
            (accepted, connected.unwrap())
        };

        let req_limits = ReqLimits::default().precalculate();
        let resp_limits = RespLimits::default();
        let mut conn = HttpConnection {
            handler: Arc::new(EchoBody),
            connection_data: (),
            connection: Connection::new(),
            parser: Parser::new(&req_limits),
            request: Request::new(&req_limits),
            response: Response::new(&resp_limits),
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            http_09_limits: None,
            req_limits,
            resp_limits,
            pipeline: Pipeline::default(),
        };

        let body = "hi";
        let request = format!(
            "POST / HTTP/1.1\r\nHost: x\r\nContent-Length: {}\r\nExpect: 100-continue\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );

        let client = tokio::spawn(async move {
            client_stream.write_all(request.as_bytes()).await.unwrap();

            let mut out = Vec::new();
            client_stream.read_to_end(&mut out).await.unwrap();
            out
        });

        conn.run(
            &mut server_stream,
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        )
        .await
        .unwrap();
        drop(server_stream);

        let received = client.await.unwrap();
        let received = String::from_utf8_lossy(&received);

        assert!(received.starts_with("HTTP/1.1 100 Continue\r\n\r\n"));
        assert!(received.ends_with("hi"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upgrade_hands_off_the_raw_stream() {
        struct Upgrader;

        impl Handler<()> for Upgrader {
            async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
                r.status(StatusCode::SwitchingProtocols)
                    .header("upgrade", "echo")
                    .header("connection", "Upgrade")
                    .upgrade()
            }

            async fn upgrade(&self, _: &mut (), stream: &mut TcpStream) {
                let _ = stream.write_all(b"raw-bytes").await;
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (mut server_stream, mut client_stream) =
            tokio::join!(async { listener.accept().await.unwrap().0 }, async {
                connect.await.unwrap()
            });

        let req_limits = ReqLimits::default().precalculate();
        let resp_limits = RespLimits::default();
        let mut conn = HttpConnection {
            handler: Arc::new(Upgrader),
            connection_data: (),
            connection: Connection::new(),
            parser: Parser::new(&req_limits),
            request: Request::new(&req_limits),
            response: Response::new(&resp_limits),
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            http_09_limits: None,
            req_limits,
            resp_limits,
            pipeline: Pipeline::default(),
        };

        let client = tokio::spawn(async move {
            client_stream
                .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
                .await
                .unwrap();

            let mut out = Vec::new();
            client_stream.read_to_end(&mut out).await.unwrap();
            out
        });

        conn.run(
            &mut server_stream,
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        )
        .await
        .unwrap();
        drop(server_stream);

        let received = client.await.unwrap();
        let received = String::from_utf8_lossy(&received);

        assert!(received.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(received.ends_with("raw-bytes"));
    }
}

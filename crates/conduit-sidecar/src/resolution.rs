//! Answers `Listen` and `Open` requests from the route table.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use conduit_protocol::{
    CodecError, ErrorCode, ErrorReply, ListenReply, Reply, Request, read_message, write_message,
};
use tracing::{debug, info, warn};

use crate::routes::{RouteError, RouteTable};
use crate::transport::{ConnectionHandler, ConnectionStream};

const RESOLUTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::resolution");

/// Serves one request per connection from a shared [`RouteTable`].
#[derive(Debug)]
pub struct ResolutionHandler {
    routes: Arc<RouteTable>,
    served: AtomicUsize,
}

impl ResolutionHandler {
    /// Builds a handler over `routes`.
    #[must_use]
    pub const fn new(routes: Arc<RouteTable>) -> Self {
        Self {
            routes,
            served: AtomicUsize::new(0),
        }
    }

    /// Number of connections handled so far.
    #[must_use]
    pub fn connections_served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    /// Computes the reply for a decoded request.
    #[must_use]
    pub fn respond(&self, request: &Request) -> Reply {
        match request {
            Request::Listen(listen) => match self.routes.listen(&listen.service_addr) {
                Ok(listen_addr) => {
                    info!(
                        target: RESOLUTION_TARGET,
                        service_addr = %listen.service_addr,
                        listen_addr = %listen_addr,
                        "registered listener"
                    );
                    Reply::Listen(ListenReply { listen_addr })
                }
                Err(error) => declined(ErrorCode::RegistrationRejected, &error),
            },
            Request::Open(open) => match self.routes.open(&open.dst_addr) {
                Ok(reply) => {
                    debug!(
                        target: RESOLUTION_TARGET,
                        dst_addr = %open.dst_addr,
                        addr_type = %reply.addr_type,
                        send_addr = %reply.send_addr,
                        "resolved destination"
                    );
                    Reply::Open(reply)
                }
                Err(error) => declined(ErrorCode::UnresolvedDestination, &error),
            },
        }
    }

    fn reply_for(&self, request: Result<Request, CodecError>) -> Reply {
        match request {
            Ok(request) => self.respond(&request),
            Err(error) => {
                warn!(
                    target: RESOLUTION_TARGET,
                    error = %error,
                    "malformed request"
                );
                Reply::Error(ErrorReply::new(
                    ErrorCode::MalformedRequest,
                    error.to_string(),
                ))
            }
        }
    }
}

fn declined(code: ErrorCode, error: &RouteError) -> Reply {
    debug!(
        target: RESOLUTION_TARGET,
        code = ?code,
        error = %error,
        "request declined"
    );
    Reply::Error(ErrorReply::new(code, error.to_string()))
}

impl ConnectionHandler for ResolutionHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        self.served.fetch_add(1, Ordering::SeqCst);
        let request = match read_message::<_, Request>(&mut stream) {
            Ok(Some(request)) => Ok(request),
            Ok(None) => return,
            Err(CodecError::Read(error)) => {
                warn!(
                    target: RESOLUTION_TARGET,
                    error = %error,
                    "failed to read request"
                );
                return;
            }
            Err(error) => Err(error),
        };

        let reply = self.reply_for(request);
        if let Err(error) = write_message(&mut stream, &reply) {
            warn!(
                target: RESOLUTION_TARGET,
                error = %error,
                "failed to write reply"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_protocol::{AddressFamily, OpenReply, ResolvedTarget};
    use rstest::{fixture, rstest};
    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[fixture]
    fn handler() -> Arc<ResolutionHandler> {
        let routes = RouteTable::new();
        let target = ResolvedTarget::new(AddressFamily::Tcp, "127.0.0.1:9999").expect("target");
        routes.set_route("svcA", &target);
        Arc::new(ResolutionHandler::new(Arc::new(routes)))
    }

    fn exchange(handler: &Arc<ResolutionHandler>, line: &[u8]) -> String {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind");
        let addr = listener.local_addr().expect("address");
        let server_handler = Arc::clone(handler);
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            server_handler.handle(ConnectionStream::Tcp(stream));
        });
        let mut client = TcpStream::connect(addr).expect("connect");
        client.write_all(line).expect("write request");
        let mut reply = String::new();
        BufReader::new(&mut client)
            .read_line(&mut reply)
            .expect("read reply");
        server.join().expect("join server");
        reply
    }

    #[rstest]
    fn open_is_answered_from_routes(handler: Arc<ResolutionHandler>) {
        let reply = handler.respond(&Request::open("svcA"));
        assert_eq!(
            reply,
            Reply::Open(OpenReply::new(AddressFamily::Tcp, "127.0.0.1:9999"))
        );
    }

    #[rstest]
    fn unknown_destination_is_unresolved(handler: Arc<ResolutionHandler>) {
        let Reply::Error(error) = handler.respond(&Request::open("svcZ")) else {
            panic!("expected error reply");
        };
        assert_eq!(error.code, ErrorCode::UnresolvedDestination);
    }

    #[rstest]
    fn duplicate_listen_is_rejected(handler: Arc<ResolutionHandler>) {
        assert!(matches!(
            handler.respond(&Request::listen("svcA")),
            Reply::Listen(_)
        ));
        let Reply::Error(error) = handler.respond(&Request::listen("svcA")) else {
            panic!("expected error reply");
        };
        assert_eq!(error.code, ErrorCode::RegistrationRejected);
    }

    #[rstest]
    fn socket_exchange_returns_one_reply_line(handler: Arc<ResolutionHandler>) {
        let reply = exchange(&handler, b"{\"operation\":\"open\",\"dst_addr\":\"svcA\"}\n");
        assert!(reply.contains("\"kind\":\"open\""));
        assert!(reply.contains("\"send_addr\":\"127.0.0.1:9999\""));
        assert_eq!(handler.connections_served(), 1);
    }

    #[rstest]
    fn garbage_gets_malformed_request(handler: Arc<ResolutionHandler>) {
        let reply = exchange(&handler, b"definitely not json\n");
        assert!(reply.contains("\"code\":\"malformed_request\""));
    }

    #[rstest]
    fn unknown_fields_are_ignored(handler: Arc<ResolutionHandler>) {
        let reply = exchange(
            &handler,
            b"{\"operation\":\"open\",\"dst_addr\":\"svcA\",\"trace\":\"x\"}\n",
        );
        assert!(reply.contains("\"kind\":\"open\""));
    }
}

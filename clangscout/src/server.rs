/// This module implements the persistent query server.
///
/// # Protocol
///
/// One TCP connection carries exactly one exchange:
/// ```text
/// client -> server   match functionDecl(isExpansionInMainFile())\n
/// server -> client   {"matches":["a.cpp:3:1: note: \"root\" binds here\n..."]}\n
/// ```
/// after which the server closes the connection and accepts the next one.
///
/// Connections are handled strictly one after another on the accepting thread,
/// so at most one dispatch round is in flight per process. The dispatcher's
/// concurrency limit therefore bounds the whole server, not just one request.
use std::io::{self, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Workload};
use crate::errors::{ScoutError, ScoutResult};
use crate::invoker::QueryInvoker;
use crate::oneshot::read_query;
use crate::results::QueryResponse;

/// Expands a listen address into the candidates tried in order.
///
/// A bare `:port` prefers the IPv6 wildcard, which also accepts IPv4 clients on
/// dual-stack hosts, and falls back to the IPv4 wildcard.
pub fn resolve_listen_addrs(addr: &str) -> Vec<String> {
    if addr.starts_with(':') {
        vec![format!("[::]{}", addr), format!("0.0.0.0{}", addr)]
    } else {
        vec![addr.to_string()]
    }
}

fn bind_first(addr: &str) -> ScoutResult<TcpListener> {
    let mut last_error = None;
    for candidate in resolve_listen_addrs(addr) {
        match TcpListener::bind(&candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!("Could not bind {}: {}", candidate, e);
                last_error = Some(e);
            }
        }
    }
    let source = last_error
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no address to bind"));
    Err(ScoutError::bind(addr, source))
}

/// Answers one query per connection using a fixed workload
#[derive(Debug)]
pub struct QueryServer<I> {
    listener: TcpListener,
    dispatcher: Dispatcher<I>,
    workload: Workload,
    locations_only: bool,
}

impl<I: QueryInvoker> QueryServer<I> {
    /// Binds the listening socket. Failing to bind is fatal.
    pub fn bind(addr: &str, dispatcher: Dispatcher<I>, workload: Workload) -> ScoutResult<Self> {
        let listener = bind_first(addr)?;

        info!("Listening on {}", listener.local_addr()?);
        info!("Working on files:");
        for file in &workload.files {
            info!("    {}", file);
        }

        Ok(Self {
            listener,
            dispatcher,
            workload,
            locations_only: false,
        })
    }

    /// Respond with binding locations instead of full match bodies
    pub fn with_locations_only(mut self, locations_only: bool) -> Self {
        self.locations_only = locations_only;
        self
    }

    pub fn local_addr(&self) -> ScoutResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until accepting one fails
    pub fn serve(&self) -> ScoutResult<()> {
        loop {
            self.handle_next()?;
        }
    }

    /// Accepts and answers a single connection.
    ///
    /// Only an accept failure is returned; anything that goes wrong on the
    /// connection itself is logged and the connection dropped.
    pub fn handle_next(&self) -> ScoutResult<()> {
        let (stream, peer) = self.listener.accept().map_err(ScoutError::Accept)?;
        debug!("Accepted connection from {}", peer);

        if let Err(e) = self.handle_connection(&stream) {
            warn!("Connection from {} failed: {}", peer, e);
        }
        Ok(())
    }

    fn handle_connection(&self, stream: &TcpStream) -> ScoutResult<()> {
        let mut reader = BufReader::new(stream);
        let Some(query) = read_query(&mut reader)? else {
            debug!("Connection closed before a query was sent");
            return Ok(());
        };

        info!("Message received: {}", query);

        let outcome = self.dispatcher.dispatch_workload(&self.workload, &query)?;
        let matches = outcome.matches.into_sorted();
        info!("Found {} matches", matches.len());

        let response = if self.locations_only {
            QueryResponse::from_locations(&matches)
        } else {
            QueryResponse::from_matches(&matches)
        };

        let mut body = serde_json::to_string(&response)?;
        body.push('\n');

        let mut writer = stream;
        writer.write_all(body.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

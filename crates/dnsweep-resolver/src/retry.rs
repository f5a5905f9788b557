//! Retry policy around the wire client.
//!
//! For a single `(question, server)` pair: attempt over UDP (unless the
//! transport policy says otherwise), re-ask over TCP when the reply is
//! truncated without spending a retry slot, and spend the shared budget on
//! timeouts and transient network failures. A truncated answer is never
//! returned to the caller; the TCP result replaces it.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::answer::Protocol;
use crate::client::{build_query, QueryOptions, WireClient};
use crate::question::QuestionWithMetadata;
use crate::{Resolver, ResolverError, Result, TransportPolicy};

impl Resolver {
    pub(crate) fn query_options(&self, recursion_desired: bool) -> QueryOptions {
        QueryOptions {
            recursion_desired,
            dnssec_ok: self.config().dnssec,
            checking_disabled: self.config().checking_disabled,
            nsid: self.config().nsid,
            client_subnet: self.config().client_subnet.clone(),
        }
    }

    /// Sends `qm` to `server`, retrying per the shared budget, and returns
    /// the reply with the transport it finally arrived over.
    pub(crate) async fn retrying_send(
        &self,
        client: &WireClient,
        server: SocketAddr,
        qm: &QuestionWithMetadata,
        recursion_desired: bool,
    ) -> Result<(hickory_proto::op::Message, Protocol, Duration)> {
        if !self.config().ip_family.allows(server.ip()) {
            return Err(ResolverError::Config(format!(
                "destination {server} is outside the configured transport family"
            )));
        }

        let opts = self.query_options(recursion_desired);
        let first_transport = match self.config().transport {
            TransportPolicy::TcpOnly => Protocol::Tcp,
            TransportPolicy::Auto | TransportPolicy::UdpOnly => Protocol::Udp,
        };

        // The first protocol error (malformed reply, ID mismatch) gets a
        // free re-ask; after that it spends the budget like any failure.
        let mut protocol_error_forgiven = false;

        loop {
            let query = build_query(&qm.question, &opts);
            let started = Instant::now();

            let outcome = client.send(server, &query, first_transport).await;

            let err = match outcome {
                Ok(reply) if reply.truncated() && first_transport == Protocol::Udp => {
                    if self.config().transport == TransportPolicy::UdpOnly {
                        return Err(ResolverError::Truncated);
                    }
                    trace!(server = %server, "reply truncated, re-asking over TCP");
                    match client.send(server, &query, Protocol::Tcp).await {
                        Ok(tcp_reply) => {
                            return Ok((tcp_reply, Protocol::Tcp, started.elapsed()));
                        }
                        Err(err) => err,
                    }
                }
                Ok(reply) => return Ok((reply, first_transport, started.elapsed())),
                Err(err) => err,
            };

            if matches!(err, ResolverError::Protocol(_)) && !protocol_error_forgiven {
                protocol_error_forgiven = true;
                debug!(server = %server, error = %err, "protocol error, one free re-ask");
                continue;
            }

            if !err.is_transient() && !matches!(err, ResolverError::Protocol(_)) {
                return Err(err);
            }

            let budget = qm.retries_remaining.fetch_sub(1, Ordering::SeqCst);
            if budget <= 0 {
                trace!(server = %server, error = %err, "retry budget exhausted");
                return Err(err);
            }
            debug!(
                server = %server,
                error = %err,
                remaining = budget - 1,
                "retrying query"
            );
        }
    }
}

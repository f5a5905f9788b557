//! The wire client: one message, one server, one reply.
//!
//! UDP sends go through the worker's pooled socket; replies are matched on
//! source address, transaction ID, and the question tuple, and anything
//! else arriving on the socket is skipped while the timeout runs. TCP dials
//! per call from the configured local address and reads one length-prefixed
//! message back.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::opt::EdnsOption;
use ipnet::IpNet;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, UdpSocket};
use tokio::time::timeout;
use tracing::trace;

use crate::answer::Protocol;
use crate::question::Question;
use crate::{ResolverError, Result};

/// EDNS0 advertised payload size.
const EDNS_PAYLOAD: u16 = 1232;

/// EDNS option codes the codec models generically.
const EDNS_CODE_NSID: u16 = 3;
const EDNS_CODE_CLIENT_SUBNET: u16 = 8;

/// Knobs copied onto each outgoing message.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub recursion_desired: bool,
    pub dnssec_ok: bool,
    pub checking_disabled: bool,
    pub nsid: bool,
    pub client_subnet: Option<IpNet>,
}

/// Builds a wire query for `question` with a fresh transaction ID.
pub fn build_query(question: &Question, opts: &QueryOptions) -> Message {
    let mut query = Query::new();
    query.set_name(question.name.clone());
    query.set_query_type(question.qtype);
    query.set_query_class(question.qclass);

    let mut msg = Message::new();
    msg.set_id(rand::random::<u16>());
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.add_query(query);
    msg.set_recursion_desired(opts.recursion_desired);
    msg.set_checking_disabled(opts.checking_disabled);

    let mut edns = Edns::new();
    edns.set_max_payload(EDNS_PAYLOAD);
    edns.set_version(0);
    edns.set_dnssec_ok(opts.dnssec_ok);
    if opts.nsid {
        edns.options_mut()
            .insert(EdnsOption::Unknown(EDNS_CODE_NSID, Vec::new()));
    }
    if let Some(net) = &opts.client_subnet {
        edns.options_mut().insert(EdnsOption::Unknown(
            EDNS_CODE_CLIENT_SUBNET,
            encode_client_subnet(net),
        ));
    }
    msg.set_edns(edns);

    msg
}

/// RFC 7871 wire form: family, source prefix length, scope prefix length
/// (zero on queries), then the significant address bytes.
fn encode_client_subnet(net: &IpNet) -> Vec<u8> {
    let (family, octets): (u16, Vec<u8>) = match net {
        IpNet::V4(v4) => (1, v4.network().octets().to_vec()),
        IpNet::V6(v6) => (2, v6.network().octets().to_vec()),
    };
    let prefix = net.prefix_len();
    let significant = (usize::from(prefix) + 7) / 8;

    let mut out = Vec::with_capacity(4 + significant);
    out.extend_from_slice(&family.to_be_bytes());
    out.push(prefix);
    out.push(0);
    out.extend_from_slice(&octets[..significant]);
    out
}

/// Sends one DNS message to one server and returns the matching reply.
#[derive(Clone)]
pub struct WireClient {
    socket: Arc<UdpSocket>,
    local_addr: std::net::IpAddr,
    timeout: Duration,
}

impl WireClient {
    pub fn new(socket: Arc<UdpSocket>, local_addr: std::net::IpAddr, timeout: Duration) -> Self {
        Self {
            socket,
            local_addr,
            timeout,
        }
    }

    /// The same client with a tighter per-attempt timeout, used by the
    /// iterative engine to bound each hop.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            socket: self.socket.clone(),
            local_addr: self.local_addr,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends `query` over the requested transport and awaits the reply.
    pub async fn send(
        &self,
        server: SocketAddr,
        query: &Message,
        protocol: Protocol,
    ) -> Result<Message> {
        match protocol {
            Protocol::Udp => self.send_udp(server, query).await,
            Protocol::Tcp => self.send_tcp(server, query).await,
        }
    }

    async fn send_udp(&self, server: SocketAddr, query: &Message) -> Result<Message> {
        let wire = query.to_vec()?;
        self.socket.send_to(&wire, server).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; 65_535];

        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(ResolverError::Timeout)?;
            let (len, from) = timeout(remaining, self.socket.recv_from(&mut buf))
                .await
                .map_err(|_| ResolverError::Timeout)??;

            if from != server {
                trace!(from = %from, expected = %server, "datagram from unexpected source");
                continue;
            }

            let response = Message::from_vec(&buf[..len])
                .map_err(|err| ResolverError::Protocol(format!("malformed reply: {err}")))?;

            if response.id() != query.id() {
                trace!(
                    got = response.id(),
                    expected = query.id(),
                    "transaction ID mismatch, still waiting"
                );
                continue;
            }
            if !question_matches(query, &response) {
                trace!("question mismatch, still waiting");
                continue;
            }

            return Ok(response);
        }
    }

    async fn send_tcp(&self, server: SocketAddr, query: &Message) -> Result<Message> {
        let socket = if server.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        // Pin the source address when the families line up.
        if self.local_addr.is_ipv4() == server.is_ipv4() {
            socket.bind(SocketAddr::new(self.local_addr, 0))?;
        }

        let mut stream = timeout(self.timeout, socket.connect(server))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        let wire = query.to_vec()?;
        let len = wire.len() as u16;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(&wire).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;
        let response_len = usize::from(u16::from_be_bytes(len_buf));

        let mut response_buf = vec![0u8; response_len];
        timeout(self.timeout, stream.read_exact(&mut response_buf))
            .await
            .map_err(|_| ResolverError::Timeout)??;

        let response = Message::from_vec(&response_buf)
            .map_err(|err| ResolverError::Protocol(format!("malformed reply: {err}")))?;

        if response.id() != query.id() {
            return Err(ResolverError::Protocol("response ID mismatch".to_string()));
        }
        if !question_matches(query, &response) {
            return Err(ResolverError::Protocol(
                "response question mismatch".to_string(),
            ));
        }

        Ok(response)
    }
}

/// Case-insensitive comparison of the question tuples.
fn question_matches(query: &Message, response: &Message) -> bool {
    match (query.queries().first(), response.queries().first()) {
        (Some(sent), Some(got)) => {
            sent.name().to_lowercase() == got.name().to_lowercase()
                && sent.query_type() == got.query_type()
                && sent.query_class() == got.query_class()
        }
        (None, None) => true,
        _ => false,
    }
}

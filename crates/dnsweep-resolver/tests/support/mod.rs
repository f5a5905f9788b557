//! In-process DNS servers answering scripted responses.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};

/// Builds a reply for a parsed query, or `None` to drop the datagram.
pub type Responder = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// Starts a response skeleton: matching ID, echoed question, QR set.
pub fn response_for(query: &Message) -> Message {
    let mut msg = Message::new();
    msg.set_id(query.id());
    msg.set_message_type(MessageType::Response);
    msg.set_op_code(OpCode::Query);
    if let Some(question) = query.queries().first() {
        msg.add_query(question.clone());
    }
    msg
}

/// The name/type pair of a query, for scripting responders.
pub fn question_of(query: &Message) -> (String, hickory_proto::rr::RecordType) {
    query
        .queries()
        .first()
        .map(|q| (q.name().to_lowercase().to_string(), q.query_type()))
        .unwrap_or_else(|| (String::new(), hickory_proto::rr::RecordType::A))
}

/// Serves `responder` on an already-bound UDP socket.
pub fn serve_udp(socket: UdpSocket, responder: Responder) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };
            if let Some(reply) = responder(&query) {
                let Ok(wire) = reply.to_vec() else { continue };
                let _ = socket.send_to(&wire, from).await;
            }
        }
    });
}

/// Binds and serves a UDP responder, returning its address.
pub async fn spawn_udp(bind: &str, responder: Responder) -> SocketAddr {
    let socket = UdpSocket::bind(bind).await.expect("bind mock server");
    let addr = socket.local_addr().expect("mock server address");
    serve_udp(socket, responder);
    addr
}

/// Serves a TCP responder (length-prefixed messages) on `addr`.
pub async fn spawn_tcp(addr: SocketAddr, responder: Responder) {
    let listener = TcpListener::bind(addr).await.expect("bind mock TCP server");
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let responder = responder.clone();
            tokio::spawn(async move {
                let mut len_buf = [0u8; 2];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    return;
                }
                let len = usize::from(u16::from_be_bytes(len_buf));
                let mut buf = vec![0u8; len];
                if stream.read_exact(&mut buf).await.is_err() {
                    return;
                }
                let Ok(query) = Message::from_vec(&buf) else {
                    return;
                };
                if let Some(reply) = responder(&query) {
                    let Ok(wire) = reply.to_vec() else { return };
                    let len = wire.len() as u16;
                    let _ = stream.write_all(&len.to_be_bytes()).await;
                    let _ = stream.write_all(&wire).await;
                }
            });
        }
    });
}

/// Binds one socket per loopback IP, all sharing a single port, so referral
/// glue (which carries only IPs) can land on distinct mock servers.
pub async fn bind_same_port(ips: &[&str]) -> Vec<UdpSocket> {
    'attempt: for _ in 0..32 {
        let first = UdpSocket::bind((ips[0], 0)).await.expect("bind first mock");
        let port = first.local_addr().expect("mock address").port();
        let mut sockets = vec![first];
        for ip in &ips[1..] {
            match UdpSocket::bind((*ip, port)).await {
                Ok(socket) => sockets.push(socket),
                Err(_) => continue 'attempt,
            }
        }
        return sockets;
    }
    panic!("could not find a shared free port across loopback addresses");
}

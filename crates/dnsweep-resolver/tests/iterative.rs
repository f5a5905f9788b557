//! End-to-end iterative resolution against mock root, TLD, and
//! authoritative servers on loopback.

mod support;

use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::{A, NS};
use hickory_proto::rr::{Name, RData, Record, RecordType};

use dnsweep_resolver::{
    Blacklist, Layer, Question, Resolver, ResolverConfig, Status,
};

use support::{bind_same_port, response_for, serve_udp, Responder};

fn a_record(name: &str, ip: Ipv4Addr, ttl: u32) -> Record {
    Record::from_rdata(Name::from_str(name).unwrap(), ttl, RData::A(A(ip)))
}

fn ns_record(zone: &str, target: &str) -> Record {
    Record::from_rdata(
        Name::from_str(zone).unwrap(),
        172_800,
        RData::NS(NS(Name::from_str(target).unwrap())),
    )
}

/// Referral: NS in authority, glue in additional, nothing in answer.
fn referral(zone: &str, ns: &str, glue: Ipv4Addr) -> impl Fn(&mut hickory_proto::op::Message) {
    let zone = zone.to_string();
    let ns = ns.to_string();
    move |msg| {
        msg.add_name_server(ns_record(&zone, &ns));
        msg.add_additional(a_record(&ns, glue, 172_800));
    }
}

fn iterative_config(root: std::net::SocketAddr) -> ResolverConfig {
    ResolverConfig {
        iterative: true,
        name_servers: vec![root],
        destination_port: root.port(),
        local_addr: Some("127.0.0.1".parse().unwrap()),
        workers: 1,
        timeout: Duration::from_secs(5),
        iteration_step_timeout: Duration::from_secs(2),
        ..ResolverConfig::default()
    }
}

#[tokio::test]
async fn test_three_layer_walk_reaches_authoritative_answer() {
    let sockets = bind_same_port(&["127.0.0.1", "127.0.0.2", "127.0.0.3"]).await;
    let root_addr = sockets[0].local_addr().unwrap();
    let mut sockets = sockets.into_iter();

    // Root refers to com., the TLD refers to example.com., and the
    // authoritative server answers.
    let root: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        referral("com.", "ns1.tld-mock.net.", Ipv4Addr::new(127, 0, 0, 2))(&mut reply);
        Some(reply)
    });
    let tld: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        referral("example.com.", "ns1.example.com.", Ipv4Addr::new(127, 0, 0, 3))(&mut reply);
        Some(reply)
    });
    let auth: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        reply.set_authoritative(true);
        reply.add_answer(a_record("example.com.", Ipv4Addr::new(192, 0, 2, 1), 300));
        Some(reply)
    });

    serve_udp(sockets.next().unwrap(), root);
    serve_udp(sockets.next().unwrap(), tld);
    serve_udp(sockets.next().unwrap(), auth);

    let resolver = Resolver::new(iterative_config(root_addr), Blacklist::new())
        .await
        .unwrap();

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::NoError, "error: {:?}", result.error);
    let data = result.data.expect("answer data");
    assert_eq!(data.answers.len(), 1);
    assert_eq!(data.answers[0].data, "192.0.2.1");
    assert!(data.flags.authoritative);

    let layers: Vec<Layer> = result.trace.iter().map(|step| step.layer).collect();
    assert_eq!(layers, vec![Layer::Root, Layer::Tld, Layer::Authoritative]);
    let depths: Vec<usize> = result.trace.iter().map(|step| step.depth).collect();
    assert_eq!(depths, vec![0, 1, 2]);

    // The trace is append-only and ordered by issue time.
    for pair in result.trace.windows(2) {
        assert!(pair[0].timestamp_ns <= pair[1].timestamp_ns);
    }
}

#[tokio::test]
async fn test_authoritative_nxdomain_is_terminal() {
    let sockets = bind_same_port(&["127.0.0.1", "127.0.0.2"]).await;
    let root_addr = sockets[0].local_addr().unwrap();
    let mut sockets = sockets.into_iter();

    let root: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        referral("com.", "ns1.tld-mock.net.", Ipv4Addr::new(127, 0, 0, 2))(&mut reply);
        Some(reply)
    });
    let auth: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        reply.set_authoritative(true);
        reply.set_response_code(ResponseCode::NXDomain);
        Some(reply)
    });

    serve_udp(sockets.next().unwrap(), root);
    serve_udp(sockets.next().unwrap(), auth);

    let resolver = Resolver::new(iterative_config(root_addr), Blacklist::new())
        .await
        .unwrap();

    let question = Question::new("nonexistent.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::NxDomain);
    assert!(result.data.is_some());
}

#[tokio::test]
async fn test_depth_limit_stops_descent() {
    let sockets = bind_same_port(&["127.0.0.1"]).await;
    let root_addr = sockets[0].local_addr().unwrap();
    let mut sockets = sockets.into_iter();

    let root: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        referral("com.", "ns1.tld-mock.net.", Ipv4Addr::new(127, 0, 0, 2))(&mut reply);
        Some(reply)
    });
    serve_udp(sockets.next().unwrap(), root);

    // Following even one referral would exceed the depth budget.
    let mut config = iterative_config(root_addr);
    config.max_depth = 0;
    let resolver = Resolver::new(config, Blacklist::new()).await.unwrap();

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::MaxDepthReached);
    assert_eq!(result.trace.len(), 1, "the root exchange is still traced");
}

#[tokio::test]
async fn test_referral_loop_detected() {
    let sockets = bind_same_port(&["127.0.0.1"]).await;
    let root_addr = sockets[0].local_addr().unwrap();
    let mut sockets = sockets.into_iter();

    // The "root" delegates com. back to itself.
    let root: Responder = Arc::new(|query| {
        let mut reply = response_for(query);
        referral("com.", "ns1.self.net.", Ipv4Addr::new(127, 0, 0, 1))(&mut reply);
        Some(reply)
    });
    serve_udp(sockets.next().unwrap(), root);

    let resolver = Resolver::new(iterative_config(root_addr), Blacklist::new())
        .await
        .unwrap();

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::LoopDetected);
    assert!(!result.trace.is_empty(), "partial trace is returned");
}

#[tokio::test]
async fn test_blacklisted_seed_server_is_refused() {
    let sockets = bind_same_port(&["127.0.0.1"]).await;
    let root_addr = sockets[0].local_addr().unwrap();
    drop(sockets);

    let blacklist = Blacklist::from_lines("127.0.0.0/8\n").unwrap();
    let resolver = Resolver::new(iterative_config(root_addr), blacklist)
        .await
        .unwrap();

    let question = Question::new("example.com", RecordType::A).unwrap();
    let result = resolver.lookup(0, &question, None).await;

    assert_eq!(result.status, Status::Blacklisted);
    assert!(result.trace.is_empty());
}

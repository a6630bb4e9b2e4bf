use std::collections::HashSet;
use std::error::Error;
use std::thread;

use tempfile::tempdir;

use super::{ignore, inbox, region_config, Received};
use crate::channel::{PacketHeader, SERVER_ID};
use crate::core::Role;
use crate::errors::{PeerlinkError, Result};
use crate::peer::Peer;

#[test]
fn server_packet_reaches_client() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "t", 256, 256)?;
    let mut server = Peer::server(&cfg, ignore)?;
    let (received, callback) = inbox();
    let mut client = Peer::client(&cfg, callback)?;

    let sent = server.send_to(1, b"hi")?;
    assert_eq!(sent, PacketHeader { from: 0, to: 1, id: 1, extra_size: 2 });
    assert_eq!(sent.record_len(), 18);
    assert_eq!(client.incoming_stats()?.used, 18);

    assert_eq!(client.process_incoming()?, 1);
    assert_eq!(
        *received.lock().unwrap(),
        vec![Received { from: 0, to: 1, id: 1, payload: b"hi".to_vec() }]
    );

    let stats = client.incoming_stats()?;
    assert_eq!((stats.used, stats.records, stats.capacity), (0, 0, 256));
    Ok(())
}

#[test]
fn identities_follow_roles() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "ids", 256, 256)?;
    let server = Peer::server(&cfg, ignore)?;
    let first = Peer::client(&cfg, ignore)?;
    let second = Peer::client(&cfg, ignore)?;

    assert_eq!((server.role(), server.peer_id()), (Role::Server, SERVER_ID));
    assert_eq!((first.role(), first.peer_id()), (Role::Client, 1));
    assert_eq!(second.peer_id(), 2);
    Ok(())
}

#[test]
fn delivers_in_send_order_exactly_once() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "order", 4096, 4096)?;
    let mut server = Peer::server(&cfg, ignore)?;
    let (received, callback) = inbox();
    let mut client = Peer::client(&cfg, callback)?;

    let mut sent = Vec::new();
    for n in 0..20 {
        let payload = format!("packet {}", n).into_bytes();
        let header = server.send_to(client.peer_id(), &payload)?;
        sent.push((header.id, payload));
    }

    assert_eq!(client.process_incoming()?, 20);
    assert_eq!(client.process_incoming()?, 0);

    let got: Vec<_> = received
        .lock()
        .unwrap()
        .iter()
        .map(|r| (r.id, r.payload.clone()))
        .collect();
    assert_eq!(got, sent);
    Ok(())
}

#[test]
fn packets_for_other_peers_survive_a_scan() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "others", 1024, 1024)?;
    let mut server = Peer::server(&cfg, ignore)?;
    let (received, callback) = inbox();
    let mut client = Peer::client(&cfg, callback)?;

    server.send_to(1, b"first")?;
    let to_seven = server.send_to(7, b"for seven")?;
    server.send_to(1, b"second")?;
    let to_nine = server.send_to(9, b"for nine")?;

    assert_eq!(client.process_incoming()?, 2);
    assert_eq!(received.lock().unwrap().len(), 2);

    let left = client.region().with_lock(|locked| {
        locked
            .channels(Role::Client)
            .0
            .records()
            .map(|r| r.map(|r| (r.packet.header(), r.packet.payload().to_vec())))
            .collect::<Result<Vec<_>>>()
    })??;
    assert_eq!(
        left,
        vec![(to_seven, b"for seven".to_vec()), (to_nine, b"for nine".to_vec())]
    );
    assert_eq!(client.incoming_stats()?.records, 2);
    Ok(())
}

#[test]
fn payloads_round_trip_both_ways() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "fidelity", 4096, 4096)?;
    let (server_got, server_cb) = inbox();
    let mut server = Peer::server(&cfg, server_cb)?;
    let (client_got, client_cb) = inbox();
    let mut client = Peer::client(&cfg, client_cb)?;

    let all_bytes: Vec<u8> = (0..=255u8).collect();
    let payloads: Vec<Vec<u8>> = vec![Vec::new(), vec![0], all_bytes, vec![0xAB; 1000]];

    for payload in &payloads {
        server.send_to(client.peer_id(), payload)?;
        client.send_to(SERVER_ID, payload)?;
    }
    assert_eq!(client.process_incoming()?, payloads.len());
    assert_eq!(server.process_incoming()?, payloads.len());

    for got in [&server_got, &client_got].iter() {
        let got = got.lock().unwrap();
        let bodies: Vec<_> = got.iter().map(|r| r.payload.clone()).collect();
        assert_eq!(bodies, payloads);
    }
    assert!(server_got.lock().unwrap().iter().all(|r| r.from == 1 && r.to == 0));
    assert!(client_got.lock().unwrap().iter().all(|r| r.from == 0 && r.to == 1));
    Ok(())
}

#[test]
fn own_sends_never_come_back() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "echo", 256, 256)?;
    let (server_got, server_cb) = inbox();
    let mut server = Peer::server(&cfg, server_cb)?;
    let _client = Peer::client(&cfg, ignore)?;

    server.send_to(SERVER_ID, b"to myself")?;
    assert_eq!(server.process_incoming()?, 0);
    assert!(server_got.lock().unwrap().is_empty());
    assert_eq!(server.outgoing_stats()?.records, 1);
    Ok(())
}

#[test]
fn overflow_is_reported_and_contained() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "overflow", 64, 64)?;
    let (server_got, server_cb) = inbox();
    let mut server = Peer::server(&cfg, server_cb)?;
    let (client_got, client_cb) = inbox();
    let mut client = Peer::client(&cfg, client_cb)?;

    let first = server.send_to(1, &[1u8; 40])?;
    match server.send_to(1, &[2u8; 40]) {
        Err(PeerlinkError::ChannelOverflow { needed, capacity }) => {
            assert_eq!((needed, capacity), (112, 64));
        }
        other => panic!("expected overflow, got {:?}", other),
    }
    assert_eq!(server.outgoing_stats()?.used, 56);

    // The other channel and the id ticket are untouched by the failed send.
    let reply = client.send_to(SERVER_ID, b"ok")?;
    assert_eq!(reply.id, first.id + 1);
    assert_eq!(server.process_incoming()?, 1);
    assert_eq!(server_got.lock().unwrap()[0].payload, b"ok".to_vec());

    assert_eq!(client.process_incoming()?, 1);
    assert_eq!(client_got.lock().unwrap()[0].payload, vec![1u8; 40]);

    // Draining frees the room again.
    server.send_to(1, &[3u8; 40])?;
    Ok(())
}

#[test]
fn concurrent_clients_get_distinct_ids() -> std::result::Result<(), Box<dyn Error>> {
    const CLIENTS: u32 = 8;
    let dir = tempdir()?;
    let cfg = region_config(&dir, "tickets", 256, 256)?;
    let server = Peer::server(&cfg, ignore)?;

    let handles: Vec<_> = (0..CLIENTS)
        .map(|_| {
            let cfg = cfg.clone();
            thread::spawn(move || {
                Peer::client(&cfg, ignore)
                    .map(|peer| peer.peer_id())
                    .map_err(|e| e.to_string())
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.join().expect("client thread panicked")?);
    }
    ids.sort();
    assert_eq!(ids, (1..=CLIENTS).collect::<Vec<_>>());
    assert_eq!(server.peer_id(), 0);
    Ok(())
}

#[test]
fn packet_ids_are_unique_and_increasing() -> std::result::Result<(), Box<dyn Error>> {
    const SENDERS: usize = 4;
    const PER_SENDER: usize = 50;
    let dir = tempdir()?;
    let cfg = region_config(&dir, "packet-ids", 0x10000, 0x10000)?;
    let (server_got, server_cb) = inbox();
    let mut server = Peer::server(&cfg, server_cb)?;

    let handles: Vec<_> = (0..SENDERS)
        .map(|n| {
            let cfg = cfg.clone();
            thread::spawn(move || -> std::result::Result<Vec<u32>, String> {
                let mut client = Peer::client(&cfg, ignore).map_err(|e| e.to_string())?;
                let mut ids = Vec::with_capacity(PER_SENDER);
                for i in 0..PER_SENDER {
                    let payload = format!("{}:{}", n, i);
                    let header = client
                        .send_to(SERVER_ID, payload.as_bytes())
                        .map_err(|e| e.to_string())?;
                    ids.push(header.id);
                }
                Ok(ids)
            })
        })
        .collect();

    let mut server_ids = Vec::new();
    for i in 0..PER_SENDER {
        server_ids.push(server.send_to(99, format!("server:{}", i).as_bytes())?.id);
    }

    let mut all_ids: Vec<u32> = server_ids.clone();
    for handle in handles {
        let ids = handle.join().expect("sender thread panicked")?;
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        all_ids.extend(ids);
    }
    assert!(server_ids.windows(2).all(|w| w[0] < w[1]));

    let distinct: HashSet<u32> = all_ids.iter().cloned().collect();
    assert_eq!(distinct.len(), all_ids.len());
    assert!(!distinct.contains(&0));

    // Ids are issued and appended under one lock, so channel order is id order.
    assert_eq!(server.process_incoming()?, SENDERS * PER_SENDER);
    let received: Vec<u32> = server_got.lock().unwrap().iter().map(|r| r.id).collect();
    assert!(received.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn peer_can_be_polled_from_another_thread() -> std::result::Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let cfg = region_config(&dir, "moved", 256, 256)?;
    let mut server = Peer::server(&cfg, ignore)?;
    let (received, callback) = inbox();
    let mut client = Peer::client(&cfg, callback)?;

    server.send_to(client.peer_id(), b"across threads")?;
    let poller = thread::spawn(move || client.process_incoming().map_err(|e| e.to_string()));
    assert_eq!(poller.join().expect("polling thread panicked")?, 1);
    assert_eq!(received.lock().unwrap()[0].payload, b"across threads".to_vec());
    Ok(())
}

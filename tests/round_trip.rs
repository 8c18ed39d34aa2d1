#![allow(dead_code)]


use crypto_socket::{
    CryptoSocket, HandshakeResult,
    HandshakeStatus::{NeedUnwrap, NeedWrap, NotHandshaking},
};
use fixture::{init_logging, leak_metrics, ScriptedEngine, TestChannel, TestSocket};

/// Pump one handshake step; returns true once complete.
fn step(socket: &mut TestSocket) -> bool {
    match socket.handshake().unwrap() {
        HandshakeResult::Done => true,
        HandshakeResult::NeedWork => {
            socket.do_handshake_work().unwrap();
            false
        }
        // the in-memory channel is always ready; just call again
        HandshakeResult::NeedRead | HandshakeResult::NeedWrite => false,
    }
}

fn paired_sockets() -> (TestSocket, TestSocket) {
    init_logging();
    let metrics = leak_metrics();
    let (client_channel, server_channel) = TestChannel::pair();

    let client_engine = ScriptedEngine::client(&[NeedWrap, NeedUnwrap, NotHandshaking]);
    let server_engine = ScriptedEngine::server(&[NeedUnwrap, NeedWrap, NotHandshaking]);

    let mut client =
        CryptoSocket::with_metrics(client_channel, client_engine, metrics).unwrap();
    let mut server =
        CryptoSocket::with_metrics(server_channel, server_engine, metrics).unwrap();

    let mut client_done = false;
    let mut server_done = false;
    for _ in 0..16 {
        if !client_done {
            client_done = step(&mut client);
        }
        if !server_done {
            server_done = step(&mut server);
        }
        if client_done && server_done {
            break;
        }
    }
    assert!(client_done && server_done, "handshakes did not converge");

    assert_eq!(metrics.client_tls_connections_established(), 1);
    assert_eq!(metrics.server_tls_connections_established(), 1);
    (client, server)
}

#[test]
fn paired_handshake_converges() {
    paired_sockets();
}

#[test]
fn message_round_trips_in_order() {
    let (mut client, mut server) = paired_sockets();

    let message: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let mut buf = vec![0u8; server.min_read_buffer()];

    let mut sent = 0;
    let mut received = Vec::new();
    let mut spins = 0;
    while received.len() < message.len() {
        spins += 1;
        assert!(spins < 1000, "transfer did not make progress");

        if sent < message.len() {
            sent += client.write(&message[sent..]).unwrap();
        }
        client.flush().unwrap();

        loop {
            let read = server.read(&mut buf).unwrap();
            if read == 0 {
                break;
            }
            received.extend_from_slice(&buf[..read]);
        }
    }
    assert_eq!(received, message);
}

#[test]
fn full_duplex_exchange() {
    let (mut client, mut server) = paired_sockets();

    let request = b"GET /status";
    let response = b"200 OK: all quiet";
    let mut buf = vec![0u8; 256];

    assert_eq!(client.write(request).unwrap(), request.len());
    client.flush().unwrap();
    let read = server.read(&mut buf).unwrap();
    assert_eq!(&buf[..read], request);

    assert_eq!(server.write(response).unwrap(), response.len());
    server.flush().unwrap();
    let read = client.read(&mut buf).unwrap();
    assert_eq!(&buf[..read], response);
}

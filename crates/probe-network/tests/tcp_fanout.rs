use std::{
    io::Read,
    net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use probe_communication::{Block, Fabric};
use probe_network::FanoutListener;

fn block_with(bytes: &[u8]) -> Block {
    let mut block = Block::EMPTY;
    block.data[..bytes.len()].copy_from_slice(bytes);
    block.len = bytes.len() as u16;
    block
}

#[test]
fn single_client_receives_published_bytes() {
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 24801));
    let listener = FanoutListener::bind(addr).unwrap();
    let fabric = Fabric::new(16);
    let ending = Arc::new(AtomicBool::new(false));

    let mut producer = fabric.producer();
    let server_fabric = fabric.clone();
    let server_ending = ending.clone();
    thread::spawn(move || listener.serve(server_fabric, server_ending));
    thread::sleep(Duration::from_millis(50));

    let mut client = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(50));
    producer.produce(&block_with(b"hello trace"));

    let mut buf = [0u8; 11];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"hello trace");

    ending.store(true, Ordering::Relaxed);
}

#[test]
fn two_clients_each_receive_every_block() {
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 24802));
    let listener = FanoutListener::bind(addr).unwrap();
    let fabric = Fabric::new(16);
    let ending = Arc::new(AtomicBool::new(false));

    let mut producer = fabric.producer();
    let server_fabric = fabric.clone();
    let server_ending = ending.clone();
    thread::spawn(move || listener.serve(server_fabric, server_ending));
    thread::sleep(Duration::from_millis(50));

    let mut c1 = TcpStream::connect(addr).unwrap();
    let mut c2 = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fabric.client_count(), 2);

    producer.produce(&block_with(b"fanout"));

    let mut b1 = [0u8; 6];
    let mut b2 = [0u8; 6];
    c1.read_exact(&mut b1).unwrap();
    c2.read_exact(&mut b2).unwrap();
    assert_eq!(&b1, b"fanout");
    assert_eq!(&b2, b"fanout");

    ending.store(true, Ordering::Relaxed);
}

#[test]
fn sped_past_client_gets_disconnected() {
    let addr = SocketAddr::from((IpAddr::V4(Ipv4Addr::LOCALHOST), 24803));
    let listener = FanoutListener::bind(addr).unwrap();
    let fabric = Fabric::new(4);
    let ending = Arc::new(AtomicBool::new(false));

    let mut producer = fabric.producer();
    let server_fabric = fabric.clone();
    let server_ending = ending.clone();
    thread::spawn(move || listener.serve(server_fabric, server_ending));
    thread::sleep(Duration::from_millis(50));

    let mut client = TcpStream::connect(addr).unwrap();
    thread::sleep(Duration::from_millis(50));

    for i in 0..20u8 {
        producer.produce(&block_with(&[i]));
    }

    // Either the read fails outright or returns 0 bytes (EOF) once the
    // server thread notices it sped past and closes the socket.
    thread::sleep(Duration::from_millis(100));
    let mut buf = [0u8; 1];
    let _ = client.read(&mut buf);

    ending.store(true, Ordering::Relaxed);
}

//! Integration tests for stream reception over real sockets.
//!
//! A hand-written sender plays the wire protocol directly, so these tests
//! pin down what the receiver accepts independent of the sender crate.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use cast_core::protocol::build_stream_header;
use cast_core::protocol::frame_header::H264_INIT_800X480;
use cast_receiver::infrastructure::stream::StreamReceiver;
use cast_receiver::infrastructure::ReceiverError;

#[test]
fn test_accept_one_writes_stream_to_file() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let sender = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream
            .write_all(build_stream_header(800, 480).as_bytes())
            .unwrap();
        stream.write_all(&H264_INIT_800X480).unwrap();
        stream.write_all(&[0, 0, 0, 1, 0x65, 0x42]).unwrap();
    });
    let path = std::env::temp_dir().join(format!("cast_receiver_{}.h264", uuid::Uuid::new_v4()));
    let file = std::fs::File::create(&path).unwrap();
    let mut receiver = StreamReceiver::new(file);

    // Act
    let summary = receiver.accept_one(&listener).unwrap();
    sender.join().unwrap();
    drop(receiver);

    // Assert
    assert_eq!((summary.width, summary.height), (800, 480));
    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), 48 + 6);
    assert_eq!(&written[..48], &H264_INIT_800X480[..]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_dial_sends_mirror_before_reading() {
    // Arrange
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let sender = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut line = String::new();
        BufReader::new(&stream).read_line(&mut line).unwrap();
        let mut stream = stream;
        stream
            .write_all(build_stream_header(800, 480).as_bytes())
            .unwrap();
        stream.write_all(b"payload").unwrap();
        line
    });
    let mut receiver = StreamReceiver::new(Vec::new());

    // Act
    let summary = receiver.dial(addr).unwrap();
    let trigger = sender.join().unwrap();

    // Assert
    assert_eq!(trigger, "mirror\n");
    assert_eq!(summary.payload_bytes, 7);
    assert_eq!(receiver.into_output(), b"payload");
}

#[test]
fn test_accept_one_reports_sender_that_closes_early() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let sender = std::thread::spawn(move || {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"POST /api/v1/h264 HTTP/1.1\r\n").unwrap();
    });
    let mut receiver = StreamReceiver::new(Vec::new());

    let result = receiver.accept_one(&listener);
    sender.join().unwrap();

    assert!(matches!(
        result,
        Err(ReceiverError::ClosedBeforeHeader { received }) if received > 0
    ));
}

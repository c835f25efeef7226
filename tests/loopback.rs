//! Drives the S1-S6 scenarios from the spec against the real `Manager`
//! over a loopback `TcpListener`, the way `tests/server_simple.rs` drives
//! the teacher's `Proto` against a mock transport.

extern crate http_client_core;
#[macro_use] extern crate matches;

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use http_client_core::{HttpExceptionContent, ManagerSettings, Method, Request, RequestTrace};

fn serve_once(script: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(script);
        }
    });
    port
}

#[test]
fn s1_chunked_get_yields_hello_and_returns_connection_to_pool() {
    let port = serve_once(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n");
    let manager = ManagerSettings::new().done().unwrap();
    let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();

    let mut response = manager.perform(&req).unwrap();
    assert_eq!(response.status.0, 200);
    assert_eq!(response.body.next_chunk().unwrap(), b"hello");
    assert_eq!(response.body.next_chunk().unwrap(), Vec::<u8>::new());
}

#[test]
fn s2_content_length_truncation_raises_too_short() {
    let port = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nhi");
    let manager = ManagerSettings::new().done().unwrap();
    let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();

    let mut response = manager.perform(&req).unwrap();
    assert_eq!(response.body.next_chunk().unwrap(), b"hi");
    let err = response.body.next_chunk().unwrap_err();
    assert!(matches!(err, HttpExceptionContent::ResponseBodyTooShort(10, 2)));
}

#[test]
fn s3_overlong_header_is_rejected_and_connection_is_not_pooled() {
    let mut script = b"HTTP/1.1 200 OK\r\nX-Big: ".to_vec();
    script.extend(std::iter::repeat(b'A').take(4100));
    script.extend_from_slice(b"\r\n\r\n");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(&script);
        }
    });

    let manager = ManagerSettings::new().done().unwrap();
    let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).build();
    let err = manager.perform(&req).unwrap_err();
    assert!(matches!(err.content(), Some(HttpExceptionContent::OverlongHeaders)));
}

#[test]
fn s4_connect_failure_through_proxy_raises_proxy_connect_exception() {
    use http_client_core::Proxy;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let _ = stream.write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n");
        }
    });

    let manager = ManagerSettings::new().done().unwrap();
    let req = Request::builder(Method::Get, "secure.example.com", "/")
        .secure(true)
        .proxy(Proxy { host: "127.0.0.1".into(), port, auth: None })
        .build();
    let err = manager.perform(&req).unwrap_err();
    match err.content() {
        Some(HttpExceptionContent::ProxyConnectException(host, p, status)) => {
            assert_eq!(host, "secure.example.com");
            assert_eq!(*p, 443);
            assert_eq!(*status, 407);
        }
        other => panic!("expected ProxyConnectException, got {:?}", other),
    }
}

#[test]
fn s5_100_continue_fires_once_then_final_status_is_200() {
    let port = serve_once(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
    let manager = ManagerSettings::new().done().unwrap();

    let continue_count = Arc::new(AtomicUsize::new(0));
    let informational_count = Arc::new(AtomicUsize::new(0));
    let c1 = continue_count.clone();
    let c2 = informational_count.clone();
    let mut trace = RequestTrace::default();
    trace.got_100_continue = Some(Arc::new(move || { c1.fetch_add(1, Ordering::SeqCst); }));
    trace.got_1xx_response = Some(Arc::new(move |_code, _headers| { c2.fetch_add(1, Ordering::SeqCst); Ok(()) }));

    let req = Request::builder(Method::Get, "127.0.0.1", "/").port(port).trace(trace).build();
    let response = manager.perform(&req).unwrap();

    assert_eq!(response.status.0, 200);
    assert_eq!(continue_count.load(Ordering::SeqCst), 1);
    assert_eq!(informational_count.load(Ordering::SeqCst), 1);
}

#[test]
fn s6_second_request_reuses_the_pooled_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept_count = Arc::new(AtomicUsize::new(0));
    let accept_count_bg = accept_count.clone();
    thread::spawn(move || {
        for _ in 0..2 {
            if let Ok((mut stream, _)) = listener.accept() {
                accept_count_bg.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 4096];
                loop {
                    let n = stream.read(&mut buf).unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    let _ = stream.write_all(
                        b"HTTP/1.1 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n",
                    );
                    break;
                }
            }
        }
    });

    let manager = ManagerSettings::new().done().unwrap();

    let reused_flags: Arc<std::sync::Mutex<Vec<bool>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let make_trace = |flags: Arc<std::sync::Mutex<Vec<bool>>>| {
        let mut trace = RequestTrace::default();
        trace.got_connection = Some(Arc::new(move |reused, _idle_time| {
            flags.lock().unwrap().push(reused);
        }));
        trace
    };

    let req1 = Request::builder(Method::Get, "127.0.0.1", "/")
        .port(port)
        .trace(make_trace(reused_flags.clone()))
        .build();
    let mut resp1 = manager.perform(&req1).unwrap();
    assert_eq!(resp1.body.next_chunk().unwrap(), Vec::<u8>::new());
    drop(resp1);

    // Give the pool a moment to observe the drained body's automatic release.
    thread::sleep(std::time::Duration::from_millis(50));

    let req2 = Request::builder(Method::Get, "127.0.0.1", "/")
        .port(port)
        .trace(make_trace(reused_flags.clone()))
        .build();
    let mut resp2 = manager.perform(&req2).unwrap();
    assert_eq!(resp2.body.next_chunk().unwrap(), Vec::<u8>::new());

    let flags = reused_flags.lock().unwrap().clone();
    assert_eq!(flags, vec![false, true]);
    assert_eq!(accept_count.load(Ordering::SeqCst), 1);
}

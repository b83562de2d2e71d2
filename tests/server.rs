//! End-to-end tests running the server on real loopback sockets.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Condvar, Mutex};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use hyper::StatusCode;
use node_httpd::{Config, HttpServer};
use node_httpd::http::{Handler, HttpRequest};


//------------ Helpers -------------------------------------------------------

/// Initializes a server on ephemeral loopback ports.
fn init_server(mut config: Config) -> HttpServer {
    config.rpc_port = 0;
    HttpServer::init(Arc::new(config)).unwrap()
}

/// Returns the IPv4 address the server listens on.
fn v4_addr(server: &HttpServer) -> SocketAddr {
    server.local_addrs().iter().copied().find(|addr| {
        addr.is_ipv4()
    }).expect("no IPv4 listener")
}

/// Sends a raw HTTP/1.1 request and returns the status code and body.
///
/// The request must carry `Connection: close` so the server ends the
/// connection after the response.
fn send_raw(addr: SocketAddr, raw: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(raw.as_bytes()).unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let response = String::from_utf8_lossy(&response).into_owned();

    let status = response.split_whitespace().nth(1).unwrap()
        .parse::<u16>().unwrap();
    let body = match response.split_once("\r\n\r\n") {
        Some((_, body)) => body.to_string(),
        None => String::new()
    };
    (status, body)
}

/// Sends a simple GET request for the given target.
fn get(addr: SocketAddr, target: &str) -> (u16, String) {
    send_raw(addr, &format!(
        "GET {target} HTTP/1.1\r\n\
         Host: localhost\r\n\
         Connection: close\r\n\r\n"
    ))
}

/// A handler replying 200 with the given tag and the path tail as body.
fn tail_handler(tag: &'static str) -> Handler {
    Arc::new(move |_: &Config, request: &mut HttpRequest, path: &str| {
        let body = format!("{tag}:{path}");
        request.write_reply(StatusCode::OK, body);
    })
}

/// A gate handlers can block on until the test opens it.
#[derive(Default)]
struct Gate {
    open: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_all();
    }
}


//------------ Tests ---------------------------------------------------------

#[test]
fn loopback_default_not_found() {
    let mut server = init_server(Config::default());
    assert!(server.local_addrs().iter().all(|addr| {
        addr.ip().is_loopback()
    }));
    server.start();

    let (status, _) = get(v4_addr(&server), "/foo");
    assert_eq!(status, 404);
    server.stop();
}

#[test]
fn router_dispatch_and_tail() {
    let mut server = init_server(Config::default());
    server.register_handler("/wallet/", false, tail_handler("wallet"));
    server.start();
    let addr = v4_addr(&server);

    let (status, body) = get(addr, "/wallet/abc/info");
    assert_eq!(status, 200);
    assert_eq!(body, "wallet:abc/info");

    // Anything outside the prefix is still unknown.
    let (status, _) = get(addr, "/walle");
    assert_eq!(status, 404);
    server.stop();
}

#[test]
fn router_first_match_wins() {
    let mut server = init_server(Config::default());
    server.register_handler("/a", false, tail_handler("a"));
    server.register_handler("/a/b", false, tail_handler("ab"));
    server.start();

    let (status, body) = get(v4_addr(&server), "/a/b/x");
    assert_eq!(status, 200);
    assert_eq!(body, "a:/b/x");
    server.stop();
}

#[test]
fn unknown_methods_rejected() {
    let mut server = init_server(Config::default());
    server.register_handler("/", false, tail_handler("root"));
    server.start();
    let addr = v4_addr(&server);

    for method in ["TRACE", "DELETE", "PATCH"] {
        let (status, _) = send_raw(addr, &format!(
            "{method} /x HTTP/1.1\r\n\
             Host: localhost\r\n\
             Connection: close\r\n\r\n"
        ));
        assert_eq!(status, 400, "method {method}");
    }

    // A known method still reaches the handler.
    let (status, _) = get(addr, "/x");
    assert_eq!(status, 200);
    server.stop();
}

#[test]
fn queue_saturation_replies_500() {
    let config = Config {
        rpc_threads: 1,
        rpc_work_queue: 1,
        .. Config::default()
    };
    let mut server = init_server(config);

    let gate = Arc::new(Gate::default());
    let entered = Arc::new(Gate::default());
    let handler_gate = gate.clone();
    let handler_entered = entered.clone();
    server.register_handler("/block", false, Arc::new(
        move |_: &Config, request: &mut HttpRequest, _: &str| {
            handler_entered.open();
            handler_gate.wait();
            request.write_reply(StatusCode::OK, "done");
        }
    ));
    server.start();
    let addr = v4_addr(&server);

    // The first request occupies the only worker thread.
    let first = thread::spawn(move || get(addr, "/block"));
    entered.wait();

    // The second fills the queue. Give it a head start so the third
    // predictably finds the queue full and bounces right away.
    let second = thread::spawn(move || get(addr, "/block"));
    thread::sleep(Duration::from_millis(300));
    let (status, body) = get(addr, "/block");
    assert_eq!((status, body.as_str()), (500, "Work queue depth exceeded"));

    gate.open();
    assert_eq!(first.join().unwrap(), (200, "done".into()));
    assert_eq!(second.join().unwrap(), (200, "done".into()));
    server.stop();
}

#[test]
fn unreplied_request_gets_safety_net_500() {
    let mut server = init_server(Config::default());
    server.register_handler("/lazy", false, Arc::new(
        |_: &Config, _: &mut HttpRequest, _: &str| {
            // Deliberately not replying.
        }
    ));
    server.start();

    let (status, body) = get(v4_addr(&server), "/lazy");
    assert_eq!(status, 500);
    assert_eq!(body, "Unhandled request");
    server.stop();
}

#[test]
fn interrupt_replies_503() {
    let mut server = init_server(Config::default());
    server.register_handler("/x", false, tail_handler("x"));
    server.start();
    let addr = v4_addr(&server);

    let (status, _) = get(addr, "/x");
    assert_eq!(status, 200);

    server.interrupt();
    let (status, body) = get(addr, "/x");
    assert_eq!(status, 503);
    assert!(body.is_empty());

    // Handlers may be unregistered between interrupt and stop.
    server.unregister_handler("/x", false);
    server.stop();
}

#[test]
fn interrupt_rejects_requests_already_in_flight() {
    let mut server = init_server(Config::default());
    server.register_handler("/x", false, tail_handler("x"));
    server.start();
    let addr = v4_addr(&server);

    // Send the headers and part of the body, then stall so the request
    // is already inside the server when the interrupt arrives.
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream.write_all(
        b"POST /x HTTP/1.1\r\n\
          Host: localhost\r\n\
          Content-Length: 5\r\n\
          Connection: close\r\n\r\n\
          ab"
    ).unwrap();
    thread::sleep(Duration::from_millis(300));
    server.interrupt();
    stream.write_all(b"cde").unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    let response = String::from_utf8_lossy(&response).into_owned();
    let status = response.split_whitespace().nth(1).unwrap()
        .parse::<u16>().unwrap();
    assert_eq!(status, 503);

    // With nothing queued behind the interrupt, stopping is quick.
    let stopping = Instant::now();
    server.stop();
    assert!(stopping.elapsed() < Duration::from_secs(10));
}

#[test]
fn stalled_body_is_timed_out() {
    let config = Config {
        rpc_server_timeout: Duration::from_secs(1),
        .. Config::default()
    };
    let mut server = init_server(config);
    server.register_handler("/x", false, tail_handler("x"));
    server.start();
    let addr = v4_addr(&server);

    // Promise ten body bytes but never deliver them.
    let started = Instant::now();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
    stream.write_all(
        b"POST /x HTTP/1.1\r\n\
          Host: localhost\r\n\
          Content-Length: 10\r\n\
          Connection: close\r\n\r\n\
          ab"
    ).unwrap();

    // The idle timeout cuts the connection; the handler never runs.
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert!(!String::from_utf8_lossy(&response).contains(" 200 "));
    assert!(started.elapsed() < Duration::from_secs(15));

    // The dead connection does not hold up the shutdown either.
    server.interrupt();
    let stopping = Instant::now();
    server.stop();
    assert!(stopping.elapsed() < Duration::from_secs(10));
}

#[test]
fn idle_keep_alive_connection_is_timed_out() {
    let config = Config {
        rpc_server_timeout: Duration::from_secs(1),
        .. Config::default()
    };
    let mut server = init_server(config);
    server.start();
    let addr = v4_addr(&server);

    // A request without `Connection: close` leaves the connection open;
    // the server hangs up once it sits idle past the timeout.
    let started = Instant::now();
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(30))).unwrap();
    stream.write_all(
        b"GET /nothing HTTP/1.1\r\n\
          Host: localhost\r\n\r\n"
    ).unwrap();
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response);
    assert!(String::from_utf8_lossy(&response).contains(" 404 "));
    assert!(started.elapsed() < Duration::from_secs(15));

    server.interrupt();
    server.stop();
}

#[test]
fn stop_releases_the_sockets() {
    let mut server = init_server(Config::default());
    server.start();
    let addr = v4_addr(&server);
    let (status, _) = get(addr, "/");
    assert_eq!(status, 404);

    server.interrupt();
    server.stop();
    assert!(TcpStream::connect_timeout(
        &addr, Duration::from_secs(1)
    ).is_err());
}

#[test]
fn stop_without_start() {
    let server = init_server(Config::default());
    let addr = v4_addr(&server);
    server.stop();
    assert!(TcpStream::connect_timeout(
        &addr, Duration::from_secs(1)
    ).is_err());
}

#[test]
fn triggers_run_on_the_reactor_thread() {
    let mut server = init_server(Config::default());
    server.start();
    let base = server.event_base();

    let (tx, rx) = mpsc::channel();
    let probe = tx.clone();
    base.trigger(move || {
        probe.send(thread::current().id()).unwrap();
    });
    let first = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_ne!(first, thread::current().id());

    // A trigger posted from yet another thread lands on the same thread.
    let other_base = server.event_base();
    thread::spawn(move || {
        other_base.trigger(move || {
            tx.send(thread::current().id()).unwrap();
        });
    }).join().unwrap();
    let second = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(first, second);

    server.interrupt();
    server.stop();
}

#[test]
fn timed_triggers_fire() {
    let mut server = init_server(Config::default());
    server.start();

    let (tx, rx) = mpsc::channel();
    server.event_base().trigger_after(
        Duration::from_millis(50),
        move || tx.send(()).unwrap()
    );
    rx.recv_timeout(Duration::from_secs(10)).unwrap();

    server.interrupt();
    server.stop();
}

#[test]
fn request_surface_is_complete() {
    let mut server = init_server(Config::default());
    server.register_handler("/echo", false, Arc::new(
        |_: &Config, request: &mut HttpRequest, _: &str| {
            assert!(request.peer().ip().is_loopback());
            assert_eq!(request.uri(), "/echo");
            assert_eq!(request.header("x-marker").unwrap(), "23");
            let body = request.read_body(true);
            request.write_header("Content-Type", "text/plain");
            request.write_header("X-Reply-Marker", "42");
            request.write_reply(StatusCode::OK, body);
        }
    ));
    server.start();

    let (status, body) = send_raw(v4_addr(&server),
        "POST /echo HTTP/1.1\r\n\
         Host: localhost\r\n\
         X-Marker: 23\r\n\
         Content-Length: 5\r\n\
         Connection: close\r\n\r\n\
         hello"
    );
    assert_eq!(status, 200);
    assert_eq!(body, "hello");
    server.stop();
}

use std::cell::{Cell, RefCell};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use spindle::{Action, Addr, Conn, Events};

fn tcp_addr(addr: &Addr) -> SocketAddr {
    match addr {
        Addr::Tcp(addr) => *addr,
        other => panic!("expected a tcp listener address, got {other}"),
    }
}

#[test]
fn greeter_tick_and_shutdown() -> io::Result<()> {
    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();
    let client = thread::spawn(move || -> io::Result<()> {
        let addr = addr_rx.recv().expect("server never reported its address");

        let mut first = TcpStream::connect(addr)?;
        let mut greeting = [0u8; 8];
        first.read_exact(&mut greeting)?;
        assert_eq!(&greeting, b"HI THERE");
        first.write_all(b"HELLO")?;
        let mut echo = [0u8; 5];
        first.read_exact(&mut echo)?;
        assert_eq!(&echo, b"HELLO");

        // The second connection is retained by the server and then served
        // entirely from its tick callback: one write, then a close.
        let mut second = TcpStream::connect(addr)?;
        second.read_exact(&mut greeting)?;
        assert_eq!(&greeting, b"HI THERE");
        let mut here = [0u8; 4];
        second.read_exact(&mut here)?;
        assert_eq!(&here, b"HERE");
        let mut rest = [0u8; 16];
        assert_eq!(second.read(&mut rest)?, 0, "tick close should reach us as EOF");

        // Fill the accept counter; reading the greeting proves each one
        // was accepted and its opened hook ran before we shut down.
        let mut extras = Vec::new();
        for _ in 0..15 {
            let mut extra = TcpStream::connect(addr)?;
            extra.read_exact(&mut greeting)?;
            assert_eq!(&greeting, b"HI THERE");
            extras.push(extra);
        }

        first.write_all(b"SHUTDOWN")?;
        let mut farewell = [0u8; 8];
        first.read_exact(&mut farewell)?;
        assert_eq!(&farewell, b"GOOD BYE");
        Ok(())
    });

    let live = Rc::new(Cell::new(0i32));
    let total = Rc::new(Cell::new(0usize));
    let pre_writes = Rc::new(Cell::new(0usize));
    let ticks = Rc::new(Cell::new(0usize));
    let held = Rc::new(RefCell::new(None::<Conn>));
    let first_conn = Rc::new(RefCell::new(None::<Conn>));
    let held_rounds = Rc::new(Cell::new(0usize));

    let events = Events::new()
        .with_serving(move |server| {
            addr_tx
                .send(tcp_addr(&server.addrs[0]))
                .expect("client went away early");
            Action::None
        })
        .with_opened({
            let live = live.clone();
            let total = total.clone();
            let held = held.clone();
            let first_conn = first_conn.clone();
            move |conn| {
                assert!(conn.remote_addr().is_some());
                assert!(matches!(conn.local_addr(), Addr::Tcp(_)));
                live.set(live.get() + 1);
                total.set(total.get() + 1);
                conn.set_context(total.get());
                match total.get() {
                    1 => *first_conn.borrow_mut() = Some(conn.clone()),
                    2 => *held.borrow_mut() = Some(conn.clone()),
                    _ => {}
                }
                (b"HI THERE".to_vec(), Action::None)
            }
        })
        .with_data(move |conn, input| {
            let serial = conn
                .context()
                .and_then(|ctx| ctx.downcast::<usize>().ok());
            assert!(serial.is_some(), "opened stored a serial for every conn");
            if input == b"SHUTDOWN" {
                (b"GOOD BYE".to_vec(), Action::Shutdown)
            } else {
                (input.to_vec(), Action::None)
            }
        })
        .with_pre_write({
            let pre_writes = pre_writes.clone();
            move || pre_writes.set(pre_writes.get() + 1)
        })
        .with_closed({
            let live = live.clone();
            move |_conn| {
                live.set(live.get() - 1);
                Action::None
            }
        })
        .with_tick({
            let ticks = ticks.clone();
            let held = held.clone();
            let held_rounds = held_rounds.clone();
            move |_now| {
                ticks.set(ticks.get() + 1);
                if ticks.get() == 1 {
                    // A zero delay still means the next tick fires.
                    return (Duration::ZERO, Action::None);
                }
                let mut slot = held.borrow_mut();
                if let Some(conn) = slot.as_ref() {
                    if held_rounds.get() == 0 {
                        conn.write(b"HERE");
                    } else {
                        conn.close();
                        *slot = None;
                    }
                    held_rounds.set(held_rounds.get() + 1);
                }
                (Duration::from_millis(100), Action::None)
            }
        });

    spindle::serve(events, &["tcp://127.0.0.1:0"])?;
    client.join().expect("client thread panicked")?;

    assert!(pre_writes.get() > 0, "expected pre-write notifications");
    assert!(ticks.get() >= 2, "zero-delay tick must not stall the timer");
    assert_eq!(total.get(), 17);
    assert_eq!(live.get(), 0, "every connection saw its closed hook");

    // Handles retained past the loop stay inert.
    let leftover = first_conn.borrow().clone().expect("first conn retained");
    leftover.write(b"ignored");
    leftover.close();
    Ok(())
}

#[test]
fn serving_can_refuse_to_start() -> io::Result<()> {
    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let events = Events::new()
        .with_serving(|server| {
            assert_eq!(server.addrs.len(), 1);
            Action::Shutdown
        })
        .with_opened(|_conn| panic!("no connection can arrive before the loop starts"));

    spindle::serve(events, &["tcp://127.0.0.1:0"])
}

#[test]
fn writes_from_one_callback_preserve_order() -> io::Result<()> {
    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();
    let client = thread::spawn(move || -> io::Result<()> {
        let addr = addr_rx.recv().expect("server never reported its address");
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(b"GO")?;
        let mut word = [0u8; 8];
        stream.read_exact(&mut word)?;
        assert_eq!(&word, b"ALPHABET");
        stream.write_all(b"BYE")?;
        Ok(())
    });

    let events = Events::new()
        .with_serving(move |server| {
            addr_tx
                .send(tcp_addr(&server.addrs[0]))
                .expect("client went away early");
            Action::None
        })
        .with_data(|conn, input| match input {
            b"GO" => {
                conn.write(b"AL");
                conn.write(b"PHA");
                (b"BET".to_vec(), Action::None)
            }
            _ => (Vec::new(), Action::Shutdown),
        });

    spindle::serve(events, &["tcp://127.0.0.1:0"])?;
    client.join().expect("client thread panicked")?;
    Ok(())
}

#[test]
fn large_response_drains_under_backpressure() -> io::Result<()> {
    const PAYLOAD_LEN: usize = 1 << 20;

    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();
    let client = thread::spawn(move || -> io::Result<()> {
        let addr = addr_rx.recv().expect("server never reported its address");
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(b"PULL")?;
        let mut payload = vec![0u8; PAYLOAD_LEN];
        stream.read_exact(&mut payload)?;
        assert!(payload.iter().all(|&byte| byte == 0xAB));
        stream.write_all(b"BYE")?;
        Ok(())
    });

    let pre_writes = Rc::new(Cell::new(0usize));
    let events = Events::new()
        .with_serving(move |server| {
            addr_tx
                .send(tcp_addr(&server.addrs[0]))
                .expect("client went away early");
            Action::None
        })
        .with_pre_write({
            let pre_writes = pre_writes.clone();
            move || pre_writes.set(pre_writes.get() + 1)
        })
        .with_data(|_conn, input| match input {
            b"PULL" => (vec![0xAB; PAYLOAD_LEN], Action::None),
            _ => (Vec::new(), Action::Shutdown),
        });

    spindle::serve(events, &["tcp://127.0.0.1:0"])?;
    client.join().expect("client thread panicked")?;
    assert!(pre_writes.get() >= 1);
    Ok(())
}

#[test]
fn opened_can_greet_and_close() -> io::Result<()> {
    tracing_subscriber::fmt().with_target(false).try_init().ok();

    let (addr_tx, addr_rx) = mpsc::channel::<SocketAddr>();
    let client = thread::spawn(move || -> io::Result<()> {
        let addr = addr_rx.recv().expect("server never reported its address");
        let mut stream = TcpStream::connect(addr)?;
        let mut verdict = [0u8; 6];
        stream.read_exact(&mut verdict)?;
        assert_eq!(&verdict, b"DENIED");
        let mut rest = [0u8; 16];
        assert_eq!(stream.read(&mut rest)?, 0, "server closes after the verdict");
        Ok(())
    });

    let done = Rc::new(Cell::new(false));
    let events = Events::new()
        .with_serving(move |server| {
            addr_tx
                .send(tcp_addr(&server.addrs[0]))
                .expect("client went away early");
            Action::None
        })
        .with_opened(|_conn| (b"DENIED".to_vec(), Action::Close))
        .with_closed({
            let done = done.clone();
            move |_conn| {
                done.set(true);
                Action::None
            }
        })
        .with_tick({
            let done = done.clone();
            move |_now| {
                if done.get() {
                    (Duration::ZERO, Action::Shutdown)
                } else {
                    (Duration::from_millis(10), Action::None)
                }
            }
        });

    spindle::serve(events, &["tcp://127.0.0.1:0"])?;
    client.join().expect("client thread panicked")?;
    assert!(done.get());
    Ok(())
}

#[test]
fn rejects_unknown_scheme() {
    let err = spindle::serve(Events::new(), &["udp://127.0.0.1:0"]).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
}

#[test]
fn rejects_unresolvable_address() {
    assert!(spindle::serve(Events::new(), &["tcp://definitely not an address"]).is_err());
}

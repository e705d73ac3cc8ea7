//! Minimal echo server: every byte a client sends comes straight back.
//!
//! ```sh
//! cargo run --example echo -- tcp://127.0.0.1:5000
//! ```

use spindle::{Action, Events};

fn main() -> std::io::Result<()> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:5000".to_owned());

    let events = Events::new()
        .with_serving(|server| {
            println!("echo server listening on {}", server.addrs[0]);
            Action::None
        })
        .with_opened(|conn| {
            println!("+ {}", conn.remote_addr().expect("accepted socket has a peer"));
            (Vec::new(), Action::None)
        })
        .with_closed(|conn| {
            println!("- {:?}", conn);
            Action::None
        })
        .with_data(|_conn, input| (input.to_vec(), Action::None));

    spindle::serve(events, &[addr.as_str()])
}

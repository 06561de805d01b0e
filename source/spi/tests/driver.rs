use futures::{
    channel::{mpsc, oneshot},
    executor::{block_on, LocalPool},
    task::LocalSpawnExt,
};
use spi::{
    client::{CallError, Fields, SpiClient},
    heap::{Budget, Heap, Unbounded},
    map,
    registry::PortRegistry,
    server::{self, Reply, ReplyTo, Request, StartError, UserRequest, UserResponse},
    sim::{Event, SimBus},
    Peripheral, SpiError, SpiServer, TransportError, Value,
};

fn trace_init() {
    use tracing_subscriber::{
        filter::{EnvFilter, LevelFilter},
        prelude::*,
    };
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = if env.is_empty() {
        builder.parse("spi=debug").unwrap()
    } else {
        builder.parse_lossy(env)
    };

    let _res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .without_time()
        .finish()
        .try_init();
}

fn device(cs: i64) -> Value {
    map! {
        "spi_clock_hz" => 1_000_000i64,
        "spi_mode" => 0i64,
        "spi_cs_io_num" => cs,
        "address_len_bits" => 8i64,
        "command_len_bits" => 0i64,
    }
}

/// Options for a port with `dev_a` and `dev_b` on vspi.
fn opts() -> Value {
    map! {
        "bus_config" => map! {
            "miso_io_num" => 19i64,
            "mosi_io_num" => 27i64,
            "sclk_io_num" => 5i64,
            "spi_peripheral" => "vspi",
        },
        "device_config" => Value::Map(vec![
            (Value::atom("dev_a"), device(18)),
            (Value::atom("dev_b"), device(15)),
        ]),
    }
}

fn open<H: Heap>(bus: &SimBus, heap: H, reg: &mut PortRegistry) -> (SpiServer<SimBus, H>, SpiClient) {
    trace_init();
    server::open(&opts(), bus.clone(), heap, reg).unwrap()
}

/// Spawn the server, then run `f` against a client until it completes.
fn with_port<F, Fut, T>(bus: &SimBus, f: F) -> T
where
    F: FnOnce(SpiClient) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let mut reg = PortRegistry::new();
    let (server, client) = open(bus, Unbounded, &mut reg);
    let mut pool = LocalPool::new();
    pool.spawner().spawn_local(server.run()).unwrap();
    pool.run_until(f(client))
}

#[test]
fn write_read_two_bytes_read_one() {
    let bus = SimBus::new();
    let read = with_port(&bus, |mut client| async move {
        let fields = Fields::new().write_data([0xAB, 0xCD]).read_bits(8);
        client.write_read("dev_a", &fields).await
    });
    assert_eq!(read, Ok(vec![0xAB]));

    let xfers = bus.transfers();
    assert_eq!(xfers.len(), 1);
    assert_eq!(xfers[0].write_bits, 16);
    assert_eq!(xfers[0].read_len, 1);
}

#[test]
fn unknown_device_is_not_found() {
    let bus = SimBus::new();
    let res = with_port(&bus, |mut client| async move {
        client.read_at("unknown_device", 0, 8).await
    });
    assert_eq!(res, Err(CallError::Spi(SpiError::DeviceNotFound)));
    assert!(bus.transfers().is_empty());
}

#[test]
fn too_many_write_bits() {
    let bus = SimBus::new();
    let res = with_port(&bus, |mut client| async move {
        client.write("dev_a", &Fields::new().write_bits(100)).await
    });
    assert_eq!(res, Err(CallError::Spi(SpiError::BadArgument)));
    assert!(bus.transfers().is_empty());
}

#[test]
fn fixed_width_round_trips() {
    let bus = SimBus::new();
    let (w, r) = with_port(&bus, |mut client| async move {
        let w = client.write_at("dev_b", 0x0F, 24, 0x00AB_CDEF).await;
        let r = client.read_at("dev_b", 0x0F, 16).await;
        (w, r)
    });
    // loopback echoes what was written
    assert_eq!(w, Ok(0x00AB_CDEF));
    // nothing written on a read, so nothing read back
    assert_eq!(r, Ok(0));

    let xfers = bus.transfers();
    assert_eq!(xfers[0].mosi, vec![0xAB, 0xCD, 0xEF]);
    assert_eq!(xfers[0].address, 0x0F);
}

#[test]
fn scripted_reads_and_commands() {
    let bus = SimBus::new();
    bus.push_response([0xDE, 0xAD, 0xBE, 0xEF]);
    let res = with_port(&bus, |mut client| async move {
        let fields = Fields::new()
            .command(0x0B)
            .address(0x1000)
            .write_data([0x00])
            .write_bits(0)
            .read_bits(32);
        client.write_read("dev_a", &fields).await
    });
    assert_eq!(res, Ok(vec![0xDE, 0xAD, 0xBE, 0xEF]));

    let xfer = &bus.transfers()[0];
    assert_eq!(xfer.command, 0x0B);
    assert_eq!(xfer.address, 0x1000);
    assert_eq!(xfer.write_bits, 0);
    assert!(xfer.mosi.is_empty());
    assert_eq!(xfer.read_len, 4);
}

#[test]
fn transport_error_keeps_serving() {
    let bus = SimBus::new();
    bus.fail_next_transfer(TransportError(0x107));
    let (first, second) = with_port(&bus, |mut client| async move {
        let fields = Fields::new().write_data([1, 2]);
        let first = client.write("dev_a", &fields).await;
        let second = client.write("dev_a", &fields).await;
        (first, second)
    });
    assert_eq!(
        first,
        Err(CallError::Spi(SpiError::Transport(TransportError(0x107))))
    );
    assert_eq!(second, Ok(()));
}

#[test]
fn close_replies_ok_even_if_teardown_fails() {
    let bus = SimBus::new();
    bus.fail_remove_device(TransportError(0x103));
    bus.fail_free(TransportError(0x103));

    let mut reg = PortRegistry::new();
    let (server, mut client) = open(&bus, Unbounded, &mut reg);
    let port = client.port().to_value();
    assert_eq!(server::peripheral(&reg, &port), Some(Peripheral::Vspi));

    let mut pool = LocalPool::new();
    pool.spawner().spawn_local(server.run()).unwrap();
    let (closed, after) = pool.run_until(async move {
        let closed = client.close().await;
        let after = client.read_at("dev_a", 0, 8).await;
        (closed, after)
    });
    assert_eq!(closed, Ok(()));
    // the port has stopped
    assert_eq!(after, Err(CallError::Disconnected));
    assert_eq!(server::peripheral(&reg, &port), None);

    let removed = bus
        .events()
        .iter()
        .filter(|e| matches!(e, Event::RemoveDevice { .. }))
        .count();
    assert_eq!(removed, 2);
    assert!(bus.events().iter().any(|e| matches!(e, Event::Free { .. })));
}

#[test]
fn every_request_gets_one_reply() {
    let bus = SimBus::new();
    let mut reg = PortRegistry::new();
    let (mut server, _client) = open(&bus, Unbounded, &mut reg);

    let payloads = [
        spi::command::read_at(Value::atom("dev_a"), 0, 8),
        spi::command::write(Value::atom("dev_a"), map! { "write_bits" => 100i64 }),
        Value::atom("nonsense"),
        Value::Tuple(vec![Value::atom("write_at"), Value::atom("dev_a")]),
        spi::command::write_read(Value::atom("nope"), Value::Map(vec![])),
        spi::command::close(),
    ];
    let (tx, mut rx) = mpsc::unbounded();
    for (i, payload) in payloads.iter().enumerate() {
        server.handle(Request {
            token: Value::Int(i as i64),
            payload: payload.clone(),
            reply: ReplyTo::Mailbox(tx.clone()),
        });
    }
    drop(tx);

    let replies: Vec<Reply> = block_on(futures::StreamExt::collect(&mut rx));
    let tokens: Vec<_> = replies.iter().map(|r| r.token.clone()).collect();
    assert_eq!(tokens, (0..6).map(Value::Int).collect::<Vec<_>>());
    assert_eq!(replies[0].body, Value::pair(Value::ok(), Value::Int(0)));
    assert_eq!(
        replies[1].body,
        Value::pair(Value::error(), Value::atom("bad_argument"))
    );
    assert_eq!(replies[2].body, Value::error());
    assert_eq!(
        replies[3].body,
        Value::pair(Value::error(), Value::atom("bad_argument"))
    );
    assert_eq!(
        replies[4].body,
        Value::pair(Value::error(), Value::atom("device_not_found"))
    );
    assert_eq!(replies[5].body, Value::ok());
}

#[test]
fn out_of_memory_still_echoes_the_token() {
    let bus = SimBus::new();
    let mut reg = PortRegistry::new();
    // enough for a pair, not for a boxed integer
    let (mut server, _client) = open(&bus, Budget { words: 3 }, &mut reg);

    bus.push_response([0xFF, 0xFF, 0xFF, 0xFF]);
    let (tx, rx) = oneshot::channel();
    server.handle(Request {
        token: Value::atom("t"),
        payload: spi::command::read_at(Value::atom("dev_a"), 0, 32),
        reply: ReplyTo::OneShot(tx),
    });
    let reply = block_on(rx).unwrap();
    assert_eq!(reply.token, Value::atom("t"));
    assert_eq!(reply.body, Value::atom("out_of_memory"));
    // the transfer still happened
    assert_eq!(bus.transfers().len(), 1);

    // no room at all for the reply pair
    let (mut server, _client) = open(&SimBus::new(), Budget { words: 0 }, &mut reg);
    let (tx, rx) = oneshot::channel();
    server.handle(Request {
        token: Value::atom("u"),
        payload: spi::command::close(),
        reply: ReplyTo::OneShot(tx),
    });
    let reply = block_on(rx).unwrap();
    assert_eq!(reply.token, Value::atom("u"));
    assert_eq!(reply.body, Value::atom("out_of_memory"));
}

#[test]
fn userspace_requests() {
    let bus = SimBus::new();
    let mut reg = PortRegistry::new();
    let (mut server, _client) = open(&bus, Unbounded, &mut reg);

    let (out_tx, mut out_rx) = mpsc::unbounded();
    let req = UserRequest {
        token: Value::Int(42),
        payload: spi::command::write_at(Value::atom("dev_a"), 1, 8, 0x5A),
    };
    let bytes = postcard::to_stdvec(&req).unwrap();
    server.handle(Request::from_user_bytes(&bytes, out_tx).unwrap());

    let out = out_rx.try_next().unwrap().unwrap();
    let resp: UserResponse = postcard::from_bytes(&out).unwrap();
    assert_eq!(resp.token, Value::Int(42));
    assert_eq!(resp.body, Value::pair(Value::ok(), Value::Int(0x5A)));
}

#[test]
fn raw_requests_through_the_mailbox() {
    let bus = SimBus::new();
    let reply = with_port(&bus, |mut client| async move {
        client
            .request(spi::command::write(
                Value::atom("dev_b"),
                map! { "write_data" => vec![0x01u8, 0x02, 0x03], "write_bits" => 12i64 },
            ))
            .await
    });
    assert_eq!(reply.map(|r| r.body), Ok(Value::ok()));
    let xfer = &bus.transfers()[0];
    assert_eq!(xfer.write_bits, 12);
    assert_eq!(xfer.mosi, vec![0x01, 0x02]);
    assert_eq!(xfer.read_bits, 0);
}

#[test]
fn startup_failures_release_everything() {
    trace_init();
    let mut reg = PortRegistry::new();

    let bus = SimBus::new();
    bus.fail_add_device(1, TransportError(0x101));
    let err = server::open(&opts(), bus.clone(), Unbounded, &mut reg).err();
    assert!(matches!(err, Some(StartError::Attach(_))), "{err:?}");
    assert!(bus.attached().is_empty());
    assert!(!bus.is_initialized());
    assert!(reg.is_empty());

    let bad = map! { "bus_config" => map! { "miso_io_num" => 19i64 } };
    let bus = SimBus::new();
    let err = server::open(&bad, bus.clone(), Unbounded, &mut reg).err();
    assert!(matches!(err, Some(StartError::Config(_))), "{err:?}");
    assert!(bus.events().is_empty());
}

#[test]
fn capability_query_needs_a_live_spi_port() {
    let bus = SimBus::new();
    let mut reg = PortRegistry::new();
    let (server, client) = open(&bus, Unbounded, &mut reg);
    let port = client.port().to_value();

    assert_eq!(server::peripheral(&reg, &port), Some(Peripheral::Vspi));
    assert_eq!(server::peripheral(&reg, &Value::atom("spi")), None);
    assert_eq!(server::peripheral(&reg, &Value::Pid(1234)), None);

    drop(server);
    assert_eq!(server::peripheral(&reg, &port), None);
    assert!(bus.attached().is_empty());
    assert!(!bus.is_initialized());
}

#[test]
fn dropped_clients_stop_the_server() {
    let bus = SimBus::new();
    let mut reg = PortRegistry::new();
    let (server, client) = open(&bus, Unbounded, &mut reg);
    let port = client.port().to_value();
    let mut pool = LocalPool::new();
    pool.spawner().spawn_local(server.run()).unwrap();
    pool.run_until_stalled();
    assert_eq!(server::peripheral(&reg, &port), Some(Peripheral::Vspi));

    drop(client);
    pool.run();
    assert_eq!(server::peripheral(&reg, &port), None);
    // the devices and the bus were released
    assert!(bus.attached().is_empty());
    assert!(!bus.is_initialized());

    // so the same peripheral can be started again
    let (_server, _client) = open(&bus, Unbounded, &mut reg);
    assert_eq!(bus.attached().len(), 2);
}

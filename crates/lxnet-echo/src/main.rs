//! Echo server and client built on lxnet.
//!
//! Without `--connect` it listens on the configured port and sends every
//! received message back to its sender. With `--connect HOST` it sends a
//! burst of messages to HOST and waits for the echoes.
//! Run with `cargo run -p lxnet-echo -- --port 9000`.

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use lxnet::{Msg, Net, Socketer};
use lxnet_config::{CliArgs, Config};
use tracing::{error, info, warn};

/// Messages sent by the client before it waits for echoes.
const BURST: u32 = 100;

/// Give up on missing echoes after this long.
const CLIENT_DEADLINE: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args
        .config
        .clone()
        .or_else(Config::default_dir)
        .unwrap_or_else(|| ".".into());

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    lxnet_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let net = match Net::init(config.net_init()) {
        Ok(net) => net,
        Err(e) => {
            error!("Net init failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    net.set_enable_error_log(config.debug.enable_error_log);
    info!("lxnet running on host {:?}", lxnet::host_name().ok());

    let result = if args.connect.is_some() {
        run_client(&net, &config)
    } else {
        run_server(&net, &config)
    };
    info!("{}", net.memory_info());
    info!("{}", net.data_info());

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn apply_limits(socketer: &Socketer, config: &Config) {
    socketer.set_recv_critical(config.limits.recv_critical);
    socketer.set_send_critical(config.limits.send_critical);
}

/// Tracks when statistics were last logged.
struct StatsDump {
    every: Option<Duration>,
    last: Instant,
}

impl StatsDump {
    fn new(config: &Config) -> Self {
        let secs = config.debug.stats_interval_secs;
        Self {
            every: (secs > 0).then(|| Duration::from_secs(secs)),
            last: Instant::now(),
        }
    }

    fn maybe_log(&mut self, net: &Net) {
        if let Some(every) = self.every
            && self.last.elapsed() >= every
        {
            self.last = Instant::now();
            info!("traffic:\n{}", net.data_info());
        }
    }
}

fn run_server(net: &Net, config: &Config) -> Result<(), lxnet::NetError> {
    let listener = net.listener_create()?;
    listener.listen(config.server.port, config.server.backlog)?;
    info!("Echo server listening on port {}", config.server.port);

    let interval = Duration::from_millis(config.runtime.run_interval_ms);
    let mut stats = StatsDump::new(config);
    let mut clients: Vec<Socketer> = Vec::new();

    while !listener.is_closed() {
        while listener.can_accept() {
            match listener.accept(config.server.big_buffers) {
                Ok(Some(socketer)) => {
                    info!("Client connected from {:?}", socketer.ip());
                    apply_limits(&socketer, config);
                    clients.push(socketer);
                }
                Ok(None) => break,
                Err(e) => warn!("Dropping incoming connection: {e}"),
            }
        }

        for client in &clients {
            while let Some(msg) = client.get_msg() {
                if let Err(e) = client.send_msg(&msg, None) {
                    warn!("Echo to {:?} failed: {e}", client.ip());
                    break;
                }
            }
        }
        clients.retain(|client| {
            if client.is_closed() {
                info!("Client {:?} disconnected", client.ip());
            }
            !client.is_closed()
        });

        net.run();
        stats.maybe_log(net);
        std::thread::sleep(interval);
    }
    Ok(())
}

fn run_client(net: &Net, config: &Config) -> Result<(), lxnet::NetError> {
    let socketer = net.socketer_create(config.server.big_buffers)?;
    apply_limits(&socketer, config);
    let ip = lxnet::host_ip_by_name(&config.server.connect_address)?;
    socketer.connect(&ip.to_string(), config.server.port)?;
    info!(
        "Connected to {} ({ip}) port {}",
        config.server.connect_address, config.server.port
    );

    for seq in 0..BURST {
        let mut msg = Msg::new();
        msg.push_u32(seq).push_str("echo");
        socketer.send_msg(&msg, None)?;
    }

    let interval = Duration::from_millis(config.runtime.run_interval_ms);
    let deadline = Instant::now() + CLIENT_DEADLINE;
    let mut stats = StatsDump::new(config);
    let mut echoed = 0;
    while echoed < BURST {
        if socketer.is_closed() {
            return Err(lxnet::NetError::Closed);
        }
        if Instant::now() >= deadline {
            warn!("Timed out with {echoed}/{BURST} echoes");
            break;
        }
        while let Some(msg) = socketer.get_msg() {
            let mut reader = msg.reader();
            if reader.read_u32() != Some(echoed) {
                warn!("Echo {echoed} arrived out of order");
            }
            echoed += 1;
        }
        net.run();
        stats.maybe_log(net);
        std::thread::sleep(interval);
    }
    info!("Received {echoed}/{BURST} echoes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_client_reaches_server_by_host_name() {
        let mut config = Config::default();
        config.server.port = 0;
        config.server.connect_address = "localhost".to_string();
        config.runtime.thread_count = 1;
        config.debug.stats_interval_secs = 0;

        let net = Net::init(config.net_init()).unwrap();
        let listener = net.listener_create().unwrap();
        listener.listen(0, 16).unwrap();
        config.server.port = listener.local_addr().unwrap().port();

        // Echo from a helper thread while the client runs here.
        let stop = Arc::new(AtomicBool::new(false));
        let server_stop = Arc::clone(&stop);
        let server = std::thread::spawn(move || {
            let mut peer = None;
            while !server_stop.load(Ordering::Relaxed) {
                if peer.is_none() {
                    peer = listener.accept(false).unwrap();
                }
                if let Some(peer) = &peer {
                    while let Some(msg) = peer.get_msg() {
                        peer.send_msg(&msg, None).unwrap();
                    }
                    peer.check_send();
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let result = run_client(&net, &config);
        stop.store(true, Ordering::Relaxed);
        server.join().unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(net.stats().snapshot().total.recv_msg_num, u64::from(2 * BURST));
    }
}

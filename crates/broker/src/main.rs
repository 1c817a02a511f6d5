use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use broker::{listen_fds, AllowAll, Bus, Listener};
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::flag as signal_flag;
use tracing::{error, info};

fn default_bind_path() -> PathBuf {
    env::var_os("BROKER_SOCKET_PATH").map_or_else(|| PathBuf::from("/run/broker-core/bus"), PathBuf::from)
}

fn install_signal_handlers() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    for sig in [SIGTERM, SIGINT, SIGQUIT] {
        if let Err(err) = signal_flag::register(sig, Arc::clone(&shutdown)) {
            error!(?err, signal = sig, "failed to register signal handler");
        }
    }
    shutdown
}

fn main() {
    tracing_subscriber::fmt::init();

    let mut bus = match Bus::new(Box::new(AllowAll), "broker-core") {
        Ok(bus) => bus,
        Err(err) => {
            error!(?err, "failed to construct bus");
            std::process::exit(1);
        }
    };

    let activation_fds = listen_fds();
    if activation_fds.is_empty() {
        let path = default_bind_path();
        info!(?path, "binding listener");
        match Listener::bind(&path) {
            Ok(listener) => {
                if let Err(err) = bus.add_listener(listener) {
                    error!(?err, "failed to register bound listener");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                error!(?err, ?path, "failed to bind listener");
                std::process::exit(1);
            }
        }
    } else {
        for fd in activation_fds {
            info!(fd, "adopting socket-activation listener");
            // Safety: `listen_fds` only returns fds the launcher explicitly
            // handed this process via LISTEN_FDS, each used exactly once.
            match unsafe { Listener::from_raw_fd(fd) } {
                Ok(listener) => {
                    if let Err(err) = bus.add_listener(listener) {
                        error!(?err, fd, "failed to register activation listener");
                        std::process::exit(1);
                    }
                }
                Err(err) => {
                    error!(?err, fd, "failed to adopt activation listener");
                    std::process::exit(1);
                }
            }
        }
    }

    let shutdown = install_signal_handlers();
    info!("broker running");
    if let Err(err) = bus.run(&shutdown) {
        error!(?err, "bus loop exited with error");
        std::process::exit(1);
    }
    info!("broker shutting down");
}

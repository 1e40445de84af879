// src/orchestrator.rs
//! Wires the server together and runs it.
//!
//! Startup order matters:
//! 1. Build the display sink and wrap it in the priority sender.
//! 2. Bind every enabled front-end, so port conflicts show up on the terminal.
//! 3. Detach (optional), then start the sender's real-time worker.
//! 4. Create the shared layers, the compositor and the reaper.
//! 5. Start the optional front-end threads.
//! 6. Drop privileges.
//! 7. Serve UDP on the calling thread until it fails.

use crate::color::Color;
use crate::composite::Compositor;
use crate::config::{Backend, Config, Protocols};
use crate::display::{DisplaySink, HeadlessSink, PrioritySender, SenderStats, TerminalSink};
use crate::lifecycle::PrivilegedInit;
use crate::servers::{OpcServer, PixelPusherServer, UdpServer};

use anyhow::{Context, Result};
use log::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Creates the sink selected by `config.backend`.
pub fn build_sink(config: &Config) -> Box<dyn DisplaySink> {
    match config.backend {
        Backend::Terminal => Box::new(TerminalSink::stdout(config.width, config.height)),
        Backend::Headless => Box::new(HeadlessSink::new(config.width, config.height)),
    }
}

/// Runs the server. Returns only on a startup failure, a UDP socket error or
/// after a finished speed test.
pub fn run(config: &Config) -> Result<()> {
    run_with_sink(config, build_sink(config))
}

/// Like `run`, driving `sink` instead of the configured backend.
pub fn run_with_sink(config: &Config, sink: Box<dyn DisplaySink>) -> Result<()> {
    info!(
        "Orchestrator: {}x{} display, {} layers, {:?} backend, protocols {:?}",
        config.width, config.height, config.layers, config.backend, config.protocols
    );

    let mut sender = PrioritySender::new(sink, config.sender_priority);
    let phase = PrivilegedInit::begin();

    let udp = UdpServer::bind(config.network.udp_port)?;
    let opc = if config.protocols.contains(Protocols::OPC) {
        Some(OpcServer::bind(config.network.opc_port)?)
    } else {
        None
    };
    let pixel_pusher = if config.protocols.contains(Protocols::PIXEL_PUSHER) {
        Some(PixelPusherServer::init(config)?)
    } else {
        None
    };

    let phase = phase.detach(config.daemon);
    sender
        .post_daemon_init(&phase)
        .context("Failed to start display sender")?;

    if config.speed_test {
        info!("Orchestrator: Running speed test instead of serving");
        run_speed_test(&mut sender, None);
        return Ok(());
    }

    // Staging is all black: this clears the display.
    sender.send()?;

    let compositor = Compositor::new(
        config.new_layer_stack().into_shared(),
        Arc::new(sender.handle()),
    );
    let _reaper =
        compositor.start_garbage_collection(config.layer_timeout(), config.reaper_tick())?;

    let protocol_layer = config.protocol_layer();
    if let Some(opc) = opc {
        opc.run_thread(compositor.clone(), protocol_layer)?;
    }
    if let Some(pixel_pusher) = pixel_pusher {
        pixel_pusher.run_thread(compositor.clone(), protocol_layer)?;
    }

    let _phase = phase
        .drop_privileges(&config.privileges.user, &config.privileges.group)
        .context("Failed to drop privileges")?;

    info!("Orchestrator: Serving");
    udp.run_blocking(&compositor)
}

/// Pushes alternating white and black frames, with a fixed red column in the
/// middle to make glitches visible, as fast as the sender accepts them.
///
/// Logs submit and flush rates once per second. Runs forever unless
/// `iterations` is given.
pub fn run_speed_test<S: DisplaySink + 'static>(
    sender: &mut PrioritySender<S>,
    iterations: Option<u64>,
) -> SenderStats {
    let (width, height) = (sender.width() as i32, sender.height() as i32);
    let mark_column = width / 2;

    let mut window_start = Instant::now();
    let mut window_stats = sender.stats();
    let mut i: u64 = 0;
    while iterations.map_or(true, |limit| i < limit) {
        let fill = if i % 2 == 0 { Color::WHITE } else { Color::BLACK };
        for y in 0..height {
            for x in 0..width {
                let color = if x == mark_column { Color::RED } else { fill };
                sender.set_pixel(x, y, color);
            }
        }
        if let Err(e) = sender.send() {
            warn!("SpeedTest: send() failed: {:#}", e);
        }
        i += 1;

        let elapsed = window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let stats = sender.stats();
            let secs = elapsed.as_secs_f64();
            info!(
                "SpeedTest: {:7.1}Hz submitted, {:7.1}Hz flushed",
                (stats.submitted - window_stats.submitted) as f64 / secs,
                (stats.sent - window_stats.sent) as f64 / secs
            );
            window_start = Instant::now();
            window_stats = stats;
        }
    }
    sender.stats()
}

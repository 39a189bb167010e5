//! Pipeline assembly and startup sequencing.
//!
//! Everything the running pipeline shares (destination, limits, gate, counters)
//! lives in one [`PipelineContext`] built once from configuration. Startup
//! runs in a fixed order:
//!
//! 1. wait for the network link (bounded by `link_timeout`, fatal on expiry)
//! 2. create the datagram socket
//! 3. program the sensor for streaming and read its diagnostics
//! 4. allocate the sample queue
//! 5. spawn the packetizer, start conversions, spawn the reader
//!
//! Edges fed to [`PipelineHandle::gate`] after `start` returns are served by
//! the reader. Any error before that point aborts startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::StreamConfig;
use crate::error::AppResult;
use crate::gate::EdgeGate;
use crate::link::LinkMonitor;
use crate::packetizer::{DatagramSink, PacketLimits, Packetizer, UdpSink};
use crate::queue::sample_queue;
use crate::reader::{ReaderSettings, SampleReader};
use crate::sensor::{self, SensorBus};
use crate::stats::{PipelineStats, StatsSnapshot};

/// State shared by the pipeline components, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Receiver address for every datagram.
    pub destination: SocketAddr,
    /// Local address of the sending socket.
    pub bind_addr: SocketAddr,
    /// How long startup waits for the link.
    pub link_timeout: Duration,
    /// Datagram batching limits.
    pub limits: PacketLimits,
    /// Reader tunables.
    pub reader: ReaderSettings,
    /// Sample queue slots.
    pub queue_capacity: usize,
    /// Acquisition gate fed by the edge source.
    pub gate: Arc<EdgeGate>,
    /// Counters for every stage.
    pub stats: Arc<PipelineStats>,
}

impl PipelineContext {
    /// Validate `config` and derive the runtime context from it.
    pub fn from_config(config: &StreamConfig) -> AppResult<Self> {
        config.validate()?;
        let stats = Arc::new(PipelineStats::default());
        Ok(Self {
            destination: config.destination()?,
            bind_addr: config.bind_addr()?,
            link_timeout: config.network.link_timeout,
            limits: config.packet_limits(),
            reader: config.reader_settings()?,
            queue_capacity: config.queue.capacity,
            gate: Arc::new(EdgeGate::with_stats(stats.clone())),
            stats,
        })
    }
}

/// Entry points that assemble and launch the pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start the pipeline sending over UDP to `ctx.destination`.
    pub async fn start<B>(
        ctx: PipelineContext,
        bus: B,
        mut link: LinkMonitor,
    ) -> AppResult<PipelineHandle>
    where
        B: SensorBus + 'static,
    {
        wait_for_link(&ctx, &mut link).await?;
        let sink = UdpSink::bind(ctx.bind_addr, ctx.destination).await?;
        Self::launch(ctx, bus, link, sink).await
    }

    /// Start the pipeline with a caller-supplied datagram sink.
    pub async fn start_with_sink<B, S>(
        ctx: PipelineContext,
        bus: B,
        mut link: LinkMonitor,
        sink: S,
    ) -> AppResult<PipelineHandle>
    where
        B: SensorBus + 'static,
        S: DatagramSink + 'static,
    {
        wait_for_link(&ctx, &mut link).await?;
        Self::launch(ctx, bus, link, sink).await
    }

    async fn launch<B, S>(
        ctx: PipelineContext,
        mut bus: B,
        link: LinkMonitor,
        sink: S,
    ) -> AppResult<PipelineHandle>
    where
        B: SensorBus + 'static,
        S: DatagramSink + 'static,
    {
        sensor::configure_for_streaming(&mut bus).await?;
        match sensor::read_diagnostics(&mut bus).await {
            Ok(diagnostics) => {
                diagnostics.log();
                if let Err(e) = diagnostics.check() {
                    warn!(error = %e, "Continuing despite sensor fault");
                }
            }
            Err(e) => warn!(error = %e, "Failed to read sensor diagnostics"),
        }

        let (tx, rx) = sample_queue(ctx.queue_capacity, ctx.stats.clone())?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let packetizer = Packetizer::new(rx, sink, link, ctx.limits, ctx.stats.clone());
        let packetizer = tokio::spawn(packetizer.run(shutdown_rx));

        if let Err(e) = sensor::start_conversion(&mut bus).await {
            let _ = shutdown_tx.send(true);
            let _ = packetizer.await;
            return Err(e);
        }

        let reader = SampleReader::new(ctx.gate.clone(), bus, tx, ctx.reader);
        let reader = tokio::spawn(reader.run());

        info!(
            destination = %ctx.destination,
            queue_capacity = ctx.queue_capacity,
            "Pipeline started"
        );

        Ok(PipelineHandle {
            gate: ctx.gate,
            stats: ctx.stats,
            destination: ctx.destination,
            reader,
            packetizer,
            shutdown: shutdown_tx,
        })
    }
}

async fn wait_for_link(ctx: &PipelineContext, link: &mut LinkMonitor) -> AppResult<()> {
    if !link.is_up() {
        info!(timeout = ?ctx.link_timeout, "Waiting for network link...");
    }
    link.wait_ready(ctx.link_timeout).await.map_err(|e| {
        error!(error = %e, "Network link not available, aborting startup");
        e
    })
}

/// Running pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    gate: Arc<EdgeGate>,
    stats: Arc<PipelineStats>,
    destination: SocketAddr,
    reader: JoinHandle<()>,
    packetizer: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl PipelineHandle {
    /// Gate to deliver data-ready edges to.
    pub fn gate(&self) -> &Arc<EdgeGate> {
        &self.gate
    }

    /// Live counters.
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    /// Where datagrams are sent.
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Stop acquisition, send whatever is queued and wait for the sender.
    pub async fn shutdown(self) -> StatsSnapshot {
        self.reader.abort();
        let _ = self.reader.await;

        let _ = self.shutdown.send(true);
        if let Err(e) = self.packetizer.await {
            error!(error = %e, "Packetizer task failed");
        }

        let snapshot = self.stats.snapshot();
        info!(?snapshot, "Pipeline stopped");
        snapshot
    }
}

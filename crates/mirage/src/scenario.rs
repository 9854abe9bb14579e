//! # Link Scenarios
//!
//! A scenario wires a multiplexed echo server to a set of clients over the
//! in-process transport and drives everything from one tick loop on a manual
//! clock.
//!
//! ```text
//!  client 0 ─ Multiplex(Latency(memory), Latency(relay)) ─┐
//!  client 1 ─ Multiplex(Latency(memory), Latency(relay)) ─┤   echo server
//!     ...                                                 ├─ Multiplex(Latency(memory),
//!  client n ─ Multiplex(Latency(memory), Latency(relay)) ─┘            Latency(relay))
//! ```
//!
//! Client `i` connects by URI to leg `i % legs`. Every payload starts with a
//! sequence number and the tick it was sent on, so echoes yield round trip
//! times and reliable ordering can be checked end to end.
//!
//! ## Tick Order
//!
//! 1. Advance the clock by one tick
//! 2. Early updates (server, then clients) and event handling
//! 3. Clients send new traffic
//! 4. Late updates flush whatever is due

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mirage_networking::{
    ConfigError, LatencyConfig, LatencySimulation, MemoryHub, MemoryTransport, MultiplexTransport,
};
use mirage_shared::{
    ChannelId, ClientEvents, Endpoint, EventLog, ManualClock, ServerEvents, Transport,
    TransportError, TransportEvent, DEFAULT_MAX_PACKET_SIZE, DEFAULT_TICK_RATE,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bytes at the start of every payload: sequence number, then send tick.
pub const PAYLOAD_HEADER: usize = 8;

/// Errors raised while loading or running a scenario.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// A leg's latency settings are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A transport call failed while setting up.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The scenario file could not be parsed.
    #[error("invalid scenario: {0}")]
    Parse(String),

    /// The scenario file could not be read.
    #[error("cannot read {path}: {reason}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        reason: String,
    },

    /// A setting is out of range or inconsistent.
    #[error("{field}: {reason}")]
    Invalid {
        /// Offending setting.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Result type for scenario operations.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// One transport kind the server listens on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LegConfig {
    /// URI scheme of the leg. Must be unique within a scenario.
    pub scheme: String,
    /// Whether clients may use this leg.
    pub available: bool,
    /// Payload limit of the leg.
    pub max_packet_size: usize,
    /// Conditions applied to sends in both directions.
    pub latency: LatencyConfig,
}

impl Default for LegConfig {
    fn default() -> Self {
        Self {
            scheme: "memory".to_string(),
            available: true,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            latency: LatencyConfig::default(),
        }
    }
}

/// Everything `link_sim` needs for one run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// `host:port` every leg listens on.
    pub server_address: String,
    /// Ticks with traffic. Settling ticks are added on top.
    pub ticks: u64,
    /// Ticks per simulated second.
    pub tick_rate: u32,
    /// Number of clients.
    pub clients: usize,
    /// Messages each connected client sends per tick.
    pub messages_per_tick: usize,
    /// Share of messages sent unreliably, `0..=1`.
    pub unreliable_ratio: f64,
    /// Bytes per message, header included.
    pub payload_size: usize,
    /// Seed for traffic and for legs without their own seed.
    pub seed: u64,
    /// Legs in priority order.
    pub legs: Vec<LegConfig>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:7777".to_string(),
            ticks: 600,
            tick_rate: DEFAULT_TICK_RATE,
            clients: 4,
            messages_per_tick: 2,
            unreliable_ratio: 0.75,
            payload_size: 64,
            seed: 42,
            legs: vec![LegConfig::default()],
        }
    }
}

impl ScenarioConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ScenarioError::Parse`] for malformed TOML or unknown keys, otherwise
    /// whatever [`ScenarioConfig::validate`] reports.
    pub fn from_toml_str(source: &str) -> ScenarioResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| ScenarioError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`ScenarioError::Io`] if the file cannot be read, otherwise as
    /// [`ScenarioConfig::from_toml_str`].
    pub fn from_toml_file(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ScenarioError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks ranges and cross-field consistency.
    ///
    /// # Errors
    ///
    /// [`ScenarioError::Invalid`] for a bad scenario setting,
    /// [`ScenarioError::Config`] for a bad leg latency setting.
    pub fn validate(&self) -> ScenarioResult<()> {
        if self.legs.is_empty() {
            return Err(invalid("legs", "at least one leg is required"));
        }
        if self.tick_rate == 0 {
            return Err(invalid("tick_rate", "must be positive"));
        }
        if self.clients == 0 {
            return Err(invalid("clients", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.unreliable_ratio) {
            return Err(invalid("unreliable_ratio", "must be within 0..=1"));
        }

        let smallest = self
            .legs
            .iter()
            .map(|leg| leg.max_packet_size)
            .min()
            .unwrap_or(0);
        if self.payload_size < PAYLOAD_HEADER || self.payload_size > smallest {
            return Err(invalid(
                "payload_size",
                format!("must be within {PAYLOAD_HEADER}..={smallest}"),
            ));
        }

        for (index, leg) in self.legs.iter().enumerate() {
            leg.latency.validate()?;
            if self.legs[..index].iter().any(|other| other.scheme == leg.scheme) {
                return Err(invalid("legs", format!("scheme {} is used twice", leg.scheme)));
            }
        }
        Ok(())
    }

    /// Seed for leg `leg` on node `node` (0 is the server).
    fn leg_seed(&self, leg: usize, node: u64) -> u64 {
        self.legs[leg]
            .latency
            .seed
            .unwrap_or(self.seed)
            .wrapping_add(node.wrapping_mul(1_000_003))
            .wrapping_add(leg as u64)
    }

    /// Ticks needed for the slowest message to make a round trip.
    fn settle_ticks(&self) -> u64 {
        let worst = self
            .legs
            .iter()
            .map(|leg| {
                let base = leg.latency.reliable_latency_ms.max(leg.latency.unreliable_latency_ms);
                base / 1000.0 + leg.latency.jitter
            })
            .fold(0.0, f64::max);
        // Both hops are delayed; each hop also waits for the next early update.
        ((2.0 * worst + 0.05) * f64::from(self.tick_rate)).ceil() as u64 + 4
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ScenarioError {
    ScenarioError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Outcome of a scenario run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScenarioReport {
    /// Ticks run, settling and teardown included.
    pub ticks: u64,
    /// Clients in the scenario.
    pub clients: usize,
    /// Clients that completed their connect.
    pub connected: usize,
    /// Clients whose connect was refused up front.
    pub connect_failures: usize,
    /// Most server connections seen at once.
    pub peak_connections: usize,
    /// Reliable messages handed to client transports.
    pub sent_reliable: u64,
    /// Unreliable messages handed to client transports.
    pub sent_unreliable: u64,
    /// Reliable messages the server received.
    pub received_reliable: u64,
    /// Unreliable messages the server received.
    pub received_unreliable: u64,
    /// Reliable echoes back at a client.
    pub echoed_reliable: u64,
    /// Unreliable echoes back at a client.
    pub echoed_unreliable: u64,
    /// Sends a transport refused.
    pub send_failures: u64,
    /// Disconnects the server observed.
    pub server_disconnects: usize,
    /// True if every client saw its reliable echoes in send order.
    pub reliable_in_order: bool,
    /// Mean echo round trip in milliseconds.
    pub mean_rtt_ms: f64,
}

impl ScenarioReport {
    /// True if every reliable message made it there and back.
    #[must_use]
    pub fn reliable_delivered(&self) -> bool {
        self.received_reliable == self.sent_reliable && self.echoed_reliable == self.sent_reliable
    }

    /// Share of unreliable messages whose echo arrived.
    #[must_use]
    pub fn unreliable_delivery_ratio(&self) -> f64 {
        if self.sent_unreliable == 0 {
            1.0
        } else {
            self.echoed_unreliable as f64 / self.sent_unreliable as f64
        }
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ticks        {} ({} of {} clients connected, peak {} connections)",
            self.ticks, self.connected, self.clients, self.peak_connections
        )?;
        writeln!(
            f,
            "reliable     sent {:>7}  received {:>7}  echoed {:>7}  in order: {}",
            self.sent_reliable,
            self.received_reliable,
            self.echoed_reliable,
            if self.reliable_in_order { "yes" } else { "NO" }
        )?;
        writeln!(
            f,
            "unreliable   sent {:>7}  received {:>7}  echoed {:>7}  ({:.1}% round trip)",
            self.sent_unreliable,
            self.received_unreliable,
            self.echoed_unreliable,
            self.unreliable_delivery_ratio() * 100.0
        )?;
        writeln!(f, "mean rtt     {:.1} ms", self.mean_rtt_ms)?;
        write!(
            f,
            "failures     connect {}  send {}  disconnects seen {}",
            self.connect_failures, self.send_failures, self.server_disconnects
        )
    }
}

struct SimClient {
    transport: MultiplexTransport,
    log: EventLog,
    connected: bool,
    next_seq: u32,
    last_reliable_echo: Option<u32>,
}

/// A wired-up scenario, ready to run.
pub struct Scenario {
    config: ScenarioConfig,
    clock: ManualClock,
    tick_duration: Duration,
    tick: u64,
    server: MultiplexTransport,
    server_log: EventLog,
    clients: Vec<SimClient>,
    rng: ChaCha8Rng,
    report: ScenarioReport,
    rtt_total_ms: f64,
    rtt_samples: u64,
}

impl Scenario {
    /// Validates `config`, starts the server and connects every client.
    ///
    /// A client whose connect is refused stays in the scenario, idle, and is
    /// counted in [`ScenarioReport::connect_failures`].
    ///
    /// # Errors
    ///
    /// Anything [`ScenarioConfig::validate`] reports, and
    /// [`ScenarioError::Transport`] if the server cannot start or a leg URI
    /// cannot be built.
    pub fn new(config: ScenarioConfig) -> ScenarioResult<Self> {
        config.validate()?;

        let hub = MemoryHub::new();
        let clock = ManualClock::new();

        let legs = (0..config.legs.len())
            .map(|leg| leg_transport(&hub, &config, &clock, leg, 0, &config.server_address))
            .collect();
        let mut server = MultiplexTransport::new(legs);
        let server_log = EventLog::new();
        server.server_start(ServerEvents::new(server_log.clone()))?;

        let mut report = ScenarioReport {
            clients: config.clients,
            reliable_in_order: true,
            ..ScenarioReport::default()
        };

        let mut clients = Vec::with_capacity(config.clients);
        for index in 0..config.clients {
            let label = format!("client-{index}");
            let node = index as u64 + 1;
            let legs = (0..config.legs.len())
                .map(|leg| leg_transport(&hub, &config, &clock, leg, node, &label))
                .collect();
            let mut transport = MultiplexTransport::new(legs);

            let target = &config.legs[index % config.legs.len()];
            let uri: Endpoint = format!("{}://{}", target.scheme, config.server_address).parse()?;
            let log = EventLog::new();
            if let Err(e) = transport.client_connect_uri(&uri, ClientEvents::new(log.clone())) {
                warn!(client = index, %uri, "Connect failed: {e}");
                report.connect_failures += 1;
            }

            clients.push(SimClient {
                transport,
                log,
                connected: false,
                next_seq: 0,
                last_reliable_echo: None,
            });
        }

        info!(
            clients = config.clients,
            legs = config.legs.len(),
            server = %server,
            "Scenario ready"
        );

        Ok(Self {
            tick_duration: Duration::from_secs_f64(1.0 / f64::from(config.tick_rate)),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            clock,
            tick: 0,
            server,
            server_log,
            clients,
            report,
            rtt_total_ms: 0.0,
            rtt_samples: 0,
        })
    }

    /// Runs traffic, lets in-flight messages land, then tears down.
    pub fn run(mut self) -> ScenarioReport {
        for _ in 0..self.config.ticks {
            self.step(true);
        }
        for _ in 0..self.config.settle_ticks() {
            self.step(false);
        }

        for client in &mut self.clients {
            client.transport.client_disconnect();
        }
        self.step(false);
        self.server.server_stop();

        self.report.ticks = self.tick;
        if self.rtt_samples > 0 {
            self.report.mean_rtt_ms = self.rtt_total_ms / self.rtt_samples as f64;
        }
        info!(ticks = self.tick, "Scenario finished");
        self.report
    }

    fn step(&mut self, send: bool) {
        self.clock.advance(self.tick_duration);
        self.tick += 1;

        self.server.server_early_update();
        for client in &mut self.clients {
            client.transport.client_early_update();
        }
        self.handle_server_events();
        self.handle_client_events();

        if send {
            self.send_traffic();
        }

        self.server.server_late_update();
        for client in &mut self.clients {
            client.transport.client_late_update();
        }
    }

    fn handle_server_events(&mut self) {
        for event in self.server_log.drain() {
            match event {
                TransportEvent::Connected(connection) => {
                    debug!(%connection, "Server accepted client");
                    let count = self.server.connection_count();
                    self.report.peak_connections = self.report.peak_connections.max(count);
                }
                TransportEvent::Data {
                    connection,
                    data,
                    channel,
                } => {
                    if channel == ChannelId::RELIABLE {
                        self.report.received_reliable += 1;
                    } else {
                        self.report.received_unreliable += 1;
                    }
                    if let Err(e) = self.server.server_send(connection, &data, channel) {
                        warn!(%connection, "Echo failed: {e}");
                        self.report.send_failures += 1;
                    }
                }
                TransportEvent::Error {
                    connection,
                    kind,
                    reason,
                } => warn!(%connection, ?kind, "Server error: {reason}"),
                TransportEvent::Disconnected(_) => self.report.server_disconnects += 1,
            }
        }
    }

    fn handle_client_events(&mut self) {
        let ms_per_tick = 1000.0 / f64::from(self.config.tick_rate);

        for (index, client) in self.clients.iter_mut().enumerate() {
            for event in client.log.drain() {
                match event {
                    TransportEvent::Connected(_) => {
                        client.connected = true;
                        self.report.connected += 1;
                    }
                    TransportEvent::Data { data, channel, .. } => {
                        let Some((seq, sent_tick)) = parse_header(&data) else {
                            warn!(client = index, len = data.len(), "Malformed echo");
                            continue;
                        };
                        self.rtt_total_ms +=
                            self.tick.saturating_sub(u64::from(sent_tick)) as f64 * ms_per_tick;
                        self.rtt_samples += 1;

                        if channel == ChannelId::RELIABLE {
                            self.report.echoed_reliable += 1;
                            if client.last_reliable_echo.is_some_and(|last| seq <= last) {
                                warn!(client = index, seq, "Reliable echo out of order");
                                self.report.reliable_in_order = false;
                            }
                            client.last_reliable_echo = Some(seq);
                        } else {
                            self.report.echoed_unreliable += 1;
                        }
                    }
                    TransportEvent::Error { kind, reason, .. } => {
                        warn!(client = index, ?kind, "Client error: {reason}");
                    }
                    TransportEvent::Disconnected(_) => client.connected = false,
                }
            }
        }
    }

    fn send_traffic(&mut self) {
        let sent_tick = u32::try_from(self.tick).unwrap_or(u32::MAX);

        for client in &mut self.clients {
            if !client.connected {
                continue;
            }
            for _ in 0..self.config.messages_per_tick {
                let channel = if self.rng.gen_bool(self.config.unreliable_ratio) {
                    ChannelId::UNRELIABLE
                } else {
                    ChannelId::RELIABLE
                };
                let payload = build_payload(client.next_seq, sent_tick, self.config.payload_size);
                client.next_seq = client.next_seq.wrapping_add(1);

                match client.transport.client_send(&payload, channel) {
                    Ok(()) if channel == ChannelId::RELIABLE => self.report.sent_reliable += 1,
                    Ok(()) => self.report.sent_unreliable += 1,
                    Err(e) => {
                        warn!(%channel, "Send failed: {e}");
                        self.report.send_failures += 1;
                    }
                }
            }
        }
    }
}

/// Validates `config`, runs it to completion and returns the report.
///
/// # Errors
///
/// As [`Scenario::new`].
pub fn run_scenario(config: ScenarioConfig) -> ScenarioResult<ScenarioReport> {
    Ok(Scenario::new(config)?.run())
}

fn leg_transport(
    hub: &MemoryHub,
    config: &ScenarioConfig,
    clock: &ManualClock,
    leg: usize,
    node: u64,
    address: &str,
) -> Box<dyn Transport> {
    let settings = &config.legs[leg];
    let mut inner = MemoryTransport::new(hub, settings.scheme.as_str(), address)
        .with_max_packet_size(settings.max_packet_size);
    // Only the client side of a leg can be unsupported.
    if node > 0 {
        inner.set_available(settings.available);
    }
    let latency = settings.latency.clone().with_seed(config.leg_seed(leg, node));
    Box::new(LatencySimulation::with_clock(
        inner,
        latency,
        Arc::new(clock.clone()),
    ))
}

fn build_payload(seq: u32, tick: u32, size: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(size);
    payload.extend_from_slice(&seq.to_le_bytes());
    payload.extend_from_slice(&tick.to_le_bytes());
    payload.resize(size, seq.to_le_bytes()[0]);
    payload
}

fn parse_header(data: &[u8]) -> Option<(u32, u32)> {
    let seq = u32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
    let tick = u32::from_le_bytes(data.get(4..8)?.try_into().ok()?);
    Some((seq, tick))
}

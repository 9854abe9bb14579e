//! # Latency Simulation
//!
//! Decorates one inner [`Transport`] with simulated network conditions.
//!
//! ## Pipeline
//!
//! ```text
//! client_send / server_send
//!        │  latency = base(channel) / 1000 + noise(now * jitter_speed) * jitter
//!        ▼
//! ┌─────────────────────┐  reliable: append
//! │ queue per direction │  unreliable: drop (loss %), else
//! │   × reliability     │              insert at random index (scramble %)
//! └─────────┬───────────┘              or append
//!           │ late update: every message with release_time <= now
//!           ▼
//!     inner transport
//! ```
//!
//! Only outbound sends are delayed. Connection notifications and inbound data
//! reach the outward observer as soon as the inner transport fires them.

mod config;
mod noise;
mod queue;

use std::fmt;
use std::sync::Arc;

use mirage_shared::{
    ChannelId, ChannelKind, ClientEvents, Clock, ConnectionId, Endpoint, ServerEvents,
    SystemClock, Transport, TransportResult,
};
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

pub use config::{LatencyConfig, MAX_LATENCY_MS, MAX_PERCENT};
pub use noise::JitterNoise;
pub use queue::{MessageQueue, QueuedMessage};

use crate::error::{ConfigError, ConfigResult};
use config::clamp_setting;

/// Counters for everything the simulation did to outbound traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatencyStats {
    /// Messages accepted into a queue.
    pub queued: u64,
    /// Unreliable messages dropped by simulated loss.
    pub dropped: u64,
    /// Unreliable messages inserted at a random queue position.
    pub scrambled: u64,
    /// Messages handed to the inner transport.
    pub delivered: u64,
    /// Queued messages thrown away by a disconnect, stop or shutdown.
    pub cleared: u64,
    /// Sends on a channel that is neither reliable nor unreliable.
    pub unknown_channel: u64,
    /// Deliveries the inner transport refused.
    pub failed: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Reliable and unreliable queue of one direction.
#[derive(Debug, Default)]
struct DirectionQueues {
    reliable: MessageQueue,
    unreliable: MessageQueue,
}

impl DirectionQueues {
    fn len(&self) -> usize {
        self.reliable.len() + self.unreliable.len()
    }

    fn clear(&mut self) -> usize {
        self.reliable.clear() + self.unreliable.clear()
    }
}

/// Transport decorator that delays, drops and reorders outbound messages.
///
/// `R` is the random source for loss and scramble draws. It defaults to a
/// seedable [`ChaCha8Rng`]; tests inject their own through
/// [`LatencySimulation::with_rng`].
pub struct LatencySimulation<T: Transport, R: RngCore + Send = ChaCha8Rng> {
    inner: T,
    config: LatencyConfig,
    clock: Arc<dyn Clock>,
    rng: R,
    noise: JitterNoise,
    client: DirectionQueues,
    server: DirectionQueues,
    stats: LatencyStats,
}

impl<T: Transport> LatencySimulation<T> {
    /// Wraps `inner` using the system clock.
    ///
    /// The RNG is seeded from `config.seed`, or from the OS when unset.
    pub fn new(inner: T, config: LatencyConfig) -> Self {
        Self::with_clock(inner, config, Arc::new(SystemClock::new()))
    }

    /// Wraps `inner` using `clock`.
    pub fn with_clock(inner: T, config: LatencyConfig, clock: Arc<dyn Clock>) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let rng = ChaCha8Rng::seed_from_u64(seed);
        Self::with_rng(inner, config, clock, rng)
    }

    /// Starts a builder. `build()` fails unless a transport was wrapped.
    #[must_use]
    pub fn builder() -> LatencySimulationBuilder<T> {
        LatencySimulationBuilder::new()
    }
}

impl<T: Transport, R: RngCore + Send> LatencySimulation<T, R> {
    /// Wraps `inner` with an explicit clock and random source.
    pub fn with_rng(inner: T, config: LatencyConfig, clock: Arc<dyn Clock>, mut rng: R) -> Self {
        let noise = JitterNoise::new(config.seed.unwrap_or_else(|| rng.next_u64()));
        Self {
            inner,
            config,
            clock,
            rng,
            noise,
            client: DirectionQueues::default(),
            server: DirectionQueues::default(),
            stats: LatencyStats::default(),
        }
    }

    /// Delay in seconds a message on `channel` would get right now.
    ///
    /// Unknown channels get the jitter term only.
    pub fn simulate_latency(&self, channel: ChannelId) -> f64 {
        let base_ms = match channel.kind() {
            Some(ChannelKind::Reliable) => self.config.reliable_latency_ms,
            Some(ChannelKind::Unreliable) => self.config.unreliable_latency_ms,
            None => 0.0,
        };
        let t = self.clock.now() * self.config.jitter_speed;
        base_ms / 1000.0 + self.noise.sample(t) * self.config.jitter
    }

    fn simulate_send(
        &mut self,
        direction: Direction,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
        latency: f64,
    ) {
        let release_time = self.clock.now() + latency;
        let queues = match direction {
            Direction::ClientToServer => &mut self.client,
            Direction::ServerToClient => &mut self.server,
        };

        match channel.kind() {
            Some(ChannelKind::Reliable) => {
                // Jitter may shrink the delay between two sends; a later
                // reliable message must still never be due before an
                // earlier one.
                let release_time = queues
                    .reliable
                    .last_release_time()
                    .map_or(release_time, |last| last.max(release_time));
                queues
                    .reliable
                    .push_back(QueuedMessage::new(connection, payload, release_time));
                self.stats.queued += 1;
            }
            Some(ChannelKind::Unreliable) => {
                if self.rng.gen::<f64>() < self.config.unreliable_loss / 100.0 {
                    trace!(?direction, %connection, len = payload.len(), "Simulated loss");
                    self.stats.dropped += 1;
                    return;
                }

                let message = QueuedMessage::new(connection, payload, release_time);
                if self.rng.gen::<f64>() < self.config.unreliable_scramble / 100.0 {
                    let index = self.rng.gen_range(0..=queues.unreliable.len());
                    queues.unreliable.insert(index, message);
                    self.stats.scrambled += 1;
                } else {
                    queues.unreliable.push_back(message);
                }
                self.stats.queued += 1;
            }
            None => {
                warn!(%channel, ?direction, "Unexpected channel, message not queued");
                self.stats.unknown_channel += 1;
            }
        }
    }

    fn flush(&mut self, direction: Direction) {
        let now = self.clock.now();
        let Self {
            inner,
            client,
            server,
            stats,
            ..
        } = self;

        let queues = match direction {
            Direction::ClientToServer => client,
            Direction::ServerToClient => server,
        };

        for (queue, channel) in [
            (&mut queues.reliable, ChannelId::RELIABLE),
            (&mut queues.unreliable, ChannelId::UNRELIABLE),
        ] {
            let delivered = queue.flush_due(now, |message| {
                let result = match direction {
                    Direction::ClientToServer => inner.client_send(&message.bytes, channel),
                    Direction::ServerToClient => {
                        inner.server_send(message.connection, &message.bytes, channel)
                    }
                };
                if let Err(e) = result {
                    warn!(%channel, connection = %message.connection, "Delayed send failed: {e}");
                    stats.failed += 1;
                }
            });
            stats.delivered += delivered as u64;
        }
    }

    fn clear(&mut self, direction: Direction) {
        let cleared = match direction {
            Direction::ClientToServer => self.client.clear(),
            Direction::ServerToClient => self.server.clear(),
        };
        if cleared > 0 {
            debug!(?direction, cleared, "Dropped pending messages");
        }
        self.stats.cleared += cleared as u64;
    }

    /// Current settings.
    pub fn config(&self) -> &LatencyConfig {
        &self.config
    }

    /// Jitter amplitude in seconds, clamped to `0..=1`.
    pub fn set_jitter(&mut self, jitter: f64) {
        self.config.jitter = clamp_setting(jitter, 0.0, 1.0);
    }

    /// Jitter speed, clamped to `>= 0`.
    pub fn set_jitter_speed(&mut self, speed: f64) {
        self.config.jitter_speed = clamp_setting(speed, 0.0, f64::MAX);
    }

    /// Reliable base latency in ms, clamped to `0..=10000`.
    pub fn set_reliable_latency_ms(&mut self, latency_ms: f64) {
        self.config.reliable_latency_ms = clamp_setting(latency_ms, 0.0, MAX_LATENCY_MS);
    }

    /// Unreliable loss percentage, clamped to `0..=100`.
    pub fn set_unreliable_loss(&mut self, percent: f64) {
        self.config.unreliable_loss = clamp_setting(percent, 0.0, MAX_PERCENT);
    }

    /// Unreliable base latency in ms, clamped to `0..=10000`.
    pub fn set_unreliable_latency_ms(&mut self, latency_ms: f64) {
        self.config.unreliable_latency_ms = clamp_setting(latency_ms, 0.0, MAX_LATENCY_MS);
    }

    /// Unreliable scramble percentage, clamped to `0..=100`.
    pub fn set_unreliable_scramble(&mut self, percent: f64) {
        self.config.unreliable_scramble = clamp_setting(percent, 0.0, MAX_PERCENT);
    }

    /// Messages waiting in the client→server queues.
    pub fn pending_client(&self) -> usize {
        self.client.len()
    }

    /// Messages waiting in the server→client queues.
    pub fn pending_server(&self) -> usize {
        self.server.len()
    }

    /// Counters since construction.
    pub fn stats(&self) -> LatencyStats {
        self.stats
    }

    /// The wrapped transport.
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// The wrapped transport, mutably.
    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwraps the decorator. Pending messages are discarded.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport, R: RngCore + Send> Transport for LatencySimulation<T, R> {
    fn available(&self) -> bool {
        self.inner.available()
    }

    fn client_connect(&mut self, address: &str, events: ClientEvents) -> TransportResult<()> {
        self.inner.client_connect(address, events)
    }

    fn client_connect_uri(
        &mut self,
        uri: &Endpoint,
        events: ClientEvents,
    ) -> TransportResult<()> {
        self.inner.client_connect_uri(uri, events)
    }

    fn client_connected(&self) -> bool {
        self.inner.client_connected()
    }

    fn client_disconnect(&mut self) {
        self.inner.client_disconnect();
        self.clear(Direction::ClientToServer);
    }

    fn client_send(&mut self, payload: &[u8], channel: ChannelId) -> TransportResult<()> {
        let latency = self.simulate_latency(channel);
        self.simulate_send(
            Direction::ClientToServer,
            ConnectionId::SERVER,
            payload,
            channel,
            latency,
        );
        Ok(())
    }

    fn client_early_update(&mut self) {
        self.inner.client_early_update();
    }

    fn client_late_update(&mut self) {
        self.flush(Direction::ClientToServer);
        self.inner.client_late_update();
    }

    fn server_uri(&self) -> TransportResult<Endpoint> {
        self.inner.server_uri()
    }

    fn server_active(&self) -> bool {
        self.inner.server_active()
    }

    fn server_start(&mut self, events: ServerEvents) -> TransportResult<()> {
        self.inner.server_start(events)
    }

    fn server_send(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
        channel: ChannelId,
    ) -> TransportResult<()> {
        let latency = self.simulate_latency(channel);
        self.simulate_send(
            Direction::ServerToClient,
            connection,
            payload,
            channel,
            latency,
        );
        Ok(())
    }

    fn server_disconnect(&mut self, connection: ConnectionId) -> TransportResult<()> {
        self.inner.server_disconnect(connection)
    }

    fn server_get_client_address(&self, connection: ConnectionId) -> TransportResult<String> {
        self.inner.server_get_client_address(connection)
    }

    fn server_stop(&mut self) {
        self.inner.server_stop();
        self.clear(Direction::ServerToClient);
    }

    fn server_early_update(&mut self) {
        self.inner.server_early_update();
    }

    fn server_late_update(&mut self) {
        self.flush(Direction::ServerToClient);
        self.inner.server_late_update();
    }

    fn max_packet_size(&self, channel: ChannelId) -> usize {
        self.inner.max_packet_size(channel)
    }

    fn batch_threshold(&self, channel: ChannelId) -> usize {
        self.inner.batch_threshold(channel)
    }

    fn shutdown(&mut self) {
        self.clear(Direction::ClientToServer);
        self.clear(Direction::ServerToClient);
        self.inner.shutdown();
    }
}

impl<T: Transport, R: RngCore + Send> fmt::Display for LatencySimulation<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LatencySimulation({})", self.inner)
    }
}

/// Step-by-step construction of a [`LatencySimulation`].
pub struct LatencySimulationBuilder<T: Transport> {
    inner: Option<T>,
    config: LatencyConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl<T: Transport> LatencySimulationBuilder<T> {
    /// Empty builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: None,
            config: LatencyConfig::default(),
            clock: None,
        }
    }

    /// The transport to decorate. Required.
    #[must_use]
    pub fn wrap(mut self, inner: T) -> Self {
        self.inner = Some(inner);
        self
    }

    /// Replaces all settings.
    #[must_use]
    pub fn config(mut self, config: LatencyConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source. Defaults to [`SystemClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fixes the RNG and noise seed.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Validates the settings and builds the decorator.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingInnerTransport`] if nothing was wrapped,
    /// [`ConfigError::OutOfRange`] for an invalid setting.
    pub fn build(self) -> ConfigResult<LatencySimulation<T>> {
        let inner = self.inner.ok_or(ConfigError::MissingInnerTransport)?;
        self.config.validate()?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        Ok(LatencySimulation::with_clock(inner, self.config, clock))
    }
}

impl<T: Transport> Default for LatencySimulationBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

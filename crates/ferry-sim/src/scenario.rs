//! Scenario description and discrete-event runner.
//!
//! A scenario wires one [`ScriptedClient`] to a ferry [`Dispatcher`] running
//! an echo application, through two independently impaired [`Link`]s. Time
//! is a mock clock that jumps straight to the next event: a packet
//! delivery, a server retransmit deadline or a client deadline.
//!
//! ```text
//!   ScriptedClient ──uplink──▶ Dispatcher (echo)
//!         ▲                         │
//!         └────────downlink─────────┘
//! ```

use anyhow::Context as _;
use bytes::Bytes;
use quanta::{Clock, Mock};
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ferry_transport::{ConnectionStats, Dispatcher, DispatcherStats, Network, TransportConfig};

use crate::client::{ClientConfig, ClientState, ClientStats, ScriptedClient};
use crate::link::{Link, LinkImpairment, LinkStats, Packet};

// ─── Configuration ──────────────────────────────────────────────────────────

/// A complete, reproducible simulation setup. Loadable from TOML:
///
/// ```toml
/// seed = 7
/// payload_bytes = 20000
///
/// [transport]
/// initial_cwnd = 2
///
/// [uplink]
/// loss_percent = 5.0
///
/// [downlink]
/// loss_percent = 5.0
/// duplicate_percent = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub seed: u64,
    /// Bytes the client sends and expects echoed back.
    pub payload_bytes: usize,
    pub client_addr: IpAddr,
    pub server_addr: IpAddr,
    pub server_port: u16,
    /// Simulated time after which the run is abandoned.
    pub max_sim_time_ms: u64,
    /// Event-loop iterations after which the run is abandoned.
    pub max_steps: u64,
    /// Server transport. The default re-ACKs duplicates so a peer whose
    /// final ACK was lost can still learn its data arrived; a `[transport]`
    /// table starts from the library defaults, where that is off.
    pub transport: TransportConfig,
    pub client: ClientConfig,
    /// Client to server.
    pub uplink: LinkImpairment,
    /// Server to client.
    pub downlink: LinkImpairment,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 1,
            payload_bytes: 10_000,
            client_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            server_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            server_port: 7,
            max_sim_time_ms: 600_000,
            max_steps: 1_000_000,
            transport: TransportConfig::default().with_reack_duplicates(true),
            client: ClientConfig::default(),
            uplink: LinkImpairment::default(),
            downlink: LinkImpairment::default(),
        }
    }
}

impl ScenarioConfig {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: ScenarioConfig = toml::from_str(s).context("parsing scenario")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.transport.validate()?;
        self.uplink.validate().context("uplink")?;
        self.downlink.validate().context("downlink")?;
        anyhow::ensure!(self.client.mss > 0, "client mss must be positive");
        anyhow::ensure!(self.client.window > 0, "client window must be positive");
        anyhow::ensure!(self.client.rto_ms > 0, "client rto_ms must be positive");
        anyhow::ensure!(
            self.client.port != self.server_port || self.client_addr != self.server_addr,
            "client and server endpoints must differ"
        );
        Ok(())
    }
}

// ─── Report ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Echo received and the client closed.
    Completed,
    ClientGaveUp,
    /// No pending event remained before completion.
    Stalled,
    TimeLimit,
    StepLimit,
}

/// Server-side connection figures captured before teardown removes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSnapshot {
    pub stats: ConnectionStats,
    pub congestion_window: u32,
    pub smoothed_rtt_ms: Option<f64>,
    pub retransmit_timeout_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub outcome: Outcome,
    pub sim_time_ms: u64,
    pub steps: u64,
    pub payload_bytes: usize,
    pub echoed_bytes: usize,
    /// The echoed stream equals the payload byte for byte.
    pub echo_intact: bool,
    pub client_state: ClientState,
    pub client: ClientStats,
    pub server: DispatcherStats,
    pub connection: Option<ConnectionSnapshot>,
    pub uplink: LinkStats,
    pub downlink: LinkStats,
}

impl ScenarioReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Completed && self.echo_intact
    }
}

// ─── Runner ─────────────────────────────────────────────────────────────────

/// Network handed to the dispatcher: outbound segments wait here until the
/// runner moves them onto the downlink.
#[derive(Debug, Default)]
pub struct SegmentQueue {
    queued: Vec<(Bytes, IpAddr)>,
}

impl SegmentQueue {
    pub fn drain(&mut self) -> std::vec::Drain<'_, (Bytes, IpAddr)> {
        self.queued.drain(..)
    }
}

impl Network for SegmentQueue {
    fn send(&mut self, segment: Bytes, dst: IpAddr) {
        self.queued.push((segment, dst));
    }
}

pub struct Simulation {
    config: ScenarioConfig,
    clock: Clock,
    mock: Arc<Mock>,
    server: Dispatcher<SegmentQueue>,
    client: ScriptedClient,
    uplink: Link,
    downlink: Link,
    payload: Bytes,
    snapshot: Option<ConnectionSnapshot>,
}

impl Simulation {
    pub fn new(config: ScenarioConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let (clock, mock) = Clock::mock();

        let mut seeder = StdRng::seed_from_u64(config.seed);
        let uplink = Link::new(config.uplink.clone(), seeder.random());
        let downlink = Link::new(config.downlink.clone(), seeder.random());
        let payload: Bytes = (0..config.payload_bytes)
            .map(|_| seeder.random::<u8>())
            .collect::<Vec<u8>>()
            .into();

        let mut server = Dispatcher::with_clock(
            config.server_port,
            SegmentQueue::default(),
            config.transport.clone(),
            clock.clone(),
        )?;
        server.register_accept_callback(|conn| {
            tracing::info!(conn = %conn.id(), "accepted");
            conn.register_receive_callback(|conn, data| {
                if data.is_empty() {
                    return;
                }
                if let Err(e) = conn.send(data) {
                    tracing::debug!(conn = %conn.id(), error = %e, "echo rejected");
                }
            });
        });

        let client = ScriptedClient::new(
            config.client.clone(),
            config.client_addr,
            config.server_addr,
            config.server_port,
            payload.clone(),
            payload.len(),
        );

        Ok(Simulation {
            config,
            clock,
            mock,
            server,
            client,
            uplink,
            downlink,
            payload,
            snapshot: None,
        })
    }

    /// Run to completion or until a limit is hit.
    pub fn run(mut self) -> ScenarioReport {
        let start = self.clock.now();
        let time_limit = start + Duration::from_millis(self.config.max_sim_time_ms);
        let mut steps = 0;

        self.client.start(start);
        let outcome = loop {
            let now = self.clock.now();
            self.step(now);

            if self.client.is_finished() {
                break match self.client.state() {
                    ClientState::GaveUp => Outcome::ClientGaveUp,
                    _ => Outcome::Completed,
                };
            }

            let next = [
                self.uplink.next_delivery(),
                self.downlink.next_delivery(),
                self.server.poll_timeout(),
                self.client.deadline(),
            ]
            .into_iter()
            .flatten()
            .min();
            let Some(next) = next else {
                break Outcome::Stalled;
            };
            if next > time_limit {
                break Outcome::TimeLimit;
            }
            steps += 1;
            if steps >= self.config.max_steps {
                break Outcome::StepLimit;
            }
            if next > now {
                self.mock.increment(next.saturating_duration_since(now));
            }
        };

        let sim_time = self.clock.now().saturating_duration_since(start);
        tracing::info!(
            seed = self.config.seed,
            ?outcome,
            sim_time_ms = sim_time.as_millis() as u64,
            steps,
            "scenario finished"
        );

        ScenarioReport {
            seed: self.config.seed,
            outcome,
            sim_time_ms: sim_time.as_millis() as u64,
            steps,
            payload_bytes: self.payload.len(),
            echoed_bytes: self.client.received().len(),
            echo_intact: self.client.received() == &self.payload[..],
            client_state: self.client.state(),
            client: self.client.stats().clone(),
            server: self.server.stats().clone(),
            connection: self.snapshot,
            uplink: self.uplink.stats().clone(),
            downlink: self.downlink.stats().clone(),
        }
    }

    /// Process every event due at `now` and move emitted packets onto links.
    fn step(&mut self, now: quanta::Instant) {
        while let Some(packet) = self.uplink.pop_due(now) {
            self.server
                .handle_inbound_segment(packet.src, packet.dst, packet.data);
        }
        while let Some(packet) = self.downlink.pop_due(now) {
            self.client.on_packet(now, packet);
        }
        self.server.handle_timeouts();
        self.client.handle_timeout(now);

        if let Some(conn) = self.server.connections().iter().next() {
            self.snapshot = Some(ConnectionSnapshot {
                stats: conn.stats().clone(),
                congestion_window: conn.congestion_window(),
                smoothed_rtt_ms: conn.rtt().smoothed_rtt().map(|d| d.as_secs_f64() * 1e3),
                retransmit_timeout_ms: conn.rtt().retransmit_timeout().as_secs_f64() * 1e3,
            });
        }

        let server_addr = self.config.server_addr;
        for (data, dst) in self.server.network_mut().drain() {
            self.downlink.push(
                now,
                Packet {
                    src: server_addr,
                    dst,
                    data,
                },
            );
        }
        for packet in self.client.drain_outbox() {
            self.uplink.push(now, packet);
        }
    }
}

/// Build and run a scenario.
pub fn run_scenario(config: ScenarioConfig) -> anyhow::Result<ScenarioReport> {
    Ok(Simulation::new(config)?.run())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_completes() {
        let report = run_scenario(ScenarioConfig::default()).unwrap();
        assert_eq!(report.outcome, Outcome::Completed);
        assert!(report.echo_intact);
        assert_eq!(report.server.connections_accepted, 1);
        assert_eq!(report.server.connections_closed, 1);
    }

    #[test]
    fn toml_overrides_nested_sections() {
        let config = ScenarioConfig::from_toml_str(
            r#"
            seed = 99
            payload_bytes = 123

            [transport]
            initial_cwnd = 3

            [downlink]
            loss_percent = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(config.seed, 99);
        assert_eq!(config.payload_bytes, 123);
        assert_eq!(config.transport.initial_cwnd, 3);
        assert_eq!(config.downlink.loss_percent, 12.5);
        assert_eq!(config.uplink, LinkImpairment::default());
    }

    #[test]
    fn default_server_reacks_duplicates() {
        assert!(ScenarioConfig::default().transport.reack_duplicates);
        let config = ScenarioConfig::from_toml_str("[transport]\nmss = 500").unwrap();
        assert!(!config.transport.reack_duplicates);
    }

    #[test]
    fn invalid_scenarios_are_rejected() {
        assert!(ScenarioConfig::from_toml_str("unknown = 1").is_err());
        assert!(ScenarioConfig::from_toml_str("[uplink]\nloss_percent = 101.0").is_err());
        assert!(ScenarioConfig::from_toml_str("[transport]\nmss = 0").is_err());
    }

    #[test]
    fn empty_payload_still_handshakes_and_closes() {
        let config = ScenarioConfig {
            payload_bytes: 0,
            ..Default::default()
        };
        let report = run_scenario(config).unwrap();
        assert!(report.succeeded());
        assert_eq!(report.echoed_bytes, 0);
    }
}

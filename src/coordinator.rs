use crate::prelude::*;
use crate::datalog_writer::DatalogWriter;
use crate::error::Error;
use crate::snapshot::TelemetryStore;
use crate::solax::link::DeviceLink;
use crate::solax::port::Connector;
use crate::solax::telemetry::{self, UnitTelemetry};

use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub snapshots_published: u64,
    pub discovery_failures: u64,
    pub reconnects: u64,
    pub link_errors: u64,
    pub malformed_frames: u64,
    pub units_last_cycle: usize,
}

impl PollStats {
    pub fn print_summary(&self) {
        info!("Poll Statistics:");
        info!("  Cycles: {}", self.cycles);
        info!("  Snapshots published: {}", self.snapshots_published);
        info!("  Units in last cycle: {}", self.units_last_cycle);
        info!("  Link:");
        info!("    Connections established: {}", self.reconnects);
        info!("    Discovery failures: {}", self.discovery_failures);
        info!("    Link errors: {}", self.link_errors);
        info!("  Malformed frames: {}", self.malformed_frames);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Wait before retrying after discovery found no device.
    pub reconnect_cooldown: Duration,
    /// Wait between connecting and the first query of a cycle.
    pub settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            reconnect_cooldown: Duration::from_secs(10),
            settle: Duration::from_millis(100),
        }
    }
}

impl From<&config::Poller> for Timings {
    fn from(poller: &config::Poller) -> Self {
        Self {
            reconnect_cooldown: Duration::from_secs(poller.reconnect_cooldown_secs()),
            settle: Duration::from_millis(poller.settle_ms()),
        }
    }
}

/// What one pass of [`Coordinator::poll_once`] ended with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycle {
    /// Discovery failed; the cooldown has already been waited out.
    NoDevice,
    /// A new snapshot with this many units was published.
    Published(usize),
    /// The cycle failed part way; the link was dropped and the previous
    /// snapshot stays current.
    Aborted,
}

/// Polls the bank over a [`DeviceLink`] and publishes snapshots. Runs on a
/// dedicated thread, all I/O is blocking.
pub struct Coordinator<C: Connector> {
    link: DeviceLink<C>,
    store: TelemetryStore,
    timings: Timings,
    datalog_writer: Option<DatalogWriter>,
    pub stats: Arc<Mutex<PollStats>>,
}

impl<C: Connector> Coordinator<C> {
    pub fn new(link: DeviceLink<C>, store: TelemetryStore, timings: Timings) -> Self {
        Self {
            link,
            store,
            timings,
            datalog_writer: None,
            stats: Arc::new(Mutex::new(PollStats::default())),
        }
    }

    pub fn with_datalog_writer(mut self, writer: DatalogWriter) -> Self {
        self.datalog_writer = Some(writer);
        self
    }

    pub fn link(&self) -> &DeviceLink<C> {
        &self.link
    }

    pub fn run(&mut self) {
        info!("poller starting");
        loop {
            self.poll_once();
        }
    }

    pub fn poll_once(&mut self) -> Cycle {
        self.update_stats(|stats| stats.cycles += 1);

        if !self.link.is_connected() {
            info!("Connecting to SOLAX serial adapter");
            if let Err(e) = self.link.connect() {
                error!("{}", e);
                self.update_stats(|stats| stats.discovery_failures += 1);
                info!("retrying discovery in {}s", self.timings.reconnect_cooldown.as_secs());
                std::thread::sleep(self.timings.reconnect_cooldown);
                return Cycle::NoDevice;
            }
            self.update_stats(|stats| stats.reconnects += 1);
        }

        std::thread::sleep(self.timings.settle);

        let units = match self.read_units() {
            Ok(units) => units,
            Err(e) => {
                error!("{}", e);
                self.update_stats(|stats| {
                    if e.is_link_error() {
                        stats.link_errors += 1;
                    } else {
                        stats.malformed_frames += 1;
                    }
                });
                self.link.disconnect();
                return Cycle::Aborted;
            }
        };

        let aggregated = telemetry::aggregate(&units);
        let count = units.len();
        debug!(
            "Machines: {}, Solar: {:.1} W, AC: {:.1} W, Battery: {:.1} W",
            count, aggregated.solar_power, aggregated.ac_power, aggregated.battery_power
        );

        let snapshot = self.store.publish(aggregated, units);
        self.update_stats(|stats| {
            stats.snapshots_published += 1;
            stats.units_last_cycle = count;
        });

        if let Some(writer) = &self.datalog_writer {
            if let Err(e) = writer.write_snapshot(&snapshot) {
                warn!("datalog write failed: {}", e);
            }
        }

        Cycle::Published(count)
    }

    /// Queries unit 1, 2, ... until one reports position 0 or the 8-bit
    /// index runs out. The terminating record is not returned.
    fn read_units(&mut self) -> Result<Vec<UnitTelemetry>, Error> {
        let mut units = Vec::new();

        for index in 1..=u8::MAX {
            let payload = self.link.query(index)?;
            let unit = telemetry::parse(&payload)?;

            if unit.is_bank_terminator() {
                trace!("unit {} reported end of bank", index);
                break;
            }

            units.push(unit);
        }

        Ok(units)
    }

    fn update_stats(&self, f: impl FnOnce(&mut PollStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }
}

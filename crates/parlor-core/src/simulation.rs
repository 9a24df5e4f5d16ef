//! Synthetic measurement source.
//!
//! Generates a population of occupants, one per slot, each with its own
//! target volume, flow rate and start delay, and drives them through the
//! engine as push events. Given the same seed the whole session replays
//! identically.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Engine;
use crate::event::MeasurementEvent;
use crate::notify::TickReport;
use crate::slot::SlotStatus;
use crate::types::{ConfigError, EntityId, RunId};

/// Names and breeds handed out to synthetic occupants.
pub const MOCK_ANIMALS: [(&str, &str); 20] = [
    ("Daisy", "Holstein"),
    ("Bella", "Jersey"),
    ("Molly", "Brown Swiss"),
    ("Luna", "Holstein"),
    ("Rosie", "Guernsey"),
    ("Chloe", "Holstein"),
    ("Milka", "Montbeliarde"),
    ("Lola", "Jersey"),
    ("Sophie", "Holstein"),
    ("Ruby", "Ayrshire"),
    ("Lily", "Holstein"),
    ("Zoe", "Brown Swiss"),
    ("Mia", "Jersey"),
    ("Emma", "Holstein"),
    ("Nala", "Guernsey"),
    ("Stella", "Holstein"),
    ("Grace", "Montbeliarde"),
    ("Hazel", "Jersey"),
    ("Ivy", "Holstein"),
    ("Willow", "Brown Swiss"),
];

/// Inclusive floating point range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    fn check(self, field: &'static str) -> Result<(), ConfigError> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min > self.max {
            return Err(ConfigError::InvalidRange {
                field,
                min: self.min,
                max: self.max,
            });
        }
        if self.min <= 0.0 {
            return Err(ConfigError::NotPositive {
                field,
                value: self.min,
            });
        }
        Ok(())
    }

    fn sample<R: Rng>(self, rng: &mut R) -> f64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Inclusive range of whole ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickBounds {
    pub min: u32,
    pub max: u32,
}

impl TickBounds {
    fn sample<R: Rng>(self, rng: &mut R) -> u32 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Knobs for the synthetic population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Volume added per tick while a run is open.
    pub flow_rate: Bounds,
    /// Volume at which a run stops on its own.
    pub target_units: Bounds,
    /// Ticks an occupant waits before its run starts.
    pub start_delay_ticks: TickBounds,
    /// Hard stop for a run regardless of volume.
    pub max_duration_secs: u64,
    /// Simulated seconds per tick.
    pub tick_secs: u64,
    /// How long every slot must sit Finished before the next group arrives.
    pub group_change_delay_secs: u64,
    pub auto_group_change: bool,
    /// Fixed seed for reproducible sessions. Random when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            flow_rate: Bounds::new(0.3, 0.6),
            target_units: Bounds::new(10.0, 30.0),
            start_delay_ticks: TickBounds { min: 0, max: 5 },
            max_duration_secs: 120,
            tick_secs: 1,
            group_change_delay_secs: 3,
            auto_group_change: true,
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.flow_rate.check("flow_rate")?;
        self.target_units.check("target_units")?;
        if self.start_delay_ticks.min > self.start_delay_ticks.max {
            return Err(ConfigError::InvalidRange {
                field: "start_delay_ticks",
                min: f64::from(self.start_delay_ticks.min),
                max: f64::from(self.start_delay_ticks.max),
            });
        }
        for (field, value) in [
            ("tick_secs", self.tick_secs),
            ("max_duration_secs", self.max_duration_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::NotPositive { field, value: 0.0 });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Waiting {
        delay_ticks: u32,
    },
    Running {
        run_id: RunId,
        entity_id: EntityId,
        units: f64,
        elapsed_seconds: u64,
    },
    Done,
}

#[derive(Debug, Clone)]
struct SimOccupant {
    target_units: f64,
    flow_rate: f64,
    phase: Phase,
}

/// Drives a synthetic population through an [`Engine`].
#[derive(Debug)]
pub struct Simulator<R> {
    config: SimulationConfig,
    rng: R,
    /// Indexed like the slot table.
    occupants: Vec<SimOccupant>,
    next_run: u64,
    settled_secs: u64,
}

impl<R: Rng> Simulator<R> {
    pub fn new(config: SimulationConfig, rng: R) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng,
            occupants: Vec::new(),
            next_run: 1,
            settled_secs: 0,
        })
    }

    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Advances every occupant by one tick and feeds the result to `engine`.
    ///
    /// Observers are notified once, after all of the tick's events applied.
    pub fn tick(&mut self, engine: &mut Engine, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.sync_population(engine.total_slots());

        if self.all_done() {
            self.settled_secs += self.config.tick_secs;
            if self.config.auto_group_change
                && self.settled_secs >= self.config.group_change_delay_secs
            {
                report.merge(engine.begin_group(now));
                self.occupants.clear();
                self.settled_secs = 0;
                self.sync_population(engine.total_slots());
            }
            engine.notify(&report);
            return report;
        }

        for event in self.advance(engine.current_group(), now) {
            report.merge(engine.apply_quiet(event, now, SlotStatus::Finished));
        }
        engine.notify(&report);
        report
    }

    fn all_done(&self) -> bool {
        !self.occupants.is_empty()
            && self
                .occupants
                .iter()
                .all(|occupant| occupant.phase == Phase::Done)
    }

    /// Keeps one occupant per slot across resizes.
    fn sync_population(&mut self, total_slots: u32) {
        let total = total_slots as usize;
        if self.occupants.len() > total {
            self.occupants.truncate(total);
        }
        while self.occupants.len() < total {
            let occupant = SimOccupant {
                target_units: self.config.target_units.sample(&mut self.rng),
                flow_rate: self.config.flow_rate.sample(&mut self.rng),
                phase: Phase::Waiting {
                    delay_ticks: self.config.start_delay_ticks.sample(&mut self.rng),
                },
            };
            self.occupants.push(occupant);
        }
    }

    fn advance(&mut self, group: u32, now: DateTime<Utc>) -> Vec<MeasurementEvent> {
        let total = self.occupants.len() as u64;
        let mut events = Vec::new();

        for (index, occupant) in self.occupants.iter_mut().enumerate() {
            let mut next = None;
            match &mut occupant.phase {
                Phase::Waiting { delay_ticks } if *delay_ticks > 0 => *delay_ticks -= 1,
                Phase::Waiting { .. } => {
                    // Offset by group so every group brings new entities that
                    // still resolve to this slot.
                    let slot = index as u64 + 1;
                    let entity_id = EntityId::new(slot + total * u64::from(group.saturating_sub(1)));
                    let run_id = RunId::new(self.next_run);
                    self.next_run += 1;

                    let (name, breed) = mock_animal(entity_id);
                    debug!(slot, run = %run_id, entity = %entity_id, "simulated arrival");
                    events.push(MeasurementEvent::Start {
                        run_id,
                        entity_id,
                        tag: format!("TR{:03}", entity_id.get()),
                        secondary_id: Some(name.to_string()),
                        breed: Some(breed.to_string()),
                        started_at: now,
                    });
                    next = Some(Phase::Running {
                        run_id,
                        entity_id,
                        units: 0.0,
                        elapsed_seconds: 0,
                    });
                }
                Phase::Running {
                    run_id,
                    entity_id,
                    units,
                    elapsed_seconds,
                } => {
                    *units = (*units + occupant.flow_rate).min(occupant.target_units);
                    *elapsed_seconds += self.config.tick_secs;

                    if *units >= occupant.target_units
                        || *elapsed_seconds >= self.config.max_duration_secs
                    {
                        events.push(MeasurementEvent::Stop {
                            run_id: *run_id,
                            entity_id: *entity_id,
                            total_units: round_units(*units),
                            total_seconds: *elapsed_seconds,
                        });
                        next = Some(Phase::Done);
                    } else {
                        events.push(MeasurementEvent::Update {
                            run_id: *run_id,
                            entity_id: *entity_id,
                            cumulative_units: round_units(*units),
                            elapsed_seconds: *elapsed_seconds,
                        });
                    }
                }
                Phase::Done => {}
            }
            if let Some(phase) = next {
                occupant.phase = phase;
            }
        }
        events
    }
}

fn mock_animal(entity: EntityId) -> (&'static str, &'static str) {
    let index = (entity.get().saturating_sub(1) % MOCK_ANIMALS.len() as u64) as usize;
    MOCK_ANIMALS[index]
}

fn round_units(units: f64) -> f64 {
    (units * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use crate::layout::{Layout, SideSplit};
    use crate::notify::Transition;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 6, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    fn engine(total: u32) -> Engine {
        Engine::new(Layout::new(total, 40, SideSplit::Balanced).unwrap(), ts(0))
    }

    /// Every occupant starts immediately and gains one unit per tick.
    fn fixed_config(target: f64) -> SimulationConfig {
        SimulationConfig {
            flow_rate: Bounds::new(1.0, 1.0),
            target_units: Bounds::new(target, target),
            start_delay_ticks: TickBounds { min: 0, max: 0 },
            ..SimulationConfig::default()
        }
    }

    fn run_ticks(
        simulator: &mut Simulator<StdRng>,
        engine: &mut Engine,
        ticks: std::ops::RangeInclusive<i64>,
    ) -> TickReport {
        let mut report = TickReport::default();
        for tick in ticks {
            report.merge(simulator.tick(engine, ts(tick)));
        }
        report
    }

    #[test]
    fn same_seed_replays_identically() {
        let play = || {
            let mut engine = engine(10);
            let mut simulator =
                Simulator::new(SimulationConfig::default(), StdRng::seed_from_u64(7)).unwrap();
            run_ticks(&mut simulator, &mut engine, 1..=40);
            engine.snapshot()
        };
        assert_eq!(play(), play());
    }

    #[test]
    fn occupants_run_to_target_then_finish() {
        let mut engine = engine(4);
        let mut simulator = Simulator::new(fixed_config(3.0), StdRng::seed_from_u64(1)).unwrap();

        let first = simulator.tick(&mut engine, ts(1));
        assert_eq!(first.started(), 4);
        assert_eq!(engine.stats().occupied_count, 4);

        let report = run_ticks(&mut simulator, &mut engine, 2..=4);
        assert_eq!(report.finished(), 4);

        let stats = engine.stats();
        assert_eq!(stats.finished_count, 4);
        assert_eq!(stats.average_elapsed_seconds, 3);
        assert!((stats.total_units - 12.0).abs() < f64::EPSILON);
        for slot in engine.slots() {
            assert_eq!(slot.status, SlotStatus::Finished);
            let occupant = slot.occupant.as_ref().unwrap();
            assert_eq!(occupant.tag, format!("TR{:03}", slot.id.get()));
            assert!(occupant.breed.is_some());
        }
    }

    #[test]
    fn max_duration_stops_a_slow_run() {
        let mut engine = engine(1);
        let config = SimulationConfig {
            max_duration_secs: 2,
            ..fixed_config(100.0)
        };
        let mut simulator = Simulator::new(config, StdRng::seed_from_u64(1)).unwrap();

        let report = run_ticks(&mut simulator, &mut engine, 1..=3);
        assert_eq!(report.finished(), 1);
        assert_eq!(engine.completed_seconds(), &[2]);
        assert!((engine.slots()[0].accumulated_units - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn group_changes_after_settle_delay() {
        let mut engine = engine(4);
        let mut simulator = Simulator::new(fixed_config(3.0), StdRng::seed_from_u64(3)).unwrap();
        run_ticks(&mut simulator, &mut engine, 1..=4);

        let settling = run_ticks(&mut simulator, &mut engine, 5..=6);
        assert!(settling.transitions.is_empty());
        assert_eq!(engine.stats().current_group, 1);

        let change = simulator.tick(&mut engine, ts(7));
        assert!(matches!(
            change.transitions.as_slice(),
            [Transition::GroupStarted { group: 2, .. }]
        ));
        assert!(engine.slots().iter().all(|slot| slot.status == SlotStatus::Idle));
        assert_eq!(engine.stats().finished_count, 4);

        simulator.tick(&mut engine, ts(8));
        let slot = &engine.slots()[0];
        assert_eq!(slot.status, SlotStatus::Occupied);
        assert_eq!(slot.occupant.as_ref().unwrap().entity_id, EntityId::new(5));
    }

    #[test]
    fn without_auto_group_change_slots_stay_finished() {
        let mut engine = engine(2);
        let config = SimulationConfig {
            auto_group_change: false,
            ..fixed_config(1.0)
        };
        let mut simulator = Simulator::new(config, StdRng::seed_from_u64(3)).unwrap();
        let report = run_ticks(&mut simulator, &mut engine, 1..=20);

        assert_eq!(report.finished(), 2);
        assert_eq!(engine.stats().current_group, 1);
        assert!(engine.slots().iter().all(|slot| slot.status == SlotStatus::Finished));
    }

    #[test]
    fn new_slots_get_occupants_after_resize() {
        let mut engine = engine(2);
        let mut simulator = Simulator::new(fixed_config(50.0), StdRng::seed_from_u64(9)).unwrap();
        simulator.tick(&mut engine, ts(1));

        engine.add_slots(2, ts(2)).unwrap();
        let report = simulator.tick(&mut engine, ts(2));
        assert_eq!(report.started(), 2);
        assert_eq!(engine.stats().occupied_count, 4);

        engine.remove_slots(3, ts(3)).unwrap();
        let report = simulator.tick(&mut engine, ts(3));
        assert_eq!(report.dropped, 0);
        assert_eq!(engine.stats().occupied_count, 1);
    }

    #[test]
    fn config_validation() {
        assert!(SimulationConfig::default().validate().is_ok());

        let inverted = SimulationConfig {
            flow_rate: Bounds::new(0.6, 0.3),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidRange {
                field: "flow_rate",
                ..
            })
        ));

        let zero_target = SimulationConfig {
            target_units: Bounds::new(0.0, 10.0),
            ..SimulationConfig::default()
        };
        assert!(matches!(
            zero_target.validate(),
            Err(ConfigError::NotPositive { .. })
        ));

        let zero_tick = SimulationConfig {
            tick_secs: 0,
            ..SimulationConfig::default()
        };
        assert!(Simulator::new(zero_tick, StdRng::seed_from_u64(0)).is_err());
    }
}

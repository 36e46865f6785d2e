//! Derived per-connection state spliced into outgoing snapshots.
//!
//! An [`Enricher`] belongs to exactly one connector and is reset on every
//! reconnect. It keeps:
//!
//! * the best-sectors table (minimum positive sector times per driver),
//! * the best lap per driver and its lap number,
//! * the top speed per driver and lap,
//! * the last seen `(session, number_of_vehicles)` pair for first-driver
//!   detection.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use livetiming_types::{
    CarPosition, CarPositions, DriverStanding, FirstDriverEntered, LapRecord, SECTOR_UNKNOWN,
    SessionInfo, Standings, StandingsHistory, short_code,
};

/// Server name the upstream reports when none is configured.
const UNNAMED_SERVER: &str = "-none-";

const MPS_TO_KMH: f64 = 3.6;

/// Sector times of one lap. Non-positive inputs yield [`SECTOR_UNKNOWN`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LapSectors {
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

impl LapSectors {
    /// Split a lap into its three sectors.
    ///
    /// Upstream reports sector 2 as the cumulative time at the end of
    /// sector 2, so `S2 = raw_S2 − S1` and `S3 = LapTime − raw_S2`.
    pub fn of(lap: &LapRecord) -> Self {
        let s1 = positive_or_unknown(lap.sector_time1);
        let s2 = if lap.sector_time1 > 0.0 && lap.sector_time2 > 0.0 {
            positive_or_unknown(lap.sector_time2 - lap.sector_time1)
        } else {
            SECTOR_UNKNOWN
        };
        let s3 = if lap.lap_time > 0.0 && lap.sector_time2 > 0.0 {
            positive_or_unknown(lap.lap_time - lap.sector_time2)
        } else {
            SECTOR_UNKNOWN
        };
        Self { s1, s2, s3 }
    }
}

/// Best observed sector times of one driver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestSectors {
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

impl Default for BestSectors {
    fn default() -> Self {
        Self {
            s1: SECTOR_UNKNOWN,
            s2: SECTOR_UNKNOWN,
            s3: SECTOR_UNKNOWN,
        }
    }
}

impl BestSectors {
    /// Fold one lap in, keeping the minimum positive value per sector.
    pub fn fold(&mut self, lap: LapSectors) {
        self.s1 = min_positive(self.s1, lap.s1);
        self.s2 = min_positive(self.s2, lap.s2);
        self.s3 = min_positive(self.s3, lap.s3);
    }
}

fn positive_or_unknown(v: f64) -> f64 {
    if v > 0.0 { v } else { SECTOR_UNKNOWN }
}

fn min_positive(current: f64, candidate: f64) -> f64 {
    if candidate > 0.0 && (current <= 0.0 || candidate < current) {
        candidate
    } else {
        current
    }
}

/// Position used for ordering; `0` means "not classified" and sorts last.
fn sort_position(position: u32) -> u32 {
    if position == 0 { u32::MAX } else { position }
}

#[derive(Debug, Clone, Copy)]
struct BestLap {
    time: f64,
    lap: u32,
}

/// Rising-edge detector over `(session, number_of_vehicles)`.
#[derive(Debug, Default)]
struct SessionEdge {
    last: Option<(String, i64)>,
}

impl SessionEdge {
    /// Record an observation and report whether it is a rising edge.
    ///
    /// After a reset the baseline is the zero snapshot published on connect,
    /// i.e. no vehicles, so a first frame with drivers already present fires.
    fn observe(&mut self, session: &str, vehicles: i64) -> bool {
        let fired = match &self.last {
            Some((last_session, last_vehicles)) => {
                vehicles > 0 && (*last_vehicles == 0 || last_session != session)
            }
            None => vehicles > 0,
        };
        self.last = Some((session.to_string(), vehicles));
        fired
    }
}

/// Per-connection enrichment state.
#[derive(Debug)]
pub struct Enricher {
    server_id: String,
    server_name: String,
    best_sectors: HashMap<String, BestSectors>,
    best_laps: HashMap<String, BestLap>,
    top_speeds: HashMap<String, BTreeMap<u32, f64>>,
    session_edge: SessionEdge,
}

impl Enricher {
    /// Empty state for server `server_id`, named after its id.
    pub fn new(server_id: impl Into<String>) -> Self {
        let server_id = server_id.into();
        Self {
            server_name: server_id.clone(),
            server_id,
            best_sectors: HashMap::new(),
            best_laps: HashMap::new(),
            top_speeds: HashMap::new(),
            session_edge: SessionEdge::default(),
        }
    }

    /// Forget everything learned on the previous connection. The last known
    /// server name survives.
    pub fn reset(&mut self) {
        self.best_sectors.clear();
        self.best_laps.clear();
        self.top_speeds.clear();
        self.session_edge = SessionEdge::default();
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// The last name the upstream reported, or the server id.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Best sectors of `driver` seen since the last reset.
    pub fn best_sectors(&self, driver: &str) -> Option<BestSectors> {
        self.best_sectors.get(driver).copied()
    }

    /// Enrich a standings frame.
    ///
    /// Sorts by position, records top speeds, splices in the best sectors
    /// and best lap, and derives the car positions with the leader last.
    pub fn apply_standings(&mut self, mut drivers: Vec<DriverStanding>) -> (Standings, CarPositions) {
        drivers.sort_by_key(|d| sort_position(d.position));

        for driver in &mut drivers {
            if let Some(velocity) = driver.car_velocity {
                let kmh = velocity.velocity.abs() * MPS_TO_KMH;
                let lap = driver.laps_completed + 1;
                let speeds = self.top_speeds.entry(driver.driver_name.clone()).or_default();
                let best = speeds.entry(lap).or_insert(kmh);
                if kmh > *best {
                    *best = kmh;
                }
            }

            let best = self.best_sectors(&driver.driver_name).unwrap_or_default();
            driver.best_sector_1 = best.s1;
            driver.best_sector_2 = best.s2;
            driver.best_sector_3 = best.s3;
            driver.best_lap_index = self.best_laps.get(&driver.driver_name).map(|b| b.lap);
            driver.top_speed_per_lap = self
                .top_speeds
                .get(&driver.driver_name)
                .cloned()
                .unwrap_or_default();
        }

        let cars = drivers
            .iter()
            .rev()
            .map(|d| CarPosition {
                driver: short_code(&d.driver_name),
                x: d.car_position.x,
                y: d.car_position.y,
                z: d.car_position.z,
            })
            .collect();

        let standings = Standings {
            server_id: self.server_id.clone(),
            server_name: self.server_name.clone(),
            drivers,
        };
        let positions = CarPositions {
            server_id: self.server_id.clone(),
            cars,
        };
        (standings, positions)
    }

    /// Enrich a standings-history frame.
    ///
    /// Updates the best-sectors and best-lap tables and returns the history
    /// keyed by driver name, with each lap's top speed and car id filled in.
    pub fn apply_history(&mut self, groups: BTreeMap<String, Vec<LapRecord>>) -> StandingsHistory {
        let mut order: Vec<(String, u32)> = Vec::new();
        let mut drivers_data: BTreeMap<String, Vec<LapRecord>> = BTreeMap::new();

        for (slot_key, laps) in groups {
            let (Some(first), Some(last)) = (laps.first(), laps.last()) else {
                continue;
            };
            let name = first.driver_name.clone();
            let position = sort_position(last.position);

            match order.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = entry.1.min(position),
                None => order.push((name.clone(), position)),
            }

            let best = self.best_sectors.entry(name.clone()).or_default();
            for lap in &laps {
                best.fold(LapSectors::of(lap));
            }

            for lap in &laps {
                if lap.lap_time <= 0.0 {
                    continue;
                }
                let improved = self
                    .best_laps
                    .get(&name)
                    .is_none_or(|b| lap.lap_time < b.time);
                if improved {
                    self.best_laps.insert(
                        name.clone(),
                        BestLap {
                            time: lap.lap_time,
                            lap: lap.total_laps,
                        },
                    );
                }
            }

            let speeds = self.top_speeds.get(&name);
            let enriched = laps.into_iter().map(|mut lap| {
                lap.top_speed = speeds
                    .and_then(|s| s.get(&lap.total_laps))
                    .copied()
                    .unwrap_or(0.0);
                lap.car_id = slot_key.clone();
                lap
            });
            drivers_data.entry(name).or_default().extend(enriched);
        }

        order.sort_by_key(|(_, position)| *position);

        StandingsHistory {
            server_id: self.server_id.clone(),
            driver_names: order.into_iter().map(|(name, _)| name).collect(),
            drivers_data,
        }
    }

    /// Stamp a session-info frame with identity and liveness and run
    /// first-driver detection on it.
    pub fn apply_session_info(
        &mut self,
        mut info: SessionInfo,
        websocket_running: bool,
        receiving_data: bool,
    ) -> (SessionInfo, Option<FirstDriverEntered>) {
        if info.server_name.is_empty() || info.server_name == UNNAMED_SERVER {
            info.server_name = self.server_id.clone();
        }
        self.server_name = info.server_name.clone();
        info.server_id = self.server_id.clone();
        info.websocket_running = websocket_running;
        info.receiving_data = receiving_data;

        let entered = self
            .session_edge
            .observe(&info.session, info.number_of_vehicles)
            .then(|| FirstDriverEntered {
                server_id: info.server_id.clone(),
                server_name: info.server_name.clone(),
                session_type: info.session.clone(),
                track_name: info.track_name.clone(),
                event_time: info.current_event_time,
                observed_at: Utc::now(),
            });

        (info, entered)
    }
}

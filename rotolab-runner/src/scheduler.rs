//! The rebalance scheduler — epoch sequencing, commit protocol, and resume.
//!
//! One scheduler drives the whole engine over a trading calendar. Per
//! session, in order:
//!
//! 1. mark the NAV ledger with the session's close-to-close returns,
//! 2. on a month-end session, run the monthly epoch (re-cluster, rebuild the
//!    pool),
//! 3. run the daily epoch (score, classify, allocate, execute).
//!
//! Every epoch commits through the same protocol: write its snapshots, then
//! append one event to the audit log. The append is the commit point. An
//! epoch whose (kind, date, config hash) triple already appears in the log is
//! skipped wholesale, which makes reruns and crash-resume idempotent: a
//! half-finished epoch left no event, so it reruns from identical inputs and
//! overwrites its provisional snapshots with identical bytes.
//!
//! The scheduler never reads the wall clock. "Today" is a calendar position
//! handed to it, so backfills and live sessions share this code path.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;
use thiserror::Error;

use rotolab_core::alloc::allocate;
use rotolab_core::calendar::TradingCalendar;
use rotolab_core::classify::classify;
use rotolab_core::cluster::build_clusters;
use rotolab_core::config::EngineConfig;
use rotolab_core::domain::{
    gross_weight, ClusterSet, ConfigHash, DeltaSide, EpochKind, EventPayload, ExecutionMismatch,
    InstrumentId, Pool, Position, RebalanceEvent, Signal,
};
use rotolab_core::error::EngineError;
use rotolab_core::pool::{build_pool, ScreenList};
use rotolab_core::rng::EpochSeeder;
use rotolab_core::scoring::{rank_records, score_digest, score_pool, FactorSet};

use crate::data::MarketData;
use crate::performance::{Ledger, PortfolioMetrics};
use crate::store::{PortfolioState, StateStore, StoreError, PORTFOLIO_SCHEMA_VERSION};
use crate::venue::{Fill, Venue};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("store is missing the {what} snapshot for committed epoch {epoch}")]
    MissingSnapshot { what: &'static str, epoch: NaiveDate },

    #[error("trading calendar is empty")]
    EmptyCalendar,
}

/// What one `run` call did.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    pub sessions: usize,
    pub monthly_committed: usize,
    pub monthly_aborted: usize,
    pub daily_committed: usize,
    /// Epochs found already committed in the log and skipped.
    pub replayed: usize,
    /// Sessions processed before any pool existed.
    pub idle: usize,
    pub metrics: PortfolioMetrics,
}

#[derive(Default)]
struct Tally {
    sessions: usize,
    monthly_committed: usize,
    monthly_aborted: usize,
    daily_committed: usize,
    replayed: usize,
    idle: usize,
}

/// Scheduler over one store, dataset, and engine configuration.
///
/// Construction replays the audit log: the committed-epoch set, the last
/// sequence number, and the portfolio state of the last committed epoch are
/// all recovered before the first session is processed.
pub struct Scheduler<'a> {
    config: EngineConfig,
    config_hash: ConfigHash,
    data: &'a MarketData,
    calendar: TradingCalendar,
    store: &'a StateStore,
    venue: Box<dyn Venue>,
    seeder: EpochSeeder,
    factors: FactorSet,
    screen: ScreenList,

    // Replayed state.
    positions: Vec<Position>,
    pool_epoch: Option<NaiveDate>,
    pool: Option<Pool>,
    clusters: Option<ClusterSet>,
    last_seq: u64,
    committed: HashSet<(EpochKind, NaiveDate)>,
    /// Date of the last committed event and whether its daily epoch is done.
    /// Maintained on every commit. Sessions before this never re-run; the
    /// date itself re-runs only when its daily is still missing (crash
    /// between monthly and daily).
    resume_floor: Option<(NaiveDate, bool)>,
    ledger: Ledger,
}

impl std::fmt::Debug for Scheduler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config_hash", &self.config_hash)
            .field("pool_epoch", &self.pool_epoch)
            .field("last_seq", &self.last_seq)
            .finish_non_exhaustive()
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(
        config: EngineConfig,
        data: &'a MarketData,
        store: &'a StateStore,
        venue: Box<dyn Venue>,
    ) -> Result<Self, SchedulerError> {
        let calendar = data.calendar();
        if calendar.is_empty() {
            return Err(SchedulerError::EmptyCalendar);
        }
        let config_hash = config.hash()?;
        let seeder = EpochSeeder::new(config.master_seed);

        let events = store.events().read_all()?;
        // Sequence numbers stay monotone across config changes, so the max is
        // taken over the whole log, not just matching events.
        let last_seq = events.iter().map(|e| e.seq).max().unwrap_or(0);
        let committed: HashSet<(EpochKind, NaiveDate)> = events
            .iter()
            .filter(|e| e.config_hash == config_hash)
            .map(|e| (e.kind, e.date))
            .collect();

        let last_committed = events
            .iter()
            .filter(|e| e.config_hash == config_hash)
            .max_by_key(|e| e.seq);

        let resume_floor = last_committed
            .map(|e| (e.date, committed.contains(&(EpochKind::Daily, e.date))));

        let (positions, pool_epoch) = match last_committed {
            Some(event) => {
                let state = store
                    .read_portfolio_snapshot(event.kind, event.date)?
                    .ok_or(SchedulerError::MissingSnapshot {
                        what: "portfolio",
                        epoch: event.date,
                    })?;
                (state.positions, state.pool_epoch)
            }
            None => (Vec::new(), None),
        };

        let (pool, clusters) = match pool_epoch {
            Some(epoch) => {
                let pool = store.read_pool(epoch)?.ok_or(SchedulerError::MissingSnapshot {
                    what: "pool",
                    epoch,
                })?;
                let clusters =
                    store
                        .read_clusters(epoch)?
                        .ok_or(SchedulerError::MissingSnapshot {
                            what: "clusters",
                            epoch,
                        })?;
                (Some(pool), Some(clusters))
            }
            None => (None, None),
        };

        // Seed the ledger with the resumed book. Resumed lots accrue return
        // from the resume point; their entry metadata stays historical.
        let mut ledger = Ledger::new();
        for p in &positions {
            ledger.open_position(p.entry_date, p.instrument.clone(), p.weight, p.entry_score);
        }

        Ok(Self {
            config,
            config_hash,
            data,
            calendar,
            store,
            venue,
            seeder,
            factors: FactorSet::default(),
            screen: ScreenList::empty(),
            positions,
            pool_epoch,
            pool,
            clusters,
            last_seq,
            committed,
            resume_floor,
            ledger,
        })
    }

    /// Replace the fundamental screen applied at the next monthly rebuild.
    pub fn set_screen(&mut self, screen: ScreenList) {
        self.screen = screen;
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config_hash(&self) -> &ConfigHash {
        &self.config_hash
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn pool(&self) -> Option<&Pool> {
        self.pool.as_ref()
    }

    pub fn pool_epoch(&self) -> Option<NaiveDate> {
        self.pool_epoch
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    // ── Driver ───────────────────────────────────────────────────────

    /// Process every session in `[start, end]` (both optional bounds are
    /// inclusive; None extends to the calendar edge). The window is clamped
    /// to the resume floor: history behind the last committed epoch is never
    /// reprocessed, so an earlier `start` silently resumes instead of
    /// backfilling against state that did not exist then.
    pub fn run(
        &mut self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<RunSummary, SchedulerError> {
        let floor = self.resume_floor;
        let past_floor = move |d: &NaiveDate| match floor {
            None => true,
            Some((f, daily_done)) => {
                if daily_done {
                    *d > f
                } else {
                    *d >= f
                }
            }
        };
        let sessions: Vec<NaiveDate> = self
            .calendar
            .sessions()
            .iter()
            .copied()
            .filter(|d| start.map_or(true, |s| *d >= s) && end.map_or(true, |e| *d <= e))
            .filter(past_floor)
            .collect();

        let mut tally = Tally::default();
        for date in sessions {
            self.process_session(date, &mut tally)?;
        }

        Ok(RunSummary {
            sessions: tally.sessions,
            monthly_committed: tally.monthly_committed,
            monthly_aborted: tally.monthly_aborted,
            daily_committed: tally.daily_committed,
            replayed: tally.replayed,
            idle: tally.idle,
            metrics: self.ledger.metrics(),
        })
    }

    fn process_session(&mut self, date: NaiveDate, tally: &mut Tally) -> Result<(), SchedulerError> {
        tally.sessions += 1;

        // The book that earns today's return is yesterday's book, so the mark
        // precedes any rebalancing.
        let returns = self.data.returns_into(date);
        self.ledger.mark_session(date, &returns);

        if self.calendar.is_month_end(date) {
            self.run_monthly(date, tally)?;
        }
        self.run_daily(date, tally)?;
        Ok(())
    }

    // ── Monthly epoch ────────────────────────────────────────────────

    fn run_monthly(&mut self, date: NaiveDate, tally: &mut Tally) -> Result<(), SchedulerError> {
        if self.committed.contains(&(EpochKind::Monthly, date)) {
            tally.replayed += 1;
            return Ok(());
        }

        let (features, skipped) = self
            .data
            .features_as_of(date, &self.config.scoring.lookbacks);

        let mut rng = self.seeder.rng_for(&self.config_hash, date, "kmeans");
        let clusters = match build_clusters(&features, &self.config.clustering, date, &mut rng) {
            Ok(clusters) => clusters,
            Err(EngineError::EmptyUniverse) => {
                // Nothing had enough history to cluster; treated like a
                // too-small pool so the prior epoch stays live.
                self.commit_abort(date, 0, tally)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let pool = match build_pool(&features, &clusters, &self.screen, &self.config.pool, date) {
            Ok(pool) => pool,
            Err(EngineError::EmptyPool { survivors, .. }) => {
                self.commit_abort(date, survivors, tally)?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.store.write_clusters(&clusters)?;
        self.store.write_pool(&pool)?;

        let payload = EventPayload::MonthlyRebuild {
            cluster_digest: clusters.digest(),
            pool_digest: pool.digest(),
            pool_size: pool.len(),
            converged: clusters.converged,
            iterations: clusters.iterations,
            skipped,
        };
        self.commit(EpochKind::Monthly, date, self.positions.clone(), Some(date), payload)?;

        self.pool_epoch = Some(date);
        self.pool = Some(pool);
        self.clusters = Some(clusters);
        tally.monthly_committed += 1;
        Ok(())
    }

    fn commit_abort(
        &mut self,
        date: NaiveDate,
        survivors: usize,
        tally: &mut Tally,
    ) -> Result<(), SchedulerError> {
        let payload = EventPayload::MonthlyAborted {
            survivors,
            minimum: self.config.pool.min_viable,
        };
        // The prior pool (if any) stays live, so pool_epoch is unchanged.
        self.commit(
            EpochKind::Monthly,
            date,
            self.positions.clone(),
            self.pool_epoch,
            payload,
        )?;
        tally.monthly_aborted += 1;
        Ok(())
    }

    // ── Daily epoch ──────────────────────────────────────────────────

    fn run_daily(&mut self, date: NaiveDate, tally: &mut Tally) -> Result<(), SchedulerError> {
        if self.committed.contains(&(EpochKind::Daily, date)) {
            tally.replayed += 1;
            return Ok(());
        }
        // Before the first committed monthly rebuild there is nothing to
        // score against; the session is a recorded no-op.
        let (pool, clusters) = match (&self.pool, &self.clusters) {
            (Some(pool), Some(clusters)) => (pool.clone(), clusters.clone()),
            _ => {
                tally.idle += 1;
                return Ok(());
            }
        };

        let (features, skipped) = self
            .data
            .features_as_of(date, &self.config.scoring.lookbacks);

        let mut records = score_pool(
            &pool,
            &features,
            &self.factors,
            &self.config.scoring.ceilings,
            date,
            !clusters.converged,
        );
        rank_records(&mut records);
        let digest = score_digest(&records);

        let outcome = classify(
            &records,
            &self.positions,
            &pool,
            &clusters,
            &self.config.signals,
            date,
        );
        let alloc = allocate(
            &outcome.signals,
            &features,
            &self.positions,
            &self.config.allocation,
            date,
        );

        let fills = self.venue.execute(date, &alloc.deltas);
        let mismatches: Vec<ExecutionMismatch> =
            fills.iter().filter_map(Fill::mismatch).collect();

        // Positions carry what filled, not what was asked.
        let mut positions = alloc.positions.clone();
        let filled_entries: BTreeMap<&InstrumentId, f64> = fills
            .iter()
            .filter(|f| f.side == DeltaSide::Enter)
            .map(|f| (&f.instrument, f.filled_weight))
            .collect();
        for p in &mut positions {
            if let Some(&filled) = filled_entries.get(&p.instrument) {
                p.weight = filled;
            }
        }

        self.store.write_scores(date, &records)?;
        self.store.write_signals(date, &outcome.signals)?;

        let entered: Vec<_> = alloc
            .deltas
            .iter()
            .filter(|d| d.side == DeltaSide::Enter)
            .cloned()
            .collect();
        let exited: Vec<_> = alloc
            .deltas
            .iter()
            .filter(|d| d.side == DeltaSide::Exit)
            .cloned()
            .collect();
        let payload = EventPayload::DailyRebalance {
            score_digest: digest,
            scored: records.len(),
            entered,
            exited,
            near_misses: outcome.near_misses.clone(),
            mismatches,
            dropped: alloc.dropped.clone(),
            gross_weight: gross_weight(&positions),
            skipped,
        };
        self.commit(EpochKind::Daily, date, positions, self.pool_epoch, payload)?;

        self.book_fills(date, &fills, &outcome.signals);
        tally.daily_committed += 1;
        Ok(())
    }

    /// Record the session's fills in the NAV ledger.
    fn book_fills(&mut self, date: NaiveDate, fills: &[Fill], signals: &[Signal]) {
        let by_id: BTreeMap<&InstrumentId, &Signal> =
            signals.iter().map(|s| (&s.instrument, s)).collect();
        for fill in fills {
            let (composite, forced) = by_id
                .get(&fill.instrument)
                .map(|s| (s.composite, s.forced))
                .unwrap_or((0.0, false));
            match fill.side {
                DeltaSide::Enter => self.ledger.open_position(
                    date,
                    fill.instrument.clone(),
                    fill.filled_weight,
                    composite,
                ),
                DeltaSide::Exit => {
                    self.ledger
                        .close_position(date, &fill.instrument, composite, forced)
                }
            }
        }
    }

    // ── Commit protocol ──────────────────────────────────────────────

    /// Write the epoch's portfolio snapshot, append its event (the commit
    /// point), and only then update in-memory state and `current.json`.
    fn commit(
        &mut self,
        kind: EpochKind,
        date: NaiveDate,
        positions: Vec<Position>,
        pool_epoch: Option<NaiveDate>,
        payload: EventPayload,
    ) -> Result<(), SchedulerError> {
        let seq = self.last_seq + 1;
        let state = PortfolioState {
            schema_version: PORTFOLIO_SCHEMA_VERSION,
            as_of: date,
            last_seq: seq,
            pool_epoch,
            positions: positions.clone(),
        };
        self.store.write_portfolio_snapshot(kind, date, &state)?;

        let event = RebalanceEvent::new(seq, kind, date, self.config_hash.clone(), payload);
        self.store.events().append(&event)?;

        self.last_seq = seq;
        self.committed.insert((kind, date));
        self.resume_floor = Some((date, self.committed.contains(&(EpochKind::Daily, date))));
        self.positions = positions;
        self.store.write_current(&state)?;
        Ok(())
    }
}

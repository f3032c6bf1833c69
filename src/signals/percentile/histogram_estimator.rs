use crate::buffers::BoundedBuffer;
use crate::error::SignalError;
use crate::signals::Signal;
use crate::signals::percentile::bucket::{Bucket, FP_TOLERANCE};
use crate::signals::percentile::params::PercentileParams;
use crate::signals::percentile::state::EstimatorState;
use crate::store::Store;
use crate::utils::{Clock, SystemClock};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{Display, EnumIter, IntoStaticStr};
use tracing::{debug, error, info, warn};

/// How far past the predicted bucket a value may land before the prediction
/// is considered broken.
const MAX_INDEX_SCAN: usize = 5;

const BOOTSTRAP_SUFFIX: &str = "-lastdata";

/// Upper bound on the buckets one extension may add, as a multiple of
/// `target_num_bins`.
const MAX_EXTENSION_FACTOR: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Phase {
    /// Too few samples to size the histogram; raw values are buffered.
    Bootstrap,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Prediction {
    Index(usize),
    /// Signed distance past the nearest domain edge.
    OutOfBounds(f64),
}

struct Storage {
    name: String,
    store: Arc<dyn Store>,
    save_every: TimeDelta,
    last_saved: Option<DateTime<Utc>>,
}

/// Streaming percentile estimator over a drifting distribution.
///
/// The first `min_data` samples are only buffered while the observed range is
/// tracked. Once enough have arrived, `target_num_bins` equal-width buckets
/// are laid over that range and the buffered samples are replayed into them.
/// From then on each sample lands in one bucket, found by direct index
/// arithmetic. Samples outside the covered range grow the domain outward by
/// whole buckets; when the histogram grows past `prune_above_count` buckets,
/// runs of buckets at either edge that have not been touched for
/// `target_age` are dropped, so the estimator forgets stale extremes.
///
/// The rank of each sample is its weighted empirical CDF over bucket
/// midpoints, which drives the buy/sell flags.
///
/// One writer at a time: nothing here is synchronized.
pub struct HistogramEstimator {
    params: PercentileParams,
    target_age: TimeDelta,

    /// Smallest and largest sample seen while bootstrapping.
    observed: Option<(f64, f64)>,
    buckets: Vec<Bucket>,
    bootstrap: Option<BoundedBuffer<f64>>,

    sig_buy: bool,
    sig_sell: bool,

    clock: Arc<dyn Clock>,
    storage: Option<Storage>,
}

impl HistogramEstimator {
    pub fn new(
        buy_below: f64,
        sell_above: f64,
        min_data: usize,
        target_age: Duration,
    ) -> Result<Self, SignalError> {
        Self::from_params(PercentileParams {
            buy_below,
            sell_above,
            min_data,
            target_age,
            ..Default::default()
        })
    }

    pub fn from_params(params: PercentileParams) -> Result<Self, SignalError> {
        params.validate()?;
        let bootstrap = BoundedBuffer::new(2 * params.min_data)?;
        Self::assemble(params, Vec::new(), Some(bootstrap))
    }

    fn assemble(
        params: PercentileParams,
        buckets: Vec<Bucket>,
        bootstrap: Option<BoundedBuffer<f64>>,
    ) -> Result<Self, SignalError> {
        let target_age = TimeDelta::from_std(params.target_age)
            .map_err(|e| SignalError::Config(format!("target age: {e}")))?;
        let observed = bootstrap.as_ref().and_then(|b| {
            b.iter().fold(None, |acc: Option<(f64, f64)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
        });
        Ok(Self {
            params,
            target_age,
            observed,
            buckets,
            bootstrap,
            sig_buy: false,
            sig_sell: false,
            clock: Arc::new(SystemClock),
            storage: None,
        })
    }

    /// Replaces the wall clock used to age buckets.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a store. Nothing is written until the next
    /// [`add_data`](Self::add_data) call, and then at most once per
    /// `save_every`.
    pub fn setup_storage(
        &mut self,
        name: impl Into<String>,
        store: Arc<dyn Store>,
        save_every: Duration,
    ) {
        self.storage = Some(Storage {
            name: name.into(),
            store,
            save_every: TimeDelta::from_std(save_every).unwrap_or(TimeDelta::MAX),
            last_saved: None,
        });
    }

    /// Loads a checkpoint written by an estimator configured with
    /// [`setup_storage`](Self::setup_storage).
    ///
    /// Returns `Ok(None)` when there is no checkpoint under `name` or it is
    /// older than `max_age`. The returned estimator has no store attached.
    pub fn load_from_store(
        name: &str,
        store: &dyn Store,
        max_age: Duration,
    ) -> Result<Option<Self>, SignalError> {
        let Some(blob) = store.retrieve(name, max_age) else {
            info!(checkpoint = name, "no usable checkpoint");
            return Ok(None);
        };
        let state: EstimatorState = serde_json::from_slice(&blob)?;
        if state.buckets.is_empty() {
            let bootstrap_name = format!("{name}{BOOTSTRAP_SUFFIX}");
            let Some(raw) = store.retrieve(&bootstrap_name, max_age) else {
                info!(
                    checkpoint = name,
                    "checkpoint predates the histogram and has no sample buffer"
                );
                return Ok(None);
            };
            let buffer: BoundedBuffer<f64> = serde_json::from_slice(&raw)?;
            let params = state.params();
            params.validate()?;
            info!(
                checkpoint = name,
                samples = buffer.len(),
                "restored bootstrap checkpoint"
            );
            return Self::assemble(params, Vec::new(), Some(buffer)).map(Some);
        }
        let estimator = Self::from_state(state)?;
        info!(
            checkpoint = name,
            buckets = estimator.buckets.len(),
            "restored checkpoint"
        );
        Ok(Some(estimator))
    }

    /// Serializes configuration and buckets. Bootstrap samples are not part
    /// of this blob.
    pub fn encode(&self) -> Result<Vec<u8>, SignalError> {
        Ok(serde_json::to_vec(&EstimatorState::new(
            &self.params,
            &self.buckets,
        ))?)
    }

    /// Rebuilds an estimator from [`encode`](Self::encode) output.
    pub fn decode(bytes: &[u8]) -> Result<Self, SignalError> {
        Self::from_state(serde_json::from_slice(bytes)?)
    }

    fn from_state(state: EstimatorState) -> Result<Self, SignalError> {
        state.check_buckets()?;
        let params = state.params();
        params.validate()?;
        let bootstrap = if state.buckets.is_empty() {
            Some(BoundedBuffer::new(2 * params.min_data)?)
        } else {
            None
        };
        Self::assemble(params, state.buckets, bootstrap)
    }

    #[inline]
    pub fn params(&self) -> &PercentileParams {
        &self.params
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        if self.buckets.is_empty() {
            Phase::Bootstrap
        } else {
            Phase::Active
        }
    }

    #[inline]
    pub fn sig_buy(&self) -> bool {
        self.sig_buy
    }

    #[inline]
    pub fn sig_sell(&self) -> bool {
        self.sig_sell
    }

    #[inline]
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets.iter().map(Bucket::count).collect()
    }

    pub fn total_count(&self) -> u64 {
        self.buckets.iter().map(Bucket::count).sum()
    }

    /// Samples waiting for the histogram to be built.
    pub fn bootstrap_samples(&self) -> &[f64] {
        self.bootstrap
            .as_ref()
            .map(BoundedBuffer::items)
            .unwrap_or_default()
    }

    /// Covered domain once active, observed extremes while bootstrapping.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (self.buckets.first(), self.buckets.last()) {
            (Some(first), Some(last)) => Some((first.lower(), last.upper())),
            _ => self.observed,
        }
    }

    /// Feeds one sample and returns its percentile rank.
    ///
    /// Non-finite samples are dropped. While bootstrapping, including the
    /// call that builds the histogram, the rank is `None` and the signals stay
    /// untouched. An `Err` is always an
    /// [`SignalError::InvariantViolation`]: the histogram is no longer
    /// trustworthy and should be discarded.
    pub fn add_data(&mut self, value: f64) -> Result<Option<f64>, SignalError> {
        self.store_data();
        if !value.is_finite() {
            warn!(value, "dropping non-finite sample");
            return Ok(None);
        }
        if self.buckets.is_empty() {
            return self.add_bootstrap(value);
        }

        let now = self.clock.now();
        self.place(value, now)?;
        if self.buckets.len() > self.params.prune_above_count {
            self.prune_at(now);
        }
        Ok(self.update_signals(value))
    }

    /// Weighted empirical CDF of `value` over bucket midpoints. `None` until
    /// the histogram holds at least one sample.
    pub fn percentile_rank(&self, value: f64) -> Option<f64> {
        let (below, total) = self.buckets.iter().fold((0u64, 0u64), |(below, total), b| {
            let below = if b.mid_value() <= value {
                below + b.count()
            } else {
                below
            };
            (below, total + b.count())
        });
        if total == 0 {
            return None;
        }
        Some(below as f64 / total as f64)
    }

    /// Drops stale buckets from both edges of the domain.
    pub fn prune(&mut self) {
        let now = self.clock.now();
        self.prune_at(now);
    }

    fn add_bootstrap(&mut self, value: f64) -> Result<Option<f64>, SignalError> {
        let Some(buffer) = self.bootstrap.as_mut() else {
            return Err(SignalError::InvariantViolation(
                "histogram is empty and no bootstrap buffer exists".into(),
            ));
        };
        buffer.push(value);
        let buffered = buffer.len();
        self.observed = Some(match self.observed {
            None => (value, value),
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
        });
        if buffered < self.params.min_data {
            return Ok(None);
        }
        self.build_histogram()?;
        Ok(None)
    }

    fn build_histogram(&mut self) -> Result<(), SignalError> {
        let Some((lower, upper)) = self.observed else {
            return Err(SignalError::InvariantViolation(
                "building histogram without an observed range".into(),
            ));
        };
        let bins = self.params.target_num_bins;
        let width = (upper - lower) / bins as f64;
        if !(width > 0.0 && width.is_finite()) {
            return Err(SignalError::InvariantViolation(format!(
                "cannot build histogram over [{lower}, {upper}]: bucket width {width}"
            )));
        }
        let Some(samples) = self.bootstrap.take() else {
            return Err(SignalError::InvariantViolation(
                "building histogram without a bootstrap buffer".into(),
            ));
        };

        let now = self.clock.now();
        self.buckets = (0..bins)
            .map(|i| Bucket::new(lower, width, i, now))
            .collect();
        if let Some(last) = self.buckets.last_mut() {
            last.set_upper(upper);
        }
        info!(
            lower,
            upper,
            buckets = bins,
            samples = samples.len(),
            "building histogram from bootstrap samples"
        );

        for &v in samples.iter() {
            match self.predict_index(v)? {
                Prediction::Index(index) => self.try_add_from_index(v, index, now)?,
                Prediction::OutOfBounds(overshoot) => {
                    return Err(SignalError::InvariantViolation(format!(
                        "bootstrap sample {v} lies {overshoot} outside [{lower}, {upper}]"
                    )));
                }
            }
        }
        self.observed = None;
        Ok(())
    }

    fn domain(&self) -> Result<(f64, f64, f64), SignalError> {
        match (self.buckets.first(), self.buckets.last()) {
            (Some(first), Some(last)) => {
                let (lower, upper) = (first.lower(), last.upper());
                Ok((lower, upper, (upper - lower) / self.buckets.len() as f64))
            }
            _ => Err(SignalError::InvariantViolation(
                "histogram has no buckets".into(),
            )),
        }
    }

    /// Index of the bucket `value` belongs to, or how far outside the domain
    /// it lies.
    ///
    /// A value sitting exactly on an edge between two buckets is attributed
    /// to the lower one. Rounding can put the raw estimate one bucket high;
    /// that is corrected here so the caller only ever has to scan upward.
    fn predict_index(&self, value: f64) -> Result<Prediction, SignalError> {
        let (lower, upper, width) = self.domain()?;
        if value > upper {
            return Ok(Prediction::OutOfBounds(value - upper));
        }
        if value < lower {
            return Ok(Prediction::OutOfBounds(value - lower));
        }
        let offset = (value - lower) / width;
        if offset.is_nan() {
            return Err(SignalError::InvariantViolation(format!(
                "index prediction for {value} over [{lower}, {upper}] is NaN"
            )));
        }
        let mut index = offset.floor() as usize;
        if index > 0 && offset == offset.floor() {
            index -= 1;
        }
        index = index.min(self.buckets.len() - 1);
        while index > 0 && self.buckets[index].lower() - FP_TOLERANCE > value {
            index -= 1;
        }
        Ok(Prediction::Index(index))
    }

    fn try_add_from_index(
        &mut self,
        value: f64,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<(), SignalError> {
        for bucket in self.buckets.iter_mut().skip(index).take(MAX_INDEX_SCAN + 1) {
            if bucket.try_add(value, now) {
                return Ok(());
            }
        }
        Err(SignalError::InvariantViolation(format!(
            "no bucket within {MAX_INDEX_SCAN} of predicted index {index} accepts {value}"
        )))
    }

    fn place(&mut self, value: f64, now: DateTime<Utc>) -> Result<(), SignalError> {
        let index = match self.predict_index(value)? {
            Prediction::Index(index) => index,
            Prediction::OutOfBounds(_) => {
                self.add_bucket(value, now)?;
                match self.predict_index(value)? {
                    Prediction::Index(index) => index,
                    Prediction::OutOfBounds(overshoot) => {
                        return Err(SignalError::InvariantViolation(format!(
                            "{value} still {overshoot} out of range after extending the domain"
                        )));
                    }
                }
            }
        };
        self.try_add_from_index(value, index, now)
    }

    /// Grows the domain outward with buckets of the current width until it
    /// covers `value`. Existing buckets are left as they are.
    fn add_bucket(&mut self, value: f64, now: DateTime<Utc>) -> Result<(), SignalError> {
        let (lower, upper, width) = self.domain()?;
        if value >= lower && value <= upper {
            return Err(SignalError::InvariantViolation(format!(
                "extending domain [{lower}, {upper}] for {value} which is already inside"
            )));
        }
        let distance = if value < lower {
            lower - value
        } else {
            value - upper
        };
        let limit = self
            .params
            .target_num_bins
            .saturating_mul(MAX_EXTENSION_FACTOR);
        let needed = (distance / width).ceil();
        if !(needed.is_finite() && needed <= limit as f64) {
            return Err(SignalError::InvariantViolation(format!(
                "cannot extend [{lower}, {upper}] by {distance} with bucket width {width}: \
                 needs {needed} buckets, at most {limit} allowed"
            )));
        }
        let mut extra = (needed as usize).max(1);
        let overshoot = if value < lower {
            lower - width * (extra as f64) > value
        } else {
            upper + width * (extra as f64) < value
        };
        if overshoot {
            extra = extra.checked_add(1).ok_or_else(|| {
                SignalError::InvariantViolation(format!(
                    "bucket count overflow extending for {value}"
                ))
            })?;
        }

        let mut fresh: Vec<Bucket> = Vec::new();
        fresh.try_reserve(extra).map_err(|e| {
            SignalError::InvariantViolation(format!(
                "cannot allocate {extra} buckets to extend for {value}: {e}"
            ))
        })?;
        if value < lower {
            let start = lower - width * (extra as f64);
            fresh.extend((0..extra).map(|i| Bucket::new(start, width, i, now)));
            if let Some(last) = fresh.last_mut() {
                last.set_upper(lower);
            }
            fresh.append(&mut self.buckets);
            self.buckets = fresh;
        } else {
            fresh.extend((0..extra).map(|i| Bucket::new(upper, width, i, now)));
            self.buckets.append(&mut fresh);
        }
        debug!(
            value,
            extra,
            buckets = self.buckets.len(),
            "extended histogram domain"
        );
        Ok(())
    }

    fn prune_at(&mut self, now: DateTime<Utc>) {
        let target_age = self.target_age;
        let is_stale = |b: &&Bucket| b.age(now) > target_age;

        let len = self.buckets.len();
        let stale_back = self.buckets.iter().rev().take_while(is_stale).count();
        if stale_back == len {
            if len > 0 {
                debug!(buckets = len, "every bucket is stale, nothing to anchor a prune on");
            }
            return;
        }
        let stale_front = self.buckets.iter().take_while(is_stale).count();
        if stale_back == 0 && stale_front == 0 {
            return;
        }
        self.buckets.truncate(len - stale_back);
        self.buckets.drain(..stale_front);
        debug!(
            stale_front,
            stale_back,
            buckets = self.buckets.len(),
            "pruned stale buckets"
        );
    }

    fn update_signals(&mut self, value: f64) -> Option<f64> {
        let rank = self.percentile_rank(value);
        self.sig_buy = rank.is_some_and(|r| r < self.params.buy_below);
        self.sig_sell = rank.is_some_and(|r| r > self.params.sell_above);
        rank
    }

    fn store_data(&mut self) {
        let now = self.clock.now();
        let Some(storage) = self.storage.as_mut() else {
            return;
        };
        if storage
            .last_saved
            .is_some_and(|last| now - last < storage.save_every)
        {
            return;
        }
        storage.last_saved = Some(now);

        let state = EstimatorState::new(&self.params, &self.buckets);
        match serde_json::to_vec(&state) {
            Ok(blob) => storage.store.store(&storage.name, blob),
            Err(e) => error!(checkpoint = %storage.name, "failed to encode estimator: {e}"),
        }
        if let Some(buffer) = self.bootstrap.as_ref() {
            let name = format!("{}{BOOTSTRAP_SUFFIX}", storage.name);
            match serde_json::to_vec(buffer) {
                Ok(blob) => storage.store.store(&name, blob),
                Err(e) => error!(checkpoint = %name, "failed to encode bootstrap samples: {e}"),
            }
        }
    }
}

impl Signal for HistogramEstimator {
    fn observe(&mut self, value: f64) -> Result<(), SignalError> {
        self.add_data(value).map(|_| ())
    }

    fn sig_buy(&self) -> bool {
        self.sig_buy
    }

    fn sig_sell(&self) -> bool {
        self.sig_sell
    }
}

impl fmt::Debug for HistogramEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramEstimator")
            .field("params", &self.params)
            .field("phase", &self.phase())
            .field("buckets", &self.buckets.len())
            .field("bounds", &self.bounds())
            .field("sig_buy", &self.sig_buy)
            .field("sig_sell", &self.sig_sell)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MemoryStore, normal_samples, uniform_samples};
    use strum::IntoEnumIterator;

    const SLACK: f64 = 1e-9;

    fn estimator(params: PercentileParams, clock: &ManualClock) -> HistogramEstimator {
        HistogramEstimator::from_params(params)
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    }

    fn standard(clock: &ManualClock) -> HistogramEstimator {
        HistogramEstimator::new(0.25, 0.75, 1000, Duration::from_secs(2))
            .unwrap()
            .with_clock(Arc::new(clock.clone()))
    }

    fn small(min_data: usize, bins: usize, prune_above: usize) -> PercentileParams {
        PercentileParams {
            min_data,
            target_num_bins: bins,
            prune_above_count: prune_above,
            target_age: Duration::from_secs(2),
            ..Default::default()
        }
    }

    fn feed(est: &mut HistogramEstimator, xs: &[f64]) {
        for &x in xs {
            est.add_data(x).unwrap();
        }
    }

    fn check_rank(est: &HistogramEstimator, value: f64, lo: f64, hi: f64) {
        let rank = est.percentile_rank(value).unwrap();
        assert!(
            rank >= lo && rank <= hi,
            "rank({value}) = {rank}, expected within [{lo}, {hi}], bounds {:?}",
            est.bounds()
        );
    }

    fn assert_contiguous(est: &HistogramEstimator) {
        for pair in est.buckets().windows(2) {
            assert_eq!(pair[0].upper().to_bits(), pair[1].lower().to_bits());
        }
        for b in est.buckets() {
            assert!(b.lower() < b.upper());
        }
    }

    #[test]
    fn zero_target_age_is_config_error() {
        let err = HistogramEstimator::new(0.25, 0.75, 10, Duration::ZERO).unwrap_err();
        assert!(matches!(err, SignalError::Config(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn bootstrap_keeps_signals_off_and_no_buckets() {
        let clock = ManualClock::default();
        let mut est = estimator(small(50, 20, 2000), &clock);
        for (i, x) in uniform_samples(1, 49, 0.0, 1.0).into_iter().enumerate() {
            assert_eq!(est.add_data(x).unwrap(), None);
            assert_eq!(est.phase(), Phase::Bootstrap);
            assert!(est.buckets().is_empty());
            assert!(!est.sig_buy() && !est.sig_sell());
            assert_eq!(est.bootstrap_samples().len(), i + 1);
        }
        assert!(est.percentile_rank(0.5).is_none());
    }

    #[test]
    fn transition_builds_buckets_over_observed_range() {
        let clock = ManualClock::default();
        let mut est = estimator(small(10, 20, 2000), &clock);
        let xs = [5.0, 3.0, 9.0, 4.0, 7.0, 6.0, 8.0, 2.5, 6.5, 11.0];
        for &x in &xs[..9] {
            est.add_data(x).unwrap();
        }
        assert_eq!(est.bounds(), Some((2.5, 9.0)));

        let rank = est.add_data(xs[9]).unwrap();
        assert_eq!(rank, None);
        assert!(!est.sig_buy() && !est.sig_sell());
        assert_eq!(est.percentile_rank(xs[9]), Some(1.0));
        assert_eq!(est.phase(), Phase::Active);
        assert_eq!(est.buckets().len(), 20);
        assert_eq!(est.bounds(), Some((2.5, 11.0)));
        assert_eq!(est.total_count(), 10);
        assert!(est.bootstrap_samples().is_empty());
        assert_contiguous(&est);
    }

    #[test]
    fn constant_bootstrap_is_zero_width_violation() {
        let clock = ManualClock::default();
        let mut est = estimator(small(5, 10, 2000), &clock);
        for _ in 0..4 {
            est.add_data(3.0).unwrap();
        }
        let err = est.add_data(3.0).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(est.phase(), Phase::Bootstrap);
    }

    #[test]
    fn non_finite_samples_are_dropped() {
        let clock = ManualClock::default();
        let mut est = estimator(small(3, 10, 2000), &clock);
        est.add_data(1.0).unwrap();
        assert_eq!(est.add_data(f64::NAN).unwrap(), None);
        assert_eq!(est.add_data(f64::INFINITY).unwrap(), None);
        assert_eq!(est.bootstrap_samples(), &[1.0]);
        assert_eq!(est.bounds(), Some((1.0, 1.0)));

        est.add_data(2.0).unwrap();
        est.add_data(3.0).unwrap();
        est.add_data(1.01).unwrap();
        assert!(est.sig_buy());
        let before = est.bucket_counts();
        assert_eq!(est.add_data(f64::NAN).unwrap(), None);
        assert_eq!(est.bucket_counts(), before);
        assert!(est.sig_buy());
    }

    #[test]
    fn boundary_values_go_to_lower_bucket() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();
        assert_eq!(est.bucket_counts()[0], 1);
        assert_eq!(est.bucket_counts()[9], 1);

        est.add_data(3.0).unwrap();
        let counts = est.bucket_counts();
        assert_eq!(counts[2], 1);
        assert_eq!(counts[3], 0);
        assert_eq!(est.total_count(), 3);
    }

    #[test]
    fn percentile_terciles_on_stationary_data() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(42, 3000, 100.0, 200.0));

        assert_eq!(est.total_count(), 3000);
        check_rank(&est, 120.0, 0.0, 0.25);
        check_rank(&est, 150.0, 0.25, 0.75);
        check_rank(&est, 175.0, 0.75, 1.0);
    }

    #[test]
    fn rank_is_monotone_with_zero_and_one_at_extremes() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(5, 2000, -3.0, 3.0));

        let (lower, upper) = est.bounds().unwrap();
        assert_eq!(est.percentile_rank(lower), Some(0.0));
        assert_eq!(est.percentile_rank(upper), Some(1.0));

        let mut last = 0.0;
        for i in 0..=600 {
            let v = lower + (upper - lower) * i as f64 / 600.0;
            let r = est.percentile_rank(v).unwrap();
            assert!(r >= last, "rank dropped at {v}: {r} < {last}");
            last = r;
        }
    }

    #[test]
    fn counts_are_conserved_across_extensions() {
        let clock = ManualClock::default();
        let mut est = estimator(small(100, 50, 2000), &clock);
        let mut xs = uniform_samples(9, 400, 10.0, 20.0);
        xs.extend([25.0, 4.0, 30.5, -2.0, 20.0, 10.0]);
        xs.extend(uniform_samples(10, 200, -5.0, 35.0));
        feed(&mut est, &xs);

        assert_eq!(est.total_count(), xs.len() as u64);
        assert!(est.buckets().len() > 50);
        let (lower, upper) = est.bounds().unwrap();
        assert!(lower <= -2.0 && upper >= 30.5);
        assert_contiguous(&est);
    }

    #[test]
    fn extension_keeps_existing_buckets_and_width() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();
        let original: Vec<(f64, f64)> = est
            .buckets()
            .iter()
            .map(|b| (b.lower(), b.upper()))
            .collect();

        est.add_data(12.5).unwrap();
        assert_eq!(est.buckets().len(), 13);
        assert_eq!(est.bounds(), Some((0.0, 13.0)));

        est.add_data(-3.0).unwrap();
        assert_eq!(est.buckets().len(), 16);
        assert_eq!(est.bounds().unwrap().0, -3.0);

        let kept: Vec<(f64, f64)> = est.buckets()[3..13]
            .iter()
            .map(|b| (b.lower(), b.upper()))
            .collect();
        assert_eq!(kept, original);
        for b in est.buckets() {
            assert!(((b.upper() - b.lower()) - 1.0).abs() < SLACK);
        }
        assert_eq!(est.total_count(), 4);
        assert_contiguous(&est);
    }

    #[test]
    fn add_bucket_rejects_value_inside_domain() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();
        let err = est.add_bucket(5.0, clock.now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(est.buckets().len(), 10);
    }

    #[test]
    fn distant_outliers_are_rejected_without_growing() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();

        for v in [1e300, -1e300, 1e9, -1e9] {
            let err = est.add_data(v).unwrap_err();
            assert!(err.is_fatal(), "{v}: {err}");
            assert_eq!(est.buckets().len(), 10);
            assert_eq!(est.bounds(), Some((0.0, 10.0)));
        }
        assert_eq!(est.total_count(), 2);

        est.add_data(150.0).unwrap();
        assert_eq!(est.buckets().len(), 150);
        assert_contiguous(&est);
    }

    #[test]
    fn forward_scan_is_bounded() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();

        let err = est.try_add_from_index(9.5, 0, clock.now()).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(est.total_count(), 2);

        est.try_add_from_index(5.5, 0, clock.now()).unwrap();
        assert_eq!(est.bucket_counts()[5], 1);
    }

    #[test]
    fn predict_index_reports_signed_overshoot() {
        let clock = ManualClock::default();
        let mut est = estimator(small(2, 10, 2000), &clock);
        est.add_data(0.0).unwrap();
        est.add_data(10.0).unwrap();
        assert_eq!(est.predict_index(12.0).unwrap(), Prediction::OutOfBounds(2.0));
        assert_eq!(est.predict_index(-1.5).unwrap(), Prediction::OutOfBounds(-1.5));
        assert_eq!(est.predict_index(0.0).unwrap(), Prediction::Index(0));
        assert_eq!(est.predict_index(10.0).unwrap(), Prediction::Index(9));
        assert_eq!(est.predict_index(4.5).unwrap(), Prediction::Index(4));
    }

    #[test]
    fn prune_clears_stale_edges() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(11, 3000, 100.0, 200.0));
        clock.advance(Duration::from_secs(3));
        feed(&mut est, &normal_samples(12, 3000, 112.0, 178.0));

        let now = clock.now();
        let fresh_before = est
            .buckets()
            .iter()
            .filter(|b| b.age(now) <= est.target_age)
            .count();
        est.prune();

        for b in est.buckets() {
            assert!(b.upper() >= 112.0 - SLACK, "lower range kept: {b:?}");
            assert!(b.lower() <= 178.0 + SLACK, "upper range kept: {b:?}");
        }
        let fresh_after = est
            .buckets()
            .iter()
            .filter(|b| b.age(now) <= est.target_age)
            .count();
        assert_eq!(fresh_before, fresh_after);
        assert_contiguous(&est);
    }

    #[test]
    fn shifted_distribution_is_tracked_after_prune() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(21, 3000, 100.0, 200.0));
        check_rank(&est, 120.0, 0.0, 0.25);
        check_rank(&est, 150.0, 0.25, 0.75);
        check_rank(&est, 175.0, 0.75, 1.0);

        clock.advance(Duration::from_secs(3));
        feed(&mut est, &normal_samples(22, 3000, 90.0, 190.0));
        est.prune();

        let (lower, upper) = est.bounds().unwrap();
        assert!(lower <= 90.0 + SLACK);
        assert!(upper >= 190.0 - SLACK);
        assert!(upper < 200.0);
        check_rank(&est, 100.0, 0.0, 0.25);
        check_rank(&est, 140.0, 0.25, 0.75);
        check_rank(&est, 180.0, 0.75, 1.0);
    }

    #[test]
    fn growth_past_limit_triggers_prune() {
        let clock = ManualClock::default();
        let mut est = estimator(small(10, 10, 20), &clock);
        feed(&mut est, &[0.0, 10.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        assert_eq!(est.buckets().len(), 10);

        clock.advance(Duration::from_secs(5));
        est.add_data(24.5).unwrap();

        assert_eq!(est.buckets().len(), 15);
        assert_eq!(est.bounds(), Some((10.0, 25.0)));
        assert_eq!(est.total_count(), 1);
        assert_contiguous(&est);
    }

    #[test]
    fn prune_with_everything_stale_keeps_histogram() {
        let clock = ManualClock::default();
        let mut est = estimator(small(4, 8, 2000), &clock);
        feed(&mut est, &[1.0, 2.0, 3.0, 4.0]);
        clock.advance(Duration::from_secs(60));
        est.prune();
        assert_eq!(est.buckets().len(), 8);
        assert_eq!(est.total_count(), 4);
    }

    #[test]
    fn signals_follow_thresholds() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(31, 1500, 0.0, 1.0));

        est.observe(0.01).unwrap();
        assert!(Signal::sig_buy(&est));
        assert!(!Signal::sig_sell(&est));

        est.observe(0.99).unwrap();
        assert!(!est.sig_buy());
        assert!(est.sig_sell());

        est.observe(0.5).unwrap();
        assert!(!est.sig_buy() && !est.sig_sell());
    }

    #[test]
    fn encode_decode_is_bit_exact() {
        let clock = ManualClock::default();
        let mut est = standard(&clock);
        feed(&mut est, &normal_samples(41, 2500, 100.0, 200.0));
        est.add_data(231.7).unwrap();

        let restored = HistogramEstimator::decode(&est.encode().unwrap()).unwrap();
        assert_eq!(restored.params(), est.params());
        assert_eq!(restored.phase(), Phase::Active);
        assert_eq!(restored.buckets().len(), est.buckets().len());
        for (a, b) in restored.buckets().iter().zip(est.buckets()) {
            assert_eq!(a.lower().to_bits(), b.lower().to_bits());
            assert_eq!(a.upper().to_bits(), b.upper().to_bits());
            assert_eq!(a.count(), b.count());
            assert_eq!(a.last_update(), b.last_update());
        }
        for v in [120.0, 150.0, 175.0, 231.0] {
            assert_eq!(restored.percentile_rank(v), est.percentile_rank(v));
        }
    }

    #[test]
    fn decoded_estimator_keeps_learning() {
        let clock = ManualClock::default();
        let mut est = estimator(small(20, 10, 2000), &clock);
        feed(&mut est, &uniform_samples(3, 100, 0.0, 1.0));

        let mut restored = HistogramEstimator::decode(&est.encode().unwrap())
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        restored.add_data(1.7).unwrap();
        restored.add_data(0.4).unwrap();
        assert_eq!(restored.total_count(), 102);
        assert!(restored.bounds().unwrap().1 >= 1.7);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            HistogramEstimator::decode(b"not json"),
            Err(SignalError::Codec(_))
        ));
    }

    #[test]
    fn storage_saves_at_most_once_per_interval() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let mut est = estimator(small(10, 10, 2000), &clock);
        est.setup_storage("pc", Arc::new(store.clone()), Duration::from_secs(60));

        feed(&mut est, &[1.0, 2.0, 3.0]);
        assert!(store.contains("pc"));
        assert!(store.contains("pc-lastdata"));
        assert_eq!(store.writes(), 2);

        clock.advance(Duration::from_secs(61));
        est.add_data(4.0).unwrap();
        assert_eq!(store.writes(), 4);
    }

    #[test]
    fn load_restores_bootstrap_checkpoint() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let mut est = estimator(small(10, 10, 2000), &clock);
        est.setup_storage("boot", Arc::new(store.clone()), Duration::ZERO);
        feed(&mut est, &[1.0, 2.0, 3.0, 4.0]);

        let loaded = HistogramEstimator::load_from_store("boot", &store, Duration::from_secs(3600))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.phase(), Phase::Bootstrap);
        assert_eq!(loaded.bootstrap_samples(), &[1.0, 2.0, 3.0]);
        assert_eq!(loaded.bounds(), Some((1.0, 3.0)));
    }

    #[test]
    fn load_restores_active_checkpoint() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        let mut est = standard(&clock);
        est.setup_storage("sig-percentile", Arc::new(store.clone()), Duration::from_millis(1));
        feed(&mut est, &normal_samples(51, 3000, 100.0, 200.0));

        clock.advance(Duration::from_secs(2));
        est.add_data(150.0).unwrap();

        let loaded =
            HistogramEstimator::load_from_store("sig-percentile", &store, Duration::from_secs(3600))
                .unwrap()
                .unwrap();
        assert_eq!(loaded.phase(), Phase::Active);
        assert_eq!(loaded.total_count(), 3000);
        check_rank(&loaded, 120.0, 0.0, 0.25);
        check_rank(&loaded, 150.0, 0.25, 0.75);
        check_rank(&loaded, 175.0, 0.75, 1.0);
    }

    #[test]
    fn load_reports_missing_or_stale() {
        let clock = ManualClock::default();
        let store = MemoryStore::new(Arc::new(clock.clone()));
        assert!(
            HistogramEstimator::load_from_store("nothing", &store, Duration::from_secs(60))
                .unwrap()
                .is_none()
        );

        let mut est = estimator(small(2, 10, 2000), &clock);
        est.setup_storage("old", Arc::new(store.clone()), Duration::ZERO);
        feed(&mut est, &[1.0, 2.0, 3.0]);
        clock.advance(Duration::from_secs(120));
        assert!(
            HistogramEstimator::load_from_store("old", &store, Duration::from_secs(60))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn phase_names() {
        let names: Vec<&'static str> = Phase::iter().map(Into::into).collect();
        assert_eq!(names, vec!["bootstrap", "active"]);
        assert_eq!(Phase::Active.to_string(), "active");
    }
}

//! Statistical drift detection between reference and serving windows.
//!
//! Four interchangeable tests behind [`DriftMethod`]:
//!
//! - Two-sample Kolmogorov-Smirnov test (asymptotic p-value)
//! - Jensen-Shannon distance over a shared histogram
//! - Population stability index over reference decile bins
//! - Welch's t-test and an F-test combined with Fisher's method
//!
//! Each method compares a reference sample against a current sample and
//! reports a score plus a drift flag. Callers decide what to do with a
//! failed computation; the detector downgrades it to a no-drift note.

use perkon_core::config::{DriftConfig, DriftMethodKind};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Smallest p-value carried into log-space combination.
const P_FLOOR: f64 = 1e-300;

#[derive(Debug, thiserror::Error)]
pub enum DriftError {
    #[error("insufficient samples: reference {reference}, current {current}, need {required}")]
    InsufficientSamples {
        reference: usize,
        current: usize,
        required: usize,
    },
    #[error("drift computation failed: {0}")]
    Computation(String),
}

/// Result of one reference-vs-current comparison.
#[derive(Debug, Clone, Serialize)]
pub struct DriftOutcome {
    pub score: f64,
    pub is_drift: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
}

/// One statistical drift test.
pub trait DriftMethod: Send + Sync {
    fn kind(&self) -> DriftMethodKind;
    fn compare(&self, reference: &[f64], current: &[f64]) -> Result<DriftOutcome, DriftError>;
}

fn check_samples(reference: &[f64], current: &[f64], required: usize) -> Result<(), DriftError> {
    if reference.len() < required || current.len() < required {
        return Err(DriftError::InsufficientSamples {
            reference: reference.len(),
            current: current.len(),
            required,
        });
    }
    if reference.iter().chain(current.iter()).any(|v| !v.is_finite()) {
        return Err(DriftError::Computation("non-finite sample value".into()));
    }
    Ok(())
}

fn sorted(data: &[f64]) -> Vec<f64> {
    let mut out = data.to_vec();
    out.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Sample variance (n - 1 denominator), 0 for fewer than two samples.
fn variance(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    data.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (data.len() - 1) as f64
}

// =============================================================================
// Kolmogorov-Smirnov
// =============================================================================

/// Two-sample KS test. Drift when the asymptotic p-value falls below alpha.
pub struct KsTest {
    pub alpha: f64,
    pub min_samples: usize,
}

impl DriftMethod for KsTest {
    fn kind(&self) -> DriftMethodKind {
        DriftMethodKind::KsTest
    }

    fn compare(&self, reference: &[f64], current: &[f64]) -> Result<DriftOutcome, DriftError> {
        check_samples(reference, current, self.min_samples)?;
        let d = ks_statistic(reference, current);
        let p = ks_p_value(d, reference.len(), current.len());
        Ok(DriftOutcome {
            score: d,
            is_drift: p < self.alpha,
            p_value: Some(p),
        })
    }
}

/// Maximum distance between the two empirical CDFs.
fn ks_statistic(reference: &[f64], current: &[f64]) -> f64 {
    let a = sorted(reference);
    let b = sorted(current);
    let (mut i, mut j) = (0usize, 0usize);
    let mut d: f64 = 0.0;
    while i < a.len() && j < b.len() {
        let x = a[i].min(b[j]);
        while i < a.len() && a[i] <= x {
            i += 1;
        }
        while j < b.len() && b[j] <= x {
            j += 1;
        }
        let f1 = i as f64 / a.len() as f64;
        let f2 = j as f64 / b.len() as f64;
        d = d.max((f1 - f2).abs());
    }
    d
}

/// Asymptotic p-value via the Kolmogorov distribution:
/// `lambda = (sqrt(n_e) + 0.12 + 0.11 / sqrt(n_e)) * D`
fn ks_p_value(d: f64, n1: usize, n2: usize) -> f64 {
    let n_e = (n1 * n2) as f64 / (n1 + n2) as f64;
    let lambda = (n_e.sqrt() + 0.12 + 0.11 / n_e.sqrt()) * d;
    kolmogorov_survival(lambda)
}

/// `Q_KS(lambda) = 2 * sum_{j>=1} (-1)^(j-1) * exp(-2 j^2 lambda^2)`
///
/// Returns 1.0 when the alternating series fails to converge, which only
/// happens for very small lambda where the survival is ~1 anyway.
fn kolmogorov_survival(lambda: f64) -> f64 {
    if lambda <= 0.0 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for j in 1..=100 {
        let term = (-2.0 * (j as f64) * (j as f64) * lambda * lambda).exp();
        sum += sign * term;
        if term < 1e-10 {
            return (2.0 * sum).clamp(0.0, 1.0);
        }
        sign = -sign;
    }
    1.0
}

// =============================================================================
// Jensen-Shannon distance
// =============================================================================

/// Jensen-Shannon distance (base-2, so in `[0, 1]`) over a histogram with
/// shared bin edges spanning both samples.
pub struct JsDivergence {
    pub threshold: f64,
    pub bins: usize,
    pub min_samples: usize,
}

impl DriftMethod for JsDivergence {
    fn kind(&self) -> DriftMethodKind {
        DriftMethodKind::JsDivergence
    }

    fn compare(&self, reference: &[f64], current: &[f64]) -> Result<DriftOutcome, DriftError> {
        check_samples(reference, current, self.min_samples)?;
        let lo = reference
            .iter()
            .chain(current.iter())
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let hi = reference
            .iter()
            .chain(current.iter())
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);

        let p = shared_histogram(reference, lo, hi, self.bins);
        let q = shared_histogram(current, lo, hi, self.bins);
        let distance = js_distance(&p, &q);
        Ok(DriftOutcome {
            score: distance,
            is_drift: distance > self.threshold,
            p_value: None,
        })
    }
}

fn shared_histogram(data: &[f64], lo: f64, hi: f64, bins: usize) -> Vec<f64> {
    let mut counts = vec![0.0; bins.max(1)];
    let width = (hi - lo) / bins.max(1) as f64;
    if width <= 0.0 {
        // All mass at a single point.
        counts[0] = data.len() as f64;
    } else {
        for &v in data {
            let idx = (((v - lo) / width) as usize).min(bins - 1);
            counts[idx] += 1.0;
        }
    }
    let total: f64 = counts.iter().sum();
    counts.iter().map(|c| c / total.max(1.0)).collect()
}

fn js_distance(p: &[f64], q: &[f64]) -> f64 {
    let kl = |a: &[f64], m: &[f64]| -> f64 {
        a.iter()
            .zip(m.iter())
            .filter(|(ai, mi)| **ai > 0.0 && **mi > 0.0)
            .map(|(ai, mi)| ai * (ai / mi).log2())
            .sum()
    };
    let m: Vec<f64> = p.iter().zip(q.iter()).map(|(a, b)| 0.5 * (a + b)).collect();
    let jsd = 0.5 * kl(p, &m) + 0.5 * kl(q, &m);
    jsd.max(0.0).sqrt()
}

// =============================================================================
// Population stability index
// =============================================================================

/// PSI over quantile bins derived from the reference sample. Empty bins get
/// the conventional 1e-4 substitution so the log term stays finite.
pub struct Psi {
    pub threshold: f64,
    pub bins: usize,
    pub min_samples: usize,
}

impl DriftMethod for Psi {
    fn kind(&self) -> DriftMethodKind {
        DriftMethodKind::Psi
    }

    fn compare(&self, reference: &[f64], current: &[f64]) -> Result<DriftOutcome, DriftError> {
        check_samples(reference, current, self.min_samples)?;
        let edges = quantile_edges(reference, self.bins);
        let expected = bucket_fractions(reference, &edges);
        let actual = bucket_fractions(current, &edges);

        let psi: f64 = expected
            .iter()
            .zip(actual.iter())
            .map(|(e, a)| {
                let e = e.max(1e-4);
                let a = a.max(1e-4);
                (a - e) * (a / e).ln()
            })
            .sum();
        Ok(DriftOutcome {
            score: psi,
            is_drift: psi > self.threshold,
            p_value: None,
        })
    }
}

/// Bin edges at the reference quantiles, open at both ends.
fn quantile_edges(reference: &[f64], bins: usize) -> Vec<f64> {
    let s = sorted(reference);
    let n = s.len();
    let mut edges = Vec::with_capacity(bins + 1);
    edges.push(f64::NEG_INFINITY);
    for k in 1..bins {
        let idx = (k * n) / bins;
        edges.push(s[idx.min(n - 1)]);
    }
    edges.push(f64::INFINITY);
    edges
}

fn bucket_fractions(data: &[f64], edges: &[f64]) -> Vec<f64> {
    let mut counts = vec![0.0; edges.len() - 1];
    for &v in data {
        let mut k = 0;
        while k + 2 < edges.len() && v > edges[k + 1] {
            k += 1;
        }
        counts[k] += 1.0;
    }
    let total = data.len().max(1) as f64;
    counts.iter().map(|c| c / total).collect()
}

// =============================================================================
// Welch / F combined test
// =============================================================================

/// Welch's t-test on the means and an F-test on the variances, combined via
/// Fisher's method into one p-value.
pub struct StatisticalTest {
    pub alpha: f64,
    pub min_samples: usize,
}

impl DriftMethod for StatisticalTest {
    fn kind(&self) -> DriftMethodKind {
        DriftMethodKind::StatisticalTest
    }

    fn compare(&self, reference: &[f64], current: &[f64]) -> Result<DriftOutcome, DriftError> {
        check_samples(reference, current, self.min_samples)?;
        let p_t = welch_p_value(reference, current);
        let p_f = f_test_p_value(reference, current);

        // Fisher's method: -2 * (ln p1 + ln p2) ~ chi-square with 4 dof.
        let x = -2.0 * (p_t.max(P_FLOOR).ln() + p_f.max(P_FLOOR).ln());
        let combined = chi_square_survival_df4(x);
        Ok(DriftOutcome {
            score: 1.0 - combined,
            is_drift: combined < self.alpha,
            p_value: Some(combined),
        })
    }
}

/// Two-sided Welch's t-test p-value with Welch-Satterthwaite degrees of
/// freedom.
fn welch_p_value(a: &[f64], b: &[f64]) -> f64 {
    let (m1, v1, n1) = (mean(a), variance(a), a.len() as f64);
    let (m2, v2, n2) = (mean(b), variance(b), b.len() as f64);

    let se2 = v1 / n1 + v2 / n2;
    if se2 <= 0.0 {
        return if (m1 - m2).abs() < 1e-12 { 1.0 } else { P_FLOOR };
    }
    let t = (m1 - m2) / se2.sqrt();

    let denom = (v1 / n1).powi(2) / (n1 - 1.0) + (v2 / n2).powi(2) / (n2 - 1.0);
    let df = if denom > 0.0 {
        se2 * se2 / denom
    } else {
        n1 + n2 - 2.0
    };

    (2.0 * student_t_survival(t.abs(), df)).clamp(0.0, 1.0)
}

/// Two-sided F-test p-value on the variance ratio.
fn f_test_p_value(a: &[f64], b: &[f64]) -> f64 {
    let (v1, v2) = (variance(a), variance(b));
    if v1 <= 0.0 || v2 <= 0.0 {
        return if (v1 - v2).abs() < 1e-12 { 1.0 } else { P_FLOOR };
    }
    let (f, d1, d2) = if v1 >= v2 {
        (v1 / v2, a.len() as f64 - 1.0, b.len() as f64 - 1.0)
    } else {
        (v2 / v1, b.len() as f64 - 1.0, a.len() as f64 - 1.0)
    };
    (2.0 * f_survival(f, d1, d2)).clamp(0.0, 1.0)
}

/// `P(T > t)` for Student's t with `df` degrees of freedom:
/// `0.5 * I_x(df/2, 1/2)` with `x = df / (df + t^2)`.
fn student_t_survival(t: f64, df: f64) -> f64 {
    if t <= 0.0 {
        return 0.5;
    }
    let x = df / (df + t * t);
    0.5 * incomplete_beta(df / 2.0, 0.5, x)
}

/// `P(F > f)` for the F distribution: `I_x(d2/2, d1/2)` with
/// `x = d2 / (d2 + d1 * f)`.
fn f_survival(f: f64, d1: f64, d2: f64) -> f64 {
    if f <= 0.0 {
        return 1.0;
    }
    let x = d2 / (d2 + d1 * f);
    incomplete_beta(d2 / 2.0, d1 / 2.0, x)
}

/// Chi-square survival for 4 degrees of freedom:
/// `P(X > x) = exp(-x/2) * (1 + x/2)`.
fn chi_square_survival_df4(x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    ((-x / 2.0).exp() * (1.0 + x / 2.0)).clamp(0.0, 1.0)
}

/// Regularized incomplete beta `I_x(a, b)` via Lentz's continued fraction.
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front =
        ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITER: usize = 200;
    const EPS: f64 = 1e-12;
    const TINY: f64 = 1e-30;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITER {
        let m_f = m as f64;
        let m2 = 2.0 * m_f;

        let aa = m_f * (b - m_f) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m_f) * (qab + m_f) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let del = d * c;
        h *= del;

        if (del - 1.0).abs() < EPS {
            break;
        }
    }
    h
}

/// Lanczos approximation of `ln(Gamma(x))` for `x > 0`.
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 6] = [
        76.18009172947146,
        -86.50532032941677,
        24.01409824083091,
        -1.231739572450155,
        0.1208650973866179e-2,
        -0.5395239384953e-5,
    ];
    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000000000190015;
    for c in COEFFS {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.5066282746310005 * ser / x).ln()
}

// =============================================================================
// Detector
// =============================================================================

/// Per-feature drift verdict.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureDriftEntry {
    pub feature: String,
    pub score: f64,
    pub is_drift: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureDriftReport {
    pub method: DriftMethodKind,
    pub features: Vec<FeatureDriftEntry>,
    /// Mean score over the features that actually computed.
    pub mean_score: f64,
    pub any_drift: bool,
    pub evaluated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionDriftReport {
    pub method: DriftMethodKind,
    pub score: f64,
    pub is_drift: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub mean_shift: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct DriftDetector {
    config: DriftConfig,
}

impl DriftDetector {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }

    /// Builds the test for the given kind (or the configured default).
    pub fn method(&self, kind: Option<DriftMethodKind>) -> Box<dyn DriftMethod> {
        let kind = kind.unwrap_or(self.config.default_method);
        match kind {
            DriftMethodKind::KsTest => Box::new(KsTest {
                alpha: self.config.ks_alpha,
                min_samples: self.config.min_samples,
            }),
            DriftMethodKind::JsDivergence => Box::new(JsDivergence {
                threshold: self.config.js_threshold,
                bins: self.config.histogram_bins,
                min_samples: self.config.min_samples,
            }),
            DriftMethodKind::Psi => Box::new(Psi {
                threshold: self.config.psi_threshold,
                bins: self.config.histogram_bins,
                min_samples: self.config.min_samples,
            }),
            DriftMethodKind::StatisticalTest => Box::new(StatisticalTest {
                alpha: self.config.statistical_alpha,
                min_samples: self.config.min_samples,
            }),
        }
    }

    /// Compares the two windows feature by feature. A feature that fails to
    /// compute contributes a no-drift entry with a note instead of failing
    /// the whole report.
    pub fn detect_feature_drift(
        &self,
        reference: &FxHashMap<String, Vec<f64>>,
        current: &FxHashMap<String, Vec<f64>>,
        kind: Option<DriftMethodKind>,
    ) -> FeatureDriftReport {
        let method = self.method(kind);
        let mut names: Vec<&String> = reference.keys().collect();
        names.sort();

        let mut features = Vec::with_capacity(names.len());
        let mut score_sum = 0.0;
        let mut evaluated = 0usize;
        let mut any_drift = false;

        for name in names {
            let entry = match current.get(name) {
                Some(current_values) => {
                    match method.compare(&reference[name], current_values) {
                        Ok(outcome) => {
                            score_sum += outcome.score;
                            evaluated += 1;
                            any_drift |= outcome.is_drift;
                            FeatureDriftEntry {
                                feature: name.clone(),
                                score: outcome.score,
                                is_drift: outcome.is_drift,
                                p_value: outcome.p_value,
                                note: None,
                            }
                        }
                        Err(e) => FeatureDriftEntry {
                            feature: name.clone(),
                            score: 0.0,
                            is_drift: false,
                            p_value: None,
                            note: Some(e.to_string()),
                        },
                    }
                }
                None => FeatureDriftEntry {
                    feature: name.clone(),
                    score: 0.0,
                    is_drift: false,
                    p_value: None,
                    note: Some("feature missing from current window".to_string()),
                },
            };
            features.push(entry);
        }

        FeatureDriftReport {
            method: method.kind(),
            mean_score: if evaluated > 0 {
                score_sum / evaluated as f64
            } else {
                0.0
            },
            any_drift,
            evaluated,
            features,
        }
    }

    /// Compares prediction outputs and summarizes the distribution shift.
    pub fn detect_prediction_drift(
        &self,
        reference: &[f64],
        current: &[f64],
        kind: Option<DriftMethodKind>,
    ) -> PredictionDriftReport {
        let method = self.method(kind);
        let mean_shift = mean(current) - mean(reference);
        let ref_std = variance(reference).sqrt();
        let cur_std = variance(current).sqrt();
        let std_ratio = if ref_std > 0.0 {
            Some(cur_std / ref_std)
        } else {
            None
        };

        match method.compare(reference, current) {
            Ok(outcome) => PredictionDriftReport {
                method: method.kind(),
                score: outcome.score,
                is_drift: outcome.is_drift,
                p_value: outcome.p_value,
                mean_shift,
                std_ratio,
                note: None,
            },
            Err(e) => PredictionDriftReport {
                method: method.kind(),
                score: 0.0,
                is_drift: false,
                p_value: None,
                mean_shift,
                std_ratio,
                note: Some(e.to_string()),
            },
        }
    }
}

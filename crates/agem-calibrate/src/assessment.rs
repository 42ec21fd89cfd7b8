//! Model assessment: AIC/BIC information criteria and the complexity
//! penalty applied to the calibration error.

use serde::{Deserialize, Serialize};

/// Which information criterion weights the calibration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Assessment {
    /// Akaike information criterion.
    Aic,
    /// Bayesian information criterion.
    #[default]
    Bic,
    /// Product of both penalties.
    Both,
}

/// Akaike information criterion for a least-squares fit.
///
/// # Arguments
///
/// * `n` - Number of compared samples
/// * `k` - Number of calibratable scalars
/// * `rss` - Residual sum of squares
pub fn aic(n: usize, k: usize, rss: f64) -> f64 {
    let n = n as f64;
    n * (rss.max(f64::MIN_POSITIVE) / n).ln() + 2.0 * k as f64
}

/// Bayesian information criterion for a least-squares fit.
///
/// # Arguments
///
/// * `n` - Number of compared samples
/// * `k` - Number of calibratable scalars
/// * `rss` - Residual sum of squares
pub fn bic(n: usize, k: usize, rss: f64) -> f64 {
    let n = n as f64;
    n * (rss.max(f64::MIN_POSITIVE) / n).ln() + k as f64 * n.ln()
}

impl Assessment {
    /// The multiplicative penalty applied to the raw comparison error.
    ///
    /// Normalised so a model with no calibratable scalars has a factor of 1
    /// and the penalty fades as the sample count grows: `1 + 2k/n` for AIC,
    /// `1 + k·ln(n)/n` for BIC, their product for `Both`.
    pub fn factor(&self, n: usize, k: usize) -> f64 {
        if n == 0 {
            return 1.0;
        }
        let n = n as f64;
        let k = k as f64;
        match self {
            Assessment::Aic => 1.0 + 2.0 * k / n,
            Assessment::Bic => 1.0 + k * n.ln() / n,
            Assessment::Both => (1.0 + 2.0 * k / n) * (1.0 + k * n.ln() / n),
        }
    }
}

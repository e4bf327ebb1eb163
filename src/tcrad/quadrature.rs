//! Zenith angles used to turn radiances into fluxes.

use smallvec::SmallVec;

/// Diffusivity factor: the secant of the single effective zenith angle that
/// approximates a hemispheric flux from one radiance.
pub const LW_DIFFUSIVITY: f64 = 1.66;

/// Largest number of Gauss-Legendre points per hemisphere. Requests for more
/// angles are clamped to this.
pub const MAX_GAUSS_LEGENDRE_POINTS: usize = 8;

type Points = SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]>;

/// Gauss-Legendre points and weights on the interval (0, 1].
///
/// Returns `(mu, weight)` with `n` entries each, with the cosines `mu` in
/// increasing order and weights that sum to 1.
pub fn gauss_legendre(n: usize) -> (Points, Points) {
    const TOLERANCE: f64 = 1.0e-15;
    const MAX_ITERATIONS: usize = 100;

    let mut mu = Points::new();
    let mut weight = Points::new();

    // Roots are symmetric about 0 on (-1, 1); compute the negative ones and
    // the middle one (if any), and mirror
    let num_roots = n.div_ceil(2);
    let mut roots: Points = (0..num_roots)
        .map(|i| {
            let mut x = -f64::cos(std::f64::consts::PI * (i as f64 + 0.75) / (n as f64 + 0.5));
            for _ in 0..MAX_ITERATIONS {
                let (p, dp) = legendre(n, x);
                let dx = p / dp;
                x -= dx;
                if dx.abs() < TOLERANCE {
                    break;
                }
            }
            x
        })
        .collect();
    roots.sort_by(f64::total_cmp);

    let mut push = |x: f64| {
        let (_, dp) = legendre(n, x);
        mu.push(0.5 * (x + 1.0));
        weight.push(1.0 / ((1.0 - x * x) * dp * dp));
    };
    for &x in &roots {
        push(x);
    }
    for &x in roots.iter().rev().skip(n % 2) {
        push(-x);
    }

    (mu, weight)
}

/// Legendre polynomial of degree `n` and its derivative at `x`.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let (mut p_prev, mut p) = (1.0, x);
    for k in 2..=n {
        let k = k as f64;
        (p_prev, p) = (p, ((2.0 * k - 1.0) * x * p - (k - 1.0) * p_prev) / k);
    }
    let dp = n as f64 * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// One zenith angle of a [`QuadratureSet`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadratureNode {
    /// Cosine of the zenith angle
    pub mu: f64,
    /// Quadrature weight, before projection onto the horizontal
    pub weight: f64,
}

/// Ordered set of zenith angles for a radiance calculation.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureSet {
    nodes: SmallVec<[QuadratureNode; MAX_GAUSS_LEGENDRE_POINTS]>,
}

impl QuadratureSet {
    /// Choose the angles for `n_angles_per_hem` angles per hemisphere.
    ///
    /// One angle is the two-stream-equivalent diffusivity approximation rather
    /// than true quadrature; two or more use Gauss-Legendre points. The count
    /// is clamped to [`MAX_GAUSS_LEGENDRE_POINTS`], and zero gives an empty
    /// set.
    pub fn new(n_angles_per_hem: usize) -> Self {
        match effective_angle_count(n_angles_per_hem) {
            0 => Self {
                nodes: SmallVec::new(),
            },
            1 => Self::diffusivity(),
            n => {
                let (mu, weight) = gauss_legendre(n);
                Self {
                    nodes: mu
                        .into_iter()
                        .zip(weight)
                        .map(|(mu, weight)| QuadratureNode { mu, weight })
                        .collect(),
                }
            }
        }
    }

    /// A single radiance at the diffusivity angle with unit weight.
    pub fn diffusivity() -> Self {
        let mut nodes = SmallVec::new();
        nodes.push(QuadratureNode {
            mu: 1.0 / LW_DIFFUSIVITY,
            weight: 1.0,
        });
        Self { nodes }
    }

    /// Number of angles.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// No angles, i.e. a two-stream-only calculation.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The nodes, in order.
    pub fn nodes(&self) -> &[QuadratureNode] {
        &self.nodes
    }

    /// Weight used to add each radiance into a flux.
    ///
    /// This projects the weights onto the horizontal, `weight * mu`, and
    /// normalizes them so they sum to 1.
    pub fn flux_weights(&self) -> SmallVec<[f64; MAX_GAUSS_LEGENDRE_POINTS]> {
        let total: f64 = self.nodes.iter().map(|node| node.weight * node.mu).sum();
        self.nodes
            .iter()
            .map(|node| node.weight * node.mu / total)
            .collect()
    }

    /// Iterate over `(mu, flux_weight)` pairs in order.
    pub fn iter_flux(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.nodes
            .iter()
            .zip(self.flux_weights())
            .map(|(node, weight)| (node.mu, weight))
    }
}

/// Number of angles actually used for a request of `n_angles_per_hem`.
pub fn effective_angle_count(n_angles_per_hem: usize) -> usize {
    n_angles_per_hem.min(MAX_GAUSS_LEGENDRE_POINTS)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn two_point_gauss_legendre() {
        let (mu, weight) = gauss_legendre(2);
        let offset = 0.5 / 3.0_f64.sqrt();
        assert_abs_diff_eq!(mu[0], 0.5 - offset, epsilon = 1e-14);
        assert_abs_diff_eq!(mu[1], 0.5 + offset, epsilon = 1e-14);
        assert_abs_diff_eq!(weight[0], 0.5, epsilon = 1e-14);
        assert_abs_diff_eq!(weight[1], 0.5, epsilon = 1e-14);
    }

    #[test]
    fn gauss_legendre_integrates_polynomials() {
        for n in 1..=MAX_GAUSS_LEGENDRE_POINTS {
            let (mu, weight) = gauss_legendre(n);
            assert_eq!(mu.len(), n);
            assert!(mu.windows(2).all(|w| w[0] < w[1]));
            assert!(mu.iter().all(|&mu| mu > 0.0 && mu <= 1.0));

            // Exact for polynomials up to degree 2n - 1 over [0, 1]
            for degree in 0..2 * n {
                let integral: f64 = mu
                    .iter()
                    .zip(&weight)
                    .map(|(mu, w)| w * mu.powi(degree as i32))
                    .sum();
                assert_abs_diff_eq!(integral, 1.0 / (degree as f64 + 1.0), epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn flux_weights_are_normalized() {
        for n in 1..=MAX_GAUSS_LEGENDRE_POINTS {
            let set = QuadratureSet::new(n);
            assert_eq!(set.len(), n);
            assert_abs_diff_eq!(set.flux_weights().iter().sum::<f64>(), 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn single_angle_is_diffusivity() {
        let set = QuadratureSet::new(1);
        assert_eq!(
            set.nodes(),
            &[QuadratureNode {
                mu: 1.0 / 1.66,
                weight: 1.0
            }]
        );
        assert_abs_diff_eq!(set.flux_weights()[0], 1.0, epsilon = 1e-15);
    }

    #[test]
    fn angle_count_is_clamped() {
        assert!(QuadratureSet::new(0).is_empty());
        assert_eq!(QuadratureSet::new(50).len(), MAX_GAUSS_LEGENDRE_POINTS);
        assert_eq!(effective_angle_count(50), MAX_GAUSS_LEGENDRE_POINTS);
        assert_eq!(effective_angle_count(3), 3);
    }
}

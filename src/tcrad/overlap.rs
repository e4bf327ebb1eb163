//! Overlap matrices between the regions of adjacent layers.
//!
//! See Hogan et al. (JGR 2016) for the definitions. Interfaces are numbered
//! from 0 at the top of the atmosphere to `num_levels` at the surface, so
//! interface `k` lies between layers `k - 1` and `k`. A dummy, entirely clear
//! layer is assumed above the top and below the surface.

use ndarray::{Array2, Array3, ArrayView1, ArrayView2};

use super::region::RegionLayout;

/// Cloud fractions at or above this are treated as overcast when computing the
/// cumulative cloud cover.
const MAX_CLOUD_FRACTION: f64 = 1.0 - 10.0 * f64::EPSILON;

/// Upward and downward overlap matrices for every interface.
#[derive(Debug, Clone)]
pub struct OverlapMatrices {
    /// `u[[k, i, j]]` is the fraction of the area of region `j` below interface
    /// `k` that lies under region `i` above it. Shape (`num_levels + 1`,
    /// `num_regions`, `num_regions`).
    u: Array3<f64>,
    /// `v[[k, j, i]]` is the fraction of the area of region `i` above interface
    /// `k` that lies over region `j` below it. Same shape as `u`.
    v: Array3<f64>,
}

impl OverlapMatrices {
    /// Matrix taking upward fluxes in the regions below interface `k` to the
    /// regions above it.
    pub fn u(&self, k: usize) -> ArrayView2<'_, f64> {
        self.u.index_axis(ndarray::Axis(0), k)
    }

    /// Matrix taking downward fluxes in the regions above interface `k` to the
    /// regions below it.
    pub fn v(&self, k: usize) -> ArrayView2<'_, f64> {
        self.v.index_axis(ndarray::Axis(0), k)
    }

    /// Number of interfaces, `num_levels + 1`.
    pub fn num_interfaces(&self) -> usize {
        self.u.len_of(ndarray::Axis(0))
    }
}

/// Compute the overlap matrices for every interface of a column.
///
/// `overlap_param` is the Hogan and Illingworth (2000) "alpha" between each
/// pair of adjacent layers, so it has `num_levels - 1` entries. Overlap of the
/// cloudy regions with each other uses the alpha raised to the power
/// `1 / decorrelation_scaling`, the ratio of the decorrelation lengths of cloud
/// inhomogeneities and cloud boundaries. Cloud fractions below `threshold` are
/// ignored.
pub fn calc_overlap_matrices(
    layout: &RegionLayout,
    overlap_param: &[f64],
    decorrelation_scaling: f64,
    threshold: f64,
) -> OverlapMatrices {
    let num_levels = layout.num_levels();
    let num_regions = layout.num_regions();
    let fracs = layout.fracs();

    let mut clear = ndarray::Array1::<f64>::zeros(num_regions);
    clear[0] = 1.0;

    let mut u = Array3::<f64>::zeros([num_levels + 1, num_regions, num_regions]);
    let mut v = Array3::<f64>::zeros([num_levels + 1, num_regions, num_regions]);

    for k in 0..=num_levels {
        let upper = if k == 0 { clear.view() } else { fracs.column(k - 1) };
        let lower = if k == num_levels { clear.view() } else { fracs.column(k) };
        // Next to the dummy layers there's no cloud on one side, so the
        // overlap parameter doesn't matter
        let alpha = if k == 0 || k == num_levels {
            1.0
        } else {
            overlap_param[k - 1]
        };
        let alpha_inhom = alpha.max(0.0).powf(1.0 / decorrelation_scaling);

        let op = overlap_pair_fractions(upper, lower, alpha, alpha_inhom, threshold);

        for ((i, j), &pair) in op.indexed_iter() {
            if upper[i] > 0.0 {
                v[[k, j, i]] = pair / upper[i];
            }
            if lower[j] > 0.0 {
                u[[k, i, j]] = pair / lower[j];
            }
        }
    }

    OverlapMatrices { u, v }
}

/// Fraction of the gridbox that is in region `i` above an interface and region
/// `j` below it, as element `[i, j]`.
///
/// Rows sum to `upper` and columns sum to `lower`.
fn overlap_pair_fractions(
    upper: ArrayView1<'_, f64>,
    lower: ArrayView1<'_, f64>,
    alpha: f64,
    alpha_inhom: f64,
    threshold: f64,
) -> Array2<f64> {
    let num_regions = upper.len();
    let cloud_fraction = |fracs: ArrayView1<'_, f64>| {
        let cf = 1.0 - fracs[0];
        if cf < threshold {
            0.0
        } else {
            cf
        }
    };
    let cf_upper = cloud_fraction(upper);
    let cf_lower = cloud_fraction(lower);

    let pair_cover = alpha * cf_upper.max(cf_lower)
        + (1.0 - alpha) * (cf_upper + cf_lower - cf_upper * cf_lower);
    // Fraction of the gridbox that is cloudy both above and below
    let both_cloudy = (cf_upper + cf_lower - pair_cover).clamp(0.0, cf_upper.min(cf_lower));

    // Share of the cloud in each cloudy region
    let in_cloud = |fracs: ArrayView1<'_, f64>, cf: f64| -> Vec<f64> {
        fracs
            .iter()
            .skip(1)
            .map(|&frac| if cf > 0.0 { frac / cf } else { 0.0 })
            .collect()
    };
    let in_upper = in_cloud(upper, cf_upper);
    let in_lower = in_cloud(lower, cf_lower);

    let mut op = Array2::<f64>::zeros([num_regions, num_regions]);
    op[[0, 0]] = 1.0 - cf_upper - cf_lower + both_cloudy;
    for i in 1..num_regions {
        op[[i, 0]] = (cf_upper - both_cloudy) * in_upper[i - 1];
        op[[0, i]] = (cf_lower - both_cloudy) * in_lower[i - 1];
    }

    // The cloudy-cloudy part blends maximum overlap, where the regions are
    // stacked in order of increasing optical depth, with random overlap
    let mut top_upper = 0.0;
    for i in 1..num_regions {
        let (lo_upper, hi_upper) = (top_upper, top_upper + in_upper[i - 1]);
        top_upper = hi_upper;

        let mut top_lower = 0.0;
        for j in 1..num_regions {
            let (lo_lower, hi_lower) = (top_lower, top_lower + in_lower[j - 1]);
            top_lower = hi_lower;

            let maximum = (hi_upper.min(hi_lower) - lo_upper.max(lo_lower)).max(0.0);
            let random = in_upper[i - 1] * in_lower[j - 1];
            op[[i, j]] = both_cloudy * (alpha_inhom * maximum + (1.0 - alpha_inhom) * random);
        }
    }

    op
}

/// Total cloud cover of a column using the exponential-random overlap rules.
///
/// `overlap_param` has `num_levels - 1` entries, as in
/// [`calc_overlap_matrices`].
pub fn cloud_cover(layout: &RegionLayout, overlap_param: &[f64]) -> f64 {
    let num_levels = layout.num_levels();
    if num_levels == 0 {
        return 0.0;
    }

    let mut cum_product = 1.0 - layout.cloud_fraction(0);
    for (lev, &alpha) in overlap_param.iter().enumerate().take(num_levels - 1) {
        let cf_upper = layout.cloud_fraction(lev);
        let cf_lower = layout.cloud_fraction(lev + 1);
        let pair_cover = alpha * cf_upper.max(cf_lower)
            + (1.0 - alpha) * (cf_upper + cf_lower - cf_upper * cf_lower);

        if cf_upper >= MAX_CLOUD_FRACTION {
            cum_product = 0.0;
        } else {
            cum_product *= (1.0 - pair_cover) / (1.0 - cf_upper);
        }
    }

    (1.0 - cum_product).clamp(0.0, 1.0)
}

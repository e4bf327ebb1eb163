//! Horizontal regions of the Doubleclouds and Tripleclouds assumptions.
//!
//! Region 0 is always clear sky. In the Tripleclouds assumption region 1 is
//! the optically "thin" cloudy region and region 2 the "thick" one, following
//! Shonk and Hogan (2008) where the thin region represents the 16th percentile
//! of the sub-grid distribution of cloud optical depth.

use std::str::FromStr;

use ndarray::{Array2, ArrayView2};

use crate::error::TcradError;

/// Lower limit on the thin-region optical depth scaling of a gamma
/// distribution, which otherwise vanishes for fractional standard deviations
/// above about 2.
const MIN_GAMMA_OD_SCALING: f64 = 0.025;

/// At large fractional standard deviations a gamma distribution can't be
/// captured with two equally weighted points, so the lower point is weighted
/// more: 0.5 up to an FSD of 1.5, rising linearly to 0.9 at an FSD of 3.725,
/// and capped there.
const MIN_LOWER_FRAC: f64 = 0.5;
const MAX_LOWER_FRAC: f64 = 0.9;
const FSD_AT_MIN_LOWER_FRAC: f64 = 1.5;
const FSD_AT_MAX_LOWER_FRAC: f64 = 3.725;
const LOWER_FRAC_FSD_GRADIENT: f64 =
    (MAX_LOWER_FRAC - MIN_LOWER_FRAC) / (FSD_AT_MAX_LOWER_FRAC - FSD_AT_MIN_LOWER_FRAC);
const LOWER_FRAC_FSD_INTERCEPT: f64 = MIN_LOWER_FRAC - FSD_AT_MIN_LOWER_FRAC * LOWER_FRAC_FSD_GRADIENT;

/// Assumed shape of the sub-grid distribution of in-cloud optical depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubgridDistribution {
    /// Lognormal distribution
    Lognormal,
    /// Gamma distribution
    Gamma,
}

impl FromStr for SubgridDistribution {
    type Err = TcradError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lognormal" => Ok(SubgridDistribution::Lognormal),
            "gamma" => Ok(SubgridDistribution::Gamma),
            _ => Err(TcradError::UnknownDistribution(s.to_string())),
        }
    }
}

/// Anything that splits a cloud fraction profile into horizontal regions.
pub trait RegionPartitioner {
    /// Number of regions, including the clear one.
    fn num_regions(&self) -> usize;

    /// Compute region fractions and cloudy-region optical depth scalings.
    ///
    /// `cloud_fraction` and `fractional_std` have one entry per level. Levels
    /// with a cloud fraction below `threshold` are treated as clear.
    fn partition(
        &self,
        cloud_fraction: &[f64],
        fractional_std: &[f64],
        threshold: f64,
    ) -> RegionLayout;
}

/// One clear and one homogeneous cloudy region.
#[derive(Debug, Clone, Copy, Default)]
pub struct Doubleclouds;

/// One clear and two cloudy regions representing sub-grid variability.
#[derive(Debug, Clone, Copy)]
pub struct Tripleclouds {
    /// Distribution used to place the two cloudy regions
    pub distribution: SubgridDistribution,
}

/// Runtime choice between the two- and three-region assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionScheme {
    /// Two regions, see [`Doubleclouds`]
    Doubleclouds,
    /// Three regions, see [`Tripleclouds`]
    Tripleclouds(SubgridDistribution),
}

impl RegionScheme {
    /// Select the scheme from a region count, which must be 2 or 3.
    pub fn from_count(
        num_regions: usize,
        distribution: SubgridDistribution,
    ) -> Result<Self, TcradError> {
        match num_regions {
            2 => Ok(RegionScheme::Doubleclouds),
            3 => Ok(RegionScheme::Tripleclouds(distribution)),
            n => Err(TcradError::UnsupportedRegionCount(n)),
        }
    }
}

impl Default for RegionScheme {
    fn default() -> Self {
        RegionScheme::Tripleclouds(SubgridDistribution::Gamma)
    }
}

impl RegionPartitioner for RegionScheme {
    fn num_regions(&self) -> usize {
        match self {
            RegionScheme::Doubleclouds => Doubleclouds.num_regions(),
            RegionScheme::Tripleclouds(distribution) => Tripleclouds {
                distribution: *distribution,
            }
            .num_regions(),
        }
    }

    fn partition(
        &self,
        cloud_fraction: &[f64],
        fractional_std: &[f64],
        threshold: f64,
    ) -> RegionLayout {
        match self {
            RegionScheme::Doubleclouds => {
                Doubleclouds.partition(cloud_fraction, fractional_std, threshold)
            }
            RegionScheme::Tripleclouds(distribution) => Tripleclouds {
                distribution: *distribution,
            }
            .partition(cloud_fraction, fractional_std, threshold),
        }
    }
}

impl RegionPartitioner for Doubleclouds {
    fn num_regions(&self) -> usize {
        2
    }

    fn partition(
        &self,
        cloud_fraction: &[f64],
        _fractional_std: &[f64],
        threshold: f64,
    ) -> RegionLayout {
        let mut layout = RegionLayout::clear(2, cloud_fraction.len());
        for (lev, &cf) in cloud_fraction.iter().enumerate() {
            if cf >= threshold {
                layout.fracs[[0, lev]] = 1.0 - cf;
                layout.fracs[[1, lev]] = cf;
            }
        }
        layout
    }
}

impl RegionPartitioner for Tripleclouds {
    fn num_regions(&self) -> usize {
        3
    }

    fn partition(
        &self,
        cloud_fraction: &[f64],
        fractional_std: &[f64],
        threshold: f64,
    ) -> RegionLayout {
        let regions = match self.distribution {
            SubgridDistribution::Lognormal => lognormal_regions,
            SubgridDistribution::Gamma => gamma_regions,
        };

        let mut layout = RegionLayout::clear(3, cloud_fraction.len());
        for (lev, (&cf, &fsd)) in cloud_fraction.iter().zip(fractional_std).enumerate() {
            let level = regions(cf, fsd, threshold);
            for (reg, &frac) in level.fracs.iter().enumerate() {
                layout.fracs[[reg, lev]] = frac;
            }
            for (reg, &scaling) in level.od_scaling.iter().enumerate() {
                layout.od_scaling[[reg, lev]] = scaling;
            }
        }
        layout
    }
}

/// Region fractions and optical depth scalings of one Tripleclouds level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriplecloudsLevel {
    /// Area fraction of the clear, thin and thick regions
    pub fracs: [f64; 3],
    /// Optical depth scaling of the thin and thick regions
    pub od_scaling: [f64; 2],
}

impl TriplecloudsLevel {
    const CLEAR: Self = Self {
        fracs: [1.0, 0.0, 0.0],
        od_scaling: [1.0, 1.0],
    };
}

/// Tripleclouds regions for a lognormal sub-grid distribution.
///
/// The two cloudy regions have equal area. If the equivalent Normal
/// distribution has mean mu and standard deviation sigma, the 16th percentile
/// of the lognormal is very close to exp(mu - sigma), which sets the thin
/// scaling. The thick scaling is `2 - thin` so the mean is preserved.
pub fn lognormal_regions(cloud_fraction: f64, fsd: f64, threshold: f64) -> TriplecloudsLevel {
    if cloud_fraction < threshold {
        return TriplecloudsLevel::CLEAR;
    }

    let variance_factor = fsd * fsd + 1.0;
    let thin = f64::exp(-variance_factor.ln().sqrt()) / variance_factor.sqrt();
    let half = 0.5 * cloud_fraction;

    TriplecloudsLevel {
        fracs: [1.0 - cloud_fraction, half, half],
        od_scaling: [thin, 2.0 - thin],
    }
}

/// Tripleclouds regions for a gamma sub-grid distribution.
///
/// The thin region takes the 16th percentile of the gamma distribution,
/// approximated by a polynomial-exponential fit and floored at
/// [`MIN_GAMMA_OD_SCALING`]. Its area follows the appendix of Hogan et al.
/// (2019), so the two cloudy regions need not be the same size. The thick
/// scaling is solved for so the mean in-cloud optical depth is conserved.
pub fn gamma_regions(cloud_fraction: f64, fsd: f64, threshold: f64) -> TriplecloudsLevel {
    if cloud_fraction < threshold {
        return TriplecloudsLevel::CLEAR;
    }

    let lower_frac = (LOWER_FRAC_FSD_INTERCEPT + fsd * LOWER_FRAC_FSD_GRADIENT)
        .clamp(MIN_LOWER_FRAC, MAX_LOWER_FRAC);
    let thin_frac = cloud_fraction * lower_frac;
    let thin = MIN_GAMMA_OD_SCALING
        + (1.0 - MIN_GAMMA_OD_SCALING) * f64::exp(-fsd * (1.0 + 0.5 * fsd * (1.0 + 0.5 * fsd)));

    let thick_frac = cloud_fraction - thin_frac;
    // The clamp on lower_frac keeps this positive, but never divide by zero
    let thick = (cloud_fraction - thin_frac * thin) / thick_frac.max(f64::MIN_POSITIVE);

    TriplecloudsLevel {
        fracs: [1.0 - cloud_fraction, thin_frac, thick_frac],
        od_scaling: [thin, thick],
    }
}

/// Area fractions of each region and optical depth scalings of the cloudy
/// regions, for every level of a column.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionLayout {
    /// Fraction of the gridbox in each region, shape (`num_regions`, `num_levels`)
    fracs: Array2<f64>,
    /// Optical depth scaling of the cloudy regions, shape (`num_regions - 1`,
    /// `num_levels`). Row 0 is region 1.
    od_scaling: Array2<f64>,
}

impl RegionLayout {
    /// A layout where every level is entirely clear sky.
    pub fn clear(num_regions: usize, num_levels: usize) -> Self {
        let mut fracs = Array2::<f64>::zeros([num_regions, num_levels]);
        fracs.row_mut(0).fill(1.0);
        Self {
            fracs,
            od_scaling: Array2::ones([num_regions - 1, num_levels]),
        }
    }

    /// Number of regions, including the clear one.
    pub fn num_regions(&self) -> usize {
        self.fracs.nrows()
    }

    /// Number of levels (layers) in the column.
    pub fn num_levels(&self) -> usize {
        self.fracs.ncols()
    }

    /// Region fractions, shape (`num_regions`, `num_levels`).
    pub fn fracs(&self) -> ArrayView2<'_, f64> {
        self.fracs.view()
    }

    /// Area fraction of `region` at level `lev`.
    pub fn frac(&self, region: usize, lev: usize) -> f64 {
        self.fracs[[region, lev]]
    }

    /// Optical depth scaling of cloudy `region` (1 or above) at level `lev`.
    pub fn od_scaling(&self, region: usize, lev: usize) -> f64 {
        self.od_scaling[[region - 1, lev]]
    }

    /// Cloud fraction that survived the threshold at level `lev`.
    pub fn cloud_fraction(&self, lev: usize) -> f64 {
        1.0 - self.fracs[[0, lev]]
    }

    /// Flag the layers that are entirely clear.
    ///
    /// The result has `num_levels + 2` entries: a dummy layer above the top of
    /// the atmosphere comes first and a dummy layer below the surface comes
    /// last, and both are always cloud free. Layer `lev` is at index `lev + 1`.
    pub fn cloud_free_layers(&self) -> Vec<bool> {
        let mut flags = Vec::with_capacity(self.num_levels() + 2);
        flags.push(true);
        #[allow(clippy::float_cmp)]
        flags.extend(self.fracs.row(0).iter().map(|&clear| clear == 1.0));
        flags.push(true);
        flags
    }
}

//! Combine gas and cloud optical properties in each region.

use ndarray::{Array3, ArrayView2, Axis};

use super::region::RegionLayout;

/// Optical properties of each region in each layer.
#[derive(Debug, Clone)]
pub struct RegionOptics {
    /// Combined gas, aerosol and cloud optical depth, shape (`num_spec`,
    /// `num_regions`, `num_levels`)
    pub od: Array3<f64>,
    /// Single scattering albedo of the cloudy regions, shape (`num_spec`,
    /// `num_regions - 1`, `num_levels`). Region 0 doesn't scatter, so row 0
    /// here is region 1. `None` for a no-scattering calculation.
    pub ssa: Option<Array3<f64>>,
}

impl RegionOptics {
    /// Single scattering albedo of `region` (0 for the clear region).
    pub fn ssa(&self, spec: usize, region: usize, lev: usize) -> f64 {
        match &self.ssa {
            Some(ssa) if region > 0 => ssa[[spec, region - 1, lev]],
            _ => 0.0,
        }
    }
}

/// Average gas and cloud properties in each region.
///
/// Region 0 is cloud free, so it just gets the gas optical depth. The cloudy
/// regions add the cloud optical depth scaled by the region's scaling. Gases
/// only absorb, so the scattering optical depth comes entirely from cloud and
/// the asymmetry factor of the mixture is that of the cloud regardless of the
/// scaling; it is therefore not computed here.
///
/// `od_clear` and `od_cloud` have shape (`num_spec`, `num_levels`). If
/// `ssa_cloud` is `None` the albedo isn't computed.
pub fn mix_optical_properties(
    layout: &RegionLayout,
    od_clear: ArrayView2<'_, f64>,
    od_cloud: ArrayView2<'_, f64>,
    ssa_cloud: Option<ArrayView2<'_, f64>>,
) -> RegionOptics {
    let (num_spec, num_levels) = od_clear.dim();
    let num_regions = layout.num_regions();

    let mut od = Array3::<f64>::zeros([num_spec, num_regions, num_levels]);
    od.index_axis_mut(Axis(1), 0).assign(&od_clear);

    for region in 1..num_regions {
        let mut od_region = od.index_axis_mut(Axis(1), region);
        for ((spec, lev), od) in od_region.indexed_iter_mut() {
            *od = od_clear[[spec, lev]] + od_cloud[[spec, lev]] * layout.od_scaling(region, lev);
        }
    }

    let ssa = ssa_cloud.map(|ssa_cloud| {
        let mut ssa = Array3::<f64>::zeros([num_spec, num_regions - 1, num_levels]);
        for ((spec, row, lev), ssa) in ssa.indexed_iter_mut() {
            let region = row + 1;
            let od_total = od[[spec, region, lev]];
            if od_total > 0.0 {
                let od_scat =
                    ssa_cloud[[spec, lev]] * od_cloud[[spec, lev]] * layout.od_scaling(region, lev);
                *ssa = od_scat / od_total;
            }
        }
        ssa
    });

    RegionOptics { od, ssa }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use ndarray::array;

    use super::*;
    use crate::tcrad::region::{RegionPartitioner, SubgridDistribution, Tripleclouds};

    fn layout() -> RegionLayout {
        Tripleclouds {
            distribution: SubgridDistribution::Lognormal,
        }
        .partition(&[0.0, 0.5], &[1.0, 1.0], 1.0e-6)
    }

    #[test]
    fn clear_region_is_gas_only() {
        let layout = layout();
        let od_clear = array![[0.1, 0.2], [0.3, 0.4]];
        let od_cloud = array![[0.0, 4.0], [0.0, 8.0]];
        let optics = mix_optical_properties(&layout, od_clear.view(), od_cloud.view(), None);

        assert_eq!(optics.od.index_axis(Axis(1), 0), od_clear);
        assert!(optics.ssa.is_none());
        assert_eq!(optics.ssa(0, 2, 1), 0.0);
    }

    #[test]
    fn cloudy_regions_scale_cloud_optical_depth() {
        let layout = layout();
        let od_clear = array![[0.1, 0.2]];
        let od_cloud = array![[0.0, 4.0]];
        let ssa_cloud = array![[0.0, 0.9]];
        let optics = mix_optical_properties(
            &layout,
            od_clear.view(),
            od_cloud.view(),
            Some(ssa_cloud.view()),
        );

        for region in 1..3 {
            let scaling = layout.od_scaling(region, 1);
            let od = 0.2 + 4.0 * scaling;
            assert_relative_eq!(optics.od[[0, region, 1]], od, epsilon = 1e-14);
            // Scattering optical depth is preserved
            assert_relative_eq!(
                optics.ssa(0, region, 1) * optics.od[[0, region, 1]],
                0.9 * 4.0 * scaling,
                epsilon = 1e-14
            );
        }

        // Mean cloudy optical depth over the two cloudy regions equals the input
        let cf = layout.cloud_fraction(1);
        let mean = (1..3)
            .map(|r| layout.frac(r, 1) * (optics.od[[0, r, 1]] - 0.2))
            .sum::<f64>()
            / cf;
        assert_relative_eq!(mean, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_optical_depth_gives_zero_albedo() {
        let layout = layout();
        let zeros = array![[0.0, 0.0]];
        let ssa_cloud = array![[1.0, 1.0]];
        let optics =
            mix_optical_properties(&layout, zeros.view(), zeros.view(), Some(ssa_cloud.view()));
        assert!(optics.ssa.as_ref().unwrap().iter().all(|&ssa| ssa == 0.0));
    }
}

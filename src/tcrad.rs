//! Longwave fluxes through a partially cloudy column with the Tripleclouds
//! (or Doubleclouds) representation of sub-grid cloud.
//!
//! Two entry points share most of the work: [`calc_flux`] includes
//! scattering and either uses the two-stream fluxes directly or uses them as
//! the scattering source for radiances at several zenith angles (Fu et al.
//! 1997), while [`calc_no_scattering_flux`] neglects scattering and always
//! works with radiances.
//!
//! All level-dependent quantities count down from the top of the atmosphere.

pub mod layer;
pub mod optics;
pub mod overlap;
pub mod quadrature;
pub mod region;
pub mod solver;

#[cfg(test)]
mod tests;

use std::num::NonZeroUsize;
use std::ops::Add;

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, Axis};

use self::layer::{
    calc_no_scattering_radiance_source, calc_radiance_source, calc_reflectance_transmittance,
};
use self::optics::{mix_optical_properties, RegionOptics};
use self::overlap::{calc_overlap_matrices, OverlapMatrices};
use self::quadrature::{effective_angle_count, QuadratureSet};
use self::region::{RegionLayout, RegionPartitioner, RegionScheme};
use self::solver::{
    calc_radiance_dn, calc_radiance_up, calc_two_stream_flux, sum_regions, TwoStreamFluxes,
};
use crate::error::TcradError;

/// Cloud fractions below this are ignored.
pub const DEFAULT_CLOUD_FRACTION_THRESHOLD: f64 = 1.0e-6;

/// Ratio of the decorrelation length of cloud inhomogeneities to that of
/// cloud boundaries.
pub const DEFAULT_DECORRELATION_SCALING: f64 = 0.5;

/// Options for a flux calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxConfig {
    /// Number of angles per hemisphere for radiance calculations. For example,
    /// 2 gives the delta-2-plus-4 method of Fu et al. (1997). Zero means the
    /// two-stream fluxes are used directly, which is only possible with
    /// scattering. Clamped to
    /// [`MAX_GAUSS_LEGENDRE_POINTS`](quadrature::MAX_GAUSS_LEGENDRE_POINTS).
    pub n_angles_per_hem: usize,
    /// Represent 3D effects in the radiance calculations
    pub do_3d_effects: bool,
    /// Also compute the total cloud cover
    pub want_cloud_cover: bool,
    /// Number and placement of the horizontal regions
    pub regions: RegionScheme,
    /// Cloud fractions below this are treated as clear sky
    pub cloud_fraction_threshold: f64,
    /// See [`DEFAULT_DECORRELATION_SCALING`]
    pub decorrelation_scaling: f64,
}

impl FluxConfig {
    /// Defaults for [`calc_flux`]: two-stream fluxes only.
    pub fn scattering() -> Self {
        Self {
            n_angles_per_hem: 0,
            do_3d_effects: false,
            want_cloud_cover: false,
            regions: RegionScheme::default(),
            cloud_fraction_threshold: DEFAULT_CLOUD_FRACTION_THRESHOLD,
            decorrelation_scaling: DEFAULT_DECORRELATION_SCALING,
        }
    }

    /// Defaults for [`calc_no_scattering_flux`]: a single radiance at the
    /// diffusivity angle.
    ///
    /// Without scattering the two-stream and diffusivity-angle radiance
    /// solutions coincide, so one angle is the natural default here, while
    /// with scattering they don't.
    pub fn no_scattering() -> Self {
        Self {
            n_angles_per_hem: 1,
            ..Self::scattering()
        }
    }

    /// Use `n_angles_per_hem` angles per hemisphere.
    pub fn with_angles(mut self, n_angles_per_hem: usize) -> Self {
        self.n_angles_per_hem = n_angles_per_hem;
        self
    }

    /// Use a different region scheme.
    pub fn with_regions(mut self, regions: RegionScheme) -> Self {
        self.regions = regions;
        self
    }

    /// Also return the total cloud cover.
    pub fn with_cloud_cover(mut self) -> Self {
        self.want_cloud_cover = true;
        self
    }
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self::scattering()
    }
}

/// Gas and cloud properties of a single column.
#[derive(Debug, Clone)]
pub struct Column {
    /// Number of spectral intervals.
    num_spec: NonZeroUsize,
    /// Number of levels (layers).
    num_levels: NonZeroUsize,
    /// Surface upward emission in W/m² (emissivity times the Planck function
    /// at the skin temperature), with length `num_spec`.
    surf_emission: Vec<f64>,
    /// Surface albedo, with length `num_spec`.
    surf_albedo: Vec<f64>,
    /// Planck function at each half-level in W/m², shape (`num_spec`,
    /// `num_levels + 1`).
    planck_hl: Array2<f64>,
    /// Cloud fraction, with length `num_levels`.
    cloud_fraction: Vec<f64>,
    /// Fractional standard deviation of in-cloud water content, with length
    /// `num_levels`. Zero (homogeneous cloud) if not given.
    fractional_std: Vec<f64>,
    /// Gas and aerosol optical depth, shape (`num_spec`, `num_levels`).
    od_clear: Array2<f64>,
    /// Cloud optical depth averaged over the cloudy part of the gridbox, shape
    /// (`num_spec`, `num_levels`).
    od_cloud: Array2<f64>,
    /// Overlap parameter between adjacent layers, with length
    /// `num_levels - 1`.
    overlap_param: Vec<f64>,
}

impl Column {
    /// Check and collect the inputs for one column.
    ///
    /// The number of levels comes from `cloud_fraction` and the number of
    /// spectral intervals from `surf_emission`; everything else must agree.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        surf_emission: &[f64],
        surf_albedo: &[f64],
        planck_hl: ArrayView2<'_, f64>,
        cloud_fraction: &[f64],
        fractional_std: Option<&[f64]>,
        od_clear: ArrayView2<'_, f64>,
        od_cloud: ArrayView2<'_, f64>,
        overlap_param: &[f64],
    ) -> Result<Self, TcradError> {
        let num_spec: NonZeroUsize = surf_emission
            .len()
            .try_into()
            .or(Err(TcradError::InconsistentInputs))?;
        let num_levels: NonZeroUsize = cloud_fraction
            .len()
            .try_into()
            .or(Err(TcradError::InconsistentInputs))?;
        let (nspec, nlev) = (num_spec.get(), num_levels.get());

        let level_dims = [od_clear.dim(), od_cloud.dim()];
        if level_dims.iter().any(|&d| d != (nspec, nlev))
            || planck_hl.dim() != (nspec, nlev + 1)
            || surf_albedo.len() != nspec
            || overlap_param.len() != nlev - 1
            || fractional_std.is_some_and(|fsd| fsd.len() != nlev)
        {
            return Err(TcradError::InconsistentInputs);
        }

        Ok(Self {
            num_spec,
            num_levels,
            surf_emission: surf_emission.to_vec(),
            surf_albedo: surf_albedo.to_vec(),
            planck_hl: planck_hl.to_owned(),
            cloud_fraction: cloud_fraction.to_vec(),
            fractional_std: fractional_std.map_or_else(|| vec![0.0; nlev], <[f64]>::to_vec),
            od_clear: od_clear.to_owned(),
            od_cloud: od_cloud.to_owned(),
            overlap_param: overlap_param.to_vec(),
        })
    }

    /// Number of spectral intervals.
    pub fn num_spec(&self) -> usize {
        self.num_spec.get()
    }

    /// Number of levels (layers).
    pub fn num_levels(&self) -> usize {
        self.num_levels.get()
    }
}

/// Scattering properties of the cloud in a [`Column`].
#[derive(Debug, Clone)]
pub struct CloudScattering {
    /// Cloud single scattering albedo, shape (`num_spec`, `num_levels`)
    ssa_cloud: Array2<f64>,
    /// Cloud asymmetry factor, shape (`num_spec`, `num_levels`). Any
    /// delta-Eddington scaling should already have been done.
    asymmetry_cloud: Array2<f64>,
}

impl CloudScattering {
    /// Check the shapes against `column`.
    pub fn new(
        column: &Column,
        ssa_cloud: ArrayView2<'_, f64>,
        asymmetry_cloud: ArrayView2<'_, f64>,
    ) -> Result<Self, TcradError> {
        let dim = (column.num_spec(), column.num_levels());
        if ssa_cloud.dim() != dim || asymmetry_cloud.dim() != dim {
            return Err(TcradError::InconsistentInputs);
        }
        Ok(Self {
            ssa_cloud: ssa_cloud.to_owned(),
            asymmetry_cloud: asymmetry_cloud.to_owned(),
        })
    }
}

/// Upwelling and downwelling fluxes in W/m² at each half-level, shape
/// (`num_spec`, `num_levels + 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct FluxProfile {
    /// Upwelling flux
    pub flux_up: Array2<f64>,
    /// Downwelling flux
    pub flux_dn: Array2<f64>,
}

impl FluxProfile {
    /// An all-zero profile.
    pub fn zeros(num_spec: usize, num_levels: usize) -> Self {
        Self {
            flux_up: Array2::zeros([num_spec, num_levels + 1]),
            flux_dn: Array2::zeros([num_spec, num_levels + 1]),
        }
    }
}

impl Add for FluxProfile {
    type Output = FluxProfile;

    fn add(self, rhs: Self) -> Self::Output {
        FluxProfile {
            flux_up: self.flux_up + rhs.flux_up,
            flux_dn: self.flux_dn + rhs.flux_dn,
        }
    }
}

/// Results of a flux calculation.
#[derive(Debug, Clone)]
pub struct FluxOutputs {
    /// The flux profile
    pub fluxes: FluxProfile,
    /// Total cloud cover, if requested
    pub cloud_cover: Option<f64>,
    /// Number of angles per hemisphere actually used, after clamping
    pub n_angles_per_hem: usize,
}

impl FluxOutputs {
    /// Flux summed over the spectral intervals, returned as `(flux_up,
    /// flux_dn)` with one entry per half-level.
    pub fn broadband(&self) -> (Vec<f64>, Vec<f64>) {
        (
            self.fluxes.flux_up.sum_axis(Axis(0)).to_vec(),
            self.fluxes.flux_dn.sum_axis(Axis(0)).to_vec(),
        )
    }
}

/// The wavelength-independent geometry and per-region optical properties
/// shared by both entry points.
#[derive(Debug)]
struct Prepared {
    layout: RegionLayout,
    overlap: OverlapMatrices,
    cloud_cover: Option<f64>,
    optics: RegionOptics,
}

impl Prepared {
    fn new(column: &Column, ssa_cloud: Option<ArrayView2<'_, f64>>, config: &FluxConfig) -> Self {
        let layout = config.regions.partition(
            &column.cloud_fraction,
            &column.fractional_std,
            config.cloud_fraction_threshold,
        );
        debug!(
            "partitioned {} levels into {} regions",
            layout.num_levels(),
            layout.num_regions()
        );

        let overlap = calc_overlap_matrices(
            &layout,
            &column.overlap_param,
            config.decorrelation_scaling,
            config.cloud_fraction_threshold,
        );
        let cloud_cover = config
            .want_cloud_cover
            .then(|| overlap::cloud_cover(&layout, &column.overlap_param));

        let optics = mix_optical_properties(
            &layout,
            column.od_clear.view(),
            column.od_cloud.view(),
            ssa_cloud,
        );

        Self {
            layout,
            overlap,
            cloud_cover,
            optics,
        }
    }
}

/// Clamp the requested number of angles, noting anything unusual.
fn angle_count(config: &FluxConfig) -> usize {
    let n_angles = effective_angle_count(config.n_angles_per_hem);
    if n_angles != config.n_angles_per_hem {
        debug!(
            "clamping {} angles per hemisphere to {n_angles}",
            config.n_angles_per_hem
        );
    }
    if config.do_3d_effects {
        warn!("3D effects are not represented; regions are treated as horizontally independent");
    }
    n_angles
}

/// Compute the flux profile including scattering.
///
/// With no angles the classic Tripleclouds two-stream fluxes are returned.
/// Otherwise the two-stream solution provides the scattering source function
/// for radiances at each angle, which are then added up into fluxes.
pub fn calc_flux(column: &Column, scattering: &CloudScattering, config: &FluxConfig) -> FluxOutputs {
    let n_angles = angle_count(config);
    debug!(
        "computing fluxes with scattering for {} spectral intervals, {} levels and {n_angles} angles per hemisphere",
        column.num_spec(),
        column.num_levels()
    );

    let prepared = Prepared::new(column, Some(scattering.ssa_cloud.view()), config);
    let cloud_free = prepared.layout.cloud_free_layers();
    let layer = calc_reflectance_transmittance(
        &prepared.layout,
        column.planck_hl.view(),
        &prepared.optics,
        scattering.asymmetry_cloud.view(),
    );
    let two_stream = calc_two_stream_flux(
        &column.surf_emission,
        &column.surf_albedo,
        &layer,
        &cloud_free,
        &prepared.overlap,
    );

    let fluxes = if n_angles == 0 {
        let (flux_up, flux_dn) = sum_regions(&two_stream);
        FluxProfile { flux_up, flux_dn }
    } else {
        QuadratureSet::new(n_angles).iter_flux().fold(
            FluxProfile::zeros(column.num_spec(), column.num_levels()),
            |total, (mu, weight)| {
                total
                    + scattering_radiance_flux(
                        mu,
                        weight,
                        column,
                        scattering,
                        &prepared,
                        &two_stream,
                    )
            },
        )
    };

    FluxOutputs {
        fluxes,
        cloud_cover: prepared.cloud_cover,
        n_angles_per_hem: n_angles,
    }
}

/// Flux contribution of the radiances at zenith cosine `mu`, with scattering.
///
/// Radiances are computed in pairs, up and down with the same absolute
/// zenith angle.
fn scattering_radiance_flux(
    mu: f64,
    weight: f64,
    column: &Column,
    scattering: &CloudScattering,
    prepared: &Prepared,
    two_stream: &TwoStreamFluxes,
) -> FluxProfile {
    let props = calc_radiance_source(
        mu,
        &prepared.layout,
        column.planck_hl.view(),
        &prepared.optics,
        scattering.asymmetry_cloud.view(),
        two_stream,
    );

    let mut profile = FluxProfile::zeros(column.num_spec(), column.num_levels());
    calc_radiance_dn(weight, &props, &prepared.overlap, profile.flux_dn.view_mut());
    calc_radiance_up(
        weight,
        two_stream.surface_up(),
        &props,
        &prepared.overlap,
        profile.flux_up.view_mut(),
    );
    profile
}

/// Compute the flux profile neglecting scattering, from radiances.
///
/// The surface emission is spread across the regions of the lowest layer by
/// area, and surface reflection is neglected. A request for zero angles is
/// treated as one, since there is no two-stream solution to fall back on.
pub fn calc_no_scattering_flux(column: &Column, config: &FluxConfig) -> FluxOutputs {
    let n_angles = angle_count(config).max(1);
    debug!(
        "computing fluxes without scattering for {} spectral intervals, {} levels and {n_angles} angles per hemisphere",
        column.num_spec(),
        column.num_levels()
    );

    let prepared = Prepared::new(column, None, config);

    let lowest = prepared.layout.fracs().column(column.num_levels() - 1).to_owned();
    let surface_up = Array2::from_shape_fn(
        [column.num_spec(), prepared.layout.num_regions()],
        |(spec, region)| column.surf_emission[spec] * lowest[region],
    );

    let fluxes = QuadratureSet::new(n_angles).iter_flux().fold(
        FluxProfile::zeros(column.num_spec(), column.num_levels()),
        |total, (mu, weight)| {
            total + no_scattering_radiance_flux(mu, weight, column, &prepared, surface_up.view())
        },
    );

    FluxOutputs {
        fluxes,
        cloud_cover: prepared.cloud_cover,
        n_angles_per_hem: n_angles,
    }
}

/// Flux contribution of the radiances at zenith cosine `mu`, without
/// scattering.
fn no_scattering_radiance_flux(
    mu: f64,
    weight: f64,
    column: &Column,
    prepared: &Prepared,
    surface_up: ArrayView2<'_, f64>,
) -> FluxProfile {
    let props = calc_no_scattering_radiance_source(
        mu,
        &prepared.layout,
        column.planck_hl.view(),
        &prepared.optics.od,
    );

    let mut profile = FluxProfile::zeros(column.num_spec(), column.num_levels());
    calc_radiance_dn(weight, &props, &prepared.overlap, profile.flux_dn.view_mut());
    calc_radiance_up(
        weight,
        surface_up,
        &props,
        &prepared.overlap,
        profile.flux_up.view_mut(),
    );
    profile
}

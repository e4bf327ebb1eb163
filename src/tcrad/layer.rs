//! Radiative properties of individual homogeneous layers.
//!
//! Planck functions and sources are in W m⁻², i.e. the flux emitted by a
//! horizontal black body. Radiances are likewise "flux equivalent", π times
//! the radiance, so a set of them adds up to a flux with weights that sum to
//! 1. All sources are multiplied by the area fraction of their region, so
//! the fluxes in each region are per unit area of the whole gridbox.

use ndarray::{Array3, ArrayView2};

use super::{optics::RegionOptics, quadrature::LW_DIFFUSIVITY, region::RegionLayout, solver::TwoStreamFluxes};

/// Below this optical depth the Planck function is taken as constant across a
/// layer, avoiding the cancellation in the linear-in-optical-depth form.
const MIN_OD_FOR_PLANCK_GRADIENT: f64 = 1.0e-3;

/// Reflectance, transmittance and emission of each region in each layer, all
/// with shape (`num_spec`, `num_regions`, `num_levels`).
#[derive(Debug, Clone)]
pub struct LayerProperties {
    /// Diffuse reflectance
    pub reflectance: Array3<f64>,
    /// Diffuse transmittance
    pub transmittance: Array3<f64>,
    /// Rate of emission up from the top of the layer (W m⁻²)
    pub source_up: Array3<f64>,
    /// Rate of emission down through the base of the layer (W m⁻²)
    pub source_dn: Array3<f64>,
}

/// Transmittance and emission along a single zenith angle, with the same
/// shapes as [`LayerProperties`].
#[derive(Debug, Clone)]
pub struct RadianceProperties {
    /// Direct transmittance along the slant path
    pub transmittance: Array3<f64>,
    /// Upward radiance emitted (and scattered) out of the top of the layer
    pub source_up: Array3<f64>,
    /// Downward radiance emitted (and scattered) out of the base of the layer
    pub source_dn: Array3<f64>,
}

impl RadianceProperties {
    fn zeros(shape: (usize, usize, usize)) -> Self {
        Self {
            transmittance: Array3::zeros(shape),
            source_up: Array3::zeros(shape),
            source_dn: Array3::zeros(shape),
        }
    }
}

/// Two-stream reflectance, transmittance and sources of a layer.
///
/// `planck_hl` has shape (`num_spec`, `num_levels + 1`), and
/// `asymmetry_cloud` (`num_spec`, `num_levels`) applies to every cloudy region.
pub fn calc_reflectance_transmittance(
    layout: &RegionLayout,
    planck_hl: ArrayView2<'_, f64>,
    optics: &RegionOptics,
    asymmetry_cloud: ArrayView2<'_, f64>,
) -> LayerProperties {
    let shape = optics.od.dim();
    let mut props = LayerProperties {
        reflectance: Array3::zeros(shape),
        transmittance: Array3::zeros(shape),
        source_up: Array3::zeros(shape),
        source_dn: Array3::zeros(shape),
    };

    for ((spec, region, lev), &od) in optics.od.indexed_iter() {
        let ssa = optics.ssa(spec, region, lev);
        let g = if region > 0 {
            asymmetry_cloud[[spec, lev]]
        } else {
            0.0
        };
        let frac = layout.frac(region, lev);

        let layer = two_stream_layer(
            od,
            ssa,
            g,
            planck_hl[[spec, lev]],
            planck_hl[[spec, lev + 1]],
        );

        let index = [spec, region, lev];
        props.reflectance[index] = layer.reflectance;
        props.transmittance[index] = layer.transmittance;
        props.source_up[index] = frac * layer.source_up;
        props.source_dn[index] = frac * layer.source_dn;
    }

    props
}

/// Properties of a unit area of one homogeneous layer.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TwoStreamLayer {
    reflectance: f64,
    transmittance: f64,
    source_up: f64,
    source_dn: f64,
}

/// Longwave two-stream solution for a layer with optical depth `od`, single
/// scattering albedo `ssa` and asymmetry factor `g`, and with Planck fluxes
/// `planck_top` and `planck_base` at its boundaries.
///
/// The Planck function is assumed to vary linearly with optical depth.
fn two_stream_layer(od: f64, ssa: f64, g: f64, planck_top: f64, planck_base: f64) -> TwoStreamLayer {
    let gamma1 = LW_DIFFUSIVITY * (1.0 - 0.5 * ssa * (1.0 + g));
    let gamma2 = LW_DIFFUSIVITY * 0.5 * ssa * (1.0 - g);
    let k = f64::sqrt(((gamma1 - gamma2) * (gamma1 + gamma2)).max(1.0e-12));

    let exponential = f64::exp(-k * od);
    let exponential2 = exponential * exponential;
    let factor = 1.0 / (k + gamma1 + (k - gamma1) * exponential2);
    let reflectance = gamma2 * (1.0 - exponential2) * factor;
    let transmittance = 2.0 * k * exponential * factor;

    let (source_up, source_dn) = if od > MIN_OD_FOR_PLANCK_GRADIENT {
        let coeff = (planck_base - planck_top) / (od * (gamma1 + gamma2));
        let coeff_up_top = coeff + planck_top;
        let coeff_up_base = coeff + planck_base;
        let coeff_dn_top = -coeff + planck_top;
        let coeff_dn_base = -coeff + planck_base;
        (
            coeff_up_top - reflectance * coeff_dn_top - transmittance * coeff_up_base,
            coeff_dn_base - reflectance * coeff_up_base - transmittance * coeff_dn_top,
        )
    } else {
        let source = (1.0 - reflectance - transmittance) * 0.5 * (planck_top + planck_base);
        (source, source)
    };

    TwoStreamLayer {
        reflectance,
        transmittance,
        source_up,
        source_dn,
    }
}

/// Transmittance and sources along zenith cosine `mu` for a layer whose
/// source function varies linearly in optical depth between its top and
/// base values. Returns `(transmittance, source_up, source_dn)`.
fn slant_path(od: f64, mu: f64, up: [f64; 2], dn: [f64; 2]) -> (f64, f64, f64) {
    let transmittance = f64::exp(-od / mu);
    let ([up_top, up_base], [dn_top, dn_base]) = (up, dn);

    if od > MIN_OD_FOR_PLANCK_GRADIENT {
        let factor = mu * (1.0 - transmittance) / od;
        (
            transmittance,
            up_top - up_base * transmittance + (up_base - up_top) * factor,
            dn_base - dn_top * transmittance - (dn_base - dn_top) * factor,
        )
    } else {
        let emissivity = 1.0 - transmittance;
        (
            transmittance,
            emissivity * 0.5 * (up_top + up_base),
            emissivity * 0.5 * (dn_top + dn_base),
        )
    }
}

/// Radiance transmittance and sources along zenith cosine `mu`, including
/// radiation scattered out of the two-stream flux field.
///
/// The source function at each layer boundary is the thermal emission plus
/// the two-stream fluxes scattered into the direction of travel, with a
/// fraction `(1 - g) / 2` of each flux backscattered. It is assumed to vary
/// linearly with optical depth in between.
pub fn calc_radiance_source(
    mu: f64,
    layout: &RegionLayout,
    planck_hl: ArrayView2<'_, f64>,
    optics: &RegionOptics,
    asymmetry_cloud: ArrayView2<'_, f64>,
    fluxes: &TwoStreamFluxes,
) -> RadianceProperties {
    let mut props = RadianceProperties::zeros(optics.od.dim());

    for ((spec, region, lev), &od) in optics.od.indexed_iter() {
        let index = [spec, region, lev];
        let ssa = optics.ssa(spec, region, lev);
        let g = if region > 0 {
            asymmetry_cloud[[spec, lev]]
        } else {
            0.0
        };
        let frac = layout.frac(region, lev);
        let forward = 0.5 * (1.0 + g);
        let backward = 0.5 * (1.0 - g);

        let emission_top = (1.0 - ssa) * frac * planck_hl[[spec, lev]];
        let emission_base = (1.0 - ssa) * frac * planck_hl[[spec, lev + 1]];
        let (up_top, dn_top) = (fluxes.flux_up_top[index], fluxes.flux_dn_top[index]);
        let (up_base, dn_base) = (fluxes.flux_up_base[index], fluxes.flux_dn_base[index]);

        let up = [
            emission_top + ssa * (forward * up_top + backward * dn_top),
            emission_base + ssa * (forward * up_base + backward * dn_base),
        ];
        let dn = [
            emission_top + ssa * (forward * dn_top + backward * up_top),
            emission_base + ssa * (forward * dn_base + backward * up_base),
        ];

        let (transmittance, source_up, source_dn) = slant_path(od, mu, up, dn);
        props.transmittance[index] = transmittance;
        props.source_up[index] = source_up;
        props.source_dn[index] = source_dn;
    }

    props
}

/// Radiance transmittance and emission along zenith cosine `mu` for a
/// non-scattering atmosphere with combined optical depth `od`, shape
/// (`num_spec`, `num_regions`, `num_levels`).
pub fn calc_no_scattering_radiance_source(
    mu: f64,
    layout: &RegionLayout,
    planck_hl: ArrayView2<'_, f64>,
    od: &Array3<f64>,
) -> RadianceProperties {
    let mut props = RadianceProperties::zeros(od.dim());

    for ((spec, region, lev), &od) in od.indexed_iter() {
        let frac = layout.frac(region, lev);
        let top = frac * planck_hl[[spec, lev]];
        let base = frac * planck_hl[[spec, lev + 1]];

        let (transmittance, source_up, source_dn) = slant_path(od, mu, [top, base], [top, base]);
        let index = [spec, region, lev];
        props.transmittance[index] = transmittance;
        props.source_up[index] = source_up;
        props.source_dn[index] = source_dn;
    }

    props
}

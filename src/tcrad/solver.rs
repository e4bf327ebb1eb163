//! Integrate layer properties into flux profiles.
//!
//! Both the two-stream solver and the radiance accumulators work per region
//! and pass radiation between the regions of adjacent layers with the overlap
//! matrices. Radiation is never transported horizontally between regions
//! within a layer.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayViewMut2, Axis};

use super::{
    layer::{LayerProperties, RadianceProperties},
    overlap::OverlapMatrices,
};

/// Two-stream fluxes at the top and base of each layer in each region, all
/// with shape (`num_spec`, `num_regions`, `num_levels`), in W m⁻².
#[derive(Debug, Clone)]
pub struct TwoStreamFluxes {
    /// Upwelling flux at the base of each layer
    pub flux_up_base: Array3<f64>,
    /// Downwelling flux at the base of each layer
    pub flux_dn_base: Array3<f64>,
    /// Upwelling flux at the top of each layer
    pub flux_up_top: Array3<f64>,
    /// Downwelling flux at the top of each layer
    pub flux_dn_top: Array3<f64>,
}

impl TwoStreamFluxes {
    /// Upwelling flux in each region just above the surface, shape
    /// (`num_spec`, `num_regions`).
    pub fn surface_up(&self) -> ArrayView2<'_, f64> {
        let num_levels = self.flux_up_base.len_of(Axis(2));
        self.flux_up_base.index_axis(Axis(2), num_levels - 1)
    }
}

/// Pass a per-region quantity through an interface between two cloud-free
/// layers, where only the clear region carries anything.
fn clear_only(values: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut passed = Array1::<f64>::zeros(values.len());
    passed[0] = values[0];
    passed
}

/// Tripleclouds two-stream flux profile.
///
/// An upward sweep accumulates the total albedo of, and total upward emission
/// from, everything below the top of each layer; a downward sweep then
/// computes the fluxes from a zero top-of-atmosphere downward flux.
///
/// `surf_emission` and `surf_albedo` have one entry per spectral interval.
/// `cloud_free` comes from [`RegionLayout::cloud_free_layers`]; cloudy regions
/// of cloud-free layers are skipped.
///
/// [`RegionLayout::cloud_free_layers`]: super::region::RegionLayout::cloud_free_layers
pub fn calc_two_stream_flux(
    surf_emission: &[f64],
    surf_albedo: &[f64],
    layer: &LayerProperties,
    cloud_free: &[bool],
    overlap: &OverlapMatrices,
) -> TwoStreamFluxes {
    let shape = layer.reflectance.dim();
    let (num_spec, num_regions, num_levels) = shape;
    let mut fluxes = TwoStreamFluxes {
        flux_up_base: Array3::zeros(shape),
        flux_dn_base: Array3::zeros(shape),
        flux_up_top: Array3::zeros(shape),
        flux_dn_top: Array3::zeros(shape),
    };

    // Interface k lies between flags k and k + 1
    let both_clear = |k: usize| cloud_free[k] && cloud_free[k + 1];
    let is_skipped = |region: usize, lev: usize| region > 0 && cloud_free[lev + 1];

    for spec in 0..num_spec {
        let reflectance = layer.reflectance.index_axis(Axis(0), spec);
        let transmittance = layer.transmittance.index_axis(Axis(0), spec);
        let source_up = layer.source_up.index_axis(Axis(0), spec);
        let source_dn = layer.source_dn.index_axis(Axis(0), spec);

        // Albedo and upward emission of everything below the top and the base
        // of each layer, per region, shape (num_regions, num_levels)
        let mut total_albedo = Array2::<f64>::zeros([num_regions, num_levels]);
        let mut total_source = Array2::<f64>::zeros([num_regions, num_levels]);
        let mut albedo_below = Array2::<f64>::zeros([num_regions, num_levels]);
        let mut source_below = Array2::<f64>::zeros([num_regions, num_levels]);

        // The surface sits in the clear region of the dummy layer below
        let mut surface_albedo = Array1::<f64>::zeros(num_regions);
        let mut surface_source = Array1::<f64>::zeros(num_regions);
        surface_albedo[0] = surf_albedo[spec];
        surface_source[0] = surf_emission[spec];

        let mut below = (surface_albedo, surface_source);
        for lev in (0..num_levels).rev() {
            let k = lev + 1;
            let (albedo, source) = if both_clear(k) {
                (clear_only(below.0.view()), clear_only(below.1.view()))
            } else {
                (overlap.v(k).t().dot(&below.0), overlap.u(k).dot(&below.1))
            };
            albedo_below.column_mut(lev).assign(&albedo);
            source_below.column_mut(lev).assign(&source);

            for region in 0..num_regions {
                if is_skipped(region, lev) {
                    continue;
                }
                let index = [region, lev];
                let inv_denom = 1.0 / (1.0 - albedo[region] * reflectance[index]);
                total_albedo[index] = reflectance[index]
                    + transmittance[index].powi(2) * albedo[region] * inv_denom;
                total_source[index] = source_up[index]
                    + transmittance[index]
                        * (source[region] + albedo[region] * source_dn[index])
                        * inv_denom;
            }

            below = (
                total_albedo.column(lev).to_owned(),
                total_source.column(lev).to_owned(),
            );
        }

        // Nothing comes down through the top of the atmosphere
        let mut flux_dn_top: Array1<f64> = Array1::zeros(num_regions);
        for lev in 0..num_levels {
            let mut flux_dn_base = Array1::<f64>::zeros(num_regions);
            for region in 0..num_regions {
                if is_skipped(region, lev) {
                    continue;
                }
                let index = [region, lev];
                let out = [spec, region, lev];
                let albedo = albedo_below[index];
                let source = source_below[index];

                fluxes.flux_dn_top[out] = flux_dn_top[region];
                fluxes.flux_up_top[out] =
                    total_source[index] + total_albedo[index] * flux_dn_top[region];
                flux_dn_base[region] = (transmittance[index] * flux_dn_top[region]
                    + reflectance[index] * source
                    + source_dn[index])
                    / (1.0 - reflectance[index] * albedo);
                fluxes.flux_dn_base[out] = flux_dn_base[region];
                fluxes.flux_up_base[out] = source + albedo * flux_dn_base[region];
            }

            let k = lev + 1;
            flux_dn_top = if both_clear(k) {
                clear_only(flux_dn_base.view())
            } else {
                overlap.v(k).dot(&flux_dn_base)
            };
        }
    }

    fluxes
}

/// Add the downward flux from radiances at one angle into `flux_dn`.
///
/// The radiance at the top of the atmosphere is zero. Each half-level gets
/// `weight` times the radiance summed over regions. `flux_dn` has shape
/// (`num_spec`, `num_levels + 1`).
pub fn calc_radiance_dn(
    weight: f64,
    props: &RadianceProperties,
    overlap: &OverlapMatrices,
    mut flux_dn: ArrayViewMut2<'_, f64>,
) {
    let (num_spec, num_regions, num_levels) = props.transmittance.dim();

    for spec in 0..num_spec {
        let transmittance = props.transmittance.index_axis(Axis(0), spec);
        let source_dn = props.source_dn.index_axis(Axis(0), spec);

        let mut radiance_top = Array1::<f64>::zeros(num_regions);
        flux_dn[[spec, 0]] += weight * radiance_top.sum();

        for lev in 0..num_levels {
            let radiance_base = &transmittance.column(lev) * &radiance_top + source_dn.column(lev);
            flux_dn[[spec, lev + 1]] += weight * radiance_base.sum();
            if lev + 1 < num_levels {
                radiance_top = overlap.v(lev + 1).dot(&radiance_base);
            }
        }
    }
}

/// Add the upward flux from radiances at one angle into `flux_up`.
///
/// `surface_up` is the upward radiance in each region at the base of the
/// lowest layer, shape (`num_spec`, `num_regions`). `flux_up` has shape
/// (`num_spec`, `num_levels + 1`).
pub fn calc_radiance_up(
    weight: f64,
    surface_up: ArrayView2<'_, f64>,
    props: &RadianceProperties,
    overlap: &OverlapMatrices,
    mut flux_up: ArrayViewMut2<'_, f64>,
) {
    let (num_spec, _, num_levels) = props.transmittance.dim();

    for spec in 0..num_spec {
        let transmittance = props.transmittance.index_axis(Axis(0), spec);
        let source_up = props.source_up.index_axis(Axis(0), spec);

        let mut radiance_base = surface_up.row(spec).to_owned();
        flux_up[[spec, num_levels]] += weight * radiance_base.sum();

        for lev in (0..num_levels).rev() {
            let radiance_top = &transmittance.column(lev) * &radiance_base + source_up.column(lev);
            flux_up[[spec, lev]] += weight * radiance_top.sum();
            if lev > 0 {
                radiance_base = overlap.u(lev).dot(&radiance_top);
            }
        }
    }
}

/// Sum the two-stream region fluxes into half-level profiles, returning
/// `(flux_up, flux_dn)` with shape (`num_spec`, `num_levels + 1`).
pub fn sum_regions(fluxes: &TwoStreamFluxes) -> (Array2<f64>, Array2<f64>) {
    let (num_spec, _, num_levels) = fluxes.flux_up_top.dim();
    let mut flux_up = Array2::<f64>::zeros([num_spec, num_levels + 1]);
    let mut flux_dn = Array2::<f64>::zeros([num_spec, num_levels + 1]);

    flux_up
        .slice_mut(s![.., ..num_levels])
        .assign(&fluxes.flux_up_top.sum_axis(Axis(1)));
    flux_dn
        .slice_mut(s![.., ..num_levels])
        .assign(&fluxes.flux_dn_top.sum_axis(Axis(1)));
    flux_up
        .column_mut(num_levels)
        .assign(&fluxes.surface_up().sum_axis(Axis(1)));
    flux_dn.column_mut(num_levels).assign(
        &fluxes
            .flux_dn_base
            .index_axis(Axis(2), num_levels - 1)
            .sum_axis(Axis(1)),
    );

    (flux_up, flux_dn)
}

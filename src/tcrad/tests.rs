use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{array, Array2};

use super::quadrature::{QuadratureSet, LW_DIFFUSIVITY, MAX_GAUSS_LEGENDRE_POINTS};
use super::region::{RegionScheme, SubgridDistribution};
use super::*;

const LOGNORMAL: RegionScheme = RegionScheme::Tripleclouds(SubgridDistribution::Lognormal);

/// Three layers with a cloud in the middle one and a warming profile.
fn middle_cloud_column() -> Column {
    Column::new(
        &[300.0],
        &[0.0],
        array![[150.0, 180.0, 220.0, 260.0]].view(),
        &[0.0, 0.8, 0.0],
        Some(&[0.0, 0.5, 0.0]),
        array![[0.1, 0.1, 0.1]].view(),
        array![[0.0, 5.0, 0.0]].view(),
        &[0.0, 0.0],
    )
    .unwrap()
}

fn clear_column(od: &[f64], planck_hl: &[f64], surf_emission: f64) -> Column {
    let num_levels = od.len();
    Column::new(
        &[surf_emission],
        &[0.0],
        Array2::from_shape_vec([1, num_levels + 1], planck_hl.to_vec())
            .unwrap()
            .view(),
        &vec![0.0; num_levels],
        None,
        Array2::from_shape_vec([1, num_levels], od.to_vec())
            .unwrap()
            .view(),
        Array2::<f64>::zeros([1, num_levels]).view(),
        &vec![0.5; num_levels - 1],
    )
    .unwrap()
}

fn no_scattering(column: &Column) -> CloudScattering {
    let zeros = Array2::<f64>::zeros([column.num_spec(), column.num_levels()]);
    CloudScattering::new(column, zeros.view(), zeros.view()).unwrap()
}

fn assert_profiles_close(a: &FluxProfile, b: &FluxProfile, epsilon: f64) {
    for (x, y) in a.flux_up.iter().zip(&b.flux_up) {
        assert_abs_diff_eq!(x, y, epsilon = epsilon);
    }
    for (x, y) in a.flux_dn.iter().zip(&b.flux_dn) {
        assert_abs_diff_eq!(x, y, epsilon = epsilon);
    }
}

#[test]
fn inconsistent_shapes_are_rejected() {
    let planck = array![[1.0, 1.0, 1.0]];
    let od = array![[0.1, 0.1]];

    // Wrong number of overlap parameters
    let err = Column::new(&[1.0], &[0.0], planck.view(), &[0.0, 0.0], None, od.view(), od.view(), &[])
        .unwrap_err();
    assert_eq!(err, TcradError::InconsistentInputs);

    // Planck function on levels instead of half-levels
    assert!(Column::new(&[1.0], &[0.0], od.view(), &[0.0, 0.0], None, od.view(), od.view(), &[0.5])
        .is_err());

    // Fractional standard deviation too short
    assert!(Column::new(
        &[1.0],
        &[0.0],
        planck.view(),
        &[0.0, 0.0],
        Some(&[1.0]),
        od.view(),
        od.view(),
        &[0.5]
    )
    .is_err());

    // No spectral intervals
    assert!(Column::new(&[], &[], planck.view(), &[0.0, 0.0], None, od.view(), od.view(), &[0.5])
        .is_err());

    let column = Column::new(&[1.0], &[0.0], planck.view(), &[0.0, 0.0], None, od.view(), od.view(), &[0.5])
        .unwrap();
    assert!(CloudScattering::new(&column, planck.view(), od.view()).is_err());
}

#[test]
fn default_angle_counts_differ() {
    assert_eq!(FluxConfig::default().n_angles_per_hem, 0);
    assert_eq!(FluxConfig::scattering().n_angles_per_hem, 0);
    assert_eq!(FluxConfig::no_scattering().n_angles_per_hem, 1);
    assert!(!FluxConfig::no_scattering().do_3d_effects);
    assert!(!FluxConfig::no_scattering().want_cloud_cover);
    assert_eq!(
        FluxConfig::scattering().regions,
        RegionScheme::Tripleclouds(SubgridDistribution::Gamma)
    );

    let column = middle_cloud_column();
    let outputs = calc_no_scattering_flux(&column, &FluxConfig::no_scattering());
    assert_eq!(outputs.n_angles_per_hem, 1);
    let outputs = calc_flux(&column, &no_scattering(&column), &FluxConfig::scattering());
    assert_eq!(outputs.n_angles_per_hem, 0);
}

#[test]
fn excess_angles_are_clamped() {
    let column = middle_cloud_column();
    let config = FluxConfig::scattering().with_angles(100);
    let outputs = calc_flux(&column, &no_scattering(&column), &config);
    assert_eq!(outputs.n_angles_per_hem, MAX_GAUSS_LEGENDRE_POINTS);

    let clamped = calc_flux(
        &column,
        &no_scattering(&column),
        &FluxConfig::scattering().with_angles(MAX_GAUSS_LEGENDRE_POINTS),
    );
    assert_eq!(outputs.fluxes, clamped.fluxes);
}

#[test]
fn clear_sky_matches_hand_calculation() {
    // Two isothermal layers over a black surface, with a single radiance at
    // the diffusivity angle
    let (od_top, od_bottom) = (0.3, 1.2);
    let (b_top, b_bottom) = (200.0, 280.0);
    let surf = 400.0;
    let column = clear_column(&[od_top, od_bottom], &[b_top, b_top, b_bottom], surf);
    // The top layer is isothermal and the lower one warms downwards
    let outputs = calc_no_scattering_flux(&column, &FluxConfig::no_scattering());
    let (flux_up, flux_dn) = (&outputs.fluxes.flux_up, &outputs.fluxes.flux_dn);

    let t_top = f64::exp(-LW_DIFFUSIVITY * od_top);
    let t_bottom = f64::exp(-LW_DIFFUSIVITY * od_bottom);
    // Emission of a layer whose Planck flux varies linearly in optical depth
    let gradient = (b_bottom - b_top) * (1.0 - t_bottom) / (LW_DIFFUSIVITY * od_bottom);
    let bottom_up = b_top - b_bottom * t_bottom + gradient;
    let bottom_dn = b_bottom - b_top * t_bottom - gradient;

    assert_abs_diff_eq!(flux_dn[[0, 0]], 0.0);
    assert_abs_diff_eq!(flux_dn[[0, 1]], b_top * (1.0 - t_top), epsilon = 1e-10);
    assert_abs_diff_eq!(
        flux_dn[[0, 2]],
        flux_dn[[0, 1]] * t_bottom + bottom_dn,
        epsilon = 1e-10
    );
    assert_abs_diff_eq!(flux_up[[0, 2]], surf, epsilon = 1e-10);
    assert_abs_diff_eq!(flux_up[[0, 1]], surf * t_bottom + bottom_up, epsilon = 1e-10);
    assert_abs_diff_eq!(
        flux_up[[0, 0]],
        flux_up[[0, 1]] * t_top + b_top * (1.0 - t_top),
        epsilon = 1e-10
    );
}

#[test]
fn two_stream_and_diffusivity_radiance_agree_for_clear_sky() {
    let column = clear_column(&[0.05, 0.4, 2.0], &[120.0, 170.0, 230.0, 290.0], 390.0);
    let scattering = no_scattering(&column);

    let two_stream = calc_flux(&column, &scattering, &FluxConfig::scattering());
    let single_angle = calc_flux(&column, &scattering, &FluxConfig::scattering().with_angles(1));
    let no_scat = calc_no_scattering_flux(&column, &FluxConfig::no_scattering());

    for (a, b) in two_stream
        .fluxes
        .flux_up
        .iter()
        .chain(&two_stream.fluxes.flux_dn)
        .zip(single_angle.fluxes.flux_up.iter().chain(&single_angle.fluxes.flux_dn))
    {
        assert_relative_eq!(a, b, max_relative = 1e-6, epsilon = 1e-9);
    }
    assert_profiles_close(&single_angle.fluxes, &no_scat.fluxes, 1e-9);
}

#[test]
fn gauss_legendre_angles_stay_close_to_two_stream() {
    let column = clear_column(&[0.05, 0.4, 2.0], &[120.0, 170.0, 230.0, 290.0], 390.0);
    let two_stream = calc_no_scattering_flux(&column, &FluxConfig::no_scattering());
    let quadrature = calc_no_scattering_flux(&column, &FluxConfig::no_scattering().with_angles(4));
    assert_eq!(quadrature.n_angles_per_hem, 4);

    for (a, b) in two_stream.fluxes.flux_up.iter().zip(&quadrature.fluxes.flux_up) {
        assert_relative_eq!(a, b, max_relative = 0.1);
    }
    // The diffusivity approximation is poor below optically thin layers, so
    // skip the top two half-levels
    for (a, b) in two_stream.fluxes.flux_dn.iter().zip(&quadrature.fluxes.flux_dn).skip(2) {
        assert_relative_eq!(a, b, max_relative = 0.1);
    }
}

#[test]
fn zero_angles_without_scattering_uses_one() {
    let column = middle_cloud_column();
    let zero = calc_no_scattering_flux(&column, &FluxConfig::no_scattering().with_angles(0));
    let one = calc_no_scattering_flux(&column, &FluxConfig::no_scattering());
    assert_eq!(zero.n_angles_per_hem, 1);
    assert_eq!(zero.fluxes, one.fluxes);
}

#[test]
fn middle_cloud_scenario() {
    let column = middle_cloud_column();
    let config = FluxConfig::no_scattering()
        .with_regions(LOGNORMAL)
        .with_cloud_cover();

    let layout = config.regions.partition(
        &column.cloud_fraction,
        &column.fractional_std,
        config.cloud_fraction_threshold,
    );
    assert!(layout.frac(1, 1) > 0.0 && layout.frac(2, 1) > 0.0);
    assert_abs_diff_eq!(
        layout.frac(0, 1) + layout.frac(1, 1) + layout.frac(2, 1),
        1.0,
        epsilon = 1e-12
    );
    let mean_scaling =
        (layout.frac(1, 1) * layout.od_scaling(1, 1) + layout.frac(2, 1) * layout.od_scaling(2, 1))
            / 0.8;
    assert_relative_eq!(mean_scaling, 1.0, epsilon = 1e-12);
    assert_eq!(layout.frac(0, 0), 1.0);
    assert_eq!(layout.frac(0, 2), 1.0);

    let outputs = calc_no_scattering_flux(&column, &config);
    let (_, flux_dn) = outputs.broadband();
    assert!(
        flux_dn.windows(2).all(|w| w[1] > w[0]),
        "downwelling flux not increasing towards the surface: {flux_dn:?}"
    );
    assert_abs_diff_eq!(outputs.cloud_cover.unwrap(), 0.8, epsilon = 1e-12);

    // The cloud is much more emissive than the clear layer it replaces
    let clear = clear_column(&[0.1, 0.1, 0.1], &[150.0, 180.0, 220.0, 260.0], 300.0);
    let clear_outputs = calc_no_scattering_flux(&clear, &FluxConfig::no_scattering());
    assert!(outputs.fluxes.flux_dn[[0, 3]] > clear_outputs.fluxes.flux_dn[[0, 3]]);
    assert!(outputs.fluxes.flux_up[[0, 0]] < clear_outputs.fluxes.flux_up[[0, 0]]);
}

#[test]
fn cloud_cover_only_when_requested() {
    let column = middle_cloud_column();
    let outputs = calc_flux(&column, &no_scattering(&column), &FluxConfig::scattering());
    assert!(outputs.cloud_cover.is_none());
}

#[test]
fn fluxes_are_non_negative_with_scattering() {
    let column = middle_cloud_column();
    let scattering = CloudScattering::new(
        &column,
        array![[0.0, 0.6, 0.0]].view(),
        array![[0.0, 0.8, 0.0]].view(),
    )
    .unwrap();

    for regions in [
        RegionScheme::Doubleclouds,
        LOGNORMAL,
        RegionScheme::Tripleclouds(SubgridDistribution::Gamma),
    ] {
        for n_angles in [0, 1, 2, 3] {
            let config = FluxConfig::scattering()
                .with_regions(regions)
                .with_angles(n_angles);
            let outputs = calc_flux(&column, &scattering, &config);
            assert!(outputs.fluxes.flux_up.iter().all(|&f| f >= 0.0));
            assert!(outputs.fluxes.flux_dn.iter().all(|&f| f >= 0.0));
            assert_eq!(outputs.fluxes.flux_dn[[0, 0]], 0.0);
        }
    }
}

#[test]
fn forward_scattering_cloud_lets_surface_emission_through() {
    // A strongly forward scattering cloud transmits much of the warm surface
    // emission, while an absorbing one of the same extinction is opaque
    let column = middle_cloud_column();
    let absorbing = calc_flux(&column, &no_scattering(&column), &FluxConfig::scattering());
    let scattering = CloudScattering::new(
        &column,
        array![[0.0, 0.99, 0.0]].view(),
        array![[0.0, 0.9, 0.0]].view(),
    )
    .unwrap();
    let scattering = calc_flux(&column, &scattering, &FluxConfig::scattering());
    assert!(scattering.fluxes.flux_up[[0, 0]] > absorbing.fluxes.flux_up[[0, 0]]);
}

#[test]
fn quadrature_is_a_sum_of_independent_angles() {
    let column = middle_cloud_column();
    let scattering = CloudScattering::new(
        &column,
        array![[0.0, 0.5, 0.0]].view(),
        array![[0.0, 0.7, 0.0]].view(),
    )
    .unwrap();
    let config = FluxConfig::scattering().with_angles(3);
    let outputs = calc_flux(&column, &scattering, &config);

    // Recompute each angle on its own and add them up in reverse order
    let prepared = Prepared::new(&column, Some(scattering.ssa_cloud.view()), &config);
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
        &prepared.layout.cloud_free_layers(),
        &prepared.overlap,
    );
    let angles: Vec<_> = QuadratureSet::new(3).iter_flux().collect();
    let total = angles
        .iter()
        .rev()
        .map(|&(mu, weight)| {
            scattering_radiance_flux(mu, weight, &column, &scattering, &prepared, &two_stream)
        })
        .fold(FluxProfile::zeros(1, 3), |total, profile| total + profile);

    assert_profiles_close(&total, &outputs.fluxes, 1e-9);
}

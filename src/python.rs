//! Python interface for computing fluxes over many columns at once.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use log::{debug, info};
use ndarray::{Array1, Array3, ArrayView2, ArrayView3, Axis};
use numpy::{PyArray1, PyArray3, PyReadonlyArray2, PyReadonlyArray3, ToPyArray};
use pyo3::exceptions::{PyKeyboardInterrupt, PyValueError};
use pyo3::prelude::*;
use rayon::prelude::*;

use crate::error::TcradError;
use crate::tcrad::{
    self,
    region::{RegionScheme, SubgridDistribution},
    CloudScattering, Column, FluxConfig, FluxOutputs,
};

impl From<TcradError> for PyErr {
    fn from(e: TcradError) -> Self {
        match e {
            TcradError::InconsistentInputs
            | TcradError::UnsupportedRegionCount(_)
            | TcradError::UnknownDistribution(_)
            | TcradError::NotContiguous => PyValueError::new_err(e.to_string()),
            TcradError::Cancelled => PyKeyboardInterrupt::new_err(e.to_string()),
        }
    }
}

/// Flux profiles for a batch of columns.
///
/// Fluxes are dimensioned as (`num_columns`, `num_spec`, `num_levels + 1`)
/// and are in W/m². The total cloud cover has shape (`num_columns`, ), and is
/// `None` unless it was requested.
#[pyclass]
struct FluxResults {
    flux_up: Array3<f64>,
    flux_dn: Array3<f64>,
    cloud_cover: Option<Array1<f64>>,
    n_angles_per_hem: usize,
}

/// Implement all the "getters" for the Python properties
#[pymethods]
impl FluxResults {
    #[getter]
    fn flux_up<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray3<f64>> {
        self.flux_up.to_pyarray(py)
    }

    #[getter]
    fn flux_dn<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray3<f64>> {
        self.flux_dn.to_pyarray(py)
    }

    #[getter]
    fn cloud_cover<'py>(&self, py: Python<'py>) -> Option<Bound<'py, PyArray1<f64>>> {
        self.cloud_cover.as_ref().map(|cover| cover.to_pyarray(py))
    }

    /// Number of angles per hemisphere actually used
    #[getter]
    fn n_angles_per_hem(&self) -> usize {
        self.n_angles_per_hem
    }
}

impl FluxResults {
    /// Gather the per-column outputs, which must all have the same shape.
    fn collect(
        shape: [usize; 3],
        want_cloud_cover: bool,
        n_angles_per_hem: usize,
        results: Vec<Result<FluxOutputs, TcradError>>,
    ) -> Result<Self, TcradError> {
        let mut output = Self {
            flux_up: Array3::zeros(shape),
            flux_dn: Array3::zeros(shape),
            cloud_cover: want_cloud_cover.then(|| Array1::zeros(shape[0])),
            n_angles_per_hem,
        };

        for (index, column_output) in results.into_iter().enumerate() {
            let FluxOutputs {
                fluxes, cloud_cover, ..
            } = column_output?;

            output
                .flux_up
                .index_axis_mut(Axis(0), index)
                .assign(&fluxes.flux_up);
            output
                .flux_dn
                .index_axis_mut(Axis(0), index)
                .assign(&fluxes.flux_dn);
            if let (Some(covers), Some(cover)) = (output.cloud_cover.as_mut(), cloud_cover) {
                covers[index] = cover;
            }
        }

        Ok(output)
    }
}

/// Borrowed inputs shared by both flux functions, each with a leading column
/// axis.
struct ColumnArrays<'a> {
    surf_emission: ArrayView2<'a, f64>,
    surf_albedo: ArrayView2<'a, f64>,
    planck_hl: ArrayView3<'a, f64>,
    cloud_fraction: ArrayView2<'a, f64>,
    fractional_std: Option<ArrayView2<'a, f64>>,
    od_clear: ArrayView3<'a, f64>,
    od_cloud: ArrayView3<'a, f64>,
    overlap_param: ArrayView2<'a, f64>,
}

impl ColumnArrays<'_> {
    fn num_columns(&self) -> usize {
        self.cloud_fraction.len_of(Axis(0))
    }

    /// Output shape: (`num_columns`, `num_spec`, `num_levels + 1`)
    fn output_shape(&self) -> [usize; 3] {
        let (num_columns, num_spec, num_half_levels) = self.planck_hl.dim();
        [num_columns, num_spec, num_half_levels]
    }

    /// Every array must have the same number of columns. The other dimensions
    /// are checked by [`Column::new`].
    fn check_columns(&self) -> Result<(), TcradError> {
        let num_columns = self.num_columns();
        let leading = [
            self.surf_emission.len_of(Axis(0)),
            self.surf_albedo.len_of(Axis(0)),
            self.planck_hl.len_of(Axis(0)),
            self.od_clear.len_of(Axis(0)),
            self.od_cloud.len_of(Axis(0)),
            self.overlap_param.len_of(Axis(0)),
        ];
        if leading.iter().any(|&n| n != num_columns)
            || self
                .fractional_std
                .is_some_and(|fsd| fsd.len_of(Axis(0)) != num_columns)
        {
            return Err(TcradError::InconsistentInputs);
        }
        Ok(())
    }

    fn column(&self, index: usize) -> Result<Column, TcradError> {
        let fractional_std = self
            .fractional_std
            .map(|fsd| row(fsd, index))
            .transpose()?;
        Column::new(
            row(self.surf_emission, index)?,
            row(self.surf_albedo, index)?,
            self.planck_hl.index_axis(Axis(0), index),
            row(self.cloud_fraction, index)?,
            fractional_std,
            self.od_clear.index_axis(Axis(0), index),
            self.od_cloud.index_axis(Axis(0), index),
            row(self.overlap_param, index)?,
        )
    }
}

fn row<'a>(array: ArrayView2<'a, f64>, index: usize) -> Result<&'a [f64], TcradError> {
    array
        .index_axis_move(Axis(0), index)
        .to_slice()
        .ok_or(TcradError::NotContiguous)
}

/// Build the configuration from the Python keyword arguments.
fn flux_config(
    defaults: FluxConfig,
    n_angles_per_hem: Option<usize>,
    num_regions: usize,
    distribution: &str,
    do_3d_effects: bool,
    cloud_cover: bool,
) -> Result<FluxConfig, TcradError> {
    let distribution: SubgridDistribution = distribution.parse()?;
    Ok(FluxConfig {
        n_angles_per_hem: n_angles_per_hem.unwrap_or(defaults.n_angles_per_hem),
        do_3d_effects,
        want_cloud_cover: cloud_cover,
        regions: RegionScheme::from_count(num_regions, distribution)?,
        ..defaults
    })
}

/// Run `compute` for every column on a thread pool, while the calling thread
/// reports progress and watches for Python signals.
fn run_columns<F>(
    py: Python<'_>,
    num_columns: usize,
    num_threads: Option<usize>,
    compute: F,
) -> PyResult<Vec<Result<FluxOutputs, TcradError>>>
where
    F: Fn(usize) -> Result<FluxOutputs, TcradError> + Sync,
{
    let mut results = Vec::new();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads.unwrap_or(0))
        .build()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    // These atomics keep track of how many columns have finished and whether
    // it's time to cancel the computation or not
    let num_completed = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);

    info!("Computing fluxes for {num_columns} columns");

    pool.in_place_scope(|s| -> Result<(), PyErr> {
        s.spawn(|_| {
            (0..num_columns)
                .into_par_iter()
                .map(|index| {
                    if cancelled.load(Ordering::Relaxed) {
                        return Err(TcradError::Cancelled);
                    }
                    compute(index)
                })
                .inspect(|_| {
                    num_completed.fetch_add(1, Ordering::Relaxed);
                })
                .collect_into_vec(&mut results);
        });

        // The work is done in the thread pool, but back here in the main
        // thread, handle progress reporting and checking for early
        // cancellation
        while !cancelled.load(Ordering::Relaxed) {
            if let Err(e) = py.check_signals() {
                cancelled.store(true, Ordering::Relaxed);
                return Err(e);
            }

            let num_completed = num_completed.load(Ordering::Relaxed);
            let progress = num_completed as f32 / num_columns.max(1) as f32 * 100.;
            info!("Completed fluxes for {num_completed}/{num_columns} columns ({progress:0.2}%)");

            // All finished without cancelling early
            if num_completed == num_columns {
                break;
            }

            py.allow_threads(|| {
                std::thread::sleep(Duration::from_secs(1));
            });
        }

        Ok(())
    })?;

    Ok(results)
}

/// Compute longwave fluxes including scattering.
///
/// The inputs are numpy arrays with a leading axis over `num_columns`
/// independent columns. Levels count down from the top of the atmosphere.
///
/// The following have shape (`num_columns`, `num_spec`):
///
/// `surf_emission`: surface emission in W/m²
///
/// `surf_albedo`: surface albedo
///
/// The following have shape (`num_columns`, `num_levels`):
///
/// `cloud_fraction`: cloud fraction
///
/// `fractional_std`: fractional standard deviation of in-cloud water content,
/// or `None` for homogeneous cloud
///
/// The following have shape (`num_columns`, `num_spec`, `num_levels`):
///
/// `od_clear`: gas and aerosol optical depth
///
/// `od_cloud`: in-cloud optical depth
///
/// `ssa_cloud`: cloud single scattering albedo
///
/// `asymmetry_cloud`: cloud asymmetry factor
///
/// `planck_hl` is the Planck function at half-levels in W/m², with shape
/// (`num_columns`, `num_spec`, `num_levels + 1`), and `overlap_param` is the
/// overlap parameter between adjacent layers, with shape (`num_columns`,
/// `num_levels - 1`).
///
/// `n_angles_per_hem` defaults to 0, meaning that the two-stream fluxes are
/// returned; otherwise radiances are computed at that many angles per
/// hemisphere. `num_regions` is 3 (Tripleclouds, with a "gamma" or
/// "lognormal" `distribution`) or 2 (Doubleclouds).
///
/// The number of worker threads is controlled by `num_threads`. It must be a
/// positive integer, or `None` to automatically choose the number of threads.
#[pyfunction]
#[pyo3(signature = (surf_emission, surf_albedo, planck_hl, cloud_fraction, fractional_std, od_clear, od_cloud, ssa_cloud, asymmetry_cloud, overlap_param, n_angles_per_hem=None, num_regions=3, distribution="gamma", do_3d_effects=false, cloud_cover=false, num_threads=None))]
#[allow(clippy::too_many_arguments)]
fn calc_flux(
    py: Python<'_>,
    surf_emission: PyReadonlyArray2<'_, f64>,
    surf_albedo: PyReadonlyArray2<'_, f64>,
    planck_hl: PyReadonlyArray3<'_, f64>,
    cloud_fraction: PyReadonlyArray2<'_, f64>,
    fractional_std: Option<PyReadonlyArray2<'_, f64>>,
    od_clear: PyReadonlyArray3<'_, f64>,
    od_cloud: PyReadonlyArray3<'_, f64>,
    ssa_cloud: PyReadonlyArray3<'_, f64>,
    asymmetry_cloud: PyReadonlyArray3<'_, f64>,
    overlap_param: PyReadonlyArray2<'_, f64>,
    n_angles_per_hem: Option<usize>,
    num_regions: usize,
    distribution: &str,
    do_3d_effects: bool,
    cloud_cover: bool,
    num_threads: Option<usize>,
) -> PyResult<FluxResults> {
    let config = flux_config(
        FluxConfig::scattering(),
        n_angles_per_hem,
        num_regions,
        distribution,
        do_3d_effects,
        cloud_cover,
    )?;

    let arrays = ColumnArrays {
        surf_emission: surf_emission.as_array(),
        surf_albedo: surf_albedo.as_array(),
        planck_hl: planck_hl.as_array(),
        cloud_fraction: cloud_fraction.as_array(),
        fractional_std: fractional_std.as_ref().map(|fsd| fsd.as_array()),
        od_clear: od_clear.as_array(),
        od_cloud: od_cloud.as_array(),
        overlap_param: overlap_param.as_array(),
    };
    let ssa_cloud = ssa_cloud.as_array();
    let asymmetry_cloud = asymmetry_cloud.as_array();

    arrays.check_columns()?;
    let num_columns = arrays.num_columns();
    if ssa_cloud.len_of(Axis(0)) != num_columns || asymmetry_cloud.len_of(Axis(0)) != num_columns
    {
        return Err(TcradError::InconsistentInputs.into());
    }
    debug!("input shapes are consistent");

    let results = run_columns(py, num_columns, num_threads, |index| {
        let column = arrays.column(index)?;
        let scattering = CloudScattering::new(
            &column,
            ssa_cloud.index_axis(Axis(0), index),
            asymmetry_cloud.index_axis(Axis(0), index),
        )?;
        Ok(tcrad::calc_flux(&column, &scattering, &config))
    })?;

    debug!("copying flux output");
    let n_angles = tcrad::quadrature::effective_angle_count(config.n_angles_per_hem);
    Ok(FluxResults::collect(
        arrays.output_shape(),
        config.want_cloud_cover,
        n_angles,
        results,
    )?)
}

/// Compute longwave fluxes neglecting scattering.
///
/// The inputs are as for `calc_flux`, without `ssa_cloud` and
/// `asymmetry_cloud`. `n_angles_per_hem` defaults to 1, a single radiance at
/// the diffusivity angle, and can't be less than 1.
#[pyfunction]
#[pyo3(signature = (surf_emission, surf_albedo, planck_hl, cloud_fraction, fractional_std, od_clear, od_cloud, overlap_param, n_angles_per_hem=None, num_regions=3, distribution="gamma", do_3d_effects=false, cloud_cover=false, num_threads=None))]
#[allow(clippy::too_many_arguments)]
fn calc_no_scattering_flux(
    py: Python<'_>,
    surf_emission: PyReadonlyArray2<'_, f64>,
    surf_albedo: PyReadonlyArray2<'_, f64>,
    planck_hl: PyReadonlyArray3<'_, f64>,
    cloud_fraction: PyReadonlyArray2<'_, f64>,
    fractional_std: Option<PyReadonlyArray2<'_, f64>>,
    od_clear: PyReadonlyArray3<'_, f64>,
    od_cloud: PyReadonlyArray3<'_, f64>,
    overlap_param: PyReadonlyArray2<'_, f64>,
    n_angles_per_hem: Option<usize>,
    num_regions: usize,
    distribution: &str,
    do_3d_effects: bool,
    cloud_cover: bool,
    num_threads: Option<usize>,
) -> PyResult<FluxResults> {
    let config = flux_config(
        FluxConfig::no_scattering(),
        n_angles_per_hem,
        num_regions,
        distribution,
        do_3d_effects,
        cloud_cover,
    )?;

    let arrays = ColumnArrays {
        surf_emission: surf_emission.as_array(),
        surf_albedo: surf_albedo.as_array(),
        planck_hl: planck_hl.as_array(),
        cloud_fraction: cloud_fraction.as_array(),
        fractional_std: fractional_std.as_ref().map(|fsd| fsd.as_array()),
        od_clear: od_clear.as_array(),
        od_cloud: od_cloud.as_array(),
        overlap_param: overlap_param.as_array(),
    };
    arrays.check_columns()?;
    debug!("input shapes are consistent");

    let results = run_columns(py, arrays.num_columns(), num_threads, |index| {
        let column = arrays.column(index)?;
        Ok(tcrad::calc_no_scattering_flux(&column, &config))
    })?;

    debug!("copying flux output");
    let n_angles = tcrad::quadrature::effective_angle_count(config.n_angles_per_hem).max(1);
    Ok(FluxResults::collect(
        arrays.output_shape(),
        config.want_cloud_cover,
        n_angles,
        results,
    )?)
}

/// A Python module implemented in Rust.
#[pymodule]
fn rss_tripleclouds_lw(m: &Bound<'_, PyModule>) -> PyResult<()> {
    pyo3_log::init();

    m.add_function(wrap_pyfunction!(calc_flux, m)?)?;
    m.add_function(wrap_pyfunction!(calc_no_scattering_flux, m)?)?;
    m.add_class::<FluxResults>()?;
    Ok(())
}

//! Radial finite-volume discretization of the particles.
//!
//! Shells are indexed outer to inner and cover `[R_core, R]` without
//! overlap. Each shell carries its thickness, centroid radius and the
//! `3 r^2 / volume` surface-to-volume ratios of its outer and inner face.
//! Geometry is computed in dual arithmetic so that sensitivities with
//! respect to `PAR_RADIUS` and `PAR_CORERADIUS` propagate when those are
//! active parameters.

use crate::scalar::Active;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticleDiscretizationMode {
    Equidistant,
    Equivolume,
    UserDefined,
}

/// Per-shell geometry of all particle types, stored flat; the block of type
/// `t` starts at `n_par_cells_before_type[t]`.
#[derive(Debug, Clone, Default)]
pub struct ParticleGeometry {
    pub cell_size: Vec<Active>,
    pub center_radius: Vec<Active>,
    pub outer_surf_area_per_volume: Vec<Active>,
    pub inner_surf_area_per_volume: Vec<Active>,
}

impl ParticleGeometry {
    pub fn new(total_cells: usize) -> Self {
        Self {
            cell_size: vec![Active::new(0.0); total_cells],
            center_radius: vec![Active::new(0.0); total_cells],
            outer_surf_area_per_volume: vec![Active::new(0.0); total_cells],
            inner_surf_area_per_volume: vec![Active::new(0.0); total_cells],
        }
    }
}

/// Equidistant shells of thickness `(R - R_core) / n_cells`.
pub fn set_equidistant_radial_disc(
    geo: &mut ParticleGeometry,
    offset: usize,
    n_cells: usize,
    radius: &Active,
    core_radius: &Active,
) {
    let dr = (radius - core_radius) / n_cells as f64;
    for cell in 0..n_cells {
        let r_out = radius - &dr * cell as f64;
        let r_in = radius - &dr * (cell + 1) as f64;
        let vol = r_out.powi(3) - r_in.powi(3);

        geo.cell_size[offset + cell] = dr.clone();
        geo.center_radius[offset + cell] = radius - &dr * (0.5 + cell as f64);
        geo.outer_surf_area_per_volume[offset + cell] = 3.0 * r_out.powi(2) / &vol;
        geo.inner_surf_area_per_volume[offset + cell] = 3.0 * r_in.powi(2) / &vol;
    }
}

/// Shells of equal volume; inner radii follow from
/// `r_in = (r_out^3 - V)^(1/3)` with the innermost interface clamped to the
/// core radius.
pub fn set_equivolume_radial_disc(
    geo: &mut ParticleGeometry,
    offset: usize,
    n_cells: usize,
    radius: &Active,
    core_radius: &Active,
) {
    let volume_per_shell = (radius.powi(3) - core_radius.powi(3)) / n_cells as f64;
    let mut r_out = radius.clone();
    for cell in 0..n_cells {
        let r_in = if cell != n_cells - 1 {
            (r_out.powi(3) - &volume_per_shell).cbrt()
        } else {
            core_radius.clone()
        };

        geo.cell_size[offset + cell] = &r_out - &r_in;
        geo.center_radius[offset + cell] = (&r_out + &r_in) * 0.5;
        geo.outer_surf_area_per_volume[offset + cell] = 3.0 * r_out.powi(2) / &volume_per_shell;
        geo.inner_surf_area_per_volume[offset + cell] = 3.0 * r_in.powi(2) / &volume_per_shell;

        r_out = r_in;
    }
}

/// Shells from user-given fractional interfaces in `[0, 1]`. The interfaces
/// are sorted descending, the endpoints are clamped to `1` and `0`, and the
/// result is mapped affinely onto `[R_core, R]`.
pub fn set_user_defined_radial_disc(
    geo: &mut ParticleGeometry,
    offset: usize,
    n_cells: usize,
    radius: &Active,
    core_radius: &Active,
    interfaces: &[f64],
) {
    debug_assert_eq!(interfaces.len(), n_cells + 1);
    let mut ordered = interfaces.to_vec();
    ordered.sort_by(|a, b| b.partial_cmp(a).unwrap());
    ordered[0] = 1.0;
    *ordered.last_mut().unwrap() = 0.0;

    let span = radius - core_radius;
    let mapped: Vec<Active> = ordered
        .iter()
        .map(|f| &span * *f + core_radius)
        .collect();

    for cell in 0..n_cells {
        let r_out = &mapped[cell];
        let r_in = &mapped[cell + 1];
        let vol = r_out.powi(3) - r_in.powi(3);

        geo.cell_size[offset + cell] = r_out - r_in;
        geo.center_radius[offset + cell] = (r_out + r_in) * 0.5;
        geo.outer_surf_area_per_volume[offset + cell] = 3.0 * r_out.powi(2) / &vol;
        geo.inner_surf_area_per_volume[offset + cell] = 3.0 * r_in.powi(2) / &vol;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn total_size(geo: &ParticleGeometry, offset: usize, n: usize) -> f64 {
        geo.cell_size[offset..offset + n]
            .iter()
            .map(Active::value)
            .sum()
    }

    fn assert_centers_decreasing(geo: &ParticleGeometry, offset: usize, n: usize) {
        for i in 1..n {
            assert!(
                geo.center_radius[offset + i].value() < geo.center_radius[offset + i - 1].value()
            );
        }
    }

    #[test]
    fn equidistant_covers_the_radius() {
        let mut geo = ParticleGeometry::new(6);
        let r = Active::new(4e-5);
        let rc = Active::new(1e-5);
        set_equidistant_radial_disc(&mut geo, 0, 6, &r, &rc);
        assert_relative_eq!(total_size(&geo, 0, 6), 3e-5, max_relative = 1e-14);
        assert_centers_decreasing(&geo, 0, 6);
        for i in 0..6 {
            assert_relative_eq!(geo.cell_size[i].value(), 0.5e-5, max_relative = 1e-14);
        }
    }

    #[test]
    fn equivolume_shells_have_equal_volume() {
        // R = 1, R_core = 0, 4 shells: each shell volume is a quarter of
        // the particle volume
        let mut geo = ParticleGeometry::new(4);
        let r = Active::new(1.0);
        let rc = Active::new(0.0);
        set_equivolume_radial_disc(&mut geo, 0, 4, &r, &rc);
        assert_relative_eq!(total_size(&geo, 0, 4), 1.0, max_relative = 1e-12);
        assert_centers_decreasing(&geo, 0, 4);

        let mut r_out = 1.0f64;
        for i in 0..4 {
            let r_in = r_out - geo.cell_size[i].value();
            assert_relative_eq!(
                r_out.powi(3) - r_in.powi(3),
                0.25,
                max_relative = 1e-10
            );
            // 3 r^2 / V with V = vol(shell)
            assert_relative_eq!(
                geo.outer_surf_area_per_volume[i].value(),
                3.0 * r_out * r_out / 0.25,
                max_relative = 1e-10
            );
            r_out = r_in;
        }
    }

    #[test]
    fn user_defined_sorts_and_clamps() {
        let mut geo = ParticleGeometry::new(3);
        let r = Active::new(2.0);
        let rc = Active::new(1.0);
        // unsorted, endpoints off: must be forced to {1, 0} and mapped onto
        // [1, 2]
        set_user_defined_radial_disc(&mut geo, 0, 3, &r, &rc, &[0.2, 0.95, 0.6, 0.1]);
        assert_relative_eq!(total_size(&geo, 0, 3), 1.0, max_relative = 1e-14);
        assert_centers_decreasing(&geo, 0, 3);
        assert_relative_eq!(geo.cell_size[0].value(), 0.4, max_relative = 1e-12);
        assert_relative_eq!(geo.cell_size[1].value(), 0.4, max_relative = 1e-12);
        assert_relative_eq!(geo.cell_size[2].value(), 0.2, max_relative = 1e-12);
    }

    #[test]
    fn geometry_propagates_radius_gradient() {
        let mut geo = ParticleGeometry::new(2);
        let mut r = Active::new(1.0);
        r.set_grad(0, 1.0);
        let rc = Active::new(0.0);
        set_equidistant_radial_disc(&mut geo, 0, 2, &r, &rc);
        // dr = R / 2, so d(dr)/dR = 0.5 while the nominal value is 0.5
        assert_relative_eq!(geo.cell_size[0].value(), 0.5);
        assert_relative_eq!(geo.cell_size[0].grad(0), 0.5);
    }
}

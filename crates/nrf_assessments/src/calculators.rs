//! Nutrient formulas.
//!
//! Pure functions over `f64`. Callers pass `0.0` for components that do not
//! apply to a development, e.g. land use outside every catchment.

pub const DAYS_PER_YEAR: f64 = 365.25;
pub const MG_PER_KG: f64 = 1_000_000.0;
pub const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

/// Treatment works are assumed to discharge at this share of their permit
/// concentration.
pub const PERMIT_OPERATING_RATE: f64 = 0.9;

/// Round half away from zero to `dp` decimal places.
pub fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}

/// Nitrogen and phosphorus uplift (kg/yr) from converting `area_ha` of the
/// current land use to residential, rounded to 2 dp.
pub fn land_use_uplift(
    area_ha: f64,
    current_n: f64,
    residential_n: f64,
    current_p: f64,
    residential_p: f64,
) -> (f64, f64) {
    (
        round_dp((residential_n - current_n) * area_ha, 2),
        round_dp((residential_p - current_p) * area_ha, 2),
    )
}

/// Remove the SuDS share from an uplift. The reduction applies to the
/// magnitude so a negative uplift moves towards zero by the same fraction.
pub fn suds_mitigation(uplift: f64, reduction_factor: f64) -> f64 {
    round_dp(uplift - uplift.abs() * reduction_factor, 2)
}

/// Annual wastewater loads from one development.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WastewaterLoad {
    pub daily_water_litres: f64,
    pub nitrogen_kg_yr: f64,
    pub phosphorus_kg_yr: f64,
}

pub fn wastewater_load(
    dwellings: f64,
    occupancy_rate: f64,
    litres_per_person_day: f64,
    nitrogen_mg_l: f64,
    phosphorus_mg_l: f64,
) -> WastewaterLoad {
    let daily_water_litres = dwellings * (occupancy_rate * litres_per_person_day);
    let annual = daily_water_litres * DAYS_PER_YEAR;
    WastewaterLoad {
        daily_water_litres,
        nitrogen_kg_yr: annual * ((nitrogen_mg_l / MG_PER_KG) * PERMIT_OPERATING_RATE),
        phosphorus_kg_yr: annual * ((phosphorus_mg_l / MG_PER_KG) * PERMIT_OPERATING_RATE),
    }
}

/// `base + |base| * buffer%` where `base` is the post-SuDS land use plus the
/// permanent wastewater load. Not rounded.
pub fn apply_precautionary_buffer(land_use_post_suds: f64, wastewater: f64, buffer_percent: f64) -> f64 {
    let base = land_use_post_suds + wastewater;
    base + base.abs() * (buffer_percent / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn uplift_is_the_coefficient_difference_times_area() {
        let (n, p) = land_use_uplift(2.5, 10.0, 14.3, 0.2, 0.84);
        assert!(close(n, 10.75));
        assert!(close(p, 1.6));
    }

    #[test]
    fn uplift_can_be_negative() {
        let (n, _) = land_use_uplift(1.0, 30.0, 14.3, 0.0, 0.0);
        assert!(close(n, -15.7));
    }

    #[test]
    fn suds_reduces_magnitude() {
        assert!(close(suds_mitigation(100.0, 0.25), 75.0));
        assert!(close(suds_mitigation(-100.0, 0.25), -125.0));
        assert!(close(suds_mitigation(0.0, 0.25), 0.0));
    }

    #[test]
    fn wastewater_load_matches_hand_calculation() {
        // 10 dwellings * 2.4 people * 110 l = 2640 l/day
        let load = wastewater_load(10.0, 2.4, 110.0, 10.0, 1.0);
        assert!(close(load.daily_water_litres, 2_640.0));
        let annual = 2_640.0 * 365.25;
        assert!(close(load.nitrogen_kg_yr, annual * 10.0 / 1e6 * 0.9));
        assert!(close(load.phosphorus_kg_yr, annual * 1.0 / 1e6 * 0.9));
    }

    #[test]
    fn missing_inputs_as_zero_give_no_load() {
        let load = wastewater_load(25.0, 0.0, 0.0, 12.0, 2.0);
        assert_eq!(load.nitrogen_kg_yr, 0.0);
        assert_eq!(load.phosphorus_kg_yr, 0.0);
    }

    #[test]
    fn buffer_is_added_to_negative_bases_too() {
        assert!(close(apply_precautionary_buffer(10.0, 5.0, 20.0), 18.0));
        assert!(close(apply_precautionary_buffer(-20.0, 5.0, 20.0), -12.0));
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert!(close(round_dp(0.125, 2), 0.13));
        assert!(close(round_dp(-1.5, 0), -2.0));
        assert!(close(round_dp(2.0, 2), 2.0));
    }
}

use serde::{Deserialize, Serialize};

/// Which camera-model parameters a solve holds fixed.
///
/// Every flag defaults to `false` (parameter estimated).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationFlags {
    /// Start from the supplied camera matrix and distortion instead of the
    /// closed-form initialization.
    pub use_intrinsic_guess: bool,
    /// Keep `fx / fy` at the ratio of the initial camera matrix.
    pub fix_aspect_ratio: bool,
    /// Keep `cx, cy` at their initial values (image centre without a guess).
    pub fix_principal_point: bool,
    /// Keep `fx, fy` at their initial values.
    pub fix_focal_length: bool,
    /// Force `p1 = p2 = 0`.
    pub zero_tangent_dist: bool,
    pub fix_k1: bool,
    pub fix_k2: bool,
    pub fix_k3: bool,
}

impl CalibrationFlags {
    /// Compact `+`-joined list of set flags, for reports and logs.
    pub fn describe(&self) -> String {
        let names = [
            (self.use_intrinsic_guess, "use_intrinsic_guess"),
            (self.fix_aspect_ratio, "fix_aspect_ratio"),
            (self.fix_principal_point, "fix_principal_point"),
            (self.fix_focal_length, "fix_focal_length"),
            (self.zero_tangent_dist, "zero_tangent_dist"),
            (self.fix_k1, "fix_k1"),
            (self.fix_k2, "fix_k2"),
            (self.fix_k3, "fix_k3"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(on, _)| *on)
            .map(|(_, n)| *n)
            .collect();
        if set.is_empty() {
            "none".to_string()
        } else {
            set.join("+")
        }
    }
}
